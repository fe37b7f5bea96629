//! Bounded history stack used for undo and redo.

use std::collections::VecDeque;

/// Default maximum number of entries kept by a [`HistoryStack`].
pub const DEFAULT_STACK_LIMIT: usize = 100;

/// Fixed-capacity LIFO stack that evicts its oldest entry when full.
///
/// Pushing onto a full stack drops the entry pushed earliest (front) before
/// appending, so `len() <= capacity()` always holds. `pop`/`peek` work on the
/// most recent entry (back).
#[derive(Debug, Clone)]
pub struct HistoryStack<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> HistoryStack<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_STACK_LIMIT)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(DEFAULT_STACK_LIMIT)),
            capacity,
        }
    }

    /// Append `item`, evicting the oldest entry first if the stack is full.
    ///
    /// Returns the evicted entry, if any. A zero-capacity stack stores
    /// nothing and hands `item` straight back.
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(item);
        }
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_back()
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries from oldest to most recent.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.items.iter()
    }
}

impl<T> Default for HistoryStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

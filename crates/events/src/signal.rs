//! Signal: typed multi-listener event channel.
//!
//! ## Usage Pattern
//!
//! ```ignore
//! let signal: Signal<u32> = Signal::new();
//!
//! let handle = signal.on(|value| println!("got {value}"));
//! signal.dispatch(&2);
//! handle.off();
//!
//! // Fires until the listener stops returning `false`.
//! signal.once(|value| *value == 3);
//! ```
//!
//! ## Dispatch Semantics
//!
//! - Listeners run synchronously, in registration order.
//! - Panics raised by a listener are not caught; they unwind out of `dispatch`.
//! - A listener removed during a dispatch is skipped for the rest of it; a
//!   listener added during a dispatch first runs on the next one.
//! - Async listeners are spawned with `tokio::task::spawn_local`, so
//!   dispatching to them requires a running `LocalSet`.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};

use retrace_core::{CommandError, CommandResult, Reporter, TracingReporter};

/// Boxed single-threaded future.
pub type LocalFuture<O> = Pin<Box<dyn Future<Output = O>>>;

/// What a one-shot listener wants after it ran.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OnceFlow {
    /// Stay registered and run again on the next dispatch.
    Retry,
    /// Unregister.
    Done,
}

impl From<()> for OnceFlow {
    fn from(_: ()) -> Self {
        OnceFlow::Done
    }
}

/// `false` keeps a one-shot listener registered, `true` releases it.
impl From<bool> for OnceFlow {
    fn from(value: bool) -> Self {
        if value { OnceFlow::Done } else { OnceFlow::Retry }
    }
}

type SyncFn<T> = dyn Fn(&T) -> OnceFlow;
type AsyncFn<T> = dyn Fn(T) -> LocalFuture<OnceFlow>;

enum ListenerKind<T> {
    Sync(Rc<SyncFn<T>>),
    Async(Rc<AsyncFn<T>>),
}

/// A callable attached to a [`Signal`].
///
/// Cloning a listener keeps its identity: adding the same listener twice to a
/// signal registers it once.
pub struct Listener<T> {
    kind: ListenerKind<T>,
}

impl<T: 'static> Listener<T> {
    pub fn new<F, R>(f: F) -> Self
    where
        F: Fn(&T) -> R + 'static,
        R: Into<OnceFlow>,
    {
        Self {
            kind: ListenerKind::Sync(Rc::new(move |data: &T| -> OnceFlow { f(data).into() })),
        }
    }

    pub fn future<F, Fut, R>(f: F) -> Self
    where
        F: Fn(T) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
        R: Into<OnceFlow>,
    {
        Self {
            kind: ListenerKind::Async(Rc::new(move |data: T| -> LocalFuture<OnceFlow> {
                let fut = f(data);
                Box::pin(async move {
                    let flow: OnceFlow = fut.await.into();
                    flow
                })
            })),
        }
    }

    fn same(&self, other: &Listener<T>) -> bool {
        match (&self.kind, &other.kind) {
            (ListenerKind::Sync(a), ListenerKind::Sync(b)) => {
                Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
            }
            (ListenerKind::Async(a), ListenerKind::Async(b)) => {
                Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
            }
            _ => false,
        }
    }
}

impl<T> Clone for Listener<T> {
    fn clone(&self) -> Self {
        let kind = match &self.kind {
            ListenerKind::Sync(f) => ListenerKind::Sync(Rc::clone(f)),
            ListenerKind::Async(f) => ListenerKind::Async(Rc::clone(f)),
        };
        Self { kind }
    }
}

impl<T> core::fmt::Debug for Listener<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let kind = match self.kind {
            ListenerKind::Sync(_) => "sync",
            ListenerKind::Async(_) => "async",
        };
        f.debug_struct("Listener").field("kind", &kind).finish()
    }
}

struct Entry<T> {
    id: u64,
    listener: Listener<T>,
    once: bool,
}

struct SignalInner<T> {
    entries: RefCell<Vec<Entry<T>>>,
    next_id: Cell<u64>,
}

impl<T> SignalInner<T> {
    fn remove(&self, id: u64) {
        self.entries.borrow_mut().retain(|e| e.id != id);
    }

    fn contains(&self, id: u64) -> bool {
        self.entries.borrow().iter().any(|e| e.id == id)
    }
}

/// Removal handle returned when a listener is registered.
pub struct ListenerHandle<T> {
    signal: Weak<SignalInner<T>>,
    id: u64,
}

impl<T> ListenerHandle<T> {
    fn detached() -> Self {
        Self {
            signal: Weak::new(),
            id: 0,
        }
    }

    /// Unregister the listener. Calling this more than once is a no-op.
    pub fn off(&self) {
        if let Some(inner) = self.signal.upgrade() {
            inner.remove(self.id);
        }
    }

    pub fn is_attached(&self) -> bool {
        self.signal
            .upgrade()
            .is_some_and(|inner| inner.contains(self.id))
    }
}

impl<T> Clone for ListenerHandle<T> {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
            id: self.id,
        }
    }
}

impl<T> core::fmt::Debug for ListenerHandle<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("id", &self.id)
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Typed multi-listener event channel.
pub struct Signal<T> {
    inner: Rc<SignalInner<T>>,
    reporter: Rc<dyn Reporter>,
}

impl<T: Clone + 'static> Signal<T> {
    pub fn new() -> Self {
        Self::with_reporter(Rc::new(TracingReporter::default()))
    }

    pub fn with_reporter(reporter: Rc<dyn Reporter>) -> Self {
        Self {
            inner: Rc::new(SignalInner {
                entries: RefCell::new(Vec::new()),
                next_id: Cell::new(1),
            }),
            reporter,
        }
    }

    /// Register `listener`.
    ///
    /// If the very same listener is already registered, the existing
    /// registration is kept and its handle returned.
    pub fn add(&self, listener: Listener<T>) -> ListenerHandle<T> {
        self.insert(listener, false)
    }

    /// Register `listener` as one-shot: it unregisters after its first run
    /// unless it returns [`OnceFlow::Retry`] (or `false`).
    pub fn add_once(&self, listener: Listener<T>) -> ListenerHandle<T> {
        self.insert(listener, true)
    }

    pub fn on<F, R>(&self, f: F) -> ListenerHandle<T>
    where
        F: Fn(&T) -> R + 'static,
        R: Into<OnceFlow>,
    {
        self.add(Listener::new(f))
    }

    pub fn on_async<F, Fut, R>(&self, f: F) -> ListenerHandle<T>
    where
        F: Fn(T) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
        R: Into<OnceFlow>,
    {
        self.add(Listener::future(f))
    }

    /// Register a listener invoked with `context` as its receiver.
    ///
    /// The context is held weakly; once it is dropped the listener stops
    /// running. Binding to a context that is already gone reports
    /// [`CommandError::InvalidListener`] and returns a detached handle.
    pub fn on_bound<C, F>(&self, context: &Weak<C>, f: F) -> CommandResult<ListenerHandle<T>>
    where
        C: 'static,
        F: Fn(&C, &T) + 'static,
    {
        if context.upgrade().is_none() {
            self.reporter.error(
                "Signal",
                CommandError::invalid_listener("listener context has already been dropped"),
            )?;
            return Ok(ListenerHandle::detached());
        }

        let context = context.clone();
        Ok(self.on(move |data: &T| {
            if let Some(ctx) = context.upgrade() {
                f(&ctx, data);
            }
        }))
    }

    pub fn once<F, R>(&self, f: F) -> ListenerHandle<T>
    where
        F: Fn(&T) -> R + 'static,
        R: Into<OnceFlow>,
    {
        self.add_once(Listener::new(f))
    }

    pub fn once_async<F, Fut, R>(&self, f: F) -> ListenerHandle<T>
    where
        F: Fn(T) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
        R: Into<OnceFlow>,
    {
        self.add_once(Listener::future(f))
    }

    /// Unregister the listener behind `handle`. Idempotent.
    pub fn off(&self, handle: &ListenerHandle<T>) {
        if handle.signal.ptr_eq(&Rc::downgrade(&self.inner)) {
            self.inner.remove(handle.id);
        }
    }

    /// Invoke every registered listener with `data`.
    ///
    /// # Panics
    ///
    /// Panics if an async listener is registered and no `LocalSet` is running.
    pub fn dispatch(&self, data: &T) {
        let snapshot: Vec<(u64, Listener<T>, bool)> = self
            .inner
            .entries
            .borrow()
            .iter()
            .map(|e| (e.id, e.listener.clone(), e.once))
            .collect();

        for (id, listener, once) in snapshot {
            if !self.inner.contains(id) {
                continue;
            }

            match listener.kind {
                ListenerKind::Sync(f) => {
                    let flow = f(data);
                    if once && flow == OnceFlow::Done {
                        self.inner.remove(id);
                    }
                }
                ListenerKind::Async(f) => {
                    let fut = f(data.clone());
                    let signal = Rc::downgrade(&self.inner);
                    tokio::task::spawn_local(async move {
                        let flow = fut.await;
                        if once && flow == OnceFlow::Done {
                            if let Some(inner) = signal.upgrade() {
                                inner.remove(id);
                            }
                        }
                    });
                }
            }
        }
    }

    /// Remove every listener.
    pub fn clear(&self) {
        self.inner.entries.borrow_mut().clear();
    }

    pub fn listener_count(&self) -> usize {
        self.inner.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listener_count() == 0
    }

    fn insert(&self, listener: Listener<T>, once: bool) -> ListenerHandle<T> {
        let mut entries = self.inner.entries.borrow_mut();

        if let Some(existing) = entries.iter().find(|e| e.listener.same(&listener)) {
            tracing::trace!(id = existing.id, "listener already registered");
            return ListenerHandle {
                signal: Rc::downgrade(&self.inner),
                id: existing.id,
            };
        }

        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        entries.push(Entry { id, listener, once });

        ListenerHandle {
            signal: Rc::downgrade(&self.inner),
            id,
        }
    }
}

impl<T: Clone + 'static> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> core::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Signal")
            .field("listeners", &self.inner.entries.borrow().len())
            .finish()
    }
}

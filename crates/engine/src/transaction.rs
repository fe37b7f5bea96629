//! Undo/redo bookkeeping and the transaction log.
//!
//! ## Recording Flow
//!
//! ```text
//! record(cmd)  → push undo, clear redo, log "Executed ..."
//! undo()       → pop undo → on_undo (sync or async) → push redo, log "Undone ..."
//! redo()       → pop redo → on_execute(captured args) → push undo, log "Redone ..."
//! ```
//!
//! History is linear: any new `record` invalidates the whole redo stack.
//! Undo runs the command's inverse hook; redo re-runs its forward hook, so
//! commands must be safe to execute twice with the same arguments.
//!
//! The log is append-only. `log_list()` filters it through the current mask
//! on every read, so changing the level changes what the next read returns
//! without touching stored records.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;

use retrace_core::{
    CommandError, DEFAULT_STACK_LIMIT, HistoryStack, LogLevel, LogMask, LogRecord, LogType,
    ManagerConfig, Reporter, TracingReporter,
};

use crate::command::{CommandHandle, Execution};

const SCOPE: &str = "TransactionManager";

/// Turns a command name and its captured arguments into a log message.
pub type LogFormatter = Rc<dyn Fn(&str, &[Value]) -> String>;

fn args_json(args: &[Value]) -> String {
    serde_json::to_string(args).unwrap_or_else(|_| "[]".to_string())
}

/// `"{verb} command: <{name}> with args: {json}"`, the format used when no
/// custom formatter is configured.
pub fn default_formatter(verb: &'static str) -> LogFormatter {
    Rc::new(move |name: &str, args: &[Value]| {
        format!("{verb} command: <{name}> with args: {}", args_json(args))
    })
}

/// Construction options for a [`TransactionManager`].
#[derive(Clone)]
pub struct TransactionOptions {
    /// Capacity of each of the undo and redo stacks.
    pub stack_limit: usize,
    pub log_level: LogLevel,
    pub log_formatter: Option<LogFormatter>,
    pub undo_log_formatter: Option<LogFormatter>,
    pub redo_log_formatter: Option<LogFormatter>,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            stack_limit: DEFAULT_STACK_LIMIT,
            log_level: LogLevel::default(),
            log_formatter: None,
            undo_log_formatter: None,
            redo_log_formatter: None,
        }
    }
}

impl From<&ManagerConfig> for TransactionOptions {
    fn from(config: &ManagerConfig) -> Self {
        Self {
            stack_limit: config.stack_limit,
            log_level: config.log_level,
            ..Self::default()
        }
    }
}

impl core::fmt::Debug for TransactionOptions {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TransactionOptions")
            .field("stack_limit", &self.stack_limit)
            .field("log_level", &self.log_level)
            .field("custom_log_formatter", &self.log_formatter.is_some())
            .field("custom_undo_log_formatter", &self.undo_log_formatter.is_some())
            .field("custom_redo_log_formatter", &self.redo_log_formatter.is_some())
            .finish()
    }
}

struct Formatters {
    execute: LogFormatter,
    undo: LogFormatter,
    redo: LogFormatter,
}

struct TransactionState {
    undo: HistoryStack<CommandHandle>,
    redo: HistoryStack<CommandHandle>,
    log: Vec<LogRecord>,
    mask: LogMask,
}

/// Owns the undo/redo stacks and the filtered transaction log.
///
/// Cloning yields another handle to the same state; pending async undo/redo
/// continuations hold such a clone.
#[derive(Clone)]
pub struct TransactionManager {
    state: Rc<RefCell<TransactionState>>,
    formatters: Rc<Formatters>,
    reporter: Rc<dyn Reporter>,
}

impl TransactionManager {
    pub fn new(options: TransactionOptions, reporter: Rc<dyn Reporter>) -> Self {
        let formatters = Formatters {
            execute: options
                .log_formatter
                .unwrap_or_else(|| default_formatter("Executed")),
            undo: options
                .undo_log_formatter
                .unwrap_or_else(|| default_formatter("Undone")),
            redo: options
                .redo_log_formatter
                .unwrap_or_else(|| default_formatter("Redone")),
        };

        Self {
            state: Rc::new(RefCell::new(TransactionState {
                undo: HistoryStack::with_capacity(options.stack_limit),
                redo: HistoryStack::with_capacity(options.stack_limit),
                log: Vec::new(),
                mask: options.log_level.mask(),
            })),
            formatters: Rc::new(formatters),
            reporter,
        }
    }

    /// Record a completed forward execution.
    ///
    /// Pushes `cmd` onto the undo stack, clears the redo stack and appends an
    /// entry of type `kind`.
    pub fn record(&self, cmd: &CommandHandle, kind: LogType) {
        let message = (self.formatters.execute)(cmd.name(), &cmd.args());
        let mut state = self.state.borrow_mut();
        if let Some(evicted) = state.undo.push(cmd.clone()) {
            tracing::trace!(command = evicted.name(), "evicted from undo history");
        }
        state.redo.clear();
        state.log.push(LogRecord::new(kind, message, cmd.name()));
    }

    /// Undo the most recent command.
    ///
    /// Returns `false` (after a warning) when there is nothing to undo. For
    /// an async inverse hook the command reaches the redo stack only once its
    /// future settles; this call does not wait for it.
    ///
    /// # Panics
    ///
    /// Panics if the inverse hook is async and no `LocalSet` is running.
    pub fn undo(&self) -> bool {
        let popped = self.state.borrow_mut().undo.pop();
        let Some(cmd) = popped else {
            self.reporter
                .warn(SCOPE, &CommandError::EmptyHistory("undo").to_string());
            return false;
        };

        tracing::debug!(command = cmd.name(), id = %cmd.id(), "undo");
        match cmd.run_undo() {
            Execution::Done => self.undo_done(&cmd),
            Execution::Pending(fut) => {
                let this = self.clone();
                tokio::task::spawn_local(async move {
                    fut.await;
                    this.undo_done(&cmd);
                });
            }
        }
        true
    }

    /// Re-run the most recently undone command with its captured arguments.
    ///
    /// Mirrors [`undo`](Self::undo).
    ///
    /// # Panics
    ///
    /// Panics if `on_execute` is async and no `LocalSet` is running.
    pub fn redo(&self) -> bool {
        let popped = self.state.borrow_mut().redo.pop();
        let Some(cmd) = popped else {
            self.reporter
                .warn(SCOPE, &CommandError::EmptyHistory("redo").to_string());
            return false;
        };

        tracing::debug!(command = cmd.name(), id = %cmd.id(), "redo");
        match cmd.run_execute(cmd.args()) {
            Execution::Done => self.redo_done(&cmd),
            Execution::Pending(fut) => {
                let this = self.clone();
                tokio::task::spawn_local(async move {
                    fut.await;
                    this.redo_done(&cmd);
                });
            }
        }
        true
    }

    /// Append an entry unrelated to any undo/redo transition.
    pub fn write_log(&self, kind: LogType, message: impl Into<String>, scope: impl Into<String>) {
        self.state
            .borrow_mut()
            .log
            .push(LogRecord::new(kind, message, scope));
    }

    /// Entries visible through the current mask, oldest first.
    pub fn log_list(&self) -> Vec<LogRecord> {
        let state = self.state.borrow();
        state
            .log
            .iter()
            .filter(|record| state.mask.admits(record.kind))
            .cloned()
            .collect()
    }

    pub fn set_log_level(&self, level: impl Into<LogMask>) {
        self.state.borrow_mut().mask = level.into();
    }

    pub fn log_mask(&self) -> LogMask {
        self.state.borrow().mask
    }

    pub fn can_undo(&self) -> bool {
        !self.state.borrow().undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.state.borrow().redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.state.borrow().undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.state.borrow().redo.len()
    }

    /// The command the next `undo()` would revert.
    pub fn peek_undo(&self) -> Option<CommandHandle> {
        self.state.borrow().undo.peek().cloned()
    }

    /// The command the next `redo()` would re-run.
    pub fn peek_redo(&self) -> Option<CommandHandle> {
        self.state.borrow().redo.peek().cloned()
    }

    /// Empty both stacks and the log.
    pub fn clear(&self) {
        {
            let mut state = self.state.borrow_mut();
            state.undo.clear();
            state.redo.clear();
            state.log.clear();
        }
        self.reporter.log(SCOPE, "Command history cleared.");
    }

    fn undo_done(&self, cmd: &CommandHandle) {
        let message = (self.formatters.undo)(cmd.name(), &cmd.args());
        let mut state = self.state.borrow_mut();
        state.redo.push(cmd.clone());
        state.log.push(LogRecord::new(LogType::Info, message, cmd.name()));
    }

    fn redo_done(&self, cmd: &CommandHandle) {
        let message = (self.formatters.redo)(cmd.name(), &cmd.args());
        let mut state = self.state.borrow_mut();
        state.undo.push(cmd.clone());
        state.log.push(LogRecord::new(LogType::Info, message, cmd.name()));
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new(
            TransactionOptions::default(),
            Rc::new(TracingReporter::default()),
        )
    }
}

impl core::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("TransactionManager")
            .field("undo", &state.undo.len())
            .field("redo", &state.redo.len())
            .field("log", &state.log.len())
            .field("mask", &state.mask)
            .finish()
    }
}

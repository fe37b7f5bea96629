//! Command abstraction and the per-execution handle wrapping it.
//!
//! A [`Command`] is user code: a set of lifecycle hooks. The manager wraps
//! every instantiated command in a [`CommandHandle`], which owns the state the
//! hooks must not touch directly (name, captured arguments, lifecycle state)
//! and is the only way hooks reach back into the manager (`commit`, `cancel`,
//! `write_log`).
//!
//! ## Lifecycle
//!
//! ```text
//! Idle → Running → Committed
//!                ↘ Cancelled
//! ```
//!
//! Terminal states are final. A terminated handle stays on the undo/redo
//! stacks and its hooks keep running for undo/redo, but it can never be
//! committed or cancelled again.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use retrace_core::{CommandError, CommandId, CommandResult, LogType, Reporter};
use retrace_events::LocalFuture;

use crate::manager::{CommandManager, ManagerShared};

/// Arguments captured for one execution, replayed verbatim on redo.
pub type Args = Vec<Value>;

/// Outcome of a hook that may finish later.
#[derive(Default)]
pub enum Execution {
    /// The hook finished synchronously.
    #[default]
    Done,
    /// The hook continues in this future; the caller does not wait for it.
    Pending(LocalFuture<()>),
}

impl Execution {
    pub fn pending<F>(fut: F) -> Self
    where
        F: Future<Output = ()> + 'static,
    {
        Execution::Pending(Box::pin(fut))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Execution::Pending(_))
    }
}

impl From<()> for Execution {
    fn from(_: ()) -> Self {
        Execution::Done
    }
}

impl core::fmt::Debug for Execution {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Execution::Done => f.write_str("Done"),
            Execution::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    Idle,
    Running,
    Committed,
    Cancelled,
}

impl CommandState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CommandState::Committed | CommandState::Cancelled)
    }
}

/// How a running command ends.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminateAction {
    Commit,
    Cancel,
}

/// A named, undoable unit of work.
///
/// Hooks take `&self`: they are re-entered while other hooks of the same
/// command are on the stack (`commit()` inside `on_execute` runs
/// `on_complete` immediately), so commands keep mutable state behind
/// `Cell`/`RefCell`.
///
/// # Example
///
/// ```ignore
/// struct Add { total: Rc<Cell<i64>>, last: Cell<i64> }
///
/// impl Command for Add {
///     fn on_execute(&self, _cmd: &CommandHandle, args: &[Value]) -> Execution {
///         let n = args[0].as_i64().unwrap_or(0);
///         self.last.set(n);
///         self.total.set(self.total.get() + n);
///         Execution::Done
///     }
///
///     fn on_undo(&self, _cmd: &CommandHandle) -> Execution {
///         self.total.set(self.total.get() - self.last.get());
///         Execution::Done
///     }
/// }
/// ```
pub trait Command: 'static {
    /// Whether the manager commits the command once `on_execute` settles.
    ///
    /// Commands returning `false` must call `commit()` or `cancel()` on
    /// their handle themselves, typically from `on_receive`.
    fn auto_complete(&self) -> bool {
        true
    }

    /// Forward action. Also re-run with the captured arguments on redo, so
    /// it must be safe to run again with the same input.
    fn on_execute(&self, cmd: &CommandHandle, args: &[Value]) -> Execution;

    /// Inbound message while the command is current. Return whether it was
    /// handled.
    fn on_receive(&self, _cmd: &CommandHandle, _kind: &str, _data: &Value) -> bool {
        false
    }

    /// Inverse of `on_execute`, run when the command is undone.
    fn on_undo(&self, _cmd: &CommandHandle) -> Execution {
        Execution::Done
    }

    fn on_complete(&self, _cmd: &CommandHandle) {}

    fn on_cancel(&self, _cmd: &CommandHandle) {}

    /// Runs exactly once after the command terminated, whichever way.
    fn on_cleanup(&self, _cmd: &CommandHandle) {}
}

struct CommandSlot {
    id: CommandId,
    name: String,
    args: RefCell<Args>,
    state: Cell<CommandState>,
    manager: Weak<ManagerShared>,
    reporter: Rc<dyn Reporter>,
    command: Box<dyn Command>,
}

/// Shared handle to one instantiated command.
///
/// Cloning is cheap; equality is identity (two handles are equal iff they
/// refer to the same execution).
#[derive(Clone)]
pub struct CommandHandle {
    inner: Rc<CommandSlot>,
}

impl CommandHandle {
    pub(crate) fn new(
        name: &str,
        command: Box<dyn Command>,
        manager: Weak<ManagerShared>,
        reporter: Rc<dyn Reporter>,
    ) -> Self {
        Self {
            inner: Rc::new(CommandSlot {
                id: CommandId::new(),
                name: name.to_string(),
                args: RefCell::new(Args::new()),
                state: Cell::new(CommandState::Idle),
                manager,
                reporter,
                command,
            }),
        }
    }

    pub fn id(&self) -> CommandId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Arguments captured by the most recent execution.
    pub fn args(&self) -> Args {
        self.inner.args.borrow().clone()
    }

    pub fn state(&self) -> CommandState {
        self.inner.state.get()
    }

    pub fn is_terminated(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn auto_complete(&self) -> bool {
        self.inner.command.auto_complete()
    }

    /// The manager that created this command, if it is still alive.
    pub fn manager(&self) -> Option<CommandManager> {
        self.inner.manager.upgrade().map(CommandManager::from_shared)
    }

    pub fn ptr_eq(&self, other: &CommandHandle) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// End the command successfully.
    ///
    /// Calling this on a command that already terminated (or whose manager
    /// is gone) is reported as [`CommandError::InvalidState`] and does
    /// nothing else.
    pub fn commit(&self) -> CommandResult<()> {
        self.finish(TerminateAction::Commit)
    }

    /// Abandon the command. Same guard as [`commit`](Self::commit).
    pub fn cancel(&self) -> CommandResult<()> {
        self.finish(TerminateAction::Cancel)
    }

    /// Append a domain entry to the manager's transaction log, scoped to
    /// this command's name.
    pub fn write_log(&self, kind: LogType, message: impl Into<String>) {
        match self.manager() {
            Some(manager) => manager.write_log(kind, message, self.name()),
            None => self
                .inner
                .reporter
                .log(&self.scope(), "manager dropped; log entry discarded"),
        }
    }

    fn finish(&self, action: TerminateAction) -> CommandResult<()> {
        let manager = if self.is_terminated() {
            None
        } else {
            self.manager()
        };

        match manager {
            Some(manager) => manager.terminate(self, action),
            None => self.inner.reporter.error(
                &self.scope(),
                CommandError::invalid_state(format!(
                    "command {} is created not properly or already terminated",
                    self.name()
                )),
            ),
        }
    }

    fn scope(&self) -> String {
        format!("Command {}", self.inner.name)
    }

    /// Capture `args`, then forward them to `on_execute`.
    pub(crate) fn run_execute(&self, args: Args) -> Execution {
        *self.inner.args.borrow_mut() = args.clone();
        if self.state() == CommandState::Idle {
            self.inner.state.set(CommandState::Running);
        }
        self.inner.command.on_execute(self, &args)
    }

    pub(crate) fn run_receive(&self, kind: &str, data: &Value) -> bool {
        let handled = self.inner.command.on_receive(self, kind, data);
        self.inner.reporter.log(
            &self.scope(),
            &format!("Received message of type {kind} with data: {data} (handled: {handled})"),
        );
        handled
    }

    pub(crate) fn run_undo(&self) -> Execution {
        self.inner.reporter.log(&self.scope(), "Command undoing.");
        self.inner.command.on_undo(self)
    }

    pub(crate) fn mark_terminated(&self, action: TerminateAction) {
        let state = match action {
            TerminateAction::Commit => CommandState::Committed,
            TerminateAction::Cancel => CommandState::Cancelled,
        };
        self.inner.state.set(state);
    }

    pub(crate) fn run_terminal_hook(&self, action: TerminateAction) {
        match action {
            TerminateAction::Commit => {
                self.inner.command.on_complete(self);
                self.inner.reporter.log(&self.scope(), "Command completed.");
            }
            TerminateAction::Cancel => {
                self.inner.command.on_cancel(self);
                self.inner.reporter.log(&self.scope(), "Command cancelled.");
            }
        }
    }

    pub(crate) fn run_cleanup(&self) {
        self.inner.command.on_cleanup(self);
        self.inner
            .reporter
            .log(&self.scope(), "Command is being cleaned up.");
    }
}

impl PartialEq for CommandHandle {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for CommandHandle {}

impl core::fmt::Debug for CommandHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CommandHandle")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("state", &self.inner.state.get())
            .field("args", &self.inner.args.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrace_core::{ErrorPolicy, TracingReporter};
    use serde_json::json;

    struct Echo {
        seen: Rc<RefCell<Vec<Args>>>,
    }

    impl Command for Echo {
        fn on_execute(&self, _cmd: &CommandHandle, args: &[Value]) -> Execution {
            self.seen.borrow_mut().push(args.to_vec());
            Execution::Done
        }
    }

    fn detached(policy: ErrorPolicy) -> (CommandHandle, Rc<RefCell<Vec<Args>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let handle = CommandHandle::new(
            "echo",
            Box::new(Echo { seen: seen.clone() }),
            Weak::new(),
            Rc::new(TracingReporter::new(policy)),
        );
        (handle, seen)
    }

    #[test]
    fn run_execute_captures_args_before_forwarding() {
        let (handle, seen) = detached(ErrorPolicy::Raise);
        assert_eq!(handle.state(), CommandState::Idle);

        handle.run_execute(vec![json!(1), json!("two")]);
        assert_eq!(handle.args(), vec![json!(1), json!("two")]);
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(handle.state(), CommandState::Running);
    }

    #[test]
    fn commit_without_manager_is_invalid_state() {
        let (handle, _) = detached(ErrorPolicy::Raise);
        let err = handle.commit().unwrap_err();
        assert!(matches!(err, CommandError::InvalidState(_)));
    }

    #[test]
    fn silent_policy_makes_bad_commit_a_no_op() {
        let (handle, _) = detached(ErrorPolicy::Silent);
        assert_eq!(handle.cancel(), Ok(()));
        assert_eq!(handle.state(), CommandState::Idle);
    }

    #[test]
    fn handles_compare_by_identity() {
        let (a, _) = detached(ErrorPolicy::Raise);
        let (b, _) = detached(ErrorPolicy::Raise);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn state_serializes_as_snake_case() {
        assert_eq!(
            serde_json::to_value(CommandState::Cancelled).unwrap(),
            json!("cancelled")
        );
        assert_eq!(
            serde_json::to_value(TerminateAction::Commit).unwrap(),
            json!("commit")
        );
    }

    #[test]
    fn default_hooks_do_nothing() {
        let (handle, _) = detached(ErrorPolicy::Raise);
        assert!(handle.auto_complete());
        assert!(!handle.run_receive("ping", &json!({"x": 1})));
        assert!(!handle.run_undo().is_pending());
    }
}

//! Command orchestration (registration, execution, termination).
//!
//! ## Execution Flow
//!
//! ```text
//! execute(name, args)
//!   ↓
//! 1. Look up the registered factory (unknown name → NotFound)
//!   ↓
//! 2. Instantiate, set as `current`, dispatch `cmd_started`
//!   ↓
//! 3. on_execute(args)            (async: continue when the future settles)
//!   ↓
//! 4. auto_complete → commit()    (see termination below)
//!   ↓
//! 5. Record into the transaction manager
//! ```
//!
//! Termination (`commit`/`cancel` → [`CommandManager::terminate`]) always runs:
//!
//! ```text
//! on_complete | on_cancel → dispatch `cmd_terminated` → clear `current` → on_cleanup
//! ```
//!
//! Listeners of `cmd_terminated` therefore still see the command as
//! `current`; `on_cleanup` no longer does.
//!
//! ## Single Active Command
//!
//! Only one command runs at a time. Starting another while `current` is set
//! is reported as [`CommandError::Busy`] and leaves `current` alone. Callers
//! chain async commands through [`CommandManager::execute_async`].

use std::cell::{OnceCell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::rc::{Rc, Weak};

use serde_json::Value;

use retrace_core::{
    CommandError, CommandResult, LogMask, LogRecord, LogType, ManagerConfig, Reporter,
    TracingReporter,
};
use retrace_events::{OnceFlow, Signal};

use crate::command::{Args, Command, CommandHandle, Execution, TerminateAction};
use crate::transaction::{TransactionManager, TransactionOptions};

const SCOPE: &str = "CommandManager";

/// Builds a fresh command for one execution, given the manager and the
/// registered name.
pub type CommandFactory = Rc<dyn Fn(&CommandManager, &str) -> Box<dyn Command>>;

pub(crate) struct ManagerShared {
    commands: RefCell<HashMap<String, CommandFactory>>,
    current: RefCell<Option<CommandHandle>>,
    transactions: TransactionManager,
    started: Signal<CommandHandle>,
    terminated: Signal<CommandHandle>,
    reporter: Rc<dyn Reporter>,
}

/// Façade over command registration, execution and undo/redo history.
///
/// `CommandManager` is a cheap handle (`Rc`) and is not `Send`: the engine is
/// single-threaded and cooperative. Async hooks run on the current
/// `tokio::task::LocalSet`.
#[derive(Clone)]
pub struct CommandManager {
    shared: Rc<ManagerShared>,
}

thread_local! {
    static INSTANCE: OnceCell<CommandManager> = const { OnceCell::new() };
}

impl CommandManager {
    pub fn new() -> Self {
        Self::with_config(ManagerConfig::default())
    }

    pub fn with_config(config: ManagerConfig) -> Self {
        Self::with_reporter(config, Rc::new(TracingReporter::new(config.error_policy)))
    }

    pub fn with_reporter(config: ManagerConfig, reporter: Rc<dyn Reporter>) -> Self {
        let options = TransactionOptions::from(&config);
        Self::with_options(options, reporter)
    }

    pub fn with_options(options: TransactionOptions, reporter: Rc<dyn Reporter>) -> Self {
        let transactions = TransactionManager::new(options, reporter.clone());
        Self {
            shared: Rc::new(ManagerShared {
                commands: RefCell::new(HashMap::new()),
                current: RefCell::new(None),
                transactions,
                started: Signal::with_reporter(reporter.clone()),
                terminated: Signal::with_reporter(reporter.clone()),
                reporter,
            }),
        }
    }

    /// The per-thread shared manager, created from the environment
    /// ([`ManagerConfig::from_env`]) on first access.
    ///
    /// It lives until the thread exits; [`dispose`](Self::dispose) resets it
    /// but keeps the same instance.
    pub fn instance() -> CommandManager {
        INSTANCE.with(|cell| {
            cell.get_or_init(|| CommandManager::with_config(ManagerConfig::from_env()))
                .clone()
        })
    }

    pub(crate) fn from_shared(shared: Rc<ManagerShared>) -> Self {
        Self { shared }
    }

    pub fn ptr_eq(&self, other: &CommandManager) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }

    /// Register `factory` under `name`.
    ///
    /// A name can only be registered once: a second registration is reported
    /// as [`CommandError::DuplicateRegistration`] and the first one is kept.
    pub fn register<F>(&self, name: impl Into<String>, factory: F) -> CommandResult<()>
    where
        F: Fn(&CommandManager, &str) -> Box<dyn Command> + 'static,
    {
        self.register_factory(name, Rc::new(factory))
    }

    /// Register a command type built with `Default`.
    pub fn register_default<C>(&self, name: impl Into<String>) -> CommandResult<()>
    where
        C: Command + Default,
    {
        self.register(name, |_, _| Box::new(C::default()))
    }

    /// Register several commands at once, stopping at the first reported
    /// error.
    pub fn register_all<I, S>(&self, commands: I) -> CommandResult<()>
    where
        I: IntoIterator<Item = (S, CommandFactory)>,
        S: Into<String>,
    {
        for (name, factory) in commands {
            self.register_factory(name, factory)?;
        }
        Ok(())
    }

    pub fn register_factory(
        &self,
        name: impl Into<String>,
        factory: CommandFactory,
    ) -> CommandResult<()> {
        let name = name.into();
        if self.has_registered(&name) {
            return self
                .shared
                .reporter
                .error(SCOPE, CommandError::duplicate(name));
        }

        tracing::debug!(command = %name, "command registered");
        self.shared.commands.borrow_mut().insert(name, factory);
        Ok(())
    }

    pub fn has_registered(&self, name: &str) -> bool {
        self.shared.commands.borrow().contains_key(name)
    }

    /// The command between its start and its termination, if any.
    pub fn current(&self) -> Option<CommandHandle> {
        self.shared.current.borrow().clone()
    }

    /// Instantiate and run the command registered as `name`.
    ///
    /// Returns as soon as `on_execute` returns; an async command keeps
    /// running (and stays `current`) until its future settles.
    ///
    /// # Panics
    ///
    /// Panics if `on_execute` is async and no `LocalSet` is running.
    pub fn execute(&self, name: &str, args: Args) -> CommandResult<()> {
        self.start(name, args).map(|_| ())
    }

    /// Execute `name` and wait until a command with that name terminates.
    ///
    /// The command is started before this returns; the future only waits.
    /// If the command could not be started and the reporter swallowed the
    /// error, the future resolves immediately.
    pub fn execute_async(
        &self,
        name: &str,
        args: Args,
    ) -> impl Future<Output = CommandResult<()>> + 'static {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let tx = RefCell::new(Some(tx));
        let wanted = name.to_string();

        let waiter = self.shared.terminated.once(move |cmd: &CommandHandle| {
            if cmd.name() != wanted {
                return OnceFlow::Retry;
            }
            if let Some(tx) = tx.borrow_mut().take() {
                let _ = tx.send(());
            }
            OnceFlow::Done
        });

        let started = self.start(name, args);
        if !matches!(started, Ok(Some(_))) {
            waiter.off();
        }

        let name = name.to_string();
        async move {
            match started? {
                Some(_) => rx.await.map_err(|_| CommandError::interrupted(name)),
                None => Ok(()),
            }
        }
    }

    /// Forward a message to the current command's `on_receive`.
    ///
    /// With no command running this is reported as
    /// [`CommandError::NoActiveCommand`] and yields `false`.
    pub fn receive(&self, kind: &str, data: &Value) -> CommandResult<bool> {
        let Some(current) = self.current() else {
            self.shared
                .reporter
                .error(SCOPE, CommandError::NoActiveCommand)?;
            return Ok(false);
        };
        Ok(current.run_receive(kind, data))
    }

    /// End `cmd` (normally reached through `commit`/`cancel` on its handle).
    ///
    /// A command that already terminated is reported as
    /// [`CommandError::InvalidState`] and left untouched.
    ///
    /// If `cmd` is not the current command the mismatch is reported, but only
    /// after termination has run to completion; `current` is then left as it
    /// was.
    pub fn terminate(&self, cmd: &CommandHandle, action: TerminateAction) -> CommandResult<()> {
        if cmd.is_terminated() {
            return self.shared.reporter.error(
                SCOPE,
                CommandError::invalid_state(format!(
                    "command {} already terminated as {:?}",
                    cmd.name(),
                    cmd.state()
                )),
            );
        }

        let is_current = self
            .shared
            .current
            .borrow()
            .as_ref()
            .is_some_and(|current| current.ptr_eq(cmd));

        cmd.mark_terminated(action);
        cmd.run_terminal_hook(action);
        self.shared.terminated.dispatch(cmd);
        if is_current {
            self.shared.current.borrow_mut().take();
        }
        cmd.run_cleanup();

        tracing::debug!(command = cmd.name(), id = %cmd.id(), ?action, "command terminated");

        if is_current {
            Ok(())
        } else {
            self.shared.reporter.error(
                SCOPE,
                CommandError::invalid_state(format!(
                    "command {} is not the current command",
                    cmd.name()
                )),
            )
        }
    }

    pub fn write_log(&self, kind: LogType, message: impl Into<String>, scope: impl Into<String>) {
        self.shared.transactions.write_log(kind, message, scope);
    }

    /// Transaction log entries visible through the current level.
    pub fn read_log(&self) -> Vec<LogRecord> {
        self.shared.transactions.log_list()
    }

    pub fn set_log_level(&self, level: impl Into<LogMask>) {
        self.shared.transactions.set_log_level(level);
    }

    pub fn log_level(&self) -> LogMask {
        self.shared.transactions.log_mask()
    }

    pub fn undo(&self) -> bool {
        self.shared.transactions.undo()
    }

    pub fn redo(&self) -> bool {
        self.shared.transactions.redo()
    }

    pub fn can_undo(&self) -> bool {
        self.shared.transactions.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.shared.transactions.can_redo()
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.shared.transactions
    }

    /// Fired after a command is instantiated, before `on_execute`.
    pub fn cmd_started(&self) -> &Signal<CommandHandle> {
        &self.shared.started
    }

    /// Fired during termination, after `on_complete`/`on_cancel`.
    pub fn cmd_terminated(&self) -> &Signal<CommandHandle> {
        &self.shared.terminated
    }

    /// Reset everything: registry, history, log, `current` and both signals.
    pub fn dispose(&self) {
        self.shared.commands.borrow_mut().clear();
        self.shared.transactions.clear();
        self.shared.current.borrow_mut().take();
        self.shared.started.clear();
        self.shared.terminated.clear();
        self.shared
            .reporter
            .log(SCOPE, "All commands have been cleaned up.");
    }

    fn start(&self, name: &str, args: Args) -> CommandResult<Option<CommandHandle>> {
        let factory = self.shared.commands.borrow().get(name).cloned();
        let Some(factory) = factory else {
            self.shared
                .reporter
                .error(SCOPE, CommandError::not_found(name))?;
            return Ok(None);
        };

        if let Some(active) = self.current() {
            self.shared
                .reporter
                .error(SCOPE, CommandError::busy(name, active.name()))?;
            return Ok(None);
        }

        let handle = CommandHandle::new(
            name,
            factory(self, name),
            Rc::downgrade(&self.shared),
            self.shared.reporter.clone(),
        );
        *self.shared.current.borrow_mut() = Some(handle.clone());

        tracing::debug!(command = name, id = %handle.id(), "command started");
        self.shared.started.dispatch(&handle);

        match handle.run_execute(args) {
            Execution::Done => self.post_process(&handle)?,
            Execution::Pending(fut) => {
                let manager = self.clone();
                let pending = handle.clone();
                tokio::task::spawn_local(async move {
                    fut.await;
                    if let Err(err) = manager.post_process(&pending) {
                        tracing::error!(command = pending.name(), "post-processing failed: {err}");
                    }
                });
            }
        }

        Ok(Some(handle))
    }

    /// Commit (if auto-completing and still running), then record.
    fn post_process(&self, handle: &CommandHandle) -> CommandResult<()> {
        let committed = if handle.auto_complete() && !handle.is_terminated() {
            handle.commit()
        } else {
            Ok(())
        };
        self.shared.transactions.record(handle, LogType::Info);
        committed
    }
}

impl Default for CommandManager {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for CommandManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CommandManager")
            .field("commands", &self.shared.commands.borrow().len())
            .field("current", &self.shared.current.borrow())
            .field("transactions", &self.shared.transactions)
            .finish()
    }
}

/// Weak counterpart of [`CommandManager`], for observers that must not keep
/// the manager alive.
#[derive(Clone, Default)]
pub struct WeakCommandManager {
    shared: Weak<ManagerShared>,
}

impl WeakCommandManager {
    pub fn upgrade(&self) -> Option<CommandManager> {
        self.shared.upgrade().map(CommandManager::from_shared)
    }
}

impl CommandManager {
    pub fn downgrade(&self) -> WeakCommandManager {
        WeakCommandManager {
            shared: Rc::downgrade(&self.shared),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use retrace_core::{ErrorPolicy, LogLevel};
    use serde_json::json;

    use crate::args;
    use crate::command::CommandState;

    #[derive(Default)]
    struct Noop;

    impl Command for Noop {
        fn on_execute(&self, _cmd: &CommandHandle, _args: &[Value]) -> Execution {
            Execution::Done
        }
    }

    /// Stays current until it receives "done".
    #[derive(Default)]
    struct Manual;

    impl Command for Manual {
        fn auto_complete(&self) -> bool {
            false
        }

        fn on_execute(&self, _cmd: &CommandHandle, _args: &[Value]) -> Execution {
            Execution::Done
        }

        fn on_receive(&self, cmd: &CommandHandle, kind: &str, _data: &Value) -> bool {
            if kind == "done" {
                let _ = cmd.commit();
                return true;
            }
            false
        }
    }

    fn silent() -> CommandManager {
        CommandManager::with_config(ManagerConfig {
            error_policy: ErrorPolicy::Silent,
            ..ManagerConfig::default()
        })
    }

    #[test]
    fn register_and_execute() {
        let mgr = CommandManager::new();
        mgr.register_default::<Noop>("noop").unwrap();
        assert!(mgr.has_registered("noop"));
        assert!(!mgr.has_registered("other"));

        mgr.execute("noop", args![]).unwrap();
        assert!(mgr.current().is_none());
        assert!(mgr.can_undo());
    }

    #[test]
    fn unknown_command_is_not_found() {
        let mgr = CommandManager::new();
        assert_eq!(
            mgr.execute("missing", args![]),
            Err(CommandError::not_found("missing"))
        );

        let quiet = silent();
        assert_eq!(quiet.execute("missing", args![]), Ok(()));
        assert!(!quiet.can_undo());
    }

    #[test]
    fn duplicate_registration_keeps_the_first_factory() {
        let mgr = CommandManager::new();
        let which = Rc::new(Cell::new(""));

        let w = which.clone();
        mgr.register("cmd", move |_, _| {
            w.set("first");
            Box::new(Noop)
        })
        .unwrap();

        let w = which.clone();
        let err = mgr
            .register("cmd", move |_, _| {
                w.set("second");
                Box::new(Noop)
            })
            .unwrap_err();
        assert_eq!(err, CommandError::duplicate("cmd"));

        mgr.execute("cmd", args![]).unwrap();
        assert_eq!(which.get(), "first");
    }

    #[test]
    fn factory_receives_manager_and_name() {
        let mgr = CommandManager::new();
        let seen = Rc::new(RefCell::new(None));
        let s = seen.clone();
        let expected = mgr.clone();
        mgr.register("named", move |m, name| {
            *s.borrow_mut() = Some((m.ptr_eq(&expected), name.to_string()));
            Box::new(Noop)
        })
        .unwrap();

        mgr.execute("named", args![]).unwrap();
        assert_eq!(*seen.borrow(), Some((true, "named".to_string())));
    }

    #[test]
    fn receive_without_current_is_reported() {
        let mgr = CommandManager::new();
        assert_eq!(
            mgr.receive("ping", &json!(null)),
            Err(CommandError::NoActiveCommand)
        );
        assert_eq!(silent().receive("ping", &json!(null)), Ok(false));
    }

    #[test]
    fn manual_command_stays_current_until_committed() {
        let mgr = CommandManager::new();
        mgr.register_default::<Manual>("manual").unwrap();

        mgr.execute("manual", args![1]).unwrap();
        let current = mgr.current().expect("manual command is current");
        assert_eq!(current.name(), "manual");
        assert_eq!(current.args(), args![1]);

        assert_eq!(mgr.receive("noise", &json!({})), Ok(false));
        assert!(mgr.current().is_some());

        assert_eq!(mgr.receive("done", &json!({})), Ok(true));
        assert!(mgr.current().is_none());
        assert!(current.is_terminated());
    }

    #[test]
    fn second_execute_while_busy_is_rejected() {
        let mgr = CommandManager::new();
        mgr.register_default::<Manual>("manual").unwrap();
        mgr.register_default::<Noop>("noop").unwrap();

        mgr.execute("manual", args![]).unwrap();
        let first = mgr.current().unwrap();

        assert_eq!(
            mgr.execute("noop", args![]),
            Err(CommandError::busy("noop", "manual"))
        );
        assert_eq!(mgr.current(), Some(first));
    }

    #[test]
    fn double_commit_is_invalid_state() {
        let mgr = CommandManager::new();
        mgr.register_default::<Noop>("noop").unwrap();
        mgr.execute("noop", args![]).unwrap();

        let cmd = mgr.transactions().peek_undo().unwrap();
        assert!(matches!(cmd.commit(), Err(CommandError::InvalidState(_))));
        assert!(matches!(cmd.cancel(), Err(CommandError::InvalidState(_))));
    }

    #[test]
    fn terminating_a_non_current_command_still_runs_hooks() {
        let mgr = CommandManager::new();
        mgr.register_default::<Manual>("manual").unwrap();
        mgr.execute("manual", args![]).unwrap();
        let active = mgr.current().unwrap();

        let detached = CommandHandle::new(
            "manual",
            Box::new(Manual),
            Rc::downgrade(&mgr.shared),
            mgr.shared.reporter.clone(),
        );
        detached.run_execute(args![]);
        assert_eq!(detached.state(), CommandState::Running);

        let fired = Rc::new(Cell::new(0));
        let f = fired.clone();
        mgr.cmd_terminated().on(move |_: &CommandHandle| f.set(f.get() + 1));

        let result = mgr.terminate(&detached, TerminateAction::Cancel);
        assert!(matches!(result, Err(CommandError::InvalidState(_))));
        assert_eq!(fired.get(), 1);
        assert_eq!(detached.state(), CommandState::Cancelled);
        assert_eq!(mgr.current(), Some(active));
    }

    /// Records every terminal hook it sees.
    struct Traced {
        trace: Rc<RefCell<Vec<&'static str>>>,
    }

    impl Command for Traced {
        fn on_execute(&self, _cmd: &CommandHandle, _args: &[Value]) -> Execution {
            Execution::Done
        }

        fn on_complete(&self, _cmd: &CommandHandle) {
            self.trace.borrow_mut().push("complete");
        }

        fn on_cancel(&self, _cmd: &CommandHandle) {
            self.trace.borrow_mut().push("cancel");
        }

        fn on_cleanup(&self, _cmd: &CommandHandle) {
            self.trace.borrow_mut().push("cleanup");
        }
    }

    #[test]
    fn terminated_command_cannot_be_terminated_again() {
        let quiet = silent();
        let trace = Rc::new(RefCell::new(Vec::new()));
        let t = trace.clone();
        quiet
            .register("traced", move |_, _| Box::new(Traced { trace: t.clone() }))
            .unwrap();
        quiet.execute("traced", args![]).unwrap();
        let cmd = quiet.transactions().peek_undo().unwrap();

        let fired = Rc::new(Cell::new(0));
        let f = fired.clone();
        quiet
            .cmd_terminated()
            .on(move |_: &CommandHandle| f.set(f.get() + 1));

        assert_eq!(quiet.terminate(&cmd, TerminateAction::Cancel), Ok(()));
        assert_eq!(*trace.borrow(), vec!["complete", "cleanup"]);
        assert_eq!(cmd.state(), CommandState::Committed);
        assert_eq!(fired.get(), 0);

        let strict = CommandManager::new();
        let t = trace.clone();
        strict
            .register("traced", move |_, _| Box::new(Traced { trace: t.clone() }))
            .unwrap();
        strict.execute("traced", args![]).unwrap();
        let cmd = strict.transactions().peek_undo().unwrap();
        assert!(matches!(
            strict.terminate(&cmd, TerminateAction::Commit),
            Err(CommandError::InvalidState(_))
        ));
        assert_eq!(trace.borrow().len(), 4);
    }

    #[test]
    fn write_log_and_level_pass_through() {
        let mgr = CommandManager::new();
        mgr.set_log_level(LogLevel::Simple);
        mgr.write_log(LogType::Warn, "careful", "test");
        assert!(mgr.read_log().is_empty());

        mgr.set_log_level(LogLevel::Normal);
        assert_eq!(mgr.read_log().len(), 1);
        assert_eq!(mgr.log_level(), LogLevel::Normal.mask());
    }

    #[test]
    fn dispose_resets_everything() {
        let mgr = CommandManager::new();
        mgr.register_default::<Manual>("manual").unwrap();
        mgr.cmd_started().on(|_: &CommandHandle| {});
        mgr.cmd_terminated().on(|_: &CommandHandle| {});
        mgr.write_log(LogType::Error, "boom", "test");
        mgr.execute("manual", args![]).unwrap();

        mgr.dispose();
        assert!(!mgr.has_registered("manual"));
        assert!(mgr.current().is_none());
        assert!(mgr.read_log().is_empty());
        assert!(!mgr.can_undo());
        assert!(mgr.cmd_started().is_empty());
        assert!(mgr.cmd_terminated().is_empty());

        mgr.dispose();
    }

    #[test]
    fn instance_is_shared_per_thread() {
        let a = CommandManager::instance();
        let b = CommandManager::instance();
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&CommandManager::new()));
    }

    #[test]
    fn weak_handle_does_not_keep_manager_alive() {
        let mgr = CommandManager::new();
        let weak = mgr.downgrade();
        assert!(weak.upgrade().is_some());
        drop(mgr);
        assert!(weak.upgrade().is_none());
    }
}

//! `retrace-engine` — undoable commands on top of `retrace-core` and
//! `retrace-events`.
//!
//! - [`CommandManager`]: registry, execution lifecycle, lifecycle signals
//! - [`TransactionManager`]: undo/redo stacks and the filtered transaction log
//! - [`Command`] / [`CommandHandle`]: user hooks and the per-execution handle
//!
//! Everything here is single-threaded (`Rc`-based). Commands with async hooks
//! need a running `tokio::task::LocalSet`.

pub mod command;
pub mod manager;
pub mod transaction;

pub use command::{Args, Command, CommandHandle, CommandState, Execution, TerminateAction};
pub use manager::{CommandFactory, CommandManager, WeakCommandManager};
pub use transaction::{LogFormatter, TransactionManager, TransactionOptions, default_formatter};

pub use retrace_core::{
    CommandError, CommandId, CommandResult, ErrorPolicy, LogLevel, LogMask, LogRecord, LogType,
    ManagerConfig, Reporter, TracingReporter,
};
pub use retrace_events::{OnceFlow, Signal};

pub use serde_json;

/// Build an [`Args`] vector from serializable values.
///
/// ```
/// use retrace_engine::{args, serde_json::json};
///
/// let args = args![1, "two", json!({ "three": 3 })];
/// assert_eq!(args.len(), 3);
/// ```
#[macro_export]
macro_rules! args {
    () => {
        $crate::Args::new()
    };
    ($($value:expr),+ $(,)?) => {
        vec![$($crate::serde_json::json!($value)),+]
    };
}

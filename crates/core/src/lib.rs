//! `retrace-core` — building blocks shared by the command engine.
//!
//! This crate has no notion of commands being executed; it only provides the
//! data types the engine records and the collaborators it reports through.

pub mod config;
pub mod error;
pub mod history;
pub mod id;
pub mod log;
pub mod report;

pub use config::{ConfigError, ManagerConfig};
pub use error::{CommandError, CommandResult};
pub use history::{DEFAULT_STACK_LIMIT, HistoryStack};
pub use id::CommandId;
pub use log::{LogLevel, LogMask, LogRecord, LogType};
pub use report::{ErrorPolicy, Reporter, TracingReporter};

//! Process-wide tracing setup for applications embedding the command engine.
//!
//! The engine itself only emits `tracing` events; installing a subscriber is
//! left to the binary (or test) that hosts it.

pub mod tracing;

pub use crate::tracing::{ENV_LOG_FORMAT, LogFormat, init, init_for_tests, init_with};

//! In-process lifecycle events.
//!
//! [`Signal`] is a typed, multi-listener publish/subscribe channel. It is
//! single-threaded: listeners run on the dispatching thread, in registration
//! order, and async listeners are spawned onto the current `LocalSet`.

pub mod signal;

pub use signal::{Listener, ListenerHandle, LocalFuture, OnceFlow, Signal};

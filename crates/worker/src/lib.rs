//! Execution primitives shared by the verity tooling servers.
//!
//! This crate provides the pieces the RPC endpoint schedules deferred work
//! with:
//! * [`WorkerPool`]: a semaphore-bounded pool limiting concurrent handlers.
//! * [`CancelToken`]: cooperative cancellation threaded into every deferred
//!   handler.
//! * [`watchdog`]: slow-task diagnostics that never interrupt the task.

#![warn(missing_docs)]

mod pool;
mod token;
pub mod watchdog;

pub use pool::{WorkerPool, default_pool_size};
pub use token::CancelToken;

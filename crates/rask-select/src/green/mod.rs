// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Green task executor.
//!
//! Stackless tasks polled by a fixed pool of worker threads. Each task gets
//! its own [`RuntimeContext`](crate::RuntimeContext), so cancelling the task
//! cancels every select it is suspended in.
//!
//! Components:
//! - `task`      — RawTask, lifecycle state machine, waker
//! - `scheduler` — worker threads, injection queue, spawn
//! - `handle`    — GreenTaskHandle (join/detach/cancel)

pub mod handle;
pub mod scheduler;
pub mod task;

use thiserror::Error;

pub use handle::GreenTaskHandle;
pub use scheduler::Scheduler;
pub use task::TaskState;

/// Why a task produced no value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    /// Task panicked with the given message.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// Task was cancelled before it started.
    #[error("task was cancelled")]
    Cancelled,
}

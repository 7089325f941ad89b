// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Green task representation.
//!
//! A task is a boxed `()` future plus an atomic lifecycle state. The typed
//! result travels through a separate [`ResultSlot`] owned by the handle.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Wake, Waker};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use super::scheduler::Shared;
use super::JoinError;

/// Task lifecycle states.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Queued, waiting to be polled.
    Ready = 0,
    /// Being polled by a worker.
    Running = 1,
    /// Woken while running; the worker requeues it after the poll.
    Notified = 2,
    /// Parked until its waker fires.
    Waiting = 3,
    /// Finished (result stored).
    Complete = 4,
}

impl TaskState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Ready,
            1 => Self::Running,
            2 => Self::Notified,
            3 => Self::Waiting,
            _ => Self::Complete,
        }
    }
}

pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// The task object shared by the scheduler queue, wakers and the handle.
pub(crate) struct RawTask {
    pub id: u64,
    state: AtomicU8,
    future: Mutex<Option<BoxFuture>>,
    done: Mutex<bool>,
    done_cv: Condvar,
    scheduler: Weak<Shared>,
}

impl fmt::Debug for RawTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawTask")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl RawTask {
    pub fn new(id: u64, future: BoxFuture, scheduler: Weak<Shared>) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: AtomicU8::new(TaskState::Ready as u8),
            future: Mutex::new(Some(future)),
            done: Mutex::new(false),
            done_cv: Condvar::new(),
            scheduler,
        })
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn cas(&self, from: TaskState, to: TaskState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Ready -> Running. False if the task is not runnable.
    pub fn begin_run(&self) -> bool {
        self.cas(TaskState::Ready, TaskState::Running)
    }

    /// Poll the future once. Returns true if the task completed.
    pub fn poll(self: &Arc<Self>) -> bool {
        let waker = Waker::from(self.clone());
        let mut cx = Context::from_waker(&waker);

        let mut slot = self.future.lock();
        let Some(future) = slot.as_mut() else {
            return true;
        };
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                *slot = None;
                true
            }
            Poll::Pending => false,
        }
    }

    /// After a pending poll: Running -> Waiting. A wake that landed during
    /// the poll left the task Notified; it goes back to Ready and the
    /// caller must requeue it.
    pub fn park(&self) -> bool {
        if self.cas(TaskState::Running, TaskState::Waiting) {
            return false;
        }
        self.state.store(TaskState::Ready as u8, Ordering::Release);
        true
    }

    /// Mark complete and release every thread blocked in `wait_complete`.
    pub fn mark_complete(&self) {
        self.state.store(TaskState::Complete as u8, Ordering::Release);
        let mut done = self.done.lock();
        *done = true;
        self.done_cv.notify_all();
    }

    pub fn wait_complete(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.done_cv.wait(&mut done);
        }
    }
}

impl Wake for RawTask {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        loop {
            match self.state() {
                TaskState::Waiting => {
                    if self.cas(TaskState::Waiting, TaskState::Ready) {
                        trace!(task = self.id, "task woken");
                        if let Some(shared) = self.scheduler.upgrade() {
                            shared.inject(self.clone());
                        }
                        return;
                    }
                }
                TaskState::Running => {
                    if self.cas(TaskState::Running, TaskState::Notified) {
                        return;
                    }
                }
                TaskState::Ready | TaskState::Notified | TaskState::Complete => return,
            }
        }
    }
}

/// Typed result slot shared between the spawned future and the handle.
pub(crate) struct ResultSlot<T> {
    inner: Mutex<Option<Result<T, JoinError>>>,
}

impl<T> ResultSlot<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    pub fn set(&self, result: Result<T, JoinError>) {
        *self.inner.lock() = Some(result);
    }

    pub fn take(&self) -> Option<Result<T, JoinError>> {
        self.inner.lock().take()
    }
}

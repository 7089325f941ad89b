// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Handle to a spawned green task.

use std::fmt;
use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::context::RuntimeContext;
use crate::deferred::{Deferred, OnJoin};
use crate::select::select;

use super::task::{RawTask, ResultSlot, TaskState};
use super::JoinError;

/// Handle to a green task.
///
/// Dropping the handle detaches the task; it still runs to completion and
/// scheduler shutdown still waits for it.
pub struct GreenTaskHandle<T> {
    raw: Arc<RawTask>,
    result: Arc<ResultSlot<T>>,
    cancel: Arc<CancelToken>,
    done: Arc<Deferred<()>>,
}

impl<T: Send + 'static> GreenTaskHandle<T> {
    pub(crate) fn new(
        raw: Arc<RawTask>,
        result: Arc<ResultSlot<T>>,
        cancel: Arc<CancelToken>,
        done: Arc<Deferred<()>>,
    ) -> Self {
        Self {
            raw,
            result,
            cancel,
            done,
        }
    }

    pub fn id(&self) -> u64 {
        self.raw.id
    }

    /// Wait for the task to complete, returning its result.
    ///
    /// Blocks the calling OS thread. Inside a green task use
    /// [`join_async`](Self::join_async) or select on
    /// [`on_complete`](Self::on_complete) instead.
    pub fn join(self) -> Result<T, JoinError> {
        self.raw.wait_complete();
        self.take_result()
    }

    /// Fire-and-forget.
    pub fn detach(self) {}

    /// Request cooperative cancellation, then wait for exit.
    ///
    /// Selects running under the task's context resolve to
    /// [`SelectError::Cancelled`](crate::SelectError::Cancelled); what the
    /// task returns after that is up to the task.
    pub fn cancel(self) -> Result<T, JoinError> {
        self.cancel.cancel();
        self.join()
    }

    /// Check if the task has completed (non-blocking).
    pub fn is_complete(&self) -> bool {
        self.raw.state() == TaskState::Complete
    }

    /// Zero clause that fires once the task has finished.
    pub fn on_complete(&self) -> OnJoin<'_, ()> {
        self.done.on_join()
    }

    /// Join from inside another task without blocking its worker.
    ///
    /// If `ctx` is cancelled first this returns [`JoinError::Cancelled`]
    /// and the joined task keeps running detached.
    pub async fn join_async(self, ctx: &RuntimeContext) -> Result<T, JoinError> {
        let joined = select(ctx, |s| {
            s.on_ready(self.done.on_join(), || ());
            Ok(())
        })
        .await;
        match joined {
            Ok(()) => self.take_result(),
            Err(_) => Err(JoinError::Cancelled),
        }
    }

    fn take_result(&self) -> Result<T, JoinError> {
        self.result.take().unwrap_or_else(|| {
            Err(JoinError::Panicked(
                "task completed without producing a result".to_string(),
            ))
        })
    }
}

impl<T> fmt::Debug for GreenTaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GreenTaskHandle")
            .field("task", &self.raw)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::bounded;
    use crate::config::SchedulerConfig;
    use crate::error::SelectError;
    use crate::green::Scheduler;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn make_scheduler() -> Arc<Scheduler> {
        Arc::new(Scheduler::new(SchedulerConfig::default().with_workers(2)))
    }

    #[test]
    fn green_spawn_and_join() {
        let sched = make_scheduler();
        let h = sched.spawn(|_| async { 42 });
        assert_eq!(h.join().unwrap(), 42);
        sched.shutdown();
    }

    #[test]
    fn green_spawn_and_detach() {
        let sched = make_scheduler();
        let counter = Arc::new(AtomicI32::new(0));
        let c = counter.clone();
        let h = sched.spawn(move |_| async move {
            c.fetch_add(1, Ordering::Relaxed);
        });
        h.detach();
        sched.shutdown();
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn green_spawn_panic_returns_join_error() {
        let sched = make_scheduler();
        fn boom() -> i32 {
            panic!("boom")
        }
        let h = sched.spawn(|_| async { boom() });
        match h.join() {
            Err(JoinError::Panicked(msg)) => assert!(msg.contains("boom")),
            other => panic!("expected Panicked, got {:?}", other),
        }
        sched.shutdown();
    }

    #[test]
    fn green_spawn_many_tasks() {
        let sched = make_scheduler();
        let counter = Arc::new(AtomicI32::new(0));
        let mut handles = Vec::new();

        for _ in 0..100 {
            let c = counter.clone();
            handles.push(sched.spawn(move |_| async move {
                c.fetch_add(1, Ordering::Relaxed);
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(counter.load(Ordering::Relaxed), 100);
        sched.shutdown();
    }

    #[test]
    fn cancel_resolves_pending_select() {
        let sched = make_scheduler();
        let (_tx, rx) = bounded::<u32>(1);
        let started = Arc::new(Deferred::new());
        let h = {
            let started = started.clone();
            sched.spawn(move |ctx| async move {
                started.complete(());
                match rx.recv(&ctx).await {
                    Err(SelectError::Cancelled) => "cancelled",
                    _ => "received",
                }
            })
        };
        futures::executor::block_on(select(&RuntimeContext::new(), |s| {
            s.on_ready(started.on_join(), || ());
            Ok(())
        }))
        .unwrap();
        assert_eq!(h.cancel().unwrap(), "cancelled");
        sched.shutdown();
    }

    #[test]
    fn join_async_from_another_task() {
        let sched = make_scheduler();
        let inner = sched.spawn(|_| async { 7 });
        let outer =
            sched.spawn(move |ctx| async move { inner.join_async(&ctx).await.map(|v| v * 6) });
        assert_eq!(outer.join().unwrap(), Ok(42));
        sched.shutdown();
    }

    #[test]
    fn spawn_after_shutdown_never_runs() {
        let sched = make_scheduler();
        sched.shutdown();
        let h = sched.spawn(|_| async { 1 });
        assert!(h.is_complete());
        assert_eq!(h.join(), Err(JoinError::Cancelled));
    }
}

// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Worker-pool scheduler for green tasks.
//!
//! N worker threads share one injection queue. Idle workers sleep on a
//! condvar; wakers push their task back onto the queue and notify one.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use futures::FutureExt;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use super::handle::GreenTaskHandle;
use super::task::{RawTask, ResultSlot};
use super::JoinError;
use crate::cancel::CancelToken;
use crate::config::{ConfigError, SchedulerConfig};
use crate::context::RuntimeContext;
use crate::deferred::Deferred;

/// Green task scheduler.
///
/// Owns the worker threads. Shutdown (explicit or on drop) waits for
/// every spawned task to finish, then stops the workers.
pub struct Scheduler {
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    shared: Arc<Shared>,
    config: SchedulerConfig,
}

/// State shared between workers, wakers and spawners.
pub(crate) struct Shared {
    queue: Mutex<VecDeque<Arc<RawTask>>>,
    work_available: Condvar,
    /// Spawned tasks that have not completed yet.
    active_tasks: Mutex<usize>,
    all_done: Condvar,
    shutdown: AtomicBool,
    next_task_id: AtomicU64,
}

impl Shared {
    pub(crate) fn inject(&self, task: Arc<RawTask>) {
        self.queue.lock().push_back(task);
        self.work_available.notify_one();
    }

    fn task_finished(&self) {
        let mut active = self.active_tasks.lock();
        *active -= 1;
        if *active == 0 {
            self.all_done.notify_all();
        }
    }
}

impl Scheduler {
    /// Start `config.workers` worker threads.
    pub fn new(config: SchedulerConfig) -> Self {
        let worker_count = config.workers.max(1);
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            work_available: Condvar::new(),
            active_tasks: Mutex::new(0),
            all_done: Condvar::new(),
            shutdown: AtomicBool::new(false),
            next_task_id: AtomicU64::new(1),
        });

        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let shared = shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name, id))
                .spawn(move || worker_loop(&shared));
            match spawned {
                Ok(handle) => workers.push(handle),
                // Keep whatever started; a pool of zero threads would hang.
                Err(err) if !workers.is_empty() => {
                    warn!(worker = id, error = %err, "failed to spawn worker thread");
                    break;
                }
                Err(err) => panic!("failed to spawn any worker thread: {err}"),
            }
        }
        debug!(workers = workers.len(), name = %config.thread_name, "scheduler started");

        Self {
            workers: Mutex::new(workers),
            shared,
            config,
        }
    }

    /// Scheduler configured from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::new(SchedulerConfig::from_env()?))
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Spawn a green task.
    ///
    /// `f` receives the task's own [`RuntimeContext`]; selects built with it
    /// are cancelled by [`GreenTaskHandle::cancel`].
    pub fn spawn<T, F, Fut>(&self, f: F) -> GreenTaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(RuntimeContext) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let id = self.shared.next_task_id.fetch_add(1, Ordering::Relaxed);
        let cancel = Arc::new(CancelToken::new());
        let context = RuntimeContext::green(cancel.clone()).with_label(format!("task-{id}"));
        let result = Arc::new(ResultSlot::new());
        let done = Arc::new(Deferred::new());
        let body = f(context);

        let future = {
            let cancel = cancel.clone();
            let result = result.clone();
            let done = done.clone();
            async move {
                let outcome = if cancel.is_cancelled() {
                    Err(JoinError::Cancelled)
                } else {
                    match AssertUnwindSafe(body).catch_unwind().await {
                        Ok(value) => Ok(value),
                        Err(payload) => {
                            let msg = panic_message(payload.as_ref());
                            warn!(task = id, panic = %msg, "green task panicked");
                            Err(JoinError::Panicked(msg))
                        }
                    }
                };
                result.set(outcome);
                done.complete(());
            }
        };

        let raw = RawTask::new(id, Box::pin(future), Arc::downgrade(&self.shared));
        {
            // Checked under the same lock `shutdown` sets the flag with: a
            // task counted here holds shutdown until it completes.
            let mut active = self.shared.active_tasks.lock();
            if self.shared.shutdown.load(Ordering::Acquire) {
                drop(active);
                debug!(task = id, "spawn after shutdown, task never runs");
                result.set(Err(JoinError::Cancelled));
                raw.mark_complete();
                done.complete(());
                return GreenTaskHandle::new(raw, result, cancel, done);
            }
            *active += 1;
        }
        self.shared.inject(raw.clone());
        debug!(task = id, "task spawned");

        GreenTaskHandle::new(raw, result, cancel, done)
    }

    /// Number of spawned tasks that have not completed.
    pub fn active_tasks(&self) -> usize {
        *self.shared.active_tasks.lock()
    }

    /// Wait for all tasks, then stop and join the workers.
    pub fn shutdown(&self) {
        {
            let mut active = self.shared.active_tasks.lock();
            while *active > 0 {
                self.shared.all_done.wait(&mut active);
            }
            // Still under `active_tasks`, so no spawn slips in between the
            // drain and the flag. The queue lock keeps workers from missing
            // it between their empty check and their wait.
            let _queue = self.shared.queue.lock();
            self.shared.shutdown.store(true, Ordering::Release);
            self.shared.work_available.notify_all();
        }

        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
        debug!("scheduler shut down");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if !self.shared.shutdown.load(Ordering::Acquire) {
            self.shutdown();
        }
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let task = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(task) = queue.pop_front() {
                    break Some(task);
                }
                if shared.shutdown.load(Ordering::Acquire) {
                    break None;
                }
                shared.work_available.wait(&mut queue);
            }
        };
        match task {
            Some(task) => run_task(task, shared),
            None => return,
        }
    }
}

/// Poll a single task once and route it by outcome.
fn run_task(task: Arc<RawTask>, shared: &Shared) {
    if !task.begin_run() {
        return;
    }
    if task.poll() {
        task.mark_complete();
        shared.task_finished();
    } else if task.park() {
        shared.inject(task);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

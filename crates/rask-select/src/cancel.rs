// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Cooperative cancellation.
//!
//! AtomicBool flag plus a listener list. A suspended select parks a
//! listener here so cancelling the enclosing computation can reach it
//! without polling.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

type Listener = Box<dyn FnOnce() + Send>;

/// Identifies a listener registered with [`CancelToken::on_cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Cancellation token shared between a computation and whoever may cancel it.
pub struct CancelToken {
    flag: AtomicBool,
    next_listener: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
            next_listener: AtomicU64::new(0),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Set the cancellation flag and run every pending listener once.
    ///
    /// Listeners run on the cancelling thread, outside the listener lock.
    pub fn cancel(&self) {
        if self.flag.swap(true, Ordering::AcqRel) {
            return;
        }
        let listeners = std::mem::take(&mut *self.listeners.lock());
        tracing::debug!(listeners = listeners.len(), "cancel token fired");
        for (_, listener) in listeners {
            listener();
        }
    }

    /// Check if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Run `f` when the token is cancelled.
    ///
    /// If the token is already cancelled `f` runs immediately on the calling
    /// thread and `None` is returned.
    pub fn on_cancel<F>(&self, f: F) -> Option<ListenerId>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut listeners = self.listeners.lock();
        // Checked under the lock: `cancel` sets the flag before draining.
        if self.is_cancelled() {
            drop(listeners);
            f();
            return None;
        }
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        listeners.push((id, Box::new(f)));
        Some(id)
    }

    /// Drop a listener that has not fired. Unknown ids are ignored.
    pub fn remove_listener(&self, id: ListenerId) {
        self.listeners.lock().retain(|(lid, _)| *lid != id);
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

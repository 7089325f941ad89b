// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Single-assignment value that selects can wait on.
//!
//! `on_await` yields a clone of the value (One clause); `on_join` only
//! reports completion (Zero clause).

use parking_lot::Mutex;
use tracing::trace;

use crate::clause::{ClauseProvider, Counterpart, RegistrationHandle};

enum Waiter<T> {
    Await(Counterpart<T>),
    Join(Counterpart<()>),
}

struct DeferredState<T> {
    value: Option<T>,
    waiters: Vec<(RegistrationHandle, Waiter<T>)>,
    next_handle: u64,
}

impl<T> DeferredState<T> {
    fn next_handle(&mut self) -> RegistrationHandle {
        self.next_handle += 1;
        RegistrationHandle::new(self.next_handle)
    }
}

/// A value that is set at most once.
pub struct Deferred<T> {
    inner: Mutex<DeferredState<T>>,
}

impl<T: Clone + Send> Deferred<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(DeferredState {
                value: None,
                waiters: Vec::new(),
                next_handle: 0,
            }),
        }
    }

    /// Set the value and offer it to every parked clause.
    ///
    /// Returns false if the value was already set.
    pub fn complete(&self, value: T) -> bool {
        let mut state = self.inner.lock();
        if state.value.is_some() {
            return false;
        }
        let waiters = std::mem::take(&mut state.waiters);
        trace!(waiters = waiters.len(), "deferred completed");
        for (_, waiter) in waiters {
            // A lost offer reserved nothing, so there is nothing to undo.
            match waiter {
                Waiter::Await(cp) => {
                    let _ = cp.offer(value.clone());
                }
                Waiter::Join(cp) => {
                    let _ = cp.offer(());
                }
            }
        }
        state.value = Some(value);
        true
    }

    pub fn get(&self) -> Option<T> {
        self.inner.lock().value.clone()
    }

    pub fn is_completed(&self) -> bool {
        self.inner.lock().value.is_some()
    }

    /// Clause yielding a clone of the value.
    pub fn on_await(&self) -> OnAwait<'_, T> {
        OnAwait { deferred: self }
    }

    /// Clause firing once the value is set.
    pub fn on_join(&self) -> OnJoin<'_, T> {
        OnJoin { deferred: self }
    }

    /// Number of clauses currently parked on this value.
    pub fn waiting(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    fn unregister(&self, handle: RegistrationHandle) {
        self.inner.lock().waiters.retain(|(h, _)| *h != handle);
    }
}

impl<T: Clone + Send> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// One clause over a [`Deferred`].
pub struct OnAwait<'d, T> {
    deferred: &'d Deferred<T>,
}

impl<T: Clone + Send> ClauseProvider for OnAwait<'_, T> {
    type Param = ();
    type Output = T;

    fn register(&self, counterpart: Counterpart<T>, _: ()) -> RegistrationHandle {
        let mut state = self.deferred.inner.lock();
        let handle = state.next_handle();
        if let Some(value) = state.value.clone() {
            let _ = counterpart.offer(value);
        } else {
            state.waiters.push((handle, Waiter::Await(counterpart)));
        }
        handle
    }

    fn unregister(&self, handle: RegistrationHandle) {
        self.deferred.unregister(handle);
    }
}

/// Zero clause over a [`Deferred`].
pub struct OnJoin<'d, T> {
    deferred: &'d Deferred<T>,
}

impl<T: Clone + Send> ClauseProvider for OnJoin<'_, T> {
    type Param = ();
    type Output = ();

    fn register(&self, counterpart: Counterpart<()>, _: ()) -> RegistrationHandle {
        let mut state = self.deferred.inner.lock();
        let handle = state.next_handle();
        if state.value.is_some() {
            let _ = counterpart.offer(());
        } else {
            state.waiters.push((handle, Waiter::Join(counterpart)));
        }
        handle
    }

    fn unregister(&self, handle: RegistrationHandle) {
        self.deferred.unregister(handle);
    }
}

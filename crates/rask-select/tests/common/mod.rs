// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::task::{Context, Poll};

use futures::task::noop_waker;
use parking_lot::Mutex;
use rask_select::{ClauseProvider, Counterpart, RegistrationHandle};

/// Install a test-writer subscriber once. `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll a future once with a no-op waker.
pub fn poll_once<F: Future + Unpin>(fut: &mut F) -> Poll<F::Output> {
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    Pin::new(fut).poll(&mut cx)
}

/// Test provider that parks every counterpart it receives.
///
/// A gate built with [`Gate::ready`] offers its value during registration.
/// Counts registrations and unregistrations of live handles.
#[derive(Default)]
pub struct Gate {
    ready: Option<u64>,
    parked: Mutex<Vec<(RegistrationHandle, Counterpart<u64>)>>,
    next_handle: AtomicU64,
    registered: AtomicUsize,
    unregistered: AtomicUsize,
}

impl Gate {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn ready(value: u64) -> Self {
        Self {
            ready: Some(value),
            ..Self::default()
        }
    }

    pub fn registered(&self) -> usize {
        self.registered.load(Ordering::SeqCst)
    }

    pub fn unregistered(&self) -> usize {
        self.unregistered.load(Ordering::SeqCst)
    }

    pub fn parked(&self) -> usize {
        self.parked.lock().len()
    }

    /// Counterparts currently parked, oldest first.
    pub fn counterparts(&self) -> Vec<Counterpart<u64>> {
        self.parked.lock().iter().map(|(_, cp)| cp.clone()).collect()
    }

    /// Offer `value` to every parked counterpart. True if one accepted.
    pub fn fire(&self, value: u64) -> bool {
        let parked = self.counterparts();
        parked.iter().any(|cp| cp.offer(value).is_ok())
    }
}

impl ClauseProvider for Gate {
    type Param = ();
    type Output = u64;

    fn register(&self, counterpart: Counterpart<u64>, _: ()) -> RegistrationHandle {
        self.registered.fetch_add(1, Ordering::SeqCst);
        let handle = RegistrationHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst));
        if let Some(value) = self.ready {
            if counterpart.offer(value).is_ok() {
                return handle;
            }
        }
        self.parked.lock().push((handle, counterpart));
        handle
    }

    fn unregister(&self, handle: RegistrationHandle) {
        let mut parked = self.parked.lock();
        let before = parked.len();
        parked.retain(|(h, _)| *h != handle);
        if parked.len() < before {
            self.unregistered.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Chi-squared statistic of `observed` against a uniform expectation.
pub fn chi_squared(observed: &[usize]) -> f64 {
    let total: usize = observed.iter().sum();
    let expected = total as f64 / observed.len() as f64;
    observed
        .iter()
        .map(|&o| {
            let d = o as f64 - expected;
            d * d / expected
        })
        .sum()
}

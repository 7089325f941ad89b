// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime context handed to every select invocation.
//!
//! Nothing is read from ambient or thread-local state: a select learns
//! how it can be cancelled and where its shuffle randomness comes from
//! through the context it was constructed with.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::cancel::CancelToken;

/// How the computation owning this context is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextMode {
    /// Polled on the caller's own thread (e.g. `block_on`).
    Blocking,
    /// Polled by a green-task worker.
    Green,
}

#[derive(Clone)]
enum ShuffleSource {
    Thread,
    Seeded(Arc<Mutex<StdRng>>),
}

/// Execution-context handle for one computation.
///
/// Cheap to clone; clones share the cancel token and the shuffle source.
#[derive(Clone)]
pub struct RuntimeContext {
    mode: ContextMode,
    cancel: Arc<CancelToken>,
    shuffle: ShuffleSource,
    label: Option<Arc<str>>,
}

impl RuntimeContext {
    /// A blocking context with a fresh cancel token.
    pub fn new() -> Self {
        Self::with_cancel_token(Arc::new(CancelToken::new()))
    }

    /// A blocking context observing an existing cancel token.
    pub fn with_cancel_token(cancel: Arc<CancelToken>) -> Self {
        Self {
            mode: ContextMode::Blocking,
            cancel,
            shuffle: ShuffleSource::Thread,
            label: None,
        }
    }

    pub(crate) fn green(cancel: Arc<CancelToken>) -> Self {
        Self {
            mode: ContextMode::Green,
            ..Self::with_cancel_token(cancel)
        }
    }

    /// Make unbiased selects under this context shuffle deterministically.
    pub fn with_shuffle_seed(mut self, seed: u64) -> Self {
        self.shuffle = ShuffleSource::Seeded(Arc::new(Mutex::new(StdRng::seed_from_u64(seed))));
        self
    }

    /// Attach a label that shows up in trace output.
    pub fn with_label(mut self, label: impl Into<Arc<str>>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn mode(&self) -> ContextMode {
        self.mode
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn cancel_token(&self) -> &Arc<CancelToken> {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel the computation this context belongs to.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Uniformly permute `items`.
    pub(crate) fn shuffle<T>(&self, items: &mut [T]) {
        match &self.shuffle {
            ShuffleSource::Thread => items.shuffle(&mut rand::thread_rng()),
            ShuffleSource::Seeded(rng) => items.shuffle(&mut *rng.lock()),
        }
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("mode", &self.mode)
            .field("label", &self.label)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Select failure taxonomy.
//!
//! Losing an offer is not an error (see [`crate::clause::Rejected`]); only
//! the outcomes a selecting computation can observe live here.

use thiserror::Error;

/// Boxed error produced by a select builder closure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why a select finished without a clause result.
#[derive(Debug, Error)]
pub enum SelectError {
    /// The builder added no clauses; nothing could ever complete.
    #[error("select has no clauses")]
    NoClauses,

    /// The enclosing computation was cancelled before any clause won.
    #[error("select was cancelled")]
    Cancelled,

    /// The builder failed. Clauses it registered before failing were
    /// unregistered first.
    #[error("select builder failed: {0}")]
    Builder(#[source] BoxError),

    /// The select future was polled again after it produced its outcome.
    #[error("select polled after it already finished")]
    Finished,
}

impl SelectError {
    /// True for the distinguished cancellation outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SelectError::Cancelled)
    }
}

// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Rask select engine.
//!
//! Multi-way wait over heterogeneous rendezvous operations: a select
//! registers several clauses, suspends until exactly one completes, then
//! unregisters the rest and resumes with the winner's result.
//!
//! Components:
//! - select/unbiased — state machine, builder, `select`, `select_unbiased`
//! - legacy — `select_old`, `select_unbiased_old`
//! - clause/state — provider contract, counterpart, atomic state cell
//! - cancel/context — cancellation and the explicit execution context
//! - channel/deferred — select-aware providers
//! - green — worker-pool executor for green tasks

pub mod cancel;
pub mod channel;
pub mod clause;
pub mod config;
pub mod context;
pub mod deferred;
pub mod error;
pub mod green;
pub mod legacy;
pub mod select;
pub mod state;
pub mod unbiased;

pub use cancel::CancelToken;
pub use clause::{
    ClauseId, ClauseKind, ClauseProvider, Counterpart, RegistrationHandle, RejectReason, Rejected,
};
pub use config::SchedulerConfig;
pub use context::{ContextMode, RuntimeContext};
pub use error::{BoxError, SelectError};
pub use legacy::{select_old, select_unbiased_old, SelectOld};
pub use select::{select, Select, SelectBuilder};
pub use state::SelectState;
pub use unbiased::select_unbiased;

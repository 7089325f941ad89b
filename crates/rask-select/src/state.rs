// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Select lifecycle cell.
//!
//! One `AtomicUsize` per select invocation. Every transition is a CAS, so
//! the winner of a race is whoever's CAS lands first and everyone else
//! observes the new state and backs off.
//!
//! ```text
//! Registering ──> Waiting ──┐
//!      │                    ├──> Selected(i) ──> Completed
//!      └────────────────────┤
//!                           └──> Cancelled
//! ```

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::clause::ClauseId;

const REGISTERING: usize = 0;
const WAITING: usize = 1;
const COMPLETED: usize = 2;
const CANCELLED: usize = 3;
/// `Selected(i)` is encoded as `SELECTED_BASE + i`.
const SELECTED_BASE: usize = 4;

/// Observable state of one select invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectState {
    /// Clauses are being attached to their providers.
    Registering,
    /// All clauses registered; the selector is suspended.
    Waiting,
    /// A clause won and its result is being completed.
    Selected(ClauseId),
    /// Result committed and handed to the caller. Terminal.
    Completed,
    /// Cancelled before any clause completed. Terminal.
    Cancelled,
}

impl SelectState {
    fn encode(self) -> usize {
        match self {
            SelectState::Registering => REGISTERING,
            SelectState::Waiting => WAITING,
            SelectState::Completed => COMPLETED,
            SelectState::Cancelled => CANCELLED,
            SelectState::Selected(id) => SELECTED_BASE + id.index(),
        }
    }

    fn decode(raw: usize) -> Self {
        match raw {
            REGISTERING => SelectState::Registering,
            WAITING => SelectState::Waiting,
            COMPLETED => SelectState::Completed,
            CANCELLED => SelectState::Cancelled,
            n => SelectState::Selected(ClauseId::new(n - SELECTED_BASE)),
        }
    }

    /// Registering or Waiting: a clause may still win.
    pub fn is_open(self) -> bool {
        matches!(self, SelectState::Registering | SelectState::Waiting)
    }

    /// Completed or Cancelled.
    pub fn is_terminal(self) -> bool {
        matches!(self, SelectState::Completed | SelectState::Cancelled)
    }
}

impl fmt::Display for SelectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectState::Registering => write!(f, "registering"),
            SelectState::Waiting => write!(f, "waiting"),
            SelectState::Selected(id) => write!(f, "selected({})", id),
            SelectState::Completed => write!(f, "completed"),
            SelectState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The atomic cell. Failed transitions return the state that blocked them.
#[derive(Debug)]
pub(crate) struct StateCell {
    raw: AtomicUsize,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            raw: AtomicUsize::new(REGISTERING),
        }
    }

    pub fn load(&self) -> SelectState {
        SelectState::decode(self.raw.load(Ordering::Acquire))
    }

    /// Registering/Waiting -> Selected(id). The commit point of a rendezvous.
    pub fn try_select(&self, id: ClauseId) -> Result<(), SelectState> {
        self.leave_open(SelectState::Selected(id))
    }

    /// Registering/Waiting -> Cancelled.
    pub fn try_cancel(&self) -> Result<(), SelectState> {
        self.leave_open(SelectState::Cancelled)
    }

    /// Registering -> Waiting. Fails if a clause already won or the select
    /// was cancelled while clauses were being registered.
    pub fn begin_waiting(&self) -> Result<(), SelectState> {
        self.transition(SelectState::Registering, SelectState::Waiting)
    }

    /// Selected(id) -> Completed.
    pub fn complete(&self, id: ClauseId) -> Result<(), SelectState> {
        self.transition(SelectState::Selected(id), SelectState::Completed)
    }

    fn transition(&self, from: SelectState, to: SelectState) -> Result<(), SelectState> {
        self.raw
            .compare_exchange(from.encode(), to.encode(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(SelectState::decode)
    }

    fn leave_open(&self, to: SelectState) -> Result<(), SelectState> {
        let mut current = self.raw.load(Ordering::Acquire);
        loop {
            if !SelectState::decode(current).is_open() {
                return Err(SelectState::decode(current));
            }
            // Registering -> Waiting can race with us; retry from the fresh value.
            match self.raw.compare_exchange_weak(
                current,
                to.encode(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }
}

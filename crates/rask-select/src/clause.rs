// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Clauses and the provider contract.
//!
//! A provider (channel, deferred value, ...) implements [`ClauseProvider`].
//! When a select registers one of its clauses the provider receives a
//! [`Counterpart`], keeps it while it waits for readiness, and calls
//! [`Counterpart::offer`] once it can complete the rendezvous. The engine
//! calls [`ClauseProvider::unregister`] on every clause that did not win.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::trace;

use crate::select::SelectShared;
use crate::state::SelectState;

/// Capability of a clause: how many values flow through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClauseKind {
    /// No parameter, no result (e.g. "deferred finished").
    Zero,
    /// No parameter, one result (e.g. "receive from channel").
    One,
    /// A parameter in, a result out (e.g. "send this value").
    Two,
}

/// Position of a clause within one select invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClauseId(usize);

impl ClauseId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ClauseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Provider-issued token identifying one registration.
///
/// The engine hands it back verbatim to [`ClauseProvider::unregister`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationHandle(u64);

impl RegistrationHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// The clause factory side of the rendezvous.
///
/// `register` may call [`Counterpart::offer`] before returning when the
/// provider is already ready. `unregister` must tolerate handles that are
/// no longer registered: the provider may have dropped the entry after a
/// lost offer.
pub trait ClauseProvider: Send {
    /// Value supplied by the selecting side (`()` for Zero/One clauses).
    type Param: Send;
    /// Value delivered to the completion callback.
    type Output: Send;

    fn register(
        &self,
        counterpart: Counterpart<Self::Output>,
        param: Self::Param,
    ) -> RegistrationHandle;

    fn unregister(&self, handle: RegistrationHandle);

    /// An accepted offer whose select was discarded before it observed the
    /// result. The value comes back to the provider; the default drops it.
    fn on_undelivered(&self, handle: RegistrationHandle, value: Self::Output) {
        let _ = (handle, value);
    }
}

impl<P: ClauseProvider + Sync> ClauseProvider for &P {
    type Param = P::Param;
    type Output = P::Output;

    fn register(
        &self,
        counterpart: Counterpart<Self::Output>,
        param: Self::Param,
    ) -> RegistrationHandle {
        (**self).register(counterpart, param)
    }

    fn unregister(&self, handle: RegistrationHandle) {
        (**self).unregister(handle)
    }

    fn on_undelivered(&self, handle: RegistrationHandle, value: Self::Output) {
        (**self).on_undelivered(handle, value)
    }
}

/// Why an offer lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RejectReason {
    /// Another clause won, or the select was cancelled.
    #[error("select already left the open state ({0})")]
    StateChanged(SelectState),
    /// The select invocation no longer exists.
    #[error("select invocation is gone")]
    NoCounterpart,
}

/// A losing offer. Carries the offered value back so the provider can
/// undo whatever it reserved for this rendezvous.
#[derive(Debug)]
pub struct Rejected<Q> {
    reason: RejectReason,
    value: Q,
}

impl<Q> Rejected<Q> {
    pub fn reason(&self) -> RejectReason {
        self.reason
    }

    pub fn into_value(self) -> Q {
        self.value
    }
}

/// Provider-side handle to one clause of one select invocation.
///
/// Holds the select weakly: once the select is discarded, offers resolve
/// to [`RejectReason::NoCounterpart`].
pub struct Counterpart<Q> {
    select: Weak<SelectShared>,
    clause: ClauseId,
    slot: Arc<Mutex<Option<Q>>>,
}

impl<Q> Counterpart<Q> {
    pub fn clause(&self) -> ClauseId {
        self.clause
    }

    /// True while the select can still accept an offer for any clause.
    pub fn is_active(&self) -> bool {
        self.select
            .upgrade()
            .map(|select| select.state.load().is_open())
            .unwrap_or(false)
    }

    /// Try to complete the rendezvous with `value`.
    ///
    /// On success the value is published to the clause and the selector is
    /// woken. On failure nothing is published and the value comes back.
    pub fn offer(&self, value: Q) -> Result<(), Rejected<Q>> {
        let Some(select) = self.select.upgrade() else {
            return Err(Rejected {
                reason: RejectReason::NoCounterpart,
                value,
            });
        };
        // The slot is held across the CAS, so whoever sees `Selected` and
        // then locks the slot finds the value already published.
        let mut slot = self.slot.lock();
        if let Err(state) = select.state.try_select(self.clause) {
            trace!(select = select.id, clause = %self.clause, %state, "offer rejected");
            return Err(Rejected {
                reason: RejectReason::StateChanged(state),
                value,
            });
        }
        *slot = Some(value);
        drop(slot);
        trace!(select = select.id, clause = %self.clause, "offer accepted");
        select.waker.wake();
        Ok(())
    }
}

impl<Q> Clone for Counterpart<Q> {
    fn clone(&self) -> Self {
        Self {
            select: self.select.clone(),
            clause: self.clause,
            slot: self.slot.clone(),
        }
    }
}

impl<Q> fmt::Debug for Counterpart<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Counterpart")
            .field("clause", &self.clause)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Type-erased clause as stored by a select invocation.
pub(crate) trait SelectClause<R> {
    fn kind(&self) -> ClauseKind;

    /// Hand the clause to its provider. Registers at most once.
    fn register(&mut self, select: &Arc<SelectShared>, id: ClauseId);

    /// Send the loser signal. Returns false if there was nothing to undo.
    fn unregister(&mut self) -> bool;

    /// Whether a winning offer has been published for this clause.
    fn is_published(&self) -> bool;

    /// Take the published value and run the completion callback.
    fn complete(&mut self) -> Option<R>;

    /// Hand a published value that will never be observed back to its
    /// provider. Returns false if there was none.
    fn undeliver(&mut self) -> bool;
}

pub(crate) type BoxedClause<'a, R> = Box<dyn SelectClause<R> + Send + 'a>;

/// `{ capability, parameter, registration handle, completion callback }`.
pub(crate) struct Clause<C: ClauseProvider, F> {
    kind: ClauseKind,
    provider: C,
    param: Option<C::Param>,
    slot: Arc<Mutex<Option<C::Output>>>,
    handle: Option<RegistrationHandle>,
    on_completion: Option<F>,
}

impl<C: ClauseProvider, F> Clause<C, F> {
    pub fn new(kind: ClauseKind, provider: C, param: C::Param, on_completion: F) -> Self {
        Self {
            kind,
            provider,
            param: Some(param),
            slot: Arc::new(Mutex::new(None)),
            handle: None,
            on_completion: Some(on_completion),
        }
    }
}

impl<R, C, F> SelectClause<R> for Clause<C, F>
where
    C: ClauseProvider,
    F: FnOnce(C::Output) -> R,
{
    fn kind(&self) -> ClauseKind {
        self.kind
    }

    fn register(&mut self, select: &Arc<SelectShared>, id: ClauseId) {
        let Some(param) = self.param.take() else {
            return;
        };
        let counterpart = Counterpart {
            select: Arc::downgrade(select),
            clause: id,
            slot: self.slot.clone(),
        };
        self.handle = Some(self.provider.register(counterpart, param));
    }

    fn unregister(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                self.provider.unregister(handle);
                true
            }
            None => false,
        }
    }

    fn is_published(&self) -> bool {
        self.slot.lock().is_some()
    }

    fn complete(&mut self) -> Option<R> {
        let value = self.slot.lock().take()?;
        let on_completion = self.on_completion.take()?;
        Some(on_completion(value))
    }

    fn undeliver(&mut self) -> bool {
        let Some(value) = self.slot.lock().take() else {
            return false;
        };
        match self.handle.take() {
            Some(handle) => {
                self.provider.on_undelivered(handle, value);
                true
            }
            None => false,
        }
    }
}

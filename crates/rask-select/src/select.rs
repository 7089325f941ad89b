// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Select state machine and the primary entry point.
//!
//! A select invocation registers every clause with its provider, then
//! parks until one provider wins the CAS in [`Counterpart::offer`]. The
//! selector itself is the only party that runs cleanup: after it observes
//! a committed winner (or cancellation) it unregisters every other clause
//! and only then runs the winner's completion callback.
//!
//! [`Counterpart::offer`]: crate::clause::Counterpart::offer

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use futures::task::AtomicWaker;
use tracing::{debug, trace};

use crate::cancel::ListenerId;
use crate::clause::{BoxedClause, Clause, ClauseId, ClauseKind, ClauseProvider};
use crate::context::RuntimeContext;
use crate::error::{BoxError, SelectError};
use crate::state::{SelectState, StateCell};
use crate::unbiased::UnbiasedSelect;

static NEXT_SELECT_ID: AtomicU64 = AtomicU64::new(1);

/// The part of a select invocation that providers can reach.
pub(crate) struct SelectShared {
    pub id: u64,
    pub state: StateCell,
    /// Continuation of the suspended selector. Armed before `Waiting`.
    pub waker: AtomicWaker,
}

impl SelectShared {
    pub fn new() -> Self {
        Self {
            id: NEXT_SELECT_ID.fetch_add(1, Ordering::Relaxed),
            state: StateCell::new(),
            waker: AtomicWaker::new(),
        }
    }

    /// Cancellation path: Registering/Waiting -> Cancelled, then resume.
    fn cancel(&self) {
        if self.state.try_cancel().is_ok() {
            debug!(select = self.id, "select cancelled");
            self.waker.wake();
        }
    }
}

/// Where builder methods deposit clauses.
pub(crate) trait ClauseSink<'a, R> {
    fn add_clause(&mut self, clause: BoxedClause<'a, R>);
}

/// Collects the clauses of one select expression.
///
/// Handed to the builder closure of [`select`] and friends. Each method
/// corresponds to one clause capability.
pub struct SelectBuilder<'s, 'a, R> {
    sink: &'s mut dyn ClauseSink<'a, R>,
}

impl<'s, 'a, R: 'a> SelectBuilder<'s, 'a, R> {
    pub(crate) fn for_sink(sink: &'s mut dyn ClauseSink<'a, R>) -> Self {
        Self { sink }
    }

    /// Zero clause: no parameter, no result (e.g. [`Deferred::on_join`]).
    ///
    /// [`Deferred::on_join`]: crate::deferred::Deferred::on_join
    pub fn on_ready<C, B>(&mut self, clause: C, block: B) -> &mut Self
    where
        C: ClauseProvider<Param = (), Output = ()> + 'a,
        B: FnOnce() -> R + Send + 'a,
    {
        self.push(ClauseKind::Zero, clause, (), move |()| block())
    }

    /// One clause: no parameter, one result (e.g. [`Receiver::on_recv`]).
    ///
    /// [`Receiver::on_recv`]: crate::channel::Receiver::on_recv
    pub fn on<C, B>(&mut self, clause: C, block: B) -> &mut Self
    where
        C: ClauseProvider<Param = ()> + 'a,
        C::Output: 'a,
        B: FnOnce(C::Output) -> R + Send + 'a,
    {
        self.push(ClauseKind::One, clause, (), block)
    }

    /// Two clause: `param` goes to the provider, the result comes back
    /// (e.g. [`Sender::on_send`]).
    ///
    /// [`Sender::on_send`]: crate::channel::Sender::on_send
    pub fn on_with<C, B>(&mut self, clause: C, param: C::Param, block: B) -> &mut Self
    where
        C: ClauseProvider + 'a,
        C::Param: 'a,
        C::Output: 'a,
        B: FnOnce(C::Output) -> R + Send + 'a,
    {
        self.push(ClauseKind::Two, clause, param, block)
    }

    fn push<C, B>(&mut self, kind: ClauseKind, clause: C, param: C::Param, block: B) -> &mut Self
    where
        C: ClauseProvider + 'a,
        C::Param: 'a,
        C::Output: 'a,
        B: FnOnce(C::Output) -> R + Send + 'a,
    {
        self.sink
            .add_clause(Box::new(Clause::new(kind, clause, param, block)));
        self
    }
}

/// One select invocation: clauses, their registrations and the shared cell.
pub(crate) struct SelectInstance<'a, R> {
    shared: Arc<SelectShared>,
    clauses: Vec<BoxedClause<'a, R>>,
    context: RuntimeContext,
    cancel_listener: Option<ListenerId>,
    finished: bool,
}

impl<'a, R> SelectInstance<'a, R> {
    pub fn new(context: &RuntimeContext) -> Self {
        let shared = Arc::new(SelectShared::new());
        let weak = Arc::downgrade(&shared);
        // Runs inline when the context is already cancelled, so nothing
        // registered afterwards can win.
        let cancel_listener = context.cancel_token().on_cancel(move || {
            if let Some(shared) = weak.upgrade() {
                shared.cancel();
            }
        });
        trace!(select = shared.id, label = context.label(), "select created");
        Self {
            shared,
            clauses: Vec::new(),
            context: context.clone(),
            cancel_listener,
            finished: false,
        }
    }

    pub fn context(&self) -> &RuntimeContext {
        &self.context
    }

    pub fn state(&self) -> SelectState {
        self.shared.state.load()
    }

    /// Record the clause and, while still registering,
    /// hand it to its provider. A clause added after a winner emerged (or
    /// after cancellation) is kept but never registered.
    pub fn register_clause(&mut self, mut clause: BoxedClause<'a, R>) {
        let id = ClauseId::new(self.clauses.len());
        if self.shared.state.load() == SelectState::Registering {
            trace!(
                select = self.shared.id,
                clause = %id,
                kind = ?clause.kind(),
                "registering clause"
            );
            clause.register(&self.shared, id);
        }
        self.clauses.push(clause);
    }

    /// Suspend until a clause wins or the select is cancelled.
    pub fn poll_select(&mut self, cx: &mut Context<'_>) -> Poll<Result<R, SelectError>> {
        if self.finished {
            return Poll::Ready(Err(SelectError::Finished));
        }
        if self.clauses.is_empty() {
            let _ = self.shared.state.try_cancel();
            self.finish(None);
            return Poll::Ready(Err(SelectError::NoClauses));
        }

        // Arm the continuation before reading the state: an offer that lands
        // after this point is guaranteed to wake us.
        self.shared.waker.register(cx.waker());
        loop {
            match self.shared.state.load() {
                SelectState::Registering => {
                    if self.shared.state.begin_waiting().is_ok() {
                        trace!(
                            select = self.shared.id,
                            clauses = self.clauses.len(),
                            "select suspended"
                        );
                        return Poll::Pending;
                    }
                }
                SelectState::Waiting => return Poll::Pending,
                SelectState::Selected(winner) => {
                    if !self.clauses[winner.index()].is_published() {
                        // The winner has not stored its value yet; its wake follows.
                        return Poll::Pending;
                    }
                    return Poll::Ready(self.commit(winner));
                }
                SelectState::Cancelled => {
                    self.finish(None);
                    return Poll::Ready(Err(SelectError::Cancelled));
                }
                SelectState::Completed => return Poll::Ready(Err(SelectError::Finished)),
            }
        }
    }

    /// Builder failure or early drop: stop further offers and undo every
    /// registration made so far.
    pub fn abort(&mut self) {
        if self.finished {
            return;
        }
        let winner = match self.shared.state.try_cancel() {
            Ok(()) => None,
            Err(SelectState::Selected(winner)) => {
                let _ = self.shared.state.complete(winner);
                Some(winner)
            }
            Err(_) => None,
        };
        debug!(select = self.shared.id, ?winner, "select aborted");
        self.finish(winner);
        // A committed winner nobody will observe: its value goes back.
        let Some(winner) = winner else {
            return;
        };
        let id = self.shared.id;
        if let Some(clause) = self.clauses.get_mut(winner.index()) {
            if clause.undeliver() {
                debug!(select = id, clause = %winner, "undelivered value returned");
            }
        }
    }

    fn commit(&mut self, winner: ClauseId) -> Result<R, SelectError> {
        if let Err(state) = self.shared.state.complete(winner) {
            debug!(select = self.shared.id, %state, "commit observed unexpected state");
        }
        // Losers are released before the winner's callback runs, so a
        // panicking callback cannot leave registrations behind.
        self.finish(Some(winner));
        trace!(select = self.shared.id, clause = %winner, "select completed");
        self.clauses[winner.index()]
            .complete()
            .ok_or(SelectError::Finished)
    }

    /// Unregister every clause except `winner` and detach from the cancel token.
    fn finish(&mut self, winner: Option<ClauseId>) {
        self.finished = true;
        if let Some(listener) = self.cancel_listener.take() {
            self.context.cancel_token().remove_listener(listener);
        }
        let mut unregistered = 0usize;
        for (index, clause) in self.clauses.iter_mut().enumerate() {
            if winner.map(ClauseId::index) == Some(index) {
                continue;
            }
            if clause.unregister() {
                unregistered += 1;
            }
        }
        trace!(select = self.shared.id, unregistered, "losing clauses released");
    }
}

impl<'a, R> ClauseSink<'a, R> for SelectInstance<'a, R> {
    fn add_clause(&mut self, clause: BoxedClause<'a, R>) {
        self.register_clause(clause);
    }
}

impl<R> Drop for SelectInstance<'_, R> {
    fn drop(&mut self) {
        if !self.finished {
            self.abort();
        }
    }
}

/// Clause ordering of a select invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Order {
    /// Register in builder order as clauses are added.
    Biased,
    /// Collect, shuffle, then register on the first poll.
    Unbiased,
}

/// The two state-machine flavours behind every entry point.
pub(crate) enum Driver<'a, R> {
    Biased(SelectInstance<'a, R>),
    Unbiased(UnbiasedSelect<'a, R>),
}

impl<'a, R: 'a> Driver<'a, R> {
    fn new(order: Order, context: &RuntimeContext) -> Self {
        match order {
            Order::Biased => Driver::Biased(SelectInstance::new(context)),
            Order::Unbiased => Driver::Unbiased(UnbiasedSelect::new(context)),
        }
    }

    /// Create the driver and run the builder against it exactly once.
    pub fn build<F>(order: Order, context: &RuntimeContext, build: F) -> Result<Self, SelectError>
    where
        F: FnOnce(&mut SelectBuilder<'_, 'a, R>) -> Result<(), BoxError>,
    {
        let mut driver = Self::new(order, context);
        let built = {
            let sink: &mut dyn ClauseSink<'a, R> = match &mut driver {
                Driver::Biased(instance) => instance,
                Driver::Unbiased(unbiased) => unbiased,
            };
            build(&mut SelectBuilder::for_sink(sink))
        };
        match built {
            Ok(()) => Ok(driver),
            Err(err) => {
                debug!(error = %err, "select builder failed");
                driver.abort();
                Err(SelectError::Builder(err))
            }
        }
    }

    pub fn poll_select(&mut self, cx: &mut Context<'_>) -> Poll<Result<R, SelectError>> {
        match self {
            Driver::Biased(instance) => instance.poll_select(cx),
            Driver::Unbiased(unbiased) => unbiased.poll_select(cx),
        }
    }

    fn abort(&mut self) {
        match self {
            Driver::Biased(instance) => instance.abort(),
            Driver::Unbiased(unbiased) => unbiased.abort(),
        }
    }
}

/// Future returned by [`select`] and [`select_unbiased`].
///
/// The builder runs on the first poll. Dropping the future before it
/// resolves cancels the select and unregisters its clauses.
///
/// [`select_unbiased`]: crate::unbiased::select_unbiased
#[must_use = "futures do nothing unless polled"]
pub struct Select<'a, R, F> {
    order: Order,
    context: RuntimeContext,
    build: Option<F>,
    driver: Option<Driver<'a, R>>,
}

impl<'a, R, F> Select<'a, R, F> {
    pub(crate) fn new(order: Order, context: &RuntimeContext, build: F) -> Self {
        Self {
            order,
            context: context.clone(),
            build: Some(build),
            driver: None,
        }
    }
}

// Neither the builder nor the driver is ever pinned.
impl<R, F> Unpin for Select<'_, R, F> {}

impl<'a, R: 'a, F> Future for Select<'a, R, F>
where
    F: FnOnce(&mut SelectBuilder<'_, 'a, R>) -> Result<(), BoxError>,
{
    type Output = Result<R, SelectError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(build) = this.build.take() {
            match Driver::build(this.order, &this.context, build) {
                Ok(driver) => this.driver = Some(driver),
                Err(err) => return Poll::Ready(Err(err)),
            }
        }
        let Some(driver) = this.driver.as_mut() else {
            return Poll::Ready(Err(SelectError::Finished));
        };
        let outcome = ready!(driver.poll_select(cx));
        // Discard the invocation: late offers now see no counterpart.
        this.driver = None;
        Poll::Ready(outcome)
    }
}

/// Wait for the first of several clauses to complete.
///
/// Clauses are registered in the order the builder adds them, so when
/// several are ready at once the earliest one wins. The builder runs
/// exactly once; if it fails, the select resolves to
/// [`SelectError::Builder`] after unregistering whatever it had added.
///
/// ```ignore
/// let value = select(&ctx, |s| {
///     s.on(rx_a.on_recv(), |v| v);
///     s.on(rx_b.on_recv(), |v| v);
///     Ok(())
/// })
/// .await?;
/// ```
pub fn select<'a, R, F>(context: &RuntimeContext, build: F) -> Select<'a, R, F>
where
    R: 'a,
    F: FnOnce(&mut SelectBuilder<'_, 'a, R>) -> Result<(), BoxError>,
{
    Select::new(Order::Biased, context, build)
}

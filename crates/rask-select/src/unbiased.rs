// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Unbiased select.
//!
//! Same state machine, different registration order: clauses are held
//! back while the builder runs, shuffled on the first poll, and
//! only then registered. When several clauses are ready at once each is
//! equally likely to win.

use std::task::{Context, Poll};

use tracing::trace;

use crate::clause::BoxedClause;
use crate::context::RuntimeContext;
use crate::error::{BoxError, SelectError};
use crate::select::{ClauseSink, Order, Select, SelectBuilder, SelectInstance};

pub(crate) struct UnbiasedSelect<'a, R> {
    inner: SelectInstance<'a, R>,
    pending: Vec<BoxedClause<'a, R>>,
    registered: bool,
}

impl<'a, R> UnbiasedSelect<'a, R> {
    pub fn new(context: &RuntimeContext) -> Self {
        Self {
            inner: SelectInstance::new(context),
            pending: Vec::new(),
            registered: false,
        }
    }

    pub fn poll_select(&mut self, cx: &mut Context<'_>) -> Poll<Result<R, SelectError>> {
        if !self.registered {
            self.registered = true;
            self.shuffle_and_register();
        }
        self.inner.poll_select(cx)
    }

    pub fn abort(&mut self) {
        self.pending.clear();
        self.inner.abort();
    }

    fn shuffle_and_register(&mut self) {
        // Taken, not borrowed: the temporary list is empty afterwards even
        // if a provider panics halfway through registration.
        let mut clauses = std::mem::take(&mut self.pending);
        self.inner.context().shuffle(&mut clauses);
        trace!(clauses = clauses.len(), "registering shuffled clauses");
        for clause in clauses {
            self.inner.register_clause(clause);
        }
    }
}

impl<'a, R> ClauseSink<'a, R> for UnbiasedSelect<'a, R> {
    fn add_clause(&mut self, clause: BoxedClause<'a, R>) {
        self.pending.push(clause);
    }
}

/// Like [`select`](crate::select::select), but clause order is randomly
/// permuted before registration, so no clause is favoured by position.
pub fn select_unbiased<'a, R, F>(context: &RuntimeContext, build: F) -> Select<'a, R, F>
where
    R: 'a,
    F: FnOnce(&mut SelectBuilder<'_, 'a, R>) -> Result<(), BoxError>,
{
    Select::new(Order::Unbiased, context, build)
}

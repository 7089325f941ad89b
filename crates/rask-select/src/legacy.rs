// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Older invocation shape: the builder runs at call time and the caller
//! awaits a completion handle instead of the select itself.
//!
//! Both functions share the driver used by [`select`] and
//! [`select_unbiased`]; the oneshot is resolved inside the same poll that
//! observes the outcome, so awaiting it never adds a suspension.
//!
//! [`select`]: crate::select::select
//! [`select_unbiased`]: crate::unbiased::select_unbiased

use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures::channel::oneshot;
use tracing::trace;

use crate::context::RuntimeContext;
use crate::error::{BoxError, SelectError};
use crate::select::{Driver, Order, SelectBuilder};

type Outcome<R> = Result<R, SelectError>;

/// Future returned by [`select_old`] and [`select_unbiased_old`].
#[must_use = "futures do nothing unless polled"]
pub struct SelectOld<'a, R> {
    driver: Option<Driver<'a, R>>,
    resume: Option<oneshot::Sender<Outcome<R>>>,
    result: oneshot::Receiver<Outcome<R>>,
}

impl<R> Unpin for SelectOld<'_, R> {}

impl<'a, R: 'a> SelectOld<'a, R> {
    fn start<F>(order: Order, context: &RuntimeContext, build: F) -> Self
    where
        F: FnOnce(&mut SelectBuilder<'_, 'a, R>) -> Result<(), BoxError>,
    {
        let (resume, result) = oneshot::channel();
        match Driver::build(order, context, build) {
            Ok(driver) => Self {
                driver: Some(driver),
                resume: Some(resume),
                result,
            },
            Err(err) => {
                // The handle is resolved before anyone awaits it.
                let _ = resume.send(Err(err));
                Self {
                    driver: None,
                    resume: None,
                    result,
                }
            }
        }
    }
}

impl<'a, R: 'a> Future for SelectOld<'a, R> {
    type Output = Outcome<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(driver) = this.driver.as_mut() {
            let outcome = ready!(driver.poll_select(cx));
            this.driver = None;
            if let Some(resume) = this.resume.take() {
                trace!(ok = outcome.is_ok(), "resolving legacy completion handle");
                let _ = resume.send(outcome);
            }
        }
        match ready!(Pin::new(&mut this.result).poll(cx)) {
            Ok(outcome) => Poll::Ready(outcome),
            Err(oneshot::Canceled) => Poll::Ready(Err(SelectError::Finished)),
        }
    }
}

/// [`select`](crate::select::select) with the builder run eagerly.
pub fn select_old<'a, R, F>(context: &RuntimeContext, build: F) -> SelectOld<'a, R>
where
    R: 'a,
    F: FnOnce(&mut SelectBuilder<'_, 'a, R>) -> Result<(), BoxError>,
{
    SelectOld::start(Order::Biased, context, build)
}

/// [`select_unbiased`](crate::unbiased::select_unbiased) with the builder
/// run eagerly. Shuffling still happens at the first poll.
pub fn select_unbiased_old<'a, R, F>(context: &RuntimeContext, build: F) -> SelectOld<'a, R>
where
    R: 'a,
    F: FnOnce(&mut SelectBuilder<'_, 'a, R>) -> Result<(), BoxError>,
{
    SelectOld::start(Order::Unbiased, context, build)
}

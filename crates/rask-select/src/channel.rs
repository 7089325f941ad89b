// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Bounded MPMC channel with select clauses.
//!
//! Receivers park only while the buffer is empty and senders park only
//! while it is full, so a value never has to be handed between two
//! selects in one step: a send commits its own clause first and then
//! delivers into a parked receiver or the free buffer slot.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::trace;

use crate::clause::{ClauseProvider, Counterpart, RegistrationHandle};
use crate::context::RuntimeContext;
use crate::error::SelectError;
use crate::select::select;

/// Error from a send clause or [`Sender::send`].
#[derive(PartialEq, Eq, Error)]
pub enum SendError<T> {
    /// Every receiver was dropped. The value comes back.
    #[error("sending on a closed channel")]
    Closed(T),
}

impl<T> SendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            SendError::Closed(value) => value,
        }
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

#[derive(PartialEq, Eq, Error)]
pub enum TrySendError<T> {
    /// Buffer is full.
    #[error("channel buffer is full")]
    Full(T),
    /// Every receiver was dropped.
    #[error("sending on a closed channel")]
    Closed(T),
}

impl<T> TrySendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            TrySendError::Full(value) | TrySendError::Closed(value) => value,
        }
    }
}

// Manual so that `T` need not be `Debug`.
impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => f.write_str("Full(..)"),
            TrySendError::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TryRecvError {
    /// No message available right now.
    #[error("channel is empty")]
    Empty,
    /// All senders dropped and the buffer is drained.
    #[error("channel is closed")]
    Closed,
}

struct ParkedSender<T> {
    handle: RegistrationHandle,
    counterpart: Counterpart<Result<(), SendError<T>>>,
    value: T,
}

struct ChanState<T> {
    buffer: VecDeque<T>,
    capacity: usize,
    receivers: VecDeque<(RegistrationHandle, Counterpart<Option<T>>)>,
    senders: VecDeque<ParkedSender<T>>,
    sender_count: usize,
    receiver_count: usize,
    next_handle: u64,
}

impl<T: Send> ChanState<T> {
    fn next_handle(&mut self) -> RegistrationHandle {
        self.next_handle += 1;
        RegistrationHandle::new(self.next_handle)
    }

    fn has_room(&self) -> bool {
        self.buffer.len() < self.capacity
    }

    /// Hand `value` to the first parked receiver that accepts it, else
    /// buffer it. Callers check `has_room` first.
    fn deliver(&mut self, mut value: T) {
        while let Some((_, receiver)) = self.receivers.pop_front() {
            match receiver.offer(Some(value)) {
                Ok(()) => return,
                Err(rejected) => match rejected.into_value() {
                    Some(v) => value = v,
                    None => unreachable!("rejected offer returned no value"),
                },
            }
        }
        self.buffer.push_back(value);
    }

    /// Put back a value a receiving select accepted but never observed.
    /// It is the oldest value, so it goes to the front.
    fn restore(&mut self, value: T) {
        if self.buffer.is_empty() {
            self.deliver(value);
        } else {
            self.buffer.push_front(value);
        }
    }

    /// Pop the oldest value and let parked senders refill the freed slot.
    fn take(&mut self) -> Option<T> {
        let value = self.buffer.pop_front()?;
        self.admit_parked_senders();
        Some(value)
    }

    fn admit_parked_senders(&mut self) {
        while self.has_room() {
            let Some(parked) = self.senders.pop_front() else {
                break;
            };
            // A sender whose select went elsewhere never sent; its value is
            // dropped with the clause.
            if parked.counterpart.offer(Ok(())).is_ok() {
                self.buffer.push_back(parked.value);
            }
        }
    }
}

struct Chan<T> {
    state: Mutex<ChanState<T>>,
}

/// Create a channel buffering up to `capacity` values.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn bounded<T: Send>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    assert!(capacity > 0, "channel capacity must be at least 1");
    let chan = Arc::new(Chan {
        state: Mutex::new(ChanState {
            buffer: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            receivers: VecDeque::new(),
            senders: VecDeque::new(),
            sender_count: 1,
            receiver_count: 1,
            next_handle: 0,
        }),
    });
    (Sender { chan: chan.clone() }, Receiver { chan })
}

/// Sending half of a channel. Cloneable.
pub struct Sender<T: Send> {
    chan: Arc<Chan<T>>,
}

impl<T: Send> Sender<T> {
    /// Non-blocking send attempt.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let mut state = self.chan.state.lock();
        if state.receiver_count == 0 {
            return Err(TrySendError::Closed(value));
        }
        if !state.has_room() {
            return Err(TrySendError::Full(value));
        }
        state.deliver(value);
        Ok(())
    }

    /// Two clause: send the parameter value once there is room.
    pub fn on_send(&self) -> OnSend<'_, T> {
        OnSend { chan: &self.chan }
    }

    /// Send, suspending while the buffer is full.
    pub async fn send(
        &self,
        ctx: &RuntimeContext,
        value: T,
    ) -> Result<Result<(), SendError<T>>, SelectError> {
        select(ctx, |s| {
            s.on_with(self.on_send(), value, |sent| sent);
            Ok(())
        })
        .await
    }
}

impl<T: Send> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.chan.state.lock().sender_count += 1;
        Sender {
            chan: self.chan.clone(),
        }
    }
}

impl<T: Send> Drop for Sender<T> {
    fn drop(&mut self) {
        let mut state = self.chan.state.lock();
        state.sender_count -= 1;
        if state.sender_count > 0 {
            return;
        }
        let receivers = std::mem::take(&mut state.receivers);
        trace!(parked = receivers.len(), "last sender dropped");
        for (_, receiver) in receivers {
            let _ = receiver.offer(None);
        }
    }
}

/// Receiving half of a channel. Cloneable; each value goes to one receiver.
pub struct Receiver<T: Send> {
    chan: Arc<Chan<T>>,
}

impl<T: Send> Receiver<T> {
    /// Non-blocking receive attempt.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut state = self.chan.state.lock();
        match state.take() {
            Some(value) => Ok(value),
            None if state.sender_count == 0 => Err(TryRecvError::Closed),
            None => Err(TryRecvError::Empty),
        }
    }

    /// One clause: yields the next value, or `None` once the channel is
    /// closed and drained.
    pub fn on_recv(&self) -> OnRecv<'_, T> {
        OnRecv { chan: &self.chan }
    }

    /// Receive, suspending while the buffer is empty.
    pub async fn recv(&self, ctx: &RuntimeContext) -> Result<Option<T>, SelectError> {
        select(ctx, |s| {
            s.on(self.on_recv(), |value| value);
            Ok(())
        })
        .await
    }

    /// Values currently buffered.
    pub fn len(&self) -> usize {
        self.chan.state.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Send> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        self.chan.state.lock().receiver_count += 1;
        Receiver {
            chan: self.chan.clone(),
        }
    }
}

impl<T: Send> Drop for Receiver<T> {
    fn drop(&mut self) {
        let mut state = self.chan.state.lock();
        state.receiver_count -= 1;
        if state.receiver_count > 0 {
            return;
        }
        trace!(parked = state.senders.len(), "last receiver dropped");
        let senders = std::mem::take(&mut state.senders);
        for parked in senders {
            let _ = parked
                .counterpart
                .offer(Err(SendError::Closed(parked.value)));
        }
    }
}

/// Receive clause over a channel.
pub struct OnRecv<'c, T> {
    chan: &'c Chan<T>,
}

impl<T: Send> ClauseProvider for OnRecv<'_, T> {
    type Param = ();
    type Output = Option<T>;

    fn register(&self, counterpart: Counterpart<Option<T>>, _: ()) -> RegistrationHandle {
        let mut state = self.chan.state.lock();
        let handle = state.next_handle();
        if let Some(value) = state.buffer.pop_front() {
            match counterpart.offer(Some(value)) {
                Ok(()) => state.admit_parked_senders(),
                Err(rejected) => {
                    // Roll back: the value goes back where it came from.
                    if let Some(value) = rejected.into_value() {
                        state.buffer.push_front(value);
                    }
                }
            }
        } else if state.sender_count == 0 {
            let _ = counterpart.offer(None);
        } else {
            state.receivers.push_back((handle, counterpart));
        }
        handle
    }

    fn unregister(&self, handle: RegistrationHandle) {
        self.chan
            .state
            .lock()
            .receivers
            .retain(|(h, _)| *h != handle);
    }

    fn on_undelivered(&self, _: RegistrationHandle, value: Option<T>) {
        if let Some(value) = value {
            trace!("restoring value of a discarded receive");
            self.chan.state.lock().restore(value);
        }
    }
}

/// Send clause over a channel. The value travels as the clause parameter.
pub struct OnSend<'c, T> {
    chan: &'c Chan<T>,
}

impl<T: Send> ClauseProvider for OnSend<'_, T> {
    type Param = T;
    type Output = Result<(), SendError<T>>;

    fn register(&self, counterpart: Counterpart<Self::Output>, value: T) -> RegistrationHandle {
        let mut state = self.chan.state.lock();
        let handle = state.next_handle();
        if state.receiver_count == 0 {
            let _ = counterpart.offer(Err(SendError::Closed(value)));
        } else if state.has_room() {
            // Commit our own clause before the value becomes visible.
            if counterpart.offer(Ok(())).is_ok() {
                state.deliver(value);
            }
        } else {
            state.senders.push_back(ParkedSender {
                handle,
                counterpart,
                value,
            });
        }
        handle
    }

    fn unregister(&self, handle: RegistrationHandle) {
        self.chan
            .state
            .lock()
            .senders
            .retain(|parked| parked.handle != handle);
    }
}

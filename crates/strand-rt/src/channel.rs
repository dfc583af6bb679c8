// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Typed channels with rendezvous and close semantics.
//!
//! A channel is a single clonable handle shared by every task holding a
//! reference. Capacity 0 is a pure rendezvous: a send completes only by
//! handing its value to a receiver that is already present, and vice versa.
//! Capacity N buffers up to N values; a send blocks once the buffer is full
//! and no receiver is waiting. Values are delivered strictly FIFO, including
//! across multiple blocked senders. Closing forbids further sends, fails
//! every parked sender, and lets receivers drain what was sent before the
//! close; a drained closed channel yields `None` forever.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use thiserror::Error;

use crate::select::{SelectRecvReg, SelectSendReg, SendCaseCell};
use crate::waitq::{Ticket, WaitQueue};

/// Error from a blocking send.
#[derive(Debug, Error)]
pub enum SendError<T> {
    /// Send on a closed channel. Carries the value back to the caller.
    #[error("send on closed channel")]
    Closed(T),
}

/// Error from a non-blocking send attempt.
#[derive(Debug, Error)]
pub enum TrySendError<T> {
    /// Buffer is full, or no receiver is present on a rendezvous channel.
    #[error("channel is full")]
    Full(T),
    /// Send on a closed channel.
    #[error("send on closed channel")]
    Closed(T),
}

/// Error from a non-blocking receive attempt.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TryRecvError {
    /// No value available right now.
    #[error("channel is empty")]
    Empty,
    /// Closed and fully drained — the terminal state, reported here so
    /// polling callers can distinguish it from a momentary empty.
    #[error("channel is closed and drained")]
    Closed,
}

/// Error from `close`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CloseError {
    /// Close of an already-closed channel.
    #[error("close of closed channel")]
    AlreadyClosed,
}

/// A typed channel. Clones share the same underlying state; the state is
/// freed when the last clone is dropped. Close never deallocates — it only
/// forbids future sends.
pub struct Channel<T> {
    shared: Arc<ChanShared<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

struct ChanShared<T> {
    cap: usize,
    state: Mutex<ChanState<T>>,
}

struct ChanState<T> {
    buffer: VecDeque<T>,
    closed: bool,
    send_waiters: WaitQueue<SendWaiter<T>>,
    recv_waiters: WaitQueue<RecvWaiter<T>>,
}

/// A parked sender: either a plain blocked `send` or one case of a parked
/// select, which fires at most once across all of its channels.
pub(crate) enum SendWaiter<T> {
    Task(Arc<SendInFlight<T>>),
    Select(SelectSendReg<T>),
}

pub(crate) enum RecvWaiter<T> {
    Task(Arc<RecvInFlight<T>>),
    Select(SelectRecvReg<T>),
}

/// Shared between a parked send future and its wait-queue entry. The value
/// travels inside so close can hand it back.
pub(crate) struct SendInFlight<T> {
    slot: Mutex<SendSlot<T>>,
}

enum SendSlot<T> {
    Queued { value: T, waker: Waker },
    Sent,
    Closed(T),
    Done,
}

impl<T> SendInFlight<T> {
    fn poll_result(&self, cx: &mut Context<'_>) -> Poll<Result<(), SendError<T>>> {
        let mut slot = self.slot.lock().unwrap();
        match std::mem::replace(&mut *slot, SendSlot::Done) {
            SendSlot::Sent => Poll::Ready(Ok(())),
            SendSlot::Closed(value) => Poll::Ready(Err(SendError::Closed(value))),
            SendSlot::Queued { value, .. } => {
                *slot = SendSlot::Queued {
                    value,
                    waker: cx.waker().clone(),
                };
                Poll::Pending
            }
            SendSlot::Done => unreachable!("send polled after completion"),
        }
    }

    /// A receiver takes the queued value.
    fn complete(&self) -> (T, Waker) {
        let mut slot = self.slot.lock().unwrap();
        match std::mem::replace(&mut *slot, SendSlot::Sent) {
            SendSlot::Queued { value, waker } => (value, waker),
            _ => unreachable!("parked sender had no queued value"),
        }
    }

    fn close(&self) -> Option<Waker> {
        let mut slot = self.slot.lock().unwrap();
        match std::mem::replace(&mut *slot, SendSlot::Done) {
            SendSlot::Queued { value, waker } => {
                *slot = SendSlot::Closed(value);
                Some(waker)
            }
            other => {
                *slot = other;
                None
            }
        }
    }

    fn abandon(&self) {
        *self.slot.lock().unwrap() = SendSlot::Done;
    }
}

pub(crate) struct RecvInFlight<T> {
    slot: Mutex<RecvSlot<T>>,
}

enum RecvSlot<T> {
    Waiting(Waker),
    Delivered(T),
    Closed,
    Done,
}

impl<T> RecvInFlight<T> {
    fn poll_result(&self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let mut slot = self.slot.lock().unwrap();
        match std::mem::replace(&mut *slot, RecvSlot::Done) {
            RecvSlot::Delivered(value) => Poll::Ready(Some(value)),
            RecvSlot::Closed => Poll::Ready(None),
            RecvSlot::Waiting(_) => {
                *slot = RecvSlot::Waiting(cx.waker().clone());
                Poll::Pending
            }
            RecvSlot::Done => unreachable!("receive polled after completion"),
        }
    }

    fn deliver(&self, value: T) -> Waker {
        let mut slot = self.slot.lock().unwrap();
        match std::mem::replace(&mut *slot, RecvSlot::Delivered(value)) {
            RecvSlot::Waiting(waker) => waker,
            _ => unreachable!("parked receiver was not waiting"),
        }
    }

    fn close(&self) -> Option<Waker> {
        let mut slot = self.slot.lock().unwrap();
        match std::mem::replace(&mut *slot, RecvSlot::Closed) {
            RecvSlot::Waiting(waker) => Some(waker),
            other => {
                *slot = other;
                None
            }
        }
    }

    fn abandon(&self) {
        *self.slot.lock().unwrap() = RecvSlot::Done;
    }
}

/// Hand `value` to the longest-waiting receiver. Select cases that already
/// fired on another channel are skipped and discarded.
fn offer_to_receiver<T>(state: &mut ChanState<T>, value: T) -> Result<(), T> {
    while let Some(waiter) = state.recv_waiters.pop_front() {
        match waiter {
            RecvWaiter::Task(inflight) => {
                let waker = inflight.deliver(value);
                waker.wake();
                return Ok(());
            }
            RecvWaiter::Select(reg) => {
                if reg.core.try_claim(reg.case) {
                    *reg.cell.lock().unwrap() = Some(Some(value));
                    reg.core.wake();
                    return Ok(());
                }
                // Stale registration: its select already resolved elsewhere.
            }
        }
    }
    Err(value)
}

/// Take the longest-waiting sender's value, waking it.
fn take_from_sender<T>(state: &mut ChanState<T>) -> Option<T> {
    while let Some(waiter) = state.send_waiters.pop_front() {
        match waiter {
            SendWaiter::Task(inflight) => {
                let (value, waker) = inflight.complete();
                waker.wake();
                return Some(value);
            }
            SendWaiter::Select(reg) => {
                if reg.core.try_claim(reg.case) {
                    let mut cell = reg.cell.lock().unwrap();
                    let value = cell
                        .value
                        .take()
                        .expect("send case fired with no value");
                    cell.outcome = Some(Ok(()));
                    drop(cell);
                    reg.core.wake();
                    return Some(value);
                }
            }
        }
    }
    None
}

/// Next deliverable value: the oldest buffered one (backfilling the freed
/// slot from a parked sender), or a direct handoff on a rendezvous channel.
fn take_value<T>(state: &mut ChanState<T>) -> Option<T> {
    if let Some(value) = state.buffer.pop_front() {
        if let Some(next) = take_from_sender(state) {
            state.buffer.push_back(next);
        }
        return Some(value);
    }
    take_from_sender(state)
}

impl<T> Channel<T> {
    /// Create a channel with the given capacity. Capacity 0 means every
    /// send rendezvouses with a receive.
    pub fn new(cap: usize) -> Self {
        Self {
            shared: Arc::new(ChanShared {
                cap,
                state: Mutex::new(ChanState {
                    buffer: VecDeque::with_capacity(cap),
                    closed: false,
                    send_waiters: WaitQueue::new(),
                    recv_waiters: WaitQueue::new(),
                }),
            }),
        }
    }

    /// Send a value. Completes immediately when a receiver is waiting or
    /// the buffer has room; otherwise parks until a receiver takes the
    /// value or the channel is closed.
    pub fn send(&self, value: T) -> SendFuture<'_, T> {
        SendFuture {
            chan: self,
            value: Some(value),
            inflight: None,
        }
    }

    /// Receive a value. `None` means closed and drained, which is the
    /// defined terminal state, not a failure; a drain loop is
    /// `while let Some(v) = ch.recv().await`.
    pub fn recv(&self) -> RecvFuture<'_, T> {
        RecvFuture {
            chan: self,
            inflight: None,
        }
    }

    /// Non-blocking send attempt.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let mut state = self.shared.state.lock().unwrap();
        if state.closed {
            return Err(TrySendError::Closed(value));
        }
        match offer_to_receiver(&mut state, value) {
            Ok(()) => Ok(()),
            Err(value) => {
                if state.buffer.len() < self.shared.cap {
                    state.buffer.push_back(value);
                    Ok(())
                } else {
                    Err(TrySendError::Full(value))
                }
            }
        }
    }

    /// Non-blocking receive attempt.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut state = self.shared.state.lock().unwrap();
        if let Some(value) = take_value(&mut state) {
            return Ok(value);
        }
        if state.closed {
            Err(TryRecvError::Closed)
        } else {
            Err(TryRecvError::Empty)
        }
    }

    /// Close the channel. Fails every parked sender with
    /// [`SendError::Closed`] and resumes every parked receiver; values sent
    /// before the close stay receivable in order. Closing twice is a
    /// programming error.
    pub fn close(&self) -> Result<(), CloseError> {
        let mut state = self.shared.state.lock().unwrap();
        if state.closed {
            return Err(CloseError::AlreadyClosed);
        }
        state.closed = true;
        let senders = state.send_waiters.drain();
        let receivers = state.recv_waiters.drain();
        // Release the channel lock before waking anyone.
        drop(state);

        for waiter in senders {
            match waiter {
                SendWaiter::Task(inflight) => {
                    if let Some(waker) = inflight.close() {
                        waker.wake();
                    }
                }
                SendWaiter::Select(reg) => {
                    if reg.core.try_claim(reg.case) {
                        let mut cell = reg.cell.lock().unwrap();
                        if let Some(value) = cell.value.take() {
                            cell.outcome = Some(Err(SendError::Closed(value)));
                        }
                        drop(cell);
                        reg.core.wake();
                    }
                }
            }
        }
        for waiter in receivers {
            match waiter {
                RecvWaiter::Task(inflight) => {
                    if let Some(waker) = inflight.close() {
                        waker.wake();
                    }
                }
                RecvWaiter::Select(reg) => {
                    // A parked receiver implies an empty buffer, so the
                    // case fires with the terminal `None`.
                    if reg.core.try_claim(reg.case) {
                        *reg.cell.lock().unwrap() = Some(None);
                        reg.core.wake();
                    }
                }
            }
        }
        Ok(())
    }

    /// Number of buffered values.
    pub fn len(&self) -> usize {
        self.shared.state.lock().unwrap().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.cap
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().unwrap().closed
    }

    // Select integration. Probing and registration happen inside a single
    // poll of the select future, so no peer task can run in between; the
    // claim-once cell covers wakeups racing in from other threads.

    pub(crate) fn recv_ready(&self) -> bool {
        let state = self.shared.state.lock().unwrap();
        !state.buffer.is_empty() || !state.send_waiters.is_empty() || state.closed
    }

    /// Complete a receive case right now if possible. `Some(None)` is the
    /// closed-and-drained outcome, which counts as ready.
    pub(crate) fn try_recv_case(&self) -> Option<Option<T>> {
        let mut state = self.shared.state.lock().unwrap();
        if let Some(value) = take_value(&mut state) {
            return Some(Some(value));
        }
        if state.closed {
            return Some(None);
        }
        None
    }

    pub(crate) fn send_ready(&self) -> bool {
        let state = self.shared.state.lock().unwrap();
        state.closed || !state.recv_waiters.is_empty() || state.buffer.len() < self.shared.cap
    }

    /// Complete a send case right now if possible. A closed channel counts
    /// as ready: the case fires with the error.
    pub(crate) fn try_send_case(&self, cell: &Arc<Mutex<SendCaseCell<T>>>) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        let mut cell = cell.lock().unwrap();
        let Some(value) = cell.value.take() else {
            return false;
        };
        if state.closed {
            cell.outcome = Some(Err(SendError::Closed(value)));
            return true;
        }
        match offer_to_receiver(&mut state, value) {
            Ok(()) => {
                cell.outcome = Some(Ok(()));
                true
            }
            Err(value) => {
                if state.buffer.len() < self.shared.cap {
                    state.buffer.push_back(value);
                    cell.outcome = Some(Ok(()));
                    true
                } else {
                    cell.value = Some(value);
                    false
                }
            }
        }
    }

    /// Park a receive case. Re-checks the closed flag under the lock: an
    /// interrupt handler may close the channel between the select's probe
    /// and this registration, and an entry parked after that would never
    /// be drained. In that case the case fires right here instead.
    pub(crate) fn register_recv_case(&self, reg: SelectRecvReg<T>) -> Option<Ticket> {
        let mut state = self.shared.state.lock().unwrap();
        if state.closed {
            if reg.core.try_claim(reg.case) {
                let outcome = take_value(&mut state);
                drop(state);
                *reg.cell.lock().unwrap() = Some(outcome);
                reg.core.wake();
            }
            return None;
        }
        Some(state.recv_waiters.enqueue(RecvWaiter::Select(reg)))
    }

    /// Park a send case; fires with the closed error if a close slipped in
    /// since the probe.
    pub(crate) fn register_send_case(&self, reg: SelectSendReg<T>) -> Option<Ticket> {
        let mut state = self.shared.state.lock().unwrap();
        if state.closed {
            drop(state);
            if reg.core.try_claim(reg.case) {
                let mut cell = reg.cell.lock().unwrap();
                if let Some(value) = cell.value.take() {
                    cell.outcome = Some(Err(SendError::Closed(value)));
                }
                drop(cell);
                reg.core.wake();
            }
            return None;
        }
        Some(state.send_waiters.enqueue(SendWaiter::Select(reg)))
    }

    pub(crate) fn cancel_recv_case(&self, ticket: Ticket) {
        self.shared.state.lock().unwrap().recv_waiters.remove(ticket);
    }

    pub(crate) fn cancel_send_case(&self, ticket: Ticket) {
        self.shared.state.lock().unwrap().send_waiters.remove(ticket);
    }

    #[cfg(test)]
    pub(crate) fn waiter_counts(&self) -> (usize, usize) {
        let state = self.shared.state.lock().unwrap();
        (state.send_waiters.len(), state.recv_waiters.len())
    }
}

pub struct SendFuture<'a, T> {
    chan: &'a Channel<T>,
    value: Option<T>,
    inflight: Option<(Ticket, Arc<SendInFlight<T>>)>,
}

// `value` is moved out of the future (never pinned in place), so the future
// is safely `Unpin` regardless of `T` — mirroring `RecvFuture`.
impl<T> Unpin for SendFuture<'_, T> {}

impl<T> Future for SendFuture<'_, T> {
    type Output = Result<(), SendError<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some((_, inflight)) = &this.inflight {
            let result = inflight.poll_result(cx);
            if result.is_ready() {
                this.inflight = None;
            }
            return result;
        }

        let mut state = this.chan.shared.state.lock().unwrap();
        let value = this.value.take().expect("send future polled twice");
        if state.closed {
            return Poll::Ready(Err(SendError::Closed(value)));
        }
        debug_assert!(state.buffer.is_empty() || state.recv_waiters.is_empty());
        match offer_to_receiver(&mut state, value) {
            Ok(()) => Poll::Ready(Ok(())),
            Err(value) => {
                if state.buffer.len() < this.chan.shared.cap {
                    state.buffer.push_back(value);
                    Poll::Ready(Ok(()))
                } else {
                    let inflight = Arc::new(SendInFlight {
                        slot: Mutex::new(SendSlot::Queued {
                            value,
                            waker: cx.waker().clone(),
                        }),
                    });
                    let ticket = state
                        .send_waiters
                        .enqueue(SendWaiter::Task(inflight.clone()));
                    this.inflight = Some((ticket, inflight));
                    Poll::Pending
                }
            }
        }
    }
}

impl<T> Drop for SendFuture<'_, T> {
    fn drop(&mut self) {
        let Some((ticket, inflight)) = self.inflight.take() else {
            return;
        };
        let mut state = self.chan.shared.state.lock().unwrap();
        if state.send_waiters.remove(ticket).is_some() {
            return;
        }
        drop(state);
        // Already dequeued: the operation finished without being observed.
        inflight.abandon();
    }
}

pub struct RecvFuture<'a, T> {
    chan: &'a Channel<T>,
    inflight: Option<(Ticket, Arc<RecvInFlight<T>>)>,
}

impl<T> Future for RecvFuture<'_, T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some((_, inflight)) = &this.inflight {
            let result = inflight.poll_result(cx);
            if result.is_ready() {
                this.inflight = None;
            }
            return result;
        }

        let mut state = this.chan.shared.state.lock().unwrap();
        if let Some(value) = take_value(&mut state) {
            return Poll::Ready(Some(value));
        }
        if state.closed {
            return Poll::Ready(None);
        }
        let inflight = Arc::new(RecvInFlight {
            slot: Mutex::new(RecvSlot::Waiting(cx.waker().clone())),
        });
        let ticket = state
            .recv_waiters
            .enqueue(RecvWaiter::Task(inflight.clone()));
        this.inflight = Some((ticket, inflight));
        Poll::Pending
    }
}

impl<T> Drop for RecvFuture<'_, T> {
    fn drop(&mut self) {
        let Some((ticket, inflight)) = self.inflight.take() else {
            return;
        };
        let mut state = self.chan.shared.state.lock().unwrap();
        if state.recv_waiters.remove(ticket).is_some() {
            return;
        }
        drop(state);
        // A delivery landed before the drop; the value goes with the
        // abandoned receive.
        inflight.abandon();
    }
}

// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Multi-way select over channel operations.
//!
//! A select names any number of send and receive cases plus at most one
//! default. Cases that can complete immediately are probed first, choosing
//! uniformly at random when several are ready so no case starves. If none
//! is ready and there is no default, one shared registration is parked on
//! every case's channel; whichever peer operation matches first claims the
//! single winner cell and wakes the select, which then removes every other
//! registration before resuming. Each call is a complete, independent
//! registration cycle — nothing persists into the next select.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use crate::channel::{Channel, SendError};
use crate::waitq::Ticket;

const NO_WINNER: usize = usize::MAX;

/// Shared core of one parked select: the claim-once winner cell and the
/// waker of the selecting task.
pub(crate) struct SelectCore {
    winner: AtomicUsize,
    waker: Mutex<Option<Waker>>,
}

impl SelectCore {
    fn new() -> Self {
        Self {
            winner: AtomicUsize::new(NO_WINNER),
            waker: Mutex::new(None),
        }
    }

    /// Claim the select for `case`. Exactly one claim ever succeeds, even
    /// when two channels become ready at the same instant on different
    /// threads.
    pub(crate) fn try_claim(&self, case: usize) -> bool {
        self.winner
            .compare_exchange(NO_WINNER, case, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn winner(&self) -> Option<usize> {
        let w = self.winner.load(Ordering::Acquire);
        (w != NO_WINNER).then_some(w)
    }

    fn set_waker(&self, waker: &Waker) {
        *self.waker.lock().unwrap() = Some(waker.clone());
    }

    pub(crate) fn wake(&self) {
        if let Some(waker) = self.waker.lock().unwrap().take() {
            waker.wake();
        }
    }
}

/// One receive case's wait-queue entry: delivery writes the value (or the
/// closed marker) into the cell after winning the claim.
pub(crate) struct SelectRecvReg<T> {
    pub(crate) core: Arc<SelectCore>,
    pub(crate) case: usize,
    pub(crate) cell: Arc<Mutex<Option<Option<T>>>>,
}

/// One send case's wait-queue entry. The payload rides in the cell; the
/// receiving peer takes it and records the outcome.
pub(crate) struct SelectSendReg<T> {
    pub(crate) core: Arc<SelectCore>,
    pub(crate) case: usize,
    pub(crate) cell: Arc<Mutex<SendCaseCell<T>>>,
}

pub(crate) struct SendCaseCell<T> {
    pub(crate) value: Option<T>,
    pub(crate) outcome: Option<Result<(), SendError<T>>>,
}

trait Arm<R>: Send {
    /// Could the case complete right now? Never commits anything.
    fn ready(&self) -> bool;
    /// Complete the case against current channel state, or report that the
    /// readiness was stale.
    fn try_complete(&mut self) -> bool;
    fn register(&mut self, core: &Arc<SelectCore>, case: usize);
    fn deregister(&mut self);
    /// Map the stored outcome through the case's closure.
    fn finish(self: Box<Self>) -> R;
}

struct RecvArm<T, R> {
    chan: Channel<T>,
    cell: Arc<Mutex<Option<Option<T>>>>,
    f: Option<Box<dyn FnOnce(Option<T>) -> R + Send>>,
    ticket: Option<Ticket>,
}

impl<T: Send + 'static, R> Arm<R> for RecvArm<T, R> {
    fn ready(&self) -> bool {
        self.chan.recv_ready()
    }

    fn try_complete(&mut self) -> bool {
        match self.chan.try_recv_case() {
            Some(outcome) => {
                *self.cell.lock().unwrap() = Some(outcome);
                true
            }
            None => false,
        }
    }

    fn register(&mut self, core: &Arc<SelectCore>, case: usize) {
        let reg = SelectRecvReg {
            core: core.clone(),
            case,
            cell: self.cell.clone(),
        };
        self.ticket = self.chan.register_recv_case(reg);
    }

    fn deregister(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.chan.cancel_recv_case(ticket);
        }
    }

    fn finish(mut self: Box<Self>) -> R {
        let outcome = self
            .cell
            .lock()
            .unwrap()
            .take()
            .expect("select case finished without an outcome");
        let f = self.f.take().expect("select case finished twice");
        f(outcome)
    }
}

struct SendArm<T, R> {
    chan: Channel<T>,
    cell: Arc<Mutex<SendCaseCell<T>>>,
    f: Option<Box<dyn FnOnce(Result<(), SendError<T>>) -> R + Send>>,
    ticket: Option<Ticket>,
}

impl<T: Send + 'static, R> Arm<R> for SendArm<T, R> {
    fn ready(&self) -> bool {
        self.chan.send_ready()
    }

    fn try_complete(&mut self) -> bool {
        self.chan.try_send_case(&self.cell)
    }

    fn register(&mut self, core: &Arc<SelectCore>, case: usize) {
        let reg = SelectSendReg {
            core: core.clone(),
            case,
            cell: self.cell.clone(),
        };
        self.ticket = self.chan.register_send_case(reg);
    }

    fn deregister(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.chan.cancel_send_case(ticket);
        }
    }

    fn finish(mut self: Box<Self>) -> R {
        let outcome = self
            .cell
            .lock()
            .unwrap()
            .outcome
            .take()
            .expect("select case finished without an outcome");
        let f = self.f.take().expect("select case finished twice");
        f(outcome)
    }
}

/// Builder for one select. Each case carries a closure mapping its outcome
/// to the common result type.
///
/// ```ignore
/// let v = Select::new()
///     .recv(&inbox, |msg| msg.expect("inbox closed"))
///     .send(&out, reply, |r| { r.unwrap(); 0 })
///     .wait()
///     .await;
/// ```
pub struct Select<R> {
    arms: Vec<Box<dyn Arm<R>>>,
    default: Option<Box<dyn FnOnce() -> R + Send>>,
}

impl<R: Send + 'static> Select<R> {
    pub fn new() -> Self {
        Self {
            arms: Vec::new(),
            default: None,
        }
    }

    /// Add a receive case. The closure sees `None` when the channel is
    /// closed and drained.
    pub fn recv<T, F>(mut self, ch: &Channel<T>, f: F) -> Self
    where
        T: Send + 'static,
        F: FnOnce(Option<T>) -> R + Send + 'static,
    {
        self.arms.push(Box::new(RecvArm {
            chan: ch.clone(),
            cell: Arc::new(Mutex::new(None)),
            f: Some(Box::new(f)),
            ticket: None,
        }));
        self
    }

    /// Add a send case carrying `value`. If the case loses, the value is
    /// dropped with the select.
    pub fn send<T, F>(mut self, ch: &Channel<T>, value: T, f: F) -> Self
    where
        T: Send + 'static,
        F: FnOnce(Result<(), SendError<T>>) -> R + Send + 'static,
    {
        self.arms.push(Box::new(SendArm {
            chan: ch.clone(),
            cell: Arc::new(Mutex::new(SendCaseCell {
                value: Some(value),
                outcome: None,
            })),
            f: Some(Box::new(f)),
            ticket: None,
        }));
        self
    }

    /// Add the default case, taken when no other case is immediately
    /// ready. A select may have at most one.
    pub fn default_case<F>(mut self, f: F) -> Self
    where
        F: FnOnce() -> R + Send + 'static,
    {
        assert!(
            self.default.is_none(),
            "select already has a default case"
        );
        self.default = Some(Box::new(f));
        self
    }

    /// Evaluate the select. With no cases and no default this parks
    /// forever — the caller asked to wait on nothing.
    pub fn wait(self) -> SelectFuture<R> {
        let rng = seed(self.arms.as_ptr() as u64);
        SelectFuture {
            arms: self.arms,
            default: self.default,
            core: Arc::new(SelectCore::new()),
            rng,
            registered: false,
            resolved: false,
        }
    }
}

impl<R: Send + 'static> Default for Select<R> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SelectFuture<R> {
    arms: Vec<Box<dyn Arm<R>>>,
    default: Option<Box<dyn FnOnce() -> R + Send>>,
    core: Arc<SelectCore>,
    rng: u64,
    registered: bool,
    resolved: bool,
}

impl<R> Future for SelectFuture<R> {
    type Output = R;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<R> {
        let this = self.get_mut();

        if !this.registered {
            // Probe: complete an immediately-ready case, picking uniformly
            // at random when several qualify.
            loop {
                let ready: Vec<usize> = this
                    .arms
                    .iter()
                    .enumerate()
                    .filter(|(_, arm)| arm.ready())
                    .map(|(i, _)| i)
                    .collect();
                if ready.is_empty() {
                    break;
                }
                let pick = ready[(xorshift64(&mut this.rng) % ready.len() as u64) as usize];
                if this.arms[pick].try_complete() {
                    this.resolved = true;
                    return Poll::Ready(this.arms.swap_remove(pick).finish());
                }
                // Readiness evaporated (a stale registration was skimmed
                // off the peer queue); probe again.
            }

            if let Some(default) = this.default.take() {
                this.resolved = true;
                return Poll::Ready(default());
            }

            // Park. The waker is stored before registering so a peer that
            // fires mid-registration can already wake us.
            this.core.set_waker(cx.waker());
            for (case, arm) in this.arms.iter_mut().enumerate() {
                arm.register(&this.core, case);
            }
            this.registered = true;
            return Poll::Pending;
        }

        match this.core.winner() {
            Some(winner) => {
                // Tear down every remaining registration before resuming;
                // the winner's entry was consumed by the peer.
                for arm in this.arms.iter_mut() {
                    arm.deregister();
                }
                this.resolved = true;
                Poll::Ready(this.arms.swap_remove(winner).finish())
            }
            None => {
                this.core.set_waker(cx.waker());
                Poll::Pending
            }
        }
    }
}

impl<R> Drop for SelectFuture<R> {
    fn drop(&mut self) {
        if self.registered && !self.resolved {
            for arm in self.arms.iter_mut() {
                arm.deregister();
            }
        }
    }
}

fn seed(addr: u64) -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    (addr.wrapping_mul(0x9E3779B97F4A7C15) ^ nanos) | 1
}

/// Simple xorshift64 for random case selection.
fn xorshift64(state: &mut u64) -> u64 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    *state = x;
    x
}

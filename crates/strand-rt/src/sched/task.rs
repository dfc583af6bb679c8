// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Task representation: state machine and waker.
//!
//! Tasks are stackless coroutines. Suspension stores a waker instead of
//! switching stacks; resuming a task means re-enqueueing it on the ready
//! queue. State transitions go through an atomic so resume stays correct
//! when a wake arrives from an interrupt handler on another thread while
//! the task is mid-poll.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll, Wake, Waker};

use super::scheduler::Shared;

/// Task lifecycle states.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskState {
    /// Queued, waiting to be polled.
    Ready = 0,
    /// Currently being polled by the run loop.
    Running = 1,
    /// Parked on a channel, select, or yield — waiting for a resume.
    Waiting = 2,
    /// Finished execution.
    Complete = 3,
}

impl TaskState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Ready,
            1 => Self::Running,
            2 => Self::Waiting,
            _ => Self::Complete,
        }
    }
}

/// Type-erased future driven by the run loop. Spawned tasks produce `()`;
/// results travel over channels built by the caller.
pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// The task object owned by the scheduler and shared with wakers.
pub(crate) struct RawTask {
    id: u64,
    pub(crate) state: AtomicU8,
    future: Mutex<Option<BoxFuture>>,
    /// Re-enqueue target for resume. Weak so an abandoned runtime can drop.
    sched: Weak<Shared>,
}

impl std::fmt::Debug for RawTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawTask")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl RawTask {
    pub fn new(id: u64, future: BoxFuture, sched: Weak<Shared>) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: AtomicU8::new(TaskState::Ready as u8),
            future: Mutex::new(Some(future)),
            sched,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn mark_complete(&self) {
        self.state
            .store(TaskState::Complete as u8, Ordering::Release);
    }

    /// Make the task eligible to run again.
    ///
    /// Idempotent: resuming a task that is already Ready or Complete is a
    /// no-op, so racing wakeups (a peer operation and an interrupt firing
    /// for the same task) are harmless. A resume that lands while the task
    /// is mid-poll flips it back to Ready and the run loop re-enqueues it
    /// after the poll returns — a wakeup is never lost.
    pub fn resume(self: &Arc<Self>) {
        loop {
            match self.state() {
                TaskState::Waiting => {
                    if self
                        .state
                        .compare_exchange(
                            TaskState::Waiting as u8,
                            TaskState::Ready as u8,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        if let Some(sched) = self.sched.upgrade() {
                            sched.enqueue(self.clone());
                        }
                        return;
                    }
                }
                TaskState::Running => {
                    if self
                        .state
                        .compare_exchange(
                            TaskState::Running as u8,
                            TaskState::Ready as u8,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        return;
                    }
                }
                TaskState::Ready | TaskState::Complete => return,
            }
        }
    }

    /// Poll the future once. Returns true if the task completed.
    pub fn poll(self: &Arc<Self>) -> bool {
        let waker = Waker::from(self.clone());
        let mut cx = Context::from_waker(&waker);

        let mut fut_slot = self.future.lock().unwrap();
        let Some(fut) = fut_slot.as_mut() else {
            return true;
        };

        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                // Drop the future now that it's done.
                *fut_slot = None;
                true
            }
            Poll::Pending => false,
        }
    }
}

impl Wake for RawTask {
    fn wake(self: Arc<Self>) {
        self.resume();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.resume();
    }
}

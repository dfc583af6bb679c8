// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Cooperative single-threaded run loop.
//!
//! One task executes at a time; concurrency is interleaving at suspension
//! points (channel ops, select, yield). The run loop drives the ready queue
//! until the root future completes. Channel and task state still use
//! mutexes and CAS transitions, so the same contracts hold if the loop is
//! later split across worker threads.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll};

use crate::interrupt;

use super::handle::TaskHandle;
use super::queue::ReadyQueue;
use super::task::{RawTask, TaskState};

/// State shared between the run loop, task wakers, and interrupt handlers.
pub(crate) struct Shared {
    pub(crate) ready: ReadyQueue,
    /// Signals the idle run loop that an external resume landed.
    work_available: (Mutex<bool>, Condvar),
    next_task_id: AtomicU64,
}

impl Shared {
    /// Put a task on the ready queue and wake the run loop if it is parked.
    pub(crate) fn enqueue(&self, task: Arc<RawTask>) {
        self.ready.push(task);
        let (lock, cvar) = &self.work_available;
        let mut flag = lock.lock().unwrap();
        *flag = true;
        cvar.notify_one();
    }
}

/// Handle to the runtime. Cheap to clone; all clones share one scheduler.
pub struct Runtime {
    shared: Arc<Shared>,
}

impl Clone for Runtime {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                ready: ReadyQueue::new(),
                work_available: (Mutex::new(false), Condvar::new()),
                next_task_id: AtomicU64::new(1),
            }),
        }
    }

    /// Spawn a fire-and-forget task.
    ///
    /// The task carries no result slot; build a channel if the caller needs
    /// one. The returned handle is for identity, liveness queries, and
    /// wake-by-handle from interrupt handlers.
    pub fn spawn<F>(&self, future: F) -> TaskHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.shared.next_task_id.fetch_add(1, Ordering::Relaxed);
        let task = RawTask::new(id, Box::pin(future), Arc::downgrade(&self.shared));
        self.shared.enqueue(task.clone());
        TaskHandle::new(task)
    }

    /// Drive the run loop on the calling thread until `future` completes.
    ///
    /// Spawned tasks are interleaved cooperatively with the root. Returns as
    /// soon as the root completes; tasks still blocked at that point are
    /// abandoned. If nothing is runnable, the root is unfinished, and no
    /// interrupt handler is registered, every possible wake source is gone:
    /// panics with a deadlock diagnostic. With an interrupt handler present
    /// the loop parks instead and waits for an external resume.
    pub fn block_on<F>(&self, future: F) -> F::Output
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let result = Arc::new(Mutex::new(None));
        let slot = result.clone();
        let root = self.spawn(async move {
            *slot.lock().unwrap() = Some(future.await);
        });

        loop {
            while let Some(task) = self.shared.ready.pop() {
                run_task(&self.shared, task);
                if root.is_complete() {
                    return result
                        .lock()
                        .unwrap()
                        .take()
                        .expect("root task finished without storing its result");
                }
            }

            if !interrupt::any_registered() {
                panic!("deadlock: all tasks are blocked and no interrupt source is registered");
            }

            let (lock, cvar) = &self.shared.work_available;
            let mut flag = lock.lock().unwrap();
            while !*flag && self.shared.ready.is_empty() {
                flag = cvar.wait(flag).unwrap();
            }
            *flag = false;
        }
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll one task. Handles completion and the resume-during-poll race.
fn run_task(shared: &Arc<Shared>, task: Arc<RawTask>) {
    if task.state() == TaskState::Complete {
        return;
    }
    task.state
        .store(TaskState::Running as u8, Ordering::Release);

    let completed = task.poll();

    if completed {
        task.mark_complete();
        return;
    }

    // Pending: transition Running -> Waiting. If a resume landed during the
    // poll it flipped the state to Ready instead; re-enqueue so the wakeup
    // is not lost.
    if task
        .state
        .compare_exchange(
            TaskState::Running as u8,
            TaskState::Waiting as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .is_err()
    {
        shared.enqueue(task);
    }
}

/// Cooperatively give up the processor; the task goes to the back of the
/// ready queue and the next runnable task is scheduled.
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

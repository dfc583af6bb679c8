// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Task handle: identity, liveness, and wake-by-handle.
//!
//! Spawn is fire-and-forget, so the handle carries no result. Its job is to
//! let external code — an interrupt handler above all — resume a parked
//! task. `wake` is idempotent and callable from any thread.

use std::sync::Arc;

use super::task::{RawTask, TaskState};

/// Handle to a spawned task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    raw: Arc<RawTask>,
}

impl TaskHandle {
    pub(crate) fn new(raw: Arc<RawTask>) -> Self {
        Self { raw }
    }

    /// Opaque task identity.
    pub fn id(&self) -> u64 {
        self.raw.id()
    }

    /// Resume the task if it is parked.
    ///
    /// Waking a task that is already runnable or finished is a no-op, so a
    /// peer operation and an interrupt may race to wake the same task
    /// without harm. Never blocks beyond a short ready-queue push, which
    /// makes it usable from an interrupt handler's restricted context.
    pub fn wake(&self) {
        self.raw.resume();
    }

    /// True once the task function has returned.
    pub fn is_complete(&self) -> bool {
        self.raw.state() == TaskState::Complete
    }
}

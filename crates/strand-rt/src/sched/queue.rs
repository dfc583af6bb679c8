// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Ready queue for runnable tasks.
//!
//! Mutex-protected FIFO. The push side must also be safe from an interrupt
//! handler running on another thread, which only ever holds the lock for a
//! single push.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::task::RawTask;

pub(crate) struct ReadyQueue {
    queue: Mutex<VecDeque<Arc<RawTask>>>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, task: Arc<RawTask>) {
        self.queue.lock().unwrap().push_back(task);
    }

    pub fn pop(&self) -> Option<Arc<RawTask>> {
        self.queue.lock().unwrap().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }
}

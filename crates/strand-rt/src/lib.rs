// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Strand runtime core: cooperative tasks, channels, and select.
//!
//! Single-threaded cooperative multitasking for the strand language
//! runtime. Tasks are stackless coroutines scheduled by a run loop;
//! channels are the only inter-task communication primitive, with
//! rendezvous (capacity 0) and bounded-buffer semantics; select waits on
//! several channel operations and fires exactly one.
//!
//! Components:
//! - `sched`     — task state machine, ready queue, run loop, yield
//! - `channel`   — typed channels with close/drain semantics
//! - `select`    — multi-way select with claim-once resolution
//! - `interrupt` — static interrupt registration stub + wake hook

pub mod channel;
pub mod interrupt;
pub mod sched;
pub mod select;
mod waitq;

pub use channel::{Channel, CloseError, SendError, TryRecvError, TrySendError};
pub use sched::{yield_now, Runtime, TaskHandle};
pub use select::Select;

// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Hardware interrupt gateway stub.
//!
//! The runtime does not own interrupt delivery; the host does. What the
//! core needs is (a) a static, one-time registration surface and (b) a way
//! for a handler to resume a parked task, which is `TaskHandle::wake`.
//! Handlers are plain function pointers: the underlying hardware binding
//! is fixed at setup time, so a handler cannot close over task-local
//! state — anything it needs must live in statics.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use thiserror::Error;

/// Token passed to a handler identifying which interrupt fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupt {
    // Unexported so a handler cannot forge tokens for other lines.
    num: u32,
}

impl Interrupt {
    pub fn number(&self) -> u32 {
        self.num
    }
}

/// Interrupt handler. Runs in a restricted context: it may wake tasks and
/// close channels, but must not block.
pub type Handler = fn(Interrupt);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InterruptError {
    /// A handler is already bound to this interrupt number.
    #[error("interrupt {0} already has a handler")]
    AlreadyRegistered(u32),
    /// No handler is bound to this interrupt number.
    #[error("no handler registered for interrupt {0}")]
    Unknown(u32),
}

fn registry() -> &'static Mutex<HashMap<u32, Handler>> {
    static REGISTRY: OnceLock<Mutex<HashMap<u32, Handler>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Bind `handler` to interrupt `num`. One-time: rebinding is a programming
/// error, matching hardware vectors that are wired once at setup.
pub fn register(num: u32, handler: Handler) -> Result<Interrupt, InterruptError> {
    let mut handlers = registry().lock().unwrap();
    if handlers.contains_key(&num) {
        return Err(InterruptError::AlreadyRegistered(num));
    }
    handlers.insert(num, handler);
    Ok(Interrupt { num })
}

/// Deliver interrupt `num`: invoked by the host (or a test) when the
/// hardware line fires. The handler runs on the caller's thread, outside
/// the registry lock.
pub fn trigger(num: u32) -> Result<(), InterruptError> {
    let handler = registry()
        .lock()
        .unwrap()
        .get(&num)
        .copied()
        .ok_or(InterruptError::Unknown(num))?;
    handler(Interrupt { num });
    Ok(())
}

/// Whether any interrupt line is bound. An idle run loop with no bound
/// line has no remaining wake source and can report deadlock instead of
/// parking forever.
pub(crate) fn any_registered() -> bool {
    !registry().lock().unwrap().is_empty()
}

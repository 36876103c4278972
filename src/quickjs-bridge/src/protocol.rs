//! The single-slot state machine deciding who may drive an engine.
//!
//! ```text
//! Idle ──claim──▶ Host ──enter_foreign──▶ Foreign ──enter_callback──▶ Callback
//!                                                                        │
//!                                        Host ◀──claim (same thread)─────┘
//! ```
//!
//! Every transition returns a guard that puts the previous phase back, so the slot unwinds
//! correctly on every exit path. Misuse is reported, never waited on: a second thread
//! finding the engine busy gets [`Error::Protocol`] instead of blocking on the runtime lock
//! while it may be holding the host's own lock.

use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use rquickjs::{Persistent, Value, qjs};

use crate::error::{Error, Result};

/// A context pointer published while script code is paused inside a host callable.
#[derive(Clone, Copy)]
pub(crate) struct RawCtx(pub(crate) NonNull<qjs::JSContext>);

// SAFETY:
// The pointer is only dereferenced by the thread recorded next to it in `Phase::Callback`,
// which is the thread holding the runtime lock at that moment.
unsafe impl Send for RawCtx {}

#[derive(Clone, Copy)]
enum Phase {
    Idle,
    Host(ThreadId),
    Foreign(ThreadId),
    Callback(ThreadId, RawCtx),
}

/// A script value waiting for the engine to become quiet before it can be released.
pub(crate) struct Deferred(#[allow(dead_code)] Persistent<Value<'static>>);

// SAFETY:
// A deferred value is only moved while queued. It is dropped by `Claim::settle` or by the
// engine's destructor, both of which run with the runtime lock held.
unsafe impl Send for Deferred {}

struct SlotState {
    phase: Phase,
    deferred: Vec<Deferred>,
}

pub(crate) struct Slot {
    state: Mutex<SlotState>,
}

/// How a claim gets hold of a context.
pub(crate) enum Entry {
    /// Nobody holds the runtime, lock it.
    Fresh,
    /// This thread is paused in a host callable and already holds the runtime.
    Nested(RawCtx),
}

impl Slot {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                phase: Phase::Idle,
                deferred: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the slot for host-driven work on the current thread.
    pub(crate) fn claim(&self) -> Result<Claim<'_>> {
        let mut state = self.lock();
        let me = thread::current().id();
        let entry = match state.phase {
            Phase::Idle => Entry::Fresh,
            Phase::Callback(owner, ctx) if owner == me => Entry::Nested(ctx),
            Phase::Host(owner) | Phase::Foreign(owner) | Phase::Callback(owner, _)
                if owner == me =>
            {
                return Err(Error::protocol(
                    "engine re-entered while it is already running on this thread",
                ));
            }
            _ => return Err(Error::protocol("engine is busy on another thread")),
        };
        let previous = std::mem::replace(&mut state.phase, Phase::Host(me));
        Ok(Claim {
            slot: self,
            previous: Some(previous),
            entry: Some(entry),
        })
    }

    /// Claim the slot to release `value`, or queue it when the engine is busy.
    pub(crate) fn claim_or_defer(
        &self,
        value: Persistent<Value<'static>>,
    ) -> Option<(Claim<'_>, Persistent<Value<'static>>)> {
        let mut state = self.lock();
        let me = thread::current().id();
        let entry = match state.phase {
            Phase::Idle => Entry::Fresh,
            Phase::Callback(owner, ctx) if owner == me => Entry::Nested(ctx),
            _ => {
                state.deferred.push(Deferred(value));
                return None;
            }
        };
        let previous = std::mem::replace(&mut state.phase, Phase::Host(me));
        Some((
            Claim {
                slot: self,
                previous: Some(previous),
                entry: Some(entry),
            },
            value,
        ))
    }

    /// Host → Foreign: script code is about to run.
    pub(crate) fn enter_foreign(&self) -> Result<PhaseGuard<'_>> {
        let mut state = self.lock();
        let me = thread::current().id();
        match state.phase {
            Phase::Host(owner) if owner == me => {
                let previous = std::mem::replace(&mut state.phase, Phase::Foreign(me));
                Ok(PhaseGuard {
                    slot: self,
                    previous,
                })
            }
            _ => Err(Error::protocol(
                "script execution started without holding the engine",
            )),
        }
    }

    /// Foreign → Callback: script code called a host callable.
    pub(crate) fn enter_callback(&self, ctx: NonNull<qjs::JSContext>) -> Result<PhaseGuard<'_>> {
        let mut state = self.lock();
        let me = thread::current().id();
        match state.phase {
            Phase::Foreign(owner) | Phase::Host(owner) if owner == me => {
                let previous =
                    std::mem::replace(&mut state.phase, Phase::Callback(me, RawCtx(ctx)));
                Ok(PhaseGuard {
                    slot: self,
                    previous,
                })
            }
            _ => Err(Error::protocol(
                "host callable invoked outside of script execution",
            )),
        }
    }

    /// Everything still queued, for teardown.
    pub(crate) fn take_deferred(&self) -> Vec<Deferred> {
        std::mem::take(&mut self.lock().deferred)
    }

    #[cfg(test)]
    fn is_idle(&self) -> bool {
        matches!(self.lock().phase, Phase::Idle)
    }
}

/// Exclusive use of the engine by the current thread.
pub(crate) struct Claim<'a> {
    slot: &'a Slot,
    previous: Option<Phase>,
    entry: Option<Entry>,
}

impl Claim<'_> {
    pub(crate) fn take_entry(&mut self) -> Entry {
        self.entry.take().unwrap_or(Entry::Fresh)
    }

    /// Release queued values, then give the slot back.
    ///
    /// Must be called while the runtime lock is still held. Restoring the phase happens
    /// under the same slot lock that observed an empty queue, so nothing queued by another
    /// thread can be stranded.
    pub(crate) fn settle(mut self) {
        loop {
            let batch = {
                let mut state = self.slot.lock();
                if state.deferred.is_empty() {
                    if let Some(previous) = self.previous.take() {
                        state.phase = previous;
                    }
                    return;
                }
                std::mem::take(&mut state.deferred)
            };
            tracing::debug!(count = batch.len(), "releasing deferred values");
            drop(batch);
        }
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.slot.lock().phase = previous;
        }
    }
}

/// Puts the previous phase back when dropped.
pub(crate) struct PhaseGuard<'a> {
    slot: &'a Slot,
    previous: Phase,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.slot.lock().phase = self.previous;
    }
}

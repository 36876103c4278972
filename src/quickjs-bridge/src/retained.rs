use std::fmt;
use std::mem::ManuallyDrop;

use rquickjs::{Persistent, Value};

use crate::engine::Engine;
use crate::host::Host;

/// A script value kept alive outside of any [`Scope`](crate::Scope).
///
/// Holding a `Retained` keeps its engine alive. Dropping it releases the value under the
/// runtime lock, immediately when the engine is free and at the next quiet point otherwise.
pub struct Retained<H: Host> {
    value: ManuallyDrop<Persistent<Value<'static>>>,
    engine: Engine<H>,
}

// SAFETY:
// `Persistent` is not `Send` because it holds raw engine pointers. A `Retained` only
// touches them through `Scope::restore` (which requires the engine's runtime lock) and
// through `Engine::release` on drop (which claims the engine or queues the value for a
// thread that holds the lock). The value is never accessed without that lock.
unsafe impl<H: Host> Send for Retained<H> {}
unsafe impl<H: Host> Sync for Retained<H> {}

impl<H: Host> Retained<H> {
    pub(crate) fn new(engine: Engine<H>, value: Persistent<Value<'static>>) -> Self {
        Self {
            value: ManuallyDrop::new(value),
            engine,
        }
    }

    /// The engine owning this value.
    pub fn engine(&self) -> &Engine<H> {
        &self.engine
    }

    pub(crate) fn persistent(&self) -> &Persistent<Value<'static>> {
        &self.value
    }
}

impl<H: Host> Drop for Retained<H> {
    fn drop(&mut self) {
        // SAFETY: the value is taken exactly once, here.
        let value = unsafe { ManuallyDrop::take(&mut self.value) };
        self.engine.release(value);
    }
}

impl<H: Host> fmt::Debug for Retained<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retained").finish_non_exhaustive()
    }
}

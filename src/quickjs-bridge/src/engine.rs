use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use rquickjs::{Context, Ctx, Persistent, Runtime, Value};
use tracing::instrument;

use crate::clock::{InterruptClock, budget_from_secs};
use crate::error::{Error, Result};
use crate::host::Host;
use crate::metrics::{EngineMetricsGuard, METRIC_DEFERRED_RELEASES};
use crate::protocol::{Claim, Entry, Slot};
use crate::registry::{CallableId, Registry};
use crate::scope::Scope;
use crate::stats::MemoryStats;

pub(crate) struct EngineInner<H: Host> {
    // field order is teardown order: context, runtime, then the retained callables
    context: Context,
    _runtime: Runtime,
    pub(crate) host: H,
    pub(crate) slot: Slot,
    registry: Mutex<Registry<H::Callable>>,
    pub(crate) clock: Arc<InterruptClock>,
    _metrics: EngineMetricsGuard,
}

/// One QuickJS runtime and context, driven on behalf of a [`Host`].
///
/// `Engine` is a cheap handle; clones refer to the same engine, which is torn down when the
/// last handle (including every [`Retained`](crate::Retained) value) is gone.
pub struct Engine<H: Host> {
    pub(crate) inner: Arc<EngineInner<H>>,
}

impl<H: Host> Clone for Engine<H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<H: Host> Engine<H> {
    pub(crate) fn from_parts(
        runtime: Runtime,
        context: Context,
        host: H,
        clock: Arc<InterruptClock>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                context,
                _runtime: runtime,
                host,
                slot: Slot::new(),
                registry: Mutex::new(Registry::new()),
                clock,
                _metrics: EngineMetricsGuard::new(),
            }),
        }
    }

    /// Run `f` with exclusive use of the engine.
    ///
    /// Called from inside a host callable on the same thread, `f` runs on the paused
    /// context. Any other concurrent use fails with [`Error::Protocol`].
    pub fn enter<R>(&self, f: impl for<'js> FnOnce(&Scope<'js, H>) -> R) -> Result<R> {
        let claim = self.inner.slot.claim()?;
        Ok(self.run_claimed(claim, |ctx| f(&Scope::new(self.clone(), ctx))))
    }

    fn run_claimed<R>(&self, mut claim: Claim<'_>, f: impl for<'js> FnOnce(Ctx<'js>) -> R) -> R {
        match claim.take_entry() {
            Entry::Fresh => self.inner.context.with(|ctx| {
                let out = f(ctx);
                claim.settle();
                out
            }),
            Entry::Nested(raw) => {
                // SAFETY: the slot recorded this context for the current thread while it
                // holds the runtime lock inside a host callable.
                let ctx = unsafe { Ctx::from_raw(raw.0) };
                let out = f(ctx);
                claim.settle();
                out
            }
        }
    }

    pub(crate) fn release(&self, value: Persistent<Value<'static>>) {
        match self.inner.slot.claim_or_defer(value) {
            Some((claim, value)) => self.run_claimed(claim, move |_ctx| drop(value)),
            None => {
                tracing::debug!("engine busy, deferring value release");
                metrics::counter!(METRIC_DEFERRED_RELEASES).increment(1);
            }
        }
    }

    /// The host this engine was built with.
    pub fn host(&self) -> &H {
        &self.inner.host
    }

    /// Whether both handles refer to the same engine.
    pub fn same_engine(&self, other: &Engine<H>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Limit each stretch of script execution to `secs` seconds of CPU time.
    ///
    /// A negative (or non-finite) value removes the limit. While a limit is set, script
    /// code cannot call host callables.
    #[instrument(skip(self), level = "debug")]
    pub fn set_time_limit(&self, secs: f64) {
        self.inner.clock.set_limit(budget_from_secs(secs));
    }

    /// The configured time limit.
    pub fn time_limit(&self) -> Option<Duration> {
        self.inner.clock.limit()
    }

    /// Set the engine's allocation limit in bytes, 0 for none.
    pub fn set_memory_limit(&self, bytes: usize) -> Result<()> {
        self.enter(|scope| scope.set_memory_limit(bytes))
    }

    /// Set the engine's stack limit in bytes, 0 for none.
    pub fn set_max_stack_size(&self, bytes: usize) -> Result<()> {
        self.enter(|scope| scope.set_max_stack_size(bytes))
    }

    /// Snapshot of the engine's memory counters.
    pub fn memory_stats(&self) -> Result<MemoryStats> {
        self.enter(|scope| scope.memory_stats())
    }

    /// Run a full garbage collection cycle.
    pub fn collect_garbage(&self) -> Result<()> {
        self.enter(|scope| scope.collect_garbage())
    }

    fn registry(&self) -> MutexGuard<'_, Registry<H::Callable>> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Retain `callable` and hand back its id plus a ticket identifying this very entry.
    pub(crate) fn retain_callable(
        &self,
        name: &str,
        callable: H::Callable,
    ) -> Result<(CallableId, Weak<H::Callable>)> {
        let mut registry = self.registry();
        let id = registry
            .insert(name.to_string(), callable)
            .ok_or(Error::CallableSlotsExhausted)?;
        let ticket = registry
            .get(id)
            .map(|entry| Arc::downgrade(&entry.callable))
            .unwrap_or_default();
        drop(registry);
        tracing::debug!(name, id = id.get(), "retained host callable");
        Ok((id, ticket))
    }

    /// The entry at `id`, provided it is still the one `ticket` was issued for.
    pub(crate) fn callable(
        &self,
        id: CallableId,
        ticket: &Weak<H::Callable>,
    ) -> Option<(String, Arc<H::Callable>)> {
        self.registry()
            .get(id)
            .filter(|entry| entry.is(ticket))
            .map(|entry| (entry.name.clone(), entry.callable.clone()))
    }

    pub(crate) fn forget_callable(&self, id: CallableId, ticket: &Weak<H::Callable>) {
        let entry = {
            let mut registry = self.registry();
            match registry.get(id) {
                Some(entry) if entry.is(ticket) => registry.remove(id),
                _ => None,
            }
        };
        if let Some(entry) = entry {
            tracing::debug!(name = entry.name, id = id.get(), "released host callable");
        }
    }

    /// Number of callables currently retained for script code.
    pub fn callable_count(&self) -> usize {
        self.registry().len()
    }

    /// Visit every retained callable.
    ///
    /// Does nothing if the registry is in use, so this is safe to call from a garbage
    /// collector's traversal.
    pub fn visit_callables<E>(
        &self,
        mut visit: impl FnMut(&H::Callable) -> std::result::Result<(), E>,
    ) -> std::result::Result<(), E> {
        let Ok(registry) = self.inner.registry.try_lock() else {
            return Ok(());
        };
        registry.callables().try_for_each(&mut visit)
    }

    /// Drop every retained callable.
    ///
    /// Script functions still referring to a dropped callable throw when called.
    pub fn clear_callables(&self) {
        let drained = self.registry().drain();
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "cleared host callables");
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<EngineInner<H>> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<EngineInner<H>>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }
}

impl<H: Host> Drop for EngineInner<H> {
    fn drop(&mut self) {
        let deferred = self.slot.take_deferred();
        if !deferred.is_empty() {
            self.context.with(|_ctx| drop(deferred));
        }
        tracing::info!("tearing down engine");
    }
}

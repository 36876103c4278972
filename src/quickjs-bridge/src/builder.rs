use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use rquickjs::{Context, Runtime};
use tracing::instrument;

use crate::clock::InterruptClock;
use crate::engine::Engine;
use crate::host::Host;

/// A builder for an [`Engine`]
#[derive(Debug, Clone, Default)]
pub struct EngineBuilder {
    memory_limit: Option<usize>,
    max_stack_size: Option<usize>,
    gc_threshold: Option<usize>,
    time_limit: Option<Duration>,
}

impl EngineBuilder {
    /// Create a new EngineBuilder with the engine's own defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the allocation limit in bytes.
    /// Allocations beyond it fail with an out of memory exception.
    /// 0 means no limit.
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Set the stack limit in bytes.
    /// If this value is too small then scripts will fail with a stack overflow error.
    /// 0 means no limit.
    pub fn with_max_stack_size(mut self, bytes: usize) -> Self {
        self.max_stack_size = Some(bytes);
        self
    }

    /// Set the number of allocated bytes that triggers a garbage collection cycle.
    pub fn with_gc_threshold(mut self, bytes: usize) -> Self {
        self.gc_threshold = Some(bytes);
        self
    }

    /// Set the CPU time each stretch of script execution may use.
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    /// Build the engine for `host`.
    #[instrument(skip_all, level = "info")]
    pub fn build<H: Host>(self, host: H) -> anyhow::Result<Engine<H>> {
        let runtime = Runtime::new().context("Unable to initialize QuickJS runtime")?;
        let context = Context::full(&runtime).context("Unable to create QuickJS context")?;

        if let Some(bytes) = self.memory_limit {
            runtime.set_memory_limit(bytes);
        }
        if let Some(bytes) = self.max_stack_size {
            runtime.set_max_stack_size(bytes);
        }
        if let Some(bytes) = self.gc_threshold {
            runtime.set_gc_threshold(bytes);
        }

        let clock = Arc::new(InterruptClock::default());
        clock.set_limit(self.time_limit);
        let handler_clock = clock.clone();
        runtime.set_interrupt_handler(Some(Box::new(move || handler_clock.poll())));

        tracing::info!(
            memory_limit = self.memory_limit,
            max_stack_size = self.max_stack_size,
            time_limit_ms = self.time_limit.map(|t| t.as_millis() as u64),
            "created engine"
        );

        Ok(Engine::from_parts(runtime, context, host, clock))
    }
}

/*!
This module contains the definitions and implementations of the metrics emitted by engines
*/

use tracing::{Level, instrument};

// Gauge, live engines
static METRIC_ACTIVE_ENGINES: &str = "active_quickjs_engines";

// Counter, total engines created during the lifetime of the process
static METRIC_TOTAL_ENGINES: &str = "quickjs_engines_total";

// Counters, calls from script code into host callables
pub(crate) static METRIC_HOST_CALLS: &str = "host_calls_total";
pub(crate) static METRIC_HOST_CALL_FAILURES: &str = "host_call_failures_total";
pub(crate) static METRIC_CALLABLE_NAME: &str = "callable_name";

// Counter, executions stopped by the time limit
pub(crate) static METRIC_TIME_LIMIT_INTERRUPTS: &str = "time_limit_interrupts_total";

// Counter, values whose release had to wait for the engine to become quiet
pub(crate) static METRIC_DEFERRED_RELEASES: &str = "deferred_releases_total";

/// Keeps the engine gauge up while alive.
pub(crate) struct EngineMetricsGuard(());

impl EngineMetricsGuard {
    #[instrument(skip_all, level=Level::DEBUG)]
    pub(crate) fn new() -> Self {
        metrics::gauge!(METRIC_ACTIVE_ENGINES).increment(1);
        metrics::counter!(METRIC_TOTAL_ENGINES).increment(1);
        Self(())
    }
}

impl Drop for EngineMetricsGuard {
    #[instrument(skip_all, level=Level::DEBUG)]
    fn drop(&mut self) {
        metrics::gauge!(METRIC_ACTIVE_ENGINES).decrement(1);
    }
}

//! The time-limit clock consulted by the engine's interrupt handler.
//!
//! The clock is armed for every stretch of script execution when a limit is configured and
//! disarmed when control returns. The interrupt handler is a pure function of the CPU time
//! the driving thread spent since arming, compared against the budget.

mod cpu_time;

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cpu_time::ThreadCpuHandle;

use crate::metrics::METRIC_TIME_LIMIT_INTERRUPTS;

/// Convert a time limit in seconds into a budget. Negative or non-finite values disable it.
pub(crate) fn budget_from_secs(secs: f64) -> Option<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(secs).ok()
}

struct Armed {
    handle: ThreadCpuHandle,
    start: u64,
    deadline: u64,
    budget: Duration,
    fired: bool,
}

#[derive(Default)]
pub(crate) struct InterruptClock {
    limit: Mutex<Option<Duration>>,
    armed: Mutex<Option<Armed>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InterruptClock {
    pub(crate) fn set_limit(&self, limit: Option<Duration>) {
        *lock(&self.limit) = limit;
    }

    pub(crate) fn limit(&self) -> Option<Duration> {
        *lock(&self.limit)
    }

    /// Start measuring against the configured limit until the returned guard is dropped.
    pub(crate) fn arm(&self) -> ArmGuard<'_> {
        let armed = self.limit().and_then(|budget| {
            let Some(handle) = ThreadCpuHandle::for_current_thread() else {
                tracing::warn!("thread CPU clock unavailable, time limit not enforced");
                return None;
            };
            let start = handle.elapsed()?;
            let deadline = start.saturating_add(handle.ticks_for(budget));
            Some(Armed {
                handle,
                start,
                deadline,
                budget,
                fired: false,
            })
        });
        let previous = std::mem::replace(&mut *lock(&self.armed), armed);
        ArmGuard {
            clock: self,
            previous: Some(previous),
        }
    }

    /// Whether script execution must be interrupted now.
    pub(crate) fn poll(&self) -> bool {
        let mut armed = lock(&self.armed);
        let Some(armed) = armed.as_mut() else {
            return false;
        };
        if armed.fired {
            return true;
        }

        let Some(current) = armed.handle.elapsed() else {
            tracing::error!("Failed to read CPU time, interrupting execution (fail-closed)");
            armed.fired = true;
            return true;
        };

        if current >= armed.deadline {
            armed.fired = true;
            let elapsed_ms = current.saturating_sub(armed.start) / 1_000_000;
            tracing::warn!(
                cpu_elapsed_ms = elapsed_ms,
                cpu_timeout_ms = armed.budget.as_millis() as u64,
                "CPU time limit exceeded, interrupting execution"
            );
            metrics::counter!(METRIC_TIME_LIMIT_INTERRUPTS).increment(1);
            return true;
        }
        false
    }
}

/// Restores the previous arming state of an [`InterruptClock`] when dropped.
pub(crate) struct ArmGuard<'a> {
    clock: &'a InterruptClock,
    previous: Option<Option<Armed>>,
}

impl Drop for ArmGuard<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            *lock(&self.clock.armed) = previous;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn burn_cpu_for(duration: Duration) {
        let start = Instant::now();
        let mut x = 0u64;
        while start.elapsed() < duration {
            x = std::hint::black_box(x.wrapping_add(1));
        }
    }

    #[test]
    fn negative_and_non_finite_limits_disable() {
        assert_eq!(budget_from_secs(-1.0), None);
        assert_eq!(budget_from_secs(f64::NAN), None);
        assert_eq!(budget_from_secs(f64::INFINITY), None);
        assert_eq!(budget_from_secs(0.0), Some(Duration::ZERO));
        assert_eq!(budget_from_secs(0.5), Some(Duration::from_millis(500)));
    }

    #[test]
    fn unarmed_clock_never_interrupts() {
        let clock = InterruptClock::default();
        assert!(!clock.poll());
        let _armed = clock.arm();
        assert!(!clock.poll());
    }

    #[test]
    fn zero_budget_interrupts_immediately() {
        let clock = InterruptClock::default();
        clock.set_limit(Some(Duration::ZERO));
        let _armed = clock.arm();
        assert!(clock.poll());
    }

    #[test]
    fn interrupts_once_budget_is_spent() {
        let clock = InterruptClock::default();
        clock.set_limit(Some(Duration::from_millis(20)));
        {
            let _armed = clock.arm();
            assert!(!clock.poll());
            burn_cpu_for(Duration::from_millis(60));
            assert!(clock.poll());
        }
        // disarmed again once the guard is gone
        assert!(!clock.poll());
    }

    #[test]
    fn nested_arming_restores_outer_state() {
        let clock = InterruptClock::default();
        clock.set_limit(Some(Duration::ZERO));
        let outer = clock.arm();
        clock.set_limit(None);
        {
            let _inner = clock.arm();
            assert!(!clock.poll());
        }
        assert!(clock.poll());
        drop(outer);
        assert!(!clock.poll());
    }
}

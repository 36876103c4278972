//! Per-thread CPU time readings.
//!
//! Measures actual CPU execution time of the thread driving the engine rather than
//! wall-clock time, so a script is only charged for the time it spends computing.
//!
//! # Platform Support
//!
//! - **Linux**: Uses `pthread_getcpuclockid` and `clock_gettime` (nanosecond precision)
//! - **Elsewhere**: Falls back to a monotonic wall clock

use std::time::Duration;
#[cfg(not(target_os = "linux"))]
use std::time::Instant;

/// Handle for reading the CPU time of the thread that created it.
///
/// Ticks are nanoseconds on every platform.
#[cfg(target_os = "linux")]
pub(crate) struct ThreadCpuHandle {
    clock_id: libc::clockid_t,
}

#[cfg(target_os = "linux")]
impl ThreadCpuHandle {
    /// Create a handle for the current thread's CPU time.
    pub(crate) fn for_current_thread() -> Option<Self> {
        use libc::{pthread_getcpuclockid, pthread_self};

        let thread_id = unsafe { pthread_self() };
        let mut clock_id: libc::clockid_t = 0;

        let result = unsafe { pthread_getcpuclockid(thread_id, &mut clock_id) };
        if result != 0 {
            return None;
        }

        Some(Self { clock_id })
    }

    /// Get the CPU ticks consumed by the thread so far.
    pub(crate) fn elapsed(&self) -> Option<u64> {
        use libc::{clock_gettime, timespec};

        let mut ts = timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };

        let result = unsafe { clock_gettime(self.clock_id, &mut ts) };
        if result != 0 {
            return None;
        }

        Some((ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64))
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) struct ThreadCpuHandle {
    origin: Instant,
}

#[cfg(not(target_os = "linux"))]
impl ThreadCpuHandle {
    pub(crate) fn for_current_thread() -> Option<Self> {
        Some(Self {
            origin: Instant::now(),
        })
    }

    pub(crate) fn elapsed(&self) -> Option<u64> {
        u64::try_from(self.origin.elapsed().as_nanos()).ok()
    }
}

impl ThreadCpuHandle {
    /// Convert a `Duration` budget into ticks.
    pub(crate) fn ticks_for(&self, budget: Duration) -> u64 {
        u64::try_from(budget.as_nanos()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_cpu_handle_for_current_thread() {
        let handle = ThreadCpuHandle::for_current_thread();
        assert!(handle.is_some(), "Should be able to get CPU handle");
    }

    #[test]
    fn test_thread_cpu_handle_elapsed() {
        let handle = ThreadCpuHandle::for_current_thread().unwrap();
        let t1 = handle.elapsed().unwrap();

        // burn some CPU
        let mut x = 0u64;
        for i in 0..1_000_000 {
            x = x.wrapping_add(i);
        }
        std::hint::black_box(x);

        let t2 = handle.elapsed().unwrap();
        assert!(t2 >= t1, "CPU time should not go backwards");
    }

    #[test]
    fn test_ticks_for_saturates() {
        let handle = ThreadCpuHandle::for_current_thread().unwrap();
        assert_eq!(handle.ticks_for(Duration::from_millis(10)), 10_000_000);
        assert_eq!(handle.ticks_for(Duration::MAX), u64::MAX);
    }
}

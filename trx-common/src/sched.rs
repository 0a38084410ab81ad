//! Realtime priming for the audio loops
//!
//! The loops are paced by the audio device and must not be preempted by
//! ordinary time-shared work. Running them without a fixed-priority class
//! is a configuration error, not a degraded mode.

use crate::error::StartupError;

/// Priority requested for the real-time loops
pub const REALTIME_PRIORITY: i32 = 80;

/// Move the calling thread into the FIFO real-time scheduling class
///
/// # Arguments
/// * `priority` - Fixed priority within the class
///
/// # Returns
/// * `Ok(())` - Thread is now scheduled `SCHED_FIFO`
/// * `Err(StartupError::InvalidPriority)` - Priority outside the class range
/// * `Err(StartupError::Realtime)` - Scheduler refused (usually privilege)
#[cfg(target_os = "linux")]
pub fn go_realtime(priority: i32) -> Result<(), StartupError> {
    use std::io;

    use tracing::info;

    // SAFETY: pure query, no pointers involved
    let max = unsafe { libc::sched_get_priority_max(libc::SCHED_FIFO) };
    if max == -1 {
        return Err(StartupError::Realtime(io::Error::last_os_error()));
    }
    // SAFETY: pure query, no pointers involved
    let min = unsafe { libc::sched_get_priority_min(libc::SCHED_FIFO) };

    if priority > max || priority < min {
        return Err(StartupError::InvalidPriority { priority, max });
    }

    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: pid 0 is the calling thread; `param` outlives the call
    let rc = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if rc == -1 {
        return Err(StartupError::Realtime(io::Error::last_os_error()));
    }

    info!(priority, "realtime scheduling enabled");
    Ok(())
}

/// Fixed-priority scheduling is only wired up for Linux
#[cfg(not(target_os = "linux"))]
pub fn go_realtime(_priority: i32) -> Result<(), StartupError> {
    Err(StartupError::Realtime(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "SCHED_FIFO is not available on this platform",
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_os = "linux")]
    #[test]
    fn test_priority_above_max_rejected() {
        let result = go_realtime(1000);
        assert!(matches!(
            result,
            Err(StartupError::InvalidPriority { priority: 1000, .. })
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_negative_priority_rejected() {
        assert!(matches!(
            go_realtime(-5),
            Err(StartupError::InvalidPriority { priority: -5, .. })
        ));
    }

    #[test]
    fn test_default_priority_in_fifo_range() {
        assert!((1..=99).contains(&REALTIME_PRIORITY));
    }
}

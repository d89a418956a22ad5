//! Real-time scheduling for the mixing thread
//!
//! Linux only, behind the `realtime-priority` feature (needs `CAP_SYS_NICE`
//! or an rtprio limit). Failure is never fatal: the engine keeps running at
//! normal priority.

/// Outcome of a priority elevation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityResult {
    Success,
    /// The platform refused (missing privileges)
    Failed,
    /// Not available on this platform or build
    Unsupported,
}

/// Elevate the calling thread to a real-time scheduling class
pub fn set_realtime_priority() -> PriorityResult {
    let result = platform_set_priority();
    match result {
        PriorityResult::Success => log::info!("Mixing thread elevated to real-time priority"),
        PriorityResult::Failed => {
            log::warn!("Failed to set real-time priority for the mixing thread (non-fatal)")
        }
        PriorityResult::Unsupported => log::debug!("Real-time priority not supported here"),
    }
    result
}

#[cfg(all(target_os = "linux", feature = "realtime-priority"))]
fn platform_set_priority() -> PriorityResult {
    use libc::{pthread_self, pthread_setschedparam, sched_param, SCHED_FIFO, SCHED_RR};

    // Scoped to this thread; other threads keep their policy
    let thread = unsafe { pthread_self() };

    let mut param = sched_param { sched_priority: 80 };
    if unsafe { pthread_setschedparam(thread, SCHED_FIFO, &param) } == 0 {
        return PriorityResult::Success;
    }
    log::debug!("SCHED_FIFO refused, trying SCHED_RR");

    param.sched_priority = 70;
    let result = unsafe { pthread_setschedparam(thread, SCHED_RR, &param) };
    if result == 0 {
        PriorityResult::Success
    } else {
        log::debug!("Real-time scheduling refused (errno: {})", result);
        PriorityResult::Failed
    }
}

#[cfg(not(all(target_os = "linux", feature = "realtime-priority")))]
fn platform_set_priority() -> PriorityResult {
    PriorityResult::Unsupported
}

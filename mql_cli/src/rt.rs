//! Real-time scheduling helpers (Linux SCHED_FIFO + mlockall; macOS mlockall).
//!
//! The pulse pacer times STEP edges from userspace, so page faults and
//! preemption show up directly as pulse jitter. `--rt` locks the address
//! space into RAM and, on Linux, raises the process to SCHED_FIFO.

use crate::cli::RtLock;

/// Apply the requested real-time setup once per process. Failures degrade
/// to warnings; the controller still runs, just with best-effort timing.
#[cfg(any(target_os = "linux", target_os = "macos"))]
pub fn setup_rt_once(rt: bool, prio: Option<i32>, lock: RtLock) {
    use std::sync::OnceLock;
    static RT_ONCE: OnceLock<()> = OnceLock::new();

    if !rt {
        return;
    }

    RT_ONCE.get_or_init(|| {
        match try_apply_mem_lock(lock) {
            Ok(()) => tracing::info!(?lock, "memory lock applied"),
            Err(err) => tracing::warn!(error = %err, "mlockall failed"),
        }

        #[cfg(target_os = "linux")]
        match try_apply_fifo_priority(prio) {
            Ok(applied) => tracing::info!(prio = applied, "SCHED_FIFO applied"),
            Err(err) => tracing::warn!(error = %err, "SCHED_FIFO not applied"),
        }
        #[cfg(target_os = "macos")]
        {
            let _ = prio;
            tracing::warn!("macOS does not support SCHED_FIFO; only mlockall applied");
        }
    });
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn setup_rt_once(rt: bool, _prio: Option<i32>, _lock: RtLock) {
    if rt {
        tracing::warn!("real-time setup is not supported on this OS");
    }
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn try_apply_mem_lock(lock: RtLock) -> eyre::Result<()> {
    use libc::{MCL_CURRENT, MCL_FUTURE, mlockall};

    #[inline]
    fn is_retryable(err: &std::io::Error) -> bool {
        matches!(err.raw_os_error(), Some(code) if code == libc::EPERM || code == libc::ENOMEM)
    }

    #[inline]
    fn lock_flags(flags: libc::c_int) -> std::io::Result<()> {
        if unsafe { mlockall(flags) } != 0 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    let result = match lock {
        RtLock::None => return Ok(()),
        RtLock::Current => lock_flags(MCL_CURRENT),
        RtLock::All => lock_flags(MCL_CURRENT | MCL_FUTURE),
    };
    let Err(err) = result else {
        return Ok(());
    };

    // All can exceed the memlock limit where Current still fits.
    if lock == RtLock::All && is_retryable(&err) && lock_flags(MCL_CURRENT).is_ok() {
        tracing::warn!("mlockall(all) denied; fell back to locking current pages");
        return Ok(());
    }

    if is_retryable(&err) {
        eyre::bail!("{err}; needs CAP_IPC_LOCK (or root) and sufficient 'ulimit -l'");
    }
    Err(err.into())
}

/// Apply SCHED_FIFO at the requested priority, clamped to the system range.
/// Returns the priority actually set.
#[cfg(target_os = "linux")]
fn try_apply_fifo_priority(prio: Option<i32>) -> eyre::Result<i32> {
    use libc::{
        SCHED_FIFO, sched_get_priority_max, sched_get_priority_min, sched_param,
        sched_setscheduler,
    };

    let (min, max) = unsafe {
        let min = sched_get_priority_min(SCHED_FIFO);
        let max = sched_get_priority_max(SCHED_FIFO);
        if min < 0 || max < 0 { (1, 99) } else { (min, max) }
    };
    let prio_val = prio.unwrap_or(max).clamp(min, max);
    let param = sched_param {
        sched_priority: prio_val,
    };
    if unsafe { sched_setscheduler(0, SCHED_FIFO, &param) } != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EPERM) {
            eyre::bail!(
                "{err}; needs CAP_SYS_NICE or root (try 'sudo setcap cap_sys_nice=ep' on the binary)"
            );
        }
        return Err(err.into());
    }
    Ok(prio_val)
}

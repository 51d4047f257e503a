//! Process liveness and termination by PID.

use crate::error::WaitError;

/// Whether a process with `pid` exists. A process we may not signal still
/// counts as alive.
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // 0 and negative values address process groups, not a single process.
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }

    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn is_alive(pid: u32) -> bool {
    pid != 0
}

/// Ask `pid` to shut down with SIGTERM. A process that is already gone is
/// not an error.
#[cfg(unix)]
pub fn terminate(pid: u32) -> Result<(), WaitError> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = match i32::try_from(pid) {
        Ok(raw) if raw > 0 => raw,
        _ => {
            return Err(WaitError::SignalFailed {
                pid,
                reason: "invalid pid".to_string(),
            })
        }
    };

    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(WaitError::SignalFailed {
            pid,
            reason: e.desc().to_string(),
        }),
    }
}

#[cfg(not(unix))]
pub fn terminate(pid: u32) -> Result<(), WaitError> {
    Err(WaitError::SignalFailed {
        pid,
        reason: "signals are not supported on this platform".to_string(),
    })
}

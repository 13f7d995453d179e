//! Platform-specific process management.
//!
//! Liveness checks by PID and graceful-then-forced termination of server
//! child processes.

use crate::error::{HarnessError, Result};
use std::process::Child;
use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Check if a process with the given PID is alive.
///
/// # Platform Behavior
/// - **Linux/macOS**: Uses `kill(pid, 0)`; `EPERM` still means the process exists
/// - **Windows**: Uses `OpenProcess` with `PROCESS_QUERY_LIMITED_INFORMATION`
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        match kill(Pid::from_raw(raw), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    #[cfg(windows)]
    {
        is_process_alive_windows(pid)
    }

    #[cfg(not(any(unix, windows)))]
    {
        warn!("Process alive check not implemented for this platform");
        let _ = pid;
        true
    }
}

#[cfg(windows)]
#[allow(unsafe_code)]
fn is_process_alive_windows(pid: u32) -> bool {
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::System::Threading::{OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION};

    // SAFETY: OpenProcess has no preconditions; the handle is closed before
    // returning and never escapes this function.
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if !handle.is_null() {
            CloseHandle(handle);
            true
        } else {
            false
        }
    }
}

/// Stop a child process and reap it.
///
/// # Platform Behavior
/// - **Linux/macOS**: Sends SIGTERM, waits up to `timeout`, then SIGKILL
/// - **Windows**: Kills immediately (`TerminateProcess`)
///
/// A child that already exited is only reaped.
pub fn terminate_child(child: &mut Child, timeout: Duration) -> Result<()> {
    let pid = child.id();

    if let Some(status) = child.try_wait().map_err(|e| teardown_error(pid, e))? {
        debug!("Process {} already exited: {}", pid, status);
        return Ok(());
    }

    #[cfg(unix)]
    {
        if request_stop_unix(pid) {
            let deadline = Instant::now() + timeout;
            while Instant::now() < deadline {
                sleep(POLL_INTERVAL);
                if let Some(status) = child.try_wait().map_err(|e| teardown_error(pid, e))? {
                    debug!("Process {} terminated gracefully: {}", pid, status);
                    return Ok(());
                }
            }
            debug!("Process {} still running after {:?}, killing", pid, timeout);
        }
    }

    #[cfg(not(unix))]
    {
        let _ = timeout;
    }

    if let Err(e) = child.kill() {
        // InvalidInput means it exited between the poll and the kill
        if e.kind() != std::io::ErrorKind::InvalidInput {
            return Err(teardown_error(pid, e));
        }
    }
    let status = child.wait().map_err(|e| teardown_error(pid, e))?;
    debug!("Reaped process {}: {}", pid, status);
    Ok(())
}

#[cfg(unix)]
fn request_stop_unix(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };

    debug!("Sending SIGTERM to process {}", pid);
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => true,
        Err(Errno::ESRCH) => true,
        Err(e) => {
            warn!("Failed to send SIGTERM to {}: {}", pid, e);
            false
        }
    }
}

fn teardown_error(pid: u32, err: std::io::Error) -> HarnessError {
    HarnessError::Teardown {
        pid,
        message: err.to_string(),
    }
}

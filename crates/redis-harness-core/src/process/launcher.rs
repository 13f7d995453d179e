//! Server process launching.

use crate::config::HarnessDefaults;
use crate::error::{HarnessError, Result};
use crate::identity::Visibility;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tracing::{debug, error, info};

#[cfg(windows)]
use std::os::windows::process::CommandExt;

/// Configuration for launching a server process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Path to the server executable.
    pub binary: PathBuf,
    /// Rendered config file, passed as the sole argument.
    pub config_path: PathBuf,
    /// Working directory for the process.
    pub working_dir: PathBuf,
    /// Whether console output is shown.
    pub visibility: Visibility,
    /// Delay before the startup liveness check.
    pub grace_period: Duration,
}

impl LaunchSpec {
    /// Create a launch spec with a hidden window and the default grace period.
    pub fn new(
        binary: impl AsRef<Path>,
        config_path: impl AsRef<Path>,
        working_dir: impl AsRef<Path>,
    ) -> Self {
        Self {
            binary: binary.as_ref().to_path_buf(),
            config_path: config_path.as_ref().to_path_buf(),
            working_dir: working_dir.as_ref().to_path_buf(),
            visibility: Visibility::Hidden,
            grace_period: HarnessDefaults::GRACE_PERIOD,
        }
    }

    /// Set the visibility.
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Set the grace period.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }
}

/// Launcher for server processes.
pub struct ProcessLauncher;

impl ProcessLauncher {
    /// Spawn the server and verify it survives the grace period.
    ///
    /// Surviving is not the same as being ready; callers probe readiness by
    /// connecting to the server afterwards.
    pub fn launch(spec: &LaunchSpec) -> Result<Child> {
        let mut cmd = Command::new(&spec.binary);
        cmd.arg(&spec.config_path);
        cmd.current_dir(&spec.working_dir);
        cmd.stdin(Stdio::null());

        match spec.visibility {
            Visibility::Visible => {
                cmd.stdout(Stdio::inherit());
                cmd.stderr(Stdio::inherit());
            }
            Visibility::Hidden => {
                cmd.stdout(Stdio::null());
                cmd.stderr(Stdio::null());
            }
        }

        #[cfg(windows)]
        cmd.creation_flags(creation_flags(spec.visibility));

        info!(
            "Launching {} with {}",
            spec.binary.display(),
            spec.config_path.display()
        );

        let mut child = spawn_with_retry(&mut cmd).map_err(|e| {
            error!("Failed to spawn {}: {}", spec.binary.display(), e);
            HarnessError::SpawnFailed {
                binary: spec.binary.clone(),
                source: e,
            }
        })?;

        let pid = child.id();
        debug!("Spawned process {}, waiting {:?}", pid, spec.grace_period);
        std::thread::sleep(spec.grace_period);

        match child.try_wait() {
            Ok(Some(status)) => {
                error!("Process {} exited during startup: {}", pid, status);
                Err(HarnessError::StartupFailed {
                    exit_code: status.code(),
                })
            }
            Ok(None) => {
                info!("Launched process with PID {}", pid);
                Ok(child)
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(HarnessError::Io {
                    message: format!("poll process {}", pid),
                    path: Some(spec.binary.clone()),
                    source: Some(e),
                })
            }
        }
    }
}

#[cfg_attr(not(windows), allow(dead_code))]
const CREATE_NEW_CONSOLE: u32 = 0x0000_0010;
#[cfg_attr(not(windows), allow(dead_code))]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Windows process creation flags: visible servers get their own console
/// window, hidden ones get none.
#[cfg_attr(not(windows), allow(dead_code))]
fn creation_flags(visibility: Visibility) -> u32 {
    match visibility {
        Visibility::Visible => CREATE_NEW_CONSOLE,
        Visibility::Hidden => CREATE_NO_WINDOW,
    }
}

/// Spawn, retrying briefly while the executable is still open for writing.
///
/// A binary that was just copied into place can be held open by a forked
/// sibling for a moment, which makes exec fail with ETXTBSY.
fn spawn_with_retry(cmd: &mut Command) -> std::io::Result<Child> {
    const ATTEMPTS: u32 = 5;
    let mut attempt = 1;
    loop {
        match cmd.spawn() {
            Err(e) if attempt < ATTEMPTS && is_text_file_busy(&e) => {
                debug!("Executable busy (attempt {}), retrying", attempt);
                std::thread::sleep(Duration::from_millis(20 * u64::from(attempt)));
                attempt += 1;
            }
            result => return result,
        }
    }
}

fn is_text_file_busy(err: &std::io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::ETXTBSY)
    }
    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}

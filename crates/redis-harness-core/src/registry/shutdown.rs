//! Process-exit and interrupt hooks that tear down running instances.

use super::instance_registry::InstanceRegistry;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

static GLOBAL: OnceLock<Arc<InstanceRegistry>> = OnceLock::new();

/// Exit status used after an interrupt, matching shells (128 + SIGINT).
const INTERRUPTED_EXIT_CODE: i32 = 130;

pub(super) fn global() -> &'static Arc<InstanceRegistry> {
    GLOBAL.get_or_init(|| {
        let registry = Arc::new(InstanceRegistry::new(HarnessConfig::from_env()));
        install_exit_hook();
        registry
    })
}

#[cfg_attr(not(unix), allow(dead_code))]
extern "C" fn release_global_at_exit() {
    if let Some(registry) = GLOBAL.get() {
        registry.release_all();
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn install_exit_hook() {
    // SAFETY: `release_global_at_exit` is a plain `extern "C" fn()` with no
    // captured state; atexit only stores the pointer and calls it once during
    // normal process termination.
    let status = unsafe { libc::atexit(release_global_at_exit) };
    if status != 0 {
        warn!("Failed to register exit hook; instances may outlive the process");
    }
}

#[cfg(not(unix))]
fn install_exit_hook() {
    // No portable atexit here; callers rely on `release_all` or the interrupt handler.
    warn!("Exit hook not available on this platform; call release_all before exiting");
}

/// Release every instance in `registry` on Ctrl-C, then exit with status 130.
///
/// Only one handler can be installed per process.
pub fn install_interrupt_handler(registry: Arc<InstanceRegistry>) -> Result<()> {
    ctrlc::set_handler(move || {
        info!("Interrupted, releasing instances");
        registry.release_all();
        std::process::exit(INTERRUPTED_EXIT_CODE);
    })
    .map_err(|e| HarnessError::Config {
        message: format!("Failed to install interrupt handler: {}", e),
    })
}

//! Centralized configuration for redis-harness.
//!
//! Constants live on [`HarnessDefaults`]; per-registry settings are carried by
//! [`HarnessConfig`], which picks up overrides from the environment.

use std::path::PathBuf;
use std::time::Duration;

/// Default values shared across the crate.
pub struct HarnessDefaults;

impl HarnessDefaults {
    pub const HOST: &'static str = "127.0.0.1";
    pub const PORT: u16 = 6379;
    pub const DATABASE_COUNT: u32 = 1;

    /// Delay after spawn before checking whether the server already exited.
    pub const GRACE_PERIOD: Duration = Duration::from_millis(100);
    /// Upper bound on connecting for the reset command.
    pub const RESET_TIMEOUT: Duration = Duration::from_secs(2);
    /// How long a server gets to exit after SIGTERM before it is killed.
    pub const STOP_TIMEOUT: Duration = Duration::from_secs(2);

    pub const SCRATCH_DIR_NAME: &'static str = "redis-harness";
    pub const TEMPLATE_FILE_NAME: &'static str = "redis.conf.template";
    pub const LOCK_FILE_NAME: &'static str = ".materialize.lock";
    pub const INSTANCE_FILE_PREFIX: &'static str = "redis-";

    pub const SERVER_ENV_VAR: &'static str = "REDIS_HARNESS_SERVER";
    pub const CONFIG_ENV_VAR: &'static str = "REDIS_HARNESS_CONFIG";
    pub const SCRATCH_ENV_VAR: &'static str = "REDIS_HARNESS_SCRATCH_DIR";
}

/// Settings for a registry and its provisioner.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Directory holding the server binary copy, template and instance files.
    pub scratch_dir: PathBuf,
    /// Explicit server binary. Falls back to the env var, then `PATH`.
    pub server_binary: Option<PathBuf>,
    /// Explicit config template. Falls back to the env var, then the embedded one.
    pub config_template: Option<PathBuf>,
    pub grace_period: Duration,
    pub reset_timeout: Duration,
    pub stop_timeout: Duration,
    pub database_count: u32,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir().join(HarnessDefaults::SCRATCH_DIR_NAME),
            server_binary: None,
            config_template: None,
            grace_period: HarnessDefaults::GRACE_PERIOD,
            reset_timeout: HarnessDefaults::RESET_TIMEOUT,
            stop_timeout: HarnessDefaults::STOP_TIMEOUT,
            database_count: HarnessDefaults::DATABASE_COUNT,
        }
    }
}

impl HarnessConfig {
    /// Defaults with `REDIS_HARNESS_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(dir) = env_path(HarnessDefaults::SCRATCH_ENV_VAR) {
            config.scratch_dir = dir;
        }
        config.server_binary = env_path(HarnessDefaults::SERVER_ENV_VAR);
        config.config_template = env_path(HarnessDefaults::CONFIG_ENV_VAR);
        config
    }

    /// Set the scratch directory.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    /// Use a specific server binary.
    pub fn with_server_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.server_binary = Some(path.into());
        self
    }

    /// Use a specific config template instead of the embedded one.
    pub fn with_config_template(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_template = Some(path.into());
        self
    }

    /// Set the startup grace period.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Set the reset connection timeout.
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Set the graceful stop timeout.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Set the `databases` value written into rendered configs.
    pub fn with_database_count(mut self, count: u32) -> Self {
        self.database_count = count;
        self
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

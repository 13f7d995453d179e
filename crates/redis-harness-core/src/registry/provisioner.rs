//! Provisioning pipeline: materialize, render, launch, reset.

use super::handle::InstanceHandle;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::identity::{ConnectionIdentity, Visibility};
use crate::materialize::{sweep_stale_files, InstanceFiles, ResourceMaterializer};
use crate::process::{LaunchSpec, ProcessLauncher};
use crate::reset::send_reset;
use crate::template::{render, RenderOptions};
use std::fs;
use tracing::{debug, info};

/// Creates a running instance for an identity.
///
/// The registry calls this at most once per identity at a time. A failed
/// call must not leave a process or files behind.
pub trait Provisioner: Send + Sync {
    fn provision(
        &self,
        identity: &ConnectionIdentity,
        visibility: Visibility,
    ) -> Result<InstanceHandle>;
}

/// Provisions real `redis-server` processes.
#[derive(Debug)]
pub struct RedisProvisioner {
    config: HarnessConfig,
    materializer: ResourceMaterializer,
}

impl RedisProvisioner {
    /// Create a provisioner, sweeping instance files left by dead processes.
    pub fn new(config: HarnessConfig) -> Self {
        sweep_stale_files(&config.scratch_dir);
        Self {
            materializer: ResourceMaterializer::new(&config),
            config,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }
}

impl Provisioner for RedisProvisioner {
    fn provision(
        &self,
        identity: &ConnectionIdentity,
        visibility: Visibility,
    ) -> Result<InstanceHandle> {
        let scratch_dir = self.materializer.scratch_dir();
        let resources = self.materializer.materialize()?;

        let template = fs::read_to_string(&resources.config_template)
            .map_err(|e| HarnessError::io_with_path(e, &resources.config_template))?;
        let files = InstanceFiles::allocate(scratch_dir, identity.port());
        let options = RenderOptions::new(identity.port(), files.data_file_name(), scratch_dir)
            .with_database_count(self.config.database_count);
        let rendered = render(&template, &options)?;

        if let Err(e) = fs::write(&files.config_path, rendered) {
            files.remove();
            return Err(HarnessError::io_with_path(e, &files.config_path));
        }
        debug!("Wrote {}", files.config_path.display());

        let spec = LaunchSpec::new(&resources.server_binary, &files.config_path, scratch_dir)
            .with_visibility(visibility)
            .with_grace_period(self.config.grace_period);
        let child = match ProcessLauncher::launch(&spec) {
            Ok(child) => child,
            Err(e) => {
                files.remove();
                return Err(e);
            }
        };

        // From here on, dropping the handle cleans up after a failed reset.
        let handle = InstanceHandle::new(identity.clone(), child, files, self.config.stop_timeout);
        send_reset(identity.host(), identity.port(), self.config.reset_timeout)?;

        info!("Provisioned {} (pid {})", identity, handle.pid());
        Ok(handle)
    }
}

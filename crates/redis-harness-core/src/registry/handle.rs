//! Ownership of one running server and its files.

use crate::identity::ConnectionIdentity;
use crate::materialize::InstanceFiles;
use crate::platform::terminate_child;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Child;
use std::time::Duration;
use tracing::{info, warn};

/// Serializable snapshot of a live instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub host: String,
    pub port: u16,
    pub pid: u32,
    pub config_path: PathBuf,
    pub data_path: PathBuf,
    pub started_at: DateTime<Utc>,
}

/// A running server process together with its config and data files.
///
/// Dropping the handle stops the process and deletes both files. Failures
/// during that teardown are logged and otherwise ignored.
#[derive(Debug)]
pub struct InstanceHandle {
    identity: ConnectionIdentity,
    pid: u32,
    child: Option<Child>,
    files: InstanceFiles,
    started_at: DateTime<Utc>,
    stop_timeout: Duration,
}

impl InstanceHandle {
    pub fn new(
        identity: ConnectionIdentity,
        child: Child,
        files: InstanceFiles,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            identity,
            pid: child.id(),
            child: Some(child),
            files,
            started_at: Utc::now(),
            stop_timeout,
        }
    }

    pub fn identity(&self) -> &ConnectionIdentity {
        &self.identity
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn config_path(&self) -> &Path {
        &self.files.config_path
    }

    pub fn data_path(&self) -> &Path {
        &self.files.data_path
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn info(&self) -> InstanceInfo {
        InstanceInfo {
            host: self.identity.host().to_string(),
            port: self.identity.port(),
            pid: self.pid,
            config_path: self.files.config_path.clone(),
            data_path: self.files.data_path.clone(),
            started_at: self.started_at,
        }
    }

    fn shutdown(&mut self) {
        if let Some(mut child) = self.child.take() {
            match terminate_child(&mut child, self.stop_timeout) {
                Ok(()) => info!("Stopped instance {} (pid {})", self.identity, self.pid),
                Err(e) => warn!("Ignoring teardown failure for {}: {}", self.identity, e),
            }
        }
        self.files.remove();
    }
}

impl Drop for InstanceHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

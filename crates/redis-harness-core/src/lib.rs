//! redis-harness - ephemeral Redis servers for integration tests.
//!
//! The first request for a host/port starts a `redis-server` from a freshly
//! rendered config, checks that it survived startup and sends `FLUSHALL`.
//! Later requests for the same endpoint reuse that process. Instances are torn
//! down explicitly with `release`/`release_all`, when an explicitly created
//! registry is dropped, or when the process exits (global registry).
//!
//! # Example
//!
//! ```rust,no_run
//! use redis_harness::{HarnessConfig, InstanceRegistry};
//!
//! fn main() -> redis_harness::Result<()> {
//!     let registry = InstanceRegistry::new(HarnessConfig::from_env());
//!
//!     let redis = registry.acquire_port(6390)?;
//!     println!("redis at {}", redis);
//!
//!     registry.release(&redis);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod identity;
pub mod materialize;
pub mod platform;
pub mod process;
pub mod registry;
pub mod reset;
pub mod template;

pub use config::{HarnessConfig, HarnessDefaults};
pub use error::{HarnessError, Result};
pub use identity::{ConnectionIdentity, Visibility};
pub use materialize::{MaterializedResources, ResourceMaterializer};
pub use registry::{
    install_interrupt_handler, InstanceHandle, InstanceInfo, InstanceRegistry, Provisioner,
    RedisProvisioner,
};
pub use template::{render, RenderOptions};

/// Start (or reuse) an instance on 127.0.0.1:6379 with a hidden window.
pub fn run_instance() -> Result<ConnectionIdentity> {
    InstanceRegistry::global().acquire_default()
}

/// Start (or reuse) an instance on 127.0.0.1:`port` with a hidden window.
pub fn run_instance_on(port: u16) -> Result<ConnectionIdentity> {
    InstanceRegistry::global().acquire_port(port)
}

/// Start (or reuse) an instance on 127.0.0.1:`port` with visible server output.
pub fn run_instance_with_visible_window(port: u16) -> Result<ConnectionIdentity> {
    InstanceRegistry::global().acquire_port_visible(port)
}

/// Start (or reuse) an instance for an arbitrary host and port.
pub fn run_instance_at(
    host: impl Into<String>,
    port: u16,
    visibility: Visibility,
) -> Result<ConnectionIdentity> {
    InstanceRegistry::global().acquire(ConnectionIdentity::new(host, port), visibility)
}

/// Tear down the global instance for `identity`, if any.
pub fn release_instance(identity: &ConnectionIdentity) {
    InstanceRegistry::global().release(identity);
}

/// Tear down every instance in the global registry.
pub fn release_all_instances() {
    InstanceRegistry::global().release_all();
}

//! Instance registry: one running server per connection identity.
//!
//! - `instance_registry` - get-or-create map and explicit teardown
//! - `provisioner` - the materialize → render → launch → reset pipeline
//! - `handle` - ownership of a running server and its files
//! - `shutdown` - global registry, exit hook and Ctrl-C handler

mod handle;
mod instance_registry;
mod provisioner;
mod shutdown;

pub use handle::{InstanceHandle, InstanceInfo};
pub use instance_registry::InstanceRegistry;
pub use provisioner::{Provisioner, RedisProvisioner};
pub use shutdown::install_interrupt_handler;

//! Platform abstraction layer for cross-platform compatibility.
//!
//! All `#[cfg]` blocks for OS-specific behavior live in this module rather
//! than being scattered through the provisioning code.
//!
//! - `paths` - Server binary naming and `PATH` lookup
//! - `permissions` - Executable bits
//! - `process` - Liveness checks and termination

pub mod paths;
pub mod permissions;
pub mod process;

pub use paths::{config_path_value, find_on_path, server_binary_name};
pub use permissions::{is_executable, set_executable};
pub use process::{is_process_alive, terminate_child};

//! Server process management.
//!
//! Launching lives here; termination is platform specific and lives in
//! [`crate::platform::process`].

mod launcher;

pub use launcher::{LaunchSpec, ProcessLauncher};

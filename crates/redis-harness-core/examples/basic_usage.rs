//! Basic usage example - start an instance, use it, tear it down

use redis_harness::{ConnectionIdentity, HarnessConfig, InstanceRegistry, Result, Visibility};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let port = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(6390);

    let registry = Arc::new(InstanceRegistry::new(HarnessConfig::from_env()));

    println!("Starting redis on port {}...", port);
    let identity = registry
        .acquire_async(ConnectionIdentity::localhost(port), Visibility::Hidden)
        .await?;

    for instance in registry.instances() {
        println!(
            "  - {} (pid {}, data file {})",
            identity,
            instance.pid,
            instance.data_path.display()
        );
    }

    registry.release_async(identity).await;
    println!("Released.");

    Ok(())
}

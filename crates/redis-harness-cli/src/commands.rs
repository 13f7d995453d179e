//! Subcommand implementations.

use anyhow::{Context, Result};
use redis_harness::{
    render, ConnectionIdentity, HarnessConfig, InstanceRegistry, RenderOptions,
    ResourceMaterializer, Visibility,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Environment-derived configuration with command-line overrides applied.
pub fn build_config(
    server: Option<PathBuf>,
    template: Option<PathBuf>,
    scratch_dir: Option<PathBuf>,
) -> HarnessConfig {
    let mut config = HarnessConfig::from_env();
    if let Some(server) = server {
        config = config.with_server_binary(server);
    }
    if let Some(template) = template {
        config = config.with_config_template(template);
    }
    if let Some(dir) = scratch_dir {
        config = config.with_scratch_dir(dir);
    }
    config
}

/// Start an instance per port, print their details and wait for Ctrl-C.
pub async fn run(
    config: HarnessConfig,
    host: String,
    ports: Vec<u16>,
    visibility: Visibility,
    json: bool,
) -> Result<()> {
    let registry = Arc::new(InstanceRegistry::new(config));

    for port in ports {
        let identity = ConnectionIdentity::new(host.clone(), port);
        if let Err(e) = registry.acquire_async(identity.clone(), visibility).await {
            registry.release_all();
            return Err(e).with_context(|| format!("Failed to start instance for {}", identity));
        }
    }

    let instances = registry.instances();
    if json {
        println!("{}", serde_json::to_string_pretty(&instances)?);
    } else {
        for instance in &instances {
            println!(
                "{}:{} pid={} config={}",
                instance.host,
                instance.port,
                instance.pid,
                instance.config_path.display()
            );
        }
    }

    info!("{} instance(s) running, press Ctrl-C to stop", instances.len());
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to wait for Ctrl-C: {}", e);
    }

    info!("Shutdown signal received, releasing instances");
    let registry = Arc::clone(&registry);
    tokio::task::spawn_blocking(move || registry.release_all())
        .await
        .context("Release task failed")?;
    Ok(())
}

/// Render the configuration an instance on `port` would receive.
///
/// The data file points at a placeholder name in the scratch directory; no
/// files are written.
pub fn render_config(config: &HarnessConfig, port: u16, databases: u32) -> Result<String> {
    let materializer = ResourceMaterializer::new(config);
    let template = materializer.load_template()?;
    let options = RenderOptions::new(
        port,
        format!("redis-{}.rdb", port),
        materializer.scratch_dir(),
    )
    .with_database_count(databases);
    Ok(render(&template, &options)?)
}

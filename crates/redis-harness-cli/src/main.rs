//! redis-harness CLI - start throwaway Redis servers by hand.
//!
//! `run` keeps one or more instances alive until Ctrl-C; `render` prints the
//! configuration an instance on a given port would be started with.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "redis-harness")]
#[command(about = "Ephemeral Redis servers for integration tests")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Server binary to copy (defaults to REDIS_HARNESS_SERVER, then PATH)
    #[arg(long, global = true)]
    server: Option<PathBuf>,

    /// Configuration template (defaults to REDIS_HARNESS_CONFIG, then the bundled copy)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Scratch directory for binaries, configs and data files
    #[arg(long, global = true)]
    scratch_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start instances and keep them running until Ctrl-C
    Run {
        /// Host the instances are registered under
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Ports to start instances on
        #[arg(short, long, default_values_t = [6379u16], num_args = 1..)]
        port: Vec<u16>,

        /// Let the server write to this terminal
        #[arg(long)]
        visible: bool,

        /// Print instance details as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the configuration rendered for a port
    Render {
        #[arg(short, long)]
        port: u16,

        /// Number of logical databases
        #[arg(long, default_value = "1")]
        databases: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = commands::build_config(args.server, args.config, args.scratch_dir);

    match args.command {
        Command::Run {
            host,
            port,
            visible,
            json,
        } => commands::run(config, host, port, visible.into(), json).await,
        Command::Render { port, databases } => {
            print!("{}", commands::render_config(&config, port, databases)?);
            Ok(())
        }
    }
}

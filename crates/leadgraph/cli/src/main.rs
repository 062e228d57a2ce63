//! leadgraph - lead graph export gated on GPU memory pressure
//!
//! Subcommands:
//! - `export` builds the lead graph and ships it to a GEXF file or a
//!   graph-streaming endpoint, one chunk at a time
//! - `watch` runs the GPU memory watchdog on its own and prints its events
//! - `config` prints the effective configuration

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

use commands::{export, watch};
use config::LeadgraphConfig;

/// leadgraph CLI
#[derive(Parser)]
#[command(name = "leadgraph")]
#[command(about = "Resource-gated lead graph export", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "LEADGRAPH_CONFIG", global = true)]
    config: Option<String>,

    /// Log level (overrides the configured level)
    #[arg(long, env = "LEADGRAPH_LOG_LEVEL", global = true)]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "LEADGRAPH_LOG_JSON", global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the lead graph and export it
    Export(export::ExportArgs),

    /// Run the GPU memory watchdog and print its events
    Watch(watch::WatchArgs),

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = LeadgraphConfig::load(cli.config.as_deref())?;

    // Initialize tracing
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into());

    if cli.json || config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    match cli.command {
        Commands::Export(args) => export::execute(args, config).await,
        Commands::Watch(args) => watch::execute(args, config).await,
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

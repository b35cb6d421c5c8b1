mod config;
mod routes;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use meshkit_http::HttpServer;
use meshkit_runtime::logging::with_verbosity;
use meshkit_runtime::{App, ShutdownOptions, init_logging};
use meshkit_transport_grpc::RpcServer;

use crate::config::AppConfig;

/// Meshkit node - an RPC and an HTTP server sharing one registry
#[derive(Parser)]
#[command(name = "meshkit-node")]
#[command(about = "Meshkit node - an RPC and an HTTP server sharing one registry")]
#[command(version)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print effective configuration (JSON) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the servers
    Run,
    /// Validate configuration and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config, cli.verbose).await,
        Commands::Check => {
            println!("Configuration is valid");
            Ok(())
        }
    }
}

async fn run(config: AppConfig, verbose: u8) -> Result<()> {
    init_logging(&with_verbosity(config.logging.clone(), verbose))?;
    tracing::info!(registry = ?config.registry.kind, "meshkit node starting");

    let registry = config.registry.build();

    let http = HttpServer::new(config.http, registry.clone());
    routes::mount(&http, &registry);
    let rpc = RpcServer::new(config.rpc, registry);

    App::new()
        .with_server(Arc::new(rpc))
        .with_server(Arc::new(http))
        .run(ShutdownOptions::Signals)
        .await?;

    tracing::info!("meshkit node stopped");
    Ok(())
}

//! Synscope CLI entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "synscope")]
#[command(about = "Synapse graph proofreading with a live 3D viewer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (defaults to ./synscope.toml when present)
    #[arg(short, long, env = "SYNSCOPE_CONFIG")]
    config: Option<PathBuf>,

    /// Edge file, overriding `[edges] input`
    #[arg(short, long, env = "SYNSCOPE_EDGES")]
    edges: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the viewer sync server
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
    },
    /// Load the graph and print its size
    Stats,
    /// Load the graph and verify every index invariant
    Check,
    /// Rewrite segment ids through an old,new map and save the edge file
    Remap {
        /// Two-column `old,new` segment id map
        #[arg(short, long)]
        map: PathBuf,

        /// Where to write the result (defaults to the configured output)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Paths may come from a .env file
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!("synscope={}", log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Synscope v{}", env!("CARGO_PKG_VERSION"));

    let mut config = synscope_core::Config::load(cli.config.as_deref())?;
    if let Some(edges) = cli.edges {
        config.edges.input = Some(edges);
    }

    match cli.command {
        Commands::Serve { port, host } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            config.validate()?;
            commands::serve(config).await
        }
        Commands::Stats => commands::stats(&config),
        Commands::Check => commands::check(&config),
        Commands::Remap { map, output } => commands::remap(&config, &map, output.as_deref()),
        Commands::Version => {
            println!("Synscope v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

//! Chatfuse CLI, the main entry point.
//!
//! Commands:
//! - `serve`     Start the HTTP gateway
//! - `services`  Probe every configured service and print its status
//! - `config`    Print the default config, the config path, or validate it

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "chatfuse",
    about = "Chatfuse: multi-service chatbot orchestration and context fusion",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Probe every configured service
    Services,

    /// Configuration helpers
    Config {
        #[command(subcommand)]
        action: Option<commands::config_cmd::ConfigAction>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Services => commands::services::run().await?,
        Commands::Config { action } => commands::config_cmd::run(action.unwrap_or_default())?,
    }

    Ok(())
}

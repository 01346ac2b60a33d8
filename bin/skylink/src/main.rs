mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "skylink")]
#[command(about = "Browser bridge for the Skylink gateway", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.skylink/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the gateway and serve commands until Ctrl-C (default)
    Run {
        /// Gateway WebSocket URL (overrides config gateway.url)
        #[arg(short, long)]
        gateway: Option<String>,

        /// Seed the in-process browser with sample tabs and bookmarks
        #[arg(long)]
        simulate: bool,
    },

    /// Show configuration and stored settings
    Status,

    /// Check for extension updates
    Upgrade {
        #[command(subcommand)]
        command: UpgradeCommands,
    },
}

#[derive(Subcommand)]
enum UpgradeCommands {
    /// Query the release endpoint for a newer version
    Check,
    /// Show update settings
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose when set.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command.unwrap_or(Commands::Run {
        gateway: None,
        simulate: false,
    }) {
        Commands::Run { gateway, simulate } => {
            commands::run::run(cli.config, gateway, simulate).await?;
        }
        Commands::Status => {
            commands::status::run(cli.config).await?;
        }
        Commands::Upgrade { command } => match command {
            UpgradeCommands::Check => {
                commands::upgrade::check(cli.config).await?;
            }
            UpgradeCommands::Status => {
                commands::upgrade::status(cli.config).await?;
            }
        },
    }

    Ok(())
}

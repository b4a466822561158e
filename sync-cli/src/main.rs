//! # sync-cli
//!
//! CLI tool for exercising the pairsync protocol.
//!
//! ## Commands
//!
//! - `demo`: Sync two in-process peers over a loopback radio
//! - `config`: Print the effective configuration as TOML
//!
//! ## Example
//!
//! ```bash
//! # Two peers edit the same event, then sync
//! sync-cli demo --conflict
//!
//! # Same, over a flaky link
//! sync-cli demo --conflict --drop-connects 2 --corrupt-chunks 1
//!
//! # Check a config file
//! sync-cli --config pairsync.toml config
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{config, demo};

/// CLI tool for exercising the pairsync protocol.
#[derive(Parser, Debug)]
#[command(name = "sync-cli")]
#[command(version, about, long_about = None)]
struct Cli {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sync two in-process peers and print the results as JSON
    Demo {
        /// Pairing passphrase shared by both peers
        #[arg(long, short, default_value = "correct horse battery staple")]
        passphrase: String,

        /// Edit the same field on both peers before the second sync
        #[arg(long)]
        conflict: bool,

        /// Fail this many connects before the second sync
        #[arg(long, default_value = "0")]
        drop_connects: u32,

        /// Corrupt this many data chunks during the second sync
        #[arg(long, default_value = "0")]
        corrupt_chunks: u32,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let sync_config = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Demo {
            passphrase,
            conflict,
            drop_connects,
            corrupt_chunks,
        } => {
            let options = demo::DemoOptions {
                passphrase,
                conflict,
                drop_connects,
                corrupt_chunks,
            };
            demo::run(&sync_config, &options).await?;
        }
        Commands::Config => {
            config::run(&sync_config)?;
        }
    }

    Ok(())
}

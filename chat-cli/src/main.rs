//! # relaychat
//!
//! CLI tool for exercising the relaychat sync engine.
//!
//! ## Commands
//!
//! - `demo`: Run the full load pipeline against a synthetic in-memory network
//! - `config`: Print the effective configuration as TOML
//!
//! ## Example
//!
//! ```bash
//! # Load a network of 8 conversations and 4 communities
//! relaychat demo --conversations 8 --communities 4
//!
//! # Same, with engine logs
//! RUST_LOG=relaychat_client=debug relaychat demo
//!
//! # Show defaults merged with a config file
//! relaychat --config relaychat.toml config
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{config, demo};

/// CLI tool for exercising the relaychat sync engine.
#[derive(Parser, Debug)]
#[command(name = "relaychat")]
#[command(version, about, long_about = None)]
struct Cli {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log more (-v debug, -vv trace). RUST_LOG overrides this.
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the load pipeline against a synthetic network
    Demo {
        /// Number of direct-message counterparties
        #[arg(long, default_value = "5")]
        conversations: usize,

        /// Number of communities
        #[arg(long, default_value = "3")]
        communities: usize,

        /// Channel messages per community
        #[arg(long, default_value = "12")]
        messages: usize,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let client_config = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Demo {
            conversations,
            communities,
            messages,
        } => {
            let network = demo::NetworkShape {
                conversations,
                communities,
                messages,
            };
            demo::run(client_config, network).await?;
        }
        Commands::Config => {
            config::run(&client_config)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

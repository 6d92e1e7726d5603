//! CLI module for Termbridge
//!
//! Provides commands:
//! - `serve`: Run the bot and WebSocket server
//! - `connection`: Manage saved SSH connections

use clap::{Parser, Subcommand};

use crate::server::config::AppConfig;

pub mod connection;

/// Termbridge CLI
#[derive(Parser, Debug)]
#[command(name = "termbridge")]
#[command(about = "SSH terminal sessions over chat and WebSocket")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the server
    Serve,
    /// Manage saved SSH connections
    Connection {
        #[command(subcommand)]
        command: connection::ConnectionCommand,
    },
}

/// Run the CLI command
pub async fn run(cli: Cli, config: AppConfig) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Serve) => crate::server::run(config).await,
        Some(Commands::Connection { command }) => connection::run(command, &config).await,
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}

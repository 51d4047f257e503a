//! CLI commands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// waitmux - resume rate-limited AI assistant sessions in tmux
#[derive(Parser, Debug)]
#[command(name = "waitmux")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a config file (jsonc, json or yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show daemon state and pending rate limits
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Scan tmux panes once and list the rate-limited ones
    Detect {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Daemon management
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum DaemonCommands {
    /// Start the daemon
    Start {
        /// Stay attached and log to stderr
        #[arg(long)]
        foreground: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Run the poll loop in this process, logging to the daemon log file
    #[command(hide = true)]
    Run,
}

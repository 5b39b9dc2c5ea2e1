//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// rekon - custom-resource reconciliation engine
#[derive(Parser, Debug)]
#[command(name = "rekon")]
#[command(version)]
#[command(about = "Run custom-resource lifecycle events against local backends")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Dispatch one lifecycle event and deliver its callback
    Invoke {
        /// Event document, or `-` for stdin
        #[arg(short, long)]
        event: String,

        /// Time left in the invocation, in milliseconds
        #[arg(long, default_value_t = 900_000)]
        remaining_ms: u64,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// JSON fixtures seeding the in-memory backends
        #[arg(short, long)]
        fixtures: Option<PathBuf>,
    },

    /// Normalize a distribution config before it would be written
    Normalize {
        /// Config document, or `-` for stdin
        #[arg(short, long)]
        input: String,
    },

    /// Print the effective default configuration as TOML
    Config,
}

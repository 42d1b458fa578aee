use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;

use crate::{config::Config, error::Error};

/// The command line interface for the emulator.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file
    pub config: Option<PathBuf>,

    /// Listen for controllers on this port instead of the configured one
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Exit after the first controller session closes
    #[arg(long)]
    pub once: bool,

    /// Log level on stdout
    #[arg(short, long, default_value_t = Level::INFO)]
    pub log_level: Level,

    /// Also write debug logs to a daily rolling file in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Commands available in the command line interface.
#[derive(Subcommand)]
pub enum Commands {
    /// Examples for user convenience.
    #[clap(subcommand)]
    Examples(Examples),
}

/// Helpful examples for users.
#[derive(Subcommand, Clone)]
pub enum Examples {
    /// Show an example of a configuration file's contents.
    Config,
}

/// Run a subcommand.
pub fn handle_command(command: Commands) -> Result<(), Error> {
    match command {
        Commands::Examples(example) => match example {
            Examples::Config => println!("{}", Config::example().serialize_pretty()?),
        },
    }

    Ok(())
}

//! CLI - Command-line argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Self-updater for the Star Citizen translation installer
#[derive(Parser, Debug)]
#[command(name = "patchup")]
#[command(about = "Keeps the translation installer up to date and launches it", long_about = None)]
#[command(version)]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    /// Configuration file (defaults to patchup.toml in the settings directory)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Do not copy this binary to the stable location
    #[arg(long, global = true)]
    pub no_relocate: bool,

    /// Subcommand (default: run)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Relocate, update if needed, then launch the installer
    Run,

    /// Compare the installed version against the remote manifest
    Check,

    /// Download and cache a newer installer without launching it
    Fetch,

    /// Launch the cached installer for the installed version
    Launch,

    /// Print the installed installer version
    Installed,

    /// Find game installation folders
    Scan {
        /// Roots to walk (default: every mounted volume)
        roots: Vec<PathBuf>,
    },
}

impl Cli {
    pub fn selected(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Run)
    }
}

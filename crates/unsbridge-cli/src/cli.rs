use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "unsbridge",
    about = "Republish Asset Administration Shell content onto a unified namespace",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the bridge daemon.
    Run {
        /// Path to the YAML configuration file.
        #[arg(long, short, env = "UNSBRIDGE_CONFIG")]
        config: PathBuf,
    },

    /// Check a configuration file and exit.
    Validate {
        /// Path to the YAML configuration file.
        #[arg(long, short)]
        config: PathBuf,
    },

    /// Interrogate a running instance.
    Status {
        /// Base URL of the instance's status endpoints.
        #[arg(long, default_value = "http://127.0.0.1:9090")]
        endpoint: String,
    },

    /// Print the version and exit.
    Version,
}

mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::{Cli, Command};
use commands::CliError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run { config } => commands::run(config).await,
        Command::Validate { config } => commands::validate(config),
        Command::Status { endpoint } => commands::status(endpoint).await,
        Command::Version => commands::version(),
    };

    match result {
        Ok(()) => {}
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(exit_code(&e));
        }
    }
}

/// 0 success, 2 config error, 3 persistence error, 4 I/O fatal, 1 other.
fn exit_code(error: &CliError) -> i32 {
    match error {
        CliError::Config(_) => 2,
        CliError::Persistence(_) => 3,
        CliError::Fatal(_) => 4,
        CliError::Other(_) => 1,
    }
}

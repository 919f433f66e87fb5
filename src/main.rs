//! Suiteforge CLI - multi-suite build graph resolver
//!
//! Entry point for the suiteforge command-line application.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use suiteforge::cli::output::{display_error, exit_code};
use suiteforge::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let output = cli.output();

    // RUST_LOG wins over the verbosity flags
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(output.log_directive()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = cli.run().await {
        display_error(&e);
        std::process::exit(exit_code(&e));
    }
}

// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise -v selects debug
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let succeeded = match &cli.command {
        Some(Commands::DepWheels { os }) => commands::cmd_dep_wheels(&cli.root, os)?,
        None => commands::cmd_build(&cli.root, &cli.build)?,
    };
    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}

//! ## minne-cli
//! **Operational front end**
//!
//! Validates configuration, prints the resulting zone table, and drives a
//! multi-threaded allocation workload against a configured context.

use clap::Parser;
use minne_telemetry::Logger;

mod commands;
mod setup;
mod simulate;

use commands::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;
    Logger::init(&config.telemetry.log_level, config.telemetry.log_format);

    commands::run_command(cli.command, config)
}

//! paint-refresher - keeps simulator liveries in sync with their paint sources.

mod cli;
mod config;
mod convert;
mod core;
mod document;
mod logger;
mod output;
mod raster;
mod utils;
mod watch;

use anyhow::Result;
use clap::{ColorChoice, Parser};
use cli::{Cli, Commands};
use config::{RefresherConfig, init_config};
use core::Role;

fn main() -> Result<()> {
    // Setup global Ctrl+C handler (before any blocking operations)
    core::setup_shutdown_handler()?;

    let cli: &'static Cli = Box::leak(Box::new(Cli::parse()));

    // Set global color override based on CLI option
    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }

    let config = init_config(RefresherConfig::load(cli)?);

    match &cli.command {
        Commands::Watch { .. } => cli::watch::run_watch(&config),
        Commands::Convert { path, spec } => {
            let role = if *spec { Role::SpecMap } else { Role::Paint };
            cli::convert::convert_once(&config, path, role)
        }
        Commands::Inspect { path, json } => cli::inspect::run_inspect(path, *json),
    }
}

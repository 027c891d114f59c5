// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! strix - distributed web application scanner CLI

mod commands;
mod demo;
mod output;
mod session;
mod table;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use output::OutputFormat;
use strix_engine::{Config, EngineError};

/// Exit codes for scripting: 0 success, 1 generic failure, 2 invalid
/// arguments, 3 database unavailable. Clap's own usage errors also exit 2.
const EXIT_FAILURE: u8 = 1;
const EXIT_INVALID_ARGS: u8 = 2;
const EXIT_DB_UNAVAILABLE: u8 = 3;

#[derive(Parser)]
#[command(
    name = "strix",
    version,
    about = "strix - distributed web application security scanner"
)]
struct Cli {
    /// Engine configuration file (TOML)
    #[arg(short = 'c', long = "config", global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// State snapshot file shared across invocations
    #[arg(short = 's', long = "state", global = true, value_name = "FILE")]
    state: Option<PathBuf>,

    /// Output format
    #[arg(
        short = 'o',
        long = "output",
        value_enum,
        default_value_t,
        global = true
    )]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan lifecycle: create, list, show, jobs, pause, resume, cancel, delete
    Scan(commands::scan::ScanArgs),
    /// Run a worker node until interrupted
    Node(commands::node::NodeArgs),
    /// Validate a configuration file and print the effective settings
    CheckConfig {
        /// Path to the TOML file to validate
        path: PathBuf,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            Ok(Config::from_toml(&text)?)
        }
        None => Ok(Config::default()),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_ref())?;
    match cli.command {
        Commands::Scan(args) => commands::scan::run(args, config, cli.output, cli.state).await,
        Commands::Node(args) => commands::node::run(args, config, cli.state).await,
        Commands::CheckConfig { path } => {
            let text = std::fs::read_to_string(&path)?;
            let config = Config::from_toml(&text)?;
            println!(
                "ok: {} workers, dispatcher tick {:?}, phase timeout {:?}",
                config.workers.count_per_node,
                config.dispatcher.tick,
                config.orchestrator.phase_timeout
            );
            Ok(())
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<EngineError>() {
        Some(e) if e.is_transient() => EXIT_DB_UNAVAILABLE,
        Some(EngineError::InvalidConfig(_)) => EXIT_INVALID_ARGS,
        _ => EXIT_FAILURE,
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;

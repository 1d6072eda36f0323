use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod cli;
mod workflow;

use cli::{Command, RootArgs};

fn main() -> Result<ExitCode> {
    let args = RootArgs::parse();
    // Missing .env is the common case.
    dotenvy::dotenv().ok();
    init_tracing(args.command.verbose());

    match args.command {
        Command::Run(args) => workflow::run_run(args),
        Command::Diagnose(args) => workflow::run_diagnose(args),
        Command::Providers(args) => workflow::run_providers(args),
    }
}

/// Log to stderr so `--json` output on stdout stays parseable. `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "taxdraft=debug"
    } else {
        "taxdraft=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

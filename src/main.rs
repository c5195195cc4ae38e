//! `provision` binary entry point.

use anyhow::{Context as _, Result};
use clap::Parser;

use provision_cli::cli::{Cli, Command};
use provision_cli::commands;
use provision_cli::logging::{self, Logger};

#[allow(clippy::print_stdout)]
fn main() -> Result<()> {
    // Interrupted prompts would otherwise leave the terminal in raw mode.
    ctrlc::set_handler(|| {
        std::process::exit(130);
    })
    .context("failed to install interrupt handler")?;

    let args = Cli::parse();
    let command_name = match &args.command {
        Command::Apply(_) => "apply",
        Command::Plan(_) => "plan",
        Command::Check => "check",
        Command::Version => "version",
    };
    logging::init_subscriber(args.verbose, command_name);
    let log = Logger::new(command_name);

    match args.command {
        Command::Apply(opts) => commands::apply::run(&args.global, &opts, &log),
        Command::Plan(opts) => commands::plan::run(&args.global, &opts, &log),
        Command::Check => commands::check::run(&args.global, &log),
        Command::Version => {
            let version = option_env!("PROVISION_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"));
            println!("provision {version}");
            Ok(())
        }
    }
}

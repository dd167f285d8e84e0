//! `snac-rs` binary entry point: parses the CLI surface (spec §6) and
//! dispatches to the matching subcommand implementation.

mod cli;
mod commands;
mod http;

use clap::Parser;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    snac_common::logging::init();

    let cli = cli::Cli::parse();
    match commands::run(cli.basedir.as_deref(), cli.command).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("snac: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}

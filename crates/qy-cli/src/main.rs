//! quarry CLI - build, test and select SQL transformation projects

use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;
mod logging;
mod profiles;

use cli::{Cli, Commands};
use commands::common::ExitCode;
use commands::execute::Which;
use commands::{clean, compile, execute, ls, parse, retry};

async fn dispatch(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Parse(args) => parse::execute(args, &cli.global).await,
        Commands::Compile(args) => compile::execute(args, &cli.global).await,
        Commands::Run(args) => execute::execute(Which::Run, args, &cli.global).await,
        Commands::Test(args) => execute::execute(Which::Test, args, &cli.global).await,
        Commands::Build(args) => execute::execute(Which::Build, args, &cli.global).await,
        Commands::Seed(args) => execute::execute(Which::Seed, args, &cli.global).await,
        Commands::Snapshot(args) => execute::execute(Which::Snapshot, args, &cli.global).await,
        Commands::List(args) => ls::execute(args, &cli.global).await,
        Commands::Clean(args) => clean::execute(args, &cli.global).await,
        Commands::Retry(args) => retry::execute(args, &cli.global).await,
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    logging::init(cli.global.verbose);

    let code = match dispatch(&cli).await {
        Ok(()) => 0,
        Err(err) => match err.downcast_ref::<ExitCode>() {
            Some(ExitCode(code)) => *code,
            None => {
                let scrubber = qy_core::EnvSnapshot::from_process().scrubber();
                let message = if cli.global.verbose {
                    format!("{:?}", err)
                } else {
                    format!("{:#}", err)
                };
                eprintln!("Error: {}", scrubber.scrub(&message));
                2
            }
        },
    };

    logging::teardown();
    std::process::ExitCode::from(code.clamp(0, 255) as u8)
}

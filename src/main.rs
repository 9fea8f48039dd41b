use std::process::ExitCode;

use clap::Parser;
use owo_colors::OwoColorize;

use ccsync::cli::{AppContext, Cli, Commands};
use ccsync::core::error::exit_code_for;
use ccsync::infra::{config, logging};

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet, cli.no_color);

    let settings = match config::load_settings() {
        Ok(settings) => settings,
        Err(e) => return fail(&e, cli.no_color),
    };
    // Build a context once, pass everywhere
    let ctx = AppContext::new(&cli, settings);

    let result = match cli.command {
        Commands::Grab(args) => ccsync::grab_run(args, &ctx),
        Commands::Put(args) => ccsync::put_run(args, &ctx),
        Commands::PutAll(args) => ccsync::put_all_run(args, &ctx),
        Commands::TransferAll(args) => ccsync::transfer_run(args, &ctx),
        Commands::Etag(args) => ccsync::etag_run(args, &ctx),
        Commands::Init(args) => config::init(args, &ctx).map(|_| true),
        Commands::Completions(args) => ccsync::completion::run(args).map(|_| true),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => fail(&e, ctx.no_color),
    }
}

fn fail(e: &anyhow::Error, no_color: bool) -> ExitCode {
    if no_color {
        eprintln!("error: {e:#}");
    } else {
        eprintln!("{} {e:#}", "error:".red().bold());
    }
    ExitCode::from(exit_code_for(e) as u8)
}

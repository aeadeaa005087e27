mod backup;
mod cli;
mod commands;
mod config;
mod index;
mod interrupt;
mod paths;
mod progress;
mod store;
mod supervisor;
mod ui;
mod validate;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use commands::Fleet;
use std::io;

/// Exit status when the engine itself could not run
const EXIT_INFRASTRUCTURE: i32 = 255;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    interrupt::install();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };
    log::trace!("verbosity {}", ctx.verbose);

    let code = match dispatch(&ctx, cli.command) {
        Ok(code) => code,
        Err(e) if is_cancelled(&e) => {
            ui::warn("Interrupted");
            interrupt::exit_code()
        }
        Err(e) => {
            ui::error(&format!("{e:#}"));
            EXIT_INFRASTRUCTURE
        }
    };

    std::process::exit(code);
}

fn dispatch(ctx: &Context, command: Command) -> Result<i32> {
    if let Command::Completions { shell } = command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "moonfrp", &mut io::stdout());
        return Ok(0);
    }

    let fleet = Fleet::load()?;

    match command {
        Command::Bulk(args) => commands::bulk::run(ctx, &fleet, args),
        Command::Test(args) => commands::probe::run(ctx, &fleet, args),
        Command::Update(args) => commands::update::run(ctx, &fleet, args),
        Command::Status(args) => commands::status::run(ctx, &fleet, args.refresh, args.watch),
        Command::Validate { filter } => commands::validate::run(ctx, &fleet, &filter),
        Command::Tag { name, tags } => commands::tag::run(ctx, &fleet, &name, &tags),
        Command::Completions { .. } => Ok(0),
    }
}

fn is_cancelled(error: &anyhow::Error) -> bool {
    interrupt::interrupted()
        || error
            .chain()
            .any(|cause| cause.downcast_ref::<fleetkit::Error>().is_some_and(fleetkit::Error::is_cancelled))
}

// SPDX-License-Identifier: MIT
use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;
use log4rs::{
    append::console::{ConsoleAppender, Target},
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
    filter::threshold::ThresholdFilter,
};
use std::process::ExitCode;

use v3rom_create_restore::{app, CliArguments};

/// Log to stdout, warnings are always shown as partitions missing in a backup are reported as such
fn init_logging(cli_args: &CliArguments) -> Result<()> {
    let log_filter = if cli_args.debug {
        LevelFilter::Debug
    } else if cli_args.verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };

    let stdout = ConsoleAppender::builder()
        .target(Target::Stdout)
        .encoder(Box::new(PatternEncoder::new("{l}: {m}{n}")))
        .build();

    let log_config = log4rs::Config::builder()
        .appender(
            Appender::builder()
                .filter(Box::new(ThresholdFilter::new(log_filter)))
                .build("stdout", Box::new(stdout)),
        )
        .build(Root::builder().appender("stdout").build(LevelFilter::Trace))
        .context("Configuring logging failed.")?;

    log4rs::init_config(log_config).context("Initializing logger failed.")?;

    Ok(())
}

fn main() -> ExitCode {
    let cli_args = CliArguments::parse();

    if let Err(err) = init_logging(&cli_args) {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    match app(cli_args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

// SPDX-License-Identifier: MIT
use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;
use log4rs::{
    append::{
        console::{ConsoleAppender, Target},
        file::FileAppender,
    },
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
    filter::threshold::ThresholdFilter,
};
use std::process::ExitCode;

use v3rom::{app, CliArguments};

/// Log to stdout and keep warnings and errors in the log file, so failed
/// flashing attempts can be looked up afterwards
fn init_logging(cli_args: &CliArguments) -> Result<()> {
    let log_filter = if cli_args.debug {
        LevelFilter::Debug
    } else if cli_args.verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Error
    };

    let stdout = ConsoleAppender::builder()
        .target(Target::Stdout)
        .encoder(Box::new(PatternEncoder::new("{l}: {m}{n}")))
        .build();
    let log_file = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} | {({l}):5.5} | {m}{n}",
        )))
        .build(&cli_args.log_file)
        .with_context(|| {
            format!(
                "Initializing file log {} failed.",
                cli_args.log_file.display()
            )
        })?;

    let log_config = log4rs::Config::builder()
        .appender(
            Appender::builder()
                .filter(Box::new(ThresholdFilter::new(log_filter)))
                .build("stdout", Box::new(stdout)),
        )
        .appender(
            Appender::builder()
                .filter(Box::new(ThresholdFilter::new(LevelFilter::Warn)))
                .build("logfile", Box::new(log_file)),
        )
        .build(
            Root::builder()
                .appender("stdout")
                .appender("logfile")
                .build(LevelFilter::Trace),
        )
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

    if let Err(e) = app(cli_args) {
        log::error!("{e:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

// SPDX-License-Identifier: MIT
use clap::Parser;
use log::LevelFilter;
use log4rs::{
    append::console::{ConsoleAppender, Target},
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
    filter::threshold::ThresholdFilter,
};

use v3rom_create_logo::{app, CliArguments};

fn main() {
    let cli_args = CliArguments::parse();

    let log_filter = match (cli_args.debug, cli_args.verbose) {
        (true, _) | (false, 2..) => LevelFilter::Debug,
        (false, 1) => LevelFilter::Info,
        (false, 0) => LevelFilter::Warn,
    };

    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("{l}: {m}{n}")))
        .build();

    let log_config = match log4rs::Config::builder()
        .appender(
            Appender::builder()
                .filter(Box::new(ThresholdFilter::new(log_filter)))
                .build("stderr", Box::new(stderr)),
        )
        .build(Root::builder().appender("stderr").build(LevelFilter::Trace))
    {
        Ok(config) => config,
        Err(err) => panic!("Configuring logging failed: {err}"),
    };

    if let Err(err) = log4rs::init_config(log_config) {
        panic!("Initializing logger failed: {err}.");
    }

    if let Err(e) = app(cli_args) {
        log::error!("{e:#}");
        ::std::process::exit(1);
    }
}

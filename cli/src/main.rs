#[macro_use]
extern crate log;

use std::io;
use std::process;

use adsel_core::inference::OnnxLoader;
use adsel_core::{WgpuSource, pipeline};
use clap::Parser;
use clap::error::ErrorKind;

mod params;

use crate::params::CliArgs;

/// Exit code for malformed arguments.
const USAGE_EXIT_CODE: i32 = -1;

fn main() {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::MissingRequiredArgument) => {
            let program =
                std::env::args().next().unwrap_or_else(|| "adapter-selection".to_string());
            println!("Usage: {program} [modelfile] [imagefile]");
            process::exit(USAGE_EXIT_CODE)
        }
        Err(e) => e.exit(),
    };

    let env = env_logger::Env::default()
        .filter_or(env_logger::DEFAULT_FILTER_ENV, args.log_filter());
    env_logger::Builder::from_env(env).format_timestamp_nanos().init();

    let params = args.into_parameters();
    let mut stdin = io::stdin().lock();
    let mut stdout = io::stdout().lock();
    let source = WgpuSource::default();
    if let Err(e) = pipeline::run(&params, &source, &OnnxLoader, &mut stdin, &mut stdout) {
        error!("{e:?}");
        println!("{e}");
        process::exit(1)
    }
}

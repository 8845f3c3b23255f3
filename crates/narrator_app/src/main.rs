//! Command-line narrator: reads web pages and text files aloud.

mod app;
mod cli;
mod settings;

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use engine_logging::engine_error;

fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    engine_logging::initialize(cli.log.into(), Path::new("./engine.log"));

    match app::run(cli) {
        Ok(summary) => {
            println!("{} converted, {} failed", summary.completed, summary.failed);
            if summary.all_succeeded() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(err) => {
            engine_error!("run failed: {err:#}");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

//! runcap - process supervisor with CPU, real time and memory limits.
//!
//! Forks the given command, samples its whole descendant tree on a periodic
//! schedule, terminates the tree when a limit is exceeded, and reports
//! usage as `[runcap]` log records on stderr or a file.

use std::sync::Arc;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use runcap::cli::{Args, Config};
use runcap::report::Report;
use runcap::{supervisor, sys};

/// Initializes the tracing subscriber. Diagnostics share stderr with the
/// record stream but never use its grammar; `--debug` raises the level.
fn init_logging(debug: bool) {
    let level = if debug { Level::DEBUG } else { Level::WARN };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("runcap={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let args = Args::parse();

    init_logging(args.debug);

    let report = match &args.output_file {
        Some(path) => match Report::to_file(path) {
            Ok(report) => report,
            Err(_) => Report::stderr().fatal(&format!("can not write output to '{}'", path)),
        },
        None => Report::stderr(),
    };
    let report = Arc::new(report);

    let config = Config::resolve(&args, sys::physical_memory_mb());

    let code = supervisor::run(config, report);
    std::process::exit(code);
}

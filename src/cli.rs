//! Command-line interface and resolved run configuration.

use std::time::Duration;

use clap::{ArgAction, Parser};

/// Default CPU-time limit: effectively unlimited.
pub const UNLIMITED_SECONDS: f64 = 60.0 * 60.0 * 24.0 * 3600.0;

/// Run a command under CPU, real time and memory limits.
#[derive(Parser, Debug)]
#[command(
    name = "runcap",
    version,
    disable_version_flag = true,
    about = "Run a command under CPU, real time and memory limits",
    long_about = "Runs a command while sampling its whole process tree, terminates \
                  the tree when a limit is exceeded, and reports resource usage as \
                  structured log records."
)]
pub struct Args {
    /// CPU time limit in seconds, summed over the whole process tree.
    #[arg(short = 't', long = "time-limit", value_name = "SECONDS")]
    pub time_limit: Option<u64>,

    /// Wall clock limit in seconds (defaults to the time limit).
    #[arg(short = 'r', long = "real-time-limit", value_name = "SECONDS")]
    pub real_time_limit: Option<u64>,

    /// Resident memory limit in MB (defaults to physical memory).
    #[arg(short = 's', long = "space-limit", value_name = "MB")]
    pub space_limit: Option<u64>,

    /// Write the log to a file instead of stderr.
    #[arg(short = 'o', long = "output-file", value_name = "FILE")]
    pub output_file: Option<String>,

    /// Sampler period in microseconds.
    #[arg(
        long,
        value_name = "MICROSECONDS",
        default_value_t = 100_000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub sample_rate: u64,

    /// Emit one sample record per this many samples.
    #[arg(
        long,
        value_name = "SAMPLES",
        default_value_t = 100,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub report_rate: u64,

    /// Initial termination delay in milliseconds; halved every round.
    #[arg(
        long,
        value_name = "MILLISECONDS",
        default_value_t = 512,
        value_parser = clap::value_parser!(u64).range(1..1_000_000)
    )]
    pub kill_delay: u64,

    /// Re-raise the command's terminating signal on abnormal exit.
    #[arg(short = 'k', long = "kill")]
    pub kill: bool,

    /// Exit with the command's exit code instead of 0.
    #[arg(short = 'p', long = "propagate")]
    pub propagate: bool,

    /// Assume the command spawns no children; sample only its own record.
    #[arg(long)]
    pub single: bool,

    /// Emit per-event debug lines.
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,

    /// Print version.
    #[arg(
        short = 'v',
        long = "version",
        action = ArgAction::Version,
        value_parser = clap::value_parser!(bool)
    )]
    pub version: Option<bool>,

    /// The command to run and its arguments.
    #[arg(
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "PROGRAM"
    )]
    pub command: Vec<String>,
}

/// Fully resolved run configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub command: Vec<String>,
    pub time_limit: f64,
    pub real_time_limit: f64,
    pub space_limit: f64,
    pub sample_rate: Duration,
    pub report_rate: u64,
    pub kill_delay: Duration,
    pub single: bool,
    pub propagate_signals: bool,
    pub propagate_exit_code: bool,
}

impl Config {
    /// Resolves defaults: the real-time limit follows the time limit, the
    /// space limit follows physical memory.
    pub fn resolve(args: &Args, physical_memory_mb: f64) -> Self {
        let time_limit = args
            .time_limit
            .map(|v| v as f64)
            .unwrap_or(UNLIMITED_SECONDS);
        let real_time_limit = args
            .real_time_limit
            .map(|v| v as f64)
            .unwrap_or(time_limit);
        let space_limit = args.space_limit.map(|v| v as f64).unwrap_or(physical_memory_mb);

        Self {
            command: args.command.clone(),
            time_limit,
            real_time_limit,
            space_limit,
            sample_rate: Duration::from_micros(args.sample_rate),
            report_rate: args.report_rate,
            kill_delay: Duration::from_millis(args.kill_delay),
            single: args.single,
            propagate_signals: args.kill,
            propagate_exit_code: args.propagate,
        }
    }

    pub fn program(&self) -> &str {
        &self.command[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn parses_limits_and_command() {
        let args = parse(&["runcap", "-t", "10", "-s", "256", "prog", "a", "b"]);
        assert_eq!(args.time_limit, Some(10));
        assert_eq!(args.space_limit, Some(256));
        assert_eq!(args.command, vec!["prog", "a", "b"]);
    }

    #[test]
    fn parses_long_options_with_equals() {
        let args = parse(&[
            "runcap",
            "--time-limit=5",
            "--real-time-limit=7",
            "--sample-rate=50000",
            "--report-rate=10",
            "--kill-delay=100",
            "prog",
        ]);
        assert_eq!(args.time_limit, Some(5));
        assert_eq!(args.real_time_limit, Some(7));
        assert_eq!(args.sample_rate, 50_000);
        assert_eq!(args.report_rate, 10);
        assert_eq!(args.kill_delay, 100);
    }

    #[test]
    fn command_may_carry_its_own_flags() {
        let args = parse(&["runcap", "-t", "1", "sh", "-c", "exit 3"]);
        assert_eq!(args.command, vec!["sh", "-c", "exit 3"]);
    }

    #[test]
    fn command_is_required() {
        assert!(Args::try_parse_from(["runcap", "-t", "10"]).is_err());
    }

    #[test]
    fn zero_rates_are_rejected() {
        assert!(Args::try_parse_from(["runcap", "--sample-rate=0", "prog"]).is_err());
        assert!(Args::try_parse_from(["runcap", "--report-rate=0", "prog"]).is_err());
        assert!(Args::try_parse_from(["runcap", "--kill-delay=0", "prog"]).is_err());
        assert!(Args::try_parse_from(["runcap", "--kill-delay=1000000", "prog"]).is_err());
    }

    #[test]
    fn defaults_resolve_from_the_machine() {
        let args = parse(&["runcap", "prog"]);
        let config = Config::resolve(&args, 16384.0);

        assert_eq!(config.time_limit, UNLIMITED_SECONDS);
        assert_eq!(config.real_time_limit, UNLIMITED_SECONDS);
        assert_eq!(config.space_limit, 16384.0);
        assert_eq!(config.sample_rate, Duration::from_micros(100_000));
        assert_eq!(config.report_rate, 100);
        assert_eq!(config.kill_delay, Duration::from_millis(512));
        assert!(!config.single);
        assert!(!config.propagate_signals);
        assert!(!config.propagate_exit_code);
        assert_eq!(config.program(), "prog");
    }

    #[test]
    fn real_time_limit_follows_the_time_limit() {
        let args = parse(&["runcap", "-t", "30", "prog"]);
        let config = Config::resolve(&args, 1024.0);
        assert_eq!(config.time_limit, 30.0);
        assert_eq!(config.real_time_limit, 30.0);

        let args = parse(&["runcap", "-t", "30", "-r", "60", "prog"]);
        let config = Config::resolve(&args, 1024.0);
        assert_eq!(config.real_time_limit, 60.0);
    }
}

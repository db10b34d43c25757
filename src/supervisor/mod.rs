//! The supervising pipeline: fork, monitor, wait, classify, report.

pub mod enforce;
pub mod monitor;
pub mod signals;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, error};

use crate::cli::Config;
use crate::collector::{RealFs, SampleSource, snapshot};
use crate::outcome::Outcome;
use crate::report::Report;
use crate::sys::{self, Forked, WaitStatus};
use monitor::{Monitor, Stats};

const PROC_PATH: &str = "/proc";

/// Flags shared between the main thread and the monitor thread. The
/// one-shot flags only ever transition from clear to set.
pub struct Shared {
    stop: AtomicBool,
    killing: AtomicBool,
    out_of_time: AtomicBool,
    out_of_memory: AtomicBool,
}

impl Default for Shared {
    fn default() -> Self {
        Self::new()
    }
}

impl Shared {
    pub fn new() -> Self {
        Self {
            stop: AtomicBool::new(false),
            killing: AtomicBool::new(false),
            out_of_time: AtomicBool::new(false),
            out_of_memory: AtomicBool::new(false),
        }
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn killing(&self) -> bool {
        self.killing.load(Ordering::SeqCst)
    }

    /// Latches the killing flag; returns whether it was already latched.
    pub fn begin_killing(&self) -> bool {
        self.killing.swap(true, Ordering::SeqCst)
    }

    /// Latches the out-of-time flag; returns whether it was already latched.
    pub fn latch_out_of_time(&self) -> bool {
        self.out_of_time.swap(true, Ordering::SeqCst)
    }

    /// Latches the out-of-memory flag; returns whether it was already
    /// latched.
    pub fn latch_out_of_memory(&self) -> bool {
        self.out_of_memory.swap(true, Ordering::SeqCst)
    }

    pub fn out_of_time(&self) -> bool {
        self.out_of_time.load(Ordering::SeqCst)
    }

    pub fn out_of_memory(&self) -> bool {
        self.out_of_memory.load(Ordering::SeqCst)
    }
}

/// Supervises one command start to finish. Returns the exit code.
pub fn run(config: Config, report: Arc<Report>) -> i32 {
    banner(&config, &report);

    let image = match sys::ExecImage::new(&config.command) {
        Ok(image) => image,
        Err(err) => report.fatal(&format!("invalid command: {}", err)),
    };

    signals::install_exec_failure_handler();

    let start_tai = sys::tai_time();
    let shared = Arc::new(Shared::new());

    match sys::fork() {
        Err(err) => {
            error!("fork failed: {}", err);
            finalize(
                &report,
                &config,
                &shared,
                Outcome::ForkFailed,
                0,
                1,
                Stats::default(),
                0,
                sys::elapsed_real(start_tai),
                start_tai,
            )
        }
        Ok(Forked::Child) => {
            // Only async-signal-safe calls between fork and exec; the image
            // was prepared up front.
            let _failed = image.exec();
            sys::send_signal(sys::parent_process_id(), libc::SIGUSR1);
            sys::exit_child(1);
        }
        Ok(Forked::Parent(child_pid)) => supervise(config, report, shared, child_pid, start_tai),
    }
}

fn supervise(
    config: Config,
    report: Arc<Report>,
    shared: Arc<Shared>,
    child_pid: i32,
    start_tai: f64,
) -> i32 {
    signals::install_external_handlers();

    report.record("child", child_pid);
    debug!(
        "parent {} group {} session {}",
        sys::process_id(),
        sys::process_group_id(),
        sys::session_id()
    );

    // Give the child a head start before the first sample.
    thread::sleep(Duration::from_millis(10));

    let source = SampleSource::new(
        RealFs::new(),
        PROC_PATH,
        sys::process_id(),
        sys::process_group_id(),
        sys::session_id(),
        sys::clock_ticks() as f64,
        sys::memory_per_page_mb(),
        Arc::clone(&report),
    );
    let monitor = Monitor::new(
        config.clone(),
        child_pid,
        start_tai,
        source,
        Arc::clone(&report),
        Arc::clone(&shared),
    );
    let handle = thread::spawn(move || monitor.run());

    let status = sys::wait_for(child_pid);

    shared.request_stop();
    let mut monitor = match handle.join() {
        Ok(monitor) => monitor,
        Err(_) => report.fatal("monitor thread panicked"),
    };

    let mut outcome = Outcome::Ok;
    let mut signal = 0;
    let mut child_code = 0;
    match status {
        WaitStatus::Exited(code) => child_code = code,
        WaitStatus::Signaled(s) => {
            signal = s;
            child_code = 128 + s;
            outcome = Outcome::from_signal(s);
        }
        WaitStatus::Unknown => {
            outcome = Outcome::InternalError;
            child_code = 1;
        }
    }

    let real = monitor.real_time();

    // Reap anything the child left behind. Idempotent when the sampler
    // already enforced a limit.
    monitor.enforce();

    finalize(
        &report,
        &config,
        &shared,
        outcome,
        signal,
        child_code,
        monitor.stats(),
        monitor.processes(),
        real,
        start_tai,
    )
}

/// Applies the latches and the limit tie-breaks, emits the final record
/// block, and computes the exit code.
#[allow(clippy::too_many_arguments)]
fn finalize(
    report: &Report,
    config: &Config,
    shared: &Shared,
    wait_outcome: Outcome,
    signal: i32,
    child_code: i32,
    stats: Stats,
    processes: usize,
    real: f64,
    start_tai: f64,
) -> i32 {
    let mut outcome = wait_outcome;
    if signals::exec_failure_caught() {
        outcome = Outcome::ExecFailed;
    } else if shared.out_of_memory() {
        outcome = Outcome::OutOfMemory;
    } else if shared.out_of_time() {
        outcome = Outcome::OutOfTime;
    }

    report.record("end", timestamp());

    // A recorded maximum at or over its limit is out-of-time no matter how
    // the child ended.
    if stats.max_time >= config.time_limit || sys::elapsed_real(start_tai) >= config.real_time_limit
    {
        outcome = Outcome::OutOfTime;
    }

    let mut result = outcome.exit_code(child_code);

    report.record("status", outcome.describe(signal));
    report.record("result", result);
    report.record("children", stats.children);
    report.record("processes", processes);
    report.record("real", format!("{:.2} seconds", real));
    report.record("time", format!("{:.2} seconds", stats.max_time));
    report.record("space", format!("{:.0} MB", stats.max_memory));
    report.record("load", format!("{:.2} maximum", stats.max_load));
    report.record("samples", stats.num_samples);

    if outcome == Outcome::Ok && !config.propagate_exit_code {
        result = 0;
    }

    signals::restore_external_handlers();

    if config.propagate_signals && outcome.is_signal_class() {
        sys::raise_signal(signal);
    }

    result
}

fn banner(config: &Config, report: &Report) {
    report.record("version", env!("CARGO_PKG_VERSION"));
    match snapshot::read_host_name(&RealFs::new(), PROC_PATH, report) {
        Ok(host) => report.record("host", host),
        Err(err) => report.fatal(&err.to_string()),
    }
    report.record("time limit", format!("{:.0} seconds", config.time_limit));
    report.record(
        "real time limit",
        format!("{:.0} seconds", config.real_time_limit),
    );
    report.record("space limit", format!("{:.0} MB", config.space_limit));
    for (i, arg) in config.command.iter().enumerate() {
        report.record(&format!("argv[{}]", i), arg);
    }
    report.record("start", timestamp());
}

fn timestamp() -> String {
    chrono::Local::now().format("%a %b %e %H:%M:%S %Y").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            command: vec!["prog".to_string()],
            time_limit: 100.0,
            real_time_limit: 100.0,
            space_limit: 100.0,
            sample_rate: Duration::from_micros(100_000),
            report_rate: 100,
            kill_delay: Duration::from_millis(512),
            single: false,
            propagate_signals: false,
            propagate_exit_code: false,
        }
    }

    fn finalize_captured(
        config: &Config,
        shared: &Shared,
        wait_outcome: Outcome,
        signal: i32,
        child_code: i32,
        stats: Stats,
    ) -> (i32, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        let report = Report::to_file(path.to_str().unwrap()).unwrap();
        let code = finalize(
            &report,
            config,
            shared,
            wait_outcome,
            signal,
            child_code,
            stats,
            5,
            1.25,
            sys::tai_time(),
        );
        (code, std::fs::read_to_string(&path).unwrap())
    }

    #[test]
    fn one_shot_flags_latch_once() {
        let shared = Shared::new();
        assert!(!shared.latch_out_of_time());
        assert!(shared.latch_out_of_time());
        assert!(shared.out_of_time());

        assert!(!shared.latch_out_of_memory());
        assert!(shared.latch_out_of_memory());
        assert!(shared.out_of_memory());
    }

    #[test]
    fn clean_exit_is_ok_with_exit_code_zero() {
        let (code, out) =
            finalize_captured(&test_config(), &Shared::new(), Outcome::Ok, 0, 3, Stats::default());
        assert_eq!(code, 0);
        assert!(out.contains("[runcap] status:\t\tok\n"));
        // The result record reports the child's own code even when the
        // supervisor exits 0.
        assert!(out.contains("[runcap] result:\t\t3\n"));
    }

    #[test]
    fn propagate_uses_the_child_exit_code() {
        let mut config = test_config();
        config.propagate_exit_code = true;
        let (code, _) =
            finalize_captured(&config, &Shared::new(), Outcome::Ok, 0, 3, Stats::default());
        assert_eq!(code, 3);
    }

    #[test]
    fn breached_time_maximum_forces_out_of_time() {
        let mut stats = Stats::default();
        stats.max_time = 200.0;
        let (code, out) =
            finalize_captured(&test_config(), &Shared::new(), Outcome::Ok, 0, 0, stats);
        assert_eq!(code, 2);
        assert!(out.contains("out of time"));
    }

    #[test]
    fn memory_latch_outranks_a_signal_classification() {
        let shared = Shared::new();
        shared.latch_out_of_memory();
        let (code, out) = finalize_captured(
            &test_config(),
            &shared,
            Outcome::OtherSignal,
            libc::SIGTERM,
            128 + libc::SIGTERM,
            Stats::default(),
        );
        assert_eq!(code, 3);
        assert!(out.contains("out of memory"));
    }

    #[test]
    fn time_latch_yields_out_of_time() {
        let shared = Shared::new();
        shared.latch_out_of_time();
        let (code, out) = finalize_captured(
            &test_config(),
            &shared,
            Outcome::Ok,
            0,
            0,
            Stats::default(),
        );
        assert_eq!(code, 2);
        assert!(out.contains("out of time"));
    }

    #[test]
    fn final_records_are_complete_and_ordered() {
        let (_, out) =
            finalize_captured(&test_config(), &Shared::new(), Outcome::Ok, 0, 0, Stats::default());
        let tags: Vec<&str> = out
            .lines()
            .filter_map(|l| l.strip_prefix("[runcap] "))
            .filter_map(|l| l.split(':').next())
            .collect();
        assert_eq!(
            tags,
            vec![
                "end", "status", "result", "children", "processes", "real", "time", "space",
                "load", "samples"
            ]
        );
    }

    #[test]
    fn timestamps_are_ctime_shaped() {
        let stamp = timestamp();
        // "Wed Jun 30 21:49:08 1993" — four space-separated groups plus year.
        assert!(stamp.len() >= 20);
        assert!(stamp.split_whitespace().count() == 5 || stamp.split_whitespace().count() == 4);
    }
}

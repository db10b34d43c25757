//! The monitor thread: periodic sampling, maxima, limit enforcement.
//!
//! A dedicated thread rather than a timer signal handler: the sample pass
//! allocates, reads files and takes locks, none of which belongs in a
//! handler. The thread owns the registry and the sample source outright and
//! hands itself back to the main thread at join time, which makes the join
//! the synchronisation point for everything the final record block reads.

use std::sync::Arc;
use std::thread;

use tracing::debug;

use crate::cli::Config;
use crate::collector::{FileSystem, SampleSource};
use crate::report::Report;
use crate::supervisor::{Shared, enforce, signals};
use crate::sys;
use crate::tree::Registry;

/// Running aggregates, read by finalisation after the join.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub num_samples: u64,
    samples_since_report: u64,
    pub max_time: f64,
    pub max_memory: f64,
    pub max_load: f64,
    pub children: u64,
}

/// Owns the sampling state for one supervised run.
pub struct Monitor<F: FileSystem> {
    source: SampleSource<F>,
    registry: Registry,
    report: Arc<Report>,
    shared: Arc<Shared>,
    config: Config,
    child_pid: i32,
    start_tai: f64,
    stats: Stats,
}

impl<F: FileSystem> Monitor<F> {
    pub fn new(
        config: Config,
        child_pid: i32,
        start_tai: f64,
        source: SampleSource<F>,
        report: Arc<Report>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            source,
            registry: Registry::new(),
            report,
            shared,
            config,
            child_pid,
            start_tai,
            stats: Stats::default(),
        }
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Number of registry entries ever created.
    pub fn processes(&self) -> usize {
        self.registry.len()
    }

    /// Seconds of real time since the child was started.
    pub fn real_time(&self) -> f64 {
        sys::elapsed_real(self.start_tai)
    }

    /// Runs until the stop flag is set, then returns itself so finalisation
    /// can read the registry and run the last enforcement pass.
    pub fn run(mut self) -> Self {
        while !self.shared.stopped() {
            thread::sleep(self.config.sample_rate);
            if self.shared.stopped() {
                break;
            }
            if signals::external_signal_caught() {
                debug!("external signal {} caught", signals::external_signal());
                self.enforce();
                continue;
            }
            self.sample_pass();
        }
        self
    }

    /// Terminates the supervised tree. Idempotent.
    pub fn enforce(&mut self) {
        enforce::kill_tree(
            &mut self.source,
            &mut self.registry,
            &self.shared,
            self.child_pid,
            self.config.kill_delay,
            self.config.single,
            self.stats.num_samples,
        );
    }

    /// One sampling pass: snapshot, rebuild the tree, aggregate, flush,
    /// update maxima, report periodically, check limits.
    pub(crate) fn sample_pass(&mut self) {
        if self.shared.killing() {
            return;
        }

        let load = sys::load_average().unwrap_or(0.0);
        if load > self.stats.max_load {
            self.stats.max_load = load;
        }

        self.stats.num_samples += 1;
        let seq = self.stats.num_samples;

        let read = match self
            .source
            .snapshot_into(&mut self.registry, seq, self.child_pid, self.config.single)
        {
            Ok(read) => read,
            Err(err) => self.report.fatal(&err.to_string()),
        };
        self.registry.connect_tree(self.child_pid);

        let mut sampled = 0;
        let mut sampled_time = 0.0;
        let mut sampled_memory = 0.0;
        if read > 0
            && let Some(root) = self.registry.lookup(self.child_pid)
        {
            let totals = self.registry.aggregate(root, seq, &self.report);
            sampled = totals.visited;
            sampled_time = totals.time;
            sampled_memory = totals.memory;
            self.stats.children += totals.fresh;
        }
        debug!("sampled {} processes", sampled);

        sampled += self.registry.flush_inactive(seq);
        sampled_time += self.registry.accumulated_time();

        if sampled > 0 {
            if sampled_memory > self.stats.max_memory {
                self.stats.max_memory = sampled_memory;
            }
            if sampled_time > self.stats.max_time {
                self.stats.max_time = sampled_time;
            }
        }

        self.stats.samples_since_report += 1;
        if self.stats.samples_since_report >= self.config.report_rate {
            self.stats.samples_since_report = 0;
            if sampled > 0 {
                self.report.record(
                    "sample",
                    format!(
                        "{:.2} time, {:.2} real, {:.0} MB, {:.2} load",
                        sampled_time,
                        self.real_time(),
                        sampled_memory,
                        load
                    ),
                );
            }
        }

        if sampled > 0 {
            if sampled_time > self.config.time_limit || self.real_time() > self.config.real_time_limit
            {
                if !self.shared.latch_out_of_time() {
                    self.enforce();
                }
            } else if sampled_memory > self.config.space_limit && !self.shared.latch_out_of_memory() {
                self.enforce();
            }
        }
    }
}

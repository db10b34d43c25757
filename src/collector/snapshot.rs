//! Reading per-process samples out of `/proc`.
//!
//! `SampleSource` turns raw stat records into `ProcessSample`s, applying the
//! group/session filters that keep foreign processes out of the registry,
//! and enumerates the whole process table once per sample. Per-pid failures
//! are skips, never aborts: a process that exits between the directory scan
//! and the read simply misses the sample.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::collector::parser::{self, ParseError};
use crate::collector::traits::FileSystem;
use crate::report::Report;
use crate::tree::Registry;

/// Name of the external helper that remounts `/proc` when it went missing
/// (some environments lazily unmount it). Exit code 2 means the helper
/// itself could not be executed.
const REMOUNT_HELPER: &str = "runcap-remount-proc";

/// One process's contribution to a sample: CPU seconds and resident MB.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessSample {
    pub pid: i32,
    pub ppid: i32,
    pub time: f64,
    pub memory: f64,
}

/// Why a pid was skipped for this sample. None of these abort the run.
#[derive(Debug)]
pub enum SampleError {
    /// The stat file disappeared between enumeration and read.
    Gone(i32),
    /// The record names a different pid than the file it was read from.
    Mismatch(i32),
    /// Neither the process group nor the session ties the process to the
    /// supervised tree.
    Foreign(i32),
    /// The record could not be parsed or carried an invalid field.
    Malformed(i32, ParseError),
}

impl std::fmt::Display for SampleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleError::Gone(pid) => write!(f, "process {} disappeared", pid),
            SampleError::Mismatch(pid) => write!(f, "process {} reported a different pid", pid),
            SampleError::Foreign(pid) => write!(f, "process {} is outside the supervised group", pid),
            SampleError::Malformed(pid, e) => write!(f, "process {}: {}", pid, e),
        }
    }
}

impl std::error::Error for SampleError {}

/// Fatal `/proc` outages. These end the run.
#[derive(Debug, Error)]
pub enum ProcFsError {
    #[error("can not open directory '{0}'")]
    Unlistable(String),
    #[error("can not open '{0}' for reading")]
    Unreadable(String),
}

/// Reads process samples from the `/proc` filesystem.
pub struct SampleSource<F: FileSystem> {
    fs: F,
    proc_path: String,
    supervisor_pid: i32,
    group_id: i32,
    session_id: i32,
    clock_ticks: f64,
    memory_per_page: f64,
    report: Arc<Report>,
    remount_attempted: bool,
}

impl<F: FileSystem> SampleSource<F> {
    /// Creates a sample source.
    ///
    /// `clock_ticks` is the kernel tick rate (`sysconf(_SC_CLK_TCK)`) and
    /// `memory_per_page` the page size expressed in MB; both are injected so
    /// tests can pin them. `report` is the log sink remount warnings go to.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fs: F,
        proc_path: impl Into<String>,
        supervisor_pid: i32,
        group_id: i32,
        session_id: i32,
        clock_ticks: f64,
        memory_per_page: f64,
        report: Arc<Report>,
    ) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
            supervisor_pid,
            group_id,
            session_id,
            clock_ticks,
            memory_per_page,
            report,
            remount_attempted: false,
        }
    }

    /// Reads and filters one process's stat record.
    pub fn read_process(&self, pid: i32) -> Result<ProcessSample, SampleError> {
        let path = format!("{}/{}/stat", self.proc_path, pid);
        let content = self
            .fs
            .read_to_string(Path::new(&path))
            .map_err(|_| SampleError::Gone(pid))?;

        let stat = parser::parse_pid_stat(&content).map_err(|e| SampleError::Malformed(pid, e))?;

        if stat.pid != pid {
            return Err(SampleError::Mismatch(pid));
        }

        // A record is only interesting when the process group or the session
        // ties it to the supervised tree (its own group, the supervisor, or
        // the supervisor's group/session). The ppid alone is not enough: a
        // daemonising descendant reparents to init but keeps its group.
        if stat.pgrp != pid
            && stat.pgrp != self.supervisor_pid
            && stat.pgrp != self.group_id
            && stat.session != self.session_id
        {
            return Err(SampleError::Foreign(pid));
        }

        if stat.rss < 0 {
            return Err(SampleError::Malformed(pid, ParseError::new("negative rss")));
        }

        Ok(ProcessSample {
            pid,
            ppid: stat.ppid,
            time: (stat.utime + stat.stime) as f64 / self.clock_ticks,
            memory: stat.rss as f64 * self.memory_per_page,
        })
    }

    /// Scans the process table and folds every accepted record into the
    /// registry under sample `seq`. Returns the number of processes added.
    ///
    /// With `single` set only the root child's record is read, on the user's
    /// assertion that the command spawns no descendants.
    pub fn snapshot_into(
        &mut self,
        registry: &mut Registry,
        seq: u64,
        root_pid: i32,
        single: bool,
    ) -> Result<u64, ProcFsError> {
        if single {
            return Ok(self.sample_one(registry, root_pid, seq));
        }

        let entries = self.list_process_table()?;

        let mut added = 0;
        for path in entries {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Ok(pid) = name.parse::<i32>() else {
                continue;
            };
            if pid <= 0 || pid == self.supervisor_pid {
                continue;
            }
            added += self.sample_one(registry, pid, seq);
        }

        debug!("added {} processes", added);
        Ok(added)
    }

    fn sample_one(&self, registry: &mut Registry, pid: i32, seq: u64) -> u64 {
        match self.read_process(pid) {
            Ok(sample) => {
                registry.add_process(sample.pid, sample.ppid, sample.time, sample.memory, seq);
                1
            }
            Err(err) => {
                debug!("skipping: {}", err);
                0
            }
        }
    }

    fn list_process_table(&mut self) -> Result<Vec<PathBuf>, ProcFsError> {
        match self.fs.read_dir(Path::new(&self.proc_path)) {
            Ok(entries) => Ok(entries),
            Err(_) => {
                if !self.remount_attempted {
                    self.remount_attempted = true;
                    if remount_proc(&self.report) {
                        if let Ok(entries) = self.fs.read_dir(Path::new(&self.proc_path)) {
                            return Ok(entries);
                        }
                    }
                }
                Err(ProcFsError::Unlistable(self.proc_path.clone()))
            }
        }
    }
}

/// Runs the external remount helper once. Returns whether `/proc` is worth
/// retrying. A successful remount is surprising enough to warn about, on the
/// log sink so it survives `--output-file` redirection.
pub fn remount_proc(report: &Report) -> bool {
    debug!("trying to remount '/proc' file system");
    let status = match Command::new(REMOUNT_HELPER).status() {
        Ok(status) => status,
        Err(err) => {
            debug!("could not execute '{}': {}", REMOUNT_HELPER, err);
            return false;
        }
    };

    match status.code() {
        Some(0) => {
            report.warning("remounted '/proc' file system");
            true
        }
        Some(2) => {
            debug!("execution of '{}' process failed", REMOUNT_HELPER);
            false
        }
        _ => {
            debug!("mounting '/proc' through '{}' failed", REMOUNT_HELPER);
            false
        }
    }
}

/// Reads the host name from the kernel, retrying once behind a remount.
pub fn read_host_name<F: FileSystem>(
    fs: &F,
    proc_path: &str,
    report: &Report,
) -> Result<String, ProcFsError> {
    let path = format!("{}/sys/kernel/hostname", proc_path);
    let content = match fs.read_to_string(Path::new(&path)) {
        Ok(content) => content,
        Err(_) => {
            if remount_proc(report) {
                fs.read_to_string(Path::new(&path))
                    .map_err(|_| ProcFsError::Unreadable(path.clone()))?
            } else {
                return Err(ProcFsError::Unreadable(path));
            }
        }
    };
    Ok(content.trim_end_matches('\n').to_string())
}

//! In-memory mock filesystem for testing without a real `/proc`.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

use crate::collector::traits::FileSystem;

/// In-memory filesystem for testing.
///
/// Stores files and directories in memory, allowing tests to simulate
/// various `/proc` states without actual Linux access.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    files: HashMap<PathBuf, String>,
    directories: HashSet<PathBuf>,
}

impl MockFs {
    /// Creates a new empty mock filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file with the given content. Parent directories are created.
    pub fn add_file(&mut self, path: impl AsRef<Path>, content: impl Into<String>) {
        let path = path.as_ref().to_path_buf();

        let mut parent = path.parent();
        while let Some(p) = parent {
            if !p.as_os_str().is_empty() {
                self.directories.insert(p.to_path_buf());
            }
            parent = p.parent();
        }

        self.files.insert(path, content.into());
    }

    /// Adds an empty directory, creating parents.
    pub fn add_dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        self.directories.insert(path.clone());

        let mut parent = path.parent();
        while let Some(p) = parent {
            if !p.as_os_str().is_empty() {
                self.directories.insert(p.to_path_buf());
            }
            parent = p.parent();
        }
    }

    /// Adds `/proc/[pid]/stat` for a process described by the sampled fields.
    pub fn add_process(&mut self, proc_path: &str, fields: &StatFields) {
        let base = PathBuf::from(format!("{}/{}", proc_path, fields.pid));
        self.add_dir(&base);
        self.add_file(base.join("stat"), fields.stat_line());
    }

    /// Removes a process directory, simulating exit between samples.
    pub fn remove_process(&mut self, proc_path: &str, pid: i32) {
        let base = PathBuf::from(format!("{}/{}", proc_path, pid));
        self.files.remove(&base.join("stat"));
        self.directories.remove(&base);
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("{}: not found", path.display()))
        })
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        if !self.directories.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{}: not found", path.display()),
            ));
        }

        let mut entries: Vec<PathBuf> = self
            .directories
            .iter()
            .chain(self.files.keys())
            .filter(|p| p.parent() == Some(path))
            .cloned()
            .collect();
        entries.sort();
        entries.dedup();
        Ok(entries)
    }
}

/// The stat fields a fixture process needs; everything else in the record is
/// filled with plausible constants.
#[derive(Debug, Clone)]
pub struct StatFields {
    pub pid: i32,
    pub comm: String,
    pub ppid: i32,
    pub pgrp: i32,
    pub session: i32,
    pub utime: u64,
    pub stime: u64,
    pub rss: i64,
}

impl StatFields {
    pub fn new(pid: i32, ppid: i32, pgrp: i32, session: i32) -> Self {
        Self {
            pid,
            comm: format!("proc{}", pid),
            ppid,
            pgrp,
            session,
            utime: 0,
            stime: 0,
            rss: 0,
        }
    }

    pub fn with_usage(mut self, utime: u64, stime: u64, rss: i64) -> Self {
        self.utime = utime;
        self.stime = stime;
        self.rss = rss;
        self
    }

    /// Renders a full 52-field `/proc/[pid]/stat` record.
    pub fn stat_line(&self) -> String {
        format!(
            "{pid} ({comm}) S {ppid} {pgrp} {session} 0 -1 4194304 100 0 0 0 \
             {utime} {stime} 0 0 20 0 1 0 100 10000000 {rss} \
             18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0 0 0 0 0 0 0",
            pid = self.pid,
            comm = self.comm,
            ppid = self.ppid,
            pgrp = self.pgrp,
            session = self.session,
            utime = self.utime,
            stime = self.stime,
            rss = self.rss,
        )
    }
}

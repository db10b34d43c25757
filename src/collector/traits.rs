//! Abstraction for filesystem access to enable testing and mocking.
//!
//! The `FileSystem` trait lets the snapshot code read the real `/proc` on
//! Linux or an in-memory mock in tests and on other platforms.

use std::io;
use std::path::{Path, PathBuf};

/// Abstraction for the handful of filesystem operations the collector needs.
pub trait FileSystem: Send + Sync {
    /// Reads the entire contents of a file as a string.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Lists entries in a directory.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;
}

/// Real filesystem implementation that delegates to `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    /// Creates a new `RealFs` instance.
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(path)?;
        let mut paths = Vec::new();
        for entry in entries {
            paths.push(entry?.path());
        }
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_fs_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stat");
        std::fs::write(&path, "1 (init) S 0").unwrap();

        let fs = RealFs::new();
        assert_eq!(fs.read_to_string(&path).unwrap(), "1 (init) S 0");

        let listed = fs.read_dir(dir.path()).unwrap();
        assert_eq!(listed, vec![path]);
    }

    #[test]
    fn real_fs_missing_file_is_an_error() {
        let fs = RealFs::new();
        assert!(fs.read_to_string(Path::new("/no/such/file")).is_err());
    }
}

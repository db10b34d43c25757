//! Collecting process samples from the Linux `/proc` filesystem.
//!
//! The split mirrors the rest of the crate's testability story: `parser`
//! holds pure string parsing, `snapshot` the filtering and enumeration
//! logic, and everything reaches the filesystem through the `FileSystem`
//! trait so `mock` can stand in for `/proc` in tests.

pub mod mock;
pub mod parser;
pub mod snapshot;
pub mod traits;

pub use snapshot::{ProcFsError, ProcessSample, SampleError, SampleSource};
pub use traits::{FileSystem, RealFs};

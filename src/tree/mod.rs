//! The process registry and the per-sample walks over it.
//!
//! `registry` owns every observed process for the lifetime of the run;
//! `walk` rebuilds the parent/child links each sample and implements the
//! aggregation, flush and kill-order traversals.

pub mod registry;
pub mod walk;

pub use registry::{EntryId, ProcessEntry, Registry};
pub use walk::SampleTotals;

//! runcap - run a command under CPU, real time and memory limits.
//!
//! The library behind the `runcap` binary:
//! - `collector` - reading process samples out of `/proc`
//! - `tree` - the process registry and the per-sample tree walks
//! - `supervisor` - fork/monitor/wait pipeline, enforcement and signals
//! - `report` - the structured `[runcap]` record stream
//! - `cli`, `outcome`, `sys` - arguments, classification, OS interface

pub mod cli;
pub mod collector;
pub mod outcome;
pub mod report;
pub mod supervisor;
pub mod sys;
pub mod tree;

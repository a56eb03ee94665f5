//! # perf_stat
//!
//! Turns `perf stat --json -I <ms>` interval output into structured frames of
//! multiplexing groups. Counters inside one group were scheduled onto the PMU
//! together, so their values are time-consistent with each other; counters in
//! different groups may have been sampled over slightly different windows.
//!
//! The main entry points are [`GroupLayout`], which describes the groups that
//! were requested from perf, [`parse_frame`], which converts one interval's
//! records into an [`EventFrame`], and [`IntervalReader`], which splits a line
//! stream into per-interval samples.

mod frame;
mod layout;
mod parser;
mod reader;

pub use frame::*;
pub use layout::*;
pub use parser::*;
pub use reader::*;

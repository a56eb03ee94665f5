//! # metric_engine
//!
//! Derives human-meaningful metrics (instructions per cycle, cache miss rates,
//! residency percentages) from frames of multiplexed perf counter groups.
//!
//! Per frame, each [`MetricDefinition`] goes through three stages:
//!
//! 1. [`resolve`] picks, once per run, the counter group that supplies each
//!    formula variable, preferring as few groups as possible.
//! 2. [`Normalizer`] turns the raw counter deltas into per-second rates and
//!    applies per-event corrections.
//! 3. An [`Evaluator`] computes the formula from those rates.
//!
//! [`FramePipeline`] drives the stages over the full metric set and keeps one
//! failing metric from affecting the others; [`MetricStream`] adds the
//! per-target timestamp cursor on top of it.

mod definition;
mod evaluator;
mod loader;
mod metadata;
mod normalizer;
mod pipeline;
mod resolver;
mod stream;

pub use definition::*;
pub use evaluator::*;
pub use loader::*;
pub use metadata::*;
pub use normalizer::*;
pub use pipeline::*;
pub use resolver::*;
pub use stream::*;

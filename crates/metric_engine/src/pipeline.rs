use std::collections::HashMap;

use log::{debug, warn};
use perf_stat::{parse_frame, EventFrame, FrameError, GroupLayout};

use crate::evaluator::{EvaluationError, Evaluator, ExpressionEvaluator};
use crate::normalizer::{Bindings, Normalizer};
use crate::resolver::resolve;
use crate::{Metadata, Metric, MetricDefinition};

/// Controls how much per-metric detail the pipeline logs.
///
/// Never changes computed values.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Diagnostics {
    /// Log resolution and normalization failures, and the bindings of every
    /// successfully computed metric
    pub verbose: bool,
}

/// Metrics computed from one frame
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FrameMetrics {
    pub metrics: Vec<Metric>,
    /// Timestamp of the frame, to be passed as the previous timestamp of the next call
    pub timestamp: f64,
}

/// Computes the full metric set frame after frame.
///
/// Owns the metric definitions, whose group assignments are decided on the
/// first frame and kept for the run, and a cache of compiled formulas keyed by
/// each definition's position, so definitions sharing a name never share a
/// formula. Frames must be fed in timestamp order from a single owner; an
/// independent collection stream needs its own pipeline.
///
/// A failing metric never affects the others:
/// - variables no group supplies exclude the metric for the rest of the run
/// - normalization and evaluation errors skip the metric for the current frame only
pub struct FramePipeline<E: Evaluator = ExpressionEvaluator> {
    definitions: Vec<MetricDefinition>,
    normalizer: Normalizer,
    evaluator: E,
    compiled: HashMap<usize, E::Compiled>,
    diagnostics: Diagnostics,
}

impl FramePipeline<ExpressionEvaluator> {
    /// Creates a pipeline with the default normalizer and evaluator
    pub fn new(definitions: Vec<MetricDefinition>) -> Self {
        Self::with_parts(definitions, Normalizer::default(), ExpressionEvaluator::default())
    }
}

impl<E: Evaluator> FramePipeline<E> {
    pub fn with_parts(definitions: Vec<MetricDefinition>, normalizer: Normalizer, evaluator: E) -> Self {
        Self {
            definitions,
            normalizer,
            evaluator,
            compiled: HashMap::new(),
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn definitions(&self) -> &[MetricDefinition] {
        &self.definitions
    }

    /// True if the formula of a definition named `metric` has been compiled and cached
    pub fn is_compiled(&self, metric: &str) -> bool {
        self.definitions
            .iter()
            .enumerate()
            .any(|(index, definition)| definition.name == metric && self.compiled.contains_key(&index))
    }

    /// Parses a raw sample and computes its metrics.
    ///
    /// A sample that cannot be turned into a frame fails as a whole; nothing is
    /// computed since there is no timestamp to normalize against.
    pub fn process_sample<S: AsRef<str>>(
        &mut self,
        lines: &[S],
        layout: &GroupLayout,
        previous_timestamp: f64,
        metadata: &Metadata,
    ) -> Result<FrameMetrics, FrameError> {
        let frame = parse_frame(lines, layout)?;
        Ok(self.process_frame(&frame, previous_timestamp, metadata))
    }

    /// Computes every metric that can be computed from `frame`
    pub fn process_frame(
        &mut self,
        frame: &EventFrame,
        previous_timestamp: f64,
        metadata: &Metadata,
    ) -> FrameMetrics {
        let verbose = self.diagnostics.verbose;
        let mut metrics = Vec::with_capacity(self.definitions.len());

        for (index, definition) in self.definitions.iter_mut().enumerate() {
            // Already reported when resolution failed
            if definition.has_failed() {
                continue;
            }

            if definition.unresolved().next().is_some() {
                if let Err(e) = resolve(definition, frame) {
                    if verbose {
                        warn!("{}", e);
                    }
                    continue;
                }
            }

            let bindings = match self
                .normalizer
                .normalize(definition, frame, previous_timestamp, metadata)
            {
                Ok(bindings) => bindings,
                Err(e) => {
                    if verbose {
                        warn!(
                            "skipping metric {} at {}: {}",
                            definition.name, frame.timestamp, e
                        );
                    }
                    continue;
                }
            };

            let value = match evaluate_cached(&self.evaluator, &mut self.compiled, index, definition, &bindings) {
                Ok(value) => value,
                Err(e) => {
                    warn!(
                        "skipping metric {} at {}: {}",
                        definition.name, frame.timestamp, e
                    );
                    continue;
                }
            };

            if verbose {
                debug!(
                    "{} : {} : {}",
                    definition.name,
                    definition.expression,
                    format_bindings(&bindings)
                );
            }
            metrics.push(Metric::new(definition.name.clone(), value));
        }

        FrameMetrics {
            metrics,
            timestamp: frame.timestamp,
        }
    }
}

// Compile failures are not cached, so a broken formula is retried every frame.
fn evaluate_cached<E: Evaluator>(
    evaluator: &E,
    compiled: &mut HashMap<usize, E::Compiled>,
    index: usize,
    definition: &MetricDefinition,
    bindings: &Bindings,
) -> Result<f64, EvaluationError> {
    if let Some(expression) = compiled.get(&index) {
        return evaluator.evaluate(expression, bindings);
    }
    let expression = evaluator.compile(&definition.expression)?;
    let result = evaluator.evaluate(&expression, bindings);
    compiled.insert(index, expression);
    result
}

fn format_bindings(bindings: &Bindings) -> String {
    bindings
        .iter()
        .map(|(name, value)| format!("{}={:.6}", name, value))
        .collect::<Vec<_>>()
        .join(", ")
}

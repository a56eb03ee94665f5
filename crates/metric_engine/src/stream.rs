use perf_stat::{FrameError, GroupLayout};

use crate::evaluator::{Evaluator, ExpressionEvaluator};
use crate::pipeline::{FrameMetrics, FramePipeline};
use crate::Metadata;

/// Metric computation for one collection target.
///
/// Owns everything that must not be shared between targets: the pipeline with
/// its resolution state and compiled formulas, the host metadata, and the
/// timestamp of the last successfully processed frame.
pub struct MetricStream<E: Evaluator = ExpressionEvaluator> {
    pipeline: FramePipeline<E>,
    layout: GroupLayout,
    metadata: Metadata,
    previous_timestamp: f64,
    frames_processed: usize,
    frames_failed: usize,
}

impl<E: Evaluator> MetricStream<E> {
    pub fn new(pipeline: FramePipeline<E>, layout: GroupLayout, metadata: Metadata) -> Self {
        Self {
            pipeline,
            layout,
            metadata,
            previous_timestamp: 0.0,
            frames_processed: 0,
            frames_failed: 0,
        }
    }

    /// Computes the metrics of the next raw sample.
    ///
    /// The previous-timestamp cursor only advances when the sample parses, so
    /// the next good frame is normalized over the whole gap.
    pub fn process_sample<S: AsRef<str>>(&mut self, lines: &[S]) -> Result<FrameMetrics, FrameError> {
        let result = self
            .pipeline
            .process_sample(lines, &self.layout, self.previous_timestamp, &self.metadata);
        match result {
            Ok(metrics) => {
                self.previous_timestamp = metrics.timestamp;
                self.frames_processed += 1;
                Ok(metrics)
            }
            Err(e) => {
                self.frames_failed += 1;
                Err(e)
            }
        }
    }

    pub fn previous_timestamp(&self) -> f64 {
        self.previous_timestamp
    }

    pub fn frames_processed(&self) -> usize {
        self.frames_processed
    }

    pub fn frames_failed(&self) -> usize {
        self.frames_failed
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn pipeline(&self) -> &FramePipeline<E> {
        &self.pipeline
    }
}

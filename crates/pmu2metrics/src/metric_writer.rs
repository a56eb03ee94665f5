use std::io::Write;

use anyhow::{anyhow, Result};
use metric_engine::FrameMetrics;
use serde::Serialize;

/// One output row: a single metric value of a single frame
#[derive(Debug, Serialize)]
struct MetricRow<'a> {
    timestamp: f64,
    target: &'a str,
    metric: &'a str,
    value: f64,
}

/// Writes computed metrics as CSV rows, one per metric per frame
pub struct MetricWriter<W: Write> {
    writer: csv::Writer<W>,
    target: String,
    rows_written: usize,
}

impl<W: Write> MetricWriter<W> {
    pub fn new(writer: W, target: impl Into<String>) -> Self {
        Self {
            writer: csv::Writer::from_writer(writer),
            target: target.into(),
            rows_written: 0,
        }
    }

    /// Writes every metric of a frame
    pub fn write(&mut self, frame: &FrameMetrics) -> Result<()> {
        for metric in &frame.metrics {
            self.writer
                .serialize(MetricRow {
                    timestamp: frame.timestamp,
                    target: &self.target,
                    metric: &metric.name,
                    value: metric.value,
                })
                .map_err(|e| anyhow!("Failed to write metric row: {}", e))?;
            self.rows_written += 1;
        }
        Ok(())
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Flushes buffered rows and returns the underlying writer
    pub fn close(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| anyhow!("Failed to flush metric writer: {}", e))
    }
}

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{error, info};
use metric_engine::MetricStream;
use perf_stat::IntervalReader;
use tokio_util::sync::CancellationToken;

use crate::metric_writer::MetricWriter;

/// Input path that selects standard input
pub const STDIN: &str = "-";

/// One collection target: where its samples come from and where its metrics go
#[derive(Debug, Clone)]
pub struct Target {
    pub label: String,
    pub input: PathBuf,
    pub output: Option<PathBuf>,
}

impl Target {
    /// Derives the label from the input file name, or uses `hostname` for stdin
    pub fn new(input: PathBuf, output_dir: Option<&Path>, hostname: &str) -> Self {
        let label = if input.as_os_str() == STDIN {
            hostname.to_string()
        } else {
            input
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| hostname.to_string())
        };
        let output = output_dir.map(|dir| dir.join(format!("{}_metrics.csv", label)));
        Self { label, input, output }
    }

    fn open_input(&self) -> Result<Box<dyn BufRead>> {
        if self.input.as_os_str() == STDIN {
            return Ok(Box::new(BufReader::new(io::stdin())));
        }
        let file = File::open(&self.input)
            .with_context(|| format!("Failed to open input file: {}", self.input.display()))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn open_output(&self) -> Result<Box<dyn Write>> {
        match &self.output {
            Some(path) => {
                let file = File::create(path)
                    .with_context(|| format!("Failed to create output file: {}", path.display()))?;
                Ok(Box::new(BufWriter::new(file)))
            }
            None => Ok(Box::new(io::stdout())),
        }
    }
}

/// Counts reported once a target is done
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TargetSummary {
    pub frames: usize,
    pub failed_frames: usize,
    pub rows: usize,
}

impl fmt::Display for TargetSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames, {} failed frames, {} metric rows",
            self.frames, self.failed_frames, self.rows
        )
    }
}

/// Runs the sampling loop for one target until its input ends or `token` is cancelled
pub fn run_target(target: &Target, stream: MetricStream, token: &CancellationToken) -> Result<TargetSummary> {
    let input = target.open_input()?;
    let output = target.open_output()?;
    process_samples(target, input, output, stream, token)
}

/// Feeds every sample of `input` through the stream and writes the metrics to `output`.
///
/// A sample that cannot be parsed is logged and skipped; the stream keeps its
/// previous timestamp, so the next good frame covers the gap.
pub fn process_samples<R: BufRead, W: Write>(
    target: &Target,
    input: R,
    output: W,
    mut stream: MetricStream,
    token: &CancellationToken,
) -> Result<TargetSummary> {
    let mut writer = MetricWriter::new(output, target.label.clone());

    for sample in IntervalReader::new(input) {
        if token.is_cancelled() {
            info!("{}: cancelled, stopping after {} frames", target.label, stream.frames_processed());
            break;
        }
        let sample = sample
            .with_context(|| format!("Failed to read samples from {}", target.input.display()))?;
        match stream.process_sample(&sample) {
            Ok(frame) => writer.write(&frame)?,
            Err(e) => error!("{}: failed to process sample: {}", target.label, e),
        }
    }

    let summary = TargetSummary {
        frames: stream.frames_processed(),
        failed_frames: stream.frames_failed(),
        rows: writer.rows_written(),
    };
    writer.close()?.flush()?;
    Ok(summary)
}

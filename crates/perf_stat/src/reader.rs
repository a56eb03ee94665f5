use std::io::{self, BufRead, Lines};

use serde::Deserialize;

use crate::is_record_line;

#[derive(Deserialize)]
struct IntervalOnly {
    interval: f64,
}

fn record_interval(line: &str) -> Option<f64> {
    serde_json::from_str::<IntervalOnly>(line)
        .ok()
        .map(|record| record.interval)
}

/// Splits a stream of perf stat output into per-interval samples.
///
/// Consecutive record lines sharing the same `interval` value form one sample.
/// Non-record lines are dropped. A line whose interval cannot be read stays
/// with the sample being built, so the frame parser reports it.
pub struct IntervalReader<R> {
    lines: Lines<R>,
    pending: Option<(Option<f64>, String)>,
}

impl<R: BufRead> IntervalReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            pending: None,
        }
    }
}

impl<R: BufRead> Iterator for IntervalReader<R> {
    type Item = io::Result<Vec<String>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut sample = Vec::new();
        let mut interval = None;

        if let Some((pending_interval, line)) = self.pending.take() {
            interval = pending_interval;
            sample.push(line);
        }

        for line in self.lines.by_ref() {
            let line = match line {
                Ok(line) => line,
                Err(e) => return Some(Err(e)),
            };
            if !is_record_line(&line) {
                continue;
            }

            let line_interval = record_interval(&line);
            if interval.is_some() && line_interval.is_some() && line_interval != interval {
                self.pending = Some((line_interval, line));
                return Some(Ok(sample));
            }
            if interval.is_none() {
                interval = line_interval;
            }
            sample.push(line);
        }

        if sample.is_empty() {
            None
        } else {
            Some(Ok(sample))
        }
    }
}

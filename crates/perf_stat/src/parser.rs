use log::debug;
use serde::Deserialize;
use thiserror::Error;

use crate::{EventFrame, EventGroup, GroupLayout};

/// Counter value perf prints for an event that never got PMU time
pub const NOT_COUNTED: &str = "<not counted>";
/// Counter value perf prints for an event the PMU does not support
pub const NOT_SUPPORTED: &str = "<not supported>";

/// Errors that make a sample unusable as a frame
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("sample contains no perf stat records")]
    Empty,

    #[error("malformed perf stat record on line {line}: {source}")]
    MalformedRecord {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid counter value {value:?} for event {event}")]
    InvalidCounterValue { event: String, value: String },

    #[error("event {event} reports interval {found}, expected {expected}")]
    IntervalMismatch {
        event: String,
        expected: f64,
        found: f64,
    },

    #[error("group {group} expected event {expected}, found {found}")]
    UnexpectedEvent {
        group: usize,
        expected: String,
        found: String,
    },

    #[error("sample has {found} records but the layout defines {expected} events")]
    RecordCount { expected: usize, found: usize },
}

/// One line of `perf stat --json -I` output
#[derive(Debug, Clone, Deserialize)]
pub struct PerfStatRecord {
    /// Interval end, in seconds since perf started
    pub interval: f64,
    /// Counter value as printed by perf
    #[serde(rename = "counter-value")]
    pub counter_value: String,
    /// Event name as reported by perf
    pub event: String,
}

impl PerfStatRecord {
    /// Parses one JSON line
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// Returns the counter value, or `None` when perf could not count the event
    pub fn value(&self) -> Result<Option<f64>, FrameError> {
        match self.counter_value.trim() {
            NOT_COUNTED | NOT_SUPPORTED => Ok(None),
            value => value
                .parse::<f64>()
                .map(Some)
                .map_err(|_| FrameError::InvalidCounterValue {
                    event: self.event.clone(),
                    value: self.counter_value.clone(),
                }),
        }
    }
}

/// Returns true if the line looks like a perf stat JSON record.
///
/// perf interleaves headers and warnings with its records; those are skipped.
pub fn is_record_line(line: &str) -> bool {
    line.trim_start().starts_with('{')
}

/// Converts one interval's raw lines into a frame.
///
/// Records are assigned to groups in layout order: group `i` consumes the next
/// `layout.groups()[i].len()` records. Events perf could not count are left out
/// of their group. Any structural disagreement with the layout fails the whole
/// frame, since there is no reliable way to attribute values to groups.
pub fn parse_frame<S: AsRef<str>>(lines: &[S], layout: &GroupLayout) -> Result<EventFrame, FrameError> {
    let mut records = Vec::with_capacity(layout.event_count());
    for (line_index, line) in lines.iter().enumerate() {
        let line = line.as_ref();
        if !is_record_line(line) {
            continue;
        }
        let record = PerfStatRecord::parse(line).map_err(|source| FrameError::MalformedRecord {
            line: line_index + 1,
            source,
        })?;
        records.push(record);
    }

    let timestamp = records.first().ok_or(FrameError::Empty)?.interval;
    if records.len() != layout.event_count() {
        return Err(FrameError::RecordCount {
            expected: layout.event_count(),
            found: records.len(),
        });
    }

    let mut records = records.into_iter();
    let mut groups = Vec::with_capacity(layout.groups().len());
    for (group_index, group_definition) in layout.groups().iter().enumerate() {
        let mut group = EventGroup::new();
        for expected in group_definition.events() {
            let record = records.next().ok_or(FrameError::RecordCount {
                expected: layout.event_count(),
                found: 0,
            })?;
            if record.interval != timestamp {
                return Err(FrameError::IntervalMismatch {
                    event: record.event,
                    expected: timestamp,
                    found: record.interval,
                });
            }
            if record.event != expected.output_name() {
                return Err(FrameError::UnexpectedEvent {
                    group: group_index,
                    expected: expected.output_name().to_string(),
                    found: record.event,
                });
            }
            match record.value()? {
                Some(value) => group.insert(record.event, value),
                None => debug!(
                    "event {} in group {} not counted at {}",
                    record.event, group_index, timestamp
                ),
            }
        }
        groups.push(group);
    }

    Ok(EventFrame::new(timestamp, groups))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn record(interval: f64, event: &str, value: &str) -> String {
        format!(
            r#"{{"interval" : {interval:.9}, "counter-value" : "{value}", "unit" : "", "event" : "{event}", "event-runtime" : 1000812112, "pcnt-running" : 100.00, "metric-value" : "0.000000", "metric-unit" : ""}}"#
        )
    }

    fn layout() -> GroupLayout {
        GroupLayout::from_groups(vec![
            vec!["cpu-cycles", "instructions"],
            vec!["cpu-cycles", "cstate_core/c6-residency/"],
        ])
    }

    #[test]
    fn test_parse_frame() {
        let lines = vec![
            "# started on Mon Oct 19 10:00:00 2026".to_string(),
            record(1.001119514, "cpu-cycles", "1000000000.000000"),
            record(1.001119514, "instructions", "2000000000.000000"),
            record(1.001119514, "cpu-cycles", "990000000.000000"),
            record(1.001119514, "cstate_core/c6-residency/", "500000.000000"),
        ];

        let frame = parse_frame(&lines, &layout()).unwrap();

        assert_eq!(frame.timestamp, 1.001119514);
        assert_eq!(frame.groups.len(), 2);
        assert_eq!(frame.groups[0].get("instructions"), Some(2_000_000_000.0));
        assert_eq!(frame.groups[1].get("cpu-cycles"), Some(990_000_000.0));
        assert_eq!(frame.groups[1].get("cstate_core/c6-residency/"), Some(500_000.0));
    }

    #[rstest]
    #[case(NOT_COUNTED)]
    #[case(NOT_SUPPORTED)]
    fn test_uncounted_event_is_absent(#[case] value: &str) {
        let lines = vec![
            record(2.0, "cpu-cycles", "1.0"),
            record(2.0, "instructions", "2.0"),
            record(2.0, "cpu-cycles", "3.0"),
            record(2.0, "cstate_core/c6-residency/", value),
        ];

        let frame = parse_frame(&lines, &layout()).unwrap();

        assert_eq!(frame.groups[1].len(), 1);
        assert!(!frame.groups[1].contains("cstate_core/c6-residency/"));
    }

    #[test]
    fn test_empty_sample() {
        let lines: Vec<String> = vec!["# header only".to_string()];
        assert!(matches!(parse_frame(&lines, &layout()), Err(FrameError::Empty)));
    }

    #[test]
    fn test_malformed_record() {
        let lines = vec![record(1.0, "cpu-cycles", "1.0"), "{\"interval\" : ".to_string()];
        assert!(matches!(
            parse_frame(&lines, &layout()),
            Err(FrameError::MalformedRecord { line: 2, .. })
        ));
    }

    #[test]
    fn test_record_count_mismatch() {
        let lines = vec![record(1.0, "cpu-cycles", "1.0"), record(1.0, "instructions", "2.0")];
        assert!(matches!(
            parse_frame(&lines, &layout()),
            Err(FrameError::RecordCount { expected: 4, found: 2 })
        ));
    }

    #[test]
    fn test_unexpected_event() {
        let lines = vec![
            record(1.0, "cpu-cycles", "1.0"),
            record(1.0, "instructions", "2.0"),
            record(1.0, "ref-cycles", "3.0"),
            record(1.0, "cstate_core/c6-residency/", "4.0"),
        ];
        match parse_frame(&lines, &layout()) {
            Err(FrameError::UnexpectedEvent { group, expected, found }) => {
                assert_eq!(group, 1);
                assert_eq!(expected, "cpu-cycles");
                assert_eq!(found, "ref-cycles");
            }
            other => panic!("Expected UnexpectedEvent, got {:?}", other),
        }
    }

    #[test]
    fn test_interval_mismatch() {
        let lines = vec![
            record(1.0, "cpu-cycles", "1.0"),
            record(1.0, "instructions", "2.0"),
            record(2.0, "cpu-cycles", "3.0"),
            record(2.0, "cstate_core/c6-residency/", "4.0"),
        ];
        assert!(matches!(
            parse_frame(&lines, &layout()),
            Err(FrameError::IntervalMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_counter_value() {
        let lines = vec![
            record(1.0, "cpu-cycles", "lots"),
            record(1.0, "instructions", "2.0"),
            record(1.0, "cpu-cycles", "3.0"),
            record(1.0, "cstate_core/c6-residency/", "4.0"),
        ];
        assert!(matches!(
            parse_frame(&lines, &layout()),
            Err(FrameError::InvalidCounterValue { .. })
        ));
    }
}

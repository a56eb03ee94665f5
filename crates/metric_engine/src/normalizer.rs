use std::collections::{BTreeMap, HashMap};

use perf_stat::EventFrame;
use thiserror::Error;

use crate::resolver::{resolve, ResolveError};
use crate::{Metadata, MetricDefinition, Resolution};

/// Core C6 residency counter, counted per logical thread
pub const CORE_C6_RESIDENCY: &str = "cstate_core/c6-residency/";

/// Per-event correction applied to a rate after normalization
pub type Adjustment = fn(f64, &Metadata) -> f64;

/// Variable name to per-second value, ready for evaluation
pub type Bindings = BTreeMap<String, f64>;

/// Errors that keep a metric out of the current frame
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizeError {
    #[error("at least one of the variables couldn't be assigned to a group: {0}")]
    Unresolvable(#[from] ResolveError),

    #[error("metric variable group assignment previously failed: {0}")]
    PreviouslyFailed(String),

    #[error("metric variable has no group assignment: {0}")]
    Unassigned(String),

    #[error("interval must be positive: previous timestamp {previous}, current {current}")]
    NonPositiveInterval { previous: f64, current: f64 },

    #[error("no value for {variable} in group {group}")]
    MissingValue { variable: String, group: usize },
}

/// Scales a per-thread rate up to a per-physical-core rate
pub fn per_physical_core(rate: f64, metadata: &Metadata) -> f64 {
    if metadata.threads_per_core > 1 {
        rate * f64::from(metadata.threads_per_core)
    } else {
        rate
    }
}

/// Turns accumulated counter values into per-second rates.
///
/// Events without an entry in the adjustment table pass through unchanged.
/// The default table scales [`CORE_C6_RESIDENCY`] by threads per core: the
/// counter is sampled per logical thread while residency formulas expect a
/// per-core basis.
#[derive(Clone)]
pub struct Normalizer {
    adjustments: HashMap<String, Adjustment>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::identity().with_adjustment(CORE_C6_RESIDENCY, per_physical_core)
    }
}

impl Normalizer {
    /// A normalizer without any per-event corrections
    pub fn identity() -> Self {
        Self {
            adjustments: HashMap::new(),
        }
    }

    /// Adds or replaces the correction for one event
    pub fn with_adjustment(mut self, event: impl Into<String>, adjustment: Adjustment) -> Self {
        self.adjustments.insert(event.into(), adjustment);
        self
    }

    /// Applies the event's correction, if any, to an already normalized rate
    pub fn adjust(&self, event: &str, rate: f64, metadata: &Metadata) -> f64 {
        match self.adjustments.get(event) {
            Some(adjustment) => adjustment(rate, metadata),
            None => rate,
        }
    }

    /// Builds the variable bindings of `metric` for `frame`.
    ///
    /// Resolves the metric first if any variable is still unresolved. Each
    /// value is the raw counter divided by the time since `previous_timestamp`.
    pub fn normalize(
        &self,
        metric: &mut MetricDefinition,
        frame: &EventFrame,
        previous_timestamp: f64,
        metadata: &Metadata,
    ) -> Result<Bindings, NormalizeError> {
        if let Some((name, _)) = metric
            .variables
            .iter()
            .find(|(_, r)| **r == Resolution::Failed)
        {
            return Err(NormalizeError::PreviouslyFailed(name.clone()));
        }
        if metric.unresolved().next().is_some() {
            resolve(metric, frame)?;
        }

        let interval = frame.timestamp - previous_timestamp;
        // Negated so that NaN is rejected too
        if !(interval > 0.0) {
            return Err(NormalizeError::NonPositiveInterval {
                previous: previous_timestamp,
                current: frame.timestamp,
            });
        }

        let mut bindings = Bindings::new();
        for (name, resolution) in &metric.variables {
            let group_index = match resolution {
                Resolution::Group(index) => *index,
                Resolution::Failed => return Err(NormalizeError::PreviouslyFailed(name.clone())),
                Resolution::Unresolved => return Err(NormalizeError::Unassigned(name.clone())),
            };
            let raw = frame
                .groups
                .get(group_index)
                .and_then(|group| group.get(name))
                .ok_or_else(|| NormalizeError::MissingValue {
                    variable: name.clone(),
                    group: group_index,
                })?;
            let rate = self.adjust(name, raw / interval, metadata);
            bindings.insert(name.clone(), rate);
        }
        Ok(bindings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perf_stat::EventGroup;
    use rstest::rstest;

    fn metadata(threads_per_core: u32) -> Metadata {
        Metadata {
            hostname: "test".to_string(),
            threads_per_core,
            ..Metadata::default()
        }
    }

    fn single_group_frame(timestamp: f64, values: &[(&str, f64)]) -> EventFrame {
        EventFrame::new(timestamp, vec![values.iter().copied().collect::<EventGroup>()])
    }

    #[test]
    fn test_rate_normalization() {
        let mut metric = MetricDefinition::new("m", "instr", ["instr"]);
        let frame = single_group_frame(1.0, &[("instr", 2_000_000_000.0)]);

        let bindings = Normalizer::default()
            .normalize(&mut metric, &frame, 0.0, &metadata(1))
            .unwrap();

        assert_eq!(bindings["instr"], 2_000_000_000.0);
    }

    #[test]
    fn test_rate_uses_interval() {
        let mut metric = MetricDefinition::new("m", "instr", ["instr"]);
        let frame = single_group_frame(3.5, &[("instr", 1000.0)]);

        let bindings = Normalizer::default()
            .normalize(&mut metric, &frame, 1.5, &metadata(1))
            .unwrap();

        assert_eq!(bindings["instr"], 500.0);
    }

    #[rstest]
    #[case(2, 1.0e9)]
    #[case(1, 5.0e8)]
    #[case(4, 2.0e9)]
    fn test_core_residency_correction(#[case] threads_per_core: u32, #[case] expected: f64) {
        let mut metric = MetricDefinition::new("c6", "", [CORE_C6_RESIDENCY, "TSC"]);
        let frame = single_group_frame(2.0, &[(CORE_C6_RESIDENCY, 5.0e8), ("TSC", 5.0e8)]);

        let bindings = Normalizer::default()
            .normalize(&mut metric, &frame, 1.0, &metadata(threads_per_core))
            .unwrap();

        assert_eq!(bindings[CORE_C6_RESIDENCY], expected);
        assert_eq!(bindings["TSC"], 5.0e8);
    }

    #[test]
    fn test_identity_normalizer_skips_correction() {
        let mut metric = MetricDefinition::new("c6", "", [CORE_C6_RESIDENCY]);
        let frame = single_group_frame(1.0, &[(CORE_C6_RESIDENCY, 5.0e8)]);

        let bindings = Normalizer::identity()
            .normalize(&mut metric, &frame, 0.0, &metadata(2))
            .unwrap();

        assert_eq!(bindings[CORE_C6_RESIDENCY], 5.0e8);
    }

    #[test]
    fn test_custom_adjustment() {
        fn double(rate: f64, _: &Metadata) -> f64 {
            rate * 2.0
        }
        let normalizer = Normalizer::identity().with_adjustment("uncore_clock", double);

        assert_eq!(normalizer.adjust("uncore_clock", 3.0, &metadata(1)), 6.0);
        assert_eq!(normalizer.adjust("instructions", 3.0, &metadata(1)), 3.0);
    }

    #[rstest]
    #[case(1.0, 1.0)]
    #[case(1.0, 2.0)]
    #[case(f64::NAN, 1.0)]
    fn test_non_positive_interval(#[case] timestamp: f64, #[case] previous: f64) {
        let mut metric = MetricDefinition::new("m", "instr", ["instr"]);
        let frame = single_group_frame(timestamp, &[("instr", 1.0)]);

        let result = Normalizer::default().normalize(&mut metric, &frame, previous, &metadata(1));

        assert!(matches!(result, Err(NormalizeError::NonPositiveInterval { .. })));
        // Not permanent: the metric stays resolved
        assert_eq!(metric.resolution("instr"), Some(Resolution::Group(0)));
    }

    #[test]
    fn test_triggers_resolution() {
        let mut metric = MetricDefinition::new("m", "a", ["a"]);
        let frame = single_group_frame(1.0, &[("b", 1.0)]);

        let result = Normalizer::default().normalize(&mut metric, &frame, 0.0, &metadata(1));

        assert!(matches!(result, Err(NormalizeError::Unresolvable(_))));
        assert_eq!(metric.resolution("a"), Some(Resolution::Failed));
    }

    #[test]
    fn test_previously_failed() {
        let mut metric = MetricDefinition::new("m", "a", ["a"]);
        metric.variables.insert("a".to_string(), Resolution::Failed);
        let frame = single_group_frame(1.0, &[("a", 1.0)]);

        let result = Normalizer::default().normalize(&mut metric, &frame, 0.0, &metadata(1));

        assert_eq!(result, Err(NormalizeError::PreviouslyFailed("a".to_string())));
    }

    #[test]
    fn test_missing_value_is_transient() {
        let mut metric = MetricDefinition::new("m", "a", ["a"]);
        metric.variables.insert("a".to_string(), Resolution::Group(1));
        let normalizer = Normalizer::default();

        // Group 1 missing entirely, then present without the event, then present with it
        let frames = [
            single_group_frame(1.0, &[("a", 1.0)]),
            EventFrame::new(2.0, vec![EventGroup::new(), EventGroup::new()]),
        ];
        for frame in &frames {
            let result = normalizer.normalize(&mut metric, frame, 0.0, &metadata(1));
            assert_eq!(
                result,
                Err(NormalizeError::MissingValue {
                    variable: "a".to_string(),
                    group: 1,
                })
            );
        }

        let frame = EventFrame::new(
            3.0,
            vec![EventGroup::new(), [("a", 6.0)].into_iter().collect()],
        );
        let bindings = normalizer.normalize(&mut metric, &frame, 0.0, &metadata(1)).unwrap();
        assert_eq!(bindings["a"], 2.0);
    }
}

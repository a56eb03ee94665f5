use std::collections::BTreeSet;

use perf_stat::EventFrame;
use thiserror::Error;

use crate::{MetricDefinition, Resolution};

/// Variables of a metric that no group in the frame could supply
#[derive(Error, Debug, Clone, PartialEq)]
#[error("metric variables ({}) not found for metric: {metric}", .variables.join(", "))]
pub struct ResolveError {
    pub metric: String,
    pub variables: Vec<String>,
}

/// Assigns every unresolved variable of `metric` to a group of `frame`.
///
/// Greedy maximum coverage: repeatedly pick the group that carries the most
/// still-unassigned variables and assign them all to it. Using as few groups
/// as possible keeps a formula's inputs from drifting apart in time. On equal
/// coverage the earliest group wins. When no group carries any of the
/// remaining variables they are marked [`Resolution::Failed`] for good.
///
/// Variables that are already `Group(_)` or `Failed` are left untouched, so
/// calling this on a resolved metric is a no-op regardless of the frame.
pub fn resolve(metric: &mut MetricDefinition, frame: &EventFrame) -> Result<(), ResolveError> {
    let mut remaining: BTreeSet<String> = metric.unresolved().map(str::to_string).collect();

    while !remaining.is_empty() {
        let mut best: Option<(usize, Vec<String>)> = None;
        for (group_index, group) in frame.groups.iter().enumerate() {
            let best_matches = best.as_ref().map_or(0, |(_, matched)| matched.len());
            let matched: Vec<String> = remaining
                .iter()
                .filter(|name| group.contains(name))
                .cloned()
                .collect();
            if matched.len() > best_matches {
                let perfect = matched.len() == remaining.len();
                best = Some((group_index, matched));
                if perfect {
                    break;
                }
            }
        }

        match best {
            Some((group_index, matched)) => {
                for name in matched {
                    remaining.remove(&name);
                    metric.variables.insert(name, Resolution::Group(group_index));
                }
            }
            None => {
                for name in &remaining {
                    metric.variables.insert(name.clone(), Resolution::Failed);
                }
                return Err(ResolveError {
                    metric: metric.name.clone(),
                    variables: remaining.into_iter().collect(),
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use perf_stat::EventGroup;
    use rstest::rstest;

    fn group(names: &[&str]) -> EventGroup {
        names.iter().map(|name| (*name, 1.0)).collect()
    }

    fn frame(groups: &[&[&str]]) -> EventFrame {
        EventFrame::new(1.0, groups.iter().map(|names| group(names)).collect())
    }

    #[test]
    fn test_single_group_covers_all() {
        let mut metric = MetricDefinition::new("ipc", "instr / cycles", ["instr", "cycles"]);
        let frame = frame(&[&["ref-cycles"], &["instr", "cycles", "ref-cycles"]]);

        resolve(&mut metric, &frame).unwrap();

        assert_eq!(metric.resolution("instr"), Some(Resolution::Group(1)));
        assert_eq!(metric.resolution("cycles"), Some(Resolution::Group(1)));
    }

    #[test]
    fn test_greedy_prefers_widest_group() {
        let mut metric = MetricDefinition::new("m", "a + b + c", ["a", "b", "c"]);
        let frame = frame(&[&["a"], &["b", "c"], &["a", "c"], &["a", "b"]]);

        resolve(&mut metric, &frame).unwrap();

        // Group 1 is the first with two matches; "a" then goes to the first group carrying it
        assert_eq!(metric.resolution("b"), Some(Resolution::Group(1)));
        assert_eq!(metric.resolution("c"), Some(Resolution::Group(1)));
        assert_eq!(metric.resolution("a"), Some(Resolution::Group(0)));
    }

    #[rstest]
    #[case(vec![&["x", "y"][..], &["x", "y"][..]], 0)]
    #[case(vec![&["x"][..], &["x", "y"][..], &["x", "y"][..]], 1)]
    #[case(vec![&["z"][..], &["y"][..], &["x", "y", "z"][..]], 2)]
    fn test_ties_go_to_earliest_group(#[case] groups: Vec<&[&str]>, #[case] expected: usize) {
        let mut metric = MetricDefinition::new("m", "x + y", ["x", "y"]);
        let frame = frame(&groups);

        resolve(&mut metric, &frame).unwrap();

        assert_eq!(metric.resolution("x"), Some(Resolution::Group(expected)));
        assert_eq!(metric.resolution("y"), Some(Resolution::Group(expected)));
    }

    #[test]
    fn test_deterministic() {
        let frame = frame(&[&["a", "b"], &["c", "d"], &["b", "c", "e"], &["d", "e"]]);
        let template = MetricDefinition::new("m", "", ["a", "b", "c", "d", "e"]);

        let mut first = template.clone();
        resolve(&mut first, &frame).unwrap();
        for _ in 0..10 {
            let mut again = template.clone();
            resolve(&mut again, &frame).unwrap();
            assert_eq!(again, first);
        }
    }

    #[test]
    fn test_unmatched_variables_fail() {
        let mut metric = MetricDefinition::new("m", "a / missing", ["a", "missing", "gone"]);
        let frame = frame(&[&["a"]]);

        let err = resolve(&mut metric, &frame).unwrap_err();

        assert_eq!(err.metric, "m");
        assert_eq!(err.variables, vec!["gone".to_string(), "missing".to_string()]);
        assert_eq!(
            err.to_string(),
            "metric variables (gone, missing) not found for metric: m"
        );
        assert_eq!(metric.resolution("a"), Some(Resolution::Group(0)));
        assert_eq!(metric.resolution("missing"), Some(Resolution::Failed));
        assert_eq!(metric.resolution("gone"), Some(Resolution::Failed));
    }

    #[test]
    fn test_failed_is_permanent() {
        let mut metric = MetricDefinition::new("m", "a", ["a"]);
        assert!(resolve(&mut metric, &frame(&[&["b"]])).is_err());

        // The event shows up later, the failure sticks
        resolve(&mut metric, &frame(&[&["a"]])).unwrap();
        assert_eq!(metric.resolution("a"), Some(Resolution::Failed));
    }

    #[test]
    fn test_resolved_metric_is_not_reassigned() {
        let mut metric = MetricDefinition::new("m", "a + b", ["a", "b"]);
        resolve(&mut metric, &frame(&[&["a", "b"]])).unwrap();
        let resolved = metric.clone();

        resolve(&mut metric, &frame(&[&["x"], &["y"], &["a", "b"]])).unwrap();
        assert_eq!(metric, resolved);
    }

    #[test]
    fn test_no_groups() {
        let mut metric = MetricDefinition::new("m", "a", ["a"]);
        let err = resolve(&mut metric, &EventFrame::new(1.0, Vec::new())).unwrap_err();
        assert_eq!(err.variables, vec!["a".to_string()]);
    }
}

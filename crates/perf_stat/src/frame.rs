use std::collections::HashMap;

/// Counter values of one multiplexing group for a single interval
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventGroup {
    /// Accumulated counter value over the interval, keyed by event name
    pub event_values: HashMap<String, f64>,
}

impl EventGroup {
    /// Creates an empty group
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the value of an event, replacing any earlier value
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.event_values.insert(name.into(), value);
    }

    /// Returns the value of an event if the group sampled it
    pub fn get(&self, name: &str) -> Option<f64> {
        self.event_values.get(name).copied()
    }

    /// Returns true if the group carries a value for `name`
    pub fn contains(&self, name: &str) -> bool {
        self.event_values.contains_key(name)
    }

    /// Iterates over the names of the events in this group
    pub fn event_names(&self) -> impl Iterator<Item = &str> {
        self.event_values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.event_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.event_values.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for EventGroup {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        Self {
            event_values: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        }
    }
}

/// One sample: the interval end timestamp and every group's counters.
///
/// Group order matches the order the groups were requested in and is
/// significant to consumers that need a deterministic tie-break between groups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFrame {
    /// Seconds since collection start
    pub timestamp: f64,
    /// Groups in layout order
    pub groups: Vec<EventGroup>,
}

impl EventFrame {
    pub fn new(timestamp: f64, groups: Vec<EventGroup>) -> Self {
        Self { timestamp, groups }
    }
}

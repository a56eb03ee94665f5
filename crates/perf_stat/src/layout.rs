use thiserror::Error;

/// Errors that can occur while parsing an event group layout
#[derive(Error, Debug, PartialEq)]
pub enum LayoutError {
    /// The layout text did not define a single event
    #[error("event layout defines no groups")]
    Empty,

    /// A raw `pmu/.../` descriptor was opened but never closed
    #[error("unterminated event descriptor in group {0}: {1}")]
    UnterminatedDescriptor(usize, String),
}

/// One event as requested from perf
#[derive(Debug, Clone, PartialEq)]
pub struct EventDefinition {
    raw: String,
    output_name: String,
}

impl EventDefinition {
    /// Creates an event from its perf `-e` spelling.
    ///
    /// Raw descriptors such as `cpu/event=0xd1,umask=0x01,name='MEM_LOAD_RETIRED.L1_HIT'/`
    /// are reported by perf under the `name=` value, everything else under the
    /// spelling itself.
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let output_name = descriptor_name(&raw).unwrap_or(&raw).to_string();
        Self { raw, output_name }
    }

    /// The spelling passed to `perf stat -e`
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The name perf uses for this event in its output
    pub fn output_name(&self) -> &str {
        &self.output_name
    }
}

fn descriptor_name(raw: &str) -> Option<&str> {
    if !raw.ends_with('/') {
        return None;
    }
    let start = raw.find("name=")? + "name=".len();
    let rest = &raw[start..];
    let end = rest.find([',', '/']).unwrap_or(rest.len());
    let name = rest[..end].trim_matches(|c| c == '\'' || c == '"');
    (!name.is_empty()).then_some(name)
}

/// Events that perf schedules onto the PMU together
#[derive(Debug, Clone, PartialEq)]
pub struct GroupDefinition {
    events: Vec<EventDefinition>,
}

impl GroupDefinition {
    pub fn new(events: Vec<EventDefinition>) -> Self {
        Self { events }
    }

    pub fn events(&self) -> &[EventDefinition] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Ordered set of multiplexing groups requested from perf.
///
/// The text format lists events separated by `,` and terminates each group
/// with `;`. Commas inside a raw `pmu/.../` descriptor do not split, and `#`
/// starts a comment that runs to the end of the line:
///
/// ```
/// use perf_stat::GroupLayout;
///
/// let layout = GroupLayout::parse(
///     "# core\n\
///      cpu-cycles,\n\
///      instructions;\n\
///      cstate_core/c6-residency/;\n",
/// )
/// .unwrap();
///
/// assert_eq!(layout.groups().len(), 2);
/// assert_eq!(layout.event_count(), 3);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct GroupLayout {
    groups: Vec<GroupDefinition>,
}

impl GroupLayout {
    /// Parses the layout text format
    pub fn parse(text: &str) -> Result<Self, LayoutError> {
        let uncommented: String = text
            .lines()
            .map(|line| line.split('#').next().unwrap_or_default())
            .collect::<Vec<_>>()
            .join("\n");

        let mut groups = Vec::new();
        for group_text in uncommented.split(';') {
            let events = split_events(group_text)
                .map_err(|partial| LayoutError::UnterminatedDescriptor(groups.len(), partial))?;
            if !events.is_empty() {
                groups.push(GroupDefinition::new(events));
            }
        }

        if groups.is_empty() {
            return Err(LayoutError::Empty);
        }
        Ok(Self { groups })
    }

    /// Builds a layout directly from event spellings, one inner list per group
    pub fn from_groups<G, S>(groups: impl IntoIterator<Item = G>) -> Self
    where
        G: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            groups: groups
                .into_iter()
                .map(|events| {
                    GroupDefinition::new(events.into_iter().map(EventDefinition::new).collect())
                })
                .filter(|group| !group.is_empty())
                .collect(),
        }
    }

    pub fn groups(&self) -> &[GroupDefinition] {
        &self.groups
    }

    /// Total number of events over all groups
    pub fn event_count(&self) -> usize {
        self.groups.iter().map(GroupDefinition::len).sum()
    }

    /// Formats the layout as a `perf stat -e` argument, one `{...}` per group
    pub fn perf_event_list(&self) -> String {
        self.groups
            .iter()
            .map(|group| {
                let events: Vec<&str> = group.events().iter().map(EventDefinition::raw).collect();
                format!("{{{}}}", events.join(","))
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

// Splits on commas that are not inside a `pmu/.../` descriptor.
// On an unterminated descriptor, returns the dangling text as the error.
fn split_events(group_text: &str) -> Result<Vec<EventDefinition>, String> {
    let mut events = Vec::new();
    let mut current = String::new();
    let mut in_descriptor = false;

    for c in group_text.chars() {
        match c {
            '/' => {
                in_descriptor = !in_descriptor;
                current.push(c);
            }
            ',' if !in_descriptor => {
                push_event(&mut events, &current);
                current.clear();
            }
            c if c.is_whitespace() => {}
            c => current.push(c),
        }
    }

    if in_descriptor {
        return Err(current);
    }
    push_event(&mut events, &current);
    Ok(events)
}

fn push_event(events: &mut Vec<EventDefinition>, text: &str) {
    if !text.is_empty() {
        events.push(EventDefinition::new(text));
    }
}

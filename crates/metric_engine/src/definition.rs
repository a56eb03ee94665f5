use std::collections::BTreeMap;

/// Which counter group supplies a formula variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// No group chosen yet
    Unresolved,
    /// No group carried the event; permanent for the run
    Failed,
    /// Value is read from the group at this index of every frame
    Group(usize),
}

/// A named formula plus the group assignment of each of its variables.
///
/// Resolution state only moves forward: `Unresolved` becomes either `Failed`
/// or `Group(_)` and is never reset for the lifetime of the definition.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDefinition {
    pub name: String,
    pub expression: String,
    pub variables: BTreeMap<String, Resolution>,
}

impl MetricDefinition {
    /// Creates a definition with every listed variable unresolved
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        expression: impl Into<String>,
        variables: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
            variables: variables
                .into_iter()
                .map(|variable| (variable.into(), Resolution::Unresolved))
                .collect(),
        }
    }

    /// Creates a definition whose variables are the bracketed names in the
    /// expression, e.g. `[instructions] / [cpu-cycles]`
    pub fn from_expression(name: impl Into<String>, expression: impl Into<String>) -> Self {
        let expression = expression.into();
        let variables: Vec<String> = bracketed_names(&expression)
            .into_iter()
            .map(str::to_string)
            .collect();
        Self::new(name, expression, variables)
    }

    /// True once any variable failed to resolve
    pub fn has_failed(&self) -> bool {
        self.variables.values().any(|r| *r == Resolution::Failed)
    }

    /// True when every variable has a group
    pub fn is_resolved(&self) -> bool {
        self.variables
            .values()
            .all(|r| matches!(r, Resolution::Group(_)))
    }

    /// Names of variables that have not been through resolution yet
    pub fn unresolved(&self) -> impl Iterator<Item = &str> {
        self.variables
            .iter()
            .filter(|(_, r)| **r == Resolution::Unresolved)
            .map(|(name, _)| name.as_str())
    }

    pub fn resolution(&self, variable: &str) -> Option<Resolution> {
        self.variables.get(variable).copied()
    }
}

/// One computed metric value for a frame
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub name: String,
    pub value: f64,
}

impl Metric {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Returns the distinct `[...]` names of an expression in order of first use.
/// An unterminated bracket is left for the expression compiler to reject.
pub(crate) fn bracketed_names(expression: &str) -> Vec<&str> {
    let mut names: Vec<&str> = Vec::new();
    let mut rest = expression;
    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        let Some(close) = after.find(']') else {
            break;
        };
        let name = after[..close].trim();
        if !name.is_empty() && !names.contains(&name) {
            names.push(name);
        }
        rest = &after[close + 1..];
    }
    names
}

use std::collections::HashSet;

use log::warn;
use serde::Deserialize;
use thiserror::Error;

use crate::metadata::CONSTANTS;
use crate::{Metadata, MetricDefinition};

/// Errors that can occur while loading metric definitions
#[derive(Error, Debug)]
pub enum DefinitionError {
    #[error("failed to parse metric definitions: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate metric name: {0}")]
    DuplicateName(String),

    #[error("metric {0} has an empty expression")]
    EmptyExpression(String),
}

/// Metric entry as written in a definitions file
#[derive(Debug, Deserialize)]
struct MetricEntry {
    name: String,
    expression: String,
}

/// Loads metric definitions from a JSON array of `{"name", "expression"}` objects.
///
/// Host constants such as `[SYSTEM_TSC_FREQ]` are replaced with their values
/// from `metadata`; every other bracketed name becomes an unresolved variable.
/// A metric that needs a constant the host cannot supply is dropped with a
/// warning, since it could never be evaluated.
pub fn load_definitions(json: &str, metadata: &Metadata) -> Result<Vec<MetricDefinition>, DefinitionError> {
    let entries: Vec<MetricEntry> = serde_json::from_str(json)?;

    let mut names = HashSet::new();
    let mut definitions = Vec::with_capacity(entries.len());
    for entry in entries {
        if !names.insert(entry.name.clone()) {
            return Err(DefinitionError::DuplicateName(entry.name));
        }
        if entry.expression.trim().is_empty() {
            return Err(DefinitionError::EmptyExpression(entry.name));
        }
        match substitute_constants(&entry.expression, metadata) {
            Ok(expression) => {
                definitions.push(MetricDefinition::from_expression(entry.name, expression));
            }
            Err(constant) => {
                warn!(
                    "dropping metric {}: constant {} is not available on this host",
                    entry.name, constant
                );
            }
        }
    }
    Ok(definitions)
}

/// Replaces bracketed host constants with their values.
///
/// Padding inside the brackets is ignored, as for variables. Returns the name
/// of the first constant the metadata cannot supply.
pub fn substitute_constants(expression: &str, metadata: &Metadata) -> Result<String, String> {
    let mut substituted = String::with_capacity(expression.len());
    let mut rest = expression;
    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        let Some(close) = after.find(']') else {
            break;
        };
        substituted.push_str(&rest[..open]);
        let name = after[..close].trim();
        if CONSTANTS.contains(&name) {
            let value = metadata.constant(name).ok_or_else(|| name.to_string())?;
            substituted.push_str(&format!("{:?}", value));
        } else {
            substituted.push_str(&rest[open..open + close + 2]);
        }
        rest = &after[close + 1..];
    }
    substituted.push_str(rest);
    Ok(substituted)
}

//! Closed-schema and consistency checks on raw directives.

use crate::error::ConfigError;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Every key of `directives` must be in `allowed`.
pub fn check_directives(context: &str, directives: &Map<String, Value>, allowed: &[&str]) -> Result<(), ConfigError> {
    let unknown: Vec<&str> = directives
        .keys()
        .map(String::as_str)
        .filter(|k| !allowed.contains(k))
        .collect();
    if unknown.is_empty() {
        return Ok(());
    }
    Err(ConfigError::UnrecognizedDirectives {
        context: context.to_string(),
        directives: unknown.join(", "),
    })
}

/// Boolean directive with a default when absent.
pub fn bool_directive(
    directives: &Map<String, Value>,
    key: &str,
    default: bool,
    context: &str,
) -> Result<bool, ConfigError> {
    match directives.get(key) {
        None => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(ConfigError::malformed(
            context,
            format!("the {} directive must be a boolean, found {}", key, other),
        )),
    }
}

pub fn string_directive<'v>(
    directives: &'v Map<String, Value>,
    key: &str,
    context: &str,
) -> Result<Option<&'v str>, ConfigError> {
    match directives.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(ConfigError::malformed(
            context,
            format!("the {} directive must be a string, found {}", key, other),
        )),
    }
}

pub fn map_directive(directives: &Map<String, Value>, key: &str, context: &str) -> Result<Map<String, Value>, ConfigError> {
    match directives.get(key) {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(m)) => Ok(m.clone()),
        Some(other) => Err(ConfigError::malformed(
            context,
            format!("the {} directive must be a mapping, found {}", key, other),
        )),
    }
}

pub fn string_list(directives: &Map<String, Value>, key: &str, context: &str) -> Result<Vec<String>, ConfigError> {
    match directives.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => Ok(s.clone()),
                other => Err(ConfigError::malformed(
                    context,
                    format!("{} entries must be strings, found {}", key, other),
                )),
            })
            .collect(),
        Some(other) => Err(ConfigError::malformed(
            context,
            format!("the {} directive must be a list, found {}", key, other),
        )),
    }
}

/// Splits a list entry into `(name, directives)`: a bare name, or a single-key mapping.
pub fn named_entry<'v>(entry: &'v Value, context: &str) -> Result<(&'v str, Option<&'v Map<String, Value>>), ConfigError> {
    match entry {
        Value::String(name) => Ok((name.as_str(), None)),
        Value::Object(m) if m.len() == 1 => {
            let Some((name, body)) = m.iter().next() else {
                return Err(ConfigError::malformed(context, "empty entry"));
            };
            match body {
                Value::Object(directives) => Ok((name.as_str(), Some(directives))),
                Value::Null => Ok((name.as_str(), None)),
                other => Err(ConfigError::malformed(
                    context,
                    format!("the directives for {} must be a mapping, found {}", name, other),
                )),
            }
        }
        other => Err(ConfigError::malformed(
            context,
            format!("expected a name or a single `name: {{directives}}` mapping, found {}", other),
        )),
    }
}

pub fn check_unique_keys<'k>(entity: &str, keys: impl IntoIterator<Item = &'k str>) -> Result<(), ConfigError> {
    let mut seen = BTreeSet::new();
    for key in keys {
        if !seen.insert(key) {
            return Err(ConfigError::DuplicateAttributes(entity.to_string()));
        }
    }
    Ok(())
}

/// `fields` ⊆ `attrs`; the error names every offending field.
pub fn check_subset(entity: &str, list: &'static str, fields: &[String], attrs: &[&str]) -> Result<(), ConfigError> {
    let unknown: Vec<&str> = fields
        .iter()
        .map(String::as_str)
        .filter(|f| !attrs.contains(f))
        .collect();
    if unknown.is_empty() {
        return Ok(());
    }
    Err(ConfigError::UnknownFields {
        entity: entity.to_string(),
        list,
        fields: unknown.join(", "),
    })
}

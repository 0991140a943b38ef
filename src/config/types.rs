//! Raw configuration document: `resource_modules`, `dependencies`, `resources`.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Directives accepted inside an `attrs` entry.
pub const ATTR_DIRECTIVES: &[&str] = &[
    "type", "validator", "mutable", "readable", "reader", "writer", "auth", "params", "dynamic",
];

/// Directives accepted inside a `children` entry.
pub const CHILD_DIRECTIVES: &[&str] = &[
    "references",
    "secondary",
    "foreign_key",
    "defaults",
    "default_pk",
    "association_handler",
    "disassociation_handler",
    "delete_behavior",
    "auth",
    "filters",
];

pub const STANDARD_ACTIONS: &[&str] = &["list", "create", "read", "update", "delete"];

/// Resource-level keys that are never custom actions.
pub const RESERVED_KEYS: &[&str] = &[
    "class",
    "auth",
    "attrs",
    "children",
    "list",
    "create",
    "read",
    "update",
    "delete",
    "root_accessible",
    "filters",
];

pub const LIST_DIRECTIVES: &[&str] = &["auth", "params"];
pub const CREATE_DIRECTIVES: &[&str] = &["auth", "required_fields", "optional_fields"];
pub const ITEM_DIRECTIVES: &[&str] = &["auth"];
pub const CUSTOM_ACTION_DIRECTIVES: &[&str] = &["method", "url", "params", "auth"];

/// One entry of the `dependencies` list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencySpec {
    /// `"mod"`, `"pkg.mod"` or `"mod: a, b"`.
    Path(String),
    /// `{mod: "a, b"}`.
    Import(Map<String, Value>),
}

/// What a dependency entry binds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DependencyImport {
    /// Binds the first path segment to the module namespace.
    Module(String),
    /// Binds each listed symbol of `module` under its own name.
    Symbols { module: String, symbols: Vec<String> },
}

fn split_symbols(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl DependencySpec {
    pub fn import(&self) -> Result<DependencyImport, ConfigError> {
        match self {
            DependencySpec::Path(s) => match s.split_once(':') {
                Some((module, list)) => Ok(DependencyImport::Symbols {
                    module: module.trim().to_string(),
                    symbols: split_symbols(list),
                }),
                None => Ok(DependencyImport::Module(s.trim().to_string())),
            },
            DependencySpec::Import(map) => {
                let mut entries = map.iter();
                match (entries.next(), entries.next()) {
                    (Some((module, Value::String(list))), None) => Ok(DependencyImport::Symbols {
                        module: module.trim().to_string(),
                        symbols: split_symbols(list),
                    }),
                    _ => Err(ConfigError::malformed(
                        "dependencies",
                        format!("expected a single `module: names` entry, found {}", Value::Object(map.clone())),
                    )),
                }
            }
        }
    }
}

/// Top-level document before any resolution.
#[derive(Clone, Debug, PartialEq)]
pub struct RawConfig {
    pub resource_modules: Vec<String>,
    pub dependencies: Vec<DependencySpec>,
    /// Collection key → entity directives, in document order.
    pub resources: Map<String, Value>,
}

impl RawConfig {
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let Value::Object(mut doc) = value else {
            return Err(ConfigError::malformed("configuration", "the document must be a mapping"));
        };
        let modules = doc
            .remove("resource_modules")
            .ok_or_else(|| ConfigError::MissingDirective("resource_modules".into()))?;
        let resource_modules: Vec<String> = serde_json::from_value(modules)
            .map_err(|e| ConfigError::malformed("resource_modules", e.to_string()))?;
        let dependencies = match doc.remove("dependencies") {
            None | Some(Value::Null) => Vec::new(),
            Some(v) => serde_json::from_value(v).map_err(|e| ConfigError::malformed("dependencies", e.to_string()))?,
        };
        let resources = match doc.remove("resources") {
            Some(Value::Object(m)) => m,
            Some(other) => {
                return Err(ConfigError::malformed(
                    "resources",
                    format!("expected a mapping of collections, found {}", other),
                ))
            }
            None => return Err(ConfigError::MissingDirective("resources".into())),
        };
        Ok(RawConfig {
            resource_modules,
            dependencies,
            resources,
        })
    }
}

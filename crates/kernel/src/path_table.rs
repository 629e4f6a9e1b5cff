//! Two-level attribute lookup tables.
//!
//! Renames, formatters, defaults and guards are all keyed the same way:
//! a wildcard level (`"*"`) keyed by bare attribute name, applying at any
//! nesting depth, and a path level keyed by the exact dotted path
//! (`relation.relation.attribute`).

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Key of the wildcard level.
pub const WILDCARD: &str = "*";

/// Attribute lookup table with a wildcard level and a dotted-path level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
#[serde(try_from = "serde_json::Map<String, serde_json::Value>")]
#[serde(into = "serde_json::Map<String, serde_json::Value>")]
pub struct PathTable<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    wildcard: HashMap<String, T>,
    paths: HashMap<String, T>,
}

impl<T> Default for PathTable<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    fn default() -> Self {
        Self {
            wildcard: HashMap::new(),
            paths: HashMap::new(),
        }
    }
}

impl<T> PathTable<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry applying to `attribute` wherever it appears.
    pub fn insert_wildcard(&mut self, attribute: &str, value: T) {
        self.wildcard.insert(attribute.to_string(), value);
    }

    /// Add an entry applying only at the exact dotted `path`.
    pub fn insert_path(&mut self, path: &str, value: T) {
        self.paths.insert(path.to_string(), value);
    }

    pub fn wildcard(&self, attribute: &str) -> Option<&T> {
        self.wildcard.get(attribute)
    }

    pub fn path(&self, path: &str) -> Option<&T> {
        self.paths.get(path)
    }

    /// Wildcard entry for `attribute` if present, else the entry at the
    /// dotted path formed by `context` + `attribute`.
    pub fn resolve(&self, attribute: &str, context: &[String]) -> Option<&T> {
        self.wildcard(attribute)
            .or_else(|| self.path(&dotted_path(context, attribute)))
    }

    pub fn is_empty(&self) -> bool {
        self.wildcard.is_empty() && self.paths.is_empty()
    }

    /// Every value stored in either level.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.wildcard.values().chain(self.paths.values())
    }
}

/// Join the relation context and an attribute into a dotted path.
pub fn dotted_path(context: &[String], attribute: &str) -> String {
    if context.is_empty() {
        return attribute.to_string();
    }
    let mut path = context.join(".");
    path.push('.');
    path.push_str(attribute);
    path
}

impl<T> TryFrom<serde_json::Map<String, serde_json::Value>> for PathTable<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    type Error = Error;

    fn try_from(map: serde_json::Map<String, serde_json::Value>) -> Result<Self> {
        let mut table = PathTable::new();
        for (key, value) in map {
            if key == WILDCARD {
                let serde_json::Value::Object(entries) = value else {
                    return Err(Error::Configuration(
                        "the '*' level must map attribute names to values".to_string(),
                    ));
                };
                for (attribute, value) in entries {
                    let parsed = serde_json::from_value(value).map_err(|e| {
                        Error::Configuration(format!("invalid entry for '*.{attribute}': {e}"))
                    })?;
                    table.insert_wildcard(&attribute, parsed);
                }
            } else {
                let parsed = serde_json::from_value(value)
                    .map_err(|e| Error::Configuration(format!("invalid entry for '{key}': {e}")))?;
                table.insert_path(&key, parsed);
            }
        }
        Ok(table)
    }
}

impl<T> From<PathTable<T>> for serde_json::Map<String, serde_json::Value>
where
    T: Clone + Serialize + DeserializeOwned,
{
    fn from(table: PathTable<T>) -> Self {
        let mut map = serde_json::Map::new();
        let mut wildcard: Vec<_> = table.wildcard.into_iter().collect();
        wildcard.sort_by(|a, b| a.0.cmp(&b.0));
        if !wildcard.is_empty() {
            let entries = wildcard
                .into_iter()
                .map(|(k, v)| (k, serde_json::to_value(v).unwrap_or_default()))
                .collect();
            map.insert(WILDCARD.to_string(), serde_json::Value::Object(entries));
        }
        let mut paths: Vec<_> = table.paths.into_iter().collect();
        paths.sort_by(|a, b| a.0.cmp(&b.0));
        for (path, value) in paths {
            map.insert(path, serde_json::to_value(value).unwrap_or_default());
        }
        map
    }
}

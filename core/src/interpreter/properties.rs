//! Process-wide instruction source
//!
//! A flat, string-keyed store holding action definitions (`ACTION_1`,
//! `ACTION_2`, ...) and any other global settings. It sits at the bottom of
//! every scope chain, so request-scoped variables shadow it.

use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::Path;

use super::errors::PropertiesError;
use super::values::to_text;

#[derive(Debug, Default)]
pub struct Properties {
    values: RwLock<HashMap<String, JsonValue>>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from string pairs.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let values = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), JsonValue::String(v.into())))
            .collect();
        Self {
            values: RwLock::new(values),
        }
    }

    pub fn get(&self, key: &str) -> Option<JsonValue> {
        self.values.read().get(key).cloned()
    }

    /// Text form of a property; absent keys yield an empty string.
    pub fn get_text(&self, key: &str) -> String {
        self.values.read().get(key).map(to_text).unwrap_or_default()
    }

    pub fn set(&self, key: impl Into<String>, value: JsonValue) {
        self.values.write().insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<JsonValue> {
        self.values.write().remove(key)
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Snapshot of all entries, sorted by key.
    pub fn entries(&self) -> Vec<(String, JsonValue)> {
        let mut entries: Vec<_> = self
            .values
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Names of all actions, i.e. keys that have a first instruction `<name>_1`.
    pub fn action_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .values
            .read()
            .keys()
            .filter_map(|k| k.strip_suffix("_1"))
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        names.sort();
        names
    }

    /// Merge TOML source into the store. Nested tables flatten with `_`.
    ///
    /// Returns the number of entries written.
    pub fn load_toml_str(&self, source: &str, origin: &str) -> Result<usize, PropertiesError> {
        let table: toml::Table = source.parse().map_err(|e| PropertiesError::Toml {
            path: origin.to_string(),
            source: e,
        })?;
        let mut flat = Vec::new();
        flatten("", &table, &mut flat);
        let count = flat.len();
        let mut values = self.values.write();
        for (key, value) in flat {
            values.insert(key, value);
        }
        Ok(count)
    }

    /// Merge a TOML file into the store.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<usize, PropertiesError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| PropertiesError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        self.load_toml_str(&source, &path.display().to_string())
    }
}

fn flatten(prefix: &str, table: &toml::Table, out: &mut Vec<(String, JsonValue)>) {
    for (key, value) in table {
        let full = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}_{}", prefix, key)
        };
        match value {
            toml::Value::Table(inner) => flatten(&full, inner, out),
            toml::Value::String(s) => out.push((full, JsonValue::String(s.clone()))),
            other => {
                let json = serde_json::to_value(other).unwrap_or(JsonValue::Null);
                out.push((full, json));
            }
        }
    }
}

//! Layered node configuration.
//!
//! A node's config is the merge of an ordered list of [`ConfigLayer`]s, lowest
//! precedence first: adapter defaults, project-wide defaults, folder configs,
//! schema YAML, then the inline `config(...)` call. Each key merges according
//! to its [`MergeBehavior`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// How a config key combines a higher-precedence value with a lower one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeBehavior {
    /// Last value wins
    Clobber,
    /// Shallow dict merge
    Update,
    /// List extend, keeping first occurrences
    Append,
    /// Per-key list append
    DictKeyAppend,
}

impl MergeBehavior {
    /// Behavior for a config key
    pub fn for_key(key: &str) -> Self {
        match key {
            "tags" | "pre_hook" | "post_hook" => MergeBehavior::Append,
            "meta" | "docs" | "persist_docs" | "quoting" | "column_types" | "contract" => {
                MergeBehavior::Update
            }
            "grants" => MergeBehavior::DictKeyAppend,
            _ => MergeBehavior::Clobber,
        }
    }
}

/// Where a layer came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerSource {
    AdapterDefaults,
    ProjectDefaults,
    Folder(String),
    SchemaYaml,
    Inline,
}

/// One flat dict of config values from a single source
#[derive(Debug, Clone)]
pub struct ConfigLayer {
    pub source: LayerSource,
    pub values: BTreeMap<String, Value>,
}

impl ConfigLayer {
    pub fn new(source: LayerSource, values: BTreeMap<String, Value>) -> Self {
        Self { source, values }
    }
}

/// Normalize a config key as written in YAML (`+pre-hook`) to its canonical form
pub fn normalize_key(key: &str) -> String {
    let key = key.trim_start_matches('+');
    match key {
        "pre-hook" => "pre_hook".to_string(),
        "post-hook" => "post_hook".to_string(),
        other => other.to_string(),
    }
}

/// Merge layers in order. Pure: the same layers always produce the same config.
pub fn merge_layers(layers: &[ConfigLayer]) -> NodeConfig {
    let mut merged: BTreeMap<String, Value> = BTreeMap::new();
    for layer in layers {
        for (raw_key, value) in &layer.values {
            let key = normalize_key(raw_key);
            let value = normalize_value(&key, value);
            let combined = match merged.remove(&key) {
                Some(existing) => merge_value(MergeBehavior::for_key(&key), existing, value),
                None => value,
            };
            merged.insert(key, combined);
        }
    }
    NodeConfig(merged)
}

fn normalize_value(key: &str, value: &Value) -> Value {
    match MergeBehavior::for_key(key) {
        MergeBehavior::Append => match value {
            Value::Null => Value::Array(Vec::new()),
            Value::Array(_) => value.clone(),
            other => Value::Array(vec![other.clone()]),
        },
        _ => value.clone(),
    }
}

fn merge_value(behavior: MergeBehavior, lower: Value, higher: Value) -> Value {
    match behavior {
        MergeBehavior::Clobber => higher,
        MergeBehavior::Update => match (lower, higher) {
            (Value::Object(mut base), Value::Object(top)) => {
                for (k, v) in top {
                    base.insert(k, v);
                }
                Value::Object(base)
            }
            (_, higher) => higher,
        },
        MergeBehavior::Append => {
            let mut out = as_list(lower);
            for item in as_list(higher) {
                if !out.contains(&item) {
                    out.push(item);
                }
            }
            Value::Array(out)
        }
        MergeBehavior::DictKeyAppend => match (lower, higher) {
            (Value::Object(base), Value::Object(top)) => {
                let mut out: Map<String, Value> = base;
                for (k, v) in top {
                    let combined = match out.remove(&k) {
                        Some(existing) => merge_value(MergeBehavior::Append, existing, v),
                        None => Value::Array(as_list(v)),
                    };
                    out.insert(k, combined);
                }
                Value::Object(out)
            }
            (_, higher) => higher,
        },
    }
}

fn as_list(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

/// A merged node config: a flat map with typed accessors
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeConfig(pub BTreeMap<String, Value>);

impl NodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Descend a dotted path (`meta.owner`) into the config
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self.0.get(first)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Boolean value, accepting `"true"`/`"false"` strings
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// String or list-of-strings value as a list
    pub fn get_list(&self, key: &str) -> Vec<String> {
        match self.0.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.get_bool("enabled").unwrap_or(true)
    }

    pub fn materialized(&self) -> Option<&str> {
        self.get_str("materialized")
    }

    pub fn tags(&self) -> Vec<String> {
        self.get_list("tags")
    }

    pub fn schema(&self) -> Option<&str> {
        self.get_str("schema")
    }

    pub fn database(&self) -> Option<&str> {
        self.get_str("database")
    }

    pub fn alias(&self) -> Option<&str> {
        self.get_str("alias")
    }

    pub fn group(&self) -> Option<&str> {
        self.get_str("group")
    }

    pub fn unique_key(&self) -> Vec<String> {
        self.get_list("unique_key")
    }

    pub fn full_refresh(&self) -> Option<bool> {
        self.get_bool("full_refresh")
    }

    pub fn event_time(&self) -> Option<&str> {
        self.get_str("event_time")
    }

    pub fn contract_enforced(&self) -> bool {
        self.get_path("contract.enforced")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Hook entries as `(sql, transaction)` pairs
    pub fn hooks(&self, key: &str) -> Vec<(String, bool)> {
        let Some(Value::Array(items)) = self.0.get(key) else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| match item {
                Value::String(sql) => Some((sql.clone(), true)),
                Value::Object(obj) => {
                    let sql = obj.get("sql")?.as_str()?.to_string();
                    let transaction = obj
                        .get("transaction")
                        .and_then(Value::as_bool)
                        .unwrap_or(true);
                    Some((sql, transaction))
                }
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
#[path = "config_layer_test.rs"]
mod tests;

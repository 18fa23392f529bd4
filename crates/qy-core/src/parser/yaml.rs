//! Strict YAML loading for schema files.
//!
//! Loads YAML into `serde_json::Value` while rejecting duplicate keys,
//! applying `<<` merge keys and resolving `!include <path>` tags relative to
//! the including file.

use crate::checksum::FileHash;
use crate::serde_helpers::scalar_to_string;
use serde::de::{self, Deserialize, Deserializer, EnumAccess, MapAccess, SeqAccess, VariantAccess, Visitor};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};

const INCLUDE_MARKER: &str = "__quarry_include__";
const MAX_INCLUDE_DEPTH: usize = 16;

/// Files read through `!include`: normalized absolute path -> content hash
pub type IncludeHashes = BTreeMap<String, FileHash>;

/// Parse YAML text strictly. `path` is the file the text came from.
pub fn load_str(text: &str, path: &Path) -> Result<Value, String> {
    load_tracked(text, path).map(|(value, _)| value)
}

/// Like [`load_str`], also returning every file pulled in with `!include`
pub fn load_tracked(text: &str, path: &Path) -> Result<(Value, IncludeHashes), String> {
    let mut includes = IncludeHashes::new();
    let value = load_with_depth(text, path, 0, &mut includes)?;
    Ok((value, includes))
}

/// Lexically normalized form of `path`, used to match include targets
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn load_with_depth(text: &str, path: &Path, depth: usize, includes: &mut IncludeHashes) -> Result<Value, String> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(format!("!include nested too deeply at {}", path.display()));
    }
    if text
        .lines()
        .all(|l| l.trim().is_empty() || l.trim_start().starts_with('#') || l.trim() == "---")
    {
        return Ok(Value::Null);
    }
    let mut docs = serde_yaml::Deserializer::from_str(text);
    let Some(doc) = docs.next() else {
        return Ok(Value::Null);
    };
    let StrictValue(value) = StrictValue::deserialize(doc).map_err(|e| e.to_string())?;
    if docs.next().is_some() {
        return Err("expected a single YAML document".to_string());
    }
    resolve_includes(value, path, depth, includes)
}

fn resolve_includes(value: Value, path: &Path, depth: usize, includes: &mut IncludeHashes) -> Result<Value, String> {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(target) = map.get(INCLUDE_MARKER) {
                    let rel = target
                        .as_str()
                        .ok_or_else(|| "!include expects a path".to_string())?;
                    let base = path.parent().unwrap_or_else(|| Path::new("."));
                    let included = normalize_path(&base.join(rel));
                    let text = std::fs::read_to_string(&included)
                        .map_err(|e| format!("!include {}: {}", included.display(), e))?;
                    includes.insert(
                        included.to_string_lossy().into_owned(),
                        FileHash::from_contents(&text),
                    );
                    return load_with_depth(&text, &included, depth + 1, includes);
                }
            }
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k, resolve_includes(v, path, depth, includes)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => items
            .into_iter()
            .map(|v| resolve_includes(v, path, depth, includes))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(other),
    }
}

struct StrictValue(Value);

impl<'de> Deserialize<'de> for StrictValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(StrictVisitor)
    }
}

struct StrictVisitor;

impl<'de> Visitor<'de> for StrictVisitor {
    type Value = StrictValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("any YAML value")
    }

    fn visit_bool<E>(self, v: bool) -> Result<StrictValue, E> {
        Ok(StrictValue(Value::Bool(v)))
    }

    fn visit_i64<E>(self, v: i64) -> Result<StrictValue, E> {
        Ok(StrictValue(Value::Number(v.into())))
    }

    fn visit_u64<E>(self, v: u64) -> Result<StrictValue, E> {
        Ok(StrictValue(Value::Number(v.into())))
    }

    fn visit_f64<E>(self, v: f64) -> Result<StrictValue, E> {
        Ok(StrictValue(
            Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null),
        ))
    }

    fn visit_str<E>(self, v: &str) -> Result<StrictValue, E> {
        Ok(StrictValue(Value::String(v.to_string())))
    }

    fn visit_string<E>(self, v: String) -> Result<StrictValue, E> {
        Ok(StrictValue(Value::String(v)))
    }

    fn visit_unit<E>(self) -> Result<StrictValue, E> {
        Ok(StrictValue(Value::Null))
    }

    fn visit_none<E>(self) -> Result<StrictValue, E> {
        Ok(StrictValue(Value::Null))
    }

    fn visit_some<D>(self, deserializer: D) -> Result<StrictValue, D::Error>
    where
        D: Deserializer<'de>,
    {
        StrictValue::deserialize(deserializer)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<StrictValue, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut items = Vec::new();
        while let Some(StrictValue(item)) = seq.next_element()? {
            items.push(item);
        }
        Ok(StrictValue(Value::Array(items)))
    }

    fn visit_map<A>(self, mut access: A) -> Result<StrictValue, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut map = Map::new();
        let mut merges: Vec<Value> = Vec::new();
        while let Some(StrictValue(key)) = access.next_key()? {
            let key = scalar_to_string(&key).unwrap_or_else(|| key.to_string());
            let StrictValue(value) = access.next_value()?;
            if key == "<<" {
                merges.push(value);
                continue;
            }
            if map.contains_key(&key) {
                return Err(de::Error::custom(format!("Duplicate `{}` key found", key)));
            }
            map.insert(key, value);
        }
        for merge in merges {
            let sources = match merge {
                Value::Array(items) => items,
                other => vec![other],
            };
            for source in sources {
                if let Value::Object(entries) = source {
                    for (k, v) in entries {
                        map.entry(k).or_insert(v);
                    }
                }
            }
        }
        Ok(StrictValue(Value::Object(map)))
    }

    fn visit_enum<A>(self, data: A) -> Result<StrictValue, A::Error>
    where
        A: EnumAccess<'de>,
    {
        let (tag, variant): (String, _) = data.variant()?;
        let StrictValue(inner) = variant.newtype_variant()?;
        if tag.trim_start_matches('!') == "include" {
            let mut marker = Map::new();
            marker.insert(INCLUDE_MARKER.to_string(), inner);
            return Ok(StrictValue(Value::Object(marker)));
        }
        Ok(StrictValue(inner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_yaml() {
        let value = load_str("version: 2\nmodels:\n  - name: a\n", Path::new("x.yml")).unwrap();
        assert_eq!(value, json!({"version": 2, "models": [{"name": "a"}]}));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let err = load_str("models: []\nmodels: []\n", Path::new("x.yml")).unwrap_err();
        assert!(err.contains("Duplicate `models` key found"), "{}", err);
    }

    #[test]
    fn test_duplicate_nested_key_rejected() {
        let err = load_str("models:\n  - name: a\n    name: b\n", Path::new("x.yml")).unwrap_err();
        assert!(err.contains("Duplicate `name` key found"), "{}", err);
    }

    #[test]
    fn test_empty_and_comment_only() {
        assert_eq!(load_str("", Path::new("x.yml")).unwrap(), Value::Null);
        assert_eq!(load_str("# nothing\n", Path::new("x.yml")).unwrap(), Value::Null);
    }

    #[test]
    fn test_merge_keys() {
        let text = "base: &b\n  a: 1\n  b: 2\nchild:\n  <<: *b\n  b: 3\n";
        let value = load_str(text, Path::new("x.yml")).unwrap();
        assert_eq!(value["child"], json!({"a": 1, "b": 3}));
    }

    #[test]
    fn test_include_relative_to_file() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("models/shared")).unwrap();
        std::fs::write(
            dir.path().join("models/shared/cols.yml"),
            "- name: id\n- name: amount\n",
        )
        .unwrap();
        let path = dir.path().join("models/schema.yml");
        let text = "models:\n  - name: orders\n    columns: !include shared/cols.yml\n";
        let value = load_str(text, &path).unwrap();
        assert_eq!(
            value["models"][0]["columns"],
            json!([{"name": "id"}, {"name": "amount"}])
        );
    }

    #[test]
    fn test_nested_includes_are_tracked() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("shared")).unwrap();
        std::fs::write(dir.path().join("shared/cols.yml"), "- !include id.yml\n").unwrap();
        std::fs::write(dir.path().join("shared/id.yml"), "name: id\n").unwrap();
        let path = dir.path().join("models/schema.yml");
        let (value, includes) =
            load_tracked("models:\n  - name: a\n    columns: !include ../shared/cols.yml\n", &path).unwrap();
        assert_eq!(value["models"][0]["columns"], json!([{"name": "id"}]));

        let expected: Vec<String> = ["shared/cols.yml", "shared/id.yml"]
            .iter()
            .map(|rel| normalize_path(&dir.path().join(rel)).to_string_lossy().into_owned())
            .collect();
        assert_eq!(includes.keys().cloned().collect::<Vec<_>>(), expected);
        assert!(includes.values().all(|h| h.name == "sha256"));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Path::new("/p/models/../shared/./c.yml")), PathBuf::from("/p/shared/c.yml"));
        assert_eq!(normalize_path(Path::new("../x.yml")), PathBuf::from("../x.yml"));
    }

    #[test]
    fn test_include_missing_file() {
        let err = load_str("x: !include nope.yml\n", Path::new("/tmp/none/schema.yml")).unwrap_err();
        assert!(err.contains("!include"));
    }
}

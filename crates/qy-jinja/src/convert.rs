//! Conversions between JSON values and template values.

use minijinja::value::{Value, ValueKind};
use serde_json::Value as Json;

/// JSON to a template value. Maps keep their key order.
pub fn json_to_value(json: &Json) -> Value {
    match json {
        Json::Null => Value::from(()),
        Json::Bool(b) => Value::from(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(f) = n.as_f64() {
                Value::from(f)
            } else {
                Value::from(n.to_string())
            }
        }
        Json::String(s) => Value::from(s.as_str()),
        Json::Array(items) => Value::from(items.iter().map(json_to_value).collect::<Vec<_>>()),
        Json::Object(map) => Value::from_iter(
            map.iter()
                .map(|(k, v)| (Value::from(k.as_str()), json_to_value(v))),
        ),
    }
}

/// A template value back to JSON. Objects without a JSON shape (relations,
/// macros) become their rendered text.
pub fn value_to_json(value: &Value) -> Json {
    match value.kind() {
        ValueKind::Undefined | ValueKind::None => Json::Null,
        ValueKind::Bool => Json::Bool(value.is_true()),
        ValueKind::Number => {
            let Ok(f) = f64::try_from(value.clone()) else {
                return Json::Null;
            };
            match i64::try_from(value.clone()) {
                Ok(i) if i as f64 == f => Json::Number(i.into()),
                _ => serde_json::Number::from_f64(f)
                    .map(Json::Number)
                    .unwrap_or(Json::Null),
            }
        }
        ValueKind::String => Json::String(value.as_str().unwrap_or_default().to_string()),
        ValueKind::Seq => Json::Array(
            value
                .try_iter()
                .map(|iter| iter.map(|v| value_to_json(&v)).collect())
                .unwrap_or_default(),
        ),
        ValueKind::Map => {
            let mut map = serde_json::Map::new();
            if let Ok(keys) = value.try_iter() {
                for key in keys {
                    if let Ok(item) = value.get_item(&key) {
                        let name = match key.as_str() {
                            Some(s) => s.to_string(),
                            None => key.to_string(),
                        };
                        map.insert(name, value_to_json(&item));
                    }
                }
            }
            Json::Object(map)
        }
        _ => Json::String(value.to_string()),
    }
}

/// YAML to JSON, dropping non-string keys and non-finite floats
pub fn yaml_to_json(yaml: &serde_yaml::Value) -> Json {
    match yaml {
        serde_yaml::Value::Null => Json::Null,
        serde_yaml::Value::Bool(b) => Json::Bool(*b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Json::Number(i.into())
            } else if let Some(f) = n.as_f64() {
                serde_json::Number::from_f64(f)
                    .map(Json::Number)
                    .unwrap_or_else(|| {
                        log::warn!("YAML number {} is NaN or Infinity; converting to null", f);
                        Json::Null
                    })
            } else {
                Json::Null
            }
        }
        serde_yaml::Value::String(s) => Json::String(s.clone()),
        serde_yaml::Value::Sequence(seq) => Json::Array(seq.iter().map(yaml_to_json).collect()),
        serde_yaml::Value::Mapping(map) => Json::Object(
            map.iter()
                .filter_map(|(k, v)| k.as_str().map(|key| (key.to_string(), yaml_to_json(v))))
                .collect(),
        ),
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(&tagged.value),
    }
}

/// Stringify a scalar template argument the way it would print
pub fn arg_to_string(value: &Value) -> Option<String> {
    match value.kind() {
        ValueKind::Undefined | ValueKind::None => None,
        ValueKind::String => value.as_str().map(str::to_string),
        _ => Some(value.to_string()),
    }
}

#[cfg(test)]
#[path = "convert_test.rs"]
mod tests;

//! Named selectors from `selectors.yml`.

use super::parse::{parse_expression, IndirectSelection, MethodName, SelectionCriteria, SelectionSpec};
use crate::error::{CoreError, CoreResult};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::path::Path;

/// One entry of `selectors:`
#[derive(Debug, Clone, Deserialize)]
pub struct SelectorDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Replaces the default selection when no `--select` is given
    #[serde(default)]
    pub default: bool,
    pub definition: Value,
}

/// Parsed `selectors.yml`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelectorsFile {
    #[serde(default)]
    pub selectors: Vec<SelectorDefinition>,
}

fn invalid(name: &str, reason: impl Into<String>) -> CoreError {
    CoreError::InvalidSelector {
        selector: name.to_string(),
        reason: reason.into(),
    }
}

fn as_bool(value: Option<&Value>) -> bool {
    value.and_then(Value::as_bool).unwrap_or(false)
}

fn as_depth(name: &str, value: Option<&Value>) -> CoreResult<Option<usize>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|d| Some(d as usize))
            .ok_or_else(|| invalid(name, "depth must be a non-negative integer")),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl SelectorsFile {
    pub fn from_str(content: &str, path: &Path) -> CoreResult<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: Self = serde_yaml::from_str(content).map_err(|e| CoreError::ConfigParseError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let mut seen = std::collections::BTreeSet::new();
        for s in &file.selectors {
            if !seen.insert(s.name.as_str()) {
                return Err(invalid(&s.name, "selector defined more than once"));
            }
        }
        if file.selectors.iter().filter(|s| s.default).count() > 1 {
            return Err(CoreError::ConfigInvalid {
                message: format!("{}: more than one selector has default: true", path.display()),
            });
        }
        Ok(file)
    }

    /// Load `selectors.yml` from a project root; absent file is empty
    pub fn load(root: &Path) -> CoreResult<Self> {
        let path = root.join("selectors.yml");
        if !path.is_file() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path).map_err(|e| CoreError::FileRead {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_str(&content, &path)
    }

    pub fn names(&self) -> Vec<&str> {
        self.selectors.iter().map(|s| s.name.as_str()).collect()
    }

    /// Resolve a named selector to its expression tree
    pub fn get(&self, name: &str) -> CoreResult<SelectionSpec> {
        let mut stack = Vec::new();
        self.resolve(name, &mut stack)
    }

    /// The selector marked `default: true`, if any
    pub fn default_spec(&self) -> CoreResult<Option<SelectionSpec>> {
        match self.selectors.iter().find(|s| s.default) {
            Some(s) => self.get(&s.name).map(Some),
            None => Ok(None),
        }
    }

    fn resolve(&self, name: &str, stack: &mut Vec<String>) -> CoreResult<SelectionSpec> {
        if stack.iter().any(|s| s == name) {
            stack.push(name.to_string());
            return Err(invalid(name, format!("selector cycle: {}", stack.join(" -> "))));
        }
        let definition = self
            .selectors
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| invalid(name, "no selector with this name in selectors.yml"))?;
        stack.push(name.to_string());
        let spec = self.convert(name, &definition.definition, stack)?;
        stack.pop();
        Ok(spec)
    }

    fn convert(&self, name: &str, value: &Value, stack: &mut Vec<String>) -> CoreResult<SelectionSpec> {
        match value {
            Value::String(s) => parse_expression(s),
            Value::Mapping(map) => self.convert_mapping(name, map, stack),
            _ => Err(invalid(name, "a definition must be a string or a mapping")),
        }
    }

    fn convert_list(
        &self,
        name: &str,
        value: &Value,
        stack: &mut Vec<String>,
    ) -> CoreResult<(Vec<SelectionSpec>, Vec<SelectionSpec>)> {
        let items = value
            .as_sequence()
            .ok_or_else(|| invalid(name, "union and intersection take a list"))?;
        let mut include = Vec::new();
        let mut exclude = Vec::new();
        for item in items {
            match item.as_mapping().and_then(|m| m.get("exclude")) {
                Some(excluded) => {
                    let (more, _) = self.convert_list(name, excluded, stack)?;
                    exclude.extend(more);
                }
                None => include.push(self.convert(name, item, stack)?),
            }
        }
        Ok((include, exclude))
    }

    fn convert_mapping(&self, name: &str, map: &Mapping, stack: &mut Vec<String>) -> CoreResult<SelectionSpec> {
        for (key, combine) in [("union", true), ("intersection", false)] {
            let Some(list) = map.get(key) else {
                continue;
            };
            let (include, exclude) = self.convert_list(name, list, stack)?;
            let base = if combine {
                SelectionSpec::Union(include)
            } else {
                SelectionSpec::Intersection(include)
            };
            if exclude.is_empty() {
                return Ok(base);
            }
            return Ok(SelectionSpec::Difference(
                Box::new(base),
                Box::new(SelectionSpec::Union(exclude)),
            ));
        }
        if let Some(list) = map.get("exclude") {
            let (exclude, _) = self.convert_list(name, list, stack)?;
            return Ok(SelectionSpec::Difference(
                Box::new(SelectionSpec::All),
                Box::new(SelectionSpec::Union(exclude)),
            ));
        }

        let (method, value) = match (map.get("method"), map.get("value")) {
            (Some(m), Some(v)) => (
                m.as_str().ok_or_else(|| invalid(name, "method must be a string"))?.to_string(),
                scalar_text(v).ok_or_else(|| invalid(name, "value must be a scalar"))?,
            ),
            _ if map.len() == 1 => {
                let (k, v) = map.iter().next().ok_or_else(|| invalid(name, "empty definition"))?;
                (
                    k.as_str().ok_or_else(|| invalid(name, "method must be a string"))?.to_string(),
                    scalar_text(v).ok_or_else(|| invalid(name, "value must be a scalar"))?,
                )
            }
            _ => return Err(invalid(name, "expected method and value")),
        };
        if method == "selector" {
            return self.resolve(&value, stack);
        }

        let method_name = MethodName::parse(&method)
            .ok_or_else(|| invalid(name, format!("unknown selection method '{}'", method)))?;
        let mut criteria = SelectionCriteria::new(method_name, value);
        criteria.parents = as_bool(map.get("parents"));
        criteria.children = as_bool(map.get("children"));
        criteria.parents_depth = as_depth(name, map.get("parents_depth"))?;
        criteria.children_depth = as_depth(name, map.get("children_depth"))?;
        criteria.parents |= criteria.parents_depth.is_some();
        criteria.children |= criteria.children_depth.is_some();
        criteria.childrens_parents = as_bool(map.get("childrens_parents"));
        if criteria.childrens_parents && criteria.parents {
            return Err(invalid(name, "childrens_parents cannot be combined with parents"));
        }
        if let Some(mode) = map.get("indirect_selection") {
            let text = mode.as_str().unwrap_or_default();
            criteria.indirect_selection = Some(
                IndirectSelection::parse(text)
                    .ok_or_else(|| invalid(name, format!("unknown indirect_selection '{}'", text)))?,
            );
        }
        Ok(SelectionSpec::Criteria(Box::new(criteria)))
    }
}

#[cfg(test)]
#[path = "yaml_test.rs"]
mod tests;

//! Selector expression parsing.
//!
//! ```text
//! expr    := term (',' term)*      union
//! term    := factor (' ' factor)*  intersection, '!factor' subtracts
//! factor  := ['@'] [[n]'+'] [method ':'] value ['+'[n]]
//! ```

use crate::error::{CoreError, CoreResult};
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

/// How tests attached to selected nodes join the selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum IndirectSelection {
    /// Any parent selected
    #[default]
    Eager,
    /// Every parent selected or built upstream of the selection
    Buildable,
    /// Every parent selected
    Cautious,
    /// Only tests selected directly
    Empty,
}

impl IndirectSelection {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "eager" => Some(IndirectSelection::Eager),
            "buildable" => Some(IndirectSelection::Buildable),
            "cautious" => Some(IndirectSelection::Cautious),
            "empty" => Some(IndirectSelection::Empty),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IndirectSelection::Eager => "eager",
            IndirectSelection::Buildable => "buildable",
            IndirectSelection::Cautious => "cautious",
            IndirectSelection::Empty => "empty",
        }
    }
}

/// A selection method
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodName {
    Fqn,
    Tag,
    Source,
    ResourceType,
    Path,
    File,
    Package,
    /// `config.<key>[.<subkey>...]`, holding the key path
    Config(Vec<String>),
    TestType,
    TestName,
    State,
    Exposure,
    Metric,
    SemanticModel,
    SavedQuery,
    Group,
    Access,
    Version,
    Wildcard,
    Result,
}

impl MethodName {
    pub fn parse(method: &str) -> Option<Self> {
        if let Some(path) = method.strip_prefix("config.") {
            let parts: Vec<String> = path.split('.').map(str::to_string).collect();
            if parts.iter().any(String::is_empty) {
                return None;
            }
            return Some(MethodName::Config(parts));
        }
        let name = match method {
            "fqn" => MethodName::Fqn,
            "tag" => MethodName::Tag,
            "source" => MethodName::Source,
            "resource_type" => MethodName::ResourceType,
            "path" => MethodName::Path,
            "file" => MethodName::File,
            "package" => MethodName::Package,
            "test_type" => MethodName::TestType,
            "test_name" => MethodName::TestName,
            "state" => MethodName::State,
            "exposure" => MethodName::Exposure,
            "metric" => MethodName::Metric,
            "semantic_model" => MethodName::SemanticModel,
            "saved_query" => MethodName::SavedQuery,
            "group" => MethodName::Group,
            "access" => MethodName::Access,
            "version" => MethodName::Version,
            "wildcard" => MethodName::Wildcard,
            "result" => MethodName::Result,
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for MethodName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MethodName::Config(path) => return write!(f, "config.{}", path.join(".")),
            MethodName::Fqn => "fqn",
            MethodName::Tag => "tag",
            MethodName::Source => "source",
            MethodName::ResourceType => "resource_type",
            MethodName::Path => "path",
            MethodName::File => "file",
            MethodName::Package => "package",
            MethodName::TestType => "test_type",
            MethodName::TestName => "test_name",
            MethodName::State => "state",
            MethodName::Exposure => "exposure",
            MethodName::Metric => "metric",
            MethodName::SemanticModel => "semantic_model",
            MethodName::SavedQuery => "saved_query",
            MethodName::Group => "group",
            MethodName::Access => "access",
            MethodName::Version => "version",
            MethodName::Wildcard => "wildcard",
            MethodName::Result => "result",
        };
        f.write_str(name)
    }
}

/// One method/value pair with its graph operators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionCriteria {
    /// The text the criteria was parsed from
    pub raw: String,
    pub method: MethodName,
    pub value: String,
    pub parents: bool,
    pub parents_depth: Option<usize>,
    pub children: bool,
    pub children_depth: Option<usize>,
    /// `@`: descendants plus every ancestor of them
    pub childrens_parents: bool,
    /// Overrides the invocation's indirect selection mode
    pub indirect_selection: Option<IndirectSelection>,
}

impl SelectionCriteria {
    /// A criteria without graph operators
    pub fn new(method: MethodName, value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            raw: format!("{}:{}", method, value),
            method,
            value,
            parents: false,
            parents_depth: None,
            children: false,
            children_depth: None,
            childrens_parents: false,
            indirect_selection: None,
        }
    }
}

/// A selection expression tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionSpec {
    Criteria(Box<SelectionCriteria>),
    Union(Vec<SelectionSpec>),
    Intersection(Vec<SelectionSpec>),
    /// Nodes of the first spec not in the second
    Difference(Box<SelectionSpec>, Box<SelectionSpec>),
    /// Every enabled node
    All,
}

fn factor_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<at>@)?(?P<parents>(?P<parents_depth>\d*)\+)?(?:(?P<method>[A-Za-z_][\w.]*):)?(?P<value>.*?)(?P<children>\+(?P<children_depth>\d*))?$",
        )
        .expect("valid regex")
    })
}

fn invalid(selector: &str, reason: impl Into<String>) -> CoreError {
    CoreError::InvalidSelector {
        selector: selector.to_string(),
        reason: reason.into(),
    }
}

fn parse_depth(selector: &str, digits: Option<regex::Match<'_>>) -> CoreResult<Option<usize>> {
    match digits.map(|m| m.as_str()).filter(|d| !d.is_empty()) {
        None => Ok(None),
        Some(d) => d
            .parse()
            .map(Some)
            .map_err(|_| invalid(selector, format!("invalid depth '{}'", d))),
    }
}

/// Method for a value written without `method:`
fn default_method(value: &str) -> MethodName {
    let lower = value.to_ascii_lowercase();
    if value.contains('/') || value.contains('\\') {
        MethodName::Path
    } else if [".sql", ".csv", ".py", ".yml", ".yaml"].iter().any(|ext| lower.ends_with(ext)) {
        MethodName::File
    } else {
        MethodName::Fqn
    }
}

/// Parse one factor such as `2+tag:nightly+` or `@orders`
pub fn parse_criteria(text: &str) -> CoreResult<SelectionCriteria> {
    let caps = factor_regex()
        .captures(text)
        .ok_or_else(|| invalid(text, "unrecognized selector syntax"))?;
    let value = caps.name("value").map(|m| m.as_str()).unwrap_or_default();
    if value.is_empty() {
        return Err(invalid(text, "selector value cannot be empty"));
    }
    let method = match caps.name("method") {
        Some(m) => MethodName::parse(m.as_str())
            .ok_or_else(|| invalid(text, format!("unknown selection method '{}'", m.as_str())))?,
        None => default_method(value),
    };
    let childrens_parents = caps.name("at").is_some();
    let parents = caps.name("parents").is_some();
    if childrens_parents && parents {
        return Err(invalid(text, "'@' cannot be combined with a '+' prefix"));
    }
    Ok(SelectionCriteria {
        raw: text.to_string(),
        method,
        value: value.to_string(),
        parents,
        parents_depth: parse_depth(text, caps.name("parents_depth"))?,
        children: caps.name("children").is_some(),
        children_depth: parse_depth(text, caps.name("children_depth"))?,
        childrens_parents,
        indirect_selection: None,
    })
}

fn parse_term(term: &str, expression: &str) -> CoreResult<SelectionSpec> {
    let mut include = Vec::new();
    let mut exclude = Vec::new();
    for factor in term.split_whitespace() {
        match factor.strip_prefix('!') {
            Some(rest) if rest.is_empty() => return Err(invalid(expression, "'!' needs a selector")),
            Some(rest) => exclude.push(SelectionSpec::Criteria(Box::new(parse_criteria(rest)?))),
            None => include.push(SelectionSpec::Criteria(Box::new(parse_criteria(factor)?))),
        }
    }
    let base = match include.len() {
        0 => SelectionSpec::All,
        1 => include.remove(0),
        _ => SelectionSpec::Intersection(include),
    };
    Ok(match exclude.len() {
        0 => base,
        1 => SelectionSpec::Difference(Box::new(base), Box::new(exclude.remove(0))),
        _ => SelectionSpec::Difference(Box::new(base), Box::new(SelectionSpec::Union(exclude))),
    })
}

/// Parse a full selector expression
pub fn parse_expression(expression: &str) -> CoreResult<SelectionSpec> {
    let mut terms = Vec::new();
    for term in expression.split(',') {
        if term.trim().is_empty() {
            return Err(invalid(expression, "empty selector between ','"));
        }
        terms.push(parse_term(term, expression)?);
    }
    Ok(if terms.len() == 1 {
        terms.remove(0)
    } else {
        SelectionSpec::Union(terms)
    })
}

/// Union of several expressions, one per `--select` value
pub fn parse_expressions<S: AsRef<str>>(expressions: &[S]) -> CoreResult<Option<SelectionSpec>> {
    let mut specs = Vec::new();
    for e in expressions {
        let e = e.as_ref().trim();
        if !e.is_empty() {
            specs.push(parse_expression(e)?);
        }
    }
    Ok(match specs.len() {
        0 => None,
        1 => Some(specs.remove(0)),
        _ => Some(SelectionSpec::Union(specs)),
    })
}

#[cfg(test)]
#[path = "parse_test.rs"]
mod tests;

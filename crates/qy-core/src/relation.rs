//! Warehouse relations and the active target.
//!
//! A [`Relation`] is a `database.schema.identifier` path plus rendering
//! options. Relations are values: `replace_path` and friends return new
//! relations and never mutate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Suffix of the relation a table is moved to while being replaced
pub const BACKUP_SUFFIX: &str = "__dbt_backup";

/// Suffix of the relation a table is built into before the swap
pub const TMP_SUFFIX: &str = "__dbt_tmp";

/// Identifiers longer than this are truncated when suffixed
const MAX_SUFFIXED_LEN: usize = 51;

/// Quote a SQL identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Escape a value for use inside a single-quoted SQL literal.
pub fn escape_sql_string(value: &str) -> String {
    value.replace('\'', "''")
}

/// `identifier__dbt_backup`, overwriting the tail of identifiers that would
/// exceed the length limit.
pub fn backup_identifier(identifier: &str) -> String {
    suffixed(identifier, BACKUP_SUFFIX)
}

/// `identifier__dbt_tmp`, truncated the same way as backups
pub fn tmp_identifier(identifier: &str) -> String {
    suffixed(identifier, TMP_SUFFIX)
}

fn suffixed(identifier: &str, suffix: &str) -> String {
    let chars: Vec<char> = identifier.chars().collect();
    if chars.len() <= MAX_SUFFIXED_LEN {
        return format!("{}{}", identifier, suffix);
    }
    let keep = chars.len().saturating_sub(suffix.chars().count());
    let head: String = chars[..keep].iter().collect();
    format!("{}{}", head, suffix)
}

/// The connection target the invocation runs against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetInfo {
    /// Target name from the profile (`dev`, `prod`, ...)
    pub name: String,
    /// Adapter type (`duckdb`, ...)
    #[serde(rename = "type")]
    pub adapter_type: String,
    pub database: String,
    pub schema: String,
    pub threads: usize,
    /// Adapters the active adapter inherits macros from, nearest first
    #[serde(default)]
    pub parent_adapters: Vec<String>,
}

impl TargetInfo {
    /// Adapter dispatch chain: the adapter, its parents, then `default`
    pub fn dispatch_chain(&self) -> Vec<String> {
        let mut chain = vec![self.adapter_type.clone()];
        chain.extend(self.parent_adapters.iter().cloned());
        chain.push("default".to_string());
        chain
    }
}

impl Default for TargetInfo {
    fn default() -> Self {
        Self {
            name: "dev".to_string(),
            adapter_type: "duckdb".to_string(),
            database: "memory".to_string(),
            schema: "main".to_string(),
            threads: 1,
            parent_adapters: Vec::new(),
        }
    }
}

/// Kind of warehouse object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Table,
    View,
    MaterializedView,
    Cte,
    External,
    Function,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Table => "table",
            RelationType::View => "view",
            RelationType::MaterializedView => "materialized_view",
            RelationType::Cte => "cte",
            RelationType::External => "external",
            RelationType::Function => "function",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "table" | "base table" => Some(RelationType::Table),
            "view" => Some(RelationType::View),
            "materialized_view" | "materialized view" => Some(RelationType::MaterializedView),
            "cte" => Some(RelationType::Cte),
            "external" => Some(RelationType::External),
            "function" => Some(RelationType::Function),
            _ => None,
        }
    }
}

/// Which parts of a relation path are quoted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotePolicy {
    pub database: bool,
    pub schema: bool,
    pub identifier: bool,
}

impl Default for QuotePolicy {
    fn default() -> Self {
        Self {
            database: true,
            schema: true,
            identifier: true,
        }
    }
}

/// Half-open event time window used to filter microbatch inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTimeFilter {
    pub field: String,
    pub start: String,
    pub end: String,
}

/// A `database.schema.identifier` path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub database: Option<String>,
    pub schema: Option<String>,
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation_type: Option<RelationType>,
    #[serde(default)]
    pub quote_policy: QuotePolicy,
    /// `Some(0)` renders an empty subquery (empty mode)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time_filter: Option<EventTimeFilter>,
    /// Rendered text for ephemeral CTE references
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cte_name: Option<String>,
}

impl Relation {
    pub fn new(
        database: impl Into<String>,
        schema: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Self {
        let database = database.into();
        Self {
            database: (!database.is_empty()).then_some(database),
            schema: Some(schema.into()),
            identifier: Some(identifier.into()),
            relation_type: None,
            quote_policy: QuotePolicy::default(),
            limit: None,
            event_time_filter: None,
            cte_name: None,
        }
    }

    /// A reference to an ephemeral model's CTE
    pub fn cte(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            database: None,
            schema: None,
            identifier: Some(name.clone()),
            relation_type: Some(RelationType::Cte),
            quote_policy: QuotePolicy::default(),
            limit: None,
            event_time_filter: None,
            cte_name: Some(name),
        }
    }

    pub fn with_type(mut self, relation_type: RelationType) -> Self {
        self.relation_type = Some(relation_type);
        self
    }

    pub fn identifier(&self) -> &str {
        self.identifier.as_deref().unwrap_or("")
    }

    pub fn schema(&self) -> &str {
        self.schema.as_deref().unwrap_or("")
    }

    pub fn database(&self) -> &str {
        self.database.as_deref().unwrap_or("")
    }

    /// Copy with some path components replaced
    pub fn replace_path(
        &self,
        database: Option<String>,
        schema: Option<String>,
        identifier: Option<String>,
    ) -> Self {
        let mut out = self.clone();
        if database.is_some() {
            out.database = database;
        }
        if schema.is_some() {
            out.schema = schema;
        }
        if identifier.is_some() {
            out.identifier = identifier;
            out.cte_name = None;
        }
        out
    }

    /// Relation this one is moved to during a table swap
    pub fn backup(&self) -> Self {
        self.replace_path(None, None, Some(backup_identifier(self.identifier())))
            .without_filters()
    }

    /// Relation a replacement table is built into
    pub fn tmp(&self) -> Self {
        self.replace_path(None, None, Some(tmp_identifier(self.identifier())))
            .without_filters()
    }

    pub fn without_filters(mut self) -> Self {
        self.limit = None;
        self.event_time_filter = None;
        self
    }

    /// The plain quoted path, ignoring limit and event time filters
    pub fn render_path(&self) -> String {
        if let Some(cte) = &self.cte_name {
            return format!("__dbt__cte__{}", cte);
        }
        let parts = [
            (self.database.as_deref(), self.quote_policy.database),
            (self.schema.as_deref(), self.quote_policy.schema),
            (self.identifier.as_deref(), self.quote_policy.identifier),
        ];
        parts
            .iter()
            .filter_map(|(part, quote)| {
                part.filter(|p| !p.is_empty())
                    .map(|p| if *quote { quote_ident(p) } else { p.to_string() })
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Text substituted for the relation in SQL
    pub fn render(&self) -> String {
        let path = self.render_path();
        let alias = self.identifier().replace(|c: char| !c.is_ascii_alphanumeric() && c != '_', "_");
        if self.limit == Some(0) {
            return format!(
                "(select * from {} where false limit 0) _dbt_limit_subq_{}",
                path, alias
            );
        }
        if let Some(limit) = self.limit {
            return format!(
                "(select * from {} limit {}) _dbt_limit_subq_{}",
                path, limit, alias
            );
        }
        if let Some(filter) = &self.event_time_filter {
            return format!(
                "(select * from {} where {} >= '{}' and {} < '{}') _dbt_et_filter_subq_{}",
                path,
                filter.field,
                escape_sql_string(&filter.start),
                filter.field,
                escape_sql_string(&filter.end),
                alias
            );
        }
        path
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

#[cfg(test)]
#[path = "relation_test.rs"]
mod tests;

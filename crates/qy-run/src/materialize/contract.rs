//! Column contracts and grants, checked after a relation is built

use super::{NodeTask, Session};
use crate::error::{DbResultExt, RunError, RunnerResult};
use qy_core::Relation;
use serde_json::Value;
use std::collections::BTreeMap;

/// Canonical spelling of a SQL type, precision dropped
fn normalize_type(data_type: &str) -> String {
    let upper = data_type.trim().to_ascii_uppercase();
    let base = upper.split('(').next().unwrap_or("").trim();
    let canonical = match base {
        "INT" | "INT4" | "SIGNED" => "INTEGER",
        "INT8" | "LONG" => "BIGINT",
        "INT2" | "SHORT" => "SMALLINT",
        "BOOL" | "LOGICAL" => "BOOLEAN",
        "STRING" | "TEXT" | "CHAR" | "BPCHAR" | "CHARACTER VARYING" => "VARCHAR",
        "FLOAT8" | "DOUBLE PRECISION" => "DOUBLE",
        "FLOAT4" | "REAL" | "FLOAT" => "FLOAT",
        "NUMERIC" => "DECIMAL",
        "DATETIME" | "TIMESTAMP WITHOUT TIME ZONE" => "TIMESTAMP",
        "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE" => "TIMESTAMP WITH TIME ZONE",
        other => other,
    };
    canonical.to_string()
}

/// Whether a declared contract type accepts the built column's type
pub fn types_match(declared: &str, actual: &str) -> bool {
    normalize_type(declared) == normalize_type(actual)
}

/// Fail when an enforced contract's columns are missing or mistyped
pub(crate) async fn enforce(task: &NodeTask<'_>, session: &Session<'_>, relation: &Relation) -> RunnerResult<()> {
    let node = task.node;
    if !node.config().contract_enforced() {
        return Ok(());
    }
    let actual: BTreeMap<String, String> = session
        .columns(relation)
        .await?
        .into_iter()
        .map(|c| (c.name.to_ascii_lowercase(), c.data_type))
        .collect();

    let mut problems = Vec::new();
    for column in node.common.columns.values() {
        match actual.get(&column.name.to_ascii_lowercase()) {
            None => problems.push(format!("missing column '{}'", column.name)),
            Some(found) => {
                if let Some(declared) = &column.data_type {
                    if !types_match(declared, found) {
                        problems.push(format!(
                            "column '{}' has type {} (contract: {})",
                            column.name, found, declared
                        ));
                    }
                }
            }
        }
    }
    let declared: Vec<String> = node.common.columns.keys().map(|k| k.to_ascii_lowercase()).collect();
    for name in actual.keys() {
        if !declared.contains(name) {
            problems.push(format!("column '{}' is not in the contract", name));
        }
    }

    if problems.is_empty() {
        return Ok(());
    }
    Err(RunError::Contract {
        node: node.unique_id().to_string(),
        message: problems.join("; "),
    })
}

/// Apply the `grants` config (privilege -> grantees)
pub(crate) async fn apply_grants(task: &NodeTask<'_>, session: &Session<'_>, relation: &Relation) -> RunnerResult<()> {
    let Some(Value::Object(map)) = task.node.config().get("grants") else {
        return Ok(());
    };
    let grants: BTreeMap<String, Vec<String>> = map
        .iter()
        .map(|(privilege, grantees)| {
            let list = match grantees {
                Value::String(s) => vec![s.clone()],
                Value::Array(items) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
                _ => Vec::new(),
            };
            (privilege.clone(), list)
        })
        .collect();
    session
        .connection()
        .apply_grants(relation, &grants)
        .await
        .for_node(task.id())
}

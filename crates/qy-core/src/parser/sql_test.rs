use super::*;
use crate::loader::ParseKind;
use crate::node::RefCall;
use serde_json::json;
use std::path::PathBuf;

fn file(kind: ParseKind, original: &str, resource_rel: &str, contents: &str) -> SourceFile {
    SourceFile {
        file_id: format!("shop://{}", original),
        package_name: "shop".to_string(),
        package_root: PathBuf::from("/proj"),
        original_file_path: original.to_string(),
        path: resource_rel.to_string(),
        parse_kind: kind,
        checksum: FileHash::from_contents(contents),
        contents: contents.to_string(),
    }
}

#[test]
fn test_model_node() {
    let f = file(
        ParseKind::Model,
        "models/staging/stg_orders.sql",
        "staging/stg_orders.sql",
        "{{ config(materialized='table') }}\nselect * from {{ ref('raw_orders') }}",
    );
    let out = parse_model(&f);
    assert_eq!(out.nodes.len(), 1);
    let parsed = &out.nodes[0];
    let node = &parsed.node;
    assert_eq!(node.unique_id(), "model.shop.stg_orders");
    assert_eq!(node.common.fqn, vec!["shop", "staging", "stg_orders"]);
    assert_eq!(node.common.refs, vec![RefCall::new("raw_orders")]);
    assert_eq!(parsed.inline_config.get("materialized"), Some(&json!("table")));
    assert_eq!(
        node.common.unrendered_config.get("materialized").map(String::as_str),
        Some("'table'")
    );
    assert_eq!(node.common.checksum, f.checksum);
}

#[test]
fn test_legacy_snapshot_blocks() {
    let f = file(
        ParseKind::Snapshot,
        "snapshots/orders_snapshot.sql",
        "orders_snapshot.sql",
        "{% snapshot orders_snap %}\n{{ config(strategy='timestamp', unique_key='id', updated_at='updated_at') }}\nselect * from {{ source('raw', 'orders') }}\n{% endsnapshot %}",
    );
    let out = parse_snapshot(&f).unwrap();
    assert_eq!(out.nodes.len(), 1);
    let parsed = &out.nodes[0];
    assert_eq!(parsed.node.unique_id(), "snapshot.shop.orders_snap");
    assert_eq!(parsed.inline_config.get("strategy"), Some(&json!("timestamp")));
    assert_eq!(parsed.node.common.sources.len(), 1);
    assert!(!parsed.node.common.raw_code.contains("endsnapshot"));
}

#[test]
fn test_bare_snapshot_file() {
    let f = file(
        ParseKind::Snapshot,
        "snapshots/snap.sql",
        "snap.sql",
        "select * from {{ ref('orders') }}",
    );
    let out = parse_snapshot(&f).unwrap();
    assert_eq!(out.nodes[0].node.unique_id(), "snapshot.shop.snap");
}

#[test]
fn test_macro_file_with_tests_and_materializations() {
    let f = file(
        ParseKind::Macro,
        "macros/util.sql",
        "util.sql",
        r#"
{% macro cents(col) %}{{ col }} / 100{% endmacro %}
{% macro price(col) %}{{ cents(col) }}{% endmacro %}
{% test is_positive(model, column_name) %}select * from {{ model }} where {{ column_name }} < 0{% endtest %}
{% materialization noop, default %}{{ return({'relations': []}) }}{% endmaterialization %}
"#,
    );
    let out = parse_macros(&f).unwrap();
    let names: Vec<_> = out.macros.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["cents", "price", "test_is_positive", "materialization_noop_default"]
    );
    assert_eq!(out.macros[1].macro_calls, vec!["cents".to_string()]);
    assert!(out.macros[2].macro_sql.starts_with("{% macro test_is_positive(model, column_name) %}"));
    assert_eq!(out.macros[2].arguments, vec!["model", "column_name"]);
}

#[test]
fn test_docs_blocks() {
    let f = file(
        ParseKind::Docs,
        "models/docs.md",
        "docs.md",
        "{% docs orders %}\nOne row per order.\n{% enddocs %}",
    );
    let out = parse_docs(&f).unwrap();
    assert_eq!(out.docs[0].unique_id, "doc.shop.orders");
    assert_eq!(out.docs[0].block_contents, "One row per order.");
}

#[test]
fn test_hooks_become_operations() {
    let f = file(
        ParseKind::Hook,
        "dbt_project.yml",
        "dbt_project.yml",
        "name: shop\non-run-start:\n  - create schema if not exists audit\non-run-end: \"select 1\"\n",
    );
    let out = parse_hooks(&f).unwrap();
    let ids: Vec<_> = out.nodes.iter().map(|n| n.node.unique_id().to_string()).collect();
    assert_eq!(
        ids,
        vec![
            "operation.shop.shop-on-run-start-0".to_string(),
            "operation.shop.shop-on-run-end-0".to_string()
        ]
    );
}

#[test]
fn test_seed_node() {
    let f = file(ParseKind::Seed, "seeds/countries.csv", "countries.csv", "");
    let out = parse_seed(&f);
    let node = &out.nodes[0].node;
    assert_eq!(node.unique_id(), "seed.shop.countries");
    match &node.kind {
        NodeKind::Seed(attrs) => assert_eq!(attrs.root_path, "/proj"),
        other => panic!("unexpected kind {:?}", other),
    }
}

use super::*;
use crate::checksum::FileHash;
use crate::node::{DependsOn, Macro, ModelAttrs, NodeCommon, NodeKind};
use serde_json::{json, Value};
use tempfile::TempDir;

fn model(name: &str, body: &str) -> Node {
    Node::new(
        NodeCommon {
            unique_id: format!("model.shop.{}", name),
            name: name.to_string(),
            package_name: "shop".to_string(),
            checksum: FileHash::from_contents(body),
            raw_code: body.to_string(),
            schema: Some("main".to_string()),
            alias: Some(name.to_string()),
            ..Default::default()
        },
        NodeKind::Model(ModelAttrs::default()),
    )
}

fn mac(name: &str, sql: &str, deps: &[&str]) -> Macro {
    Macro {
        unique_id: format!("macro.shop.{}", name),
        name: name.to_string(),
        package_name: "shop".to_string(),
        original_file_path: "macros/m.sql".to_string(),
        file_id: "shop://macros/m.sql".to_string(),
        macro_sql: sql.to_string(),
        arguments: Vec::new(),
        description: String::new(),
        depends_on: DependsOn {
            nodes: Vec::new(),
            macros: deps.iter().map(|d| format!("macro.shop.{}", d)).collect(),
        },
        macro_calls: Vec::new(),
        checksum: FileHash::from_contents(sql),
    }
}

fn manifest(nodes: Vec<Node>) -> Manifest {
    let mut m = Manifest::default();
    for node in nodes {
        m.nodes.insert(node.unique_id().to_string(), node);
    }
    m
}

fn kinds(comparison: &StateComparison, id: &str) -> Vec<ChangeKind> {
    comparison.changes.get(id).map(|k| k.iter().copied().collect()).unwrap_or_default()
}

#[test]
fn test_identical_manifests_have_no_changes() {
    let mut node = model("a", "select 1");
    node.common.checksum = FileHash::empty();
    let m = manifest(vec![node, model("b", "select 2")]);
    let comparison = compare(&m, &m, CompareOptions::default());
    assert!(comparison.changes.values().all(BTreeSet::is_empty));
    assert!(comparison.new.is_empty() && comparison.removed.is_empty());
    assert!(comparison.is_unmodified("model.shop.a"));
}

#[test]
fn test_body_change() {
    let previous = manifest(vec![model("a", "select 1"), model("b", "select 2")]);
    let current = manifest(vec![model("a", "select 10"), model("b", "select 2")]);
    let comparison = compare(&previous, &current, CompareOptions::default());
    assert_eq!(kinds(&comparison, "model.shop.a"), vec![ChangeKind::Body]);
    assert!(comparison.is_modified("model.shop.a"));
    assert!(!comparison.is_modified("model.shop.b"));
}

#[test]
fn test_new_and_removed() {
    let previous = manifest(vec![model("a", "select 1"), model("gone", "select 1")]);
    let current = manifest(vec![model("a", "select 1"), model("fresh", "select 1")]);
    let comparison = compare(&previous, &current, CompareOptions::default());
    assert!(comparison.is_new("model.shop.fresh"));
    assert!(comparison.is_modified_by("model.shop.fresh", ChangeKind::Configs));
    assert!(!comparison.is_old("model.shop.fresh"));
    assert!(comparison.removed.contains("model.shop.gone"));
}

#[test]
fn test_rendered_and_unrendered_configs() {
    let mut old = model("a", "select 1");
    old.common.config.set("schema", json!("dev_finance"));
    old.common.unrendered_config.insert("schema".to_string(), "{{ target.name }}_finance".to_string());
    let mut new = model("a", "select 1");
    new.common.config.set("schema", json!("prod_finance"));
    new.common.unrendered_config.insert("schema".to_string(), "{{target.name}}_finance".to_string());

    let previous = manifest(vec![old]);
    let current = manifest(vec![new]);
    let rendered = compare(&previous, &current, CompareOptions::default());
    assert_eq!(kinds(&rendered, "model.shop.a"), vec![ChangeKind::Configs]);

    let unrendered = compare(&previous, &current, CompareOptions { unrendered: true });
    assert_eq!(kinds(&unrendered, "model.shop.a"), vec![ChangeKind::Configs]);

    let mut spaced = current.clone();
    if let Some(node) = spaced.nodes.get_mut("model.shop.a") {
        node.common
            .unrendered_config
            .insert("schema".to_string(), "{{ target.name }}_finance".to_string());
        node.common.config.set("schema", json!("prod_finance"));
    }
    let mut spaced_prev = previous.clone();
    if let Some(node) = spaced_prev.nodes.get_mut("model.shop.a") {
        node.common
            .unrendered_config
            .insert("schema".to_string(), "{{  target.name  }}_finance".to_string());
    }
    let whitespace_only = compare(&spaced_prev, &spaced, CompareOptions { unrendered: true });
    assert!(kinds(&whitespace_only, "model.shop.a").is_empty());
}

#[test]
fn test_relation_change() {
    let mut moved = model("a", "select 1");
    moved.common.schema = Some("analytics".to_string());
    let comparison = compare(
        &manifest(vec![model("a", "select 1")]),
        &manifest(vec![moved]),
        CompareOptions { unrendered: true },
    );
    assert_eq!(kinds(&comparison, "model.shop.a"), vec![ChangeKind::Relation]);
}

#[test]
fn test_descriptions_only_count_when_persisted() {
    let mut old = model("a", "select 1");
    old.common.description = "before".to_string();
    let mut new = model("a", "select 1");
    new.common.description = "after".to_string();
    let comparison = compare(&manifest(vec![old.clone()]), &manifest(vec![new.clone()]), CompareOptions::default());
    assert!(kinds(&comparison, "model.shop.a").is_empty());

    let persist = json!({"relation": true});
    old.common.config.set("persist_docs", persist.clone());
    new.common.config.set("persist_docs", persist);
    let comparison = compare(&manifest(vec![old]), &manifest(vec![new]), CompareOptions::default());
    assert_eq!(
        kinds(&comparison, "model.shop.a"),
        vec![ChangeKind::PersistedDescriptions]
    );
}

#[test]
fn test_transitive_macro_change() {
    let mut node = model("a", "select {{ cents('x') }}");
    node.common.depends_on.macros = vec!["macro.shop.cents".to_string()];
    let mut previous = manifest(vec![node.clone(), model("b", "select 1")]);
    let mut current = previous.clone();
    previous.macros.insert("macro.shop.cents".to_string(), mac("cents", "{{ round(x) }}", &["round"]));
    previous.macros.insert("macro.shop.round".to_string(), mac("round", "round({{ x }})", &[]));
    current.macros.insert("macro.shop.cents".to_string(), mac("cents", "{{ round(x) }}", &["round"]));
    current.macros.insert("macro.shop.round".to_string(), mac("round", "round({{ x }}, 2)", &[]));

    let comparison = compare(&previous, &current, CompareOptions::default());
    assert_eq!(kinds(&comparison, "model.shop.a"), vec![ChangeKind::Macros]);
    assert!(kinds(&comparison, "model.shop.b").is_empty());
}

fn contracted(columns: &[(&str, &str)]) -> Node {
    let mut node = model("a", "select 1");
    node.common.config.set("contract", json!({"enforced": true}));
    for (name, data_type) in columns {
        node.common.columns.insert(
            name.to_string(),
            ColumnInfo {
                name: name.to_string(),
                data_type: Some(data_type.to_string()),
                ..Default::default()
            },
        );
    }
    node
}

#[test]
fn test_contract_changes_distinguish_breaking() {
    let previous = manifest(vec![contracted(&[("id", "integer"), ("name", "text")])]);

    let added = manifest(vec![contracted(&[("id", "integer"), ("name", "text"), ("age", "integer")])]);
    let comparison = compare(&previous, &added, CompareOptions::default());
    assert!(comparison.is_modified_by("model.shop.a", ChangeKind::Contract));
    assert!(!comparison.has_breaking_contract_change("model.shop.a"));

    let retyped = manifest(vec![contracted(&[("id", "bigint")])]);
    let comparison = compare(&previous, &retyped, CompareOptions::default());
    assert!(comparison.has_breaking_contract_change("model.shop.a"));
    let changes = &comparison.contract_changes["model.shop.a"];
    assert!(changes.contains(&ContractChange::ColumnRemoved { column: "name".to_string() }));
    assert!(changes.contains(&ContractChange::TypeChanged {
        column: "id".to_string(),
        old_type: "integer".to_string(),
        new_type: "bigint".to_string(),
    }));
}

#[test]
fn test_var_change() {
    let mut node = model("a", "select {{ var('region') }}");
    node.common.vars = vec!["region".to_string()];
    let mut previous = manifest(vec![node.clone(), model("b", "select 1")]);
    let mut current = previous.clone();
    previous
        .vars
        .insert("shop".to_string(), BTreeMap::from([("region".to_string(), Value::from("eu"))]));
    current
        .vars
        .insert("shop".to_string(), BTreeMap::from([("region".to_string(), Value::from("us"))]));
    let comparison = compare(&previous, &current, CompareOptions::default());
    assert_eq!(kinds(&comparison, "model.shop.a"), vec![ChangeKind::Vars]);
    assert!(kinds(&comparison, "model.shop.b").is_empty());
}

#[test]
fn test_change_kind_names() {
    for kind in ChangeKind::ALL {
        assert_eq!(ChangeKind::parse(kind.as_str()), Some(kind));
    }
    assert_eq!(ChangeKind::parse("everything"), None);
}

#[test]
fn test_previous_state_requires_manifest() {
    let dir = TempDir::new().unwrap();
    assert!(PreviousState::load(dir.path()).is_err());

    manifest(vec![model("a", "select 1")])
        .save(&dir.path().join("manifest.json"))
        .unwrap();
    let state = PreviousState::load(dir.path()).unwrap();
    assert!(state.run_results.is_none());
    assert!(state.manifest.node("model.shop.a").is_some());
}

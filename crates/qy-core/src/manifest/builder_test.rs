use super::*;
use crate::loader::{discover, LoaderOptions};
use crate::parser::parse_files;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn project(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    if !files.iter().any(|(p, _)| *p == "dbt_project.yml") {
        write(dir.path(), "dbt_project.yml", "name: shop\n");
    }
    for (path, content) in files {
        write(dir.path(), path, content);
    }
    dir
}

fn build_with(dir: &TempDir, options: BuildOptions) -> CoreResult<Manifest> {
    let project = Project::load(dir.path())?;
    let files = discover(&project, &LoaderOptions::default())?;
    let outputs = parse_files(files.iter())?;
    let target = TargetInfo::default();
    let invocation = Invocation::default();
    ManifestBuilder::new(&project, &target, &invocation)
        .with_options(options)
        .build(&outputs)
}

fn build(files: &[(&str, &str)]) -> CoreResult<Manifest> {
    let dir = project(files);
    build_with(&dir, BuildOptions::default())
}

#[test]
fn test_refs_become_edges() {
    let manifest = build(&[
        ("models/a.sql", "select 1 as id"),
        ("models/b.sql", "select * from {{ ref('a') }}"),
    ])
    .unwrap();
    assert_eq!(manifest.parents("model.shop.b"), ["model.shop.a".to_string()]);
    assert_eq!(manifest.children("model.shop.a"), ["model.shop.b".to_string()]);
    assert!(manifest.children("model.shop.b").is_empty());
    let a = manifest.node("model.shop.a").unwrap();
    assert_eq!(a.common.relation_name.as_deref(), Some("\"memory\".\"main\".\"a\""));
    assert_eq!(a.common.subgraph_id, "shop");
}

#[test]
fn test_missing_ref_is_reported() {
    let err = build(&[("models/b.sql", "select * from {{ ref('nope') }}")]).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("model.shop.b"), "{}", message);
    assert!(message.contains("nope"), "{}", message);
}

#[test]
fn test_cycle_is_rejected() {
    let err = build(&[
        ("models/a.sql", "select * from {{ ref('b') }}"),
        ("models/b.sql", "select * from {{ ref('a') }}"),
    ])
    .unwrap_err();
    assert!(matches!(err, CoreError::CircularDependency { .. }), "{}", err);
}

#[test]
fn test_project_config_layers_by_folder() {
    let manifest = build(&[
        (
            "dbt_project.yml",
            "name: shop\nmodels:\n  shop:\n    +materialized: table\n    staging:\n      +materialized: view\n      +schema: stg\n",
        ),
        ("models/staging/stg_orders.sql", "select 1 as id"),
        ("models/orders.sql", "{{ config(materialized='incremental') }}\nselect 1 as id"),
    ])
    .unwrap();
    let stg = manifest.node("model.shop.stg_orders").unwrap();
    assert_eq!(stg.materialized(), "view");
    assert_eq!(stg.common.schema.as_deref(), Some("main_stg"));
    assert_eq!(
        stg.common.unrendered_config.get("materialized").map(String::as_str),
        Some("view")
    );
    let orders = manifest.node("model.shop.orders").unwrap();
    assert_eq!(orders.materialized(), "incremental");
    assert_eq!(orders.common.schema.as_deref(), Some("main"));
}

#[test]
fn test_disabled_model_disables_its_tests() {
    let manifest = build(&[
        ("models/legacy.sql", "{{ config(enabled=false) }}\nselect 1 as id"),
        (
            "models/schema.yml",
            "models:\n  - name: legacy\n    columns:\n      - name: id\n        data_tests: [not_null]\n",
        ),
    ])
    .unwrap();
    assert!(manifest.node("model.shop.legacy").is_none());
    assert!(manifest.disabled.contains_key("model.shop.legacy"));
    assert!(manifest.nodes.keys().all(|k| !k.starts_with("test.")));
    assert!(manifest.disabled.keys().any(|k| k.starts_with("test.shop.not_null_legacy_id")));
}

#[test]
fn test_ref_to_disabled_model_is_error() {
    let err = build(&[
        ("models/legacy.sql", "{{ config(enabled=false) }}\nselect 1 as id"),
        ("models/current.sql", "select * from {{ ref('legacy') }}"),
    ])
    .unwrap_err();
    assert!(matches!(err, CoreError::RefToDisabled { .. }), "{}", err);
}

#[test]
fn test_generic_test_attaches_to_model() {
    let manifest = build(&[
        ("models/orders.sql", "select 1 as id"),
        (
            "models/schema.yml",
            "models:\n  - name: orders\n    columns:\n      - name: id\n        data_tests: [unique]\n",
        ),
    ])
    .unwrap();
    let test = manifest
        .nodes
        .values()
        .find(|n| n.resource_type() == ResourceType::Test)
        .unwrap();
    assert_eq!(
        test.test_attrs().and_then(|a| a.attached_node.as_deref()),
        Some("model.shop.orders")
    );
    assert_eq!(test.common.schema.as_deref(), Some("main_dbt_test__audit"));
    assert_eq!(test.common.relation_name, None);
    assert_eq!(test.config().get_str("severity"), Some("ERROR"));
}

#[test]
fn test_versioned_models() {
    let manifest = build(&[
        ("models/dim_customers_v1.sql", "select 1 as id"),
        ("models/dim_customers_v2.sql", "select 1 as id, 'x' as name"),
        (
            "models/schema.yml",
            "models:\n  - name: dim_customers\n    latest_version: 2\n    versions:\n      - v: 1\n      - v: 2\n",
        ),
        ("models/latest.sql", "select * from {{ ref('dim_customers') }}"),
        ("models/pinned.sql", "select * from {{ ref('dim_customers', v=1) }}"),
    ])
    .unwrap();
    let v1 = manifest.node("model.shop.dim_customers.v1").unwrap();
    assert_eq!(v1.name(), "dim_customers");
    assert_eq!(v1.version(), Some("1"));
    assert_eq!(v1.latest_version(), Some("2"));
    assert_eq!(v1.common.alias.as_deref(), Some("dim_customers_v1"));
    assert_eq!(
        manifest.parents("model.shop.latest"),
        ["model.shop.dim_customers.v2".to_string()]
    );
    assert_eq!(
        manifest.parents("model.shop.pinned"),
        ["model.shop.dim_customers.v1".to_string()]
    );
}

#[test]
fn test_version_without_file_is_error() {
    let err = build(&[
        ("models/dim_v1.sql", "select 1 as id"),
        (
            "models/schema.yml",
            "models:\n  - name: dim\n    versions:\n      - v: 1\n      - v: 3\n",
        ),
    ])
    .unwrap_err();
    assert!(err.to_string().contains("version 3"), "{}", err);
}

#[test]
fn test_identical_relations_are_rejected() {
    let err = build(&[
        ("models/a.sql", "{{ config(alias='shared') }}\nselect 1 as id"),
        ("models/b.sql", "{{ config(alias='SHARED') }}\nselect 1 as id"),
    ])
    .unwrap_err();
    match err {
        CoreError::DuplicateRelation { first, second, .. } => {
            assert_eq!(first, "model.shop.a");
            assert_eq!(second, "model.shop.b");
        }
        other => panic!("unexpected {}", other),
    }
}

#[test]
fn test_ephemeral_models_may_share_names() {
    let manifest = build(&[
        ("models/a.sql", "{{ config(alias='shared', materialized='ephemeral') }}\nselect 1"),
        ("models/b.sql", "{{ config(alias='shared') }}\nselect 1"),
    ])
    .unwrap();
    assert_eq!(manifest.node("model.shop.a").unwrap().common.relation_name, None);
}

#[test]
fn test_private_model_outside_group() {
    let err = build(&[
        ("models/revenue.sql", "select 1 as amount"),
        ("models/report.sql", "select * from {{ ref('revenue') }}"),
        (
            "models/schema.yml",
            "groups:\n  - name: finance\n    owner:\n      name: Fin\nmodels:\n  - name: revenue\n    access: private\n    config:\n      group: finance\n",
        ),
    ])
    .unwrap_err();
    match err {
        CoreError::AccessViolation { node, target, .. } => {
            assert_eq!(node, "model.shop.report");
            assert_eq!(target, "model.shop.revenue");
        }
        other => panic!("unexpected {}", other),
    }
}

#[test]
fn test_private_model_inside_group() {
    let manifest = build(&[
        ("models/revenue.sql", "select 1 as amount"),
        ("models/report.sql", "select * from {{ ref('revenue') }}"),
        (
            "models/schema.yml",
            "groups:\n  - name: finance\n    owner:\n      name: Fin\nmodels:\n  - name: revenue\n    access: private\n    config:\n      group: finance\n  - name: report\n    config:\n      group: finance\n",
        ),
    ])
    .unwrap();
    assert_eq!(
        manifest.group_map.get("finance"),
        Some(&vec!["model.shop.report".to_string(), "model.shop.revenue".to_string()])
    );
    assert_eq!(manifest.node("model.shop.report").unwrap().common.subgraph_id, "finance");
}

#[test]
fn test_doc_blocks_fill_descriptions() {
    let manifest = build(&[
        ("models/orders.sql", "select 1 as id"),
        ("models/docs.md", "{% docs orders_doc %}Every order ever placed{% enddocs %}"),
        (
            "models/schema.yml",
            "models:\n  - name: orders\n    description: \"{{ doc('orders_doc') }}\"\n",
        ),
    ])
    .unwrap();
    let orders = manifest.node("model.shop.orders").unwrap();
    assert!(orders.common.description.contains("Every order ever placed"));
    assert_eq!(orders.common.patch_path.as_deref(), Some("shop://models/schema.yml"));
}

#[test]
fn test_missing_doc_is_error() {
    let err = build(&[
        ("models/orders.sql", "select 1 as id"),
        (
            "models/schema.yml",
            "models:\n  - name: orders\n    description: \"{{ doc('nowhere') }}\"\n",
        ),
    ])
    .unwrap_err();
    assert!(matches!(err, CoreError::DocNotFound { .. }), "{}", err);
}

#[test]
fn test_sources_resolve_and_get_relations() {
    let manifest = build(&[
        (
            "models/sources.yml",
            "sources:\n  - name: raw\n    schema: landing\n    tables:\n      - name: orders\n",
        ),
        ("models/stg.sql", "select * from {{ source('raw', 'orders') }}"),
    ])
    .unwrap();
    assert_eq!(manifest.parents("model.shop.stg"), ["source.shop.raw.orders".to_string()]);
    let source = manifest.node("source.shop.raw.orders").unwrap();
    assert_eq!(
        source.common.relation_name.as_deref(),
        Some("\"memory\".\"landing\".\"orders\"")
    );
}

#[test]
fn test_missing_required_patch() {
    let err = build(&[(
        "models/schema.yml",
        "models:\n  - name: ghost\n    required: true\n",
    )])
    .unwrap_err();
    assert!(matches!(err, CoreError::MissingRequiredPatch { .. }), "{}", err);
}

#[test]
fn test_cli_vars_override_project_vars() {
    let dir = project(&[
        ("dbt_project.yml", "name: shop\nvars:\n  region: eu\n  limit: 5\n"),
        ("models/a.sql", "select 1"),
    ]);
    let mut options = BuildOptions::default();
    options.cli_vars.insert("region".to_string(), Value::String("us".to_string()));
    let manifest = build_with(&dir, options).unwrap();
    let vars = manifest.vars_for("shop");
    assert_eq!(vars.get("region"), Some(&Value::String("us".to_string())));
    assert_eq!(vars.get("limit"), Some(&Value::from(5)));
}

#[test]
fn test_build_is_deterministic() {
    let dir = project(&[
        ("models/a.sql", "select 1 as id"),
        ("models/b.sql", "select * from {{ ref('a') }}"),
        (
            "models/schema.yml",
            "models:\n  - name: b\n    columns:\n      - name: id\n        data_tests: [not_null, unique]\n",
        ),
    ]);
    let first = build_with(&dir, BuildOptions::default()).unwrap();
    let second = build_with(&dir, BuildOptions::default()).unwrap();
    assert_eq!(first.metadata.manifest_hash, second.metadata.manifest_hash);
    assert_ne!(first.metadata.invocation_id, second.metadata.invocation_id);
}

#[test]
fn test_tree_layers_stop_at_dict_configs() {
    let tree: Value = serde_yaml::from_str(
        "+tags: [a]\nshop:\n  meta:\n    owner: x\n  marts:\n    +materialized: table\n",
    )
    .unwrap();
    let fqn = vec!["shop".to_string(), "marts".to_string(), "m".to_string()];
    let layers = tree_layers(&tree, &fqn);
    assert_eq!(layers.len(), 3);
    assert_eq!(layers[0].source, LayerSource::ProjectDefaults);
    assert!(layers[1].values.contains_key("meta"));
    assert_eq!(layers[2].source, LayerSource::Folder("shop.marts".to_string()));
}

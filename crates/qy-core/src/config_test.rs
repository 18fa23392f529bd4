use super::*;
use serde_json::json;

fn parse(yaml: &str) -> CoreResult<ProjectConfig> {
    ProjectConfig::from_str(yaml, Path::new("dbt_project.yml"))
}

#[test]
fn test_minimal_project_defaults() {
    let config = parse("name: shop\n").unwrap();
    assert_eq!(config.version, "1.0.0");
    assert_eq!(config.model_paths, vec!["models"]);
    assert_eq!(config.seed_paths, vec!["seeds"]);
    assert_eq!(config.target_path, "target");
    assert_eq!(config.packages_install_path, "dbt_packages");
    assert_eq!(config.clean_targets, vec!["target"]);
    assert!(config.on_run_start.is_empty());
    assert!(config.unknown.is_empty());
}

#[test]
fn test_kebab_and_legacy_aliases() {
    let config = parse(
        r#"
name: shop
version: 2
source-paths: ["sql"]
data-paths: ["data"]
on-run-start: "create schema if not exists audit"
on-run-end:
  - "select 1"
  - "select 2"
"#,
    )
    .unwrap();
    assert_eq!(config.version, "2");
    assert_eq!(config.model_paths, vec!["sql"]);
    assert_eq!(config.seed_paths, vec!["data"]);
    assert_eq!(config.on_run_start.len(), 1);
    assert_eq!(config.on_run_end.len(), 2);
}

#[test]
fn test_unknown_keys_are_collected() {
    let config = parse("name: shop\nmystery-key: 1\n").unwrap();
    assert!(config.unknown.contains_key("mystery-key"));
}

#[test]
fn test_invalid_name_rejected() {
    assert!(parse("name: ''\n").is_err());
    assert!(parse("name: 'my-project'\n").is_err());
}

#[test]
fn test_docs_paths_default_union() {
    let config = parse("name: shop\n").unwrap();
    let paths = config.docs_paths();
    assert!(paths.contains(&"models".to_string()));
    assert!(paths.contains(&"macros".to_string()));
}

#[test]
fn test_package_scoped_vars() {
    let config = parse(
        r#"
name: shop
vars:
  start_date: "2024-01-01"
  utils:
    start_date: "2020-01-01"
    limit: 5
"#,
    )
    .unwrap();
    let packages = vec!["shop".to_string(), "utils".to_string()];
    let root_vars = config.vars_for_package("shop", &packages);
    assert_eq!(root_vars.get("start_date"), Some(&json!("2024-01-01")));
    assert!(!root_vars.contains_key("utils"));

    let pkg_vars = config.vars_for_package("utils", &packages);
    assert_eq!(pkg_vars.get("start_date"), Some(&json!("2020-01-01")));
    assert_eq!(pkg_vars.get("limit"), Some(&json!(5)));
}

#[test]
fn test_config_tree_and_dispatch() {
    let config = parse(
        r#"
name: shop
models:
  shop:
    +materialized: table
tests:
  +severity: warn
dispatch:
  - macro_namespace: utils
    search_order: ["shop", "utils"]
"#,
    )
    .unwrap();
    assert_eq!(
        config.config_tree(ResourceType::Model)["shop"]["+materialized"],
        json!("table")
    );
    assert_eq!(
        config.config_tree(ResourceType::Test)["+severity"],
        json!("warn")
    );
    assert_eq!(
        config.dispatch_order("utils"),
        Some(&["shop".to_string(), "utils".to_string()][..])
    );
}

#[test]
fn test_load_missing_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let err = ProjectConfig::load_from_dir(dir.path()).unwrap_err();
    assert!(matches!(err, CoreError::ProjectNotFound { .. }));
}

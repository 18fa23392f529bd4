use super::*;
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

fn session() -> (TempDir, Session) {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "dbt_project.yml", "name: shop\n");
    write(
        dir.path(),
        "models/sources.yml",
        "sources:\n  - name: raw\n    tables:\n      - name: orders\n",
    );
    write(dir.path(), "models/staging/stg_orders.sql", "select * from {{ source('raw', 'orders') }}");
    let global = GlobalArgs {
        verbose: false,
        project_dir: dir.path().to_path_buf(),
        profiles_dir: None,
        target: None,
        no_partial_parse: true,
    };
    let session = Session::load(&global, None, None).unwrap();
    (dir, session)
}

#[test]
fn test_selector_names() {
    let (_dir, session) = session();
    let model = session.manifest.node("model.shop.stg_orders").unwrap();
    assert_eq!(selector_name(model), "shop.staging.stg_orders");
    let source = session.manifest.node("source.shop.raw.orders").unwrap();
    assert_eq!(selector_name(source), "source:shop.raw.orders");
}

#[test]
fn test_json_line_fields() {
    let (_dir, session) = session();
    let model = session.manifest.node("model.shop.stg_orders").unwrap();
    let value: serde_json::Value = serde_json::from_str(&json_line(model).unwrap()).unwrap();
    assert_eq!(value["unique_id"], "model.shop.stg_orders");
    assert_eq!(value["resource_type"], "model");
    assert_eq!(value["name"], "stg_orders");
    assert_eq!(value["package_name"], "shop");
    assert_eq!(value["original_file_path"], "models/staging/stg_orders.sql");
    assert_eq!(value["depends_on"]["nodes"][0], "source.shop.raw.orders");
}

#[test]
fn test_hooks_are_not_listed() {
    assert!(!LISTED_TYPES.contains(&ResourceType::Operation));
    assert!(LISTED_TYPES.contains(&ResourceType::Source));
}

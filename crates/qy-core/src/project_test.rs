use super::*;
use std::fs;
use tempfile::TempDir;

fn write(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

#[test]
fn test_load_root_only() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "dbt_project.yml", "name: shop\n");
    let project = Project::load(dir.path()).unwrap();
    assert_eq!(project.name(), "shop");
    assert_eq!(project.packages.len(), 1);
    assert!(project.packages[0].is_root);
}

#[test]
fn test_local_and_installed_packages() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "dbt_project.yml", "name: shop\n");
    write(dir.path(), "packages.yml", "packages:\n  - local: libs/helpers\n");
    write(dir.path(), "libs/helpers/dbt_project.yml", "name: helpers\n");
    write(dir.path(), "dbt_packages/audit/dbt_project.yml", "name: audit\n");

    let project = Project::load(dir.path()).unwrap();
    assert_eq!(project.package_names(), vec!["shop", "audit", "helpers"]);
    assert!(!project.package("helpers").unwrap().is_root);
}

#[test]
fn test_missing_remote_package_is_error() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "dbt_project.yml", "name: shop\n");
    write(
        dir.path(),
        "packages.yml",
        "packages:\n  - package: dbt-labs/dbt_utils\n    version: 1.1.1\n",
    );
    let err = Project::load(dir.path()).unwrap_err();
    assert!(err.to_string().contains("install dependencies first"));
}

#[test]
fn test_duplicate_package_names() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "dbt_project.yml", "name: shop\n");
    write(dir.path(), "dbt_packages/a/dbt_project.yml", "name: shop\n");
    assert!(Project::load(dir.path()).is_err());
}

#[test]
fn test_fingerprint_changes_with_config() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "dbt_project.yml", "name: shop\n");
    let before = Project::load(dir.path()).unwrap().config_fingerprint();
    write(dir.path(), "dbt_project.yml", "name: shop\nvars:\n  x: 1\n");
    let after = Project::load(dir.path()).unwrap().config_fingerprint();
    assert_ne!(before, after);
}

use super::*;
use serde_json::json;

fn fqn(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_fqn_leaf_prefix_and_wildcards() {
    let orders = fqn(&["shop", "marts", "orders"]);
    assert!(fqn_matches(&orders, "orders", false));
    assert!(fqn_matches(&orders, "shop", false));
    assert!(fqn_matches(&orders, "shop.marts", false));
    assert!(fqn_matches(&orders, "shop.marts.orders", false));
    assert!(fqn_matches(&orders, "shop.mar*", false));
    assert!(fqn_matches(&orders, "shop.*.orders", false));
    assert!(!fqn_matches(&orders, "marts", false));
    assert!(!fqn_matches(&orders, "shop.staging", false));
    assert!(!fqn_matches(&orders, "shop.marts.orders.extra", false));
}

#[test]
fn test_fqn_versioned_names() {
    let dim = fqn(&["shop", "dim", "v2"]);
    assert!(fqn_matches(&dim, "dim", true));
    assert!(fqn_matches(&dim, "dim_v2", true));
    assert!(fqn_matches(&dim, "dim.v2", true));
    assert!(!fqn_matches(&dim, "dim_v1", true));
}

#[test]
fn test_config_values() {
    assert!(config_value_matches(&json!("table"), "table", false));
    assert!(!config_value_matches(&json!("table"), "TABLE", false));
    assert!(config_value_matches(&json!("ERROR"), "error", true));
    assert!(config_value_matches(&json!(true), "True", false));
    assert!(config_value_matches(&json!(4), "4", false));
    assert!(config_value_matches(&json!(2.5), "2.5", false));
    assert!(config_value_matches(&json!(["a", "b"]), "b", false));
    assert!(!config_value_matches(&json!({"a": 1}), "a", false));
}

#[test]
fn test_paths() {
    assert!(path_matches("models/staging", "models/staging/stg.sql"));
    assert!(path_matches("models/staging/", "models/staging/stg.sql"));
    assert!(path_matches("./models", "models/staging/stg.sql"));
    assert!(!path_matches("models/stag", "models/staging/stg.sql"));
    assert!(path_matches("models/*/stg.sql", "models/staging/stg.sql"));
    assert!(path_matches("models/stag*", "models/staging/stg.sql"));
}

#[test]
fn test_glob() {
    assert!(glob_match("nightly*", "nightly_full"));
    assert!(glob_match("n?ghtly", "nightly"));
    assert!(!glob_match("daily", "nightly"));
    assert!(glob_match("[broken", "[broken"));
}

#[test]
fn test_named_resource_values() {
    let method = MethodName::Exposure;
    assert_eq!(package_and_name(&method, "dash").unwrap(), ("*", "dash"));
    assert_eq!(package_and_name(&method, "shop.dash").unwrap(), ("shop", "dash"));
    assert!(package_and_name(&method, "a.b.c").is_err());
}

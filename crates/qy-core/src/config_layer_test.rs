use super::*;
use serde_json::json;

fn layer(source: LayerSource, value: Value) -> ConfigLayer {
    let values = value
        .as_object()
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();
    ConfigLayer::new(source, values)
}

#[test]
fn test_clobber_last_wins() {
    let merged = merge_layers(&[
        layer(LayerSource::AdapterDefaults, json!({"materialized": "view"})),
        layer(LayerSource::Folder("staging".into()), json!({"+materialized": "table"})),
        layer(LayerSource::Inline, json!({"materialized": "incremental"})),
    ]);
    assert_eq!(merged.materialized(), Some("incremental"));
}

#[test]
fn test_append_tags_dedupes() {
    let merged = merge_layers(&[
        layer(LayerSource::ProjectDefaults, json!({"tags": "nightly"})),
        layer(LayerSource::SchemaYaml, json!({"tags": ["nightly", "finance"]})),
    ]);
    assert_eq!(merged.tags(), vec!["nightly".to_string(), "finance".to_string()]);
}

#[test]
fn test_update_meta_shallow() {
    let merged = merge_layers(&[
        layer(LayerSource::ProjectDefaults, json!({"meta": {"owner": "a", "tier": 1}})),
        layer(LayerSource::Inline, json!({"meta": {"owner": "b"}})),
    ]);
    assert_eq!(merged.get("meta"), Some(&json!({"owner": "b", "tier": 1})));
}

#[test]
fn test_dict_key_append_grants() {
    let merged = merge_layers(&[
        layer(LayerSource::ProjectDefaults, json!({"grants": {"select": ["reporter"]}})),
        layer(
            LayerSource::SchemaYaml,
            json!({"grants": {"select": "bi", "insert": ["loader"]}}),
        ),
    ]);
    assert_eq!(
        merged.get("grants"),
        Some(&json!({"select": ["reporter", "bi"], "insert": ["loader"]}))
    );
}

#[test]
fn test_hook_key_normalized() {
    let merged = merge_layers(&[
        layer(LayerSource::ProjectDefaults, json!({"+pre-hook": "select 1"})),
        layer(LayerSource::Inline, json!({"pre_hook": ["select 2"]})),
    ]);
    assert_eq!(
        merged.hooks("pre_hook"),
        vec![("select 1".to_string(), true), ("select 2".to_string(), true)]
    );
}

#[test]
fn test_hook_object_transaction_flag() {
    let merged = merge_layers(&[layer(
        LayerSource::Inline,
        json!({"post_hook": [{"sql": "vacuum", "transaction": false}]}),
    )]);
    assert_eq!(merged.hooks("post_hook"), vec![("vacuum".to_string(), false)]);
}

#[test]
fn test_merge_is_deterministic() {
    let layers = vec![
        layer(LayerSource::ProjectDefaults, json!({"tags": ["a"], "schema": "x"})),
        layer(LayerSource::Inline, json!({"tags": ["b"], "alias": "y"})),
    ];
    assert_eq!(merge_layers(&layers), merge_layers(&layers));
}

#[test]
fn test_get_path_and_bool_strings() {
    let mut config = NodeConfig::new();
    config.set("meta", json!({"owner": {"team": "core"}}));
    config.set("enabled", json!("False"));
    assert_eq!(config.get_path("meta.owner.team"), Some(&json!("core")));
    assert!(!config.enabled());
}

#[test]
fn test_contract_enforced() {
    let merged = merge_layers(&[
        layer(LayerSource::ProjectDefaults, json!({"contract": {"enforced": true}})),
        layer(LayerSource::Inline, json!({"contract": {"alias_types": false}})),
    ]);
    assert!(merged.contract_enforced());
}

use super::*;
use serde_json::json;

fn model(name: &str) -> Node {
    Node::new(
        NodeCommon {
            unique_id: unique_id(ResourceType::Model, "shop", name),
            name: name.to_string(),
            package_name: "shop".to_string(),
            fqn: vec!["shop".to_string(), name.to_string()],
            ..Default::default()
        },
        NodeKind::Model(ModelAttrs::default()),
    )
}

#[test]
fn test_resource_type_round_trip_names() {
    for rt in ResourceType::ALL {
        assert_eq!(ResourceType::parse(rt.as_str()), Some(rt));
    }
    assert_eq!(ResourceType::parse("data_test"), Some(ResourceType::Test));
    assert_eq!(ResourceType::parse("widget"), None);
}

#[test]
fn test_capabilities() {
    assert!(ResourceType::Model.compilable());
    assert!(ResourceType::Model.materializable());
    assert!(!ResourceType::Seed.compilable());
    assert!(ResourceType::Seed.materializable());
    assert!(ResourceType::Test.testable());
    assert!(!ResourceType::Source.executable());
    assert!(ResourceType::Operation.executable());
}

#[test]
fn test_default_materialization_and_ephemeral() {
    let mut node = model("orders");
    assert_eq!(node.materialized(), "view");
    assert!(node.is_relational());

    node.common.config.set("materialized", json!("ephemeral"));
    assert!(node.is_ephemeral());
    assert!(!node.is_relational());
}

#[test]
fn test_node_json_shape() {
    let node = model("orders");
    let value = serde_json::to_value(&node).unwrap();
    assert_eq!(value["unique_id"], json!("model.shop.orders"));
    assert_eq!(value["kind"]["model"]["access"], json!("protected"));
}

#[test]
fn test_node_msgpack_round_trip() {
    let mut node = model("orders");
    node.common.config.set("tags", json!(["a"]));
    node.common.refs.push(RefCall::new("customers"));
    let bytes = rmp_serde::to_vec_named(&node).unwrap();
    let back: Node = rmp_serde::from_slice(&bytes).unwrap();
    assert_eq!(back.common.unique_id, node.common.unique_id);
    assert_eq!(back.common.refs, node.common.refs);
    assert_eq!(back.common.config, node.common.config);
}

#[test]
fn test_ref_call_display() {
    let call = RefCall {
        package: Some("pkg".to_string()),
        name: "dim".to_string(),
        version: Some("2".to_string()),
    };
    assert_eq!(call.to_string(), "pkg.dim (v2)");
}

#[test]
fn test_depends_on_dedupes() {
    let mut deps = DependsOn::default();
    deps.add_node("model.a.b");
    deps.add_node("model.a.b");
    deps.add_macro("macro.a.m");
    deps.add_macro("macro.a.m");
    assert_eq!(deps.nodes.len(), 1);
    assert_eq!(deps.macros.len(), 1);
}

use super::*;

fn parent_map(edges: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
    edges
        .iter()
        .map(|(child, parents)| {
            (
                child.to_string(),
                parents.iter().map(|p| p.to_string()).collect(),
            )
        })
        .collect()
}

fn set(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

fn chain() -> Graph {
    Graph::from_parent_map(&parent_map(&[
        ("raw", &[]),
        ("stg", &["raw"]),
        ("fct", &["stg"]),
        ("rpt", &["fct"]),
    ]))
    .unwrap()
}

#[test]
fn test_topological_order() {
    let graph = Graph::from_parent_map(&parent_map(&[
        ("stg_orders", &[]),
        ("fct_orders", &["stg_orders", "stg_customers"]),
        ("stg_customers", &[]),
    ]))
    .unwrap();
    let order = graph.topological_order().unwrap();
    let pos = |id: &str| order.iter().position(|m| m == id).unwrap();
    assert!(pos("fct_orders") > pos("stg_orders"));
    assert!(pos("fct_orders") > pos("stg_customers"));
}

#[test]
fn test_cycle_is_reported() {
    let err = Graph::from_parent_map(&parent_map(&[
        ("a", &["b"]),
        ("b", &["c"]),
        ("c", &["a"]),
    ]))
    .unwrap_err();
    match err {
        CoreError::CircularDependency { cycle } => assert!(cycle.contains(" -> ")),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_unknown_parents_ignored() {
    let graph = Graph::from_parent_map(&parent_map(&[("a", &["disabled_node"])])).unwrap();
    assert!(graph.parents("a").is_empty());
    assert!(!graph.contains("disabled_node"));
}

#[test]
fn test_ancestors_and_descendants() {
    let graph = chain();
    assert_eq!(graph.ancestors("fct", None), set(&["raw", "stg"]));
    assert_eq!(graph.ancestors("fct", Some(1)), set(&["stg"]));
    assert_eq!(graph.descendants("stg", None), set(&["fct", "rpt"]));
    assert_eq!(graph.descendants("stg", Some(1)), set(&["fct"]));
    assert!(graph.descendants("missing", None).is_empty());
}

#[test]
fn test_induced_parents_skip_unselected() {
    let graph = chain();
    let induced = graph.induced_parents(&set(&["raw", "fct"]));
    assert_eq!(induced["fct"], set(&["raw"]));
    assert!(induced["raw"].is_empty());
}

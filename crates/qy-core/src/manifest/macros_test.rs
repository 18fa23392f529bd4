use super::*;
use crate::checksum::FileHash;
use crate::node::DependsOn;

fn mac(package: &str, name: &str) -> Macro {
    Macro {
        unique_id: format!("macro.{}.{}", package, name),
        name: name.to_string(),
        package_name: package.to_string(),
        original_file_path: "macros/m.sql".to_string(),
        file_id: format!("{}://macros/m.sql", package),
        macro_sql: String::new(),
        arguments: Vec::new(),
        description: String::new(),
        depends_on: DependsOn::default(),
        macro_calls: Vec::new(),
        checksum: FileHash::empty(),
    }
}

fn chain() -> Vec<String> {
    vec!["duckdb".to_string(), "postgres".to_string(), "default".to_string()]
}

#[test]
fn test_package_precedence() {
    let macros = [mac("shop", "cents"), mac("utils", "cents"), mac("zeta", "only_z")];
    let resolver = MacroResolver::new(macros.iter(), "shop", chain());
    assert_eq!(resolver.find("cents", "utils"), Some("macro.utils.cents"));
    assert_eq!(resolver.find("cents", "zeta"), Some("macro.shop.cents"));
    assert_eq!(resolver.find("only_z", "shop"), Some("macro.zeta.only_z"));
    assert_eq!(resolver.find("missing", "shop"), None);
    assert_eq!(resolver.find_qualified("utils.cents", "shop"), Some("macro.utils.cents"));
}

#[test]
fn test_dispatch_walks_adapter_chain() {
    let macros = [
        mac("utils", "postgres__dateadd"),
        mac("utils", "default__dateadd"),
        mac("utils", "default__concat"),
    ];
    let resolver = MacroResolver::new(macros.iter(), "shop", chain());
    assert_eq!(
        resolver.dispatch("dateadd", Some("utils"), "shop"),
        Some("macro.utils.postgres__dateadd")
    );
    assert_eq!(
        resolver.dispatch("concat", Some("utils"), "shop"),
        Some("macro.utils.default__concat")
    );
}

#[test]
fn test_root_override_and_search_order() {
    let macros = [
        mac("shop", "default__dateadd"),
        mac("utils", "default__dateadd"),
        mac("shim", "default__dateadd"),
    ];
    let resolver = MacroResolver::new(macros.iter(), "shop", chain());
    assert_eq!(
        resolver.dispatch("dateadd", Some("utils"), "utils"),
        Some("macro.shop.default__dateadd")
    );
    let resolver = resolver.with_search_order("utils", vec!["shim".to_string(), "utils".to_string()]);
    assert_eq!(
        resolver.dispatch("dateadd", Some("utils"), "shop"),
        Some("macro.shim.default__dateadd")
    );
}

#[test]
fn test_call_dependencies() {
    let macros = [mac("shop", "money"), mac("shop", "default__money")];
    let resolver = MacroResolver::new(macros.iter(), "shop", chain());
    assert_eq!(
        resolver.call_dependencies("money", "shop"),
        vec!["macro.shop.money".to_string(), "macro.shop.default__money".to_string()]
    );
    assert!(resolver.call_dependencies("upper", "shop").is_empty());
}

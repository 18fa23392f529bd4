use super::*;
use qy_core::node::{RefCall, SourceCall};
use qy_core::{EnvSnapshot, FileHash, ReferenceResolver};
use serde_json::json;

fn mac(package: &str, name: &str, sql: &str) -> Macro {
    Macro {
        unique_id: format!("macro.{}.{}", package, name),
        name: name.to_string(),
        package_name: package.to_string(),
        original_file_path: format!("macros/{}.sql", name),
        file_id: format!("{}://macros/{}.sql", package, name),
        macro_sql: sql.to_string(),
        arguments: Vec::new(),
        description: String::new(),
        depends_on: Default::default(),
        macro_calls: Vec::new(),
        checksum: FileHash::from_contents(sql),
    }
}

fn renderer(macros: &[Macro]) -> JinjaRenderer {
    JinjaRenderer::new(macros.iter(), "shop", &TargetInfo::default())
}

fn env() -> RenderEnv {
    RenderEnv::new(TargetInfo::default(), "shop")
}

struct Fixed;

impl ReferenceResolver for Fixed {
    fn resolve_ref(&self, call: &RefCall) -> Result<Relation, String> {
        if call.name == "missing" {
            return Err("model 'missing' was not found".to_string());
        }
        Ok(Relation::new("wh", "analytics", format!("{}_resolved", call.name)))
    }

    fn resolve_source(&self, call: &SourceCall) -> Result<Relation, String> {
        Ok(Relation::new("wh", &call.source_name, &call.table_name))
    }
}

#[test]
fn test_preprocess_rewrites_do_and_return() {
    assert_eq!(
        preprocess("{%- do return(1) -%}"),
        "{{- __qy_discard(__qy_return(1)) -}}"
    );
    assert_eq!(preprocess("{{ return (x) }}"), "{{ __qy_return(x) }}");
    assert_eq!(preprocess("select returns(1)"), "select returns(1)");
    assert_eq!(preprocess("{{ obj.return(1) }}"), "{{ obj.return(1) }}");
}

#[test]
fn test_render_plain_sql() {
    let rendered = renderer(&[]).render("select 1 as id", &env()).unwrap();
    assert_eq!(rendered.text, "select 1 as id");
    assert!(rendered.refs.is_empty());
    assert_eq!(rendered.return_value, None);
}

#[test]
fn test_config_is_captured_and_readable() {
    let rendered = renderer(&[])
        .render(
            "{{ config(materialized='table', tags=['a']) }}select '{{ config.get('materialized') }}'",
            &env(),
        )
        .unwrap();
    assert_eq!(rendered.text, "select 'table'");
    assert_eq!(rendered.config.get("materialized"), Some(&json!("table")));
    assert_eq!(rendered.config.get("tags"), Some(&json!(["a"])));
}

#[test]
fn test_ref_and_source_without_resolver() {
    let rendered = renderer(&[])
        .render(
            "select * from {{ ref('orders') }} join {{ ref('dim', v=2) }} join {{ source('landing', 'raw') }}",
            &env(),
        )
        .unwrap();
    assert_eq!(
        rendered.text,
        r#"select * from "memory"."main"."orders" join "memory"."main"."dim_v2" join "memory"."landing"."raw""#
    );
    assert_eq!(rendered.refs[0], RefCall::new("orders"));
    assert_eq!(rendered.refs[1].version.as_deref(), Some("2"));
    assert_eq!(rendered.sources[0].table_name, "raw");
}

#[test]
fn test_ref_through_resolver() {
    let mut e = env();
    e.resolver = Some(Arc::new(Fixed));
    let rendered = renderer(&[])
        .render("{{ ref('shop', 'orders') }} {{ ref('orders').identifier }}", &e)
        .unwrap();
    assert_eq!(
        rendered.text,
        r#""wh"."analytics"."orders_resolved" orders_resolved"#
    );
    assert_eq!(rendered.refs[0].package.as_deref(), Some("shop"));

    let err = renderer(&[]).render("{{ ref('missing') }}", &e).unwrap_err();
    assert!(err.message.contains("model 'missing' was not found"), "{}", err.message);
}

#[test]
fn test_empty_mode_wraps_inputs() {
    let mut e = env();
    e.flags.empty = true;
    let rendered = renderer(&[]).render("{{ ref('orders') }}", &e).unwrap();
    assert_eq!(
        rendered.text,
        r#"(select * from "memory"."main"."orders" where false limit 0) _dbt_limit_subq_orders"#
    );
}

#[test]
fn test_vars_env_vars_and_flags() {
    let mut e = env();
    e.vars.insert("start".to_string(), json!("2024-01-01"));
    e.env = EnvSnapshot::from_pairs([("REGION", "eu")]);
    e.flags.is_incremental = true;
    let rendered = renderer(&[])
        .render(
            "{{ var('start') }}|{{ var('x', 'd') }}|{{ env_var('REGION') }}|{{ is_incremental() }}|{{ target.name }}|{{ target.type }}",
            &e,
        )
        .unwrap();
    assert_eq!(rendered.text, "2024-01-01|d|eu|true|dev|duckdb");

    assert!(renderer(&[]).render("{{ var('nope') }}", &env()).is_err());
}

#[test]
fn test_this_defaults_to_target() {
    let mut e = env();
    e.this = Some(Relation::new("db", "sch", "tbl"));
    let rendered = renderer(&[]).render("{{ this }}|{{ this.schema }}", &e).unwrap();
    assert_eq!(rendered.text, r#""db"."sch"."tbl"|sch"#);
}

#[test]
fn test_macro_return_value() {
    let macros = [mac("shop", "five", "{% macro five() %}{{ return(5) }}{% endmacro %}")];
    let rendered = renderer(&macros).render("{{ five() + 1 }}", &env()).unwrap();
    assert_eq!(rendered.text, "6");
    assert_eq!(rendered.return_value, None);
}

#[test]
fn test_macro_package_precedence_and_namespaces() {
    let macros = [
        mac("shop", "greet", "{% macro greet() %}root{% endmacro %}"),
        mac("pkg", "greet", "{% macro greet() %}pkg{% endmacro %}"),
        mac("pkg", "only_pkg", "{% macro only_pkg() %}{{ greet() }}!{% endmacro %}"),
    ];
    let r = renderer(&macros);
    assert_eq!(r.render("{{ greet() }}", &env()).unwrap().text, "root");
    assert_eq!(r.render("{{ pkg.greet() }}", &env()).unwrap().text, "pkg");
    assert_eq!(r.render("{{ only_pkg() }}", &env()).unwrap().text, "root!");

    let pkg_env = RenderEnv::new(TargetInfo::default(), "pkg");
    assert_eq!(r.render("{{ greet() }}", &pkg_env).unwrap().text, "pkg");
    assert!(r.has_macro("greet", "pkg"));
    assert!(r.has_macro("test_not_null", "shop"));
    assert!(!r.has_macro("nope", "shop"));
}

#[test]
fn test_ref_override_macro() {
    let macros = [mac(
        "shop",
        "ref",
        "{% macro ref(model_name) %}{% do return(builtins.ref(model_name).replace_path(identifier='seed_2')) %}{% endmacro %}",
    )];
    let rendered = renderer(&macros)
        .render("select * from {{ ref('seed_1') }}", &env())
        .unwrap();
    assert_eq!(rendered.text, r#"select * from "memory"."main"."seed_2""#);
    assert_eq!(rendered.refs, vec![RefCall::new("seed_1")]);
}

#[test]
fn test_package_cannot_override_ref() {
    let macros = [mac(
        "pkg",
        "ref",
        "{% macro ref(model_name) %}hijacked{% endmacro %}",
    )];
    let rendered = renderer(&macros).render("{{ ref('a') }}", &env()).unwrap();
    assert_eq!(rendered.text, r#""memory"."main"."a""#);
}

#[test]
fn test_adapter_dispatch() {
    let default_only = [mac(
        "shop",
        "default__concat_sql",
        "{% macro default__concat_sql() %}default{% endmacro %}",
    )];
    assert_eq!(
        renderer(&default_only)
            .render("{{ adapter.dispatch('concat_sql')() }}", &env())
            .unwrap()
            .text,
        "default"
    );

    let mut both = default_only.to_vec();
    both.push(mac(
        "shop",
        "duckdb__concat_sql",
        "{% macro duckdb__concat_sql() %}duck{% endmacro %}",
    ));
    assert_eq!(
        renderer(&both)
            .render("{{ adapter.dispatch('concat_sql')() }}", &env())
            .unwrap()
            .text,
        "duck"
    );
    assert!(renderer(&[])
        .render("{{ adapter.dispatch('concat_sql')() }}", &env())
        .is_err());
}

#[test]
fn test_call_macro_with_arguments() {
    let macros = [mac(
        "shop",
        "generate_schema_name",
        "{% macro generate_schema_name(custom_schema_name, node) %}{% if custom_schema_name %}{{ target.schema }}_{{ custom_schema_name }}{% else %}{{ target.schema }}{% endif %}{% endmacro %}",
    )];
    let r = renderer(&macros);
    let out = r
        .call_macro("generate_schema_name", &[json!("staging"), json!(null)], &env())
        .unwrap();
    assert_eq!(out.text, "main_staging");
    let out = r
        .call_macro("generate_schema_name", &[json!(null), json!(null)], &env())
        .unwrap();
    assert_eq!(out.text, "main");
    assert!(r.call_macro("nope", &[], &env()).is_err());
}

#[test]
fn test_call_macro_returning_value() {
    let macros = [mac(
        "shop",
        "pick",
        "{% macro pick(a, b) %}{% do return({'first': a, 'second': b}) %}{% endmacro %}",
    )];
    let out = renderer(&macros)
        .call_macro("pick", &[json!(1), json!("x")], &env())
        .unwrap();
    assert_eq!(out.return_value, Some(json!({"first": 1, "second": "x"})));
}

#[test]
fn test_builtin_generic_tests_render() {
    let r = renderer(&[]);
    let not_null = r
        .render("{{ test_not_null(model=ref('orders'), column_name='id') }}", &env())
        .unwrap();
    assert!(not_null
        .text
        .contains(r#"from "memory"."main"."orders""#));
    assert!(not_null.text.contains("where id is null"));

    let accepted = r
        .render(
            "{{ test_accepted_values(model=ref('orders'), column_name='status', values=['open', 'closed']) }}",
            &env(),
        )
        .unwrap();
    assert!(accepted.text.contains("not in ('open', 'closed')"), "{}", accepted.text);

    let relationships = r
        .render(
            "{{ test_relationships(model=ref('orders'), column_name='customer_id', to=ref('customers'), field='id') }}",
            &env(),
        )
        .unwrap();
    assert!(relationships.text.contains(r#"from "memory"."main"."customers""#));
    assert_eq!(relationships.refs.len(), 2);
}

#[test]
fn test_compiler_error_surfaces() {
    let err = renderer(&[])
        .render("{{ exceptions.raise_compiler_error('no good') }}", &env())
        .unwrap_err();
    assert!(err.message.contains("no good"), "{}", err.message);
    assert!(err.message.starts_with("[J001]"));
}

#[test]
fn test_secret_env_var_rejected_in_nodes() {
    let mut e = env();
    e.env = EnvSnapshot::from_pairs([("DBT_ENV_SECRET_KEY", "hunter2")]);
    e.node = Some(Arc::new(qy_core::Node::new(
        Default::default(),
        qy_core::NodeKind::Model(Default::default()),
    )));
    let err = renderer(&[])
        .render("{{ env_var('DBT_ENV_SECRET_KEY') }}", &e)
        .unwrap_err();
    assert!(err.message.contains("[J004]"), "{}", err.message);
}

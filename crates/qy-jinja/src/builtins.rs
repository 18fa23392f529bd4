//! Built-in macros
//!
//! Macros shipped with quarry under the `dbt` package so projects written
//! against dbt find them by the same names. They have the lowest precedence:
//! any project or package macro of the same name wins.

use qy_core::node::DependsOn;
use qy_core::{FileHash, Macro};

/// Package the built-in macros live in
pub const INTERNAL_PACKAGE: &str = "dbt";

const NOT_NULL: &str = r#"{% macro test_not_null(model, column_name) %}
select {{ column_name }}
from {{ model }}
where {{ column_name }} is null
{% endmacro %}"#;

const UNIQUE: &str = r#"{% macro test_unique(model, column_name) %}
select
    {{ column_name }} as unique_field,
    count(*) as n_records
from {{ model }}
where {{ column_name }} is not null
group by {{ column_name }}
having count(*) > 1
{% endmacro %}"#;

const ACCEPTED_VALUES: &str = r#"{% macro test_accepted_values(model, column_name, values, quote=true) %}
with all_values as (
    select
        {{ column_name }} as value_field,
        count(*) as n_records
    from {{ model }}
    group by {{ column_name }}
)
select *
from all_values
where value_field not in (
    {%- for value in values -%}
    {%- if quote %}'{{ value | replace("'", "''") }}'{% else %}{{ value }}{% endif %}
    {%- if not loop.last %}, {% endif -%}
    {%- endfor -%}
)
{% endmacro %}"#;

const RELATIONSHIPS: &str = r#"{% macro test_relationships(model, column_name, to, field) %}
with child as (
    select {{ column_name }} as from_field
    from {{ model }}
    where {{ column_name }} is not null
),
parent as (
    select {{ field }} as to_field
    from {{ to }}
)
select from_field
from child
left join parent on child.from_field = parent.to_field
where parent.to_field is null
{% endmacro %}"#;

/// `(name, arguments, source)` of every built-in macro
const BUILTIN_SOURCES: &[(&str, &[&str], &str)] = &[
    ("test_not_null", &["model", "column_name"], NOT_NULL),
    ("test_unique", &["model", "column_name"], UNIQUE),
    (
        "test_accepted_values",
        &["model", "column_name", "values", "quote"],
        ACCEPTED_VALUES,
    ),
    (
        "test_relationships",
        &["model", "column_name", "to", "field"],
        RELATIONSHIPS,
    ),
];

/// Names of the built-in generic tests
pub fn builtin_generic_tests() -> Vec<&'static str> {
    BUILTIN_SOURCES
        .iter()
        .filter_map(|(name, _, _)| name.strip_prefix("test_"))
        .collect()
}

/// The built-in macros as manifest macros
pub fn builtin_macros() -> Vec<Macro> {
    BUILTIN_SOURCES
        .iter()
        .map(|(name, arguments, sql)| Macro {
            unique_id: format!("macro.{}.{}", INTERNAL_PACKAGE, name),
            name: name.to_string(),
            package_name: INTERNAL_PACKAGE.to_string(),
            original_file_path: format!("macros/generic_test_sql/{}.sql", name),
            file_id: format!("{}://macros/generic_test_sql/{}.sql", INTERNAL_PACKAGE, name),
            macro_sql: sql.to_string(),
            arguments: arguments.iter().map(|a| a.to_string()).collect(),
            description: String::new(),
            depends_on: DependsOn::default(),
            macro_calls: Vec::new(),
            checksum: FileHash::from_contents(sql),
        })
        .collect()
}

#[cfg(test)]
#[path = "builtins_test.rs"]
mod tests;

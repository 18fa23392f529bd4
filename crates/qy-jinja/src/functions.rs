//! Template functions: ref(), source(), var(), env_var(), is_incremental(),
//! return(), log(), exceptions and the json/yaml helpers.

use crate::convert::{arg_to_string, json_to_value, value_to_json, yaml_to_json};
use crate::error::JinjaError;
use crate::objects::RelationObject;
use crate::scope::RenderScope;
use minijinja::value::{Kwargs, Rest, Value};
use minijinja::{Error, ErrorKind};
use qy_core::node::{RefCall, SourceCall};
use qy_core::Relation;
use std::sync::Arc;

/// Prefix of variables that must not reach rendered SQL
const SECRET_ENV_PREFIX: &str = "DBT_ENV_SECRET_";

/// Name `return(...)` is rewritten to before rendering
pub(crate) const RETURN_FN: &str = "__qy_return";

/// Name `{% do ... %}` expressions are wrapped in
pub(crate) const DISCARD_FN: &str = "__qy_discard";

fn invalid(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidOperation, message.into())
}

/// Empty mode turns every input into an empty subquery
fn finish_input(scope: &RenderScope, mut relation: Relation) -> Value {
    if scope.env.flags.empty && relation.cte_name.is_none() {
        relation.limit = Some(0);
    }
    RelationObject::value(relation)
}

/// Create the ref() function
///
/// Usage in templates:
/// ```jinja
/// {{ ref('orders') }}
/// {{ ref('shop', 'orders') }}
/// {{ ref('dim_customers', v=2) }}
/// ```
pub(crate) fn make_ref_fn(
    scope: Arc<RenderScope>,
) -> impl Fn(String, Option<String>, Kwargs) -> Result<Value, Error> + Send + Sync + 'static {
    move |first: String, second: Option<String>, kwargs: Kwargs| {
        let version = match kwargs.get::<Option<Value>>("v")? {
            Some(v) => Some(v),
            None => kwargs.get::<Option<Value>>("version")?,
        };
        kwargs.assert_all_used()?;
        let call = match second {
            Some(name) => RefCall {
                package: Some(first),
                name,
                version: version.as_ref().and_then(arg_to_string),
            },
            None => RefCall {
                package: None,
                name: first,
                version: version.as_ref().and_then(arg_to_string),
            },
        };
        scope.record_ref(call.clone());
        let relation = match &scope.env.resolver {
            Some(resolver) => resolver.resolve_ref(&call).map_err(invalid)?,
            None => {
                let identifier = match &call.version {
                    Some(v) => format!("{}_v{}", call.name, v),
                    None => call.name.clone(),
                };
                Relation::new(
                    scope.env.target.database.clone(),
                    scope.env.target.schema.clone(),
                    identifier,
                )
            }
        };
        Ok(finish_input(&scope, relation))
    }
}

/// Create the source() function
///
/// Usage in templates:
/// ```jinja
/// {{ source('landing', 'orders') }}
/// ```
pub(crate) fn make_source_fn(
    scope: Arc<RenderScope>,
) -> impl Fn(String, String) -> Result<Value, Error> + Send + Sync + 'static {
    move |source_name: String, table_name: String| {
        let call = SourceCall {
            source_name,
            table_name,
        };
        scope.record_source(call.clone());
        let relation = match &scope.env.resolver {
            Some(resolver) => resolver.resolve_source(&call).map_err(invalid)?,
            None => Relation::new(
                scope.env.target.database.clone(),
                call.source_name.clone(),
                call.table_name.clone(),
            ),
        };
        Ok(finish_input(&scope, relation))
    }
}

/// Create the var() function
///
/// Usage in templates:
/// ```jinja
/// {{ var('start_date') }}
/// {{ var('missing', 'default_value') }}
/// ```
pub(crate) fn make_var_fn(
    scope: Arc<RenderScope>,
) -> impl Fn(&str, Option<Value>) -> Result<Value, Error> + Send + Sync + 'static {
    move |name: &str, default: Option<Value>| {
        if let Some(value) = scope.env.vars.get(name) {
            Ok(json_to_value(value))
        } else if let Some(default) = default {
            Ok(default)
        } else {
            Err(JinjaError::UnknownVariable {
                name: name.to_string(),
            }
            .into())
        }
    }
}

/// Create the env_var() function. Reads the invocation's environment
/// snapshot, never the live process environment.
///
/// Usage in templates:
/// ```jinja
/// {{ env_var('WAREHOUSE_SCHEMA', 'analytics') }}
/// ```
pub(crate) fn make_env_var_fn(
    scope: Arc<RenderScope>,
) -> impl Fn(&str, Option<Value>) -> Result<Value, Error> + Send + Sync + 'static {
    move |name: &str, default: Option<Value>| {
        if name.starts_with(SECRET_ENV_PREFIX) && scope.env.node.is_some() {
            return Err(JinjaError::SecretEnvVar {
                name: name.to_string(),
            }
            .into());
        }
        if let Some(value) = scope.env.env.get(name) {
            return Ok(Value::from(value));
        }
        match default {
            Some(default) => Ok(Value::from(arg_to_string(&default).unwrap_or_default())),
            None => Err(JinjaError::MissingEnvVar {
                name: name.to_string(),
            }
            .into()),
        }
    }
}

/// Create the is_incremental() function
///
/// True when the node's relation already exists and `--full-refresh` was
/// not given.
pub(crate) fn make_is_incremental_fn(
    scope: Arc<RenderScope>,
) -> impl Fn() -> bool + Send + Sync + 'static {
    move || scope.env.flags.is_incremental && !scope.env.flags.full_refresh
}

/// Create the should_full_refresh() function. A node's `full_refresh`
/// config overrides the flag.
pub(crate) fn make_should_full_refresh_fn(
    scope: Arc<RenderScope>,
) -> impl Fn() -> bool + Send + Sync + 'static {
    move || {
        scope
            .env
            .node
            .as_ref()
            .and_then(|n| n.config().full_refresh())
            .unwrap_or(scope.env.flags.full_refresh)
    }
}

/// Create the return() function. The value becomes the result of the
/// enclosing macro call.
pub(crate) fn make_return_fn(
    scope: Arc<RenderScope>,
) -> impl Fn(Option<Value>) -> String + Send + Sync + 'static {
    move |value: Option<Value>| {
        scope.set_return(value.unwrap_or(Value::from(())));
        String::new()
    }
}

/// Evaluates its arguments for their side effects and prints nothing
pub(crate) fn make_discard_fn() -> impl Fn(Rest<Value>) -> String + Send + Sync + Clone + 'static {
    |_args: Rest<Value>| String::new()
}

/// Create the `log(msg, info=False)` function. Routed through the log
/// facade; returns an empty string.
pub(crate) fn make_log_fn() -> impl Fn(&str, Kwargs) -> Result<String, Error> + Send + Sync + Clone + 'static {
    |msg: &str, kwargs: Kwargs| {
        let info = kwargs.get::<Option<bool>>("info")?.unwrap_or(false);
        kwargs.assert_all_used()?;
        if info {
            log::info!("{}", msg);
        } else {
            log::debug!("{}", msg);
        }
        Ok(String::new())
    }
}

/// Create `exceptions.raise_compiler_error(msg)`
pub(crate) fn make_raise_compiler_error_fn(
) -> impl Fn(&str) -> Result<String, Error> + Send + Sync + Clone + 'static {
    |msg: &str| Err(invalid(format!("Compilation Error: {}", msg)))
}

/// Create `exceptions.warn(msg)`
pub(crate) fn make_warn_fn() -> impl Fn(&str) -> String + Send + Sync + Clone + 'static {
    |msg: &str| {
        log::warn!("{}", msg);
        String::new()
    }
}

/// Create the `fromjson(str)` function
pub(crate) fn make_from_json_fn(
) -> impl Fn(&str) -> Result<Value, Error> + Send + Sync + Clone + 'static {
    |s: &str| {
        let parsed: serde_json::Value = serde_json::from_str(s)
            .map_err(|e| invalid(format!("fromjson parse error: {}", e)))?;
        Ok(json_to_value(&parsed))
    }
}

/// Create the `tojson(value)` function, also registered as a filter
pub(crate) fn make_to_json_fn(
) -> impl Fn(Value) -> Result<String, Error> + Send + Sync + Clone + 'static {
    |val: Value| {
        serde_json::to_string(&value_to_json(&val))
            .map_err(|e| invalid(format!("tojson serialization error: {}", e)))
    }
}

/// Create the `fromyaml(str)` function
pub(crate) fn make_from_yaml_fn(
) -> impl Fn(&str) -> Result<Value, Error> + Send + Sync + Clone + 'static {
    |s: &str| {
        let parsed: serde_yaml::Value = serde_yaml::from_str(s)
            .map_err(|e| invalid(format!("fromyaml parse error: {}", e)))?;
        Ok(json_to_value(&yaml_to_json(&parsed)))
    }
}

/// Create the `toyaml(value)` function
pub(crate) fn make_to_yaml_fn(
) -> impl Fn(Value) -> Result<String, Error> + Send + Sync + Clone + 'static {
    |val: Value| {
        serde_yaml::to_string(&value_to_json(&val))
            .map_err(|e| invalid(format!("toyaml serialization error: {}", e)))
    }
}

#[cfg(test)]
#[path = "functions_test.rs"]
mod tests;

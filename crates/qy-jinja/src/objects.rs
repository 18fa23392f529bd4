//! Objects exposed to templates: relations, `config`, `adapter`, macro
//! callables and namespaces.

use crate::convert::{arg_to_string, json_to_value, value_to_json};
use crate::scope::RenderScope;
use minijinja::value::{from_args, Kwargs, Object, ObjectRepr, Value, ValueKind};
use minijinja::{Error, ErrorKind, State};
use qy_core::manifest::MacroResolver;
use qy_core::relation::quote_ident;
use qy_core::{Relation, RelationType};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

fn unknown_method(owner: &str, method: &str) -> Error {
    Error::new(
        ErrorKind::UnknownMethod,
        format!("{} has no method named {}", owner, method),
    )
}

/// A relation; renders as its quoted path
#[derive(Debug, Clone)]
pub struct RelationObject {
    pub relation: Relation,
}

impl RelationObject {
    pub fn value(relation: Relation) -> Value {
        Value::from_object(Self { relation })
    }

    /// The relation behind a template value, if it is one
    pub fn from_value(value: &Value) -> Option<Relation> {
        value
            .downcast_object_ref::<RelationObject>()
            .map(|r| r.relation.clone())
    }
}

impl Object for RelationObject {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let r = &self.relation;
        let opt = |s: &Option<String>| s.clone().map(Value::from).unwrap_or(Value::from(()));
        let value = match key.as_str()? {
            "database" => opt(&r.database),
            "schema" => opt(&r.schema),
            "identifier" | "name" | "table" => opt(&r.identifier),
            "type" => r
                .relation_type
                .map(|t| Value::from(t.as_str()))
                .unwrap_or(Value::from(())),
            "is_table" => Value::from(r.relation_type == Some(RelationType::Table)),
            "is_view" => Value::from(r.relation_type == Some(RelationType::View)),
            "is_cte" => Value::from(r.relation_type == Some(RelationType::Cte)),
            _ => return None,
        };
        Some(value)
    }

    fn call_method(
        self: &Arc<Self>,
        _state: &State<'_, '_>,
        method: &str,
        args: &[Value],
    ) -> Result<Value, Error> {
        match method {
            "replace_path" => {
                let (kwargs,): (Kwargs,) = from_args(args)?;
                let database: Option<String> = kwargs.get("database")?;
                let schema: Option<String> = kwargs.get("schema")?;
                let identifier: Option<String> = kwargs.get("identifier")?;
                kwargs.assert_all_used()?;
                Ok(Self::value(self.relation.replace_path(database, schema, identifier)))
            }
            "incorporate" => {
                let (kwargs,): (Kwargs,) = from_args(args)?;
                let kind: Option<String> = kwargs.get("type")?;
                kwargs.assert_all_used()?;
                let mut relation = self.relation.clone();
                if let Some(kind) = kind {
                    relation.relation_type = RelationType::parse(&kind);
                }
                Ok(Self::value(relation))
            }
            "render" => Ok(Value::from(self.relation.render())),
            _ => Err(unknown_method("relation", method)),
        }
    }

    fn render(self: &Arc<Self>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.relation.render())
    }
}

/// `config`: callable to record config, and `config.get(...)` to read it
#[derive(Debug)]
pub(crate) struct ConfigObject {
    scope: Arc<RenderScope>,
}

impl ConfigObject {
    pub fn value(scope: Arc<RenderScope>) -> Value {
        Value::from_object(Self { scope })
    }

    fn lookup(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.scope.captured_config(key) {
            return Some(json_to_value(&value));
        }
        let node = self.scope.env.node.as_ref()?;
        node.config().get(key).map(json_to_value)
    }

    fn record_map(&self, map: &Value) -> Result<(), Error> {
        for key in map.try_iter()? {
            let item = map.get_item(&key)?;
            let name = arg_to_string(&key).unwrap_or_default();
            self.scope.record_config(&name, value_to_json(&item));
        }
        Ok(())
    }
}

impl Object for ConfigObject {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        self.lookup(key.as_str()?)
    }

    fn call(self: &Arc<Self>, _state: &State<'_, '_>, args: &[Value]) -> Result<Value, Error> {
        for arg in args {
            if arg.kind() != ValueKind::Map {
                return Err(Error::new(
                    ErrorKind::InvalidOperation,
                    "config() takes keyword arguments or a mapping",
                ));
            }
            self.record_map(arg)?;
        }
        Ok(Value::from(""))
    }

    fn call_method(
        self: &Arc<Self>,
        _state: &State<'_, '_>,
        method: &str,
        args: &[Value],
    ) -> Result<Value, Error> {
        match method {
            "get" => {
                let (key, default): (String, Option<Value>) = from_args(args)?;
                Ok(self
                    .lookup(&key)
                    .filter(|v| !v.is_none())
                    .or(default)
                    .unwrap_or(Value::from(())))
            }
            "require" => {
                let (key,): (String,) = from_args(args)?;
                self.lookup(&key).filter(|v| !v.is_none()).ok_or_else(|| {
                    Error::new(
                        ErrorKind::InvalidOperation,
                        format!("missing config: \"{}\"", key),
                    )
                })
            }
            "set" => {
                let (key, value): (String, Value) = from_args(args)?;
                self.scope.record_config(&key, value_to_json(&value));
                Ok(Value::from(""))
            }
            _ => Err(unknown_method("config", method)),
        }
    }

    fn render(self: &Arc<Self>, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Ok(())
    }
}

/// What calling a macro produced
pub(crate) enum MacroOutcome {
    Output(Value),
    Returned(Value),
}

impl MacroOutcome {
    pub fn into_value(self) -> Value {
        match self {
            MacroOutcome::Output(v) | MacroOutcome::Returned(v) => v,
        }
    }
}

/// Name of a macro from its unique id (`macro.<package>.<name>`)
pub(crate) fn macro_name(unique_id: &str) -> &str {
    unique_id.splitn(3, '.').nth(2).unwrap_or(unique_id)
}

/// Load the macro's template and call it in its own return frame
pub(crate) fn run_macro(
    state: &State<'_, '_>,
    scope: &RenderScope,
    unique_id: &str,
    args: &[Value],
) -> Result<MacroOutcome, Error> {
    let name = macro_name(unique_id);
    let template = state.env().get_template(unique_id)?;
    let module = template.eval_to_state(())?;
    let callable = module.lookup(name).ok_or_else(|| {
        Error::new(
            ErrorKind::UnknownFunction,
            format!("macro '{}' is not defined in {}", name, unique_id),
        )
    })?;
    scope.push_frame();
    let output = callable.call(&module, args);
    let returned = scope.pop_frame();
    let output = output?;
    Ok(match returned {
        Some(value) => MacroOutcome::Returned(value),
        None => MacroOutcome::Output(output),
    })
}

/// A project or package macro, callable from templates
#[derive(Debug)]
pub(crate) struct MacroFn {
    unique_id: String,
    scope: Arc<RenderScope>,
}

impl MacroFn {
    pub fn value(unique_id: &str, scope: Arc<RenderScope>) -> Value {
        Value::from_object(Self {
            unique_id: unique_id.to_string(),
            scope,
        })
    }
}

impl Object for MacroFn {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn call(self: &Arc<Self>, state: &State<'_, '_>, args: &[Value]) -> Result<Value, Error> {
        run_macro(state, &self.scope, &self.unique_id, args).map(MacroOutcome::into_value)
    }

    fn render(self: &Arc<Self>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<macro {}>", self.unique_id)
    }
}

/// Named members reachable as `ns.member(...)`: `builtins`, `exceptions`
/// and one namespace per package
#[derive(Debug)]
pub(crate) struct Namespace {
    name: String,
    members: BTreeMap<String, Value>,
}

impl Namespace {
    pub fn value<I, K>(name: &str, members: I) -> Value
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Value::from_object(Self {
            name: name.to_string(),
            members: members.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        })
    }
}

impl Object for Namespace {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        self.members.get(key.as_str()?).cloned()
    }

    fn call_method(
        self: &Arc<Self>,
        state: &State<'_, '_>,
        method: &str,
        args: &[Value],
    ) -> Result<Value, Error> {
        match self.members.get(method) {
            Some(member) => member.call(state, args),
            None => Err(unknown_method(&self.name, method)),
        }
    }

    fn render(self: &Arc<Self>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<namespace {}>", self.name)
    }
}

/// `adapter`: macro dispatch and quoting for the active adapter
#[derive(Debug)]
pub(crate) struct AdapterObject {
    scope: Arc<RenderScope>,
    resolver: Arc<MacroResolver>,
}

impl AdapterObject {
    pub fn value(scope: Arc<RenderScope>, resolver: Arc<MacroResolver>) -> Value {
        Value::from_object(Self { scope, resolver })
    }
}

impl Object for AdapterObject {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        match key.as_str()? {
            "type" => Some(Value::from(self.scope.env.target.adapter_type.clone())),
            _ => None,
        }
    }

    fn call_method(
        self: &Arc<Self>,
        _state: &State<'_, '_>,
        method: &str,
        args: &[Value],
    ) -> Result<Value, Error> {
        match method {
            "dispatch" => {
                let (name, namespace, kwargs): (String, Option<String>, Kwargs) = from_args(args)?;
                let namespace = match namespace {
                    Some(ns) => Some(ns),
                    None => kwargs.get::<Option<String>>("macro_namespace")?,
                };
                kwargs.assert_all_used()?;
                let found = self
                    .resolver
                    .dispatch(&name, namespace.as_deref(), &self.scope.env.package)
                    .ok_or_else(|| {
                        Error::new(
                            ErrorKind::UnknownFunction,
                            format!(
                                "no implementation of '{}' found for adapter '{}'",
                                name, self.scope.env.target.adapter_type
                            ),
                        )
                    })?;
                Ok(MacroFn::value(found, self.scope.clone()))
            }
            "quote" => {
                let (ident,): (String,) = from_args(args)?;
                Ok(Value::from(quote_ident(&ident)))
            }
            "type" => Ok(Value::from(self.scope.env.target.adapter_type.clone())),
            _ => Err(unknown_method("adapter", method)),
        }
    }

    fn render(self: &Arc<Self>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<adapter {}>", self.scope.env.target.adapter_type)
    }
}

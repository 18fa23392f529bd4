//! Schema YAML parser.
//!
//! A schema file never defines SQL-bodied nodes. It patches nodes defined in
//! other files (models, seeds, snapshots, analyses, singular tests,
//! functions, macros) and defines nodes that only exist in YAML: sources,
//! generic tests, unit tests, exposures, metrics, semantic models, saved
//! queries and groups.

use super::generic_test::{build_test_node, TestDefinition, TestTarget};
use super::yaml;
use super::{jinja_static, MacroPatch, ParseOutput, ParsedNode, Patch, VersionPatch};
use crate::checksum::FileHash;
use crate::loader::SourceFile;
use crate::node::{
    unique_id, ColumnInfo, ExposureAttrs, FunctionArg, FunctionAttrs, Group, MetricAttrs, Node,
    NodeCommon, NodeKind, ResourceType, SavedQueryAttrs, SemanticModelAttrs, SourceAttrs,
    UnitTestAttrs, UnitTestInput,
};
use crate::serde_helpers::scalar_to_string;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const TOP_LEVEL_KEYS: &[&str] = &[
    "version",
    "models",
    "sources",
    "seeds",
    "snapshots",
    "analyses",
    "exposures",
    "metrics",
    "semantic_models",
    "saved_queries",
    "unit_tests",
    "data_tests",
    "functions",
    "groups",
    "macros",
];

/// Config keys understood by some resource type
const CONFIG_KEYS: &[&str] = &[
    "enabled",
    "materialized",
    "tags",
    "meta",
    "docs",
    "persist_docs",
    "schema",
    "database",
    "alias",
    "pre_hook",
    "post_hook",
    "quoting",
    "column_types",
    "full_refresh",
    "unique_key",
    "on_schema_change",
    "on_configuration_change",
    "grants",
    "packages",
    "contract",
    "event_time",
    "incremental_strategy",
    "batch_size",
    "begin",
    "lookback",
    "concurrent_batches",
    "group",
    "access",
    "strategy",
    "updated_at",
    "check_cols",
    "snapshot_meta_column_names",
    "hard_deletes",
    "invalidate_hard_deletes",
    "target_schema",
    "target_database",
    "dbt_valid_to_current",
    "severity",
    "warn_if",
    "error_if",
    "store_failures",
    "store_failures_as",
    "where",
    "limit",
    "fail_calc",
    "delimiter",
    "quote_columns",
    "loaded_at_field",
    "freshness",
    "sql_header",
    "transient",
    "indexes",
    "label",
    "type",
    "maturity",
    "url",
    "cache",
    "export_as",
    "docs_url",
    "incremental_predicates",
    "merge_update_columns",
    "merge_exclude_columns",
    "sort",
    "dist",
    "cluster_by",
    "partition_by",
    "omit_default_schema",
];

/// Parse one schema file
pub fn parse_schema(file: &SourceFile) -> Result<ParseOutput, String> {
    let (value, includes) = yaml::load_tracked(&file.contents, &file.absolute_path())?;
    let mut parser = SchemaParser {
        file,
        out: ParseOutput::new(&file.file_id),
    };
    parser.out.includes = includes;
    let doc = match value {
        Value::Null => return Ok(parser.out),
        Value::Object(doc) => doc,
        other => return Err(format!("schema file must be a mapping, got {}", kind_name(&other))),
    };

    for key in doc.keys() {
        if !TOP_LEVEL_KEYS.contains(&key.as_str()) {
            parser.deprecation(
                "custom-top-level-key-deprecation",
                format!("Unexpected top-level key '{}' in {}", key, file.original_file_path),
            );
        }
    }

    for (section, resource_type) in [
        ("models", ResourceType::Model),
        ("seeds", ResourceType::Seed),
        ("snapshots", ResourceType::Snapshot),
        ("analyses", ResourceType::Analysis),
        ("data_tests", ResourceType::Test),
        ("functions", ResourceType::Function),
    ] {
        for entry in list(&doc, section)? {
            parser.patch(section, resource_type, entry)?;
        }
    }
    for entry in list(&doc, "sources")? {
        parser.source(entry)?;
    }
    for entry in list(&doc, "unit_tests")? {
        parser.unit_test(entry)?;
    }
    for entry in list(&doc, "exposures")? {
        parser.exposure(entry)?;
    }
    for entry in list(&doc, "metrics")? {
        parser.metric(entry)?;
    }
    for entry in list(&doc, "semantic_models")? {
        parser.semantic_model(entry)?;
    }
    for entry in list(&doc, "saved_queries")? {
        parser.saved_query(entry)?;
    }
    for entry in list(&doc, "groups")? {
        parser.group(entry)?;
    }
    for entry in list(&doc, "macros")? {
        parser.macro_patch(entry)?;
    }
    Ok(parser.out)
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

fn list<'a>(doc: &'a Map<String, Value>, key: &str) -> Result<&'a [Value], String> {
    match doc.get(key) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(format!("'{}' must be a list, got {}", key, kind_name(other))),
    }
}

fn object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>, String> {
    value
        .as_object()
        .ok_or_else(|| format!("{} entry must be a mapping, got {}", what, kind_name(value)))
}

fn text(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(scalar_to_string)
}

fn name_of(map: &Map<String, Value>, what: &str) -> Result<String, String> {
    text(map, "name").ok_or_else(|| format!("{} entry is missing a 'name'", what))
}

fn unrendered(config: &BTreeMap<String, Value>) -> BTreeMap<String, String> {
    config
        .iter()
        .map(|(k, v)| (k.clone(), scalar_to_string(v).unwrap_or_else(|| v.to_string())))
        .collect()
}

/// Checksum of a YAML-defined entry
fn entry_checksum(entry: &Value) -> FileHash {
    FileHash::from_contents(&entry.to_string())
}

struct SchemaParser<'a> {
    file: &'a SourceFile,
    out: ParseOutput,
}

impl SchemaParser<'_> {
    fn deprecation(&mut self, key: &str, message: String) {
        self.out.deprecations.push((key.to_string(), message));
    }

    fn fqn(&self, tail: &[&str]) -> Vec<String> {
        let mut fqn = vec![self.file.package_name.clone()];
        fqn.extend(self.file.folders());
        fqn.extend(tail.iter().map(|s| s.to_string()));
        fqn
    }

    fn common(&self, resource_type: ResourceType, id_name: &str, name: &str, fqn: Vec<String>) -> NodeCommon {
        NodeCommon {
            unique_id: unique_id(resource_type, &self.file.package_name, id_name),
            name: name.to_string(),
            package_name: self.file.package_name.clone(),
            path: self.file.path.clone(),
            original_file_path: self.file.original_file_path.clone(),
            file_id: self.file.file_id.clone(),
            fqn,
            ..Default::default()
        }
    }

    /// `config:` of an entry; unknown keys are kept but reported
    fn config(&mut self, map: &Map<String, Value>, owner: &str) -> Result<BTreeMap<String, Value>, String> {
        let config = match map.get("config") {
            None | Some(Value::Null) => return Ok(BTreeMap::new()),
            Some(Value::Object(config)) => config,
            Some(other) => {
                return Err(format!(
                    "config of '{}' must be a mapping, got {}",
                    owner,
                    kind_name(other)
                ))
            }
        };
        let mut out = BTreeMap::new();
        for (key, value) in config {
            let key = crate::config_layer::normalize_key(key);
            if !CONFIG_KEYS.contains(&key.as_str()) {
                self.deprecation(
                    "custom-key-in-config-deprecation",
                    format!(
                        "Custom key '{}' found in config of '{}' in {}",
                        key, owner, self.file.original_file_path
                    ),
                );
            }
            out.insert(key, value.clone());
        }
        Ok(out)
    }

    fn columns(&self, map: &Map<String, Value>, owner: &str) -> Result<Vec<(ColumnInfo, Vec<Value>)>, String> {
        let mut columns = Vec::new();
        let items = match map.get("columns") {
            None | Some(Value::Null) => return Ok(columns),
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(format!(
                    "columns of '{}' must be a list, got {}",
                    owner,
                    kind_name(other)
                ))
            }
        };
        for item in items {
            let col = object(item, "column")?;
            let name = name_of(col, "column")?;
            let mut info = ColumnInfo {
                name,
                description: text(col, "description").unwrap_or_default(),
                data_type: text(col, "data_type"),
                quote: col.get("quote").and_then(Value::as_bool),
                ..Default::default()
            };
            if let Some(Value::Array(constraints)) = col.get("constraints") {
                info.constraints = constraints.clone();
            }
            if let Some(Value::Object(meta)) = col.get("meta") {
                info.meta = meta.clone().into_iter().collect();
            }
            if let Some(Value::Array(tags)) = col.get("tags") {
                info.tags = tags.iter().filter_map(scalar_to_string).collect();
            }
            columns.push((info, tests_of(col)));
        }
        Ok(columns)
    }

    fn add_tests(
        &mut self,
        tests: &[Value],
        target: &TestTarget,
        column: Option<&str>,
    ) -> Result<(), String> {
        for test in tests {
            let call = TestDefinition::from_value(test)?.resolve()?;
            let node = build_test_node(self.file, &call, target, column);
            self.out.nodes.push(node);
        }
        Ok(())
    }

    /// Properties of a node defined in another file
    fn patch(&mut self, section: &str, resource_type: ResourceType, entry: &Value) -> Result<(), String> {
        let map = object(entry, section)?;
        let name = name_of(map, section)?;
        let config = self.config(map, &name)?;
        let columns = self.columns(map, &name)?;
        let model_tests = tests_of(map);

        let mut patch = Patch {
            resource_type: Some(resource_type),
            package_name: self.file.package_name.clone(),
            name: name.clone(),
            file_id: self.file.file_id.clone(),
            original_file_path: self.file.original_file_path.clone(),
            description: text(map, "description").unwrap_or_default(),
            columns: columns.iter().map(|(c, _)| (c.name.clone(), c.clone())).collect(),
            unrendered_config: unrendered(&config),
            config,
            access: text(map, "access"),
            deprecation_date: text(map, "deprecation_date"),
            latest_version: text(map, "latest_version"),
            required: map.get("required").and_then(Value::as_bool).unwrap_or(false),
            ..Default::default()
        };
        if let Some(Value::Array(constraints)) = map.get("constraints") {
            patch.constraints = constraints.clone();
        }
        if resource_type == ResourceType::Function {
            patch.function = Some(function_attrs(map));
        }

        let versions = match map.get("versions") {
            Some(Value::Array(versions)) if resource_type == ResourceType::Model => versions.as_slice(),
            _ => &[],
        };
        if versions.is_empty() {
            if !matches!(
                resource_type,
                ResourceType::Model | ResourceType::Seed | ResourceType::Snapshot
            ) {
                self.out.patches.push(patch);
                return Ok(());
            }
            let target = TestTarget::Ref {
                name: name.clone(),
                version: None,
            };
            self.add_tests(&model_tests, &target, None)?;
            for (column, tests) in &columns {
                self.add_tests(tests, &target, Some(&column.name))?;
            }
            self.out.patches.push(patch);
            return Ok(());
        }

        for version in versions {
            let vmap = object(version, "version")?;
            let v = text(vmap, "v").ok_or_else(|| format!("a version of '{}' is missing 'v'", name))?;
            let vconfig = self.config(vmap, &name)?;
            let target = TestTarget::Ref {
                name: name.clone(),
                version: Some(v.clone()),
            };
            self.add_tests(&model_tests, &target, None)?;
            self.add_tests(&tests_of(vmap), &target, None)?;

            let mut vcolumns = BTreeMap::new();
            let mut include_all = true;
            let mut include: Vec<String> = Vec::new();
            let mut exclude: Vec<String> = Vec::new();
            let mut own_columns = Vec::new();
            if let Some(Value::Array(items)) = vmap.get("columns") {
                for item in items {
                    match item.as_object() {
                        Some(col) if col.contains_key("include") => {
                            match col.get("include") {
                                Some(Value::Array(names)) => {
                                    include_all = false;
                                    include = names.iter().filter_map(scalar_to_string).collect();
                                }
                                Some(Value::String(s)) if s == "*" || s == "all" => include_all = true,
                                _ => {}
                            }
                            if let Some(Value::Array(names)) = col.get("exclude") {
                                exclude = names.iter().filter_map(scalar_to_string).collect();
                            }
                        }
                        Some(_) => own_columns.push(item.clone()),
                        None => return Err(format!("column of '{}' v{} must be a mapping", name, v)),
                    }
                }
            }
            for (column, tests) in &columns {
                let included = (include_all || include.contains(&column.name))
                    && !exclude.contains(&column.name);
                if included {
                    vcolumns.insert(column.name.clone(), column.clone());
                    self.add_tests(tests, &target, Some(&column.name))?;
                }
            }
            let mut own = Map::new();
            own.insert("columns".to_string(), Value::Array(own_columns));
            for (column, tests) in self.columns(&own, &name)? {
                self.add_tests(&tests, &target, Some(&column.name))?;
                vcolumns.insert(column.name.clone(), column);
            }

            patch.versions.push(VersionPatch {
                v,
                defined_in: text(vmap, "defined_in"),
                description: text(vmap, "description"),
                config: vconfig,
                columns: vcolumns,
            });
        }
        self.out.patches.push(patch);
        Ok(())
    }

    fn source(&mut self, entry: &Value) -> Result<(), String> {
        let map = object(entry, "source")?;
        let source_name = name_of(map, "source")?;
        let source_config = self.config(map, &source_name)?;
        let tables = match map.get("tables") {
            None | Some(Value::Null) => &[][..],
            Some(Value::Array(tables)) => tables.as_slice(),
            Some(other) => {
                return Err(format!(
                    "tables of source '{}' must be a list, got {}",
                    source_name,
                    kind_name(other)
                ))
            }
        };
        for table in tables {
            let tmap = object(table, "source table")?;
            let table_name = name_of(tmap, "source table")?;
            let mut config = source_config.clone();
            config.extend(self.config(tmap, &table_name)?);
            let columns = self.columns(tmap, &table_name)?;

            let id_name = format!("{}.{}", source_name, table_name);
            let fqn = self.fqn(&[&source_name, &table_name]);
            let mut common = self.common(ResourceType::Source, &id_name, &table_name, fqn);
            common.description = text(tmap, "description").unwrap_or_default();
            common.columns = columns.iter().map(|(c, _)| (c.name.clone(), c.clone())).collect();
            common.unrendered_config = unrendered(&config);
            common.checksum = FileHash::from_contents(&format!("{}{}", entry, table));
            common.database = text(tmap, "database").or_else(|| text(map, "database"));
            common.schema = Some(
                text(tmap, "schema")
                    .or_else(|| text(map, "schema"))
                    .unwrap_or_else(|| source_name.clone()),
            );
            let identifier = text(tmap, "identifier").unwrap_or_else(|| table_name.clone());
            common.alias = Some(identifier.clone());

            let freshness = if tmap.contains_key("freshness") {
                tmap.get("freshness").cloned().filter(|f| !f.is_null())
            } else {
                map.get("freshness").cloned().filter(|f| !f.is_null())
            };
            let attrs = SourceAttrs {
                source_name: source_name.clone(),
                identifier,
                source_description: text(map, "description").unwrap_or_default(),
                loader: text(map, "loader"),
                loaded_at_field: text(tmap, "loaded_at_field").or_else(|| text(map, "loaded_at_field")),
                freshness,
            };
            self.out.nodes.push(ParsedNode {
                node: Node::new(common, NodeKind::Source(attrs)),
                inline_config: BTreeMap::new(),
                yaml_config: config,
            });

            let target = TestTarget::Source {
                source_name: source_name.clone(),
                table_name: table_name.clone(),
            };
            self.add_tests(&tests_of(tmap), &target, None)?;
            for (column, tests) in &columns {
                self.add_tests(tests, &target, Some(&column.name))?;
            }
        }
        Ok(())
    }

    fn unit_test(&mut self, entry: &Value) -> Result<(), String> {
        let map = object(entry, "unit test")?;
        let name = name_of(map, "unit test")?;
        let model = text(map, "model").ok_or_else(|| format!("unit test '{}' is missing 'model'", name))?;
        let config = self.config(map, &name)?;

        let mut given = Vec::new();
        if let Some(Value::Array(inputs)) = map.get("given") {
            for input in inputs {
                let imap = object(input, "unit test input")?;
                let source = text(imap, "input")
                    .ok_or_else(|| format!("an input of unit test '{}' is missing 'input'", name))?;
                given.push(UnitTestInput {
                    input: source,
                    rows: fixture_rows(imap, &name)?,
                });
            }
        }
        let expect = match map.get("expect") {
            Some(Value::Object(expect)) => fixture_rows(expect, &name)?,
            _ => return Err(format!("unit test '{}' is missing 'expect'", name)),
        };

        let id_name = format!("{}.{}", model, name);
        let fqn = self.fqn(&[&model, &name]);
        let mut common = self.common(ResourceType::UnitTest, &id_name, &name, fqn);
        common.description = text(map, "description").unwrap_or_default();
        common.refs = vec![crate::node::RefCall {
            package: None,
            name: model.clone(),
            version: text(map, "version"),
        }];
        common.unrendered_config = unrendered(&config);
        common.checksum = entry_checksum(entry);
        self.out.nodes.push(ParsedNode {
            node: Node::new(common, NodeKind::UnitTest(UnitTestAttrs { model, given, expect })),
            inline_config: BTreeMap::new(),
            yaml_config: config,
        });
        Ok(())
    }

    fn exposure(&mut self, entry: &Value) -> Result<(), String> {
        let map = object(entry, "exposure")?;
        let name = name_of(map, "exposure")?;
        let config = self.config(map, &name)?;
        let exposure_type = text(map, "type").ok_or_else(|| format!("exposure '{}' is missing 'type'", name))?;
        let fqn = self.fqn(&[&name]);
        let mut common = self.common(ResourceType::Exposure, &name, &name, fqn);
        common.description = text(map, "description").unwrap_or_default();
        common.checksum = entry_checksum(entry);
        common.unrendered_config = unrendered(&config);
        if let Some(Value::Array(deps)) = map.get("depends_on") {
            let joined: Vec<String> = deps
                .iter()
                .filter_map(scalar_to_string)
                .map(|d| format!("{{{{ {} }}}}", d))
                .collect();
            let calls = jinja_static::scan(&joined.join("\n"));
            common.refs = calls.refs;
            common.sources = calls.sources;
            common.metrics = calls.metrics;
        }
        let attrs = ExposureAttrs {
            exposure_type,
            owner: map.get("owner").cloned().unwrap_or(Value::Null),
            url: text(map, "url"),
            maturity: text(map, "maturity"),
        };
        self.out.nodes.push(ParsedNode {
            node: Node::new(common, NodeKind::Exposure(attrs)),
            inline_config: BTreeMap::new(),
            yaml_config: config,
        });
        Ok(())
    }

    fn metric(&mut self, entry: &Value) -> Result<(), String> {
        let map = object(entry, "metric")?;
        let name = name_of(map, "metric")?;
        let config = self.config(map, &name)?;
        let metric_type = text(map, "type").ok_or_else(|| format!("metric '{}' is missing 'type'", name))?;
        let type_params = map.get("type_params").cloned().unwrap_or(Value::Null);
        let fqn = self.fqn(&[&name]);
        let mut common = self.common(ResourceType::Metric, &name, &name, fqn);
        common.description = text(map, "description").unwrap_or_default();
        common.checksum = entry_checksum(entry);
        common.unrendered_config = unrendered(&config);
        common.metrics = metric_inputs(&type_params)
            .into_iter()
            .map(|m| vec![m])
            .collect();
        let attrs = MetricAttrs {
            label: text(map, "label").unwrap_or_default(),
            metric_type,
            type_params,
        };
        self.out.nodes.push(ParsedNode {
            node: Node::new(common, NodeKind::Metric(attrs)),
            inline_config: BTreeMap::new(),
            yaml_config: config,
        });
        Ok(())
    }

    fn semantic_model(&mut self, entry: &Value) -> Result<(), String> {
        let map = object(entry, "semantic model")?;
        let name = name_of(map, "semantic model")?;
        let config = self.config(map, &name)?;
        let model = text(map, "model").ok_or_else(|| format!("semantic model '{}' is missing 'model'", name))?;
        let fqn = self.fqn(&[&name]);
        let mut common = self.common(ResourceType::SemanticModel, &name, &name, fqn);
        common.description = text(map, "description").unwrap_or_default();
        common.checksum = entry_checksum(entry);
        common.unrendered_config = unrendered(&config);
        let calls = jinja_static::scan(&format!("{{{{ {} }}}}", model));
        common.refs = calls.refs;
        let attrs = SemanticModelAttrs {
            model,
            entities: map.get("entities").cloned().unwrap_or(Value::Null),
            measures: map.get("measures").cloned().unwrap_or(Value::Null),
            dimensions: map.get("dimensions").cloned().unwrap_or(Value::Null),
        };
        self.out.nodes.push(ParsedNode {
            node: Node::new(common, NodeKind::SemanticModel(attrs)),
            inline_config: BTreeMap::new(),
            yaml_config: config,
        });
        Ok(())
    }

    fn saved_query(&mut self, entry: &Value) -> Result<(), String> {
        let map = object(entry, "saved query")?;
        let name = name_of(map, "saved query")?;
        let config = self.config(map, &name)?;
        let query_params = map.get("query_params").cloned().unwrap_or(Value::Null);
        let fqn = self.fqn(&[&name]);
        let mut common = self.common(ResourceType::SavedQuery, &name, &name, fqn);
        common.description = text(map, "description").unwrap_or_default();
        common.checksum = entry_checksum(entry);
        common.unrendered_config = unrendered(&config);
        if let Some(Value::Array(metrics)) = query_params.get("metrics") {
            common.metrics = metrics
                .iter()
                .filter_map(scalar_to_string)
                .map(|m| vec![m])
                .collect();
        }
        let attrs = SavedQueryAttrs {
            query_params,
            exports: map.get("exports").cloned().unwrap_or(Value::Null),
        };
        self.out.nodes.push(ParsedNode {
            node: Node::new(common, NodeKind::SavedQuery(attrs)),
            inline_config: BTreeMap::new(),
            yaml_config: config,
        });
        Ok(())
    }

    fn group(&mut self, entry: &Value) -> Result<(), String> {
        let map = object(entry, "group")?;
        let name = name_of(map, "group")?;
        self.out.groups.push(Group {
            unique_id: unique_id(ResourceType::Group, &self.file.package_name, &name),
            name,
            package_name: self.file.package_name.clone(),
            original_file_path: self.file.original_file_path.clone(),
            file_id: self.file.file_id.clone(),
            owner: map.get("owner").cloned().unwrap_or(Value::Null),
        });
        Ok(())
    }

    fn macro_patch(&mut self, entry: &Value) -> Result<(), String> {
        let map = object(entry, "macro")?;
        let name = name_of(map, "macro")?;
        let arguments = match map.get("arguments") {
            Some(Value::Array(args)) => args
                .iter()
                .filter_map(|a| a.as_object().and_then(|a| text(a, "name")))
                .collect(),
            _ => Vec::new(),
        };
        self.out.macro_patches.push(MacroPatch {
            package_name: self.file.package_name.clone(),
            name,
            description: text(map, "description").unwrap_or_default(),
            arguments,
        });
        Ok(())
    }
}

/// `data_tests:` and the older `tests:` of an entry
fn tests_of(map: &Map<String, Value>) -> Vec<Value> {
    ["data_tests", "tests"]
        .iter()
        .filter_map(|k| map.get(*k))
        .filter_map(Value::as_array)
        .flatten()
        .cloned()
        .collect()
}

fn function_attrs(map: &Map<String, Value>) -> FunctionAttrs {
    let arguments = match map.get("arguments") {
        Some(Value::Array(args)) => args
            .iter()
            .filter_map(Value::as_object)
            .filter_map(|a| {
                Some(FunctionArg {
                    name: text(a, "name")?,
                    data_type: text(a, "data_type").unwrap_or_default(),
                })
            })
            .collect(),
        _ => Vec::new(),
    };
    let returns = map
        .get("returns")
        .and_then(|r| match r {
            Value::Object(r) => text(r, "data_type"),
            other => scalar_to_string(other),
        });
    FunctionAttrs { arguments, returns }
}

/// Names of metrics a metric is computed from
fn metric_inputs(type_params: &Value) -> Vec<String> {
    fn name(value: &Value) -> Option<String> {
        match value {
            Value::Object(map) => text(map, "name"),
            other => scalar_to_string(other),
        }
    }
    let mut out = Vec::new();
    if let Some(Value::Array(metrics)) = type_params.get("metrics") {
        out.extend(metrics.iter().filter_map(name));
    }
    for key in ["numerator", "denominator"] {
        if let Some(value) = type_params.get(key) {
            out.extend(name(value));
        }
    }
    out
}

/// Rows of a unit test fixture, as dicts or as inline CSV
fn fixture_rows(map: &Map<String, Value>, test: &str) -> Result<Vec<BTreeMap<String, Value>>, String> {
    let format = text(map, "format").unwrap_or_else(|| "dict".to_string());
    match (format.as_str(), map.get("rows")) {
        (_, None) | (_, Some(Value::Null)) => Ok(Vec::new()),
        ("dict", Some(Value::Array(rows))) => rows
            .iter()
            .map(|row| match row {
                Value::Object(row) => Ok(row.clone().into_iter().collect()),
                _ => Err(format!("rows of unit test '{}' must be mappings", test)),
            })
            .collect(),
        ("csv", Some(Value::String(csv))) => Ok(csv_rows(csv)),
        (format, _) => Err(format!(
            "unit test '{}' has unsupported fixture format '{}'",
            test, format
        )),
    }
}

fn csv_rows(csv: &str) -> Vec<BTreeMap<String, Value>> {
    let mut lines = csv.lines().map(str::trim).filter(|l| !l.is_empty());
    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let columns: Vec<&str> = header.split(',').map(str::trim).collect();
    lines
        .map(|line| {
            columns
                .iter()
                .zip(line.split(',').map(str::trim))
                .map(|(c, v)| (c.to_string(), csv_value(v)))
                .collect()
        })
        .collect()
}

fn csv_value(raw: &str) -> Value {
    if raw.is_empty() || raw.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::from(f);
    }
    Value::String(raw.to_string())
}

#[cfg(test)]
#[path = "schema_test.rs"]
mod tests;

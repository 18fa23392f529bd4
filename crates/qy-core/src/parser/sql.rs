//! Parsers for SQL-bodied resources, macros, docs blocks and project hooks.

use super::blocks::{self, BlockKind};
use super::jinja_static::{self, StaticCalls};
use super::{ParseOutput, ParsedNode};
use crate::checksum::FileHash;
use crate::config::ProjectConfig;
use crate::loader::SourceFile;
use crate::node::{
    unique_id, DependsOn, Documentation, FunctionAttrs, Macro, ModelAttrs, Node, NodeCommon,
    NodeKind, OperationAttrs, ResourceType, SeedAttrs, TestAttrs,
};
use std::path::Path;

/// Common attributes for a node defined by a whole file
fn file_node(file: &SourceFile, resource_type: ResourceType, name: &str, raw_code: &str) -> NodeCommon {
    let mut fqn = vec![file.package_name.clone()];
    fqn.extend(file.folders());
    fqn.push(name.to_string());
    NodeCommon {
        unique_id: unique_id(resource_type, &file.package_name, name),
        name: name.to_string(),
        package_name: file.package_name.clone(),
        path: file.path.clone(),
        original_file_path: file.original_file_path.clone(),
        file_id: file.file_id.clone(),
        fqn,
        raw_code: raw_code.to_string(),
        checksum: file.checksum.clone(),
        ..Default::default()
    }
}

/// Copy static call sites onto a node; returns the inline config
fn apply_calls(
    common: &mut NodeCommon,
    calls: &StaticCalls,
) -> std::collections::BTreeMap<String, serde_json::Value> {
    common.refs = calls.refs.clone();
    common.sources = calls.sources.clone();
    common.metrics = calls.metrics.clone();
    common.macro_calls = calls.macro_calls.clone();
    common.vars = calls.vars.clone();
    common.env_vars = calls.env_vars.clone();
    let (values, unrendered) = calls.merged_config();
    common.unrendered_config = unrendered;
    values
}

fn templated_node(file: &SourceFile, resource_type: ResourceType, kind: NodeKind) -> ParseOutput {
    let name = file.stem().to_string();
    let mut common = file_node(file, resource_type, &name, &file.contents);
    let calls = jinja_static::scan(&file.contents);
    let inline_config = apply_calls(&mut common, &calls);
    let mut out = ParseOutput::new(&file.file_id);
    out.nodes.push(ParsedNode {
        node: Node::new(common, kind),
        inline_config,
        yaml_config: Default::default(),
    });
    out
}

pub fn parse_model(file: &SourceFile) -> ParseOutput {
    templated_node(file, ResourceType::Model, NodeKind::Model(ModelAttrs::default()))
}

pub fn parse_analysis(file: &SourceFile) -> ParseOutput {
    templated_node(file, ResourceType::Analysis, NodeKind::Analysis)
}

pub fn parse_singular_test(file: &SourceFile) -> ParseOutput {
    templated_node(file, ResourceType::Test, NodeKind::Test(TestAttrs::default()))
}

pub fn parse_function(file: &SourceFile) -> ParseOutput {
    templated_node(
        file,
        ResourceType::Function,
        NodeKind::Function(FunctionAttrs::default()),
    )
}

pub fn parse_seed(file: &SourceFile) -> ParseOutput {
    let name = file.stem().to_string();
    let common = file_node(file, ResourceType::Seed, &name, "");
    let mut out = ParseOutput::new(&file.file_id);
    out.nodes.push(ParsedNode {
        node: Node::new(
            common,
            NodeKind::Seed(SeedAttrs {
                root_path: file.package_root.display().to_string(),
            }),
        ),
        inline_config: Default::default(),
        yaml_config: Default::default(),
    });
    out
}

/// Snapshot files either hold `{% snapshot %}` blocks or a bare select
pub fn parse_snapshot(file: &SourceFile) -> Result<ParseOutput, String> {
    let found = blocks::extract(&file.contents, &[BlockKind::Snapshot])?;
    if found.is_empty() {
        return Ok(templated_node(file, ResourceType::Snapshot, NodeKind::Snapshot));
    }
    let mut out = ParseOutput::new(&file.file_id);
    for block in found {
        let mut common = file_node(file, ResourceType::Snapshot, &block.name, &block.body);
        common.checksum = FileHash::from_contents(&block.full);
        let calls = jinja_static::scan(&block.body);
        let inline_config = apply_calls(&mut common, &calls);
        out.nodes.push(ParsedNode {
            node: Node::new(common, NodeKind::Snapshot),
            inline_config,
            yaml_config: Default::default(),
        });
    }
    Ok(out)
}

/// Macro files: macros, generic test definitions and materializations
pub fn parse_macros(file: &SourceFile) -> Result<ParseOutput, String> {
    let found = blocks::extract(
        &file.contents,
        &[BlockKind::Macro, BlockKind::Test, BlockKind::Materialization],
    )?;
    let mut out = ParseOutput::new(&file.file_id);
    for block in found {
        let (name, macro_sql) = match block.kind {
            BlockKind::Macro => (block.name.clone(), block.full.clone()),
            BlockKind::Test => {
                let name = format!("test_{}", block.name);
                let sql = format!(
                    "{{% macro {}({}) %}}{}{{% endmacro %}}",
                    name, block.args, block.body
                );
                (name, sql)
            }
            BlockKind::Materialization => {
                let adapter = block.adapter.clone().unwrap_or_else(|| "default".to_string());
                let name = format!("materialization_{}_{}", block.name, adapter);
                let sql = format!("{{% macro {}() %}}{}{{% endmacro %}}", name, block.body);
                (name, sql)
            }
            _ => continue,
        };
        let calls = jinja_static::scan(&block.body);
        out.macros.push(Macro {
            unique_id: unique_id(ResourceType::Macro, &file.package_name, &name),
            name,
            package_name: file.package_name.clone(),
            original_file_path: file.original_file_path.clone(),
            file_id: file.file_id.clone(),
            checksum: FileHash::from_contents(&macro_sql),
            macro_sql,
            arguments: block.arg_names(),
            description: String::new(),
            depends_on: DependsOn::default(),
            macro_calls: calls.macro_calls,
        });
    }
    Ok(out)
}

pub fn parse_docs(file: &SourceFile) -> Result<ParseOutput, String> {
    let found = blocks::extract(&file.contents, &[BlockKind::Docs])?;
    let mut out = ParseOutput::new(&file.file_id);
    for block in found {
        out.docs.push(Documentation {
            unique_id: unique_id(ResourceType::Doc, &file.package_name, &block.name),
            name: block.name,
            package_name: file.package_name.clone(),
            original_file_path: file.original_file_path.clone(),
            file_id: file.file_id.clone(),
            block_contents: block.body.trim().to_string(),
        });
    }
    Ok(out)
}

/// `on-run-start` / `on-run-end` entries of a package's project file
pub fn parse_hooks(file: &SourceFile) -> Result<ParseOutput, String> {
    let config = ProjectConfig::from_str(&file.contents, Path::new(&file.original_file_path))
        .map_err(|e| e.to_string())?;
    let mut out = ParseOutput::new(&file.file_id);
    for key in config.unknown.keys() {
        out.deprecations.push((
            "project-config-unknown-key".to_string(),
            format!("Ignoring unknown key '{}' in {}", key, file.file_id),
        ));
    }
    for (hook_type, hooks) in [
        ("on-run-start", &config.on_run_start),
        ("on-run-end", &config.on_run_end),
    ] {
        for (index, sql) in hooks.iter().enumerate() {
            let name = format!("{}-{}-{}", file.package_name, hook_type, index);
            let mut common = NodeCommon {
                unique_id: unique_id(ResourceType::Operation, &file.package_name, &name),
                name: name.clone(),
                package_name: file.package_name.clone(),
                path: format!("hooks/{}.sql", name),
                original_file_path: file.original_file_path.clone(),
                file_id: file.file_id.clone(),
                fqn: vec![file.package_name.clone(), "hooks".to_string(), name],
                raw_code: sql.clone(),
                checksum: FileHash::from_contents(sql),
                ..Default::default()
            };
            let calls = jinja_static::scan(sql);
            let inline_config = apply_calls(&mut common, &calls);
            out.nodes.push(ParsedNode {
                node: Node::new(
                    common,
                    NodeKind::Operation(OperationAttrs {
                        hook_type: Some(hook_type.to_string()),
                        index,
                    }),
                ),
                inline_config,
                yaml_config: Default::default(),
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
#[path = "sql_test.rs"]
mod tests;

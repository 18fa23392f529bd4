//! Seeds: CSV files loaded through the adapter's bulk loader

use super::hooks::NodeHooks;
use super::{NodeOutcome, NodeTask, Session};
use crate::error::{DbResultExt, RunError, RunnerResult};
use qy_core::NodeKind;
use qy_db::{AdapterResponse, CsvLoadOptions};
use serde_json::Value;
use std::path::PathBuf;

fn seed_path(task: &NodeTask<'_>) -> RunnerResult<PathBuf> {
    match &task.node.kind {
        NodeKind::Seed(attrs) => Ok(PathBuf::from(&attrs.root_path).join(&task.node.common.original_file_path)),
        _ => Err(RunError::Internal(format!("{} is not a seed", task.id()))),
    }
}

fn load_options(task: &NodeTask<'_>, truncate: bool) -> RunnerResult<CsvLoadOptions> {
    let config = task.node.config();
    let column_types = match config.get("column_types") {
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(column, ty)| ty.as_str().map(|t| (column.clone(), t.to_string())))
            .collect(),
        _ => Default::default(),
    };
    let delimiter = match config.get_str("delimiter") {
        None => None,
        Some(d) => {
            let mut chars = d.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Some(c),
                _ => {
                    return Err(RunError::materialization(
                        task.id(),
                        format!("delimiter must be a single character, got '{}'", d),
                    ))
                }
            }
        }
    };
    Ok(CsvLoadOptions {
        column_types,
        delimiter,
        truncate,
    })
}

pub(super) async fn run(task: &NodeTask<'_>, session: &mut Session<'_>) -> RunnerResult<NodeOutcome> {
    let relation = task.relation()?;
    let path = seed_path(task)?;
    let full_refresh = task.ctx.full_refresh_for(task.node);
    let options = load_options(task, !full_refresh)?;

    let hooks = NodeHooks::load(task, true);
    hooks.before(task, session).await?;
    let built = async {
        if full_refresh {
            session.drop_existing(&relation).await?;
        }
        let rows = session
            .connection()
            .load_csv(&relation, &path, &options)
            .await
            .for_node(task.id())?;
        log::debug!("Loaded {} rows into {}", rows, relation.render_path());
        super::contract::apply_grants(task, session, &relation).await?;
        Ok::<_, RunError>(
            NodeOutcome::success(format!("INSERT {}", rows))
                .with_response(Some(AdapterResponse::new("INSERT", Some(rows)))),
        )
    }
    .await;
    hooks.after(task, session, built).await
}

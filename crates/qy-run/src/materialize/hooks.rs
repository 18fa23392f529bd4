//! Node `pre_hook`/`post_hook` entries and project `on-run-*` hooks

use super::{split_statements, NodeOutcome, NodeTask, Session};
use crate::error::RunnerResult;

/// A node's hooks, split by whether they share the build transaction
///
/// Hooks configured with `transaction: false` run before `begin` and after
/// `commit`; the rest run inside the transaction around the build.
pub(crate) struct NodeHooks {
    transactional: bool,
    pre_inside: Vec<String>,
    pre_outside: Vec<String>,
    post_inside: Vec<String>,
    post_outside: Vec<String>,
}

fn split(hooks: Vec<(String, bool)>) -> (Vec<String>, Vec<String>) {
    let mut inside = Vec::new();
    let mut outside = Vec::new();
    for (sql, transaction) in hooks {
        if transaction {
            inside.push(sql);
        } else {
            outside.push(sql);
        }
    }
    (inside, outside)
}

impl NodeHooks {
    pub(crate) fn load(task: &NodeTask<'_>, transactional: bool) -> Self {
        let config = task.node.config();
        let (pre_inside, pre_outside) = split(config.hooks("pre_hook"));
        let (post_inside, post_outside) = split(config.hooks("post_hook"));
        Self {
            transactional,
            pre_inside,
            pre_outside,
            post_inside,
            post_outside,
        }
    }

    /// Outside pre-hooks, `begin`, then inside pre-hooks
    pub(crate) async fn before(&self, task: &NodeTask<'_>, session: &mut Session<'_>) -> RunnerResult<()> {
        run_all(task, session, &self.pre_outside).await?;
        if self.transactional {
            session.begin().await?;
        }
        if let Err(e) = run_all(task, session, &self.pre_inside).await {
            self.abort(session).await;
            return Err(e);
        }
        Ok(())
    }

    /// Inside post-hooks, `commit`, then outside post-hooks; rolls back when
    /// the build or a hook failed
    pub(crate) async fn after(
        &self,
        task: &NodeTask<'_>,
        session: &mut Session<'_>,
        built: RunnerResult<NodeOutcome>,
    ) -> RunnerResult<NodeOutcome> {
        let outcome = match built {
            Ok(outcome) => outcome,
            Err(e) => {
                self.abort(session).await;
                return Err(e);
            }
        };
        if let Err(e) = run_all(task, session, &self.post_inside).await {
            self.abort(session).await;
            return Err(e);
        }
        if self.transactional {
            session.commit().await?;
        }
        run_all(task, session, &self.post_outside).await?;
        Ok(outcome)
    }

    async fn abort(&self, session: &Session<'_>) {
        if self.transactional {
            session.rollback().await;
        }
    }
}

async fn run_all(task: &NodeTask<'_>, session: &mut Session<'_>, hooks: &[String]) -> RunnerResult<()> {
    for hook in hooks {
        let sql = task.compiler.render_sql(task.node, hook)?;
        for statement in split_statements(&sql) {
            session.execute(&statement).await?;
        }
    }
    Ok(())
}

/// An `on-run-start`/`on-run-end` hook node
pub(crate) async fn run_operation(task: &NodeTask<'_>, session: &mut Session<'_>) -> RunnerResult<NodeOutcome> {
    let compiled = task.compile(&Default::default())?;
    for statement in split_statements(&compiled.sql) {
        session.execute(&statement).await?;
    }
    Ok(NodeOutcome::success("OK")
        .with_sql(&compiled.sql)
        .with_response(session.last_response()))
}

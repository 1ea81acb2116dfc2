//! Execution engine - applies a resource graph in dependency order

use crate::context::{ApplyContext, AutoConfirm, ConfirmCallback, NoProgress, ProgressCallback};
use crate::diff::compute_diffs;
use crate::graph::{NodeId, ResourceGraph};
use crate::resource::{Resource, ResourceExt};
use crate::types::{ApplyResult, ExecuteOptions, ExecuteSummary};
use anyhow::Result;

/// Execute a graph with the given options and callbacks
///
/// Resources are applied one at a time in topological order. A resource
/// whose dependency failed (or was itself skipped for that reason) is
/// skipped. A change in a resource marks its notify targets for refresh;
/// each target is refreshed at most once, after its own apply, unless that
/// apply already absorbed it (see `Resource::absorbs_refresh`).
///
/// # Returns
/// Summary of execution results
pub fn execute<P, C>(
    graph: &ResourceGraph,
    opts: &ExecuteOptions,
    progress: &mut P,
    confirm: &mut C,
) -> Result<ExecuteSummary>
where
    P: ProgressCallback,
    C: ConfirmCallback,
{
    let order = graph.topo_order()?;
    let diffs = compute_diffs(graph)?;
    progress.on_plan(&diffs);

    if diffs.is_empty() {
        return Ok(ExecuteSummary::default());
    }

    // Confirm before proceeding (unless dry_run)
    if !opts.dry_run && !confirm.confirm("Apply changes?")? {
        return Ok(ExecuteSummary {
            skipped: diffs.len(),
            ..Default::default()
        });
    }

    if opts.dry_run {
        return Ok(ExecuteSummary::default());
    }

    let mut run = Run::new(graph, opts, progress);
    run.execute(&order);
    Ok(run.summary)
}

/// Simple execution without callbacks
///
/// For basic use cases where you don't need progress or confirmation.
pub fn execute_simple(graph: &ResourceGraph, opts: &ExecuteOptions) -> Result<ExecuteSummary> {
    execute(graph, opts, &mut NoProgress, &mut AutoConfirm)
}

/// Per-run bookkeeping
struct Run<'a, P: ProgressCallback> {
    graph: &'a ResourceGraph,
    fail_fast: bool,
    ctx: ApplyContext,
    progress: &'a mut P,
    /// Key of the failed resource that blocks each node, if any
    blocked: Vec<Option<String>>,
    pending_refresh: Vec<bool>,
    summary: ExecuteSummary,
}

impl<'a, P: ProgressCallback> Run<'a, P> {
    fn new(graph: &'a ResourceGraph, opts: &ExecuteOptions, progress: &'a mut P) -> Self {
        Self {
            graph,
            fail_fast: opts.fail_fast,
            ctx: ApplyContext::new(false),
            progress,
            blocked: vec![None; graph.len()],
            pending_refresh: vec![false; graph.len()],
            summary: ExecuteSummary::default(),
        }
    }

    fn execute(&mut self, order: &[NodeId]) {
        self.progress.on_start(order.len());

        for (pos, &id) in order.iter().enumerate() {
            if !self.step(id) && self.fail_fast {
                let remaining = order[pos + 1..]
                    .iter()
                    .filter(|n| !self.graph.resource(**n).refresh_only())
                    .count();
                log::warn!("Stopping after first failure; {} resources not applied", remaining);
                self.summary.skipped += remaining;
                break;
            }
        }

        self.progress.on_finish();
    }

    /// Apply (and possibly refresh) one node. Returns false on failure.
    fn step(&mut self, id: NodeId) -> bool {
        let graph = self.graph;
        let resource = graph.resource(id);
        let key = resource.key();

        if let Some(blocker) = self.blocker_of(id) {
            self.blocked[id.index()] = Some(blocker.clone());
            if !resource.refresh_only() {
                self.record(
                    &key,
                    ApplyResult::Skipped {
                        reason: format!("dependency {} failed", blocker),
                    },
                );
            }
            return true;
        }

        if resource.refresh_only() {
            if self.pending_refresh[id.index()] {
                return self.refresh(id, resource, &key);
            }
            return true;
        }

        self.progress.on_resource_start(&key, &resource.description());
        let result = match resource.apply(&mut self.ctx) {
            Ok(r) => r,
            Err(e) => ApplyResult::Failed {
                error: format!("{:#}", e),
            },
        };
        let changed = result.is_change();
        let absorbed = resource.absorbs_refresh(&result);
        if !self.record(&key, result) {
            self.blocked[id.index()] = Some(key);
            return false;
        }

        if changed {
            for target in graph.notify_targets(id) {
                self.pending_refresh[target.index()] = true;
            }
        }

        if self.pending_refresh[id.index()] {
            if absorbed {
                log::debug!("{}: refresh absorbed by apply", key);
            } else {
                return self.refresh(id, resource, &key);
            }
        }

        true
    }

    fn refresh(&mut self, id: NodeId, resource: &dyn Resource, key: &str) -> bool {
        self.progress
            .on_resource_start(key, &format!("Refresh {}", resource.description()));
        let result = match resource.refresh(&mut self.ctx) {
            Ok(r) => r,
            Err(e) => ApplyResult::Failed {
                error: format!("refresh failed: {:#}", e),
            },
        };
        if self.record(key, result) {
            true
        } else {
            self.blocked[id.index()] = Some(key.to_string());
            false
        }
    }

    fn blocker_of(&self, id: NodeId) -> Option<String> {
        self.graph
            .dependencies(id)
            .into_iter()
            .find_map(|dep| self.blocked[dep.index()].clone())
    }

    /// Report a result; returns whether it was a success
    fn record(&mut self, key: &str, result: ApplyResult) -> bool {
        log::debug!("{}: {:?}", key, result);
        self.summary.add_result(key, &result);
        self.progress.on_resource_complete(key, &result);
        result.is_success()
    }
}

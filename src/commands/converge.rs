//! `apply`, `diff` and `status`

use anyhow::{Context as AnyhowContext, Result, bail};
use colored::Colorize;
use declarative::{ResourceExt, ResourceGraph, ResourceState, compute_diffs};
use std::sync::Arc;

use super::load_config;
use crate::Context;
use crate::engine::{self, ApplyOptions, differ};
use crate::runner::SystemRunner;
use crate::ui;

fn plan(ctx: &Context, target: Option<&str>) -> Result<ResourceGraph> {
    let config = load_config(ctx)?;
    let graph = engine::build_graph(&config, Arc::new(SystemRunner))
        .context("Failed to plan resources")?
        .filter_by_target(target);

    if graph.is_empty()
        && let Some(t) = target
    {
        bail!("No resources match target '{t}'");
    }
    log::debug!("Planned {} resources", graph.len());
    Ok(graph)
}

/// Converge the host; fails when any resource failed
pub fn apply(
    ctx: &Context,
    target: Option<&str>,
    dry_run: bool,
    yes: bool,
    fail_fast: bool,
) -> Result<()> {
    let graph = plan(ctx, target)?;
    let opts = ApplyOptions {
        dry_run,
        yes,
        verbose: ctx.verbose > 0,
        quiet: ctx.quiet,
        fail_fast,
    };

    let summary = engine::apply(&graph, &opts)?;
    if !summary.is_success() {
        bail!("{} resource(s) failed", summary.failed);
    }
    Ok(())
}

/// Show what apply would change
pub fn diff(ctx: &Context, target: Option<&str>) -> Result<()> {
    let graph = plan(ctx, target)?;
    let diffs = compute_diffs(&graph)?;
    // Content diffs are the point of this command
    differ::display_diff(&diffs, true);
    Ok(())
}

/// Every managed resource with its current state
pub fn status(ctx: &Context, target: Option<&str>) -> Result<()> {
    let graph = plan(ctx, target)?;

    ui::header("Sachet Status");
    let mut drifted = 0;
    for id in graph.topo_order()? {
        let resource = graph.resource(id);
        if resource.refresh_only() {
            continue;
        }

        let key = resource.key();
        match resource.current_state() {
            Ok(current) if current == resource.desired_state() => {
                if !ctx.quiet {
                    println!("  {} {}", "✓".green(), key);
                }
            }
            Ok(current) => {
                drifted += 1;
                println!("  {} {} {}", "~".yellow(), key, describe(&current).dimmed());
            }
            Err(e) => {
                drifted += 1;
                println!("  {} {} {}", "?".red(), key, format!("{e:#}").dimmed());
            }
        }
    }

    println!();
    if drifted == 0 {
        ui::success("In sync");
    } else {
        ui::warn(&format!(
            "{drifted} resource(s) out of sync. Run: sachet-converge apply"
        ));
    }
    Ok(())
}

fn describe(state: &ResourceState) -> String {
    match state {
        ResourceState::Absent => "(missing)".to_string(),
        ResourceState::Modified { from, to } => format!("{from} → {to}"),
        ResourceState::Present { details } => details.clone().unwrap_or_default(),
        ResourceState::Unknown => "(unknown)".to_string(),
    }
}

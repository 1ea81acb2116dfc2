//! Terminal front end for the declarative executor

use anyhow::{Result, bail};
use colored::Colorize;
use declarative::{
    ApplyResult, AutoConfirm, ConfirmCallback, ExecuteOptions, ExecuteSummary, ProgressCallback,
    ResourceDiff, ResourceGraph,
};
use indicatif::ProgressBar;
use std::io::IsTerminal;

use super::differ::display_diff;
use crate::progress;

/// Options for an apply run
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    /// Show the plan, change nothing
    pub dry_run: bool,
    /// Skip the confirmation prompt
    pub yes: bool,
    /// Show content diffs in the plan
    pub verbose: bool,
    /// Only report failures
    pub quiet: bool,
    /// Stop at the first failed resource
    pub fail_fast: bool,
}

/// Show the plan, confirm, apply, and print a summary
pub fn apply(graph: &ResourceGraph, opts: &ApplyOptions) -> Result<ExecuteSummary> {
    let exec = ExecuteOptions {
        dry_run: opts.dry_run,
        fail_fast: opts.fail_fast,
    };
    let mut progress = TerminalProgress::new(opts.verbose, opts.quiet);

    let summary = if opts.yes || opts.dry_run {
        declarative::execute(graph, &exec, &mut progress, &mut AutoConfirm)?
    } else {
        if !std::io::stdin().is_terminal() {
            bail!("Refusing to apply without confirmation on a non-interactive terminal; pass --yes");
        }
        let mut confirm = PromptConfirm::default();
        let summary = declarative::execute(graph, &exec, &mut progress, &mut confirm)?;
        if confirm.declined {
            println!();
            println!("  {} Aborted", "✗".red());
            return Ok(summary);
        }
        summary
    };

    if !progress.had_changes {
        return Ok(summary);
    }
    if opts.dry_run {
        if !opts.quiet {
            println!();
            println!("  {} Dry run - no changes made", "ℹ".blue());
        }
        return Ok(summary);
    }

    if !opts.quiet || !summary.is_success() {
        print_summary(&summary);
    }
    Ok(summary)
}

/// Plan display and an indicatif bar over the executor's callbacks
struct TerminalProgress {
    verbose: bool,
    quiet: bool,
    had_changes: bool,
    pb: Option<ProgressBar>,
}

impl TerminalProgress {
    fn new(verbose: bool, quiet: bool) -> Self {
        Self {
            verbose,
            quiet,
            had_changes: false,
            pb: None,
        }
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_plan(&mut self, diffs: &[ResourceDiff]) {
        self.had_changes = !diffs.is_empty();
        if !self.quiet {
            display_diff(diffs, self.verbose);
        }
    }

    fn on_start(&mut self, total: usize) {
        if !self.quiet {
            println!();
        }
        self.pb = Some(if self.quiet {
            progress::hidden()
        } else {
            progress::bar(total as u64, "Applying")
        });
    }

    fn on_resource_start(&mut self, _key: &str, description: &str) {
        if let Some(pb) = &self.pb {
            pb.set_message(description.to_string());
        }
    }

    fn on_resource_complete(&mut self, key: &str, result: &ApplyResult) {
        let Some(pb) = &self.pb else {
            return;
        };

        // Refreshes are extra steps on top of the planned resources
        if pb.length().is_some_and(|len| pb.position() >= len) {
            pb.inc_length(1);
        }
        pb.inc(1);

        let line = match result {
            ApplyResult::Created | ApplyResult::Modified | ApplyResult::Removed => {
                Some(format!("    {} {}", "✓".green(), key))
            }
            ApplyResult::Refreshed => Some(format!("    {} {} (refreshed)", "✓".green(), key)),
            ApplyResult::Failed { error } => {
                Some(format!("    {} {}: {}", "✗".red(), key, error.red()))
            }
            ApplyResult::Skipped { reason } => {
                Some(format!("    {} {} ({})", "⊘".dimmed(), key, reason.dimmed()))
            }
            ApplyResult::NoChange if self.verbose => Some(format!("    {} {}", "○".dimmed(), key)),
            ApplyResult::NoChange => None,
        };
        let Some(line) = line else {
            return;
        };
        if matches!(result, ApplyResult::Failed { .. }) {
            pb.suspend(|| eprintln!("{line}"));
        } else if !self.quiet {
            pb.suspend(|| println!("{line}"));
        }
    }

    fn on_finish(&mut self) {
        if let Some(pb) = self.pb.take() {
            pb.finish_and_clear();
        }
    }
}

/// Asks on the terminal and remembers a "no"
#[derive(Default)]
struct PromptConfirm {
    declined: bool,
}

impl ConfirmCallback for PromptConfirm {
    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        use dialoguer::Confirm;

        println!();
        let confirmed = Confirm::new()
            .with_prompt(prompt)
            .default(true)
            .interact()?;
        self.declined = !confirmed;
        Ok(confirmed)
    }
}

/// Print final summary
fn print_summary(summary: &ExecuteSummary) {
    println!();
    if summary.is_success() {
        println!("  {} Sachet converged", "✓".green().bold());
    } else {
        println!("  {} Converged with errors", "⚠".yellow().bold());
    }

    if summary.created > 0 {
        println!("    • {} resources created", summary.created);
    }
    if summary.modified > 0 {
        println!("    • {} resources modified", summary.modified);
    }
    if summary.removed > 0 {
        println!("    • {} resources removed", summary.removed);
    }
    if summary.refreshed > 0 {
        println!("    • {} refreshes (reload/restart)", summary.refreshed);
    }
    if summary.skipped > 0 {
        println!("    • {} resources skipped", summary.skipped);
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "resources".red());
        for (key, error) in &summary.failures {
            println!("      {} {}: {}", "✗".red(), key, error);
        }
    }
}

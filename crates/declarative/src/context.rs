//! Apply context and provider traits
//!
//! These traits allow the declarative crate to be used without
//! depending on specific implementations of process execution, progress, etc.

use crate::diff::ResourceDiff;
use crate::types::{ApplyResult, CommandOutput};
use anyhow::Result;

/// Provider for external command execution
///
/// Resources that shell out (package managers, init systems, account tools)
/// go through this trait so tests can substitute a recording fake.
pub trait CommandRunner: Send + Sync {
    /// Run a command and return its captured output
    fn run(&self, cmd: &str, args: &[&str]) -> Result<CommandOutput>;

    /// Run a command and return just success/failure
    fn run_status(&self, cmd: &str, args: &[&str]) -> Result<bool> {
        Ok(self.run(cmd, args)?.success)
    }

    /// Run a command and capture stdout, failing if the command failed
    fn run_capture(&self, cmd: &str, args: &[&str]) -> Result<String> {
        let output = self.run(cmd, args)?;
        if !output.success {
            anyhow::bail!(
                "Command failed: {} {}: {}",
                cmd,
                args.join(" "),
                output.stderr_str().trim()
            );
        }
        Ok(output.stdout_str())
    }
}

/// Progress callback for execution operations
///
/// Implement this trait to receive progress updates during execution.
pub trait ProgressCallback {
    /// Called once with the computed diffs, before confirmation
    fn on_plan(&mut self, _diffs: &[ResourceDiff]) {}

    /// Called when execution starts, with the number of resources
    fn on_start(&mut self, total: usize);

    /// Called when starting to apply a single resource
    fn on_resource_start(&mut self, key: &str, description: &str);

    /// Called when a resource application (or refresh) completes
    fn on_resource_complete(&mut self, key: &str, result: &ApplyResult);

    /// Called when execution finishes
    fn on_finish(&mut self);
}

/// Confirmation callback for user interaction
///
/// Implement this trait to handle user confirmations.
pub trait ConfirmCallback {
    /// Ask the user to confirm an action
    ///
    /// # Returns
    /// `true` if the user confirmed, `false` otherwise
    fn confirm(&mut self, prompt: &str) -> Result<bool>;
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_start(&mut self, _total: usize) {}
    fn on_resource_start(&mut self, _key: &str, _description: &str) {}
    fn on_resource_complete(&mut self, _key: &str, _result: &ApplyResult) {}
    fn on_finish(&mut self) {}
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(false)
    }
}

/// Context passed to resource apply operations
#[derive(Debug, Clone, Copy)]
pub struct ApplyContext {
    /// Whether this is a dry run (no actual changes)
    pub dry_run: bool,
}

impl ApplyContext {
    /// Create a new apply context
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }
}

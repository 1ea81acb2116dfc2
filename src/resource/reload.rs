//! `systemctl daemon-reload`, run only when a unit file changed

use anyhow::Result;
use declarative::{ApplyContext, ApplyResult, CommandRunner, Resource, ResourceState};
use std::fmt;
use std::sync::Arc;

pub struct SystemdReload {
    runner: Arc<dyn CommandRunner>,
}

impl SystemdReload {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl fmt::Debug for SystemdReload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemdReload").finish_non_exhaustive()
    }
}

impl Resource for SystemdReload {
    fn id(&self) -> String {
        "daemon-reload".to_string()
    }

    fn description(&self) -> String {
        "Reload systemd units".to_string()
    }

    fn resource_type(&self) -> &'static str {
        "systemd_reload"
    }

    fn current_state(&self) -> Result<ResourceState> {
        Ok(ResourceState::Present { details: None })
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::Present { details: None }
    }

    fn apply(&self, _ctx: &mut ApplyContext) -> Result<ApplyResult> {
        Ok(ApplyResult::NoChange)
    }

    fn refresh(&self, ctx: &mut ApplyContext) -> Result<ApplyResult> {
        if ctx.dry_run {
            return Ok(ApplyResult::Skipped {
                reason: "Dry run".to_string(),
            });
        }
        log::info!("Reloading systemd units");
        self.runner.run_capture("systemctl", &["daemon-reload"])?;
        Ok(ApplyResult::Refreshed)
    }

    fn refresh_only(&self) -> bool {
        true
    }
}

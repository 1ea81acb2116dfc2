//! System user resource

use anyhow::{Context, Result};
use declarative::{ApplyContext, ApplyResult, CommandRunner, Resource, ResourceState};
use nix::unistd::{Group, User};
use std::fmt;
use std::sync::Arc;

use super::lookup_gid;

const NOLOGIN_SHELL: &str = "/usr/sbin/nologin";
const NO_HOME: &str = "/nonexistent";

/// A system user without a login shell or home directory
///
/// Supplementary groups are only ever added, never removed.
pub struct SystemUser {
    pub name: String,
    pub group: String,
    pub extra_groups: Vec<String>,
    runner: Arc<dyn CommandRunner>,
}

/// What differs between the account on the host and the declared one
#[derive(Debug, Default, PartialEq, Eq)]
struct Drift {
    primary_group: Option<String>,
    missing_groups: Vec<String>,
}

impl SystemUser {
    pub fn new(
        name: &str,
        group: &str,
        extra_groups: &[String],
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            name: name.to_string(),
            group: group.to_string(),
            extra_groups: extra_groups.to_vec(),
            runner,
        }
    }

    fn details(&self) -> String {
        if self.extra_groups.is_empty() {
            format!("group {}", self.group)
        } else {
            format!("group {}, member of {}", self.group, self.extra_groups.join(","))
        }
    }

    /// None when the user does not exist
    fn drift(&self) -> Result<Option<Drift>> {
        let Some(user) = User::from_name(&self.name)
            .with_context(|| format!("Failed to look up user '{}'", self.name))?
        else {
            return Ok(None);
        };

        let mut drift = Drift::default();
        if lookup_gid(&self.group)? != Some(user.gid) {
            let current = Group::from_gid(user.gid)
                .ok()
                .flatten()
                .map_or_else(|| user.gid.to_string(), |g| g.name);
            drift.primary_group = Some(current);
        }

        for extra in &self.extra_groups {
            let member = Group::from_name(extra)
                .with_context(|| format!("Failed to look up group '{extra}'"))?
                .is_some_and(|g| g.mem.iter().any(|m| m == &self.name) || g.gid == user.gid);
            if !member {
                drift.missing_groups.push(extra.clone());
            }
        }

        Ok(Some(drift))
    }

    fn create(&self) -> Result<()> {
        let joined = self.extra_groups.join(",");
        let mut args = vec![
            "--system",
            "--gid",
            self.group.as_str(),
            "--no-create-home",
            "--home-dir",
            NO_HOME,
            "--shell",
            NOLOGIN_SHELL,
        ];
        if !self.extra_groups.is_empty() {
            args.extend(["--groups", joined.as_str()]);
        }
        args.push(self.name.as_str());

        log::info!("Creating system user {}", self.name);
        self.runner.run_capture("useradd", &args)?;
        Ok(())
    }

    fn repair(&self, drift: &Drift) -> Result<()> {
        if drift.primary_group.is_some() {
            log::info!("Setting primary group of {} to {}", self.name, self.group);
            self.runner
                .run_capture("usermod", &["-g", &self.group, &self.name])?;
        }
        if !drift.missing_groups.is_empty() {
            let groups = drift.missing_groups.join(",");
            log::info!("Adding {} to {}", self.name, groups);
            self.runner
                .run_capture("usermod", &["-a", "-G", &groups, &self.name])?;
        }
        Ok(())
    }
}

impl fmt::Debug for SystemUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemUser")
            .field("name", &self.name)
            .field("group", &self.group)
            .field("extra_groups", &self.extra_groups)
            .finish_non_exhaustive()
    }
}

impl Resource for SystemUser {
    fn id(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        format!("System user {} ({})", self.name, self.details())
    }

    fn resource_type(&self) -> &'static str {
        "user"
    }

    fn current_state(&self) -> Result<ResourceState> {
        match self.drift()? {
            None => Ok(ResourceState::Absent),
            Some(drift) if drift == Drift::default() => Ok(self.desired_state()),
            Some(drift) => {
                let mut from = Vec::new();
                if let Some(group) = &drift.primary_group {
                    from.push(format!("group {group}"));
                }
                if !drift.missing_groups.is_empty() {
                    from.push(format!("not in {}", drift.missing_groups.join(",")));
                }
                Ok(ResourceState::Modified {
                    from: from.join(", "),
                    to: self.details(),
                })
            }
        }
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::Present {
            details: Some(self.details()),
        }
    }

    fn apply(&self, ctx: &mut ApplyContext) -> Result<ApplyResult> {
        let drift = self.drift()?;
        if drift.as_ref().is_some_and(|d| *d == Drift::default()) {
            return Ok(ApplyResult::NoChange);
        }
        if ctx.dry_run {
            return Ok(ApplyResult::Skipped {
                reason: "Dry run".to_string(),
            });
        }

        match drift {
            None => {
                self.create()?;
                Ok(ApplyResult::Created)
            }
            Some(drift) => {
                self.repair(&drift)?;
                Ok(ApplyResult::Modified)
            }
        }
    }
}

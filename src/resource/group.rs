//! System group resource

use anyhow::Result;
use declarative::{ApplyContext, ApplyResult, CommandRunner, Resource, ResourceState};
use std::fmt;
use std::sync::Arc;

use super::lookup_gid;

/// A system group, created with `groupadd --system`
pub struct SystemGroup {
    pub name: String,
    runner: Arc<dyn CommandRunner>,
}

impl SystemGroup {
    pub fn new(name: &str, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            name: name.to_string(),
            runner,
        }
    }
}

impl fmt::Debug for SystemGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemGroup")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Resource for SystemGroup {
    fn id(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        format!("System group {}", self.name)
    }

    fn resource_type(&self) -> &'static str {
        "group"
    }

    fn current_state(&self) -> Result<ResourceState> {
        Ok(match lookup_gid(&self.name)? {
            Some(_) => ResourceState::Present { details: None },
            None => ResourceState::Absent,
        })
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::Present { details: None }
    }

    fn apply(&self, ctx: &mut ApplyContext) -> Result<ApplyResult> {
        if lookup_gid(&self.name)?.is_some() {
            return Ok(ApplyResult::NoChange);
        }
        if ctx.dry_run {
            return Ok(ApplyResult::Skipped {
                reason: "Dry run".to_string(),
            });
        }

        log::info!("Creating system group {}", self.name);
        self.runner
            .run_capture("groupadd", &["--system", &self.name])?;
        Ok(ApplyResult::Created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::current_user_and_group;
    use crate::runner::FakeRunner;

    #[test]
    fn test_missing_group_is_created() {
        let runner = Arc::new(FakeRunner::succeeding());
        let group = SystemGroup::new("sachet-test-missing", runner.clone());

        assert_eq!(group.current_state().unwrap(), ResourceState::Absent);
        let result = group.apply(&mut ApplyContext::new(false)).unwrap();
        assert!(matches!(result, ApplyResult::Created));
        assert_eq!(runner.calls(), vec!["groupadd --system sachet-test-missing"]);
    }

    #[test]
    fn test_existing_group_untouched() {
        let (_, name) = current_user_and_group();
        let runner = Arc::new(FakeRunner::succeeding());
        let group = SystemGroup::new(&name, runner.clone());

        assert_eq!(group.current_state().unwrap(), group.desired_state());
        let result = group.apply(&mut ApplyContext::new(false)).unwrap();
        assert!(matches!(result, ApplyResult::NoChange));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_groupadd_failure_surfaces() {
        let runner = Arc::new(FakeRunner::new(|_| {
            declarative::CommandOutput::failed("groupadd: Permission denied.")
        }));
        let group = SystemGroup::new("sachet-test-missing", runner);
        let err = group
            .apply(&mut ApplyContext::new(false))
            .unwrap_err();
        assert!(err.to_string().contains("Permission denied"));
    }
}

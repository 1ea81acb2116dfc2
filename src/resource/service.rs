//! Service resource - running/stopped, enabled/disabled, restart on refresh

use anyhow::Result;
use declarative::{ApplyContext, ApplyResult, CommandRunner, Resource, ResourceState};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::runner::command_exists;
use crate::schema::ServiceEnsure;

/// How the service is controlled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceManager {
    /// `systemctl`
    Systemd,
    /// `service` plus `update-rc.d` or `chkconfig`
    Sysv,
}

/// A daemon under init-system control
pub struct Service {
    pub name: String,
    pub ensure: ServiceEnsure,
    pub enable: bool,
    manager: ServiceManager,
    /// Root holding the `rc?.d` directories, for SysV enablement checks
    rc_root: PathBuf,
    runner: Arc<dyn CommandRunner>,
    /// Set when apply (re)started the process
    started: AtomicBool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Status {
    running: bool,
    enabled: bool,
}

impl Status {
    fn describe(self) -> String {
        format!(
            "{}, {}",
            if self.running { "running" } else { "stopped" },
            if self.enabled { "enabled" } else { "disabled" }
        )
    }
}

impl Service {
    pub fn new(
        name: &str,
        ensure: ServiceEnsure,
        enable: bool,
        manager: ServiceManager,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            name: name.to_string(),
            ensure,
            enable,
            manager,
            rc_root: PathBuf::from("/etc"),
            runner,
            started: AtomicBool::new(false),
        }
    }

    /// Look for SysV start links under another root
    pub fn with_rc_root(mut self, root: impl AsRef<Path>) -> Self {
        self.rc_root = root.as_ref().to_path_buf();
        self
    }

    fn desired(&self) -> Status {
        Status {
            running: self.ensure == ServiceEnsure::Running,
            enabled: self.enable,
        }
    }

    fn status(&self) -> Result<Status> {
        let running = match self.manager {
            ServiceManager::Systemd => self
                .runner
                .run_status("systemctl", &["is-active", "--quiet", &self.name])?,
            ServiceManager::Sysv => self.runner.run_status("service", &[&self.name, "status"])?,
        };
        let enabled = match self.manager {
            ServiceManager::Systemd => self
                .runner
                .run_status("systemctl", &["is-enabled", "--quiet", &self.name])?,
            ServiceManager::Sysv => self.has_start_links(),
        };
        Ok(Status { running, enabled })
    }

    /// `S<NN><name>` links in any multi-user runlevel
    fn has_start_links(&self) -> bool {
        let dirs = ["rc2.d", "rc3.d", "rc4.d", "rc5.d"];
        let roots = [self.rc_root.clone(), self.rc_root.join("rc.d")];
        roots
            .iter()
            .flat_map(|root| dirs.iter().map(move |d| root.join(d)))
            .filter_map(|dir| fs::read_dir(dir).ok())
            .flatten()
            .filter_map(Result::ok)
            .any(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                name.starts_with('S') && name.len() == self.name.len() + 3 && name.ends_with(&self.name)
            })
    }

    fn control(&self, action: &str) -> Result<()> {
        log::info!("{} service {}", action, self.name);
        match self.manager {
            ServiceManager::Systemd => {
                self.runner.run_capture("systemctl", &[action, &self.name])?;
            }
            ServiceManager::Sysv => {
                self.runner.run_capture("service", &[&self.name, action])?;
            }
        }
        Ok(())
    }

    fn set_enabled(&self, enabled: bool) -> Result<()> {
        log::info!(
            "{} service {}",
            if enabled { "Enabling" } else { "Disabling" },
            self.name
        );
        let name = self.name.as_str();
        match self.manager {
            ServiceManager::Systemd => {
                let action = if enabled { "enable" } else { "disable" };
                self.runner.run_capture("systemctl", &[action, name])?;
            }
            ServiceManager::Sysv if command_exists(self.runner.as_ref(), "update-rc.d") => {
                if enabled {
                    self.runner.run_capture("update-rc.d", &[name, "defaults"])?;
                } else {
                    self.runner.run_capture("update-rc.d", &["-f", name, "remove"])?;
                }
            }
            ServiceManager::Sysv => {
                if enabled {
                    self.runner.run_capture("chkconfig", &["--add", name])?;
                    self.runner.run_capture("chkconfig", &[name, "on"])?;
                } else {
                    self.runner.run_capture("chkconfig", &[name, "off"])?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("ensure", &self.ensure)
            .field("enable", &self.enable)
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

impl Resource for Service {
    fn id(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        format!("Service {} ({})", self.name, self.desired().describe())
    }

    fn resource_type(&self) -> &'static str {
        "service"
    }

    fn current_state(&self) -> Result<ResourceState> {
        let current = self.status()?;
        let desired = self.desired();
        if current == desired {
            return Ok(self.desired_state());
        }
        Ok(ResourceState::Modified {
            from: current.describe(),
            to: desired.describe(),
        })
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::Present {
            details: Some(self.desired().describe()),
        }
    }

    fn apply(&self, ctx: &mut ApplyContext) -> Result<ApplyResult> {
        let current = self.status()?;
        let desired = self.desired();
        if current == desired {
            return Ok(ApplyResult::NoChange);
        }
        if ctx.dry_run {
            return Ok(ApplyResult::Skipped {
                reason: "Dry run".to_string(),
            });
        }

        if current.enabled != desired.enabled {
            self.set_enabled(desired.enabled)?;
        }
        if current.running != desired.running {
            if desired.running {
                self.control("start")?;
                self.started.store(true, Ordering::Relaxed);
            } else {
                self.control("stop")?;
            }
        }
        Ok(ApplyResult::Modified)
    }

    fn refresh(&self, ctx: &mut ApplyContext) -> Result<ApplyResult> {
        if self.ensure == ServiceEnsure::Stopped {
            return Ok(ApplyResult::Skipped {
                reason: format!("{} is meant to be stopped", self.name),
            });
        }
        if ctx.dry_run {
            return Ok(ApplyResult::Skipped {
                reason: "Dry run".to_string(),
            });
        }
        self.control("restart")?;
        Ok(ApplyResult::Refreshed)
    }

    fn absorbs_refresh(&self, _result: &ApplyResult) -> bool {
        self.started.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::FakeRunner;
    use declarative::CommandOutput;

    fn systemd(running: bool, enabled: bool) -> FakeRunner {
        FakeRunner::new(move |line| {
            let ok = match line {
                l if l.starts_with("systemctl is-active") => running,
                l if l.starts_with("systemctl is-enabled") => enabled,
                _ => true,
            };
            if ok {
                CommandOutput::ok("")
            } else {
                CommandOutput::failed("")
            }
        })
    }

    fn ctx() -> ApplyContext {
        ApplyContext::new(false)
    }

    #[test]
    fn test_stopped_service_started_and_enabled() {
        let runner = Arc::new(systemd(false, false));
        let svc = Service::new(
            "sachet",
            ServiceEnsure::Running,
            true,
            ServiceManager::Systemd,
            runner.clone(),
        );

        assert_eq!(
            svc.current_state().unwrap(),
            ResourceState::Modified {
                from: "stopped, disabled".into(),
                to: "running, enabled".into(),
            }
        );
        let result = svc.apply(&mut ctx()).unwrap();
        assert!(matches!(result, ApplyResult::Modified));
        assert!(svc.absorbs_refresh(&result));
        assert_eq!(runner.count("systemctl enable sachet"), 1);
        assert_eq!(runner.count("systemctl start sachet"), 1);
    }

    #[test]
    fn test_enable_only_does_not_absorb_refresh() {
        let runner = Arc::new(systemd(true, false));
        let svc = Service::new(
            "sachet",
            ServiceEnsure::Running,
            true,
            ServiceManager::Systemd,
            runner.clone(),
        );
        let result = svc.apply(&mut ctx()).unwrap();
        assert!(result.is_change());
        assert!(!svc.absorbs_refresh(&result));
        assert_eq!(runner.count("systemctl start"), 0);
    }

    #[test]
    fn test_in_sync_service_untouched() {
        let runner = Arc::new(systemd(true, true));
        let svc = Service::new(
            "sachet",
            ServiceEnsure::Running,
            true,
            ServiceManager::Systemd,
            runner.clone(),
        );
        assert_eq!(svc.current_state().unwrap(), svc.desired_state());
        assert!(matches!(svc.apply(&mut ctx()).unwrap(), ApplyResult::NoChange));
        assert_eq!(runner.calls().len(), 4);
    }

    #[test]
    fn test_refresh_restarts() {
        let runner = Arc::new(systemd(true, true));
        let svc = Service::new(
            "sachet",
            ServiceEnsure::Running,
            true,
            ServiceManager::Systemd,
            runner.clone(),
        );
        assert!(matches!(svc.refresh(&mut ctx()).unwrap(), ApplyResult::Refreshed));
        assert_eq!(runner.count("systemctl restart sachet"), 1);
    }

    #[test]
    fn test_stopped_service_not_restarted() {
        let runner = Arc::new(systemd(true, true));
        let svc = Service::new(
            "sachet",
            ServiceEnsure::Stopped,
            false,
            ServiceManager::Systemd,
            runner.clone(),
        );
        assert!(matches!(svc.refresh(&mut ctx()).unwrap(), ApplyResult::Skipped { .. }));
        svc.apply(&mut ctx()).unwrap();
        assert_eq!(runner.count("systemctl stop sachet"), 1);
        assert_eq!(runner.count("systemctl disable sachet"), 1);
        assert_eq!(runner.count("systemctl restart"), 0);
    }

    #[test]
    fn test_sysv_enablement_from_rc_links() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("rc3.d")).unwrap();
        fs::write(root.path().join("rc3.d/K01sachet"), "").unwrap();

        let runner = Arc::new(FakeRunner::new(|line| {
            if line.starts_with("which update-rc.d") {
                CommandOutput::ok("/usr/sbin/update-rc.d")
            } else {
                CommandOutput::ok("")
            }
        }));
        let svc = Service::new(
            "sachet",
            ServiceEnsure::Running,
            true,
            ServiceManager::Sysv,
            runner.clone(),
        )
        .with_rc_root(root.path());

        assert!(!svc.has_start_links());
        svc.apply(&mut ctx()).unwrap();
        assert_eq!(runner.count("update-rc.d sachet defaults"), 1);
        assert_eq!(runner.count("service sachet start"), 0);

        fs::write(root.path().join("rc3.d/S20sachet"), "").unwrap();
        assert!(svc.has_start_links());
        assert_eq!(svc.current_state().unwrap(), svc.desired_state());
    }

    #[test]
    fn test_sysv_chkconfig_fallback() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new(|line| {
            if line.starts_with("which") || line.starts_with("service") {
                CommandOutput::failed("")
            } else {
                CommandOutput::ok("")
            }
        }));
        let svc = Service::new(
            "sachet",
            ServiceEnsure::Running,
            true,
            ServiceManager::Sysv,
            runner.clone(),
        )
        .with_rc_root(root.path());

        // `service sachet start` fails in this fake, after enablement
        assert!(svc.apply(&mut ctx()).is_err());
        assert_eq!(runner.count("chkconfig --add sachet"), 1);
        assert_eq!(runner.count("chkconfig sachet on"), 1);
    }
}

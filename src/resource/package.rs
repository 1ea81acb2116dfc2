//! OS package resource (apt, dnf, yum)

use anyhow::{Result, bail};
use declarative::{ApplyContext, ApplyResult, CommandRunner, Resource, ResourceState};
use std::fmt;
use std::sync::Arc;

use crate::runner::command_exists;

/// Which version of the package should be installed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageEnsure {
    /// Any installed version
    Present,
    /// The newest version the package manager offers
    Latest,
    /// Exactly this version (a distro revision suffix is accepted)
    Version(String),
}

impl PackageEnsure {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "present" | "installed" => Self::Present,
            "latest" => Self::Latest,
            version => Self::Version(version.to_string()),
        }
    }
}

impl fmt::Display for PackageEnsure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present => write!(f, "present"),
            Self::Latest => write!(f, "latest"),
            Self::Version(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Manager {
    Apt,
    Dnf,
    Yum,
}

impl Manager {
    fn detect(runner: &dyn CommandRunner) -> Result<Self> {
        if command_exists(runner, "apt-get") {
            Ok(Self::Apt)
        } else if command_exists(runner, "dnf") {
            Ok(Self::Dnf)
        } else if command_exists(runner, "yum") {
            Ok(Self::Yum)
        } else {
            bail!("No supported package manager found (apt-get, dnf, yum)")
        }
    }

    fn command(self) -> &'static str {
        match self {
            Self::Apt => "apt-get",
            Self::Dnf => "dnf",
            Self::Yum => "yum",
        }
    }
}

/// A package installed through the host package manager
pub struct Package {
    pub name: String,
    pub ensure: PackageEnsure,
    runner: Arc<dyn CommandRunner>,
}

impl Package {
    pub fn new(name: &str, ensure: PackageEnsure, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            name: name.to_string(),
            ensure,
            runner,
        }
    }

    fn installed_version(&self, manager: Manager) -> Result<Option<String>> {
        let output = match manager {
            Manager::Apt => self.runner.run(
                "dpkg-query",
                &["-W", "-f=${Status}\t${Version}", &self.name],
            )?,
            Manager::Dnf | Manager::Yum => self.runner.run(
                "rpm",
                &["-q", "--qf", "%{VERSION}-%{RELEASE}", &self.name],
            )?,
        };
        if !output.success {
            return Ok(None);
        }

        let stdout = output.stdout_str();
        let version = match manager {
            Manager::Apt => match stdout.trim().split_once('\t') {
                Some((status, version)) if status.ends_with(" installed") => version,
                _ => return Ok(None),
            },
            Manager::Dnf | Manager::Yum => stdout.trim(),
        };
        Ok((!version.is_empty()).then(|| version.to_string()))
    }

    /// Newest version available from the repositories, if it can be determined
    fn candidate_version(&self, manager: Manager) -> Result<Option<String>> {
        let output = match manager {
            Manager::Apt => self.runner.run("apt-cache", &["policy", &self.name])?,
            Manager::Dnf => self.runner.run(
                "dnf",
                &[
                    "-q",
                    "repoquery",
                    "--latest-limit",
                    "1",
                    "--qf",
                    "%{version}-%{release}",
                    &self.name,
                ],
            )?,
            Manager::Yum => self.runner.run(
                "repoquery",
                &["--qf", "%{version}-%{release}", &self.name],
            )?,
        };
        if !output.success {
            return Ok(None);
        }

        let stdout = output.stdout_str();
        let candidate = match manager {
            Manager::Apt => stdout
                .lines()
                .find_map(|l| l.trim().strip_prefix("Candidate:"))
                .map(str::trim)
                .filter(|v| *v != "(none)"),
            Manager::Dnf | Manager::Yum => stdout.lines().map(str::trim).find(|l| !l.is_empty()),
        };
        Ok(candidate.map(str::to_string))
    }

    /// The version to move to, or None when the installed one satisfies `ensure`
    fn wanted(&self, manager: Manager, installed: &str) -> Result<Option<String>> {
        match &self.ensure {
            PackageEnsure::Present => Ok(None),
            PackageEnsure::Version(want) => {
                if version_matches(installed, want) {
                    Ok(None)
                } else {
                    Ok(Some(want.clone()))
                }
            }
            PackageEnsure::Latest => Ok(self
                .candidate_version(manager)?
                .filter(|candidate| candidate != installed)),
        }
    }

    /// Full apt version for a pin, so "0.3.1" selects "0.3.1-1" from the repo
    fn apt_pin(&self, want: &str) -> Result<String> {
        let output = self.runner.run("apt-cache", &["madison", &self.name])?;
        if !output.success {
            return Ok(want.to_string());
        }
        let resolved = output
            .stdout_str()
            .lines()
            .filter_map(|l| l.split('|').nth(1))
            .map(str::trim)
            .find(|v| version_matches(v, want))
            .map_or_else(|| want.to_string(), str::to_string);
        Ok(resolved)
    }

    fn install(&self, manager: Manager, upgrade: bool) -> Result<()> {
        let spec = match (&self.ensure, manager) {
            (PackageEnsure::Version(v), Manager::Apt) => {
                format!("{}={}", self.name, self.apt_pin(v)?)
            }
            (PackageEnsure::Version(v), _) => format!("{}-{}", self.name, v),
            _ => self.name.clone(),
        };
        let verb = match (manager, upgrade, &self.ensure) {
            (Manager::Dnf | Manager::Yum, true, PackageEnsure::Latest) => "upgrade",
            _ => "install",
        };

        log::info!("{} {} {}", manager.command(), verb, spec);
        self.runner
            .run_capture(manager.command(), &[verb, "-y", &spec])?;
        Ok(())
    }
}

fn version_matches(installed: &str, want: &str) -> bool {
    installed == want
        || installed
            .strip_prefix(want)
            .is_some_and(|rest| rest.starts_with('-'))
}

impl fmt::Debug for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Package")
            .field("name", &self.name)
            .field("ensure", &self.ensure)
            .finish_non_exhaustive()
    }
}

impl Resource for Package {
    fn id(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        format!("Package {} ({})", self.name, self.ensure)
    }

    fn resource_type(&self) -> &'static str {
        "package"
    }

    fn current_state(&self) -> Result<ResourceState> {
        let manager = Manager::detect(self.runner.as_ref())?;
        let Some(installed) = self.installed_version(manager)? else {
            return Ok(ResourceState::Absent);
        };
        match self.wanted(manager, &installed)? {
            None => Ok(self.desired_state()),
            Some(target) => Ok(ResourceState::Modified {
                from: installed,
                to: target,
            }),
        }
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::Present {
            details: Some(self.ensure.to_string()),
        }
    }

    fn apply(&self, ctx: &mut ApplyContext) -> Result<ApplyResult> {
        let manager = Manager::detect(self.runner.as_ref())?;
        let installed = self.installed_version(manager)?;
        let pending = match &installed {
            None => true,
            Some(v) => self.wanted(manager, v)?.is_some(),
        };
        if !pending {
            return Ok(ApplyResult::NoChange);
        }
        if ctx.dry_run {
            return Ok(ApplyResult::Skipped {
                reason: "Dry run".to_string(),
            });
        }

        self.install(manager, installed.is_some())?;
        Ok(if installed.is_some() {
            ApplyResult::Modified
        } else {
            ApplyResult::Created
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::FakeRunner;
    use declarative::CommandOutput;

    /// An apt host with `installed` (if any) and `candidate` in the repos
    fn apt(installed: Option<&'static str>, candidate: &'static str) -> FakeRunner {
        FakeRunner::new(move |line| match line {
            "which apt-get" => CommandOutput::ok("/usr/bin/apt-get"),
            l if l.starts_with("which") => CommandOutput::failed(""),
            l if l.starts_with("dpkg-query") => match installed {
                Some(v) => CommandOutput::ok(format!("install ok installed\t{v}")),
                None => CommandOutput::failed("no packages found"),
            },
            l if l.starts_with("apt-cache policy") => CommandOutput::ok(format!(
                "sachet:\n  Installed: {}\n  Candidate: {candidate}\n",
                installed.unwrap_or("(none)")
            )),
            _ => CommandOutput::ok(""),
        })
    }

    fn ctx() -> ApplyContext {
        ApplyContext::new(false)
    }

    #[test]
    fn test_parse_ensure() {
        assert_eq!(PackageEnsure::parse("present"), PackageEnsure::Present);
        assert_eq!(PackageEnsure::parse("latest"), PackageEnsure::Latest);
        assert_eq!(
            PackageEnsure::parse("0.3.1"),
            PackageEnsure::Version("0.3.1".into())
        );
    }

    #[test]
    fn test_version_matches() {
        assert!(version_matches("0.3.1", "0.3.1"));
        assert!(version_matches("0.3.1-1", "0.3.1"));
        assert!(!version_matches("0.3.10", "0.3.1"));
    }

    #[test]
    fn test_missing_package_installed() {
        let runner = Arc::new(apt(None, "0.3.1-1"));
        let pkg = Package::new("sachet", PackageEnsure::Latest, runner.clone());

        assert_eq!(pkg.current_state().unwrap(), ResourceState::Absent);
        assert!(matches!(pkg.apply(&mut ctx()).unwrap(), ApplyResult::Created));
        assert_eq!(runner.count("apt-get install -y sachet"), 1);
    }

    #[test]
    fn test_latest_upgrades_when_candidate_newer() {
        let runner = Arc::new(apt(Some("0.3.0-1"), "0.3.1-1"));
        let pkg = Package::new("sachet", PackageEnsure::Latest, runner.clone());

        assert_eq!(
            pkg.current_state().unwrap(),
            ResourceState::Modified {
                from: "0.3.0-1".into(),
                to: "0.3.1-1".into(),
            }
        );
        assert!(matches!(pkg.apply(&mut ctx()).unwrap(), ApplyResult::Modified));
        assert_eq!(runner.count("apt-get install -y sachet"), 1);
    }

    #[test]
    fn test_latest_in_sync() {
        let runner = Arc::new(apt(Some("0.3.1-1"), "0.3.1-1"));
        let pkg = Package::new("sachet", PackageEnsure::Latest, runner.clone());
        assert_eq!(pkg.current_state().unwrap(), pkg.desired_state());
        assert!(matches!(pkg.apply(&mut ctx()).unwrap(), ApplyResult::NoChange));
        assert_eq!(runner.count("apt-get"), 0);
    }

    #[test]
    fn test_pinned_version() {
        let runner = Arc::new(apt(Some("0.3.0-1"), "0.3.1-1"));
        let pkg = Package::new(
            "sachet",
            PackageEnsure::Version("0.3.0".into()),
            runner.clone(),
        );
        assert_eq!(pkg.current_state().unwrap(), pkg.desired_state());

        let pkg = Package::new(
            "sachet",
            PackageEnsure::Version("0.2.0".into()),
            runner.clone(),
        );
        pkg.apply(&mut ctx()).unwrap();
        assert_eq!(runner.count("apt-get install -y sachet=0.2.0"), 1);
    }

    #[test]
    fn test_pinned_version_resolves_debian_revision() {
        let runner = Arc::new(FakeRunner::new(|line| match line {
            "which apt-get" => CommandOutput::ok("/usr/bin/apt-get"),
            l if l.starts_with("which") => CommandOutput::failed(""),
            l if l.starts_with("dpkg-query") => CommandOutput::failed("no packages found"),
            "apt-cache madison sachet" => CommandOutput::ok(
                "    sachet | 0.3.10-1 | http://deb.example.org stable/main amd64 Packages\n\
                 \x20   sachet |  0.3.1-2 | http://deb.example.org stable/main amd64 Packages\n",
            ),
            _ => CommandOutput::ok(""),
        }));
        let pkg = Package::new(
            "sachet",
            PackageEnsure::Version("0.3.1".into()),
            runner.clone(),
        );
        pkg.apply(&mut ctx()).unwrap();
        assert_eq!(runner.count("apt-get install -y sachet=0.3.1-2"), 1);
    }

    #[test]
    fn test_dnf_host() {
        let runner = Arc::new(FakeRunner::new(|line| match line {
            "which apt-get" => CommandOutput::failed(""),
            "which dnf" => CommandOutput::ok("/usr/bin/dnf"),
            l if l.starts_with("rpm -q") => CommandOutput::ok("0.3.0-1.el9"),
            l if l.starts_with("dnf -q repoquery") => CommandOutput::ok("0.3.1-1.el9\n"),
            _ => CommandOutput::ok(""),
        }));
        let pkg = Package::new("sachet", PackageEnsure::Latest, runner.clone());
        assert!(matches!(pkg.apply(&mut ctx()).unwrap(), ApplyResult::Modified));
        assert_eq!(runner.count("dnf upgrade -y sachet"), 1);
    }

    #[test]
    fn test_no_package_manager() {
        let runner = Arc::new(FakeRunner::new(|_| CommandOutput::failed("")));
        let pkg = Package::new("sachet", PackageEnsure::Present, runner);
        let err = pkg.current_state().unwrap_err();
        assert!(err.to_string().contains("No supported package manager"));
    }
}

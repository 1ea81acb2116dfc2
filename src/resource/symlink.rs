//! Symlink resource - points the binary on PATH at the installed release

use anyhow::{Context, Result, bail};
use declarative::{ApplyContext, ApplyResult, Resource, ResourceState};
use std::fs;
use std::path::{Path, PathBuf};

/// A symlink at `link` pointing to `source`
#[derive(Debug, Clone)]
pub struct Symlink {
    /// What the symlink points to
    pub source: PathBuf,
    /// Where the symlink is created
    pub link: PathBuf,
}

#[derive(Debug)]
enum SymlinkState {
    Missing,
    Correct,
    WrongTarget(PathBuf),
    FileExists,
}

impl Symlink {
    pub fn new(source: impl AsRef<Path>, link: impl AsRef<Path>) -> Self {
        Self {
            source: source.as_ref().to_path_buf(),
            link: link.as_ref().to_path_buf(),
        }
    }

    fn check_current(&self) -> Result<SymlinkState> {
        let meta = match fs::symlink_metadata(&self.link) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(SymlinkState::Missing);
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to stat {}", self.link.display()));
            }
        };

        if !meta.file_type().is_symlink() {
            return Ok(SymlinkState::FileExists);
        }

        let target = fs::read_link(&self.link)
            .with_context(|| format!("Failed to read symlink {}", self.link.display()))?;
        let actual = if target.is_absolute() {
            target
        } else {
            self.link
                .parent()
                .map_or_else(|| target.clone(), |p| p.join(&target))
        };

        if actual == self.source {
            Ok(SymlinkState::Correct)
        } else {
            Ok(SymlinkState::WrongTarget(actual))
        }
    }

    fn create_symlink(&self, replace: bool) -> Result<()> {
        if let Some(parent) = self.link.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create parent directory: {}", parent.display())
            })?;
        }

        if replace {
            fs::remove_file(&self.link).with_context(|| {
                format!("Failed to remove existing {}", self.link.display())
            })?;
        }

        std::os::unix::fs::symlink(&self.source, &self.link).with_context(|| {
            format!(
                "Failed to create symlink: {} -> {}",
                self.link.display(),
                self.source.display()
            )
        })
    }
}

impl Resource for Symlink {
    fn id(&self) -> String {
        self.link.display().to_string()
    }

    fn description(&self) -> String {
        format!("Symlink {} -> {}", self.link.display(), self.source.display())
    }

    fn resource_type(&self) -> &'static str {
        "symlink"
    }

    fn current_state(&self) -> Result<ResourceState> {
        match self.check_current()? {
            SymlinkState::Missing => Ok(ResourceState::Absent),
            SymlinkState::Correct => Ok(self.desired_state()),
            SymlinkState::WrongTarget(actual) => Ok(ResourceState::Modified {
                from: format!("-> {}", actual.display()),
                to: format!("-> {}", self.source.display()),
            }),
            SymlinkState::FileExists => Ok(ResourceState::Modified {
                from: "regular file".to_string(),
                to: format!("-> {}", self.source.display()),
            }),
        }
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::Present {
            details: Some(format!("-> {}", self.source.display())),
        }
    }

    fn apply(&self, ctx: &mut ApplyContext) -> Result<ApplyResult> {
        let state = self.check_current()?;
        if matches!(state, SymlinkState::Correct) {
            return Ok(ApplyResult::NoChange);
        }
        if ctx.dry_run {
            return Ok(ApplyResult::Skipped {
                reason: "Dry run".to_string(),
            });
        }

        match state {
            SymlinkState::Correct => Ok(ApplyResult::NoChange),
            SymlinkState::Missing => {
                log::info!("Linking {} -> {}", self.link.display(), self.source.display());
                self.create_symlink(false)?;
                Ok(ApplyResult::Created)
            }
            SymlinkState::WrongTarget(_) | SymlinkState::FileExists => {
                if self.link.is_dir() && !self.link.is_symlink() {
                    bail!("{} is a directory", self.link.display());
                }
                log::info!("Relinking {} -> {}", self.link.display(), self.source.display());
                self.create_symlink(true)?;
                Ok(ApplyResult::Modified)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ApplyContext {
        ApplyContext::new(false)
    }

    #[test]
    fn test_create_and_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("opt/sachet-1.0.0/sachet");
        let link = tmp.path().join("bin/sachet");
        let symlink = Symlink::new(&source, &link);

        assert_eq!(symlink.current_state().unwrap(), ResourceState::Absent);
        assert!(matches!(symlink.apply(&mut ctx()).unwrap(), ApplyResult::Created));
        assert_eq!(fs::read_link(&link).unwrap(), source);
        assert!(matches!(symlink.apply(&mut ctx()).unwrap(), ApplyResult::NoChange));
    }

    #[test]
    fn test_retargets_on_version_change() {
        let tmp = tempfile::tempdir().unwrap();
        let link = tmp.path().join("sachet");
        std::os::unix::fs::symlink(tmp.path().join("old"), &link).unwrap();

        let symlink = Symlink::new(tmp.path().join("new"), &link);
        assert!(matches!(
            symlink.current_state().unwrap(),
            ResourceState::Modified { .. }
        ));
        assert!(matches!(symlink.apply(&mut ctx()).unwrap(), ApplyResult::Modified));
        assert_eq!(fs::read_link(&link).unwrap(), tmp.path().join("new"));
    }

    #[test]
    fn test_replaces_regular_file() {
        let tmp = tempfile::tempdir().unwrap();
        let link = tmp.path().join("sachet");
        fs::write(&link, "stale binary").unwrap();

        let symlink = Symlink::new(tmp.path().join("release/sachet"), &link);
        assert_eq!(
            symlink.current_state().unwrap(),
            ResourceState::Modified {
                from: "regular file".into(),
                to: format!("-> {}", tmp.path().join("release/sachet").display()),
            }
        );
        symlink.apply(&mut ctx()).unwrap();
        assert!(link.is_symlink());
    }

    #[test]
    fn test_relative_link_resolved() {
        let tmp = tempfile::tempdir().unwrap();
        let link = tmp.path().join("sachet");
        std::os::unix::fs::symlink("release/sachet", &link).unwrap();

        let symlink = Symlink::new(tmp.path().join("release/sachet"), &link);
        assert_eq!(symlink.current_state().unwrap(), symlink.desired_state());
    }
}

//! Managed directory resource, with optional purge of unmanaged entries

use anyhow::{Context, Result, bail};
use declarative::{ApplyContext, ApplyResult, Resource, ResourceState};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::Attributes;

/// A directory with ownership and mode
///
/// With purge enabled, every direct child not in the keep set is removed,
/// recursively for subdirectories.
#[derive(Debug, Clone)]
pub struct Directory {
    pub path: PathBuf,
    pub attrs: Attributes,
    /// Direct children to keep; `None` disables purging
    keep: Option<BTreeSet<PathBuf>>,
}

impl Directory {
    pub fn new(path: impl AsRef<Path>, attrs: Attributes) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            attrs,
            keep: None,
        }
    }

    /// Enable purging, keeping the given paths
    ///
    /// Paths nested deeper than one level keep their top-level ancestor.
    /// Paths outside the directory are ignored.
    pub fn purge_except<I, P>(mut self, managed: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let keep = managed
            .into_iter()
            .filter_map(|p| {
                let rel = p.as_ref().strip_prefix(&self.path).ok()?;
                let first = rel.components().next()?;
                Some(self.path.join(first))
            })
            .collect();
        self.keep = Some(keep);
        self
    }

    pub fn purges(&self) -> bool {
        self.keep.is_some()
    }

    /// Direct children that a purge would remove, sorted by name
    pub fn unmanaged_entries(&self) -> Result<Vec<PathBuf>> {
        let Some(keep) = &self.keep else {
            return Ok(Vec::new());
        };
        if !self.path.is_dir() {
            return Ok(Vec::new());
        }

        let mut strays = Vec::new();
        for entry in WalkDir::new(&self.path)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry =
                entry.with_context(|| format!("Failed to scan {}", self.path.display()))?;
            if !keep.contains(entry.path()) {
                strays.push(entry.into_path());
            }
        }
        Ok(strays)
    }

    fn purge(&self, strays: &[PathBuf]) -> Result<()> {
        for stray in strays {
            log::info!("Purging unmanaged {}", stray.display());
            let meta = fs::symlink_metadata(stray)
                .with_context(|| format!("Failed to stat {}", stray.display()))?;
            let removed = if meta.is_dir() {
                fs::remove_dir_all(stray)
            } else {
                fs::remove_file(stray)
            };
            removed.with_context(|| format!("Failed to remove {}", stray.display()))?;
        }
        Ok(())
    }

    fn metadata(&self) -> Result<Option<fs::Metadata>> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(Some(meta)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to stat {}", self.path.display()))
            }
        }
    }
}

impl Resource for Directory {
    fn id(&self) -> String {
        self.path.display().to_string()
    }

    fn description(&self) -> String {
        if self.purges() {
            format!("Directory {} (purged)", self.path.display())
        } else {
            format!("Directory {}", self.path.display())
        }
    }

    fn resource_type(&self) -> &'static str {
        "directory"
    }

    fn current_state(&self) -> Result<ResourceState> {
        let Some(meta) = self.metadata()? else {
            return Ok(ResourceState::Absent);
        };
        if !meta.is_dir() {
            return Ok(ResourceState::Modified {
                from: "not a directory".to_string(),
                to: self.attrs.describe(),
            });
        }

        let attrs_ok = self.attrs.matches(&meta)?;
        let strays = self.unmanaged_entries()?;
        if attrs_ok && strays.is_empty() {
            return Ok(self.desired_state());
        }

        let mut from = Attributes::describe_actual(&meta);
        if !strays.is_empty() {
            from.push_str(&format!(", {} unmanaged", strays.len()));
        }
        Ok(ResourceState::Modified {
            from,
            to: self.attrs.describe(),
        })
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::Present {
            details: Some(self.attrs.describe()),
        }
    }

    fn apply(&self, ctx: &mut ApplyContext) -> Result<ApplyResult> {
        let meta = self.metadata()?;
        if let Some(meta) = &meta
            && !meta.is_dir()
        {
            bail!("{} exists and is not a directory", self.path.display());
        }

        let strays = self.unmanaged_entries()?;
        let attrs_ok = match &meta {
            Some(m) => self.attrs.matches(m)?,
            None => false,
        };
        if meta.is_some() && attrs_ok && strays.is_empty() {
            return Ok(ApplyResult::NoChange);
        }
        if ctx.dry_run {
            return Ok(ApplyResult::Skipped {
                reason: "Dry run".to_string(),
            });
        }

        if meta.is_none() {
            log::info!("Creating directory {}", self.path.display());
            fs::create_dir_all(&self.path)
                .with_context(|| format!("Failed to create {}", self.path.display()))?;
        }
        if !attrs_ok {
            self.attrs.apply(&self.path)?;
        }
        self.purge(&strays)?;

        Ok(if meta.is_none() {
            ApplyResult::Created
        } else {
            ApplyResult::Modified
        })
    }

    fn detail_diff(&self) -> Result<Option<String>> {
        let strays = self.unmanaged_entries()?;
        if strays.is_empty() {
            return Ok(None);
        }
        let lines: Vec<String> = strays
            .iter()
            .map(|p| format!("-{}", p.display()))
            .collect();
        Ok(Some(lines.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::current_user_and_group;

    fn attrs(mode: u32) -> Attributes {
        let (user, group) = current_user_and_group();
        Attributes::new(&user, &group, mode)
    }

    fn ctx() -> ApplyContext {
        ApplyContext::new(false)
    }

    #[test]
    fn test_creates_missing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Directory::new(tmp.path().join("conf"), attrs(0o750));

        assert_eq!(dir.current_state().unwrap(), ResourceState::Absent);
        assert!(matches!(dir.apply(&mut ctx()).unwrap(), ApplyResult::Created));
        assert_eq!(dir.current_state().unwrap(), dir.desired_state());
        assert!(matches!(dir.apply(&mut ctx()).unwrap(), ApplyResult::NoChange));
    }

    #[test]
    fn test_purge_removes_only_unmanaged() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("conf");
        fs::create_dir_all(root.join("templates")).unwrap();
        fs::create_dir_all(root.join("old.d/nested")).unwrap();
        fs::write(root.join("sachet.yaml"), "x").unwrap();
        fs::write(root.join("stray.yaml"), "x").unwrap();
        fs::write(root.join("old.d/nested/f"), "x").unwrap();

        let dir = Directory::new(&root, attrs(0o750)).purge_except([
            root.join("sachet.yaml"),
            root.join("templates").join("a.tmpl"),
            PathBuf::from("/elsewhere/file"),
        ]);

        assert_eq!(
            dir.unmanaged_entries().unwrap(),
            vec![root.join("old.d"), root.join("stray.yaml")]
        );
        assert!(matches!(
            dir.current_state().unwrap(),
            ResourceState::Modified { .. }
        ));
        let detail = dir.detail_diff().unwrap().unwrap();
        assert!(detail.contains("stray.yaml"));

        dir.apply(&mut ctx()).unwrap();
        assert!(root.join("sachet.yaml").exists());
        assert!(root.join("templates").is_dir());
        assert!(!root.join("stray.yaml").exists());
        assert!(!root.join("old.d").exists());
        assert_eq!(dir.current_state().unwrap(), dir.desired_state());
    }

    #[test]
    fn test_no_purge_leaves_extras() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("keep-me"), "x").unwrap();
        let dir = Directory::new(tmp.path(), attrs(0o755));
        dir.apply(&mut ctx()).unwrap();
        assert!(tmp.path().join("keep-me").exists());
        assert!(dir.detail_diff().unwrap().is_none());
    }

    #[test]
    fn test_mode_drift_repaired() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("d");
        fs::create_dir(&path).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o777)).unwrap();

        let dir = Directory::new(&path, attrs(0o750));
        assert!(matches!(
            dir.current_state().unwrap(),
            ResourceState::Modified { .. }
        ));
        assert!(matches!(dir.apply(&mut ctx()).unwrap(), ApplyResult::Modified));
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o750);
    }

    #[test]
    fn test_file_in_the_way_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("f");
        fs::write(&path, "x").unwrap();
        let dir = Directory::new(&path, attrs(0o750));
        assert!(dir.apply(&mut ctx()).is_err());
    }
}

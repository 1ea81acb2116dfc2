//! Managed file resource: exact content, ownership, mode

use anyhow::{Context, Result, bail};
use declarative::{ApplyContext, ApplyResult, Resource, ResourceState};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::Attributes;

/// A file whose content and attributes are fully declared
#[derive(Debug, Clone)]
pub struct ManagedFile {
    /// Resource type reported to the graph ("file", "template", "unit")
    kind: &'static str,
    pub path: PathBuf,
    pub content: String,
    pub attrs: Attributes,
}

/// What is on disk at the file's path
enum OnDisk {
    Missing,
    NotAFile,
    File { content: Vec<u8>, meta: fs::Metadata },
}

impl ManagedFile {
    pub fn new(
        kind: &'static str,
        path: impl AsRef<Path>,
        content: impl Into<String>,
        attrs: Attributes,
    ) -> Self {
        Self {
            kind,
            path: path.as_ref().to_path_buf(),
            content: content.into(),
            attrs,
        }
    }

    fn details(&self) -> String {
        format!("{} {}", short_digest(self.content.as_bytes()), self.attrs.describe())
    }

    fn read(&self) -> Result<OnDisk> {
        let meta = match fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(OnDisk::Missing),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to stat {}", self.path.display()));
            }
        };
        if !meta.is_file() {
            return Ok(OnDisk::NotAFile);
        }
        let content = fs::read(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        Ok(OnDisk::File { content, meta })
    }
}

impl Resource for ManagedFile {
    fn id(&self) -> String {
        self.path.display().to_string()
    }

    fn description(&self) -> String {
        format!("{} {}", capitalize(self.kind), self.path.display())
    }

    fn resource_type(&self) -> &'static str {
        self.kind
    }

    fn current_state(&self) -> Result<ResourceState> {
        match self.read()? {
            OnDisk::Missing => Ok(ResourceState::Absent),
            OnDisk::NotAFile => Ok(ResourceState::Modified {
                from: "not a regular file".to_string(),
                to: self.details(),
            }),
            OnDisk::File { content, meta } => {
                if content == self.content.as_bytes() && self.attrs.matches(&meta)? {
                    Ok(self.desired_state())
                } else {
                    Ok(ResourceState::Modified {
                        from: format!(
                            "{} {}",
                            short_digest(&content),
                            Attributes::describe_actual(&meta)
                        ),
                        to: self.details(),
                    })
                }
            }
        }
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::Present {
            details: Some(self.details()),
        }
    }

    fn apply(&self, ctx: &mut ApplyContext) -> Result<ApplyResult> {
        let (created, content_ok, attrs_ok) = match self.read()? {
            OnDisk::Missing => (true, false, false),
            OnDisk::NotAFile => bail!("{} exists and is not a regular file", self.path.display()),
            OnDisk::File { content, meta } => (
                false,
                content == self.content.as_bytes(),
                self.attrs.matches(&meta)?,
            ),
        };
        if content_ok && attrs_ok {
            return Ok(ApplyResult::NoChange);
        }
        if ctx.dry_run {
            return Ok(ApplyResult::Skipped {
                reason: "Dry run".to_string(),
            });
        }

        if content_ok {
            log::info!("Fixing ownership/mode of {}", self.path.display());
            self.attrs.apply(&self.path)?;
        } else {
            log::info!("Writing {}", self.path.display());
            write_atomic(&self.path, self.content.as_bytes(), &self.attrs)?;
        }

        Ok(if created {
            ApplyResult::Created
        } else {
            ApplyResult::Modified
        })
    }

    fn detail_diff(&self) -> Result<Option<String>> {
        let old = match self.read()? {
            OnDisk::File { content, .. } => String::from_utf8_lossy(&content).into_owned(),
            _ => String::new(),
        };
        if old == self.content {
            return Ok(None);
        }
        let path = self.path.display().to_string();
        let diff = similar::TextDiff::from_lines(&old, &self.content);
        let rendered = diff
            .unified_diff()
            .context_radius(3)
            .header(&path, &path)
            .to_string();
        Ok(Some(rendered))
    }
}

/// Write `bytes` to `path` through a sibling temp file and a rename
///
/// Attributes are set on the temp file, so the final path never exists
/// with the wrong owner or mode.
pub fn write_atomic(path: &Path, bytes: &[u8], attrs: &Attributes) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    let name = path
        .file_name()
        .with_context(|| format!("{} has no file name", path.display()))?;
    let tmp = parent.join(format!(".{}.sachet-converge.tmp", name.to_string_lossy()));

    let result = (|| -> Result<()> {
        let mut file = fs::File::create(&tmp)
            .with_context(|| format!("Failed to create {}", tmp.display()))?;
        file.write_all(bytes)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        file.sync_all()
            .with_context(|| format!("Failed to sync {}", tmp.display()))?;
        attrs.apply(&tmp)?;
        fs::rename(&tmp, path).with_context(|| {
            format!("Failed to move {} into place at {}", tmp.display(), path.display())
        })
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// First 12 hex chars of the blake3 digest
pub fn short_digest(bytes: &[u8]) -> String {
    let hex = blake3::hash(bytes).to_hex();
    hex.as_str()[..12].to_string()
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

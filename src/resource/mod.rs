//! Concrete resources for converging a Sachet host
//!
//! Every resource implements `declarative::Resource`. Filesystem resources
//! share `Attributes` for ownership and mode; process-backed resources go
//! through an injected `CommandRunner`.

use anyhow::{Context, Result, anyhow};
use nix::unistd::{Gid, Group, Uid, User, chown};
use std::fs::{self, Metadata, Permissions};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

pub mod archive;
pub mod directory;
pub mod file;
pub mod group;
pub mod package;
pub mod reload;
pub mod service;
pub mod symlink;
pub mod user;

pub use archive::{Fetcher, HttpFetcher, ReleaseArchive};
pub use directory::Directory;
pub use file::ManagedFile;
pub use group::SystemGroup;
pub use package::{Package, PackageEnsure};
pub use reload::SystemdReload;
pub use service::Service;
pub use symlink::Symlink;
pub use user::SystemUser;

/// Ownership and permission bits of a managed path
///
/// `None` for owner or group leaves that part untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attributes {
    pub owner: Option<String>,
    pub group: Option<String>,
    pub mode: u32,
}

impl Attributes {
    pub fn new(owner: &str, group: &str, mode: u32) -> Self {
        Self {
            owner: Some(owner.to_string()),
            group: Some(group.to_string()),
            mode,
        }
    }

    pub fn with_mode(mode: u32) -> Self {
        Self {
            owner: None,
            group: None,
            mode,
        }
    }

    /// `owner:group mode`, e.g. `root:sachet 0640`
    pub fn describe(&self) -> String {
        format!(
            "{}:{} {:04o}",
            self.owner.as_deref().unwrap_or("-"),
            self.group.as_deref().unwrap_or("-"),
            self.mode
        )
    }

    /// Same format as `describe`, for what is on disk
    pub fn describe_actual(meta: &Metadata) -> String {
        format!(
            "{}:{} {:04o}",
            user_name(meta.uid()),
            group_name(meta.gid()),
            meta.mode() & 0o7777
        )
    }

    /// Whether the metadata already carries these attributes
    ///
    /// An owner or group that does not exist yet never matches.
    pub fn matches(&self, meta: &Metadata) -> Result<bool> {
        if meta.mode() & 0o7777 != self.mode {
            return Ok(false);
        }
        if let Some(owner) = &self.owner {
            match lookup_uid(owner)? {
                Some(uid) if uid.as_raw() == meta.uid() => {}
                _ => return Ok(false),
            }
        }
        if let Some(group) = &self.group {
            match lookup_gid(group)? {
                Some(gid) if gid.as_raw() == meta.gid() => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Set ownership and mode on `path`
    pub fn apply(&self, path: &Path) -> Result<()> {
        let uid = match &self.owner {
            Some(name) => Some(
                lookup_uid(name)?.ok_or_else(|| anyhow!("user '{name}' does not exist"))?,
            ),
            None => None,
        };
        let gid = match &self.group {
            Some(name) => Some(
                lookup_gid(name)?.ok_or_else(|| anyhow!("group '{name}' does not exist"))?,
            ),
            None => None,
        };

        if uid.is_some() || gid.is_some() {
            chown(path, uid, gid)
                .with_context(|| format!("Failed to chown {}", path.display()))?;
        }
        fs::set_permissions(path, Permissions::from_mode(self.mode))
            .with_context(|| format!("Failed to set mode on {}", path.display()))?;
        Ok(())
    }
}

pub(crate) fn lookup_uid(name: &str) -> Result<Option<Uid>> {
    let user = User::from_name(name).with_context(|| format!("Failed to look up user '{name}'"))?;
    Ok(user.map(|u| u.uid))
}

pub(crate) fn lookup_gid(name: &str) -> Result<Option<Gid>> {
    let group =
        Group::from_name(name).with_context(|| format!("Failed to look up group '{name}'"))?;
    Ok(group.map(|g| g.gid))
}

fn user_name(uid: u32) -> String {
    match User::from_uid(Uid::from_raw(uid)) {
        Ok(Some(user)) => user.name,
        _ => uid.to_string(),
    }
}

fn group_name(gid: u32) -> String {
    match Group::from_gid(Gid::from_raw(gid)) {
        Ok(Some(group)) => group.name,
        _ => gid.to_string(),
    }
}

/// Names of the user and group running the tests
#[cfg(test)]
pub(crate) fn current_user_and_group() -> (String, String) {
    let user = User::from_uid(nix::unistd::getuid()).unwrap().unwrap();
    let group = Group::from_gid(nix::unistd::getgid()).unwrap().unwrap();
    (user.name, group.name)
}

//! Resource trait for declarative state management
//!
//! A Resource represents something that can be in a certain state,
//! and can be changed to reach a desired state.

use crate::context::ApplyContext;
use crate::types::{ApplyResult, ResourceState};
use anyhow::Result;
use std::fmt;

/// Core trait for declarative resources
///
/// Every resource in the system implements this trait, which provides:
/// - Identity (id, description, type)
/// - State detection (current vs desired)
/// - State convergence (apply)
/// - Reaction to notifications (refresh)
///
/// # Example
///
/// ```ignore
/// use declarative::{Resource, ResourceState, ApplyResult, ApplyContext};
///
/// #[derive(Debug)]
/// struct Marker {
///     path: String,
/// }
///
/// impl Resource for Marker {
///     fn id(&self) -> String {
///         self.path.clone()
///     }
///
///     fn description(&self) -> String {
///         format!("Ensure marker exists at {}", self.path)
///     }
///
///     fn resource_type(&self) -> &'static str {
///         "marker"
///     }
///
///     fn current_state(&self) -> Result<ResourceState> {
///         if std::path::Path::new(&self.path).exists() {
///             Ok(ResourceState::Present { details: None })
///         } else {
///             Ok(ResourceState::Absent)
///         }
///     }
///
///     fn desired_state(&self) -> ResourceState {
///         ResourceState::Present { details: None }
///     }
///
///     fn apply(&self, ctx: &mut ApplyContext) -> Result<ApplyResult> {
///         if ctx.dry_run {
///             return Ok(ApplyResult::Skipped { reason: "Dry run".into() });
///         }
///         std::fs::write(&self.path, "")?;
///         Ok(ApplyResult::Created)
///     }
/// }
/// ```
pub trait Resource: Send + Sync + fmt::Debug {
    /// Identifier for this resource, unique within its type
    ///
    /// Examples:
    /// - "sachet" for a group or user
    /// - "/etc/sachet/sachet.yaml" for a file
    fn id(&self) -> String;

    /// Human-readable description of what this resource does
    fn description(&self) -> String;

    /// Resource type category
    ///
    /// Used for grouping, filtering, and the graph key. Examples:
    /// - "group", "user"
    /// - "directory", "file", "template"
    /// - "service"
    fn resource_type(&self) -> &'static str;

    /// Detect the current state of this resource
    ///
    /// This should query the system to determine what state
    /// the resource is currently in.
    fn current_state(&self) -> Result<ResourceState>;

    /// Get the desired state for this resource
    ///
    /// This is typically derived from configuration.
    fn desired_state(&self) -> ResourceState;

    /// Apply changes to reach the desired state
    ///
    /// This method should:
    /// 1. Check if already in desired state (return NoChange)
    /// 2. Respect ctx.dry_run (return Skipped if true)
    /// 3. Make the necessary changes
    /// 4. Return the appropriate ApplyResult
    fn apply(&self, ctx: &mut ApplyContext) -> Result<ApplyResult>;

    /// React to a notification from a changed upstream resource
    ///
    /// Called at most once per run, after `apply`. Services restart here.
    fn refresh(&self, _ctx: &mut ApplyContext) -> Result<ApplyResult> {
        Ok(ApplyResult::Skipped {
            reason: format!("{} does not support refresh", self.resource_type()),
        })
    }

    /// Whether the result of `apply` already covers a pending refresh
    ///
    /// By default any change absorbs the refresh. A service that was only
    /// enabled, not started, still needs its restart.
    fn absorbs_refresh(&self, result: &ApplyResult) -> bool {
        result.is_change()
    }

    /// Whether this resource only acts when notified
    ///
    /// Refresh-only resources are never applied and never show up in diffs.
    fn refresh_only(&self) -> bool {
        false
    }

    /// Optional detailed rendering of the pending change (e.g. a content diff)
    fn detail_diff(&self) -> Result<Option<String>> {
        Ok(None)
    }
}

/// A boxed resource for type-erased storage
pub type BoxedResource = Box<dyn Resource>;

/// Extension trait for working with resources
pub trait ResourceExt {
    /// Graph key: `<type>:<id>`
    fn key(&self) -> String;
}

impl<R: Resource + ?Sized> ResourceExt for R {
    fn key(&self) -> String {
        format!("{}:{}", self.resource_type(), self.id())
    }
}

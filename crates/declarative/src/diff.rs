//! Diff computation for resources

use crate::graph::ResourceGraph;
use crate::resource::{Resource, ResourceExt};
use crate::types::ResourceState;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// A diff between current and desired state of a resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDiff {
    /// Graph key of the resource (`<type>:<id>`)
    pub key: String,
    /// Identifier of the resource within its type
    pub resource_id: String,
    /// Type of the resource
    pub resource_type: String,
    /// Human-readable description
    pub description: String,
    /// Current state
    pub current: ResourceState,
    /// Desired state
    pub desired: ResourceState,
    /// Detailed rendering of the change, when the resource provides one
    pub detail: Option<String>,
}

impl ResourceDiff {
    /// Create a diff from a resource, returning None if no changes needed
    pub fn from_resource(resource: &dyn Resource) -> Result<Option<Self>> {
        let current = resource.current_state()?;
        let desired = resource.desired_state();

        if current == desired {
            return Ok(None);
        }

        Ok(Some(Self::new(resource, current, desired)))
    }

    fn new(resource: &dyn Resource, current: ResourceState, desired: ResourceState) -> Self {
        Self {
            key: resource.key(),
            resource_id: resource.id(),
            resource_type: resource.resource_type().to_string(),
            description: resource.description(),
            current,
            desired,
            detail: resource.detail_diff().ok().flatten(),
        }
    }

    /// Check if this diff represents an addition
    pub fn is_addition(&self) -> bool {
        matches!(
            (&self.current, &self.desired),
            (ResourceState::Absent, ResourceState::Present { .. })
        )
    }

    /// Check if this diff represents a removal
    pub fn is_removal(&self) -> bool {
        matches!(
            (&self.current, &self.desired),
            (ResourceState::Present { .. }, ResourceState::Absent)
        )
    }
}

/// Compute diffs for every resource in the graph, in topological order
///
/// Refresh-only resources never produce a diff. A resource whose state
/// cannot be probed is reported with `ResourceState::Unknown`.
pub fn compute_diffs(graph: &ResourceGraph) -> Result<Vec<ResourceDiff>> {
    let mut diffs = Vec::new();
    for id in graph.topo_order()? {
        let resource = graph.resource(id);
        if resource.refresh_only() {
            continue;
        }
        match ResourceDiff::from_resource(resource) {
            Ok(Some(diff)) => diffs.push(diff),
            Ok(None) => {}
            Err(e) => {
                log::warn!("Could not determine state of {}: {:#}", resource.key(), e);
                diffs.push(ResourceDiff::new(
                    resource,
                    ResourceState::Unknown,
                    resource.desired_state(),
                ));
            }
        }
    }
    Ok(diffs)
}

/// Diff summary statistics
#[derive(Debug, Clone, Default)]
pub struct DiffSummary {
    /// Number of resources to add
    pub additions: usize,
    /// Number of resources to remove
    pub removals: usize,
    /// Number of resources to modify
    pub modifications: usize,
    /// Number of resources whose state is unknown
    pub unknown: usize,
}

impl DiffSummary {
    /// Create a summary from a list of diffs
    pub fn from_diffs(diffs: &[ResourceDiff]) -> Self {
        let mut summary = Self::default();
        for diff in diffs {
            if diff.current == ResourceState::Unknown {
                summary.unknown += 1;
            } else if diff.is_addition() {
                summary.additions += 1;
            } else if diff.is_removal() {
                summary.removals += 1;
            } else {
                summary.modifications += 1;
            }
        }
        summary
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.additions + self.removals + self.modifications + self.unknown
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

/// Group diffs by resource type, preserving first-seen order of types
pub fn group_by_type(diffs: &[ResourceDiff]) -> Vec<(String, Vec<&ResourceDiff>)> {
    let mut groups: Vec<(String, Vec<&ResourceDiff>)> = Vec::new();
    for diff in diffs {
        match groups.iter_mut().find(|(t, _)| *t == diff.resource_type) {
            Some((_, group)) => group.push(diff),
            None => groups.push((diff.resource_type.clone(), vec![diff])),
        }
    }
    groups
}

//! # Declarative
//!
//! A framework for declarative resource management.
//!
//! This crate provides the core abstractions for declaring desired state,
//! detecting current state, and converging systems to match the desired state.
//!
//! ## Core Concepts
//!
//! - **Resource**: Something with state that can be managed (files, packages, services)
//! - **ResourceState**: The current or desired state of a resource
//! - **ResourceGraph**: Resources plus explicit `require` and `notify` edges
//! - **Executor**: Applies the graph in topological order, skipping dependents
//!   of failures and delivering each refresh at most once
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{ExecuteOptions, ResourceGraph, execute_simple};
//!
//! let mut graph = ResourceGraph::new();
//! let dir = graph.add(Box::new(Directory::new("/etc/app")))?;
//! let conf = graph.add(Box::new(ManagedFile::new("/etc/app/app.yaml", body)))?;
//! let svc = graph.add(Box::new(Service::new("app")))?;
//! graph.require(dir, conf)?;
//! graph.notify(conf, svc)?;
//!
//! let summary = execute_simple(&graph, &ExecuteOptions::default())?;
//! ```
//!
//! ## Provider Traits
//!
//! The crate uses traits for dependency injection:
//!
//! - [`CommandRunner`]: Runs external commands for process-backed resources
//! - [`ProgressCallback`]: Receives the plan and progress updates
//! - [`ConfirmCallback`]: Handles user confirmations
//!
//! This allows the crate to be used without hard dependencies on
//! specific UI frameworks or process execution.

pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod graph;
pub mod resource;
pub mod types;

// Re-export main types at crate root
pub use context::{
    ApplyContext, AutoConfirm, AutoDecline, CommandRunner, ConfirmCallback, NoProgress,
    ProgressCallback,
};
pub use diff::{DiffSummary, ResourceDiff, compute_diffs, group_by_type};
pub use error::GraphError;
pub use executor::{execute, execute_simple};
pub use graph::{EdgeKind, NodeId, ResourceGraph};
pub use resource::{BoxedResource, Resource, ResourceExt};
pub use types::{ApplyResult, CommandOutput, ExecuteOptions, ExecuteSummary, ResourceState};

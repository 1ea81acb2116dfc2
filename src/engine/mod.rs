//! Convergence engine
//!
//! 1. Planning - build the resource graph from the config
//! 2. Diffing - compare current and desired state, show the plan
//! 3. Executing - apply in dependency order, deliver restarts once

pub mod differ;
pub mod executor;
pub mod planner;


pub use executor::{ApplyOptions, apply};
pub use planner::build_graph;

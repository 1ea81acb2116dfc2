//! Resource graph - resources as nodes, ordering and notification as edges

use crate::error::GraphError;
use crate::resource::{BoxedResource, Resource, ResourceExt};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};

/// Handle to a node in a [`ResourceGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    /// Insertion index of the node
    pub fn index(self) -> usize {
        self.0
    }
}

/// Kind of dependency between two resources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// `from` is applied before `to`; `to` is skipped if `from` fails
    Require,
    /// Like `Require`, and a change in `from` refreshes `to`
    Notify,
}

/// A directed acyclic graph of resources
///
/// Nodes keep insertion order, which is also the tie-breaker for
/// topological ordering, so plans are deterministic.
#[derive(Default)]
pub struct ResourceGraph {
    nodes: Vec<BoxedResource>,
    keys: HashMap<String, NodeId>,
    edges: BTreeMap<(usize, usize), EdgeKind>,
}

impl ResourceGraph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource, rejecting duplicate keys
    pub fn add(&mut self, resource: BoxedResource) -> Result<NodeId, GraphError> {
        let key = resource.key();
        if self.keys.contains_key(&key) {
            return Err(GraphError::DuplicateResource(key));
        }
        let id = NodeId(self.nodes.len());
        self.keys.insert(key, id);
        self.nodes.push(resource);
        Ok(id)
    }

    /// Declare that `before` must be applied before `after`
    pub fn require(&mut self, before: NodeId, after: NodeId) -> Result<(), GraphError> {
        self.add_edge(before, after, EdgeKind::Require)
    }

    /// Declare that `source` is applied before `target` and that a change
    /// in `source` refreshes `target`
    pub fn notify(&mut self, source: NodeId, target: NodeId) -> Result<(), GraphError> {
        self.add_edge(source, target, EdgeKind::Notify)
    }

    fn add_edge(&mut self, from: NodeId, to: NodeId, kind: EdgeKind) -> Result<(), GraphError> {
        for id in [from, to] {
            if id.0 >= self.nodes.len() {
                return Err(GraphError::UnknownNode(id.0));
            }
        }
        if from == to {
            return Err(GraphError::Cycle(vec![self.nodes[from.0].key()]));
        }
        // Notify subsumes require
        self.edges
            .entry((from.0, to.0))
            .and_modify(|existing| {
                if kind == EdgeKind::Notify {
                    *existing = EdgeKind::Notify;
                }
            })
            .or_insert(kind);
        Ok(())
    }

    /// Look up a node by its `<type>:<id>` key
    pub fn find(&self, key: &str) -> Option<NodeId> {
        self.keys.get(key).copied()
    }

    /// Borrow the resource behind a node
    pub fn resource(&self, id: NodeId) -> &dyn Resource {
        self.nodes[id.0].as_ref()
    }

    /// Nodes that must be applied before `id`
    pub fn dependencies(&self, id: NodeId) -> Vec<NodeId> {
        self.edges
            .keys()
            .filter(|(_, to)| *to == id.0)
            .map(|(from, _)| NodeId(*from))
            .collect()
    }

    /// Nodes refreshed when `id` changes
    pub fn notify_targets(&self, id: NodeId) -> Vec<NodeId> {
        self.edges
            .iter()
            .filter(|((from, _), kind)| *from == id.0 && **kind == EdgeKind::Notify)
            .map(|((_, to), _)| NodeId(*to))
            .collect()
    }

    /// Kind of the edge between two nodes, if any
    pub fn edge(&self, from: NodeId, to: NodeId) -> Option<EdgeKind> {
        self.edges.get(&(from.0, to.0)).copied()
    }

    /// Number of resources in the graph
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if graph is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Deterministic topological order (Kahn's algorithm, earliest
    /// inserted ready node first)
    pub fn topo_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let n = self.nodes.len();
        let mut in_degree = vec![0usize; n];
        let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); n];
        for &(from, to) in self.edges.keys() {
            in_degree[to] += 1;
            outgoing[from].push(to);
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(i)) = ready.pop() {
            order.push(NodeId(i));
            for &next in &outgoing[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() < n {
            let stuck = in_degree
                .iter()
                .enumerate()
                .filter(|(_, d)| **d > 0)
                .map(|(i, _)| self.nodes[i].key())
                .collect();
            return Err(GraphError::Cycle(stuck));
        }

        Ok(order)
    }

    /// Keep only resources matching a predicate
    ///
    /// Edges between kept nodes are preserved; edges through removed
    /// nodes are dropped.
    pub fn filter<F>(self, predicate: F) -> Self
    where
        F: Fn(&dyn Resource) -> bool,
    {
        let mut remap: HashMap<usize, usize> = HashMap::new();
        let mut filtered = Self::new();

        for (old, resource) in self.nodes.into_iter().enumerate() {
            if predicate(resource.as_ref()) {
                remap.insert(old, filtered.nodes.len());
                filtered.keys.insert(resource.key(), NodeId(filtered.nodes.len()));
                filtered.nodes.push(resource);
            }
        }

        for ((from, to), kind) in self.edges {
            if let (Some(&f), Some(&t)) = (remap.get(&from), remap.get(&to)) {
                filtered.edges.insert((f, t), kind);
            }
        }

        filtered
    }

    /// Keep only resources matching a target pattern
    ///
    /// Target format: "type" or "type.name"
    pub fn filter_by_target(self, target: Option<&str>) -> Self {
        match target {
            None => self,
            Some(t) => {
                let (resource_type, name) = parse_target(t);
                self.filter(|r| matches_filter(r, resource_type.as_deref(), name.as_deref()))
            }
        }
    }
}

/// Parse a target string like "type.name" into (type, name)
///
/// Only the first dot separates; file names keep their own dots.
fn parse_target(target: &str) -> (Option<String>, Option<String>) {
    match target.split_once('.') {
        None => (Some(target.to_string()), None),
        Some((t, name)) if !t.is_empty() => (Some(t.to_string()), Some(name.to_string())),
        Some(_) => (None, Some(target.to_string())),
    }
}

/// Check if a resource matches the filter criteria
fn matches_filter(
    resource: &dyn Resource,
    resource_type: Option<&str>,
    name: Option<&str>,
) -> bool {
    if let Some(rt) = resource_type {
        // Allow common aliases
        let matches_type = match rt {
            "files" => matches!(resource.resource_type(), "file" | "directory" | "template"),
            "templates" => resource.resource_type() == "template",
            "users" | "accounts" => matches!(resource.resource_type(), "user" | "group"),
            "install" => matches!(resource.resource_type(), "archive" | "symlink" | "package"),
            "services" => matches!(
                resource.resource_type(),
                "service" | "unit" | "systemd_reload"
            ),
            _ => resource.resource_type() == rt,
        };
        if !matches_type {
            return false;
        }
    }

    if let Some(n) = name
        && !resource.id().contains(n)
    {
        return false;
    }

    true
}

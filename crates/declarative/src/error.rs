//! Error types for building and ordering resource graphs

/// Errors raised while building or ordering a [`ResourceGraph`](crate::ResourceGraph)
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GraphError {
    /// Two resources share the same `<type>:<id>` key
    #[error("duplicate resource: {0}")]
    DuplicateResource(String),

    /// An edge refers to a node that is not in the graph
    #[error("unknown node index {0}")]
    UnknownNode(usize),

    /// The dependency edges form a cycle
    #[error("dependency cycle between: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

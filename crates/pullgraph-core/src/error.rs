//! Structural error types for graph mutations.
//!
//! Uses `thiserror` for structured, matchable error variants. These cover
//! failures of graph *construction* (wiring, port addressing, container
//! membership); evaluation failures live in [`crate::eval::EvalError`].

use thiserror::Error;

use crate::id::NodeId;
use crate::port::PortRef;

/// Errors produced by structural graph operations.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A node index was not found in the graph.
    #[error("node not found: NodeId({id})", id = id.0)]
    NodeNotFound { id: NodeId },

    /// A port reference addressed an index outside the node's port list.
    #[error("no such port: {port}")]
    PortOutOfRange { port: PortRef },

    /// Connection rejected: the destination port already has a peer.
    /// The graph is left unchanged.
    #[error("port already occupied: {port}")]
    PortOccupied { port: PortRef },

    /// The two ports cannot be wired together (wrong roles or scopes).
    #[error("invalid wire: {reason}")]
    InvalidWire { reason: String },

    /// A container operation was invoked on a non-container node.
    #[error("not a container: NodeId({id})", id = id.0)]
    NotAContainer { id: NodeId },

    /// Attempting to adopt a node that already belongs to a container.
    #[error("node already owned by a container: NodeId({id})", id = id.0)]
    AlreadyOwned { id: NodeId },

    /// Attempting to remove a node that is not a child of the container.
    #[error("node is not a child of this container: NodeId({id})", id = id.0)]
    NotAChild { id: NodeId },
}

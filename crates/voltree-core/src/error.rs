//! Error types for voltree-core

use crate::node::NodeId;
use crate::node::volcache::VolumeError;
use thiserror::Error;

/// Result type alias using voltree's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building, evaluating or emitting a tree
#[derive(Error, Debug)]
pub enum Error {
    /// The tree shape cannot produce a field: a composite is missing a child,
    /// or a node that has no closed form was reached without a cache.
    #[error("Malformed tree at node {node}: {reason}")]
    MalformedTree { node: NodeId, reason: String },

    /// The tree has no root node
    #[error("Tree has no root")]
    NoRoot,

    /// A handle does not belong to this tree
    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    /// The node exists but is not of the kind the operation expects
    #[error("Node {node} is not a {expected}")]
    WrongKind { node: NodeId, expected: &'static str },

    /// A parameter payload does not match the slot's kind
    #[error("Parameter {id} expects {expected} floats, got {actual}")]
    PayloadSize {
        id: u32,
        expected: usize,
        actual: usize,
    },

    /// A parameter id is not registered
    #[error("Parameter {0} is not registered")]
    UnknownParameter(u32),

    /// Blend parameters would divide by zero or carry non-finite values
    #[error("Invalid blend parameters a0={a0}, a1={a1}, a2={a2}: falloffs must be finite and nonzero")]
    InvalidBlend { a0: f32, a1: f32, a2: f32 },

    /// A wrapped volume source failed
    #[error("Volume source failed: {0}")]
    Volume(#[from] VolumeError),
}

impl Error {
    pub(crate) fn malformed(node: NodeId, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        tracing::error!("malformed tree at node {}: {}", node, reason);
        Self::MalformedTree { node, reason }
    }
}

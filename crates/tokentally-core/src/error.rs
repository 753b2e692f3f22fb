// SPDX-FileCopyrightText: 2026 Tokentally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the tokentally workspace.

use thiserror::Error;

use crate::types::NodeId;

/// The primary error type used across all tokentally crates.
///
/// Only programming-contract failures are errors. Expected negative outcomes
/// (no matching node, unknown pricing, unknown watch id) are modeled as data
/// by the APIs that produce them.
#[derive(Debug, Error)]
pub enum TallyError {
    /// `record_usage` was called with an empty attribution stack.
    #[error("no active execution context: enter a context before recording usage")]
    NoActiveContext,

    /// The node handle does not belong to this engine's tree.
    #[error("unknown node {node}")]
    UnknownNode { node: NodeId },

    /// A run id is already owned by another node in this session.
    #[error("run id `{run_id}` is already used by node {existing}")]
    DuplicateRunId { run_id: String, existing: NodeId },

    /// Node metadata failed validation at construction.
    #[error("invalid node metadata: {message}")]
    InvalidMetadata { message: String },

    /// Watch dispatch requires a Tokio runtime and none is running.
    #[error("watch dispatch requires a running Tokio runtime")]
    NoRuntime,

    /// Configuration errors surfaced outside the config diagnostics path.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

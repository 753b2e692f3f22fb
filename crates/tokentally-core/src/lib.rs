// SPDX-FileCopyrightText: 2026 Tokentally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the tokentally workspace.
//!
//! This crate provides the error type and the value types (usage records,
//! node kinds, typed node metadata, handles) shared by the accounting engine,
//! the pricing crate and their consumers.

pub mod error;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::TallyError;
pub use types::{ModelKey, NodeId, NodeKind, NodeMetadata, UsageRecord, WatchId};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_error_messages() {
        let err = TallyError::NoActiveContext;
        assert!(err.to_string().contains("no active execution context"));

        let err = TallyError::DuplicateRunId {
            run_id: "run-1".into(),
            existing: NodeId(3),
        };
        assert_eq!(err.to_string(), "run id `run-1` is already used by node node#3");

        let err = TallyError::UnknownNode { node: NodeId(42) };
        assert_eq!(err.to_string(), "unknown node node#42");
    }

    #[test]
    fn root_is_first_node() {
        assert_eq!(NodeId::ROOT, NodeId(0));
        assert!(NodeId::ROOT < NodeId(1));
    }
}

// SPDX-FileCopyrightText: 2026 Tokentally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Node lookup queries.

use std::fmt;

use tokentally_core::{NodeKind, NodeMetadata};

/// Criteria for finding a node in the usage tree.
///
/// Precedence: a run id matches exactly and ignores the name; otherwise the
/// name must match, and the workflow id too when given. An empty query
/// matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeQuery {
    pub run_id: Option<String>,
    pub name: Option<String>,
    pub workflow_id: Option<String>,
    /// Restrict matches to one node kind.
    pub kind: Option<NodeKind>,
}

impl NodeQuery {
    pub fn by_run_id(run_id: impl Into<String>) -> Self {
        Self {
            run_id: Some(run_id.into()),
            ..Self::default()
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_kind(mut self, kind: NodeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Whether a node matches the name, workflow id and kind criteria.
    ///
    /// The run id is not consulted here; run-id lookups go through the
    /// tree's index.
    pub(crate) fn matches(&self, kind: NodeKind, name: &str, metadata: &NodeMetadata) -> bool {
        if self.kind.is_some_and(|k| k != kind) {
            return false;
        }
        if self.name.as_deref().is_some_and(|n| n != name) {
            return false;
        }
        if let Some(workflow_id) = self.workflow_id.as_deref() {
            return metadata.workflow_id() == Some(workflow_id);
        }
        true
    }
}

impl fmt::Display for NodeQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(run_id) = &self.run_id {
            parts.push(format!("run_id='{run_id}'"));
        }
        if let Some(name) = &self.name {
            parts.push(format!("name='{name}'"));
        }
        if let Some(workflow_id) = &self.workflow_id {
            parts.push(format!("workflow_id='{workflow_id}'"));
        }
        if let Some(kind) = self.kind {
            parts.push(format!("kind='{kind}'"));
        }
        if parts.is_empty() {
            f.write_str("<empty query>")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_criteria() {
        let query = NodeQuery::by_name("wf").with_workflow_id("Basic");
        assert_eq!(query.to_string(), "name='wf', workflow_id='Basic'");
        assert_eq!(NodeQuery::default().to_string(), "<empty query>");
    }

    #[test]
    fn matches_checks_kind_and_workflow() {
        let meta = NodeMetadata::new().with_workflow_id("Basic");
        let query = NodeQuery::by_name("wf").with_workflow_id("Basic");
        assert!(query.matches(NodeKind::Run, "wf", &meta));
        assert!(!query.matches(NodeKind::Run, "wf", &NodeMetadata::new()));
        assert!(!query.clone().with_kind(NodeKind::SubRun).matches(NodeKind::Run, "wf", &meta));
        assert!(!query.matches(NodeKind::Run, "other", &meta));
    }
}

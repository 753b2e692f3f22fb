// SPDX-FileCopyrightText: 2026 Tokentally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The usage tree.
//!
//! Nodes live in an arena indexed by [`NodeId`]. A node owns its children
//! (the ids in `children` are only ever reachable through it) and keeps a
//! plain id back to its parent for the ancestor walk. Nodes are never
//! removed, so ids stay valid and increase in creation order.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tokentally_core::{ModelKey, NodeId, NodeKind, NodeMetadata, TallyError, UsageRecord};

use crate::query::NodeQuery;

/// One node of the usage tree.
#[derive(Debug, Clone)]
pub struct UsageNode {
    name: String,
    kind: NodeKind,
    metadata: NodeMetadata,
    own_usage: UsageRecord,
    /// Own usage split by model, so a node that saw several models still
    /// breaks down exactly.
    model_usage: BTreeMap<ModelKey, UsageRecord>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
}

impl UsageNode {
    fn new(name: String, kind: NodeKind, metadata: NodeMetadata, parent: Option<NodeId>) -> Self {
        Self {
            name,
            kind,
            metadata,
            own_usage: UsageRecord::default(),
            model_usage: BTreeMap::new(),
            children: Vec::new(),
            parent,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    /// Usage recorded directly at this node.
    pub fn own_usage(&self) -> &UsageRecord {
        &self.own_usage
    }

    /// Children in creation order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Re-entry identity: same kind, same name and same run id (if any).
    fn is_same_context(&self, kind: NodeKind, name: &str, metadata: &NodeMetadata) -> bool {
        self.kind == kind && self.name == name && self.metadata.run_id() == metadata.run_id()
    }
}

/// Recursive, serializable view of a subtree.
///
/// This is the wire format of the "usage tree" field returned by run reports:
/// `usage` is the usage recorded at the node itself, `aggregate_usage` adds
/// every descendant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub kind: NodeKind,
    pub metadata: NodeMetadata,
    pub usage: UsageRecord,
    pub aggregate_usage: UsageRecord,
    pub children: Vec<NodeSnapshot>,
}

/// Arena holding every node of one accounting session.
#[derive(Debug)]
pub struct UsageTree {
    nodes: Vec<UsageNode>,
    run_ids: HashMap<String, NodeId>,
}

impl UsageTree {
    /// Create a tree holding only the session root.
    pub fn new(root_name: impl Into<String>) -> Self {
        Self {
            nodes: vec![UsageNode::new(
                root_name.into(),
                NodeKind::Run,
                NodeMetadata::default(),
                None,
            )],
            run_ids: HashMap::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: the root exists for the whole session.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&UsageNode> {
        self.nodes.get(id.0)
    }

    fn node(&self, id: NodeId) -> Result<&UsageNode, TallyError> {
        self.get(id).ok_or(TallyError::UnknownNode { node: id })
    }

    /// Return the matching child of `parent`, creating it if needed.
    ///
    /// The boolean is true when a node was created.
    pub fn enter_child(
        &mut self,
        parent: NodeId,
        kind: NodeKind,
        name: &str,
        metadata: NodeMetadata,
    ) -> Result<(NodeId, bool), TallyError> {
        metadata.validate()?;

        let existing = self
            .node(parent)?
            .children
            .iter()
            .copied()
            .find(|&child| self.nodes[child.0].is_same_context(kind, name, &metadata));
        if let Some(child) = existing {
            return Ok((child, false));
        }

        if let Some(run_id) = metadata.run_id() {
            if let Some(&owner) = self.run_ids.get(run_id) {
                return Err(TallyError::DuplicateRunId {
                    run_id: run_id.to_string(),
                    existing: owner,
                });
            }
        }

        let id = NodeId(self.nodes.len());
        if let Some(run_id) = metadata.run_id() {
            self.run_ids.insert(run_id.to_string(), id);
        }
        self.nodes
            .push(UsageNode::new(name.to_string(), kind, metadata, Some(parent)));
        self.nodes[parent.0].children.push(id);
        Ok((id, true))
    }

    /// Add usage to a node's own usage.
    pub fn add_usage(&mut self, id: NodeId, usage: &UsageRecord) -> Result<(), TallyError> {
        let node = self
            .nodes
            .get_mut(id.0)
            .ok_or(TallyError::UnknownNode { node: id })?;
        node.own_usage.accumulate(usage);
        if let Some(key) = usage.model_key() {
            node.model_usage
                .entry(key)
                .or_default()
                .accumulate(&usage.counts_only());
        }
        Ok(())
    }

    /// Iterate from `id` up to the root, `id` included.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            next: self.get(id).map(|_| id),
        }
    }

    /// Own usage plus the usage of every descendant.
    ///
    /// Computed on each call from the current tree; nothing is cached.
    pub fn aggregate_usage(&self, id: NodeId) -> Option<UsageRecord> {
        self.get(id)?;
        let mut total = UsageRecord::default();
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            let node = &self.nodes[next.0];
            total.accumulate(&node.own_usage.counts_only());
            pending.extend(node.children.iter().copied());
        }
        Some(total)
    }

    /// Per-model usage summed over the subtree rooted at `id`.
    pub fn model_breakdown(&self, id: NodeId) -> Option<BTreeMap<ModelKey, UsageRecord>> {
        self.get(id)?;
        let mut breakdown: BTreeMap<ModelKey, UsageRecord> = BTreeMap::new();
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            let node = &self.nodes[next.0];
            for (key, usage) in &node.model_usage {
                breakdown.entry(key.clone()).or_default().accumulate(usage);
            }
            pending.extend(node.children.iter().copied());
        }
        Some(breakdown)
    }

    /// Serializable copy of the subtree rooted at `id`.
    pub fn snapshot(&self, id: NodeId) -> Option<NodeSnapshot> {
        let node = self.get(id)?;
        let children: Vec<NodeSnapshot> = node
            .children
            .iter()
            .filter_map(|&child| self.snapshot(child))
            .collect();

        let mut aggregate = node.own_usage.counts_only();
        for child in &children {
            aggregate.accumulate(&child.aggregate_usage);
        }

        Some(NodeSnapshot {
            name: node.name.clone(),
            kind: node.kind,
            metadata: node.metadata.clone(),
            usage: node.own_usage.clone(),
            aggregate_usage: aggregate,
            children,
        })
    }

    /// Resolve a lookup query.
    ///
    /// A run id resolves through the run-id index and is unique. Name (and
    /// workflow id) lookups may match several nodes; the most recently
    /// created one wins.
    pub fn find(&self, query: &NodeQuery) -> Option<NodeId> {
        if let Some(run_id) = query.run_id.as_deref() {
            return self
                .run_ids
                .get(run_id)
                .copied()
                .filter(|&id| query.kind.is_none_or(|kind| self.nodes[id.0].kind == kind));
        }

        if query.name.is_none() && query.workflow_id.is_none() {
            return None;
        }

        self.nodes
            .iter()
            .enumerate()
            .rev()
            .find(|(_, node)| query.matches(node.kind, &node.name, &node.metadata))
            .map(|(index, _)| NodeId(index))
    }
}

/// Iterator over a node and its ancestors, ending at the root.
pub struct Ancestors<'a> {
    tree: &'a UsageTree,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.tree.get(current).and_then(UsageNode::parent);
        Some(current)
    }
}

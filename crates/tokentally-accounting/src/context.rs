// SPDX-FileCopyrightText: 2026 Tokentally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Execution contexts: per-flow attribution stacks.
//!
//! Each concurrent unit of work (a task, a thread, a request) holds its own
//! [`ExecutionContext`]. The stack decides where `record_usage` attributes
//! usage; the tree it points into is shared through the engine. Contexts are
//! plain values, so they move into spawned tasks and never leak between
//! flows. Use [`ExecutionContext::fork`] to hand a child flow the current
//! attribution point.

use std::ops::{Deref, DerefMut};

use tokentally_core::{NodeId, NodeKind, NodeMetadata, TallyError, UsageRecord};

use crate::engine::AccountingEngine;

/// Attribution stack of one flow of execution.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    engine: AccountingEngine,
    stack: Vec<NodeId>,
}

impl ExecutionContext {
    pub(crate) fn new(engine: AccountingEngine) -> Self {
        Self {
            engine,
            stack: Vec::new(),
        }
    }

    pub fn engine(&self) -> &AccountingEngine {
        &self.engine
    }

    /// Node that `record_usage` currently attributes to.
    pub fn current(&self) -> Option<NodeId> {
        self.stack.last().copied()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Enter a context under the current node (or under the root when the
    /// stack is empty) and push it.
    pub fn enter(
        &mut self,
        kind: NodeKind,
        name: &str,
        metadata: NodeMetadata,
    ) -> Result<NodeId, TallyError> {
        let parent = self.current().unwrap_or(NodeId::ROOT);
        self.enter_under(parent, kind, name, metadata)
    }

    /// Enter a context under an explicit parent and push it.
    pub fn enter_under(
        &mut self,
        parent: NodeId,
        kind: NodeKind,
        name: &str,
        metadata: NodeMetadata,
    ) -> Result<NodeId, TallyError> {
        let node = self.engine.enter_context(parent, kind, name, metadata)?;
        self.stack.push(node);
        Ok(node)
    }

    /// Pop the innermost context. Returns `None` when the stack is empty.
    pub fn exit(&mut self) -> Option<NodeId> {
        self.stack.pop()
    }

    /// Enter a context that is exited when the returned guard drops.
    ///
    /// The guard derefs to this context, so nested scopes and recording go
    /// through it.
    pub fn scope(
        &mut self,
        kind: NodeKind,
        name: &str,
        metadata: NodeMetadata,
    ) -> Result<ContextScope<'_>, TallyError> {
        let node = self.enter(kind, name, metadata)?;
        let depth = self.stack.len();
        Ok(ContextScope {
            context: self,
            node,
            depth,
        })
    }

    /// Add usage to the current node.
    ///
    /// Fails with [`TallyError::NoActiveContext`] when nothing has been
    /// entered.
    pub fn record_usage(&self, usage: UsageRecord) -> Result<(), TallyError> {
        let node = self.current().ok_or(TallyError::NoActiveContext)?;
        self.engine.record_usage_at(node, usage)
    }

    /// A context for a child flow that starts at this context's current node.
    ///
    /// The fork has a one-element stack; entering and exiting in it never
    /// affects this context.
    pub fn fork(&self) -> ExecutionContext {
        ExecutionContext {
            engine: self.engine.clone(),
            stack: self.current().into_iter().collect(),
        }
    }
}

/// Guard returned by [`ExecutionContext::scope`].
#[derive(Debug)]
pub struct ContextScope<'a> {
    context: &'a mut ExecutionContext,
    node: NodeId,
    depth: usize,
}

impl ContextScope<'_> {
    /// Node entered by this scope.
    pub fn node(&self) -> NodeId {
        self.node
    }
}

impl Deref for ContextScope<'_> {
    type Target = ExecutionContext;

    fn deref(&self) -> &ExecutionContext {
        self.context
    }
}

impl DerefMut for ContextScope<'_> {
    fn deref_mut(&mut self) -> &mut ExecutionContext {
        self.context
    }
}

impl Drop for ContextScope<'_> {
    fn drop(&mut self) {
        // Also unwinds anything entered inside the scope and never exited.
        self.context.stack.truncate(self.depth.saturating_sub(1));
    }
}

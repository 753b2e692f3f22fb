// SPDX-FileCopyrightText: 2026 Tokentally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The accounting engine: one usage tree per session, shared by every
//! execution context that reports into it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Serialize;
use tokentally_config::model::TallyConfig;
use tokentally_core::{ModelKey, NodeId, NodeKind, NodeMetadata, TallyError, UsageRecord, WatchId};
use tokentally_cost::{CostEstimate, PricingTable};
use tracing::debug;

use crate::context::ExecutionContext;
use crate::query::NodeQuery;
use crate::recording;
use crate::tree::{NodeSnapshot, UsageTree};
use crate::watch::{AggregateSource, WatchEvent, WatchRegistry};

/// Session-wide totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSummary {
    pub usage: UsageRecord,
    /// Total cost in USD at full precision.
    pub cost: f64,
    /// False when some usage had no matching pricing entry (or no model).
    pub pricing_known: bool,
}

/// Flat, owned view of one node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    pub metadata: NodeMetadata,
    pub own_usage: UsageRecord,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

pub(crate) struct Shared {
    tree: RwLock<UsageTree>,
    pricing: ArcSwap<PricingTable>,
    watches: WatchRegistry,
}

impl Shared {
    // Tree mutations complete before any call that could panic, so a
    // poisoned lock still guards a consistent tree.
    pub(crate) fn read_tree(&self) -> RwLockReadGuard<'_, UsageTree> {
        self.tree.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_tree(&self) -> RwLockWriteGuard<'_, UsageTree> {
        self.tree.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AggregateSource for Shared {
    fn aggregate(&self, node: NodeId) -> Option<UsageRecord> {
        self.read_tree().aggregate_usage(node)
    }
}

/// Handle to an accounting session.
///
/// Cloning is cheap and every clone sees the same tree, pricing table and
/// watches. All methods take `&self` and are safe to call from any thread.
#[derive(Clone)]
pub struct AccountingEngine {
    shared: Arc<Shared>,
}

/// Non-owning engine handle, for callbacks that must not keep the session
/// alive.
#[derive(Clone)]
pub struct WeakEngine {
    shared: Weak<Shared>,
}

impl WeakEngine {
    pub fn upgrade(&self) -> Option<AccountingEngine> {
        self.shared.upgrade().map(|shared| AccountingEngine { shared })
    }
}

impl AccountingEngine {
    /// Create a session whose root node is called `session_name`.
    pub fn new(session_name: impl Into<String>, pricing: PricingTable) -> Self {
        Self {
            shared: Arc::new(Shared {
                tree: RwLock::new(UsageTree::new(session_name)),
                pricing: ArcSwap::from_pointee(pricing),
                watches: WatchRegistry::new(),
            }),
        }
    }

    /// Create a session from loaded configuration.
    pub fn from_config(config: &TallyConfig) -> Self {
        Self::new(
            config.session.name.clone(),
            PricingTable::from_config(&config.pricing),
        )
    }

    pub fn downgrade(&self) -> WeakEngine {
        WeakEngine {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    /// The session root.
    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    /// A fresh execution context with an empty attribution stack.
    pub fn context(&self) -> ExecutionContext {
        ExecutionContext::new(self.clone())
    }

    /// Find or create the child of `parent` identified by kind, name and run id.
    ///
    /// Re-entering an existing context returns the existing node. A run id
    /// already owned by a node elsewhere in the tree is rejected.
    pub fn enter_context(
        &self,
        parent: NodeId,
        kind: NodeKind,
        name: &str,
        metadata: NodeMetadata,
    ) -> Result<NodeId, TallyError> {
        let (node, created) = self
            .shared
            .write_tree()
            .enter_child(parent, kind, name, metadata)?;
        if created {
            debug!(node = %node, parent = %parent, %kind, name, "context created");
        }
        Ok(node)
    }

    /// Add usage at `node` and notify watches on it and its ancestors.
    pub(crate) fn record_usage_at(&self, node: NodeId, usage: UsageRecord) -> Result<(), TallyError> {
        let watched: Vec<(NodeId, UsageRecord)> = {
            let mut tree = self.shared.write_tree();
            tree.add_usage(node, &usage)?;
            if self.shared.watches.is_empty() {
                Vec::new()
            } else {
                tree.ancestors(node)
                    .filter(|&id| self.shared.watches.is_watched(id))
                    .filter_map(|id| tree.aggregate_usage(id).map(|aggregate| (id, aggregate)))
                    .collect()
            }
        };

        recording::record_tokens(&usage);
        debug!(
            node = %node,
            input_units = usage.input_units,
            output_units = usage.output_units,
            model = usage.model.as_deref(),
            provider = usage.provider.as_deref(),
            "usage recorded"
        );

        if !watched.is_empty() {
            let shared = Arc::downgrade(&self.shared);
            let source: Weak<dyn AggregateSource> = shared;
            for (id, aggregate) in &watched {
                self.shared.watches.evaluate(*id, aggregate, &source);
            }
        }
        Ok(())
    }

    pub fn node_info(&self, node: NodeId) -> Option<NodeInfo> {
        let tree = self.shared.read_tree();
        let entry = tree.get(node)?;
        Some(NodeInfo {
            id: node,
            name: entry.name().to_string(),
            kind: entry.kind(),
            metadata: entry.metadata().clone(),
            own_usage: entry.own_usage().clone(),
            parent: entry.parent(),
            children: entry.children().to_vec(),
        })
    }

    /// Number of nodes in the tree, root included.
    pub fn node_count(&self) -> usize {
        self.shared.read_tree().len()
    }

    /// Own usage of `node` plus that of all its descendants.
    pub fn aggregate_usage(&self, node: NodeId) -> Option<UsageRecord> {
        self.shared.read_tree().aggregate_usage(node)
    }

    /// Recursive snapshot of the subtree rooted at `node`.
    pub fn serialize(&self, node: NodeId) -> Option<NodeSnapshot> {
        self.shared.read_tree().snapshot(node)
    }

    pub fn get_node(&self, query: &NodeQuery) -> Option<NodeId> {
        self.shared.read_tree().find(query)
    }

    /// Usage in the subtree rooted at `node`, grouped by model and provider.
    pub fn collect_model_breakdown(&self, node: NodeId) -> Option<BTreeMap<ModelKey, UsageRecord>> {
        self.shared.read_tree().model_breakdown(node)
    }

    /// Cost of a usage under the current pricing table.
    pub fn calculate_cost(
        &self,
        model: &str,
        input_units: u64,
        output_units: u64,
        provider: Option<&str>,
    ) -> CostEstimate {
        self.shared
            .pricing
            .load()
            .calculate_cost(model, input_units, output_units, provider)
    }

    /// Cost of the subtree rooted at `node`.
    pub fn node_cost(&self, node: NodeId) -> Option<CostEstimate> {
        let (breakdown, aggregate) = {
            let tree = self.shared.read_tree();
            (tree.model_breakdown(node)?, tree.aggregate_usage(node)?)
        };
        Some(price_subtree(&self.shared.pricing.load(), &breakdown, &aggregate).0)
    }

    /// Totals for the whole session.
    pub fn get_summary(&self) -> UsageSummary {
        let (breakdown, usage) = {
            let tree = self.shared.read_tree();
            (
                tree.model_breakdown(NodeId::ROOT).unwrap_or_default(),
                tree.aggregate_usage(NodeId::ROOT).unwrap_or_default(),
            )
        };
        let (cost, _) = price_subtree(&self.shared.pricing.load(), &breakdown, &usage);
        UsageSummary {
            usage,
            cost: cost.amount,
            pricing_known: cost.pricing_known,
        }
    }

    /// The pricing table in effect.
    pub fn pricing(&self) -> Arc<PricingTable> {
        self.shared.pricing.load_full()
    }

    /// Swap in a new pricing table. Later cost queries use it; recorded usage
    /// is unaffected.
    pub fn replace_pricing(&self, table: PricingTable) {
        debug!(entries = table.len(), "pricing table replaced");
        self.shared.pricing.store(Arc::new(table));
    }

    /// Subscribe to usage changes in the subtree rooted at `node`.
    ///
    /// The callback fires once the aggregate has grown by `threshold` units
    /// since the last notification (or since registration), and at most once
    /// per `throttle`. Requires a running Tokio runtime: notifications are
    /// delivered from a task on it.
    pub fn watch<F>(
        &self,
        node: NodeId,
        threshold: u64,
        throttle: Duration,
        callback: F,
    ) -> Result<WatchId, TallyError>
    where
        F: Fn(&WatchEvent) + Send + Sync + 'static,
    {
        let (name, baseline) = {
            let tree = self.shared.read_tree();
            let entry = tree.get(node).ok_or(TallyError::UnknownNode { node })?;
            let baseline = tree.aggregate_usage(node).unwrap_or_default();
            (entry.name().to_string(), baseline.total_units())
        };
        self.shared
            .watches
            .register(node, name, threshold, throttle, baseline, Arc::new(callback))
    }

    /// Cancel a watch. Returns false if the id is unknown or already removed.
    ///
    /// Once this returns the callback is not running and will not be invoked
    /// again (when called from inside the callback itself, only further
    /// invocations are prevented).
    pub fn unwatch(&self, id: WatchId) -> bool {
        self.shared.watches.unregister(id)
    }

    pub fn watch_count(&self) -> usize {
        self.shared.watches.len()
    }
}

impl fmt::Debug for AccountingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountingEngine")
            .field("nodes", &self.node_count())
            .field("watches", &self.watch_count())
            .field("pricing_entries", &self.shared.pricing.load().len())
            .finish()
    }
}

/// Price a subtree from its model breakdown.
///
/// Returns the total and the per-model estimates. Units recorded without a
/// model cannot be priced and make the total unknown.
pub(crate) fn price_subtree(
    pricing: &PricingTable,
    breakdown: &BTreeMap<ModelKey, UsageRecord>,
    aggregate: &UsageRecord,
) -> (CostEstimate, BTreeMap<ModelKey, CostEstimate>) {
    let mut total = CostEstimate::zero();
    let mut per_model = BTreeMap::new();
    let mut attributed = 0u64;

    for (key, usage) in breakdown {
        let estimate = pricing.calculate_cost(
            &key.model,
            usage.input_units,
            usage.output_units,
            key.provider.as_deref(),
        );
        attributed = attributed.saturating_add(usage.total_units());
        total = total.combine(estimate);
        per_model.insert(key.clone(), estimate);
    }

    if aggregate.total_units() > attributed {
        total.pricing_known = false;
    }
    (total, per_model)
}

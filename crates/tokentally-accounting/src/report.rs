// SPDX-FileCopyrightText: 2026 Tokentally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Run usage reports.
//!
//! The payload an external query tool returns for "usage for run X". Costs
//! are rounded to four decimals here and nowhere else.

use std::collections::BTreeMap;

use serde::Serialize;
use tokentally_core::UsageRecord;
use tokentally_cost::round_cost;
use tracing::debug;

use crate::engine::{AccountingEngine, price_subtree};
use crate::query::NodeQuery;
use crate::tree::NodeSnapshot;

/// Identity of the reported run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunIdentity {
    pub name: String,
    pub run_id: Option<String>,
    pub workflow_id: Option<String>,
}

/// Usage and cost of one model within a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelUsageReport {
    #[serde(rename = "model_name")]
    pub model: String,
    pub provider: Option<String>,
    #[serde(flatten)]
    pub usage: UsageRecord,
    pub cost: f64,
    pub pricing_known: bool,
}

/// Usage report for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub workflow: RunIdentity,
    pub usage: UsageRecord,
    pub cost: f64,
    pub pricing_known: bool,
    /// Keyed by `"<model> (<provider>)"`, or `"<model>"` without a provider.
    pub model_breakdown: BTreeMap<String, ModelUsageReport>,
    pub usage_tree: NodeSnapshot,
}

/// Response for a run usage request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RunReportResponse {
    Found(Box<RunReport>),
    NotFound { error: String, message: String },
}

impl RunReportResponse {
    pub fn not_found(query: &NodeQuery) -> Self {
        Self::NotFound {
            error: "Workflow not found".to_string(),
            message: format!("no run matches {query}"),
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl AccountingEngine {
    /// Build the usage report for the node matching `query`.
    ///
    /// Every field is computed from one consistent view of the tree.
    pub fn run_report(&self, query: &NodeQuery) -> RunReportResponse {
        let view = {
            let tree = self.shared().read_tree();
            tree.find(query).and_then(|node| {
                Some((
                    tree.snapshot(node)?,
                    tree.model_breakdown(node)?,
                ))
            })
        };
        let Some((snapshot, breakdown)) = view else {
            debug!(%query, "run report requested for unknown run");
            return RunReportResponse::not_found(query);
        };

        let pricing = self.pricing();
        let (total, per_model) = price_subtree(&pricing, &breakdown, &snapshot.aggregate_usage);

        let model_breakdown = breakdown
            .into_iter()
            .map(|(key, usage)| {
                let estimate = per_model.get(&key).copied().unwrap_or_default();
                let entry = ModelUsageReport {
                    model: key.model.clone(),
                    provider: key.provider.clone(),
                    usage: usage.counts_only(),
                    cost: round_cost(estimate.amount),
                    pricing_known: estimate.pricing_known,
                };
                (key.to_string(), entry)
            })
            .collect();

        RunReportResponse::Found(Box::new(RunReport {
            workflow: RunIdentity {
                name: snapshot.name.clone(),
                run_id: snapshot.metadata.run_id().map(str::to_string),
                workflow_id: snapshot.metadata.workflow_id().map(str::to_string),
            },
            usage: snapshot.aggregate_usage.clone(),
            cost: round_cost(total.amount),
            pricing_known: total.pricing_known,
            model_breakdown,
            usage_tree: snapshot,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokentally_core::{NodeKind, NodeMetadata};
    use tokentally_cost::{PricingEntry, PricingTable};

    fn engine_with_run() -> AccountingEngine {
        let engine = AccountingEngine::new(
            "session",
            PricingTable::new(vec![PricingEntry::new("gpt-4o", Some("openai"), 2.5, 10.0)]),
        );
        let mut ctx = engine.context();
        ctx.enter(
            NodeKind::Run,
            "R1",
            NodeMetadata::new()
                .with_run_id("run-123")
                .with_workflow_id("BasicAgentWorkflow"),
        )
        .unwrap();
        ctx.enter(NodeKind::SubRun, "finder", NodeMetadata::new()).unwrap();
        ctx.record_usage(UsageRecord::new(1000, 500).with_model("gpt-4o").with_provider("openai"))
            .unwrap();
        engine
    }

    #[test]
    fn report_for_known_run() {
        let engine = engine_with_run();
        let response = engine.run_report(&NodeQuery::by_run_id("run-123"));
        let RunReportResponse::Found(report) = &response else {
            panic!("expected a report");
        };
        assert_eq!(report.workflow.name, "R1");
        assert_eq!(report.workflow.workflow_id.as_deref(), Some("BasicAgentWorkflow"));
        assert_eq!(report.usage.total_units(), 1500);
        // 1000 * 2.5 / 1e6 + 500 * 10 / 1e6
        assert_eq!(report.cost, 0.0075);
        assert!(report.pricing_known);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["workflow"]["run_id"], "run-123");
        assert_eq!(json["usage"]["total_units"], 1500);
        let model = &json["model_breakdown"]["gpt-4o (openai)"];
        assert_eq!(model["input_units"], 1000);
        assert_eq!(model["model_name"], "gpt-4o");
        assert!(model.get("model").is_none());
        assert_eq!(model["provider"], "openai");
        assert_eq!(json["usage_tree"]["children"][0]["name"], "finder");
    }

    #[test]
    fn report_for_missing_run() {
        let engine = engine_with_run();
        let response = engine.run_report(&NodeQuery::by_run_id("does-not-exist"));
        assert!(!response.is_found());
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["error"], "Workflow not found");
        assert!(json["message"].as_str().unwrap().contains("does-not-exist"));
    }

    #[test]
    fn unknown_model_flags_pricing() {
        let engine = engine_with_run();
        let mut ctx = engine.context();
        ctx.enter(NodeKind::Run, "R2", NodeMetadata::new().with_run_id("run-456"))
            .unwrap();
        ctx.record_usage(UsageRecord::new(10, 10).with_model("mystery")).unwrap();
        let RunReportResponse::Found(report) = engine.run_report(&NodeQuery::by_run_id("run-456"))
        else {
            panic!("expected a report");
        };
        assert!(!report.pricing_known);
        assert_eq!(report.cost, 0.0);
        assert!(!report.model_breakdown["mystery"].pricing_known);
    }
}

// SPDX-FileCopyrightText: 2026 Tokentally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `tokentally simulate` command implementation.
//!
//! Runs a synthetic workflow through the engine: one run with several agents
//! working concurrently, each making a few model calls. The live display is
//! attached when enabled and stderr is a terminal. The run report is printed
//! as JSON at the end.

use std::io::IsTerminal;
use std::time::Duration;

use tokentally_accounting::{
    AccountingEngine, ExecutionContext, NodeQuery, RunReportResponse,
};
use tokentally_config::model::TallyConfig;
use tokentally_core::{NodeKind, NodeMetadata, TallyError, UsageRecord};
use tokentally_display::{DisplayOptions, DrawTarget, TokenProgressDisplay};
use tracing::{debug, info};

const MODELS: [(&str, &str); 3] = [
    ("claude-sonnet-4-20250514", "anthropic"),
    ("gpt-4o-mini", "openai"),
    ("claude-3-5-haiku-20241022", "anthropic"),
];

const CALL_DELAY: Duration = Duration::from_millis(40);

/// Deterministic usage for one synthetic call.
fn synthetic_usage(agent: usize, call: usize) -> UsageRecord {
    let (model, provider) = MODELS[(agent + call) % MODELS.len()];
    let input = 200 + ((agent * 137 + call * 61) % 800) as u64;
    let output = 40 + ((agent * 53 + call * 29) % 300) as u64;
    UsageRecord::new(input, output)
        .with_model(model)
        .with_provider(provider)
}

async fn run_agent(mut ctx: ExecutionContext, agent: usize, calls: usize) -> Result<(), TallyError> {
    let name = format!("agent-{agent}");
    ctx.enter(NodeKind::SubRun, &name, NodeMetadata::new())?;
    for call in 0..calls {
        let usage = synthetic_usage(agent, call);
        {
            let scope = ctx.scope(
                NodeKind::Invocation,
                &format!("call-{call}"),
                NodeMetadata::new().with_entry("agent", name.as_str()),
            )?;
            scope.record_usage(usage)?;
        }
        tokio::time::sleep(CALL_DELAY).await;
    }
    debug!(agent = %name, calls, "agent finished");
    Ok(())
}

/// Drive the synthetic run and return its report.
pub async fn simulate(
    engine: &AccountingEngine,
    agents: usize,
    calls: usize,
    run_id: &str,
) -> Result<RunReportResponse, TallyError> {
    let mut ctx = engine.context();
    ctx.enter(
        NodeKind::Run,
        "simulated-workflow",
        NodeMetadata::new()
            .with_run_id(run_id)
            .with_workflow_id("SimulatedWorkflow"),
    )?;

    let mut handles = Vec::with_capacity(agents);
    for agent in 0..agents {
        handles.push(tokio::spawn(run_agent(ctx.fork(), agent, calls)));
    }
    for handle in handles {
        handle
            .await
            .map_err(|e| TallyError::Internal(format!("agent task failed: {e}")))??;
    }

    Ok(engine.run_report(&NodeQuery::by_run_id(run_id)))
}

/// Run the `tokentally simulate` command.
pub async fn run_simulate(
    config: &TallyConfig,
    agents: usize,
    calls: usize,
    run_id: &str,
) -> Result<(), TallyError> {
    let engine = AccountingEngine::from_config(config);

    let show = config.display.enabled && std::io::stderr().is_terminal();
    let target = if show { DrawTarget::Stderr } else { DrawTarget::Hidden };
    let display = TokenProgressDisplay::new(
        engine.clone(),
        DisplayOptions::from_config(&config.watch, &config.display).with_target(target),
    );

    info!(agents, calls, run_id, "starting simulated run");
    let report = {
        let _guard = display.scoped()?;
        simulate(&engine, agents, calls, run_id).await?
    };

    let out = report
        .to_json_pretty()
        .map_err(|e| TallyError::Internal(format!("failed to serialize report: {e}")))?;
    println!("{out}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokentally_cost::default_table;

    #[test]
    fn synthetic_usage_is_deterministic() {
        assert_eq!(synthetic_usage(1, 2), synthetic_usage(1, 2));
        assert_eq!(synthetic_usage(0, 0).model.as_deref(), Some("claude-sonnet-4-20250514"));
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_run_totals_match() {
        let engine = AccountingEngine::new("test", default_table());
        let report = simulate(&engine, 3, 4, "sim-1").await.unwrap();

        let expected: u64 = (0..3)
            .flat_map(|a| (0..4).map(move |c| synthetic_usage(a, c).total_units()))
            .sum();

        let RunReportResponse::Found(report) = report else {
            panic!("simulated run missing");
        };
        assert_eq!(report.usage.total_units(), expected);
        assert_eq!(report.usage_tree.children.len(), 3);
        assert_eq!(report.model_breakdown.len(), MODELS.len());
        assert!(report.pricing_known);
        assert_eq!(report.workflow.workflow_id.as_deref(), Some("SimulatedWorkflow"));
    }
}

// SPDX-FileCopyrightText: 2026 Tokentally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `tokentally cost` command implementation.

use std::io::IsTerminal;

use serde::Serialize;
use tokentally_config::model::TallyConfig;
use tokentally_core::TallyError;
use tokentally_cost::{PricingTable, round_cost};
use tokentally_display::{format_cost, format_units};

/// Structured output for `--json` mode.
#[derive(Debug, Serialize)]
pub struct CostResponse {
    pub model: String,
    pub provider: Option<String>,
    pub input_units: u64,
    pub output_units: u64,
    pub cost: f64,
    pub pricing_known: bool,
    /// Model id of the pricing entry that matched, if any.
    pub matched: Option<String>,
}

pub fn estimate(
    table: &PricingTable,
    model: &str,
    provider: Option<&str>,
    input_units: u64,
    output_units: u64,
) -> CostResponse {
    let estimate = table.calculate_cost(model, input_units, output_units, provider);
    CostResponse {
        model: model.to_string(),
        provider: provider.map(str::to_string),
        input_units,
        output_units,
        cost: round_cost(estimate.amount),
        pricing_known: estimate.pricing_known,
        matched: table.lookup(model, provider).map(|entry| entry.model.clone()),
    }
}

/// Run the `tokentally cost` command.
pub fn run_cost(
    config: &TallyConfig,
    model: &str,
    provider: Option<&str>,
    input_units: u64,
    output_units: u64,
    json: bool,
) -> Result<(), TallyError> {
    let table = PricingTable::from_config(&config.pricing);
    let response = estimate(&table, model, provider, input_units, output_units);

    if json {
        let out = serde_json::to_string_pretty(&response)
            .map_err(|e| TallyError::Internal(format!("failed to serialize cost: {e}")))?;
        println!("{out}");
        return Ok(());
    }

    let use_color = !config.display.plain && std::io::stdout().is_terminal();
    print_cost(&response, use_color);
    Ok(())
}

fn print_cost(response: &CostResponse, use_color: bool) {
    let units = format!(
        "{} in / {} out",
        format_units(response.input_units),
        format_units(response.output_units)
    );
    let cost = format_cost(response.cost);

    if !response.pricing_known {
        if use_color {
            use colored::Colorize;
            println!("  {} {} {}", "!".yellow(), response.model.bold(), "has no pricing entry".yellow());
        } else {
            println!("  [WARN] {} has no pricing entry", response.model);
        }
        println!("  {units}: {cost}");
        return;
    }

    let matched = response.matched.as_deref().unwrap_or(&response.model);
    if use_color {
        use colored::Colorize;
        println!("  {} ({})", response.model.bold(), matched.dimmed());
        println!("  {units}: {}", cost.bold().yellow());
    } else {
        println!("  {} ({matched})", response.model);
        println!("  {units}: {cost}");
    }
}

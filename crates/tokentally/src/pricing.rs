// SPDX-FileCopyrightText: 2026 Tokentally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `tokentally pricing` command implementation.

use std::io::IsTerminal;

use tokentally_config::model::TallyConfig;
use tokentally_core::TallyError;
use tokentally_cost::{PricingEntry, PricingTable};

/// Run the `tokentally pricing` command.
pub fn run_pricing(config: &TallyConfig, json: bool) -> Result<(), TallyError> {
    let table = PricingTable::from_config(&config.pricing);

    if json {
        let out = serde_json::to_string_pretty(table.entries())
            .map_err(|e| TallyError::Internal(format!("failed to serialize pricing: {e}")))?;
        println!("{out}");
        return Ok(());
    }

    if table.is_empty() {
        println!("  no pricing entries (pricing.include_defaults = false and no [[pricing.models]])");
        return Ok(());
    }

    let use_color = !config.display.plain && std::io::stdout().is_terminal();
    println!();
    println!("  {:<24} {:<12} {:>12} {:>12}", "model", "provider", "input/MTok", "output/MTok");
    println!("  {}", "-".repeat(63));
    for entry in table.entries() {
        println!("  {}", format_row(entry, use_color));
    }
    println!();
    Ok(())
}

fn format_row(entry: &PricingEntry, use_color: bool) -> String {
    let provider = entry.provider.as_deref().unwrap_or("*");
    let input = format!("${:.2}", entry.input_per_mtok);
    let output = format!("${:.2}", entry.output_per_mtok);
    if use_color {
        use colored::Colorize;
        format!(
            "{} {:<12} {:>12} {:>12}",
            format!("{:<24}", entry.model).bold(),
            provider,
            input,
            output
        )
    } else {
        format!("{:<24} {provider:<12} {input:>12} {output:>12}", entry.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_row_layout() {
        let entry = PricingEntry::new("gpt-4o", None, 2.5, 10.0);
        let row = format_row(&entry, false);
        assert!(row.starts_with("gpt-4o "));
        assert!(row.contains(" *"));
        assert!(row.ends_with("$10.00"));
        assert!(row.contains("$2.50"));
    }
}

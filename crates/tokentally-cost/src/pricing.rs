// SPDX-FileCopyrightText: 2026 Tokentally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Model pricing tables and cost calculation.
//!
//! Built-in prices are USD per million units, taken from the providers'
//! published price lists:
//!
//! Claude Haiku 3.5:  input=$0.80/MTok, output=$4.00/MTok
//! Claude Sonnet 4:   input=$3.00/MTok, output=$15.00/MTok
//! Claude Opus 4:     input=$15.00/MTok, output=$75.00/MTok
//! GPT-4o:            input=$2.50/MTok, output=$10.00/MTok
//! GPT-4o mini:       input=$0.15/MTok, output=$0.60/MTok
//!
//! Costs are kept at full `f64` precision. Rounding belongs to whoever
//! presents the number.

use serde::{Deserialize, Serialize};
use tokentally_config::model::{ModelPriceConfig, PricingConfig};
use tracing::warn;

const UNITS_PER_MILLION: f64 = 1_000_000.0;

/// Price of one model (optionally for one provider), in USD per million units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingEntry {
    /// Model identifier. Also matches dated snapshots that start with it.
    pub model: String,
    /// Provider serving the model. `None` applies to any provider.
    pub provider: Option<String>,
    /// Cost per million input units.
    pub input_per_mtok: f64,
    /// Cost per million output units.
    pub output_per_mtok: f64,
}

impl PricingEntry {
    pub fn new(
        model: impl Into<String>,
        provider: Option<&str>,
        input_per_mtok: f64,
        output_per_mtok: f64,
    ) -> Self {
        Self {
            model: model.into(),
            provider: provider.map(str::to_string),
            input_per_mtok,
            output_per_mtok,
        }
    }

    /// Cost of the given unit counts at this entry's rates.
    pub fn cost(&self, input_units: u64, output_units: u64) -> f64 {
        let input = (input_units as f64 / UNITS_PER_MILLION) * self.input_per_mtok;
        let output = (output_units as f64 / UNITS_PER_MILLION) * self.output_per_mtok;
        input + output
    }

    fn provider_matches(&self, provider: &str) -> bool {
        self.provider
            .as_deref()
            .is_some_and(|p| p.eq_ignore_ascii_case(provider))
    }
}

impl From<&ModelPriceConfig> for PricingEntry {
    fn from(config: &ModelPriceConfig) -> Self {
        Self {
            model: config.model.clone(),
            provider: config.provider.clone(),
            input_per_mtok: config.input_per_mtok,
            output_per_mtok: config.output_per_mtok,
        }
    }
}

/// Result of a cost calculation.
///
/// Unknown pricing is not an error: the amount is zero and `pricing_known`
/// is false, so a report can still be produced.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CostEstimate {
    /// Cost in USD at full precision.
    pub amount: f64,
    /// False when no pricing entry matched.
    pub pricing_known: bool,
}

impl CostEstimate {
    pub fn known(amount: f64) -> Self {
        Self {
            amount,
            pricing_known: true,
        }
    }

    pub fn unknown() -> Self {
        Self {
            amount: 0.0,
            pricing_known: false,
        }
    }

    /// A zero estimate with known pricing, the identity for [`CostEstimate::combine`].
    pub fn zero() -> Self {
        Self::known(0.0)
    }

    /// Sum two estimates; the result is known only if both are.
    pub fn combine(self, other: CostEstimate) -> CostEstimate {
        CostEstimate {
            amount: self.amount + other.amount,
            pricing_known: self.pricing_known && other.pricing_known,
        }
    }
}

/// Ordered list of pricing entries.
///
/// Declaration order matters: when several entries tie for a lookup, the
/// first declared one wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PricingTable {
    entries: Vec<PricingEntry>,
}

impl PricingTable {
    /// An empty table: every lookup reports unknown pricing.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(entries: Vec<PricingEntry>) -> Self {
        Self { entries }
    }

    /// Build the effective table from configuration.
    ///
    /// Configured models come first so they shadow built-in entries with the
    /// same identifier.
    pub fn from_config(config: &PricingConfig) -> Self {
        let mut entries: Vec<PricingEntry> = config.models.iter().map(PricingEntry::from).collect();
        if config.include_defaults {
            entries.extend(default_entries());
        }
        Self { entries }
    }

    pub fn entries(&self) -> &[PricingEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry at the end of the table (lowest precedence on ties).
    pub fn push(&mut self, entry: PricingEntry) {
        self.entries.push(entry);
    }

    /// Find the entry for a model, optionally served by a specific provider.
    ///
    /// Model ids match case-insensitively, exactly first; otherwise the
    /// longest entry id that prefixes the requested id wins, so
    /// `claude-sonnet-4-20250514` resolves to `claude-sonnet-4`.
    ///
    /// Among the entries for the matched id: with a provider, the entry for
    /// that provider, then a provider-agnostic entry, then the first declared
    /// entry; without a provider, the first declared entry.
    pub fn lookup(&self, model: &str, provider: Option<&str>) -> Option<&PricingEntry> {
        let requested = model.to_lowercase();

        let exact: Vec<&PricingEntry> = self
            .entries
            .iter()
            .filter(|e| e.model.to_lowercase() == requested)
            .collect();

        let candidates = if exact.is_empty() {
            let longest = self
                .entries
                .iter()
                .map(|e| e.model.to_lowercase())
                .filter(|id| !id.is_empty() && requested.starts_with(id.as_str()))
                .max_by_key(String::len)?;
            self.entries
                .iter()
                .filter(|e| e.model.to_lowercase() == longest)
                .collect()
        } else {
            exact
        };

        match provider {
            Some(provider) => candidates
                .iter()
                .find(|e| e.provider_matches(provider))
                .or_else(|| candidates.iter().find(|e| e.provider.is_none()))
                .or_else(|| candidates.first())
                .copied(),
            None => candidates.first().copied(),
        }
    }

    /// Calculate the cost of a usage, flagging unknown pricing instead of failing.
    pub fn calculate_cost(
        &self,
        model: &str,
        input_units: u64,
        output_units: u64,
        provider: Option<&str>,
    ) -> CostEstimate {
        match self.lookup(model, provider) {
            Some(entry) => CostEstimate::known(entry.cost(input_units, output_units)),
            None => {
                warn!(model, provider, "no pricing entry for model, cost reported as 0");
                CostEstimate::unknown()
            }
        }
    }
}

/// The built-in pricing entries.
pub fn default_entries() -> Vec<PricingEntry> {
    vec![
        PricingEntry::new("claude-opus-4", Some("anthropic"), 15.0, 75.0),
        PricingEntry::new("claude-sonnet-4", Some("anthropic"), 3.0, 15.0),
        PricingEntry::new("claude-3-7-sonnet", Some("anthropic"), 3.0, 15.0),
        PricingEntry::new("claude-3-5-haiku", Some("anthropic"), 0.80, 4.0),
        PricingEntry::new("claude-haiku-4-5", Some("anthropic"), 1.0, 5.0),
        PricingEntry::new("gpt-4o", Some("openai"), 2.5, 10.0),
        PricingEntry::new("gpt-4o-mini", Some("openai"), 0.15, 0.60),
        PricingEntry::new("gpt-4.1", Some("openai"), 2.0, 8.0),
        PricingEntry::new("gpt-4.1-mini", Some("openai"), 0.40, 1.60),
        PricingEntry::new("o3-mini", Some("openai"), 1.10, 4.40),
    ]
}

/// The built-in pricing table.
pub fn default_table() -> PricingTable {
    PricingTable::new(default_entries())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-12,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn cost_per_million_units() {
        let table = PricingTable::new(vec![PricingEntry::new("m", None, 3.0, 15.0)]);
        let cost = table.calculate_cost("m", 100, 50, None);
        // 100 * 3 / 1e6 + 50 * 15 / 1e6
        assert!(cost.pricing_known);
        assert_close(cost.amount, 0.00105);
    }

    #[test]
    fn sonnet_snapshot_matches_by_prefix() {
        let table = default_table();
        let entry = table.lookup("claude-sonnet-4-20250514", None).unwrap();
        assert_eq!(entry.model, "claude-sonnet-4");
        assert_close(entry.input_per_mtok, 3.0);
    }

    #[test]
    fn longest_prefix_wins() {
        let table = default_table();
        let entry = table.lookup("gpt-4o-mini-2024-07-18", None).unwrap();
        assert_eq!(entry.model, "gpt-4o-mini");
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let table = default_table();
        assert!(table.lookup("GPT-4o", Some("OpenAI")).is_some());
    }

    #[test]
    fn omitted_provider_picks_first_declared() {
        let table = PricingTable::new(vec![
            PricingEntry::new("gpt-4o", Some("azure"), 2.75, 11.0),
            PricingEntry::new("gpt-4o", Some("openai"), 2.5, 10.0),
        ]);
        let entry = table.lookup("gpt-4o", None).unwrap();
        assert_eq!(entry.provider.as_deref(), Some("azure"));
    }

    #[test]
    fn provider_selects_matching_entry() {
        let table = PricingTable::new(vec![
            PricingEntry::new("gpt-4o", Some("azure"), 2.75, 11.0),
            PricingEntry::new("gpt-4o", None, 2.0, 8.0),
            PricingEntry::new("gpt-4o", Some("openai"), 2.5, 10.0),
        ]);
        assert_eq!(
            table.lookup("gpt-4o", Some("openai")).unwrap().provider.as_deref(),
            Some("openai")
        );
        // Unlisted provider falls back to the provider-agnostic entry.
        assert_eq!(table.lookup("gpt-4o", Some("together")).unwrap().provider, None);
    }

    #[test]
    fn unknown_model_is_flagged_not_failed() {
        let table = default_table();
        let cost = table.calculate_cost("mystery-model", 1000, 1000, None);
        assert!(!cost.pricing_known);
        assert_close(cost.amount, 0.0);
    }

    #[test]
    fn configured_entries_shadow_defaults() {
        let config = PricingConfig {
            include_defaults: true,
            models: vec![ModelPriceConfig {
                model: "gpt-4o".to_string(),
                provider: Some("openai".to_string()),
                input_per_mtok: 1.0,
                output_per_mtok: 2.0,
            }],
        };
        let table = PricingTable::from_config(&config);
        assert_eq!(table.len(), default_entries().len() + 1);
        let entry = table.lookup("gpt-4o", Some("openai")).unwrap();
        assert_close(entry.input_per_mtok, 1.0);
    }

    #[test]
    fn defaults_can_be_disabled() {
        let config = PricingConfig {
            include_defaults: false,
            models: Vec::new(),
        };
        assert!(PricingTable::from_config(&config).is_empty());
    }

    #[test]
    fn combine_tracks_unknown() {
        let total = CostEstimate::zero()
            .combine(CostEstimate::known(0.5))
            .combine(CostEstimate::unknown());
        assert!(!total.pricing_known);
        assert_close(total.amount, 0.5);
    }

    #[test]
    fn zero_units_zero_cost() {
        let cost = default_table().calculate_cost("claude-opus-4", 0, 0, None);
        assert!(cost.pricing_known);
        assert_close(cost.amount, 0.0);
    }
}

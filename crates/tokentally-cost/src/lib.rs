// SPDX-FileCopyrightText: 2026 Tokentally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pricing and cost calculation for tokentally.
//!
//! This crate provides:
//! - **Pricing table**: ordered model/provider price entries with deterministic lookup
//! - **Cost estimates**: full-precision costs that flag unknown pricing instead of failing

pub mod pricing;

pub use pricing::{default_table, CostEstimate, PricingEntry, PricingTable};

/// Round a cost for presentation (four decimal places).
///
/// Stored and aggregated costs are never rounded; call this only when
/// producing output.
pub fn round_cost(amount: f64) -> f64 {
    (amount * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_cost_to_four_places() {
        assert_eq!(round_cost(0.00106), 0.0011);
        assert_eq!(round_cost(0.001049), 0.001);
        assert_eq!(round_cost(1.23444), 1.2344);
        assert_eq!(round_cost(0.0), 0.0);
    }
}

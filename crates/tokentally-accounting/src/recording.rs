// SPDX-FileCopyrightText: 2026 Tokentally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric registration and recording helpers.
//!
//! Uses the metrics-rs facade: without an installed recorder every call is
//! a no-op.

use metrics::{describe_counter, describe_gauge, describe_histogram};
use tokentally_core::UsageRecord;

/// Register all tokentally metric descriptions.
///
/// Call once at startup after the recorder is installed.
pub fn register_metrics() {
    describe_counter!("tokentally_tokens_total", "Total units recorded");
    describe_counter!(
        "tokentally_watch_dispatch_total",
        "Watch callbacks invoked"
    );
    describe_counter!(
        "tokentally_watch_callback_panics_total",
        "Watch callbacks that panicked"
    );
    describe_gauge!("tokentally_active_watches", "Currently registered watches");
    describe_histogram!(
        "tokentally_watch_callback_seconds",
        "Watch callback duration in seconds"
    );
}

/// Record unit consumption for one usage record.
pub(crate) fn record_tokens(usage: &UsageRecord) {
    let model = usage.model.clone().unwrap_or_else(|| "unknown".to_string());
    metrics::counter!("tokentally_tokens_total", "model" => model.clone(), "type" => "input")
        .increment(usage.input_units);
    metrics::counter!("tokentally_tokens_total", "model" => model, "type" => "output")
        .increment(usage.output_units);
}

/// Record one completed watch callback.
pub(crate) fn record_dispatch(seconds: f64) {
    metrics::counter!("tokentally_watch_dispatch_total").increment(1);
    metrics::histogram!("tokentally_watch_callback_seconds").record(seconds);
}

pub(crate) fn record_callback_panic() {
    metrics::counter!("tokentally_watch_callback_panics_total").increment(1);
}

/// Set the number of registered watches.
pub(crate) fn set_active_watches(count: usize) {
    metrics::gauge!("tokentally_active_watches").set(count as f64);
}

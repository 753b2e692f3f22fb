// SPDX-FileCopyrightText: 2026 Tokentally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for tokentally.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level tokentally configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TallyConfig {
    /// Accounting session settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Live watch defaults used by the display adapter.
    #[serde(default)]
    pub watch: WatchConfig,

    /// Terminal display settings.
    #[serde(default)]
    pub display: DisplayConfig,

    /// Model pricing table.
    #[serde(default)]
    pub pricing: PricingConfig,
}

/// Accounting session configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Name of the session root node.
    #[serde(default = "default_session_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: default_session_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_session_name() -> String {
    "tokentally".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Defaults for live watch subscriptions.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    /// Minimum change in total units before a notification fires.
    #[serde(default = "default_threshold")]
    pub threshold: u64,

    /// Minimum time between two notifications, in milliseconds.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
}

impl WatchConfig {
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            throttle_ms: default_throttle_ms(),
        }
    }
}

fn default_threshold() -> u64 {
    1
}

fn default_throttle_ms() -> u64 {
    100
}

/// Terminal display configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DisplayConfig {
    /// Whether the live token display is shown.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Disable colored output.
    #[serde(default)]
    pub plain: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            plain: false,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Pricing table configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PricingConfig {
    /// Start from the built-in pricing table. Configured models are consulted first.
    #[serde(default = "default_true")]
    pub include_defaults: bool,

    /// Additional or overriding model prices, in declaration order.
    #[serde(default)]
    pub models: Vec<ModelPriceConfig>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            include_defaults: true,
            models: Vec::new(),
        }
    }
}

/// Price of one model, in USD per million units.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModelPriceConfig {
    /// Model identifier (e.g., "claude-sonnet-4").
    pub model: String,

    /// Provider serving the model. `None` matches any provider.
    #[serde(default)]
    pub provider: Option<String>,

    /// Cost per million input units.
    pub input_per_mtok: f64,

    /// Cost per million output units.
    pub output_per_mtok: f64,
}

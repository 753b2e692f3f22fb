// SPDX-FileCopyrightText: 2026 Tokentally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as known log levels, non-negative prices, and unique pricing entries.

use std::collections::HashSet;

use crate::diagnostic::ConfigError;
use crate::model::TallyConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &TallyConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.session.name.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "session.name must not be empty".to_string(),
        });
    }

    let level = config.session.log_level.to_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ConfigError::Validation {
            message: format!(
                "session.log_level `{}` is not one of {}",
                config.session.log_level,
                LOG_LEVELS.join(", ")
            ),
        });
    }

    let mut seen = HashSet::new();
    for (i, entry) in config.pricing.models.iter().enumerate() {
        if entry.model.trim().is_empty() {
            errors.push(ConfigError::Validation {
                message: format!("pricing.models[{i}].model must not be empty"),
            });
        }

        if entry.provider.as_deref().is_some_and(|p| p.trim().is_empty()) {
            errors.push(ConfigError::Validation {
                message: format!("pricing.models[{i}].provider must not be empty when set"),
            });
        }

        if !(entry.input_per_mtok >= 0.0 && entry.input_per_mtok.is_finite()) {
            errors.push(ConfigError::Validation {
                message: format!(
                    "pricing.models[{i}].input_per_mtok must be a non-negative number, got {}",
                    entry.input_per_mtok
                ),
            });
        }

        if !(entry.output_per_mtok >= 0.0 && entry.output_per_mtok.is_finite()) {
            errors.push(ConfigError::Validation {
                message: format!(
                    "pricing.models[{i}].output_per_mtok must be a non-negative number, got {}",
                    entry.output_per_mtok
                ),
            });
        }

        let key = (
            entry.model.to_lowercase(),
            entry.provider.as_ref().map(|p| p.to_lowercase()),
        );
        if !seen.insert(key) {
            let shown = match &entry.provider {
                Some(provider) => format!("{} ({provider})", entry.model),
                None => entry.model.clone(),
            };
            errors.push(ConfigError::Validation {
                message: format!("duplicate pricing entry `{shown}` in [[pricing.models]]"),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelPriceConfig;

    fn price(model: &str, provider: Option<&str>, input: f64, output: f64) -> ModelPriceConfig {
        ModelPriceConfig {
            model: model.to_string(),
            provider: provider.map(str::to_string),
            input_per_mtok: input,
            output_per_mtok: output,
        }
    }

    fn has_message(errors: &[ConfigError], needle: &str) -> bool {
        errors
            .iter()
            .any(|e| matches!(e, ConfigError::Validation { message } if message.contains(needle)))
    }

    #[test]
    fn default_config_validates() {
        let config = TallyConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn empty_session_name_fails_validation() {
        let mut config = TallyConfig::default();
        config.session.name = "  ".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(has_message(&errors, "session.name"));
    }

    #[test]
    fn unknown_log_level_fails_validation() {
        let mut config = TallyConfig::default();
        config.session.log_level = "loud".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(has_message(&errors, "session.log_level"));
    }

    #[test]
    fn negative_price_fails_validation() {
        let mut config = TallyConfig::default();
        config.pricing.models = vec![price("gpt-4o", None, -1.0, 10.0)];
        let errors = validate_config(&config).unwrap_err();
        assert!(has_message(&errors, "input_per_mtok"));
    }

    #[test]
    fn same_model_different_providers_is_allowed() {
        let mut config = TallyConfig::default();
        config.pricing.models = vec![
            price("gpt-4o", Some("openai"), 2.5, 10.0),
            price("gpt-4o", Some("azure"), 2.75, 11.0),
            price("gpt-4o", None, 2.5, 10.0),
        ];
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn duplicate_pricing_entry_fails_validation() {
        let mut config = TallyConfig::default();
        config.pricing.models = vec![
            price("gpt-4o", Some("openai"), 2.5, 10.0),
            price("GPT-4o", Some("OpenAI"), 3.0, 12.0),
        ];
        let errors = validate_config(&config).unwrap_err();
        assert!(has_message(&errors, "duplicate pricing entry `GPT-4o (OpenAI)`"));
    }

    #[test]
    fn collects_every_error() {
        let mut config = TallyConfig::default();
        config.session.name = String::new();
        config.pricing.models = vec![price("", None, f64::NAN, -2.0)];
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
    }
}

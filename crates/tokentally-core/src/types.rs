// SPDX-FileCopyrightText: 2026 Tokentally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Value types shared by the accounting engine and its consumers.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::TallyError;

/// Handle to a node in a usage tree.
///
/// Nodes are never removed during a session, so a handle stays valid for the
/// lifetime of the engine that issued it. Handles are allocated in creation
/// order: a larger id was created later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl NodeId {
    /// The session root is always the first node.
    pub const ROOT: NodeId = NodeId(0);
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Identifier of a watch subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WatchId(pub u64);

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watch#{}", self.0)
    }
}

/// Level of a node in the execution hierarchy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Top-level run (also used for the session root).
    Run,
    /// Nested run, typically one logical agent.
    SubRun,
    /// A single model call.
    Invocation,
}

/// Usage recorded for one unit of work, or the sum of several.
///
/// The total is always derived from the two counters and is never stored, so
/// `total_units() == input_units + output_units` holds for every value,
/// including aggregates, as long as the sum fits in a `u64`. Counters and the
/// total saturate at `u64::MAX` instead of wrapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "UsageRecordRepr", from = "UsageRecordRepr")]
pub struct UsageRecord {
    pub input_units: u64,
    pub output_units: u64,
    /// Model that produced the usage, if known.
    pub model: Option<String>,
    /// Provider serving the model, if known.
    pub provider: Option<String>,
}

impl UsageRecord {
    /// Create a record with the given counters and no model attribution.
    pub fn new(input_units: u64, output_units: u64) -> Self {
        Self {
            input_units,
            output_units,
            model: None,
            provider: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Sum of both counters, capped at `u64::MAX`.
    pub fn total_units(&self) -> u64 {
        self.input_units.saturating_add(self.output_units)
    }

    pub fn is_zero(&self) -> bool {
        self.input_units == 0 && self.output_units == 0
    }

    /// Add another record's counters into this one.
    ///
    /// When `other` names a model, its model and provider replace ours so a
    /// node's own usage reports the model of its latest invocation.
    pub fn accumulate(&mut self, other: &UsageRecord) {
        self.input_units = self.input_units.saturating_add(other.input_units);
        self.output_units = self.output_units.saturating_add(other.output_units);
        if other.model.is_some() {
            self.model.clone_from(&other.model);
            self.provider.clone_from(&other.provider);
        }
    }

    /// The same counters without model attribution.
    pub fn counts_only(&self) -> UsageRecord {
        UsageRecord::new(self.input_units, self.output_units)
    }

    /// Breakdown key for this record, if it names a model.
    pub fn model_key(&self) -> Option<ModelKey> {
        self.model.as_ref().map(|model| ModelKey {
            model: model.clone(),
            provider: self.provider.clone(),
        })
    }
}

/// Wire form of [`UsageRecord`]: the total is emitted for readers and
/// recomputed (never trusted) on the way back in.
#[derive(Serialize, Deserialize)]
struct UsageRecordRepr {
    input_units: u64,
    output_units: u64,
    #[serde(default)]
    total_units: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    provider: Option<String>,
}

impl From<UsageRecord> for UsageRecordRepr {
    fn from(record: UsageRecord) -> Self {
        Self {
            total_units: record.total_units(),
            input_units: record.input_units,
            output_units: record.output_units,
            model: record.model,
            provider: record.provider,
        }
    }
}

impl From<UsageRecordRepr> for UsageRecord {
    fn from(repr: UsageRecordRepr) -> Self {
        Self {
            input_units: repr.input_units,
            output_units: repr.output_units,
            model: repr.model,
            provider: repr.provider,
        }
    }
}

/// Key for per-model usage breakdowns: the same model served by two
/// providers is tracked separately.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModelKey {
    pub model: String,
    pub provider: Option<String>,
}

impl ModelKey {
    pub fn new(model: impl Into<String>, provider: Option<String>) -> Self {
        Self {
            model: model.into(),
            provider,
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.provider {
            Some(provider) => write!(f, "{} ({provider})", self.model),
            None => f.write_str(&self.model),
        }
    }
}

const RESERVED_KEYS: [&str; 2] = ["run_id", "workflow_id"];

/// Metadata attached to a usage node.
///
/// The identifiers used by lookups are typed fields; anything else goes into
/// `extra`. Serialized as a flat string map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    workflow_id: Option<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, String>,
}

impl NodeMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    pub fn workflow_id(&self) -> Option<&str> {
        self.workflow_id.as_deref()
    }

    /// Look up any metadata value, typed fields included.
    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            "run_id" => self.run_id(),
            "workflow_id" => self.workflow_id(),
            other => self.extra.get(other).map(String::as_str),
        }
    }

    pub fn extra(&self) -> &BTreeMap<String, String> {
        &self.extra
    }

    /// Check the metadata before it is attached to a node.
    pub fn validate(&self) -> Result<(), TallyError> {
        if self.run_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            return Err(TallyError::InvalidMetadata {
                message: "run_id must not be empty".to_string(),
            });
        }
        if self
            .workflow_id
            .as_deref()
            .is_some_and(|id| id.trim().is_empty())
        {
            return Err(TallyError::InvalidMetadata {
                message: "workflow_id must not be empty".to_string(),
            });
        }
        for key in self.extra.keys() {
            if key.trim().is_empty() {
                return Err(TallyError::InvalidMetadata {
                    message: "metadata keys must not be empty".to_string(),
                });
            }
            if RESERVED_KEYS.contains(&key.as_str()) {
                return Err(TallyError::InvalidMetadata {
                    message: format!("`{key}` must be set through its typed field"),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn accumulate_adopts_latest_model() {
        let mut own = UsageRecord::new(10, 5).with_model("gpt-4o");
        own.accumulate(&UsageRecord::new(1, 1));
        assert_eq!(own.model.as_deref(), Some("gpt-4o"));

        own.accumulate(&UsageRecord::new(2, 3).with_model("claude-sonnet-4").with_provider("anthropic"));
        assert_eq!(own.input_units, 13);
        assert_eq!(own.output_units, 9);
        assert_eq!(own.model.as_deref(), Some("claude-sonnet-4"));
        assert_eq!(own.provider.as_deref(), Some("anthropic"));
    }

    #[test]
    fn counters_saturate_at_max() {
        let near = UsageRecord::new(u64::MAX - 1, 5);
        assert_eq!(near.total_units(), u64::MAX);

        let mut own = UsageRecord::new(u64::MAX, 0);
        own.accumulate(&UsageRecord::new(10, 3));
        assert_eq!(own.input_units, u64::MAX);
        assert_eq!(own.output_units, 3);
        assert_eq!(own.total_units(), u64::MAX);
    }

    #[test]
    fn serialized_total_is_derived() {
        let json = serde_json::to_value(UsageRecord::new(100, 50)).unwrap();
        assert_eq!(json["total_units"], 150);
        assert!(json.get("model").is_none());

        // A bogus total on the wire is ignored.
        let parsed: UsageRecord =
            serde_json::from_str(r#"{"input_units":1,"output_units":2,"total_units":99}"#).unwrap();
        assert_eq!(parsed.total_units(), 3);
    }

    #[test]
    fn node_kind_display_and_parse() {
        use std::str::FromStr;
        assert_eq!(NodeKind::SubRun.to_string(), "sub_run");
        assert_eq!(NodeKind::from_str("invocation").unwrap(), NodeKind::Invocation);
        assert_eq!(serde_json::to_string(&NodeKind::Run).unwrap(), "\"run\"");
    }

    #[test]
    fn model_key_display() {
        assert_eq!(ModelKey::new("gpt-4o", None).to_string(), "gpt-4o");
        assert_eq!(
            ModelKey::new("gpt-4o", Some("azure".into())).to_string(),
            "gpt-4o (azure)"
        );
    }

    #[test]
    fn metadata_serializes_flat() {
        let meta = NodeMetadata::new()
            .with_run_id("run-123")
            .with_entry("agent", "finder");
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["run_id"], "run-123");
        assert_eq!(json["agent"], "finder");
        assert!(json.get("workflow_id").is_none());
        assert_eq!(meta.get("agent"), Some("finder"));
        assert_eq!(meta.get("run_id"), Some("run-123"));
    }

    #[test]
    fn metadata_validation() {
        assert!(NodeMetadata::new().validate().is_ok());
        assert!(NodeMetadata::new().with_run_id(" ").validate().is_err());
        assert!(NodeMetadata::new().with_workflow_id("").validate().is_err());
        assert!(NodeMetadata::new().with_entry("run_id", "x").validate().is_err());
        assert!(NodeMetadata::new().with_entry("", "x").validate().is_err());
    }

    proptest! {
        #[test]
        fn total_always_matches_parts(records in prop::collection::vec((0u64..1_000_000, 0u64..1_000_000), 0..32)) {
            let mut sum = UsageRecord::default();
            for (input, output) in records {
                let record = UsageRecord::new(input, output);
                prop_assert_eq!(record.total_units(), input + output);
                sum.accumulate(&record);
                prop_assert_eq!(sum.total_units(), sum.input_units + sum.output_units);
            }
        }
    }
}

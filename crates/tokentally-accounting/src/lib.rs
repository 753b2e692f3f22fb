// SPDX-FileCopyrightText: 2026 Tokentally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hierarchical usage accounting for tokentally.
//!
//! This crate provides:
//! - **Usage tree**: run, sub-run and invocation nodes with on-demand aggregates
//! - **Accounting engine**: a shared, thread-safe session handle
//! - **Execution contexts**: per-flow attribution stacks with scoped guards
//! - **Watches**: threshold and throttle based live notifications
//! - **Run reports**: the structured usage/cost payload for one run

pub mod context;
pub mod engine;
pub mod query;
pub mod recording;
pub mod report;
pub mod tree;
pub mod watch;

pub use context::{ContextScope, ExecutionContext};
pub use engine::{AccountingEngine, NodeInfo, UsageSummary, WeakEngine};
pub use query::NodeQuery;
pub use report::{ModelUsageReport, RunIdentity, RunReport, RunReportResponse};
pub use tree::NodeSnapshot;
pub use watch::{WatchCallback, WatchEvent};

// SPDX-FileCopyrightText: 2026 Tokentally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Terminal display adapter for tokentally sessions.
//!
//! A consumer of the public engine API only: it subscribes to the session
//! root through a watch and redraws totals when notified.

pub mod format;
pub mod progress;

pub use format::{format_cost, format_units};
pub use progress::{
    DisplayGuard, DisplayOptions, DrawTarget, PauseGuard, TokenProgressDisplay, render_line,
};

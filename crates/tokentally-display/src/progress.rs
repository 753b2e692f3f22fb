// SPDX-FileCopyrightText: 2026 Tokentally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Live token usage status line.
//!
//! The display watches the session root and redraws one line with the
//! session totals whenever the watch fires:
//!
//! ```text
//! Token Usage  TOTAL       12,345     $0.0421
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokentally_accounting::{AccountingEngine, UsageSummary, WeakEngine};
use tokentally_config::model::{DisplayConfig, WatchConfig};
use tokentally_core::{TallyError, WatchId};
use tracing::debug;

use crate::format::{format_cost, format_units};

/// Where the status line is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawTarget {
    Stderr,
    /// Nothing is drawn; renders are still tracked.
    Hidden,
}

impl DrawTarget {
    fn build(self) -> ProgressDrawTarget {
        match self {
            Self::Stderr => ProgressDrawTarget::stderr(),
            Self::Hidden => ProgressDrawTarget::hidden(),
        }
    }
}

/// Display settings.
#[derive(Debug, Clone)]
pub struct DisplayOptions {
    pub threshold: u64,
    pub throttle: Duration,
    pub plain: bool,
    pub target: DrawTarget,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            threshold: 1,
            throttle: Duration::from_millis(100),
            plain: false,
            target: DrawTarget::Stderr,
        }
    }
}

impl DisplayOptions {
    pub fn from_config(watch: &WatchConfig, display: &DisplayConfig) -> Self {
        Self {
            threshold: watch.threshold,
            throttle: watch.throttle(),
            plain: display.plain,
            target: DrawTarget::Stderr,
        }
    }

    pub fn with_target(mut self, target: DrawTarget) -> Self {
        self.target = target;
        self
    }
}

#[derive(Debug, Default)]
struct DisplayState {
    watch: Option<WatchId>,
    paused: bool,
    started: bool,
}

/// Live status line showing total units and cost of a session.
pub struct TokenProgressDisplay {
    engine: AccountingEngine,
    options: DisplayOptions,
    bar: ProgressBar,
    state: Mutex<DisplayState>,
    last_rendered: Arc<Mutex<Option<String>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Plain-text form of the status line.
pub fn render_line(summary: &UsageSummary) -> String {
    format!(
        "Token Usage  TOTAL  {}  {}",
        format_units(summary.usage.total_units()),
        format_cost(summary.cost)
    )
}

fn draw(bar: &ProgressBar, summary: &UsageSummary, plain: bool) {
    let tokens = format!("{:>12}", format_units(summary.usage.total_units()));
    let cost = format!("{:>10}", format_cost(summary.cost));
    if plain {
        bar.set_prefix("Token Usage  TOTAL");
        bar.set_message(format!("{tokens}  {cost}"));
    } else {
        bar.set_prefix(format!("{}  {}", "Token Usage".bold().cyan(), "TOTAL".bold()));
        bar.set_message(format!("{}  {}", tokens.bold().green(), cost.bold().yellow()));
    }
}

fn refresh(engine: &WeakEngine, bar: &ProgressBar, rendered: &Mutex<Option<String>>, plain: bool) {
    let Some(engine) = engine.upgrade() else {
        return;
    };
    let summary = engine.get_summary();
    draw(bar, &summary, plain);
    *lock(rendered) = Some(render_line(&summary));
}

impl TokenProgressDisplay {
    pub fn new(engine: AccountingEngine, options: DisplayOptions) -> Self {
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::hidden());
        if let Ok(style) = ProgressStyle::with_template("{prefix} {msg}") {
            bar.set_style(style);
        }
        Self {
            engine,
            options,
            bar,
            state: Mutex::new(DisplayState::default()),
            last_rendered: Arc::new(Mutex::new(None)),
        }
    }

    /// Show the line and subscribe to the session root.
    ///
    /// Calling `start` on a running display does nothing. Needs a running
    /// Tokio runtime for the underlying watch.
    pub fn start(&self) -> Result<(), TallyError> {
        let mut state = lock(&self.state);
        if state.started {
            return Ok(());
        }

        let engine = self.engine.downgrade();
        let bar = self.bar.clone();
        let rendered = Arc::clone(&self.last_rendered);
        let plain = self.options.plain;
        let watch = self.engine.watch(
            self.engine.root(),
            self.options.threshold,
            self.options.throttle,
            move |_| refresh(&engine, &bar, &rendered, plain),
        )?;

        if !state.paused {
            self.bar.set_draw_target(self.options.target.build());
        }
        refresh(&self.engine.downgrade(), &self.bar, &self.last_rendered, plain);
        state.watch = Some(watch);
        state.started = true;
        debug!(watch_id = %watch, "token display started");
        Ok(())
    }

    /// Unsubscribe and leave the final line on screen. Safe to call more
    /// than once.
    pub fn stop(&self) {
        let mut state = lock(&self.state);
        if let Some(watch) = state.watch.take() {
            self.engine.unwatch(watch);
            refresh(&self.engine.downgrade(), &self.bar, &self.last_rendered, self.options.plain);
            debug!(watch_id = %watch, "token display stopped");
        }
        if state.started {
            self.bar.finish();
            state.started = false;
        }
    }

    /// Hide the line, e.g. while something else writes to the terminal.
    /// Updates keep being tracked.
    pub fn pause(&self) {
        let mut state = lock(&self.state);
        if state.paused {
            return;
        }
        state.paused = true;
        self.bar.set_draw_target(ProgressDrawTarget::hidden());
    }

    /// Show the line again after [`pause`](Self::pause).
    pub fn resume(&self) {
        let mut state = lock(&self.state);
        if !state.paused {
            return;
        }
        state.paused = false;
        if state.started {
            self.bar.set_draw_target(self.options.target.build());
            self.bar.tick();
        }
    }

    /// Pause until the returned guard is dropped.
    pub fn paused(&self) -> PauseGuard<'_> {
        self.pause();
        PauseGuard { display: self }
    }

    /// Start the display and stop it when the guard drops.
    pub fn scoped(&self) -> Result<DisplayGuard<'_>, TallyError> {
        self.start()?;
        Ok(DisplayGuard { display: self })
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).started
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.state).paused
    }

    /// Plain-text form of the most recent render.
    pub fn last_rendered(&self) -> Option<String> {
        lock(&self.last_rendered).clone()
    }
}

impl Drop for TokenProgressDisplay {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Guard returned by [`TokenProgressDisplay::paused`].
pub struct PauseGuard<'a> {
    display: &'a TokenProgressDisplay,
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        self.display.resume();
    }
}

/// Guard returned by [`TokenProgressDisplay::scoped`].
pub struct DisplayGuard<'a> {
    display: &'a TokenProgressDisplay,
}

impl DisplayGuard<'_> {
    pub fn display(&self) -> &TokenProgressDisplay {
        self.display
    }
}

impl Drop for DisplayGuard<'_> {
    fn drop(&mut self) {
        self.display.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokentally_core::{NodeKind, NodeMetadata, UsageRecord};
    use tokentally_cost::{PricingEntry, PricingTable};

    fn engine() -> AccountingEngine {
        AccountingEngine::new(
            "session",
            PricingTable::new(vec![PricingEntry::new("m", None, 3.0, 15.0)]),
        )
    }

    fn hidden() -> DisplayOptions {
        DisplayOptions {
            plain: true,
            ..DisplayOptions::default()
        }
        .with_target(DrawTarget::Hidden)
    }

    #[tokio::test(start_paused = true)]
    async fn renders_totals_after_updates() {
        let engine = engine();
        let display = TokenProgressDisplay::new(engine.clone(), hidden());
        display.start().unwrap();
        assert_eq!(
            display.last_rendered().as_deref(),
            Some("Token Usage  TOTAL  0  $0.0000")
        );

        let mut ctx = engine.context();
        ctx.enter(NodeKind::Run, "R1", NodeMetadata::new()).unwrap();
        ctx.record_usage(UsageRecord::new(1_000, 500).with_model("m"))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(
            display.last_rendered().as_deref(),
            Some("Token Usage  TOTAL  1,500  $0.0105")
        );
        display.stop();
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_unwatches() {
        let engine = engine();
        let display = TokenProgressDisplay::new(engine.clone(), hidden());
        display.start().unwrap();
        display.start().unwrap();
        assert_eq!(engine.watch_count(), 1);
        assert!(display.is_running());

        display.stop();
        display.stop();
        assert_eq!(engine.watch_count(), 0);
        assert!(!display.is_running());
    }

    #[tokio::test]
    async fn pause_guard_resumes() {
        let display = TokenProgressDisplay::new(engine(), hidden());
        display.start().unwrap();
        {
            let _paused = display.paused();
            assert!(display.is_paused());
            // Nested pause is a no-op.
            display.pause();
        }
        assert!(!display.is_paused());
    }

    #[tokio::test]
    async fn scoped_guard_stops_on_drop() {
        let engine = engine();
        let display = TokenProgressDisplay::new(engine.clone(), hidden());
        {
            let guard = display.scoped().unwrap();
            assert!(guard.display().is_running());
            assert_eq!(engine.watch_count(), 1);
        }
        assert_eq!(engine.watch_count(), 0);
        assert!(!display.is_running());
    }

    #[test]
    fn start_without_runtime_fails() {
        let display = TokenProgressDisplay::new(engine(), hidden());
        assert!(matches!(display.start(), Err(TallyError::NoRuntime)));
        assert!(!display.is_running());
    }

    #[test]
    fn options_follow_config() {
        let watch = WatchConfig {
            threshold: 50,
            throttle_ms: 250,
        };
        let display = DisplayConfig {
            enabled: true,
            plain: true,
        };
        let options = DisplayOptions::from_config(&watch, &display);
        assert_eq!(options.threshold, 50);
        assert_eq!(options.throttle, Duration::from_millis(250));
        assert!(options.plain);
    }
}

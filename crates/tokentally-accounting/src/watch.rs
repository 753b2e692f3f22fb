// SPDX-FileCopyrightText: 2026 Tokentally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Watch subscriptions and throttled dispatch.
//!
//! A watch fires when the aggregate usage of its node has grown by at least
//! `threshold` units since it last fired, and at most once per `throttle`
//! window. The first window opens when the watch is registered. A qualifying
//! change inside an open window schedules a single trailing dispatch at the
//! window's end, which reports the aggregate as it is at that moment.
//!
//! Callbacks never run on the recording thread. Every notification goes
//! through one dispatcher task on the Tokio runtime that was current when the
//! first watch was registered, so callbacks run one at a time and a slow
//! callback delays other notifications but never a `record_usage` call.

use std::cell::Cell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokentally_core::{NodeId, TallyError, UsageRecord, WatchId};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::recording;

/// Callback invoked with each watch notification.
pub type WatchCallback = Arc<dyn Fn(&WatchEvent) + Send + Sync>;

/// Notification delivered to a watch callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchEvent {
    pub watch_id: WatchId,
    pub node: NodeId,
    pub node_name: String,
    /// Aggregate usage of the watched node when the notification was produced.
    pub usage: UsageRecord,
    pub fired_at: DateTime<Utc>,
}

/// Read access to current aggregates, used by trailing dispatches.
pub(crate) trait AggregateSource: Send + Sync {
    fn aggregate(&self, node: NodeId) -> Option<UsageRecord>;
}

thread_local! {
    /// Watch whose callback is running on this thread, if any.
    static DISPATCHING: Cell<Option<WatchId>> = const { Cell::new(None) };
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ThrottleState {
    last_fired_total: u64,
    last_fired_at: Option<Instant>,
    /// A trailing dispatch is scheduled for this window.
    pending: bool,
}

enum Decision {
    Skip,
    FireNow,
    Defer(Instant),
}

struct Subscription {
    id: WatchId,
    node: NodeId,
    node_name: String,
    threshold: u64,
    throttle: Duration,
    registered_at: Instant,
    callback: WatchCallback,
    state: Mutex<ThrottleState>,
    active: AtomicBool,
    /// Held for the duration of each callback; `unwatch` takes it to wait out
    /// an in-flight invocation.
    gate: Mutex<()>,
    cancel: CancellationToken,
}

impl Subscription {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn lock_state(&self) -> MutexGuard<'_, ThrottleState> {
        lock(&self.state)
    }

    /// Decide what to do about a new aggregate total.
    ///
    /// Callers hold the state lock until the resulting dispatch is queued, so
    /// the queue order matches the decision order. A total below the last
    /// delivered one is stale and never delivered.
    fn decide(&self, state: &mut ThrottleState, current_total: u64, now: Instant) -> Decision {
        if !self.is_active() || state.pending {
            return Decision::Skip;
        }
        if current_total < state.last_fired_total
            || current_total - state.last_fired_total < self.threshold
        {
            return Decision::Skip;
        }

        let window_start = state.last_fired_at.unwrap_or(self.registered_at);
        // A throttle too large to represent as an instant never closes.
        let Some(window_end) = window_start.checked_add(self.throttle) else {
            return Decision::Skip;
        };
        if now >= window_end {
            state.last_fired_total = current_total;
            state.last_fired_at = Some(now);
            Decision::FireNow
        } else {
            state.pending = true;
            Decision::Defer(window_end)
        }
    }

    /// Close the window of a trailing dispatch with the aggregate as it is
    /// now. Returns false when there is nothing new to deliver.
    fn settle_trailing(&self, state: &mut ThrottleState, latest_total: u64, now: Instant) -> bool {
        state.pending = false;
        if !self.is_active() || latest_total < state.last_fired_total {
            return false;
        }
        state.last_fired_total = latest_total;
        state.last_fired_at = Some(now);
        true
    }

    fn event(&self, usage: UsageRecord) -> WatchEvent {
        WatchEvent {
            watch_id: self.id,
            node: self.node,
            node_name: self.node_name.clone(),
            usage,
            fired_at: Utc::now(),
        }
    }

    fn deliver(&self, event: &WatchEvent) {
        let _gate = lock(&self.gate);
        if !self.is_active() {
            trace!(watch_id = %self.id, "dropping notification for removed watch");
            return;
        }

        let started = std::time::Instant::now();
        DISPATCHING.with(|current| current.set(Some(self.id)));
        let outcome = catch_unwind(AssertUnwindSafe(|| (self.callback)(event)));
        DISPATCHING.with(|current| current.set(None));

        match outcome {
            Ok(()) => {
                recording::record_dispatch(started.elapsed().as_secs_f64());
                trace!(
                    watch_id = %self.id,
                    node = %self.node,
                    total_units = event.usage.total_units(),
                    "watch notified"
                );
            }
            Err(_) => {
                recording::record_callback_panic();
                warn!(watch_id = %self.id, node = %self.node, "watch callback panicked");
            }
        }
    }

    /// Stop future deliveries and cancel any scheduled trailing dispatch.
    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
        self.cancel.cancel();
    }

    /// Block until an in-flight callback for this watch has returned.
    ///
    /// Returns immediately when called from inside this watch's own callback.
    fn wait_idle(&self) {
        if DISPATCHING.with(Cell::get) == Some(self.id) {
            return;
        }
        drop(lock(&self.gate));
    }
}

struct Dispatch {
    subscription: Arc<Subscription>,
    event: WatchEvent,
}

struct Dispatcher {
    tx: mpsc::UnboundedSender<Dispatch>,
    runtime: Handle,
}

impl Dispatcher {
    fn start(runtime: Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Dispatch>();
        runtime.spawn(async move {
            while let Some(dispatch) = rx.recv().await {
                dispatch.subscription.deliver(&dispatch.event);
            }
            debug!("watch dispatcher stopped");
        });
        Self { tx, runtime }
    }

    fn send(&self, subscription: Arc<Subscription>, event: WatchEvent) {
        if self.tx.send(Dispatch { subscription, event }).is_err() {
            warn!("watch dispatcher is not running, notification dropped");
        }
    }

    /// Schedule a trailing dispatch at `deadline`.
    fn defer(
        &self,
        subscription: Arc<Subscription>,
        deadline: Instant,
        source: Weak<dyn AggregateSource>,
    ) {
        let tx = self.tx.clone();
        self.runtime.spawn(async move {
            tokio::select! {
                () = subscription.cancel.cancelled() => return,
                () = tokio::time::sleep_until(deadline) => {}
            }

            // The aggregate is read under the state lock: a recording that
            // lands after the read sees `pending` cleared and is evaluated
            // on its own.
            let mut state = subscription.lock_state();
            let Some(latest) = source
                .upgrade()
                .and_then(|source| source.aggregate(subscription.node))
            else {
                state.pending = false;
                return;
            };
            if !subscription.settle_trailing(&mut state, latest.total_units(), Instant::now()) {
                return;
            }
            let event = subscription.event(latest.counts_only());
            if tx
                .send(Dispatch { subscription: Arc::clone(&subscription), event })
                .is_err()
            {
                warn!("watch dispatcher is not running, trailing notification dropped");
            }
            drop(state);
        });
    }
}

/// Registry of active watch subscriptions.
pub(crate) struct WatchRegistry {
    next_id: AtomicU64,
    subscriptions: DashMap<WatchId, Arc<Subscription>>,
    by_node: DashMap<NodeId, Vec<WatchId>>,
    dispatcher: OnceLock<Dispatcher>,
}

impl WatchRegistry {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscriptions: DashMap::new(),
            by_node: DashMap::new(),
            dispatcher: OnceLock::new(),
        }
    }

    /// The dispatcher, started on the current runtime on first use.
    fn dispatcher(&self) -> Result<&Dispatcher, TallyError> {
        if let Some(dispatcher) = self.dispatcher.get() {
            return Ok(dispatcher);
        }
        let runtime = Handle::try_current().map_err(|_| TallyError::NoRuntime)?;
        // A concurrent caller may win the race; the losing dispatcher's
        // channel closes when it is dropped and its task exits.
        let _ = self.dispatcher.set(Dispatcher::start(runtime));
        self.dispatcher
            .get()
            .ok_or_else(|| TallyError::Internal("watch dispatcher failed to start".into()))
    }

    /// Register a watch. `baseline` is the node's aggregate total right now;
    /// deltas are measured from it.
    pub(crate) fn register(
        &self,
        node: NodeId,
        node_name: String,
        threshold: u64,
        throttle: Duration,
        baseline: u64,
        callback: WatchCallback,
    ) -> Result<WatchId, TallyError> {
        self.dispatcher()?;

        let id = WatchId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let subscription = Arc::new(Subscription {
            id,
            node,
            node_name,
            threshold,
            throttle,
            registered_at: Instant::now(),
            callback,
            state: Mutex::new(ThrottleState {
                last_fired_total: baseline,
                last_fired_at: None,
                pending: false,
            }),
            active: AtomicBool::new(true),
            gate: Mutex::new(()),
            cancel: CancellationToken::new(),
        });

        self.subscriptions.insert(id, subscription);
        self.by_node.entry(node).or_default().push(id);
        recording::set_active_watches(self.subscriptions.len());
        debug!(watch_id = %id, node = %node, threshold, throttle_ms = throttle.as_millis() as u64, "watch registered");
        Ok(id)
    }

    /// Remove a watch. Returns false for an unknown or already removed id.
    ///
    /// When this returns, the callback is not running and will not run
    /// again, unless this is called from inside that same callback, in which
    /// case only future invocations are prevented.
    pub(crate) fn unregister(&self, id: WatchId) -> bool {
        let Some((_, subscription)) = self.subscriptions.remove(&id) else {
            return false;
        };

        if let Some(mut ids) = self.by_node.get_mut(&subscription.node) {
            ids.retain(|watch| *watch != id);
        }
        self.by_node
            .remove_if(&subscription.node, |_, ids| ids.is_empty());

        subscription.deactivate();
        subscription.wait_idle();
        recording::set_active_watches(self.subscriptions.len());
        debug!(watch_id = %id, "watch removed");
        true
    }

    pub(crate) fn is_watched(&self, node: NodeId) -> bool {
        self.by_node.contains_key(&node)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Evaluate the watches on `node` against its new aggregate.
    pub(crate) fn evaluate(
        &self,
        node: NodeId,
        aggregate: &UsageRecord,
        source: &Weak<dyn AggregateSource>,
    ) {
        let ids = match self.by_node.get(&node) {
            Some(ids) => ids.clone(),
            None => return,
        };
        let Some(dispatcher) = self.dispatcher.get() else {
            return;
        };

        let now = Instant::now();
        let total = aggregate.total_units();
        for id in ids {
            let Some(subscription) = self.subscriptions.get(&id).map(|s| Arc::clone(s.value()))
            else {
                continue;
            };
            let mut state = subscription.lock_state();
            match subscription.decide(&mut state, total, now) {
                Decision::Skip => {}
                Decision::FireNow => {
                    let event = subscription.event(aggregate.counts_only());
                    dispatcher.send(Arc::clone(&subscription), event);
                }
                Decision::Defer(deadline) => {
                    trace!(watch_id = %id, "notification deferred to end of throttle window");
                    dispatcher.defer(Arc::clone(&subscription), deadline, source.clone());
                }
            }
            drop(state);
        }
    }
}

impl Drop for WatchRegistry {
    fn drop(&mut self) {
        for entry in self.subscriptions.iter() {
            entry.value().deactivate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(u64);

    impl AggregateSource for Fixed {
        fn aggregate(&self, _node: NodeId) -> Option<UsageRecord> {
            Some(UsageRecord::new(self.0, 0))
        }
    }

    fn subscription(threshold: u64, throttle_ms: u64) -> Subscription {
        Subscription {
            id: WatchId(1),
            node: NodeId::ROOT,
            node_name: "root".into(),
            threshold,
            throttle: Duration::from_millis(throttle_ms),
            registered_at: Instant::now(),
            callback: Arc::new(|_: &WatchEvent| {}),
            state: Mutex::new(ThrottleState {
                last_fired_total: 0,
                last_fired_at: None,
                pending: false,
            }),
            active: AtomicBool::new(true),
            gate: Mutex::new(()),
            cancel: CancellationToken::new(),
        }
    }

    fn decide(sub: &Subscription, total: u64) -> Decision {
        sub.decide(&mut sub.lock_state(), total, Instant::now())
    }

    #[tokio::test(start_paused = true)]
    async fn below_threshold_skips() {
        let sub = subscription(100, 0);
        assert!(matches!(decide(&sub, 99), Decision::Skip));
        assert!(matches!(decide(&sub, 100), Decision::FireNow));
        // Delta is measured from the last firing.
        assert!(matches!(decide(&sub, 150), Decision::Skip));
        assert!(matches!(decide(&sub, 200), Decision::FireNow));
    }

    #[tokio::test(start_paused = true)]
    async fn first_window_opens_at_registration() {
        let sub = subscription(1, 100);
        let registered = sub.registered_at;
        match decide(&sub, 10) {
            Decision::Defer(deadline) => assert_eq!(deadline, registered + Duration::from_millis(100)),
            _ => panic!("expected a deferred dispatch"),
        }
        // Window already has a pending dispatch.
        assert!(matches!(decide(&sub, 20), Decision::Skip));

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(sub.settle_trailing(&mut sub.lock_state(), 20, Instant::now()));
        assert!(matches!(decide(&sub, 21), Decision::Defer(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_total_is_never_delivered() {
        let sub = subscription(0, 0);
        assert!(matches!(decide(&sub, 50), Decision::FireNow));
        assert!(matches!(decide(&sub, 40), Decision::Skip));
        assert_eq!(sub.lock_state().last_fired_total, 50);
        assert!(matches!(decide(&sub, 50), Decision::FireNow));
    }

    #[tokio::test(start_paused = true)]
    async fn trailing_settle_keeps_newest_total() {
        let sub = subscription(1, 100);
        assert!(matches!(decide(&sub, 10), Decision::Defer(_)));
        {
            let mut state = sub.lock_state();
            state.last_fired_total = 30;
        }
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(!sub.settle_trailing(&mut sub.lock_state(), 20, Instant::now()));
        let state = sub.lock_state();
        assert!(!state.pending);
        assert_eq!(state.last_fired_total, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_throttle_never_fires() {
        let mut sub = subscription(1, 0);
        sub.throttle = Duration::MAX;
        assert!(matches!(decide(&sub, 10), Decision::Skip));
        assert!(!sub.lock_state().pending);
    }

    #[tokio::test(start_paused = true)]
    async fn inactive_subscription_never_fires() {
        let sub = subscription(1, 0);
        sub.deactivate();
        assert!(matches!(decide(&sub, 1_000), Decision::Skip));
        assert!(sub.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn unregister_unknown_is_false() {
        let registry = WatchRegistry::new();
        assert!(!registry.unregister(WatchId(77)));
        let id = registry
            .register(NodeId::ROOT, "root".into(), 1, Duration::ZERO, 0, Arc::new(|_: &WatchEvent| {}))
            .unwrap();
        assert!(registry.is_watched(NodeId::ROOT));
        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(!registry.is_watched(NodeId::ROOT));
        assert!(registry.is_empty());
    }

    #[test]
    fn register_without_runtime_fails() {
        let registry = WatchRegistry::new();
        let err = registry
            .register(NodeId::ROOT, "root".into(), 1, Duration::ZERO, 0, Arc::new(|_: &WatchEvent| {}))
            .unwrap_err();
        assert!(matches!(err, TallyError::NoRuntime));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn panicking_callback_is_contained() {
        let registry = WatchRegistry::new();
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        registry
            .register(
                NodeId::ROOT,
                "root".into(),
                1,
                Duration::ZERO,
                0,
                Arc::new(move |_: &WatchEvent| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    panic!("callback failure");
                }),
            )
            .unwrap();

        let source: Arc<dyn AggregateSource> = Arc::new(Fixed(0));
        let weak = Arc::downgrade(&source);
        registry.evaluate(NodeId::ROOT, &UsageRecord::new(5, 0), &weak);
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.evaluate(NodeId::ROOT, &UsageRecord::new(10, 0), &weak);
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The dispatcher survives and keeps delivering.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(logs_contain("watch callback panicked"));
    }

    #[tokio::test(start_paused = true)]
    async fn trailing_dispatch_reads_latest_aggregate() {
        let registry = WatchRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry
            .register(
                NodeId::ROOT,
                "root".into(),
                1,
                Duration::from_millis(100),
                0,
                Arc::new(move |event: &WatchEvent| {
                    sink.lock().unwrap().push(event.usage.total_units());
                }),
            )
            .unwrap();

        let source: Arc<dyn AggregateSource> = Arc::new(Fixed(500));
        let weak = Arc::downgrade(&source);
        registry.evaluate(NodeId::ROOT, &UsageRecord::new(10, 0), &weak);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(*seen.lock().unwrap(), vec![500]);
    }
}

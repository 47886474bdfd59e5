//! Rolling-window health monitor for the tracking platform
//!
//! One monitor exists per platform target. It is constructed at startup and
//! handed to the orchestrator and chunk processor; tests build a fresh one
//! per case. Recording never fails: bad input is dropped with a warning.
//!
//! Subscribers are called synchronously after the new status is stored, in
//! the order transitions happen, and only when the status changes. A
//! callback must not record outcomes on the monitor that is notifying it.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::types::{HealthMetrics, HealthStatus, HealthThresholds};

/// Latencies above this are treated as clock errors and dropped
const MAX_PLAUSIBLE_LATENCY: Duration = Duration::from_secs(3600);

type Callback = Arc<dyn Fn(&HealthMetrics) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    success: bool,
    latency: Duration,
}

#[derive(Debug)]
struct State {
    window: VecDeque<Sample>,
    consecutive_failures: u32,
    error_count: u64,
    total_requests: u64,
    issues: VecDeque<String>,
    status: HealthStatus,
    recovering: bool,
    last_check: DateTime<Utc>,
}

impl State {
    fn vacant(window_size: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(window_size),
            consecutive_failures: 0,
            error_count: 0,
            total_requests: 0,
            issues: VecDeque::new(),
            status: HealthStatus::Healthy,
            recovering: false,
            last_check: Utc::now(),
        }
    }

    fn success_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 1.0;
        }
        let successes = self.window.iter().filter(|s| s.success).count();
        successes as f64 / self.window.len() as f64
    }

    fn mean_latency_ms(&self) -> u64 {
        if self.window.is_empty() {
            return 0;
        }
        let total: u128 = self.window.iter().map(|s| s.latency.as_millis()).sum();
        (total / self.window.len() as u128) as u64
    }

    fn snapshot(&self) -> HealthMetrics {
        HealthMetrics {
            is_healthy: self.status == HealthStatus::Healthy,
            last_check: self.last_check,
            response_time: self.mean_latency_ms(),
            success_rate: self.success_rate(),
            error_count: self.error_count,
            total_requests: self.total_requests,
            status: self.status,
            issues: self.issues.iter().cloned().collect(),
            consecutive_failures: self.consecutive_failures,
            recovering: self.recovering,
        }
    }

    fn push_issue(&mut self, issue: String, cap: usize) {
        if cap == 0 {
            return;
        }
        if let Some(pos) = self.issues.iter().position(|i| *i == issue) {
            self.issues.remove(pos);
        }
        self.issues.push_back(issue);
        while self.issues.len() > cap {
            self.issues.pop_front();
        }
    }
}

struct Inner {
    thresholds: HealthThresholds,
    state: Mutex<State>,
    /// Serializes "mutate then notify" so deliveries keep transition order
    delivery: Mutex<()>,
    subscribers: Mutex<Vec<(u64, Callback)>>,
    next_subscriber: AtomicU64,
}

/// Shared handle to the platform health monitor
#[derive(Clone)]
pub struct HealthMonitor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("thresholds", &self.inner.thresholds)
            .field("status", &lock(&self.inner.state).status)
            .finish()
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(HealthThresholds::default())
    }
}

impl HealthMonitor {
    pub fn new(thresholds: HealthThresholds) -> Self {
        let window_size = thresholds.window_size.max(1);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::vacant(window_size)),
                thresholds,
                delivery: Mutex::new(()),
                subscribers: Mutex::new(Vec::new()),
                next_subscriber: AtomicU64::new(1),
            }),
        }
    }

    pub fn thresholds(&self) -> &HealthThresholds {
        &self.inner.thresholds
    }

    /// Record the completion of one platform call
    pub fn record_outcome(&self, success: bool, latency: Duration, error_kind: Option<&str>) {
        if success && error_kind.is_some() {
            warn!(
                error_kind = error_kind.unwrap_or_default(),
                "Dropping health outcome: success reported with an error kind"
            );
            return;
        }
        if latency > MAX_PLAUSIBLE_LATENCY {
            warn!(latency_ms = latency.as_millis() as u64, "Dropping health outcome: implausible latency");
            return;
        }

        let _delivery = lock(&self.inner.delivery);
        let thresholds = &self.inner.thresholds;

        let changed = {
            let mut state = lock(&self.inner.state);
            state.window.push_back(Sample { success, latency });
            while state.window.len() > thresholds.window_size.max(1) {
                state.window.pop_front();
            }
            state.total_requests += 1;
            state.last_check = Utc::now();

            if success {
                state.consecutive_failures = 0;
            } else {
                state.consecutive_failures += 1;
                state.error_count += 1;
                let issue = describe_issue(error_kind.unwrap_or("unknown"));
                state.push_issue(issue, thresholds.max_issues);
            }

            let previous = state.status;
            let next = thresholds.classify(state.success_rate(), state.consecutive_failures);
            state.status = next;
            match next {
                HealthStatus::Unhealthy => state.recovering = true,
                HealthStatus::Healthy => state.recovering = false,
                HealthStatus::Degraded => {},
            }

            (previous != next).then(|| (previous, state.snapshot()))
        };

        if let Some((previous, snapshot)) = changed {
            log_transition(previous, &snapshot);
            self.notify(&snapshot);
        }
    }

    /// Current snapshot; never blocks on subscriber delivery
    pub fn get_health_metrics(&self) -> HealthMetrics {
        lock(&self.inner.state).snapshot()
    }

    pub fn status(&self) -> HealthStatus {
        lock(&self.inner.state).status
    }

    /// Register a callback for status transitions
    ///
    /// The callback is invoked once immediately with the current snapshot,
    /// then once per status change. Dropping the returned [`Subscription`]
    /// unsubscribes.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&HealthMetrics) + Send + Sync + 'static,
    {
        let _delivery = lock(&self.inner.delivery);
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let callback: Callback = Arc::new(callback);
        lock(&self.inner.subscribers).push((id, callback.clone()));

        let snapshot = self.get_health_metrics();
        deliver(id, &callback, &snapshot);

        debug!(subscriber = id, "Health subscriber registered");
        Subscription {
            id,
            monitor: Arc::downgrade(&self.inner),
        }
    }

    /// Reset the window and counters without dropping subscribers
    pub fn clear_history(&self) {
        let _delivery = lock(&self.inner.delivery);
        let changed = {
            let mut state = lock(&self.inner.state);
            let previous = state.status;
            *state = State::vacant(self.inner.thresholds.window_size.max(1));
            (previous != state.status).then(|| (previous, state.snapshot()))
        };

        info!("Platform health history cleared");
        if let Some((previous, snapshot)) = changed {
            log_transition(previous, &snapshot);
            self.notify(&snapshot);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }

    fn notify(&self, snapshot: &HealthMetrics) {
        let subscribers: Vec<(u64, Callback)> = lock(&self.inner.subscribers).clone();
        for (id, callback) in &subscribers {
            deliver(*id, callback, snapshot);
        }
    }
}

fn deliver(id: u64, callback: &Callback, snapshot: &HealthMetrics) {
    if catch_unwind(AssertUnwindSafe(|| callback(snapshot))).is_err() {
        error!(subscriber = id, "Health subscriber panicked during notification");
    }
}

fn log_transition(previous: HealthStatus, snapshot: &HealthMetrics) {
    match snapshot.status {
        HealthStatus::Healthy => info!(
            from = %previous,
            success_rate = snapshot.success_rate,
            "Platform health recovered"
        ),
        _ => warn!(
            from = %previous,
            to = %snapshot.status,
            success_rate = snapshot.success_rate,
            consecutive_failures = snapshot.consecutive_failures,
            "Platform health changed"
        ),
    }
}

/// Human-readable classification of a failing error kind
fn describe_issue(error_kind: &str) -> String {
    match error_kind {
        "timeout" => "Platform requests are timing out".to_string(),
        "rate_limited" => "Platform is rate limiting requests".to_string(),
        "server_error" => "Platform is returning server errors".to_string(),
        "network" => "Platform is unreachable".to_string(),
        "unauthorized" => "Platform rejected the configured credentials".to_string(),
        "schema" => "Platform response schema does not match".to_string(),
        other => format!("Platform call failed: {other}"),
    }
}

/// Handle returned by [`HealthMonitor::subscribe`]
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    monitor: Weak<Inner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Keep the callback registered for the lifetime of the monitor
    pub fn detach(mut self) {
        self.monitor = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.monitor.upgrade() {
            lock(&inner.subscribers).retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn collect(monitor: &HealthMonitor) -> (Arc<Mutex<Vec<HealthStatus>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = monitor.subscribe(move |m| sink.lock().unwrap().push(m.status));
        (seen, sub)
    }

    #[test]
    fn test_vacant_monitor_is_healthy() {
        let monitor = HealthMonitor::default();
        let metrics = monitor.get_health_metrics();
        assert!(metrics.is_healthy);
        assert_eq!(metrics.success_rate, 1.0);
        assert_eq!(metrics.total_requests, 0);
        assert!(metrics.issues.is_empty());
    }

    #[test]
    fn test_six_failures_in_ten_calls_is_unhealthy() {
        let monitor = HealthMonitor::default();
        let pattern = [true, false, true, false, false, true, false, true, false, false];
        for ok in pattern {
            monitor.record_outcome(ok, ms(40), (!ok).then_some("server_error"));
        }

        let metrics = monitor.get_health_metrics();
        assert_eq!(metrics.status, HealthStatus::Unhealthy);
        assert!((metrics.success_rate - 0.4).abs() < f64::EPSILON);
        assert_eq!(metrics.error_count, 6);
        assert_eq!(metrics.total_requests, 10);
        assert!(metrics.recovering);
    }

    #[test]
    fn test_all_success_notifies_only_on_subscribe() {
        let monitor = HealthMonitor::default();
        let (seen, _sub) = collect(&monitor);

        for _ in 0..50 {
            monitor.record_outcome(true, ms(10), None);
        }

        assert_eq!(*seen.lock().unwrap(), vec![HealthStatus::Healthy]);
        assert_eq!(monitor.status(), HealthStatus::Healthy);
    }

    #[test]
    fn test_consecutive_failures_degrade_then_fail() {
        let monitor = HealthMonitor::default();
        for _ in 0..40 {
            monitor.record_outcome(true, ms(10), None);
        }
        let (seen, _sub) = collect(&monitor);

        for _ in 0..5 {
            monitor.record_outcome(false, ms(10), Some("timeout"));
        }

        assert_eq!(
            *seen.lock().unwrap(),
            vec![HealthStatus::Healthy, HealthStatus::Degraded, HealthStatus::Unhealthy]
        );
    }

    #[test]
    fn test_recovering_clears_when_healthy_again() {
        let monitor = HealthMonitor::new(HealthThresholds {
            window_size: 10,
            ..Default::default()
        });
        for _ in 0..5 {
            monitor.record_outcome(false, ms(10), Some("network"));
        }
        assert!(monitor.get_health_metrics().recovering);

        for _ in 0..9 {
            monitor.record_outcome(true, ms(10), None);
        }
        let metrics = monitor.get_health_metrics();
        assert_eq!(metrics.status, HealthStatus::Degraded);
        assert!(metrics.recovering);

        monitor.record_outcome(true, ms(10), None);
        let metrics = monitor.get_health_metrics();
        assert_eq!(metrics.status, HealthStatus::Healthy);
        assert!(!metrics.recovering);
    }

    #[test]
    fn test_issues_are_capped_and_fifo() {
        let monitor = HealthMonitor::new(HealthThresholds {
            max_issues: 2,
            ..Default::default()
        });
        monitor.record_outcome(false, ms(1), Some("timeout"));
        monitor.record_outcome(false, ms(1), Some("rate_limited"));
        monitor.record_outcome(false, ms(1), Some("network"));
        monitor.record_outcome(false, ms(1), Some("rate_limited"));

        let issues = monitor.get_health_metrics().issues;
        assert_eq!(
            issues,
            vec![
                "Platform is unreachable".to_string(),
                "Platform is rate limiting requests".to_string(),
            ]
        );
    }

    #[test]
    fn test_malformed_outcome_is_dropped() {
        let monitor = HealthMonitor::default();
        monitor.record_outcome(true, ms(5), Some("timeout"));
        monitor.record_outcome(false, Duration::from_secs(7200), Some("timeout"));
        assert_eq!(monitor.get_health_metrics().total_requests, 0);
    }

    #[test]
    fn test_clear_history_resets_and_notifies() {
        let monitor = HealthMonitor::default();
        for _ in 0..5 {
            monitor.record_outcome(false, ms(10), Some("timeout"));
        }
        let (seen, _sub) = collect(&monitor);

        monitor.clear_history();

        let metrics = monitor.get_health_metrics();
        assert_eq!(metrics.status, HealthStatus::Healthy);
        assert_eq!(metrics.total_requests, 0);
        assert!(metrics.issues.is_empty());
        assert!(!metrics.recovering);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![HealthStatus::Unhealthy, HealthStatus::Healthy]
        );
        assert_eq!(monitor.subscriber_count(), 1);
    }

    #[test]
    fn test_dropped_subscription_stops_delivery() {
        let monitor = HealthMonitor::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sub = monitor.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sub.unsubscribe();

        for _ in 0..5 {
            monitor.record_outcome(false, ms(10), Some("timeout"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.subscriber_count(), 0);
    }

    #[test]
    fn test_subscriber_observes_committed_state() {
        let monitor = HealthMonitor::default();
        let observer = monitor.clone();
        let matched = Arc::new(AtomicUsize::new(0));
        let counter = matched.clone();
        monitor
            .subscribe(move |m| {
                if observer.status() == m.status {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .detach();

        for _ in 0..5 {
            monitor.record_outcome(false, ms(10), Some("timeout"));
        }
        // initial + degraded + unhealthy
        assert_eq!(matched.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_panicking_subscriber_does_not_break_monitor() {
        let monitor = HealthMonitor::default();
        let _sub = monitor.subscribe(|m| {
            if m.status == HealthStatus::Unhealthy {
                panic!("subscriber bug");
            }
        });
        for _ in 0..6 {
            monitor.record_outcome(false, ms(10), Some("timeout"));
        }
        assert_eq!(monitor.status(), HealthStatus::Unhealthy);
    }
}

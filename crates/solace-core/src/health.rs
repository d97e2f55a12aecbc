//! Health metric registry.
//!
//! Boundaries only see faults that were thrown. The registry covers the
//! other failure class: symptoms observed while nothing threw (a surface
//! with no content, a spinner that never clears, creeping memory use).
//! Probes upsert named metrics; subscribers are notified synchronously on
//! every record; the rollup is the worst status currently present.
//!
//! Metric names are owned by exactly one probe each, so writes to distinct
//! names never contend. The map itself is mutex-guarded because the runtime
//! is multi-threaded.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a single health metric, ordered from best to worst.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// No symptom observed.
    #[default]
    Healthy,
    /// Degraded but usable.
    Warning,
    /// Symptom severe enough to assume the application is broken.
    Critical,
}

impl HealthStatus {
    /// Returns the status as a string identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// A named, timestamped observation produced by a probe.
///
/// At most one current metric exists per name; recording replaces the
/// previous value (last-write-wins).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthMetric {
    /// Unique metric name, owned by the probe that writes it.
    pub name: String,

    /// Current status.
    pub status: HealthStatus,

    /// Human-readable description of the observation.
    pub message: String,

    /// When the observation was made.
    pub timestamp: DateTime<Utc>,

    /// Opaque structured payload (which indicators were found, heap
    /// numbers, probe internals).
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl HealthMetric {
    /// Creates a metric stamped with the current time and no details.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        status: HealthStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            status,
            message: message.into(),
            timestamp: Utc::now(),
            details: serde_json::Value::Null,
        }
    }

    /// Attaches a structured payload.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Point-in-time view of the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Worst status across all metrics (`Healthy` when empty).
    pub overall: HealthStatus,

    /// All current metrics, ordered by name.
    pub metrics: Vec<HealthMetric>,
}

impl HealthSnapshot {
    /// Returns the metric with the given name, if present.
    #[must_use]
    pub fn metric(&self, name: &str) -> Option<&HealthMetric> {
        self.metrics.iter().find(|m| m.name == name)
    }

    /// Returns `true` if any metric is at or above the given status.
    #[must_use]
    pub fn any_at_least(&self, status: HealthStatus) -> bool {
        self.metrics.iter().any(|m| m.status >= status)
    }
}

/// Well-known metric names. Each name is owned by exactly one probe; two
/// probes must never share a name.
pub mod metric_names {
    /// Rendered root has no visible text or media content.
    pub const BLANK_SURFACE: &str = "blank_surface";
    /// A loading indicator has been continuously present too long.
    pub const STUCK_LOADING: &str = "stuck_loading";
    /// Heap usage relative to the runtime limit.
    pub const MEMORY_PRESSURE: &str = "memory_pressure";
    /// Structural marker of successful framework initialization.
    pub const PROVIDER_MARKER: &str = "provider_marker";
    /// Reachability of the remote backend.
    pub const BACKEND_CONNECTIVITY: &str = "backend_connectivity";
    /// Latest auth-session state as pushed by the gateway.
    pub const AUTH_STATE: &str = "auth_state";
}

type SubscriberFn = Arc<dyn Fn(&HealthMetric) + Send + Sync>;

struct RegistryInner {
    metrics: BTreeMap<String, HealthMetric>,
    subscribers: Vec<(u64, SubscriberFn)>,
    next_subscriber_id: u64,
}

/// Registry of current health metrics with synchronous subscriber fan-out.
///
/// Cloning is cheap and clones share state; pass clones into probe tasks.
#[derive(Clone)]
pub struct HealthRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                metrics: BTreeMap::new(),
                subscribers: Vec::new(),
                next_subscriber_id: 0,
            })),
        }
    }

    /// Upserts a metric and notifies every subscriber synchronously.
    ///
    /// A panicking subscriber is contained and logged; it never propagates
    /// into the recording probe. Subscribers are invoked outside the lock,
    /// so a callback may re-enter the registry (record, snapshot,
    /// subscribe) without deadlocking.
    pub fn record(&self, metric: HealthMetric) {
        let subscribers: Vec<SubscriberFn> = {
            let mut inner = self.lock();
            inner.metrics.insert(metric.name.clone(), metric.clone());
            inner.subscribers.iter().map(|(_, f)| f.clone()).collect()
        };

        for subscriber in subscribers {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                subscriber(&metric);
            }));
            if outcome.is_err() {
                tracing::warn!(metric = %metric.name, "health subscriber panicked; continuing");
            }
        }
    }

    /// Convenience for recording without building a [`HealthMetric`] first.
    pub fn record_status(
        &self,
        name: impl Into<String>,
        status: HealthStatus,
        message: impl Into<String>,
    ) {
        self.record(HealthMetric::new(name, status, message));
    }

    /// Registers an observer invoked on every recorded metric.
    ///
    /// The returned subscription unsubscribes when cancelled or dropped, so
    /// every listener registered during bootstrap or monitoring has a
    /// matching teardown path.
    #[must_use]
    pub fn subscribe(
        &self,
        callback: impl Fn(&HealthMetric) + Send + Sync + 'static,
    ) -> HealthSubscription {
        let mut inner = self.lock();
        let id = inner.next_subscriber_id;
        inner.next_subscriber_id += 1;
        inner.subscribers.push((id, Arc::new(callback)));
        HealthSubscription {
            registry: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Returns the current metric for `name`, if any.
    #[must_use]
    pub fn metric(&self, name: &str) -> Option<HealthMetric> {
        self.lock().metrics.get(name).cloned()
    }

    /// Returns a point-in-time snapshot with the overall rollup.
    #[must_use]
    pub fn snapshot(&self) -> HealthSnapshot {
        let inner = self.lock();
        let metrics: Vec<HealthMetric> = inner.metrics.values().cloned().collect();
        let overall = metrics
            .iter()
            .map(|m| m.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        HealthSnapshot { overall, metrics }
    }

    /// Human-readable dump of the registry for the operational dashboard.
    #[must_use]
    pub fn diagnostic_report(&self) -> String {
        let snapshot = self.snapshot();
        let mut report = format!(
            "health: {} ({} metric{})\n",
            snapshot.overall.as_str(),
            snapshot.metrics.len(),
            if snapshot.metrics.len() == 1 { "" } else { "s" },
        );
        for metric in &snapshot.metrics {
            let _ = writeln!(
                report,
                "  [{:>8}] {} - {} ({})",
                metric.status.as_str(),
                metric.name,
                metric.message,
                metric.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            );
            if !metric.details.is_null() {
                let _ = writeln!(report, "             details: {}", metric.details);
            }
        }
        report
    }

    /// Number of current metrics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().metrics.len()
    }

    /// Returns `true` if no metric has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().metrics.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        // A panicking subscriber cannot poison the lock (callbacks run
        // outside it); recover rather than propagate if it happens anyway.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Disposer for a registered health subscriber.
///
/// Unsubscribes on [`cancel`](Self::cancel) or on drop.
pub struct HealthSubscription {
    registry: Weak<Mutex<RegistryInner>>,
    id: u64,
}

impl HealthSubscription {
    /// Removes the subscriber from the registry.
    pub fn cancel(self) {
        // Drop does the work.
    }

    fn remove(&self) {
        if let Some(inner) = self.registry.upgrade() {
            let mut inner = inner
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            inner.subscribers.retain(|(id, _)| *id != self.id);
        }
    }
}

impl Drop for HealthSubscription {
    fn drop(&mut self) {
        self.remove();
    }
}

impl std::fmt::Debug for HealthSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthSubscription")
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_record_is_idempotent_per_name() {
        let registry = HealthRegistry::new();
        registry.record_status("blank_surface", HealthStatus::Critical, "no content");
        registry.record_status("blank_surface", HealthStatus::Healthy, "content found");

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.metrics.len(), 1);
        assert_eq!(
            snapshot.metric("blank_surface").unwrap().status,
            HealthStatus::Healthy
        );
        assert_eq!(
            snapshot.metric("blank_surface").unwrap().message,
            "content found"
        );
    }

    #[test]
    fn test_overall_is_worst_status() {
        let registry = HealthRegistry::new();
        assert_eq!(registry.snapshot().overall, HealthStatus::Healthy);

        registry.record_status("a", HealthStatus::Healthy, "ok");
        assert_eq!(registry.snapshot().overall, HealthStatus::Healthy);

        registry.record_status("b", HealthStatus::Warning, "slow");
        assert_eq!(registry.snapshot().overall, HealthStatus::Warning);

        registry.record_status("c", HealthStatus::Critical, "broken");
        assert_eq!(registry.snapshot().overall, HealthStatus::Critical);

        // Critical wins even when recorded before a warning.
        registry.record_status("b", HealthStatus::Healthy, "recovered");
        assert_eq!(registry.snapshot().overall, HealthStatus::Critical);
    }

    #[test]
    fn test_subscribers_notified_synchronously() {
        let registry = HealthRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let seen_clone = seen.clone();
        let subscription = registry.subscribe(move |metric| {
            assert_eq!(metric.name, "probe");
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        registry.record_status("probe", HealthStatus::Warning, "first");
        registry.record_status("probe", HealthStatus::Critical, "second");
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        subscription.cancel();
        registry.record_status("probe", HealthStatus::Healthy, "third");
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let registry = HealthRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));

        {
            let seen_clone = seen.clone();
            let _subscription = registry.subscribe(move |_| {
                seen_clone.fetch_add(1, Ordering::SeqCst);
            });
            registry.record_status("m", HealthStatus::Healthy, "ok");
        }

        registry.record_status("m", HealthStatus::Healthy, "ok");
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_subscriber_is_contained() {
        let registry = HealthRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let _bad = registry.subscribe(|_| panic!("subscriber bug"));
        let seen_clone = seen.clone();
        let _good = registry.subscribe(move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        // The panic must not escape record() nor starve later subscribers.
        registry.record_status("m", HealthStatus::Warning, "ok");
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_subscriber_may_reenter_registry() {
        let registry = HealthRegistry::new();
        let inner = registry.clone();
        let _subscription = registry.subscribe(move |metric| {
            if metric.name == "outer" {
                inner.record_status("echo", HealthStatus::Healthy, "from subscriber");
            }
        });

        registry.record_status("outer", HealthStatus::Warning, "trigger");
        assert!(registry.metric("echo").is_some());
    }

    #[test]
    fn test_diagnostic_report_lists_metrics() {
        let registry = HealthRegistry::new();
        registry.record(
            HealthMetric::new("stuck_loading", HealthStatus::Critical, "spinner for 12s")
                .with_details(serde_json::json!({"indicators": ["spinner"]})),
        );
        registry.record_status("memory_pressure", HealthStatus::Healthy, "42% of limit");

        let report = registry.diagnostic_report();
        assert!(report.starts_with("health: critical"));
        assert!(report.contains("stuck_loading"));
        assert!(report.contains("spinner for 12s"));
        assert!(report.contains("memory_pressure"));
        assert!(report.contains("indicators"));
    }

    #[test]
    fn test_snapshot_any_at_least() {
        let registry = HealthRegistry::new();
        registry.record_status("a", HealthStatus::Warning, "slow");
        let snapshot = registry.snapshot();
        assert!(snapshot.any_at_least(HealthStatus::Warning));
        assert!(!snapshot.any_at_least(HealthStatus::Critical));
    }
}

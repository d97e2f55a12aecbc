//! Watch loop: critical health signals trigger a fresh self-test run.
//!
//! The registry observes continuously; the harness checks deeply. This
//! loop bridges them: any critical metric schedules a harness run, with a
//! debounce window coalescing bursts and a minimum spacing between runs so
//! a flapping metric cannot cause a test-run storm. After each run the
//! report and the current snapshot are cross-referenced into remediation
//! hints.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use solace_core::config::WatchConfig;
use solace_core::health::{HealthRegistry, HealthStatus, HealthSubscription};
use solace_core::triage::{self, TriageReport};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::selftest::SelfTestHarness;

struct WatchShared {
    last_triage: Mutex<Option<TriageReport>>,
    runs_completed: AtomicU64,
}

/// Handle over the running watch loop.
///
/// [`stop`](Self::stop) tears down the registry subscription first, which
/// closes the signal channel and lets the loop task drain and exit
/// cleanly.
pub struct WatchHandle {
    task: Option<JoinHandle<()>>,
    subscription: Option<HealthSubscription>,
    shared: Arc<WatchShared>,
}

impl WatchHandle {
    /// The triage produced by the most recent run, if any.
    #[must_use]
    pub fn last_triage(&self) -> Option<TriageReport> {
        self.shared
            .last_triage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of harness runs the loop has completed.
    #[must_use]
    pub fn runs_completed(&self) -> u64 {
        self.shared.runs_completed.load(Ordering::SeqCst)
    }

    /// Unsubscribes from the registry and waits for the loop to finish.
    pub async fn stop(mut self) {
        self.subscription.take();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.subscription.take();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("runs_completed", &self.runs_completed())
            .finish()
    }
}

/// Starts the watch loop.
#[derive(Debug)]
pub struct WatchLoop;

impl WatchLoop {
    /// Subscribes to the registry and spawns the loop task.
    #[must_use]
    pub fn start(
        registry: HealthRegistry,
        harness: Arc<SelfTestHarness>,
        config: WatchConfig,
    ) -> WatchHandle {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel::<String>();

        let subscription = registry.subscribe(move |metric| {
            if metric.status == HealthStatus::Critical {
                // A closed channel means the loop stopped; nothing to do.
                let _ = signal_tx.send(metric.name.clone());
            }
        });

        let shared = Arc::new(WatchShared {
            last_triage: Mutex::new(None),
            runs_completed: AtomicU64::new(0),
        });

        let task = tokio::spawn(run_loop(
            signal_rx,
            registry,
            harness,
            config,
            shared.clone(),
        ));

        WatchHandle {
            task: Some(task),
            subscription: Some(subscription),
            shared,
        }
    }
}

async fn run_loop(
    mut signals: mpsc::UnboundedReceiver<String>,
    registry: HealthRegistry,
    harness: Arc<SelfTestHarness>,
    config: WatchConfig,
    shared: Arc<WatchShared>,
) {
    let mut last_run: Option<tokio::time::Instant> = None;

    while let Some(first_signal) = signals.recv().await {
        tracing::debug!(metric = %first_signal, "critical signal; scheduling self-test run");

        // Debounce: wait for a quiet window, coalescing the burst.
        loop {
            match timeout(config.debounce, signals.recv()).await {
                Ok(Some(_)) => {},
                Ok(None) => return,
                Err(_) => break,
            }
        }

        // Minimum spacing: a run too soon after the previous one waits it
        // out; signals arriving meanwhile fold into this run.
        if let Some(previous) = last_run {
            let since = previous.elapsed();
            if since < config.min_spacing {
                tokio::time::sleep(config.min_spacing - since).await;
                while signals.try_recv().is_ok() {}
            }
        }

        let report = harness.run_all().await;
        last_run = Some(tokio::time::Instant::now());
        shared.runs_completed.fetch_add(1, Ordering::SeqCst);

        let snapshot = registry.snapshot();
        let triage = triage::classify(&report, &snapshot);
        tracing::info!(summary = %triage.summary(), "watch-triggered self-test finished");
        *shared
            .last_triage
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(triage);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    use solace_core::selftest::Importance;

    use super::*;
    use crate::selftest::{SelfTest, TestOutcome};

    fn counting_harness(counter: Arc<AtomicU64>) -> Arc<SelfTestHarness> {
        let mut harness = SelfTestHarness::new();
        harness.register(SelfTest::new("watch", "probe", Importance::Critical, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                TestOutcome::pass()
            }
        }));
        Arc::new(harness)
    }

    fn fast_config() -> WatchConfig {
        WatchConfig {
            debounce: Duration::from_secs(1),
            min_spacing: Duration::from_secs(10),
        }
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_run() {
        let runs = Arc::new(AtomicU64::new(0));
        let registry = HealthRegistry::new();
        let handle = WatchLoop::start(registry.clone(), counting_harness(runs.clone()), fast_config());

        // Five critical signals inside one debounce window.
        for n in 0..5 {
            registry.record_status(
                "blank_surface",
                HealthStatus::Critical,
                format!("signal {n}"),
            );
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        // Let the quiet window elapse and the run finish.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        settle().await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(handle.runs_completed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_spacing_suppresses_rapid_retriggers() {
        let runs = Arc::new(AtomicU64::new(0));
        let registry = HealthRegistry::new();
        let handle = WatchLoop::start(registry.clone(), counting_harness(runs.clone()), fast_config());

        registry.record_status("blank_surface", HealthStatus::Critical, "first");
        tokio::time::sleep(Duration::from_millis(1500)).await;
        settle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // Flapping: signals closer together than the debounce window. All
        // fold into at most one further run, held until the spacing
        // elapses.
        for n in 0..6 {
            registry.record_status(
                "blank_surface",
                HealthStatus::Critical,
                format!("flap {n}"),
            );
            tokio::time::sleep(Duration::from_millis(800)).await;
        }
        settle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1, "second run must wait out the spacing");

        // Once the spacing window has passed, exactly one more run.
        tokio::time::sleep(Duration::from_secs(12)).await;
        settle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(handle.runs_completed(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_critical_metrics_do_not_trigger() {
        let runs = Arc::new(AtomicU64::new(0));
        let registry = HealthRegistry::new();
        let _handle = WatchLoop::start(registry.clone(), counting_harness(runs.clone()), fast_config());

        registry.record_status("memory_pressure", HealthStatus::Warning, "78%");
        registry.record_status("stuck_loading", HealthStatus::Healthy, "ok");
        tokio::time::sleep(Duration::from_secs(3)).await;
        settle().await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_triage_published_after_run() {
        let registry = HealthRegistry::new();
        let mut harness = SelfTestHarness::new();
        harness.register(SelfTest::new(
            "gateway",
            "rpc_echo",
            Importance::High,
            || async { TestOutcome::fail("backend gone") },
        ));
        let handle = WatchLoop::start(registry.clone(), Arc::new(harness), fast_config());

        registry.record_status("backend_connectivity", HealthStatus::Critical, "ping timed out");
        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;

        let triage = handle.last_triage().expect("triage should be published");
        assert!(!triage.is_empty());
        assert_eq!(
            triage.hints[0].category,
            solace_core::triage::FailureCategory::Backend
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_tears_down_subscription_and_task() {
        let runs = Arc::new(AtomicU64::new(0));
        let registry = HealthRegistry::new();
        let handle = WatchLoop::start(registry.clone(), counting_harness(runs.clone()), fast_config());

        handle.stop().await;

        registry.record_status("blank_surface", HealthStatus::Critical, "after stop");
        tokio::time::sleep(Duration::from_secs(3)).await;
        settle().await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}

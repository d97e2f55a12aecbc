//! Self-test harness.
//!
//! On demand (or on a watch-loop trigger) the harness exercises the
//! client's own critical paths (storage, gateway reachability, provider
//! resolution, configuration) to catch "module fails to load" regressions
//! without a human driving the UI.
//!
//! Tests run grouped by importance tier, strictly Critical → High →
//! Medium → Low, and a failing tier never stops the rest: a critical
//! failure must not cost us the remaining diagnostics. No test error or
//! panic ever escapes the harness.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use serde_json::json;
use solace_core::config::ResilienceConfig;
use solace_core::health::{HealthRegistry, HealthStatus};
use solace_core::selftest::{Importance, TestReport, TestResult, TestStatus, TIER_ORDER};
use solace_core::store::SafeStore;
use solace_core::triage;

use crate::dependency::{ProviderRegistry, ProviderSpec};
use crate::gateway::BackendGateway;

/// How one test concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    /// The exercised path works.
    Pass,
    /// The test does not apply in this environment.
    Skip {
        /// Why it was skipped.
        reason: String,
    },
    /// The exercised path is broken.
    Fail {
        /// Captured error text.
        error: String,
    },
}

impl TestOutcome {
    /// Creates a passing outcome.
    #[must_use]
    pub const fn pass() -> Self {
        Self::Pass
    }

    /// Creates a skipped outcome.
    #[must_use]
    pub fn skip(reason: impl Into<String>) -> Self {
        Self::Skip {
            reason: reason.into(),
        }
    }

    /// Creates a failing outcome.
    #[must_use]
    pub fn fail(error: impl Into<String>) -> Self {
        Self::Fail {
            error: error.into(),
        }
    }
}

impl From<Result<(), String>> for TestOutcome {
    fn from(result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::Pass,
            Err(error) => Self::Fail { error },
        }
    }
}

/// Future produced by one test invocation.
pub type TestFuture = Pin<Box<dyn Future<Output = TestOutcome> + Send>>;

type TestAction = Arc<dyn Fn() -> TestFuture + Send + Sync>;

/// One registered self-test. Importance is assigned here, at definition
/// time, never computed from results.
pub struct SelfTest {
    category: String,
    name: String,
    importance: Importance,
    action: TestAction,
}

impl SelfTest {
    /// Defines a test.
    #[must_use]
    pub fn new<F, Fut>(
        category: impl Into<String>,
        name: impl Into<String>,
        importance: Importance,
        action: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TestOutcome> + Send + 'static,
    {
        Self {
            category: category.into(),
            name: name.into(),
            importance,
            action: Arc::new(move || Box::pin(action())),
        }
    }
}

impl std::fmt::Debug for SelfTest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelfTest")
            .field("category", &self.category)
            .field("name", &self.name)
            .field("importance", &self.importance)
            .finish()
    }
}

/// Ordered battery of self-tests with the latest report.
pub struct SelfTestHarness {
    tests: Vec<SelfTest>,
    last: Mutex<Option<TestReport>>,
}

impl Default for SelfTestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl SelfTestHarness {
    /// Creates an empty harness.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tests: Vec::new(),
            last: Mutex::new(None),
        }
    }

    /// Registers a test. Tests execute in tier order, registration order
    /// within a tier.
    pub fn register(&mut self, test: SelfTest) {
        self.tests.push(test);
    }

    /// Number of registered tests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    /// Returns `true` if no tests are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Runs every test, tier by tier. The produced report replaces the
    /// previous one (results are never merged across runs).
    pub async fn run_all(&self) -> TestReport {
        let started_at = Utc::now();
        let mut results = Vec::with_capacity(self.tests.len());

        for tier in TIER_ORDER {
            for test in self.tests.iter().filter(|t| t.importance == tier) {
                results.push(self.run_one(test).await);
            }
        }

        let report = TestReport {
            results,
            started_at,
            finished_at: Utc::now(),
        };
        tracing::info!(summary = %report.summary(), "self-test run finished");
        *self.lock_last() = Some(report.clone());
        report
    }

    async fn run_one(&self, test: &SelfTest) -> TestResult {
        let started = tokio::time::Instant::now();
        let outcome = match std::panic::AssertUnwindSafe((test.action)())
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => TestOutcome::fail(format!("panicked: {}", panic_text(&panic))),
        };
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        let (status, error) = match outcome {
            TestOutcome::Pass => (TestStatus::Pass, None),
            TestOutcome::Skip { reason } => (TestStatus::Skip, Some(reason)),
            TestOutcome::Fail { error } => (TestStatus::Fail, Some(error)),
        };

        if status == TestStatus::Fail && test.importance == Importance::Critical {
            tracing::warn!(
                test = %format!("{}::{}", test.category, test.name),
                error = error.as_deref().unwrap_or("unknown"),
                "critical self-test failed; this may prevent the app from functioning"
            );
        }

        TestResult {
            category: test.category.clone(),
            name: test.name.clone(),
            status,
            error,
            duration_ms,
            importance: test.importance,
        }
    }

    /// The most recent report, if a run has happened.
    #[must_use]
    pub fn last_report(&self) -> Option<TestReport> {
        self.lock_last().clone()
    }

    /// Returns `true` iff the latest run has no critical-tier failures.
    /// With no run yet, nothing is known to be failing.
    #[must_use]
    pub fn is_app_healthy(&self) -> bool {
        self.lock_last().as_ref().is_none_or(TestReport::is_healthy)
    }

    /// Failing tests from the latest run, optionally filtered by tier.
    #[must_use]
    pub fn failing_tests(&self, importance: Option<Importance>) -> Vec<TestResult> {
        self.lock_last()
            .as_ref()
            .map(|report| report.failing(importance).into_iter().cloned().collect())
            .unwrap_or_default()
    }

    fn lock_last(&self) -> std::sync::MutexGuard<'_, Option<TestReport>> {
        self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SelfTestHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelfTestHarness")
            .field("tests", &self.tests)
            .finish()
    }
}

fn panic_text(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// The standard battery: exercises the client's own modules the way the
/// running application uses them.
#[must_use]
pub fn standard_battery(
    gateway: Arc<dyn BackendGateway>,
    store: Arc<SafeStore>,
) -> SelfTestHarness {
    const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

    let mut harness = SelfTestHarness::new();

    let probe_store = store;
    harness.register(SelfTest::new(
        "store",
        "round_trip",
        Importance::Critical,
        move || {
            let store = probe_store.clone();
            async move {
                let key = "selftest::probe";
                store.put_value(key, json!({"alive": true}));
                let read = store.get(key);
                store.remove(key);
                if read == Some(json!({"alive": true})) {
                    TestOutcome::pass()
                } else {
                    TestOutcome::fail("stored value did not read back")
                }
            }
        },
    ));

    let probe_gateway = gateway.clone();
    harness.register(SelfTest::new(
        "gateway",
        "reachability",
        Importance::Critical,
        move || {
            let gateway = probe_gateway.clone();
            async move {
                match tokio::time::timeout(PROBE_TIMEOUT, gateway.ping()).await {
                    Ok(Ok(())) => TestOutcome::pass(),
                    Ok(Err(error)) => TestOutcome::fail(error.to_string()),
                    Err(_) => TestOutcome::fail("ping timed out"),
                }
            }
        },
    ));

    harness.register(SelfTest::new(
        "health",
        "record_metric",
        Importance::Critical,
        || async {
            let registry = HealthRegistry::new();
            registry.record_status("selftest", HealthStatus::Warning, "probe");
            if registry.snapshot().overall == HealthStatus::Warning {
                TestOutcome::pass()
            } else {
                TestOutcome::fail("recorded metric not reflected in snapshot")
            }
        },
    ));

    let echo_gateway = gateway;
    harness.register(SelfTest::new(
        "gateway",
        "rpc_echo",
        Importance::High,
        move || {
            let gateway = echo_gateway.clone();
            async move {
                if tokio::time::timeout(PROBE_TIMEOUT, gateway.ping())
                    .await
                    .map_or(true, |r| r.is_err())
                {
                    return TestOutcome::skip("backend unreachable; echo not meaningful");
                }
                match tokio::time::timeout(
                    PROBE_TIMEOUT,
                    gateway.invoke("echo", json!({"ping": true})),
                )
                .await
                {
                    Ok(Ok(_)) => TestOutcome::pass(),
                    Ok(Err(error)) => TestOutcome::fail(error.to_string()),
                    Err(_) => TestOutcome::fail("echo timed out"),
                }
            }
        },
    ));

    harness.register(SelfTest::new(
        "providers",
        "fallback_resolution",
        Importance::High,
        || async {
            let mut registry = ProviderRegistry::new();
            let spec = ProviderSpec::new("selftest", || async {
                Err(crate::dependency::LoadError::new("always fails"))
            })
            .retry(solace_core::retry::RetryConfig {
                max_attempts: 1,
                attempt_timeout: Duration::from_millis(100),
                backoff: solace_core::retry::BackoffConfig::Fixed {
                    delay: Duration::ZERO,
                },
            })
            .fallback("fallback".to_string());
            if registry.register(spec).is_err() {
                return TestOutcome::fail("registration failed");
            }
            let resolved = registry.resolve_all().await;
            match resolved.get("selftest") {
                Some(provider) if provider.outcome.is_fallback() => TestOutcome::pass(),
                Some(provider) => {
                    TestOutcome::fail(format!("unexpected outcome: {}", provider.outcome.as_str()))
                },
                None => TestOutcome::fail("provider missing from resolution"),
            }
        },
    ));

    harness.register(SelfTest::new(
        "config",
        "defaults_valid",
        Importance::Medium,
        || async {
            match ResilienceConfig::default().validate() {
                Ok(()) => TestOutcome::pass(),
                Err(error) => TestOutcome::fail(error.to_string()),
            }
        },
    ));

    harness.register(SelfTest::new(
        "triage",
        "classify_clean",
        Importance::Medium,
        || async {
            let report = TestReport {
                results: Vec::new(),
                started_at: Utc::now(),
                finished_at: Utc::now(),
            };
            let snapshot = HealthRegistry::new().snapshot();
            if triage::classify(&report, &snapshot).is_empty() {
                TestOutcome::pass()
            } else {
                TestOutcome::fail("clean inputs produced hints")
            }
        },
    ));

    harness.register(SelfTest::new(
        "health",
        "diagnostic_render",
        Importance::Low,
        || async {
            let registry = HealthRegistry::new();
            registry.record_status("selftest", HealthStatus::Healthy, "probe");
            if registry.diagnostic_report().contains("selftest") {
                TestOutcome::pass()
            } else {
                TestOutcome::fail("diagnostic report missing recorded metric")
            }
        },
    ));

    harness
}

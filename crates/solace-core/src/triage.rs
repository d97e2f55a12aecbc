//! Rule-based triage of self-test failures and health metrics.
//!
//! After every watch-triggered test run, the latest report and registry
//! snapshot are cross-referenced into categorized remediation hints, so the
//! dashboard shows "component loading broke" rather than a flat list of
//! failures. This is a fixed rule table, not an inference engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::health::{metric_names, HealthSnapshot, HealthStatus};
use crate::selftest::{TestReport, TestResult};

/// Failure category a hint is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Component/provider loading and module resolution.
    ComponentLoad,
    /// Authentication and session handling.
    Auth,
    /// Loading indicators that never settle.
    Loading,
    /// Heap pressure.
    Memory,
    /// Remote backend reachability or RPC failures.
    Backend,
    /// The rendered surface itself (blank screen, missing framework
    /// marker).
    Surface,
    /// Failures no rule matched.
    Unknown,
}

impl FailureCategory {
    /// Returns the category as a string identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ComponentLoad => "component_load",
            Self::Auth => "auth",
            Self::Loading => "loading",
            Self::Memory => "memory",
            Self::Backend => "backend",
            Self::Surface => "surface",
            Self::Unknown => "unknown",
        }
    }

    const fn remediation(&self) -> &'static str {
        match self {
            Self::ComponentLoad => {
                "A component or provider failed to load. Check recent deploys for broken \
                 chunks and verify provider fallbacks are registered."
            },
            Self::Auth => {
                "Session handling is failing. The app remains usable anonymously; check the \
                 auth backend and token refresh."
            },
            Self::Loading => {
                "A loading indicator never settled. Look for a request that neither resolves \
                 nor times out."
            },
            Self::Memory => "Heap usage is high. Look for leaked subscriptions or unbounded caches.",
            Self::Backend => {
                "The backend is unreachable or rejecting calls. The client degrades to \
                 offline-assumed mode until it recovers."
            },
            Self::Surface => {
                "The rendered surface is empty or the framework marker is missing. The shell \
                 likely failed before first paint; check the bootstrap breadcrumbs."
            },
            Self::Unknown => "Unclassified failures. Inspect the individual test errors.",
        }
    }
}

/// One categorized remediation hint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationHint {
    /// Category the evidence was filed under.
    pub category: FailureCategory,

    /// Human-readable remediation text.
    pub summary: String,

    /// The failing tests and metrics that produced this hint.
    pub evidence: Vec<String>,
}

/// Triage output for one watch-loop cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageReport {
    /// Hints in fixed category order.
    pub hints: Vec<RemediationHint>,

    /// When triage ran.
    pub generated_at: DateTime<Utc>,
}

impl TriageReport {
    /// Returns `true` when nothing needed a hint.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hints.is_empty()
    }

    /// One-line summary for logs.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.hints.is_empty() {
            return "triage: nothing to report".to_string();
        }
        let categories: Vec<&str> = self.hints.iter().map(|h| h.category.as_str()).collect();
        format!("triage: {} hint(s) [{}]", self.hints.len(), categories.join(", "))
    }
}

const CATEGORY_ORDER: [FailureCategory; 7] = [
    FailureCategory::Surface,
    FailureCategory::ComponentLoad,
    FailureCategory::Auth,
    FailureCategory::Backend,
    FailureCategory::Loading,
    FailureCategory::Memory,
    FailureCategory::Unknown,
];

/// Cross-references a test report with a health snapshot into hints.
#[must_use]
pub fn classify(report: &TestReport, snapshot: &HealthSnapshot) -> TriageReport {
    let mut buckets: Vec<(FailureCategory, Vec<String>)> =
        CATEGORY_ORDER.iter().map(|c| (*c, Vec::new())).collect();

    let mut file = |category: FailureCategory, evidence: String| {
        if let Some((_, bucket)) = buckets.iter_mut().find(|(c, _)| *c == category) {
            bucket.push(evidence);
        }
    };

    for test in report.failing(None) {
        let category = classify_test(test);
        let error = test.error.as_deref().unwrap_or("failed");
        file(category, format!("test {}: {}", test.qualified_name(), error));
    }

    for metric in &snapshot.metrics {
        if metric.status == HealthStatus::Healthy {
            continue;
        }
        let Some(category) = classify_metric(&metric.name) else {
            continue;
        };
        file(
            category,
            format!(
                "metric {} is {}: {}",
                metric.name,
                metric.status.as_str(),
                metric.message
            ),
        );
    }

    let hints = buckets
        .into_iter()
        .filter(|(_, evidence)| !evidence.is_empty())
        .map(|(category, evidence)| RemediationHint {
            category,
            summary: category.remediation().to_string(),
            evidence,
        })
        .collect();

    TriageReport {
        hints,
        generated_at: Utc::now(),
    }
}

fn classify_test(test: &TestResult) -> FailureCategory {
    let category = test.category.to_ascii_lowercase();
    let name = test.name.to_ascii_lowercase();

    if category.contains("provider") || category.contains("component") || name.contains("import") {
        FailureCategory::ComponentLoad
    } else if category.contains("auth") || name.contains("session") || name.contains("sign") {
        FailureCategory::Auth
    } else if category.contains("gateway") || category.contains("backend") || name.contains("rpc") {
        FailureCategory::Backend
    } else {
        FailureCategory::Unknown
    }
}

fn classify_metric(name: &str) -> Option<FailureCategory> {
    match name {
        metric_names::STUCK_LOADING => Some(FailureCategory::Loading),
        metric_names::MEMORY_PRESSURE => Some(FailureCategory::Memory),
        metric_names::BACKEND_CONNECTIVITY => Some(FailureCategory::Backend),
        metric_names::AUTH_STATE => Some(FailureCategory::Auth),
        metric_names::BLANK_SURFACE | metric_names::PROVIDER_MARKER => {
            Some(FailureCategory::Surface)
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::health::HealthMetric;
    use crate::selftest::{Importance, TestStatus};

    fn failing_test(category: &str, name: &str) -> TestResult {
        TestResult {
            category: category.to_string(),
            name: name.to_string(),
            status: TestStatus::Fail,
            error: Some("boom".to_string()),
            duration_ms: 0.5,
            importance: Importance::High,
        }
    }

    fn report(results: Vec<TestResult>) -> TestReport {
        TestReport {
            results,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    fn snapshot(metrics: Vec<HealthMetric>) -> HealthSnapshot {
        let overall = metrics
            .iter()
            .map(|m| m.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        HealthSnapshot { overall, metrics }
    }

    #[test]
    fn test_groups_component_auth_and_loading_separately() {
        let report = report(vec![
            failing_test("providers", "resolve_fallback"),
            failing_test("auth", "session_refresh"),
        ]);
        let snapshot = snapshot(vec![HealthMetric::new(
            metric_names::STUCK_LOADING,
            HealthStatus::Critical,
            "spinner for 12s",
        )]);

        let triage = classify(&report, &snapshot);
        let categories: Vec<FailureCategory> =
            triage.hints.iter().map(|h| h.category).collect();
        assert_eq!(
            categories,
            vec![
                FailureCategory::ComponentLoad,
                FailureCategory::Auth,
                FailureCategory::Loading,
            ]
        );
    }

    #[test]
    fn test_healthy_metrics_produce_no_hints() {
        let triage = classify(
            &report(vec![]),
            &snapshot(vec![HealthMetric::new(
                metric_names::MEMORY_PRESSURE,
                HealthStatus::Healthy,
                "40% of limit",
            )]),
        );
        assert!(triage.is_empty());
        assert_eq!(triage.summary(), "triage: nothing to report");
    }

    #[test]
    fn test_unmatched_failure_goes_to_unknown() {
        let triage = classify(&report(vec![failing_test("misc", "odd_case")]), &snapshot(vec![]));
        assert_eq!(triage.hints.len(), 1);
        assert_eq!(triage.hints[0].category, FailureCategory::Unknown);
    }

    #[test]
    fn test_evidence_names_tests_and_metrics() {
        let triage = classify(
            &report(vec![failing_test("gateway", "rpc_echo")]),
            &snapshot(vec![HealthMetric::new(
                metric_names::BACKEND_CONNECTIVITY,
                HealthStatus::Critical,
                "ping timed out",
            )]),
        );
        assert_eq!(triage.hints.len(), 1);
        let hint = &triage.hints[0];
        assert_eq!(hint.category, FailureCategory::Backend);
        assert_eq!(hint.evidence.len(), 2);
        assert!(hint.evidence[0].contains("gateway::rpc_echo"));
        assert!(hint.evidence[1].contains("backend_connectivity"));
    }

    #[test]
    fn test_surface_metrics_grouped_first() {
        let triage = classify(
            &report(vec![]),
            &snapshot(vec![
                HealthMetric::new(metric_names::MEMORY_PRESSURE, HealthStatus::Warning, "78%"),
                HealthMetric::new(metric_names::BLANK_SURFACE, HealthStatus::Critical, "empty"),
            ]),
        );
        assert_eq!(triage.hints[0].category, FailureCategory::Surface);
        assert_eq!(triage.hints[1].category, FailureCategory::Memory);
    }
}

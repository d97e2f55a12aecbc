//! Self-test result data model.
//!
//! The async harness in the runtime crate produces these records; they are
//! kept here so dashboards and triage can consume reports without pulling
//! in the executor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Importance tier of a self-test, assigned at definition time.
///
/// Tiers execute in declaration order: `Critical` first, `Low` last. The
/// derived ordering reflects that (`Critical < High < Medium < Low`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Importance {
    /// Failure likely prevents the application from functioning at all.
    Critical,
    /// Failure breaks a major feature.
    High,
    /// Failure degrades a secondary feature.
    Medium,
    /// Informational.
    Low,
}

/// Execution order of tiers. Lower tiers still run after higher-tier
/// failures; a broken critical path must not cost us the rest of the
/// diagnostics.
pub const TIER_ORDER: [Importance; 4] = [
    Importance::Critical,
    Importance::High,
    Importance::Medium,
    Importance::Low,
];

impl Importance {
    /// Returns the tier as a string identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// Outcome of one self-test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    /// The test completed without error.
    Pass,
    /// The test returned or raised an error.
    Fail,
    /// The test was not applicable in this environment.
    Skip,
}

/// Result of one self-test execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Test group (e.g. `store`, `gateway`, `providers`).
    pub category: String,

    /// Test name within the group.
    pub name: String,

    /// Outcome.
    pub status: TestStatus,

    /// Captured error text for failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Elapsed wall-clock time in milliseconds.
    pub duration_ms: f64,

    /// Tier assigned when the test was defined.
    pub importance: Importance,
}

impl TestResult {
    /// Returns `true` if the test failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status == TestStatus::Fail
    }

    /// `category::name`, used as a stable identifier in triage and logs.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}::{}", self.category, self.name)
    }
}

/// One full harness run. Each run replaces the previous report; results
/// are never merged across runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    /// Results in execution order (tier order, registration order within a
    /// tier).
    pub results: Vec<TestResult>,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run finished.
    pub finished_at: DateTime<Utc>,
}

impl TestReport {
    /// Number of passing tests.
    #[must_use]
    pub fn passed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == TestStatus::Pass)
            .count()
    }

    /// Number of failing tests.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.is_failure()).count()
    }

    /// Number of skipped tests.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == TestStatus::Skip)
            .count()
    }

    /// Number of failing tests in the critical tier. This count alone
    /// decides [`is_healthy`](Self::is_healthy).
    #[must_use]
    pub fn critical_failures(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.is_failure() && r.importance == Importance::Critical)
            .count()
    }

    /// Returns `true` iff no critical-tier test failed in this run.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.critical_failures() == 0
    }

    /// Failing tests, optionally restricted to one tier.
    #[must_use]
    pub fn failing(&self, importance: Option<Importance>) -> Vec<&TestResult> {
        self.results
            .iter()
            .filter(|r| r.is_failure())
            .filter(|r| importance.is_none_or(|tier| r.importance == tier))
            .collect()
    }

    /// One-line summary for logs and the dashboard.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} passed, {} failed ({} critical), {} skipped",
            self.passed(),
            self.failed(),
            self.critical_failures(),
            self.skipped(),
        )
    }
}

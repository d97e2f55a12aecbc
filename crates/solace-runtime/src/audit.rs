//! Best-effort audit trail through the backend's table interface.
//!
//! Lifecycle events worth keeping (bootstrap outcomes, boundary trips,
//! triage summaries) are written as opaque rows. The core passes fields
//! through without interpreting the table schema, and a failed write is
//! logged, never raised: auditing must not create failures of its own.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};

use crate::bootstrap::BootstrapReport;
use crate::gateway::BackendGateway;

/// Default audit table name.
pub const DEFAULT_AUDIT_TABLE: &str = "client_audit_events";

/// Writer for audit rows.
#[derive(Clone)]
pub struct AuditTrail {
    gateway: Arc<dyn BackendGateway>,
    table: String,
}

impl AuditTrail {
    /// Creates a trail writing to the default table.
    #[must_use]
    pub fn new(gateway: Arc<dyn BackendGateway>) -> Self {
        Self {
            gateway,
            table: DEFAULT_AUDIT_TABLE.to_string(),
        }
    }

    /// Overrides the audit table.
    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Writes one audit row. Caller-supplied fields are passed through
    /// untouched; failures are logged and absorbed.
    pub async fn record(&self, kind: &str, fields: Value) {
        let row = json!({
            "kind": kind,
            "fields": fields,
            "recorded_at": Utc::now().to_rfc3339(),
        });
        if let Err(error) = self.gateway.insert(&self.table, row).await {
            tracing::warn!(kind, %error, "audit write failed; continuing");
        }
    }

    /// Records the outcome of a bootstrap run.
    pub async fn bootstrap_finished(&self, report: &BootstrapReport) {
        let kind = if report.is_critical_failure() {
            "bootstrap_failed"
        } else {
            "bootstrap_completed"
        };
        self.record(
            kind,
            json!({
                "stage": report.stage.as_str(),
                "authenticated": report.auth.is_authenticated(),
                "offline_assumed": report.offline_assumed,
                "degraded": report.degraded,
                "providers": report.providers.outcome_summary(),
                "error": report.failure.as_ref().map(ToString::to_string),
                "elapsed_ms": report.elapsed.as_millis() as u64,
            }),
        )
        .await;
    }

    /// Records a boundary trip.
    pub async fn boundary_tripped(&self, boundary: &str, scope: &str, message: &str) {
        self.record(
            "boundary_tripped",
            json!({
                "boundary": boundary,
                "scope": scope,
                "message": message,
            }),
        )
        .await;
    }
}

impl std::fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditTrail")
            .field("table", &self.table)
            .finish()
    }
}

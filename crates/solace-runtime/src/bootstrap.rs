//! Progressive bootstrap state machine.
//!
//! Brings the client from nothing initialized to fully interactive while
//! tolerating partial failure of every subsystem. Stages run strictly in
//! sequence, each under a bounded budget; a stage that overruns is logged
//! and skipped rather than blocking the surface. The only fatal condition
//! in the whole machine is a required provider failing with no fallback;
//! everything else degrades.
//!
//! Stage order: `Initializing → Dependencies → Auth → Components →
//! Complete`, with the absorbing `Failed` stage reachable from
//! `Dependencies` only. Progression is forward-only and each run reaches
//! exactly one terminal stage; [`Bootstrapper::run`] consumes the machine,
//! so a second run cannot reuse its state.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use solace_core::config::BootstrapConfig;
use solace_core::store::SafeStore;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::timeout;

use crate::dependency::{ProviderRegistry, ResolvedProviders};
use crate::gateway::{BackendGateway, Session};

/// Store key for the fatal-failure breadcrumb.
pub const FAILURE_BREADCRUMB_KEY: &str = "bootstrap::last_failure";

/// Store key for the degraded-subsystems breadcrumb.
pub const DEGRADED_BREADCRUMB_KEY: &str = "bootstrap::last_degraded";

/// Bootstrap stage. Progression is forward-only; `Complete` and `Failed`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Connectivity probe; decides offline-assumed mode.
    Initializing,
    /// Provider resolution (the only stage that can fail the run).
    Dependencies,
    /// Session acquisition; exhausting retries means anonymous mode, not
    /// failure.
    Auth,
    /// Best-effort service probe; failures are logged only.
    Components,
    /// The render layer takes over.
    Complete,
    /// A required provider failed with no fallback.
    Failed,
}

impl Stage {
    /// Returns the stage as a string identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Dependencies => "dependencies",
            Self::Auth => "auth",
            Self::Components => "components",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    /// Returns `true` for the two absorbing stages.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// The single fatal error of the bring-up.
#[derive(Debug, Clone, Error)]
pub enum BootstrapError {
    /// A required provider exhausted its attempts and declared no
    /// fallback.
    #[error("required provider '{name}' failed after {attempts} attempts: {reason}")]
    RequiredProviderFailed {
        /// Provider name.
        name: String,
        /// Attempts consumed.
        attempts: u32,
        /// The last attempt's error.
        reason: String,
    },
}

/// How session acquisition ended. Both variants are success paths.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthOutcome {
    /// A stored session was retrieved.
    Authenticated(Session),
    /// No session is available; the client runs anonymously.
    Anonymous {
        /// Why (no stored session, retries exhausted, stage skipped).
        reason: String,
    },
}

impl AuthOutcome {
    /// Returns `true` when a session was retrieved.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    /// The session, if authenticated.
    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        match self {
            Self::Authenticated(session) => Some(session),
            Self::Anonymous { .. } => None,
        }
    }
}

/// Everything the render layer needs after a run.
#[derive(Debug)]
pub struct BootstrapReport {
    /// Terminal stage reached (`Complete` or `Failed`).
    pub stage: Stage,

    /// Session acquisition outcome.
    pub auth: AuthOutcome,

    /// Every provider with its outcome and value.
    pub providers: ResolvedProviders,

    /// Whether the connectivity probe failed and the run proceeded
    /// offline-assumed.
    pub offline_assumed: bool,

    /// Subsystems running degraded (connectivity, auth, fallback
    /// providers, skipped service probe).
    pub degraded: Vec<String>,

    /// The fatal error, present iff `stage == Failed`.
    pub failure: Option<BootstrapError>,

    /// Total wall-clock time of the run.
    pub elapsed: Duration,
}

impl BootstrapReport {
    /// Returns `true` when the run reached `Complete`.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.stage == Stage::Complete
    }

    /// Returns `true` when the run ended in the critical-failure branch.
    #[must_use]
    pub fn is_critical_failure(&self) -> bool {
        self.stage == Stage::Failed
    }
}

/// The progressive bootstrap driver.
pub struct Bootstrapper {
    gateway: Arc<dyn BackendGateway>,
    providers: ProviderRegistry,
    config: BootstrapConfig,
    store: Arc<SafeStore>,
    stage_tx: watch::Sender<Stage>,
}

impl Bootstrapper {
    /// Creates a driver over the given collaborators.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn BackendGateway>,
        providers: ProviderRegistry,
        config: BootstrapConfig,
        store: Arc<SafeStore>,
    ) -> Self {
        let (stage_tx, _) = watch::channel(Stage::Initializing);
        Self {
            gateway,
            providers,
            config,
            store,
            stage_tx,
        }
    }

    /// Subscribes to stage transitions. The render layer uses this to pick
    /// the shell to mount while the run is in flight.
    #[must_use]
    pub fn stage_watch(&self) -> watch::Receiver<Stage> {
        self.stage_tx.subscribe()
    }

    /// Upper bound on the run's wall-clock time: the connectivity budget,
    /// the slowest provider, and the two skippable stage budgets.
    #[must_use]
    pub fn worst_case_budget(&self) -> Duration {
        self.config.connectivity_timeout
            + self.providers.budget()
            + self.config.stage_timeout * 2
    }

    /// Runs the machine to its terminal stage. Never hangs: every stage is
    /// bounded, and the run always produces a report.
    pub async fn run(self) -> BootstrapReport {
        let started = tokio::time::Instant::now();
        let mut degraded: Vec<String> = Vec::new();

        // Initializing: reachability probe, offline-assumed on any miss.
        self.enter(Stage::Initializing);
        let offline_assumed =
            match timeout(self.config.connectivity_timeout, self.gateway.ping()).await {
                Ok(Ok(())) => false,
                Ok(Err(error)) => {
                    tracing::warn!(%error, "connectivity probe failed; assuming offline");
                    true
                },
                Err(_) => {
                    tracing::warn!(
                        budget = ?self.config.connectivity_timeout,
                        "connectivity probe timed out; assuming offline"
                    );
                    true
                },
            };
        if offline_assumed {
            degraded.push("connectivity".to_string());
        }

        // Dependencies: each provider is bounded by its own retry budget,
        // so the stage settles without an extra stage timer.
        self.enter(Stage::Dependencies);
        let providers = self.providers.resolve_all().await;
        if let Some(fatal) = providers.fatal() {
            let (attempts, reason) = match &fatal.outcome {
                crate::dependency::ProviderOutcome::Failed {
                    attempts,
                    last_error,
                } => (*attempts, last_error.clone()),
                _ => (0, "unknown".to_string()),
            };
            let failure = BootstrapError::RequiredProviderFailed {
                name: fatal.name.clone(),
                attempts,
                reason,
            };
            tracing::error!(%failure, "bootstrap reached critical failure");
            self.store.put_value(
                FAILURE_BREADCRUMB_KEY,
                json!({
                    "stage": Stage::Dependencies.as_str(),
                    "error": failure.to_string(),
                    "providers": providers.outcome_summary(),
                    "timestamp": Utc::now().to_rfc3339(),
                }),
            );
            self.enter(Stage::Failed);
            return BootstrapReport {
                stage: Stage::Failed,
                auth: AuthOutcome::Anonymous {
                    reason: "bootstrap failed before auth".to_string(),
                },
                providers,
                offline_assumed,
                degraded,
                failure: Some(failure),
                elapsed: started.elapsed(),
            };
        }
        degraded.extend(providers.degraded().iter().map(|n| format!("provider:{n}")));

        // Auth: bounded retries; exhaustion is anonymous mode, and the
        // stage as a whole is skippable.
        self.enter(Stage::Auth);
        let auth = match timeout(self.config.stage_timeout, self.acquire_session()).await {
            Ok((outcome, exhausted)) => {
                if exhausted {
                    degraded.push("auth".to_string());
                }
                outcome
            },
            Err(_) => {
                tracing::warn!(
                    budget = ?self.config.stage_timeout,
                    "auth stage overran its budget; continuing anonymously"
                );
                degraded.push("auth".to_string());
                AuthOutcome::Anonymous {
                    reason: "auth stage timed out".to_string(),
                }
            },
        };

        // Components: side-effect-free service probe; failures never
        // escalate.
        self.enter(Stage::Components);
        match timeout(
            self.config.stage_timeout,
            self.gateway.invoke("service-status", Value::Null),
        )
        .await
        {
            Ok(Ok(_)) => {},
            Ok(Err(error)) => {
                tracing::info!(%error, "service probe failed; continuing");
                degraded.push("services".to_string());
            },
            Err(_) => {
                tracing::warn!("service probe timed out; continuing");
                degraded.push("services".to_string());
            },
        }

        self.enter(Stage::Complete);
        if degraded.is_empty() {
            self.store.remove(DEGRADED_BREADCRUMB_KEY);
        } else {
            self.store.put_value(
                DEGRADED_BREADCRUMB_KEY,
                json!({
                    "subsystems": degraded,
                    "timestamp": Utc::now().to_rfc3339(),
                }),
            );
        }

        BootstrapReport {
            stage: Stage::Complete,
            auth,
            providers,
            offline_assumed,
            degraded,
            failure: None,
            elapsed: started.elapsed(),
        }
    }

    /// Session retrieval under the retry policy. Returns the outcome plus
    /// whether the attempt budget was exhausted on errors (as opposed to a
    /// clean "no stored session" answer).
    async fn acquire_session(&self) -> (AuthOutcome, bool) {
        let retry = &self.config.auth;
        let mut last_reason = String::new();

        for attempt in 1..=retry.max_attempts.max(1) {
            if attempt > 1 {
                tokio::time::sleep(retry.backoff.delay_for_attempt(attempt - 1)).await;
            }
            match timeout(retry.attempt_timeout, self.gateway.get_session()).await {
                Ok(Ok(Some(session))) => {
                    tracing::info!(user = %session.user_id, attempt, "session retrieved");
                    return (AuthOutcome::Authenticated(session), false);
                },
                Ok(Ok(None)) => {
                    // A definite answer: nobody is signed in. Not a
                    // failure, no point retrying.
                    return (
                        AuthOutcome::Anonymous {
                            reason: "no stored session".to_string(),
                        },
                        false,
                    );
                },
                Ok(Err(error)) => {
                    last_reason = error.to_string();
                },
                Err(_) => {
                    // The call's future is dropped: a late session cannot
                    // overwrite the anonymous decision.
                    last_reason =
                        format!("attempt {attempt} timed out after {:?}", retry.attempt_timeout);
                },
            }
            tracing::warn!(
                attempt,
                max_attempts = retry.max_attempts,
                reason = %last_reason,
                "session retrieval attempt failed"
            );
        }

        (
            AuthOutcome::Anonymous {
                reason: format!("retries exhausted: {last_reason}"),
            },
            true,
        )
    }

    fn enter(&self, stage: Stage) {
        tracing::info!(stage = stage.as_str(), "bootstrap stage");
        self.stage_tx.send_replace(stage);
    }
}

impl std::fmt::Debug for Bootstrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bootstrapper")
            .field("providers", &self.providers.len())
            .field("config", &self.config)
            .finish()
    }
}

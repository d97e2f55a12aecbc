//! Composition root.
//!
//! Every service in the resiliency core is explicitly constructed and
//! owned here, with no ambient module-level globals. The supervisor runs the
//! bootstrap, derives the shell decision for the render layer, then keeps
//! the observation side (probes, watch loop, auth listener) running until
//! [`AppSupervisor::stop`], which tears every subscription and task back
//! down so repeated bring-ups (hot reload in development) cannot leak
//! listeners.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use solace_core::config::ResilienceConfig;
use solace_core::health::{metric_names, HealthRegistry, HealthStatus};
use solace_core::store::SafeStore;
use solace_core::triage::TriageReport;
use tokio::sync::watch;

use crate::audit::AuditTrail;
use crate::bootstrap::{BootstrapReport, Bootstrapper, Stage};
use crate::dependency::ProviderRegistry;
use crate::gateway::{AuthSubscription, BackendGateway, Credentials, GatewayError, Session};
use crate::probes::{MemoryStats, Monitor, MonitorHandle, SurfaceInspector};
use crate::selftest::{standard_battery, SelfTestHarness};
use crate::watch::{WatchHandle, WatchLoop};

/// Which shell the render layer should mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shell", rename_all = "snake_case")]
pub enum ShellDecision {
    /// Bootstrap completed; mount the full application.
    Normal,
    /// Bootstrap still in flight; mount the loading shell.
    Loading {
        /// The stage currently running.
        stage: String,
    },
    /// Critical failure; mount the minimal dependency-free shell.
    SafeMode {
        /// Human-readable reason.
        reason: String,
    },
}

impl ShellDecision {
    /// Maps a stage (and optional failure text) to a shell.
    #[must_use]
    pub fn for_stage(stage: Stage, failure: Option<&str>) -> Self {
        match stage {
            Stage::Complete => Self::Normal,
            Stage::Failed => Self::SafeMode {
                reason: failure.unwrap_or("bootstrap failed").to_string(),
            },
            other => Self::Loading {
                stage: other.as_str().to_string(),
            },
        }
    }
}

/// Builder for [`AppSupervisor`].
pub struct AppSupervisorBuilder {
    gateway: Arc<dyn BackendGateway>,
    providers: ProviderRegistry,
    config: ResilienceConfig,
    store: Option<Arc<SafeStore>>,
    inspector: Option<Arc<dyn SurfaceInspector>>,
    memory: Option<Arc<dyn MemoryStats>>,
}

impl AppSupervisorBuilder {
    /// Registers the providers to resolve during bootstrap.
    #[must_use]
    pub fn providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = providers;
        self
    }

    /// Overrides the configuration.
    #[must_use]
    pub fn config(mut self, config: ResilienceConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses the given store for diagnostics (defaults to in-memory).
    #[must_use]
    pub fn store(mut self, store: Arc<SafeStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Enables the surface probes against this inspector.
    #[must_use]
    pub fn inspector(mut self, inspector: Arc<dyn SurfaceInspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    /// Enables the memory-pressure probe against these statistics.
    #[must_use]
    pub fn memory_stats(mut self, memory: Arc<dyn MemoryStats>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Runs the bootstrap and starts the observation services.
    ///
    /// Never fails: a critical bootstrap failure is reported through
    /// [`AppSupervisor::shell`] as safe mode, with the monitoring side
    /// still running so diagnostics keep flowing.
    pub async fn start(self) -> AppSupervisor {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(SafeStore::in_memory()));
        let registry = HealthRegistry::new();
        let audit = AuditTrail::new(self.gateway.clone());

        let bootstrapper = Bootstrapper::new(
            self.gateway.clone(),
            self.providers,
            self.config.bootstrap.clone(),
            store.clone(),
        );
        let stage_rx = bootstrapper.stage_watch();
        let report = bootstrapper.run().await;

        registry.record_status(
            metric_names::BACKEND_CONNECTIVITY,
            if report.offline_assumed {
                HealthStatus::Warning
            } else {
                HealthStatus::Healthy
            },
            if report.offline_assumed {
                "connectivity probe missed; running offline-assumed"
            } else {
                "backend reachable"
            },
        );
        audit.bootstrap_finished(&report).await;

        let harness = Arc::new(standard_battery(self.gateway.clone(), store.clone()));

        let monitor = self.inspector.map(|inspector| {
            Monitor::start(
                registry.clone(),
                inspector,
                self.memory,
                self.config.probes.clone(),
            )
        });
        let watch = WatchLoop::start(registry.clone(), harness.clone(), self.config.watch);

        let auth_registry = registry.clone();
        let auth_subscription = self.gateway.on_auth_change(Box::new(move |change| {
            auth_registry.record_status(
                metric_names::AUTH_STATE,
                HealthStatus::Healthy,
                change.as_str(),
            );
        }));

        #[cfg(feature = "debug-handles")]
        debug::install(registry.clone(), harness.clone());

        AppSupervisor {
            gateway: self.gateway,
            report,
            stage_rx,
            store,
            registry,
            harness,
            audit,
            monitor,
            watch: Some(watch),
            auth_subscription: Some(auth_subscription),
        }
    }
}

/// The running resiliency core.
pub struct AppSupervisor {
    gateway: Arc<dyn BackendGateway>,
    report: BootstrapReport,
    stage_rx: watch::Receiver<Stage>,
    store: Arc<SafeStore>,
    registry: HealthRegistry,
    harness: Arc<SelfTestHarness>,
    audit: AuditTrail,
    monitor: Option<MonitorHandle>,
    watch: Option<WatchHandle>,
    auth_subscription: Option<AuthSubscription>,
}

impl AppSupervisor {
    /// Starts building a supervisor over the given gateway.
    #[must_use]
    pub fn builder(gateway: Arc<dyn BackendGateway>) -> AppSupervisorBuilder {
        AppSupervisorBuilder {
            gateway,
            providers: ProviderRegistry::new(),
            config: ResilienceConfig::default(),
            store: None,
            inspector: None,
            memory: None,
        }
    }

    /// The shell the render layer should mount.
    #[must_use]
    pub fn shell(&self) -> ShellDecision {
        ShellDecision::for_stage(
            self.report.stage,
            self.report.failure.as_ref().map(|f| f.to_string()).as_deref(),
        )
    }

    /// The bootstrap report.
    #[must_use]
    pub fn report(&self) -> &BootstrapReport {
        &self.report
    }

    /// Stage feed captured before the run; late subscribers see the
    /// terminal stage.
    #[must_use]
    pub fn stage_watch(&self) -> watch::Receiver<Stage> {
        self.stage_rx.clone()
    }

    /// The health registry.
    #[must_use]
    pub fn registry(&self) -> &HealthRegistry {
        &self.registry
    }

    /// The self-test harness.
    #[must_use]
    pub fn harness(&self) -> &Arc<SelfTestHarness> {
        &self.harness
    }

    /// The diagnostics store.
    #[must_use]
    pub fn store(&self) -> &Arc<SafeStore> {
        &self.store
    }

    /// The audit trail, for the host application's own events.
    #[must_use]
    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    /// Triage from the most recent watch-triggered run.
    #[must_use]
    pub fn last_triage(&self) -> Option<TriageReport> {
        self.watch.as_ref().and_then(WatchHandle::last_triage)
    }

    /// Human-readable dump of the registry, the latest self-test report and
    /// the latest triage, for the operational dashboard.
    #[must_use]
    pub fn diagnostic_report(&self) -> String {
        let mut report = self.registry.diagnostic_report();
        match self.harness.last_report() {
            Some(tests) => {
                let _ = writeln!(report, "self-tests: {}", tests.summary());
            },
            None => {
                let _ = writeln!(report, "self-tests: no run yet");
            },
        }
        if let Some(triage) = self.last_triage() {
            let _ = writeln!(report, "{}", triage.summary());
        }
        report
    }

    /// Creates an account through the gateway. Errors are surfaced to the
    /// caller, never treated as fatal.
    ///
    /// # Errors
    ///
    /// Returns whatever the backend rejected the request with.
    pub async fn sign_up(&self, credentials: &Credentials) -> Result<(), GatewayError> {
        self.gateway.sign_up(credentials).await
    }

    /// Signs in through the gateway and reflects the result into the
    /// registry.
    ///
    /// # Errors
    ///
    /// Returns whatever the backend rejected the request with (bad
    /// credentials, outage).
    pub async fn sign_in(&self, credentials: &Credentials) -> Result<Session, GatewayError> {
        match self.gateway.sign_in_with_password(credentials).await {
            Ok(session) => {
                self.registry.record_status(
                    metric_names::AUTH_STATE,
                    HealthStatus::Healthy,
                    "signed_in",
                );
                Ok(session)
            },
            Err(error) => {
                tracing::warn!(%error, "sign-in failed");
                Err(error)
            },
        }
    }

    /// Ends the session through the gateway.
    ///
    /// # Errors
    ///
    /// Returns whatever the backend rejected the request with.
    pub async fn sign_out(&self) -> Result<(), GatewayError> {
        self.gateway.sign_out().await?;
        self.registry.record_status(
            metric_names::AUTH_STATE,
            HealthStatus::Healthy,
            "signed_out",
        );
        Ok(())
    }

    /// Stops the watch loop, probes and auth listener. Every subscription
    /// registered at start has its teardown here.
    pub async fn stop(mut self) {
        if let Some(subscription) = self.auth_subscription.take() {
            subscription.unsubscribe();
        }
        if let Some(mut monitor) = self.monitor.take() {
            monitor.stop();
        }
        if let Some(watch) = self.watch.take() {
            watch.stop().await;
        }
    }
}

impl std::fmt::Debug for AppSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppSupervisor")
            .field("stage", &self.report.stage)
            .field("shell", &self.shell())
            .finish()
    }
}

/// Development-only global handles for interactive diagnostics.
///
/// Compiled in only with the `debug-handles` feature; production builds
/// carry no ambient globals.
#[cfg(feature = "debug-handles")]
pub mod debug {
    use std::sync::{Arc, OnceLock};

    use solace_core::health::HealthRegistry;

    use crate::selftest::SelfTestHarness;

    /// Globally reachable diagnostics handles.
    #[derive(Clone)]
    pub struct DebugHandles {
        /// The live health registry.
        pub registry: HealthRegistry,
        /// The live self-test harness.
        pub harness: Arc<SelfTestHarness>,
    }

    static HANDLES: OnceLock<DebugHandles> = OnceLock::new();

    /// Installs the handles; the first supervisor wins.
    pub fn install(registry: HealthRegistry, harness: Arc<SelfTestHarness>) {
        let _ = HANDLES.set(DebugHandles { registry, harness });
    }

    /// The installed handles, if a supervisor has started.
    #[must_use]
    pub fn handles() -> Option<DebugHandles> {
        HANDLES.get().cloned()
    }
}

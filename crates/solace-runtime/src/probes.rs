//! Background health probes.
//!
//! Probes watch for the failure class no boundary can see: symptoms where
//! nothing threw. The rendered surface and runtime memory statistics are
//! reached through traits so the probes stay testable and host-agnostic.
//!
//! Every probe owns exactly one metric name, and no probe error ever
//! escapes: a panicking inspector turns into a critical metric describing
//! the probe failure itself, so the monitor cannot become a source of
//! crashes.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::json;
use solace_core::config::ProbeConfig;
use solace_core::health::{metric_names, HealthMetric, HealthRegistry, HealthStatus};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// What is currently visible on the rendered root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentSummary {
    /// Concatenated visible text.
    pub text: String,
    /// Number of visible media elements (images, video).
    pub media_count: usize,
}

impl ContentSummary {
    /// Returns `true` if the surface shows anything at all. Whitespace-only
    /// text does not count; a single media element does.
    #[must_use]
    pub fn has_visible_content(&self) -> bool {
        !self.text.trim().is_empty() || self.media_count > 0
    }
}

/// Read access to the rendered surface.
pub trait SurfaceInspector: Send + Sync {
    /// Visible content of the rendered root.
    fn visible_content(&self) -> ContentSummary;

    /// Identifiers of loading indicators currently present.
    fn loading_indicators(&self) -> Vec<String>;

    /// Whether the structural marker of successful framework
    /// initialization exists.
    fn framework_marker_present(&self) -> bool;
}

/// One heap observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    /// Bytes currently in use.
    pub used_bytes: u64,
    /// Runtime heap limit in bytes.
    pub limit_bytes: u64,
}

impl MemorySample {
    /// Used fraction of the limit, in `[0, 1]` for sane inputs.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // heap sizes are far below 2^52
    pub fn ratio(&self) -> f64 {
        if self.limit_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.limit_bytes as f64
    }
}

/// Read access to runtime heap statistics, where the host exposes them.
pub trait MemoryStats: Send + Sync {
    /// Current sample, or `None` if the host has no heap statistics.
    fn sample(&self) -> Option<MemorySample>;
}

/// Owns the background probe tasks.
#[derive(Debug)]
pub struct MonitorHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Stops every probe task. Idempotent.
    pub fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    /// Returns `true` once [`stop`](Self::stop) has run.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Starts the probe battery against a registry.
#[derive(Debug)]
pub struct Monitor;

impl Monitor {
    /// Spawns the blank-surface, framework-marker, stuck-loading and
    /// (when stats are available) memory-pressure probes. The returned
    /// handle stops them all.
    #[must_use]
    pub fn start(
        registry: HealthRegistry,
        inspector: Arc<dyn SurfaceInspector>,
        memory: Option<Arc<dyn MemoryStats>>,
        config: ProbeConfig,
    ) -> MonitorHandle {
        let mut tasks = Vec::with_capacity(4);

        tasks.push(tokio::spawn(blank_surface_probe(
            registry.clone(),
            inspector.clone(),
            config.clone(),
        )));
        tasks.push(tokio::spawn(framework_marker_probe(
            registry.clone(),
            inspector.clone(),
            config.clone(),
        )));
        tasks.push(tokio::spawn(stuck_loading_probe(
            registry.clone(),
            inspector,
            config.clone(),
        )));
        if let Some(memory) = memory {
            tasks.push(tokio::spawn(memory_pressure_probe(registry, memory, config)));
        }

        MonitorHandle { tasks }
    }
}

/// One-shot: after the settle delay, a surface with no visible content is
/// critical.
async fn blank_surface_probe(
    registry: HealthRegistry,
    inspector: Arc<dyn SurfaceInspector>,
    config: ProbeConfig,
) {
    tokio::time::sleep(config.blank_settle).await;
    let Some(summary) = guarded(&registry, metric_names::BLANK_SURFACE, || {
        inspector.visible_content()
    }) else {
        return;
    };

    let metric = if summary.has_visible_content() {
        HealthMetric::new(
            metric_names::BLANK_SURFACE,
            HealthStatus::Healthy,
            "visible content present",
        )
    } else {
        HealthMetric::new(
            metric_names::BLANK_SURFACE,
            HealthStatus::Critical,
            "no content found on rendered surface",
        )
    }
    .with_details(json!({
        "text_len": summary.text.trim().len(),
        "media_count": summary.media_count,
    }));
    registry.record(metric);
}

/// One-shot: the framework marker must exist shortly after mount.
async fn framework_marker_probe(
    registry: HealthRegistry,
    inspector: Arc<dyn SurfaceInspector>,
    config: ProbeConfig,
) {
    tokio::time::sleep(config.marker_settle).await;
    let Some(present) = guarded(&registry, metric_names::PROVIDER_MARKER, || {
        inspector.framework_marker_present()
    }) else {
        return;
    };

    if present {
        registry.record_status(
            metric_names::PROVIDER_MARKER,
            HealthStatus::Healthy,
            "framework marker present",
        );
    } else {
        registry.record_status(
            metric_names::PROVIDER_MARKER,
            HealthStatus::Critical,
            "framework marker missing after mount",
        );
    }
}

/// Periodic: a loading indicator continuously present past the warning
/// and critical thresholds escalates accordingly.
async fn stuck_loading_probe(
    registry: HealthRegistry,
    inspector: Arc<dyn SurfaceInspector>,
    config: ProbeConfig,
) {
    let mut ticker = tokio::time::interval(config.loading_poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut continuous_since: Option<tokio::time::Instant> = None;

    loop {
        ticker.tick().await;
        let Some(indicators) = guarded(&registry, metric_names::STUCK_LOADING, || {
            inspector.loading_indicators()
        }) else {
            continue;
        };

        if indicators.is_empty() {
            continuous_since = None;
            registry.record_status(
                metric_names::STUCK_LOADING,
                HealthStatus::Healthy,
                "no loading indicators",
            );
            continue;
        }

        let since = *continuous_since.get_or_insert_with(tokio::time::Instant::now);
        let present_for = since.elapsed();
        let (status, message) = if present_for >= config.loading_critical_after {
            (
                HealthStatus::Critical,
                format!("loading indicators present for {}s", present_for.as_secs()),
            )
        } else if present_for >= config.loading_warning_after {
            (
                HealthStatus::Warning,
                format!("loading indicators present for {}s", present_for.as_secs()),
            )
        } else {
            (
                HealthStatus::Healthy,
                "loading indicators within budget".to_string(),
            )
        };

        registry.record(
            HealthMetric::new(metric_names::STUCK_LOADING, status, message).with_details(json!({
                "indicators": indicators,
                "present_for_ms": present_for.as_millis() as u64,
            })),
        );
    }
}

/// Periodic: heap usage relative to the limit.
async fn memory_pressure_probe(
    registry: HealthRegistry,
    memory: Arc<dyn MemoryStats>,
    config: ProbeConfig,
) {
    let mut ticker = tokio::time::interval(config.memory_poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(sample) = guarded(&registry, metric_names::MEMORY_PRESSURE, || memory.sample())
        else {
            continue;
        };
        let Some(sample) = sample else {
            // Host exposes no heap statistics; nothing to observe.
            continue;
        };

        let ratio = sample.ratio();
        let status = if ratio > config.memory_critical_ratio {
            HealthStatus::Critical
        } else if ratio > config.memory_warning_ratio {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        };

        registry.record(
            HealthMetric::new(
                metric_names::MEMORY_PRESSURE,
                status,
                format!("{:.0}% of heap limit in use", ratio * 100.0),
            )
            .with_details(json!({
                "used_bytes": sample.used_bytes,
                "limit_bytes": sample.limit_bytes,
            })),
        );
    }
}

/// Runs a probe body, converting a panic into a critical metric on the
/// probe's own name.
fn guarded<T>(registry: &HealthRegistry, metric: &str, body: impl FnOnce() -> T) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(value) => Some(value),
        Err(panic) => {
            registry.record_status(
                metric,
                HealthStatus::Critical,
                format!("probe failed: {}", panic_message(&panic)),
            );
            None
        },
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

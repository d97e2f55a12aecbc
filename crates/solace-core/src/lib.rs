//! Domain logic for the Solace client resiliency core.
//!
//! This crate holds the synchronous pieces of the client's bring-up and
//! self-observation machinery:
//!
//! - [`retry`]: bounded-retry-then-degrade policy shared by every remote
//!   step.
//! - [`health`]: the health metric registry and its subscriber fan-out.
//! - [`selftest`]: the self-test result data model.
//! - [`boundary`]: fault boundaries with retry ceilings and scoped
//!   fallbacks.
//! - [`store`]: the never-throws key/value store for failure diagnostics.
//! - [`triage`]: rule-based remediation hints over test reports and health
//!   snapshots.
//! - [`config`]: all of the above's policy knobs, as TOML.
//!
//! The async machinery (bootstrap driver, probes, harness execution, watch
//! loop) lives in `solace-runtime`.

pub mod boundary;
pub mod config;
pub mod health;
pub mod retry;
pub mod selftest;
pub mod store;
pub mod triage;

pub use boundary::{
    BoundaryChain, BoundaryScope, BoundaryState, Fault, FaultBoundary, FaultRecord, FallbackView,
    RecoveryAction,
};
pub use config::{BootstrapConfig, ConfigError, ProbeConfig, ResilienceConfig, WatchConfig};
pub use health::{
    HealthMetric, HealthRegistry, HealthSnapshot, HealthStatus, HealthSubscription,
};
pub use retry::{BackoffConfig, RetryConfig};
pub use selftest::{Importance, TestReport, TestResult, TestStatus, TIER_ORDER};
pub use store::SafeStore;
pub use triage::{classify, FailureCategory, RemediationHint, TriageReport};

//! Async machinery for the Solace client resiliency core.
//!
//! The synchronous domain logic (retry policy, health registry, fault
//! boundaries, safe store, triage) lives in `solace-core`; this crate
//! drives it on tokio:
//!
//! - [`gateway`]: the remote backend at its interface boundary.
//! - [`dependency`]: late-bound provider registry with per-provider
//!   timeout/retry/fallback resolution.
//! - [`bootstrap`]: the progressive bootstrap state machine.
//! - [`probes`]: background health probes over the rendered surface and
//!   runtime memory.
//! - [`selftest`]: the tiered self-test harness and its standard battery.
//! - [`watch`]: the debounced, rate-limited bridge from critical health
//!   signals to harness runs.
//! - [`audit`]: best-effort audit rows through the gateway.
//! - [`supervisor`]: the composition root owning all of the above with a
//!   `start`/`stop` lifecycle.

pub mod audit;
pub mod bootstrap;
pub mod dependency;
pub mod gateway;
pub mod probes;
pub mod selftest;
pub mod supervisor;
pub mod watch;

pub use audit::AuditTrail;
pub use bootstrap::{
    AuthOutcome, BootstrapError, BootstrapReport, Bootstrapper, Stage,
};
pub use dependency::{
    provider_handle, LoadError, ProviderError, ProviderOutcome, ProviderRegistry, ProviderSpec,
    ResolvedProviders,
};
pub use gateway::{
    AuthChange, AuthSubscription, BackendGateway, Credentials, GatewayError, Session,
};
pub use probes::{ContentSummary, MemorySample, MemoryStats, Monitor, MonitorHandle, SurfaceInspector};
pub use selftest::{standard_battery, SelfTest, SelfTestHarness, TestOutcome};
pub use supervisor::{AppSupervisor, AppSupervisorBuilder, ShellDecision};
pub use watch::{WatchHandle, WatchLoop};

//! Late-bound provider registry and resolver.
//!
//! Routing, data caches and other heavyweight pieces of the client are not
//! linked into the bootstrap path directly; they are registered as
//! providers with an async loader, a retry policy and an optional fallback,
//! then resolved at one composition point. A provider that exhausts its
//! attempts degrades to its fallback; only a required provider with no
//! fallback can fail the bring-up.

use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use solace_core::retry::RetryConfig;
use thiserror::Error;
use tokio::time::timeout;

/// Opaque handle to a resolved provider value.
pub type ProviderHandle = Arc<dyn Any + Send + Sync>;

/// Future produced by one loader invocation.
pub type ProviderFuture = Pin<Box<dyn Future<Output = Result<ProviderHandle, LoadError>> + Send>>;

type ProviderLoader = Arc<dyn Fn() -> ProviderFuture + Send + Sync>;

/// Wraps a value as a [`ProviderHandle`].
#[must_use]
pub fn provider_handle<T: Send + Sync + 'static>(value: T) -> ProviderHandle {
    Arc::new(value)
}

/// Error produced by a provider loader.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct LoadError {
    /// What went wrong.
    pub message: String,
}

impl LoadError {
    /// Creates a load error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors raised while building the registry.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Two providers were registered under one name.
    #[error("duplicate provider name: {name}")]
    DuplicateName {
        /// The conflicting name.
        name: String,
    },
}

/// One registered provider.
pub struct ProviderSpec {
    name: String,
    required: bool,
    retry: RetryConfig,
    loader: ProviderLoader,
    fallback: Option<ProviderHandle>,
}

impl ProviderSpec {
    /// Creates an optional provider with the default retry policy.
    #[must_use]
    pub fn new<F, Fut>(name: impl Into<String>, loader: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ProviderHandle, LoadError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            required: false,
            retry: RetryConfig::default(),
            loader: Arc::new(move || Box::pin(loader())),
            fallback: None,
        }
    }

    /// Marks the provider as required: it must resolve (directly or via
    /// fallback) before bootstrap can complete.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Installs a fallback value used when every attempt fails.
    #[must_use]
    pub fn fallback<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.fallback = Some(provider_handle(value));
        self
    }

    /// Provider name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Worst-case wall-clock budget for resolving this provider.
    #[must_use]
    pub fn budget(&self) -> Duration {
        self.retry.worst_case_budget()
    }
}

impl std::fmt::Debug for ProviderSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSpec")
            .field("name", &self.name)
            .field("required", &self.required)
            .field("retry", &self.retry)
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

/// Final outcome of one provider resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ProviderOutcome {
    /// The loader succeeded within the attempt budget.
    Loaded {
        /// Attempts consumed, including the successful one.
        attempts: u32,
    },

    /// Every attempt failed; the declared fallback is in use.
    FallbackUsed {
        /// Attempts consumed.
        attempts: u32,
        /// The last attempt's error.
        last_error: String,
    },

    /// Every attempt failed and no fallback exists.
    Failed {
        /// Attempts consumed.
        attempts: u32,
        /// The last attempt's error.
        last_error: String,
    },
}

impl ProviderOutcome {
    /// Returns `true` if the loader itself succeeded.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded { .. })
    }

    /// Returns `true` if the fallback is in use.
    #[must_use]
    pub const fn is_fallback(&self) -> bool {
        matches!(self, Self::FallbackUsed { .. })
    }

    /// Returns `true` if no value is available at all.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Returns the outcome as a string identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Loaded { .. } => "loaded",
            Self::FallbackUsed { .. } => "fallback_used",
            Self::Failed { .. } => "failed",
        }
    }
}

/// One provider after resolution.
#[derive(Clone)]
pub struct ResolvedProvider {
    /// Provider name.
    pub name: String,
    /// Whether the provider was required.
    pub required: bool,
    /// How resolution ended.
    pub outcome: ProviderOutcome,
    /// The resolved value (loaded or fallback), absent on failure.
    pub handle: Option<ProviderHandle>,
    /// Wall-clock time spent resolving.
    pub elapsed: Duration,
}

impl std::fmt::Debug for ResolvedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedProvider")
            .field("name", &self.name)
            .field("required", &self.required)
            .field("outcome", &self.outcome)
            .field("has_handle", &self.handle.is_some())
            .field("elapsed", &self.elapsed)
            .finish()
    }
}

/// All providers after a resolution pass.
#[derive(Debug, Clone, Default)]
pub struct ResolvedProviders {
    providers: BTreeMap<String, ResolvedProvider>,
}

impl ResolvedProviders {
    /// The provider record for `name`, if registered.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ResolvedProvider> {
        self.providers.get(name)
    }

    /// The resolved value for `name`, downcast to its concrete type.
    #[must_use]
    pub fn handle_as<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.providers
            .get(name)?
            .handle
            .clone()?
            .downcast::<T>()
            .ok()
    }

    /// Iterates records in name order.
    pub fn iter(&self) -> impl Iterator<Item = &ResolvedProvider> {
        self.providers.values()
    }

    /// Number of providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Returns `true` if no providers were registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// The first required provider with no usable value, if any. This is
    /// the single fatal condition of the whole bring-up.
    #[must_use]
    pub fn fatal(&self) -> Option<&ResolvedProvider> {
        self.providers
            .values()
            .find(|p| p.required && p.outcome.is_failed())
    }

    /// Names of providers running on their fallback.
    #[must_use]
    pub fn degraded(&self) -> Vec<&str> {
        self.providers
            .values()
            .filter(|p| p.outcome.is_fallback())
            .map(|p| p.name.as_str())
            .collect()
    }

    /// Outcome summary suitable for a diagnostic breadcrumb.
    #[must_use]
    pub fn outcome_summary(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .providers
            .values()
            .map(|p| {
                (
                    p.name.clone(),
                    serde_json::to_value(&p.outcome)
                        .unwrap_or_else(|_| serde_json::Value::String(p.outcome.as_str().into())),
                )
            })
            .collect();
        serde_json::Value::Object(map)
    }
}

/// Registry of providers awaiting resolution.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    specs: Vec<ProviderSpec>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::DuplicateName` if a provider with the same
    /// name is already registered.
    pub fn register(&mut self, spec: ProviderSpec) -> Result<(), ProviderError> {
        if self.specs.iter().any(|s| s.name == spec.name) {
            return Err(ProviderError::DuplicateName { name: spec.name });
        }
        self.specs.push(spec);
        Ok(())
    }

    /// Number of registered providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Returns `true` if no providers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Registered names, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.specs.iter().map(|s| s.name.as_str()).collect()
    }

    /// Worst-case wall-clock budget for [`resolve_all`](Self::resolve_all):
    /// the slowest single provider, since providers resolve concurrently.
    #[must_use]
    pub fn budget(&self) -> Duration {
        self.specs
            .iter()
            .map(ProviderSpec::budget)
            .max()
            .unwrap_or(Duration::ZERO)
    }

    /// Resolves every provider concurrently. The pass completes only when
    /// all providers have settled (loaded, degraded to fallback, or
    /// failed); it never errors itself, failures are recorded per
    /// provider.
    pub async fn resolve_all(&self) -> ResolvedProviders {
        let resolutions = self.specs.iter().map(resolve_one);
        let resolved = futures::future::join_all(resolutions).await;
        ResolvedProviders {
            providers: resolved.into_iter().map(|p| (p.name.clone(), p)).collect(),
        }
    }
}

async fn resolve_one(spec: &ProviderSpec) -> ResolvedProvider {
    let started = tokio::time::Instant::now();
    let mut last_error = String::new();

    for attempt in 1..=spec.retry.max_attempts.max(1) {
        if attempt > 1 {
            tokio::time::sleep(spec.retry.backoff.delay_for_attempt(attempt - 1)).await;
        }
        match timeout(spec.retry.attempt_timeout, (spec.loader)()).await {
            Ok(Ok(handle)) => {
                tracing::debug!(provider = %spec.name, attempt, "provider loaded");
                return ResolvedProvider {
                    name: spec.name.clone(),
                    required: spec.required,
                    outcome: ProviderOutcome::Loaded { attempts: attempt },
                    handle: Some(handle),
                    elapsed: started.elapsed(),
                };
            },
            Ok(Err(error)) => {
                last_error = error.message;
            },
            Err(_) => {
                // The loader's future is dropped here: a late resolution
                // cannot surface after the timeout decided the attempt.
                last_error = format!(
                    "attempt {attempt} timed out after {:?}",
                    spec.retry.attempt_timeout
                );
            },
        }
        tracing::warn!(
            provider = %spec.name,
            attempt,
            max_attempts = spec.retry.max_attempts,
            error = %last_error,
            "provider load attempt failed"
        );
    }

    let attempts = spec.retry.max_attempts.max(1);
    if let Some(fallback) = spec.fallback.clone() {
        tracing::warn!(provider = %spec.name, "provider degraded to fallback");
        ResolvedProvider {
            name: spec.name.clone(),
            required: spec.required,
            outcome: ProviderOutcome::FallbackUsed {
                attempts,
                last_error,
            },
            handle: Some(fallback),
            elapsed: started.elapsed(),
        }
    } else {
        ResolvedProvider {
            name: spec.name.clone(),
            required: spec.required,
            outcome: ProviderOutcome::Failed {
                attempts,
                last_error,
            },
            handle: None,
            elapsed: started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn counting_loader(
        calls: Arc<AtomicU32>,
        fail_first: u32,
    ) -> impl Fn() -> ProviderFuture + Send + Sync + 'static {
        move || {
            let calls = calls.clone();
            Box::pin(async move {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if call <= fail_first {
                    Err(LoadError::new(format!("injected failure {call}")))
                } else {
                    Ok(provider_handle(format!("value from call {call}")))
                }
            })
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            attempt_timeout: Duration::from_millis(50),
            backoff: solace_core::retry::BackoffConfig::Fixed {
                delay: Duration::from_millis(1),
            },
        }
    }

    #[tokio::test]
    async fn test_two_attempt_budget_uses_fallback_not_third_call() {
        // The loader would succeed on its third call, but the policy allows
        // two total attempts: the fallback must win.
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = ProviderRegistry::new();
        registry
            .register(
                ProviderSpec::new("router", counting_loader(calls.clone(), 2))
                    .required()
                    .retry(fast_retry(2))
                    .fallback("static route table".to_string()),
            )
            .unwrap();

        let resolved = registry.resolve_all().await;
        let router = resolved.get("router").unwrap();
        assert_eq!(
            router.outcome,
            ProviderOutcome::FallbackUsed {
                attempts: 2,
                last_error: "injected failure 2".to_string(),
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            resolved.handle_as::<String>("router").as_deref(),
            Some(&"static route table".to_string())
        );
        assert!(resolved.fatal().is_none());
        assert_eq!(resolved.degraded(), vec!["router"]);
    }

    #[tokio::test]
    async fn test_loader_success_on_retry_is_loaded() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = ProviderRegistry::new();
        registry
            .register(
                ProviderSpec::new("cache", counting_loader(calls, 1)).retry(fast_retry(3)),
            )
            .unwrap();

        let resolved = registry.resolve_all().await;
        assert_eq!(
            resolved.get("cache").unwrap().outcome,
            ProviderOutcome::Loaded { attempts: 2 }
        );
    }

    #[tokio::test]
    async fn test_required_without_fallback_is_fatal() {
        let mut registry = ProviderRegistry::new();
        registry
            .register(
                ProviderSpec::new("session-cache", || async {
                    Err(LoadError::new("backing service gone"))
                })
                .required()
                .retry(fast_retry(2)),
            )
            .unwrap();

        let resolved = registry.resolve_all().await;
        let fatal = resolved.fatal().unwrap();
        assert_eq!(fatal.name, "session-cache");
        assert!(fatal.outcome.is_failed());
        assert!(fatal.handle.is_none());
    }

    #[tokio::test]
    async fn test_optional_failure_is_not_fatal() {
        let mut registry = ProviderRegistry::new();
        registry
            .register(
                ProviderSpec::new("analytics", || async { Err(LoadError::new("blocked")) })
                    .retry(fast_retry(1)),
            )
            .unwrap();

        let resolved = registry.resolve_all().await;
        assert!(resolved.fatal().is_none());
        assert!(resolved.get("analytics").unwrap().outcome.is_failed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_loader_times_out_per_attempt() {
        let mut registry = ProviderRegistry::new();
        registry
            .register(
                ProviderSpec::new("slow", || async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(provider_handle(()))
                })
                .retry(RetryConfig {
                    max_attempts: 2,
                    attempt_timeout: Duration::from_secs(1),
                    backoff: solace_core::retry::BackoffConfig::Fixed {
                        delay: Duration::from_millis(100),
                    },
                }),
            )
            .unwrap();

        let started = tokio::time::Instant::now();
        let resolved = registry.resolve_all().await;
        // Two 1s attempts plus one 100ms backoff.
        assert_eq!(started.elapsed(), Duration::from_millis(2100));
        match &resolved.get("slow").unwrap().outcome {
            ProviderOutcome::Failed { attempts, last_error } => {
                assert_eq!(*attempts, 2);
                assert!(last_error.contains("timed out"));
            },
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_providers_resolve_concurrently() {
        let slow_loader = || async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(provider_handle(()))
        };
        let mut registry = ProviderRegistry::new();
        registry
            .register(ProviderSpec::new("a", slow_loader).retry(fast_retry_with_timeout()))
            .unwrap();
        registry
            .register(ProviderSpec::new("b", slow_loader).retry(fast_retry_with_timeout()))
            .unwrap();

        let started = tokio::time::Instant::now();
        let resolved = registry.resolve_all().await;
        // Interleaved, not sequential: total time is one loader's, not two.
        assert_eq!(started.elapsed(), Duration::from_secs(1));
        assert!(resolved.get("a").unwrap().outcome.is_loaded());
        assert!(resolved.get("b").unwrap().outcome.is_loaded());
    }

    fn fast_retry_with_timeout() -> RetryConfig {
        RetryConfig {
            max_attempts: 1,
            attempt_timeout: Duration::from_secs(5),
            backoff: solace_core::retry::BackoffConfig::default(),
        }
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = ProviderRegistry::new();
        registry
            .register(ProviderSpec::new("router", || async {
                Ok(provider_handle(()))
            }))
            .unwrap();
        let result = registry.register(ProviderSpec::new("router", || async {
            Ok(provider_handle(()))
        }));
        assert!(matches!(
            result,
            Err(ProviderError::DuplicateName { name }) if name == "router"
        ));
    }

    #[test]
    fn test_registry_budget_is_slowest_provider() {
        let mut registry = ProviderRegistry::new();
        registry
            .register(
                ProviderSpec::new("fast", || async { Ok(provider_handle(())) })
                    .retry(RetryConfig::single_attempt(Duration::from_secs(1))),
            )
            .unwrap();
        registry
            .register(
                ProviderSpec::new("slow", || async { Ok(provider_handle(())) })
                    .retry(RetryConfig::single_attempt(Duration::from_secs(4))),
            )
            .unwrap();
        assert_eq!(registry.budget(), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_handle_downcast_mismatch_is_none() {
        let mut registry = ProviderRegistry::new();
        registry
            .register(ProviderSpec::new("typed", || async {
                Ok(provider_handle(42u64))
            }))
            .unwrap();
        let resolved = registry.resolve_all().await;
        assert_eq!(resolved.handle_as::<u64>("typed").as_deref(), Some(&42));
        assert!(resolved.handle_as::<String>("typed").is_none());
    }
}

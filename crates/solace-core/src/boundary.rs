//! Fault boundaries: contain a failure to the smallest enclosing scope.
//!
//! A boundary wraps one scope of the client (a page, the router, the auth
//! provider). When that scope faults, the boundary swaps in a fallback view
//! scoped to the failing subsystem, so an operator can tell from the
//! rendered fallback alone whether auth, navigation or data access broke.
//! Each boundary carries a retry ceiling; past it, only reload and go-home
//! remain.
//!
//! Boundaries compose innermost-first in a [`BoundaryChain`]. A fault that
//! escapes a misbehaving inner fallback is captured by the next boundary
//! out; the chain's floor is a static safe-mode view with no failure modes
//! of its own.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::SafeStore;

/// Subsystem a boundary protects. Determines the scoped fallback text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryScope {
    /// Authentication/session provider.
    Auth,
    /// Route resolution and navigation.
    Routing,
    /// Data-query/cache provider.
    DataQuery,
    /// One page of the application.
    Page,
    /// A single component subtree.
    Component,
}

impl BoundaryScope {
    /// Returns the scope as a string identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Routing => "routing",
            Self::DataQuery => "data_query",
            Self::Page => "page",
            Self::Component => "component",
        }
    }

    /// Title of the scoped fallback view.
    #[must_use]
    pub const fn fallback_title(&self) -> &'static str {
        match self {
            Self::Auth => "Authentication unavailable",
            Self::Routing => "Navigation error",
            Self::DataQuery => "Data temporarily unavailable",
            Self::Page => "This page hit a problem",
            Self::Component => "Part of this page failed to load",
        }
    }

    /// Body of the scoped fallback view.
    #[must_use]
    pub const fn fallback_message(&self) -> &'static str {
        match self {
            Self::Auth => "You can keep browsing without signing in while we recover.",
            Self::Routing => "We could not open that route. The rest of the app still works.",
            Self::DataQuery => "Your data could not be loaded right now. Nothing was lost.",
            Self::Page => "The rest of the application is unaffected.",
            Self::Component => "Everything around it keeps working.",
        }
    }
}

/// A captured fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fault {
    /// Human-readable description.
    pub message: String,

    /// Optional context (stack-like trail, originating operation).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    /// When the fault was captured.
    pub timestamp: DateTime<Utc>,
}

impl Fault {
    /// Creates a fault stamped with the current time.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            timestamp: Utc::now(),
        }
    }

    /// Attaches context to the fault.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Recovery actions a fallback view can offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Re-attempt mounting the protected scope (only while the retry
    /// ceiling has not been reached).
    Retry,
    /// Full reload of the application.
    Reload,
    /// Navigate back to the home screen.
    GoHome,
}

/// What a boundary renders instead of its protected scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackView {
    /// Name of the boundary that produced this view (`safe_mode` for the
    /// chain floor).
    pub boundary: String,

    /// Scoped title.
    pub title: String,

    /// Scoped body text.
    pub message: String,

    /// Recovery actions currently available.
    pub actions: Vec<RecoveryAction>,
}

impl FallbackView {
    /// The absolute-floor view: static data, no routing, no data fetching,
    /// nothing that can itself fault.
    #[must_use]
    pub fn safe_mode(fault: &Fault) -> Self {
        Self {
            boundary: "safe_mode".to_string(),
            title: "Something went wrong".to_string(),
            message: format!(
                "The application could not recover on its own ({}). Reloading usually fixes this.",
                fault.message
            ),
            actions: vec![RecoveryAction::Reload, RecoveryAction::GoHome],
        }
    }
}

/// Mutable state of one boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundaryState {
    /// Whether a fault is currently captured.
    pub has_error: bool,

    /// The captured fault, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<Fault>,

    /// Number of retries performed since the last full reset. Never
    /// exceeds the boundary's ceiling.
    pub retry_count: u32,
}

/// Record persisted to the safe store on every capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultRecord {
    /// Boundary name.
    pub boundary: String,
    /// Protected scope.
    pub scope: BoundaryScope,
    /// Fault message.
    pub message: String,
    /// Fault context, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Capture time.
    pub timestamp: DateTime<Utc>,
    /// Retry count at capture time.
    pub retry_count: u32,
}

type FallbackFactory = Box<dyn Fn(&Fault) -> Result<FallbackView, Fault> + Send + Sync>;

/// A fault-isolation wrapper around one scope.
pub struct FaultBoundary {
    name: String,
    scope: BoundaryScope,
    max_retries: u32,
    state: BoundaryState,
    store: Option<Arc<SafeStore>>,
    custom_fallback: Option<FallbackFactory>,
}

impl FaultBoundary {
    /// Creates a boundary with the default scoped fallback.
    #[must_use]
    pub fn new(name: impl Into<String>, scope: BoundaryScope, max_retries: u32) -> Self {
        Self {
            name: name.into(),
            scope,
            max_retries,
            state: BoundaryState::default(),
            store: None,
            custom_fallback: None,
        }
    }

    /// Persists captured faults to the given store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<SafeStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Installs a custom fallback view factory. A factory that errors (or
    /// panics) lets the fault escape to the next boundary out.
    #[must_use]
    pub fn with_custom_fallback(
        mut self,
        factory: impl Fn(&Fault) -> Result<FallbackView, Fault> + Send + Sync + 'static,
    ) -> Self {
        self.custom_fallback = Some(Box::new(factory));
        self
    }

    /// Boundary name used in diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The protected scope.
    #[must_use]
    pub const fn scope(&self) -> BoundaryScope {
        self.scope
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &BoundaryState {
        &self.state
    }

    /// Returns `true` while the retry action is still offered.
    #[must_use]
    pub const fn can_retry(&self) -> bool {
        self.state.has_error && self.state.retry_count < self.max_retries
    }

    /// Captures a fault: records it, persists a [`FaultRecord`], and
    /// produces the fallback view.
    ///
    /// # Errors
    ///
    /// Returns the fault back when a custom fallback factory fails or
    /// panics, so the caller (normally a [`BoundaryChain`]) can escalate it
    /// to the next boundary out.
    pub fn capture(&mut self, fault: Fault) -> Result<FallbackView, Fault> {
        tracing::warn!(
            boundary = %self.name,
            scope = self.scope.as_str(),
            message = %fault.message,
            "fault captured"
        );
        self.state.has_error = true;
        self.state.fault = Some(fault.clone());
        self.persist_record(&fault);

        if let Some(factory) = &self.custom_fallback {
            let produced = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                factory(&fault)
            }));
            return match produced {
                Ok(Ok(view)) => Ok(view),
                Ok(Err(escaped)) => {
                    tracing::warn!(boundary = %self.name, "custom fallback failed; escalating");
                    Err(escaped)
                },
                Err(_) => {
                    tracing::warn!(boundary = %self.name, "custom fallback panicked; escalating");
                    Err(fault)
                },
            };
        }

        Ok(self.fallback())
    }

    /// The boundary's current fallback view (scoped text plus whichever
    /// recovery actions remain).
    #[must_use]
    pub fn fallback(&self) -> FallbackView {
        FallbackView {
            boundary: self.name.clone(),
            title: self.scope.fallback_title().to_string(),
            message: self.scope.fallback_message().to_string(),
            actions: self.available_actions(),
        }
    }

    /// Recovery actions currently available. Retry disappears once the
    /// ceiling is reached; reload and go-home always remain.
    #[must_use]
    pub fn available_actions(&self) -> Vec<RecoveryAction> {
        let mut actions = Vec::with_capacity(3);
        if self.can_retry() {
            actions.push(RecoveryAction::Retry);
        }
        actions.push(RecoveryAction::Reload);
        actions.push(RecoveryAction::GoHome);
        actions
    }

    /// User-triggered retry: clears the captured fault and counts the
    /// attempt. Returns `false` (and changes nothing) once the ceiling is
    /// reached.
    pub fn retry(&mut self) -> bool {
        if !self.can_retry() {
            return false;
        }
        self.state.has_error = false;
        self.state.fault = None;
        self.state.retry_count += 1;
        true
    }

    /// Full remount: clears the fault and the retry counter.
    pub fn reset(&mut self) {
        self.state = BoundaryState::default();
    }

    fn persist_record(&self, fault: &Fault) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let record = FaultRecord {
            boundary: self.name.clone(),
            scope: self.scope,
            message: fault.message.clone(),
            context: fault.context.clone(),
            timestamp: fault.timestamp,
            retry_count: self.state.retry_count,
        };
        store.put(&format!("boundary::{}", self.name), &record);
    }
}

impl std::fmt::Debug for FaultBoundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultBoundary")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("max_retries", &self.max_retries)
            .field("state", &self.state)
            .finish()
    }
}

/// Boundaries composed innermost-first.
///
/// [`capture`](Self::capture) hands the fault to the narrowest boundary;
/// if that boundary's fallback itself fails, the fault escalates outward.
/// When every boundary fails, the static safe-mode floor renders.
#[derive(Debug, Default)]
pub struct BoundaryChain {
    boundaries: Vec<FaultBoundary>,
}

impl BoundaryChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a boundary outside the current outermost one.
    #[must_use]
    pub fn wrap(mut self, boundary: FaultBoundary) -> Self {
        self.boundaries.push(boundary);
        self
    }

    /// Number of boundaries in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.boundaries.len()
    }

    /// Returns `true` if the chain has no boundaries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.boundaries.is_empty()
    }

    /// The boundary at `index` (0 = innermost), if present.
    #[must_use]
    pub fn boundary(&self, index: usize) -> Option<&FaultBoundary> {
        self.boundaries.get(index)
    }

    /// Mutable access for retry/reset flows.
    #[must_use]
    pub fn boundary_mut(&mut self, index: usize) -> Option<&mut FaultBoundary> {
        self.boundaries.get_mut(index)
    }

    /// Captures a fault at the innermost boundary, escalating outward past
    /// any boundary whose fallback fails. Always produces a view: the
    /// safe-mode floor cannot fail.
    pub fn capture(&mut self, fault: Fault) -> FallbackView {
        let mut current = fault;
        for boundary in &mut self.boundaries {
            match boundary.capture(current) {
                Ok(view) => return view,
                Err(escaped) => current = escaped,
            }
        }
        tracing::error!(
            message = %current.message,
            "fault escaped every boundary; rendering safe mode"
        );
        FallbackView::safe_mode(&current)
    }
}

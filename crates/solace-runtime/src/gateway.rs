//! Remote backend gateway boundary.
//!
//! The backend (auth/session store, tables, remote functions) is an
//! external collaborator: this crate consumes it through the
//! [`BackendGateway`] trait and never implements it for a real transport.
//! Every call the core makes through the trait is wrapped with its own
//! timeout; a slow or failing backend degrades the client, it never wedges
//! it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by gateway calls.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The backend did not answer within the caller's budget.
    #[error("gateway call timed out: {operation}")]
    Timeout {
        /// Which operation timed out.
        operation: String,
    },

    /// The backend is unreachable.
    #[error("gateway unavailable: {reason}")]
    Unavailable {
        /// Why the backend is unreachable.
        reason: String,
    },

    /// The backend answered with a rejection (bad credentials, denied
    /// write). Non-fatal; surfaced to the caller.
    #[error("gateway rejected request: {message}")]
    Rejected {
        /// Rejection message from the backend.
        message: String,
    },

    /// The backend answered with something the client cannot interpret.
    #[error("gateway protocol error: {reason}")]
    Protocol {
        /// What was malformed.
        reason: String,
    },
}

impl GatewayError {
    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Creates an unavailable error.
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Creates a rejection error.
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[must_use]
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    /// Returns `true` if retrying the call may succeed.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Unavailable { .. } => true,
            Self::Rejected { .. } | Self::Protocol { .. } => false,
        }
    }
}

/// An authenticated session as reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Stable user identifier.
    pub user_id: String,

    /// Session expiry, if the backend reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Creates a session with no known expiry.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            expires_at: None,
        }
    }
}

/// Credentials for password sign-in/sign-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    /// Account email.
    pub email: String,
    /// Account password.
    pub password: String,
}

/// Push notification of a session change.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthChange {
    /// A session became active.
    SignedIn(Session),
    /// The session ended.
    SignedOut,
    /// The session's token was refreshed.
    TokenRefreshed(Session),
}

impl AuthChange {
    /// Returns the change as a string identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SignedIn(_) => "signed_in",
            Self::SignedOut => "signed_out",
            Self::TokenRefreshed(_) => "token_refreshed",
        }
    }
}

/// Callback invoked on every auth change.
pub type AuthCallback = Box<dyn Fn(&AuthChange) + Send + Sync>;

/// Disposer for an auth-change listener. The listener is removed when the
/// subscription is cancelled or dropped; every subscription taken during
/// bootstrap must be torn down to avoid leaking listeners across repeated
/// bring-up attempts.
pub struct AuthSubscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl AuthSubscription {
    /// Wraps a cancellation closure supplied by the gateway
    /// implementation.
    #[must_use]
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription that has nothing to tear down.
    #[must_use]
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    /// Removes the listener.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for AuthSubscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for AuthSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSubscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// The remote backend, at its interface boundary.
///
/// Implementations may be slow or fail at any time; callers own their
/// timeouts and treat every error as degradable.
#[async_trait]
pub trait BackendGateway: Send + Sync {
    /// Lightweight reachability probe.
    async fn ping(&self) -> Result<(), GatewayError>;

    /// Fetches the current session, if one is stored.
    async fn get_session(&self) -> Result<Option<Session>, GatewayError>;

    /// Registers a listener for session changes.
    fn on_auth_change(&self, callback: AuthCallback) -> AuthSubscription;

    /// Creates an account.
    async fn sign_up(&self, credentials: &Credentials) -> Result<(), GatewayError>;

    /// Signs in with email and password.
    async fn sign_in_with_password(
        &self,
        credentials: &Credentials,
    ) -> Result<Session, GatewayError>;

    /// Ends the current session.
    async fn sign_out(&self) -> Result<(), GatewayError>;

    /// Invokes a named remote function with an opaque payload.
    async fn invoke(&self, function: &str, payload: Value) -> Result<Value, GatewayError>;

    /// Reads rows from a table. The core does not interpret row schemas.
    async fn select(&self, table: &str, filter: Value) -> Result<Vec<Value>, GatewayError>;

    /// Inserts a row into a table.
    async fn insert(&self, table: &str, row: Value) -> Result<(), GatewayError>;

    /// Updates rows matching `filter`.
    async fn update(&self, table: &str, filter: Value, row: Value) -> Result<(), GatewayError>;
}

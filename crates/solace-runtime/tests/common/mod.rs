//! Shared test doubles for the integration suites.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use solace_runtime::gateway::{
    AuthCallback, AuthChange, AuthSubscription, BackendGateway, Credentials, GatewayError,
    Session,
};

/// Installs a test-writer tracing subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// How [`StubGateway::get_session`] behaves.
#[derive(Clone, Debug)]
pub enum SessionBehavior {
    /// A clean "nobody signed in" answer.
    Anonymous,
    /// A stored session exists.
    Authenticated(Session),
    /// The auth store errors on every call.
    Unavailable,
    /// The call never completes within any sane budget.
    Hang,
    /// Errors `failures` times, then answers with the session.
    FlakyThenAuthenticated {
        /// How many leading calls fail.
        failures: u32,
        /// The session returned afterwards.
        session: Session,
    },
}

/// Scriptable in-memory gateway.
pub struct StubGateway {
    pub ping_ok: bool,
    pub ping_delay: Duration,
    pub session_behavior: SessionBehavior,
    pub session_calls: AtomicU32,
    pub invoke_ok: bool,
    pub insert_ok: bool,
    pub inserted_rows: Mutex<Vec<(String, Value)>>,
    listeners: Arc<Mutex<Vec<(u64, AuthCallback)>>>,
    next_listener_id: AtomicU64,
}

impl StubGateway {
    pub fn healthy() -> Self {
        Self {
            ping_ok: true,
            ping_delay: Duration::ZERO,
            session_behavior: SessionBehavior::Anonymous,
            session_calls: AtomicU32::new(0),
            invoke_ok: true,
            insert_ok: true,
            inserted_rows: Mutex::new(Vec::new()),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(0),
        }
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            session_behavior: SessionBehavior::Authenticated(session),
            ..Self::healthy()
        }
    }

    pub fn offline() -> Self {
        Self {
            ping_ok: false,
            session_behavior: SessionBehavior::Unavailable,
            invoke_ok: false,
            insert_ok: false,
            ..Self::healthy()
        }
    }

    pub fn auth_hanging() -> Self {
        Self {
            session_behavior: SessionBehavior::Hang,
            ..Self::healthy()
        }
    }

    pub fn with_session_behavior(mut self, behavior: SessionBehavior) -> Self {
        self.session_behavior = behavior;
        self
    }

    pub fn with_ping_delay(mut self, delay: Duration) -> Self {
        self.ping_delay = delay;
        self
    }

    pub fn session_call_count(&self) -> u32 {
        self.session_calls.load(Ordering::SeqCst)
    }

    /// Number of auth listeners currently registered.
    pub fn active_auth_listeners(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    /// Pushes an auth change to every registered listener.
    pub fn fire_auth_change(&self, change: &AuthChange) {
        let listeners = self.listeners.lock().unwrap();
        for (_, callback) in listeners.iter() {
            callback(change);
        }
    }

    /// Rows inserted into `table`.
    pub fn rows_for(&self, table: &str) -> Vec<Value> {
        self.inserted_rows
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == table)
            .map(|(_, row)| row.clone())
            .collect()
    }
}

#[async_trait]
impl BackendGateway for StubGateway {
    async fn ping(&self) -> Result<(), GatewayError> {
        if !self.ping_delay.is_zero() {
            tokio::time::sleep(self.ping_delay).await;
        }
        if self.ping_ok {
            Ok(())
        } else {
            Err(GatewayError::unavailable("stub offline"))
        }
    }

    async fn get_session(&self) -> Result<Option<Session>, GatewayError> {
        let call = self.session_calls.fetch_add(1, Ordering::SeqCst) + 1;
        match &self.session_behavior {
            SessionBehavior::Anonymous => Ok(None),
            SessionBehavior::Authenticated(session) => Ok(Some(session.clone())),
            SessionBehavior::Unavailable => Err(GatewayError::unavailable("auth store down")),
            SessionBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(None)
            },
            SessionBehavior::FlakyThenAuthenticated { failures, session } => {
                if call <= *failures {
                    Err(GatewayError::unavailable(format!("transient failure {call}")))
                } else {
                    Ok(Some(session.clone()))
                }
            },
        }
    }

    fn on_auth_change(&self, callback: AuthCallback) -> AuthSubscription {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().unwrap().push((id, callback));
        let listeners = self.listeners.clone();
        AuthSubscription::new(move || {
            listeners.lock().unwrap().retain(|(other, _)| *other != id);
        })
    }

    async fn sign_up(&self, _credentials: &Credentials) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn sign_in_with_password(
        &self,
        credentials: &Credentials,
    ) -> Result<Session, GatewayError> {
        if credentials.password.is_empty() {
            return Err(GatewayError::rejected("empty password"));
        }
        Ok(Session::new(format!("user:{}", credentials.email)))
    }

    async fn sign_out(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn invoke(&self, function: &str, payload: Value) -> Result<Value, GatewayError> {
        if self.invoke_ok {
            Ok(json!({"function": function, "echo": payload}))
        } else {
            Err(GatewayError::unavailable("functions offline"))
        }
    }

    async fn select(&self, _table: &str, _filter: Value) -> Result<Vec<Value>, GatewayError> {
        Ok(Vec::new())
    }

    async fn insert(&self, table: &str, row: Value) -> Result<(), GatewayError> {
        if !self.insert_ok {
            return Err(GatewayError::unavailable("tables offline"));
        }
        self.inserted_rows
            .lock()
            .unwrap()
            .push((table.to_string(), row));
        Ok(())
    }

    async fn update(
        &self,
        _table: &str,
        _filter: Value,
        _row: Value,
    ) -> Result<(), GatewayError> {
        Ok(())
    }
}

//! Shared fixtures for the session integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use huddle_client::session::SessionStatus;
use huddle_client::transport::{LoopbackHub, LoopbackTransport};
use huddle_client::{CredentialError, CredentialProvider, Phase, SessionConfig, SessionCoordinator};
use huddle_protocol::{AccessToken, Uid};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};

pub const WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
enum Outcome {
    Token(String),
    Rejected { status: u16, message: String },
}

/// Pauses a credential fetch until released
#[derive(Debug, Clone, Default)]
pub struct FetchGate {
    reached: Arc<Notify>,
    released: Arc<Notify>,
}

impl FetchGate {
    pub async fn reached(&self) {
        self.reached.notified().await;
    }

    pub fn release(&self) {
        self.released.notify_one();
    }
}

/// Credential provider with a fixed answer
#[derive(Debug)]
pub struct ScriptedCredentials {
    outcome: Outcome,
    delay: Duration,
    gate: Option<FetchGate>,
    calls: AtomicUsize,
}

impl ScriptedCredentials {
    pub fn token(value: &str) -> Self {
        Self::new(Outcome::Token(value.to_string()))
    }

    pub fn rejected(status: u16, message: &str) -> Self {
        Self::new(Outcome::Rejected {
            status,
            message: message.to_string(),
        })
    }

    fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            delay: Duration::ZERO,
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Park every fetch at the returned gate
    pub fn held(mut self) -> (Self, FetchGate) {
        let gate = FetchGate::default();
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for ScriptedCredentials {
    async fn fetch_token(&self, _channel: &str, _uid: Uid) -> Result<AccessToken, CredentialError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.reached.notify_one();
            gate.released.notified().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match &self.outcome {
            Outcome::Token(value) => Ok(AccessToken::new(value.clone(), i64::MAX)),
            Outcome::Rejected { status, message } => Err(CredentialError::Rejected {
                status: *status,
                message: message.clone(),
            }),
        }
    }
}

pub fn session_config() -> SessionConfig {
    SessionConfig {
        app_id: "huddle-test".to_string(),
        ..Default::default()
    }
}

pub fn coordinator(
    transport: &LoopbackTransport,
    credentials: Arc<ScriptedCredentials>,
) -> SessionCoordinator {
    coordinator_with_config(transport, credentials, session_config())
}

pub fn coordinator_with_config(
    transport: &LoopbackTransport,
    credentials: Arc<ScriptedCredentials>,
    config: SessionConfig,
) -> SessionCoordinator {
    SessionCoordinator::new(config, credentials, Arc::new(transport.clone()))
}

/// Wait until the published status satisfies `condition`
pub async fn wait_for_status(
    status: &mut watch::Receiver<SessionStatus>,
    condition: impl FnMut(&SessionStatus) -> bool,
) {
    let reached = tokio::time::timeout(WAIT, status.wait_for(condition))
        .await
        .map(|result| result.is_ok())
        .unwrap_or(false);
    assert!(reached, "status condition not reached: {:?}", *status.borrow());
}

/// Nothing of the session survives: no tracks, no membership, no listener
pub fn assert_fully_left(coordinator: &SessionCoordinator, hub: &LoopbackHub) {
    assert_eq!(coordinator.phase(), Phase::Left);
    assert_eq!(hub.open_local_tracks(), 0, "local tracks left open");
    assert_eq!(hub.membership_count(), 0, "channel membership left behind");
    assert_eq!(hub.registered_sinks(), 0, "event sink still registered");
    assert!(coordinator.participants().is_empty());
    assert!(coordinator.local_tracks().is_empty());
}

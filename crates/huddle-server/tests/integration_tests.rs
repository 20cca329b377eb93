//! Integration tests for the Huddle credential service
//!
//! These tests bind a real listener on a random local port and drive it
//! over HTTP, both directly and through the client's session coordinator.
//!
//! Run with: cargo test -p huddle-server --test integration_tests

use huddle_client::transport::LoopbackHub;
use huddle_client::{
    CredentialClient, CredentialError, CredentialProvider, Phase, SessionConfig,
    SessionCoordinator, SessionError,
};
use huddle_server::auth::verify_channel_token;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const APP_ID: &str = "huddle-test";
const CERTIFICATE: &str = "test-certificate-for-testing-only";
const EXPIRY_SECS: i64 = 900;

/// Test helper to start a test server
async fn start_test_server() -> TestServer {
    TestServer::start().await.expect("Failed to start test server")
}

/// Test server wrapper
struct TestServer {
    addr: std::net::SocketAddr,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    async fn start() -> anyhow::Result<Self> {
        let config = huddle_server::state::Config {
            bind_address: "127.0.0.1:0".to_string(),
            app_id: APP_ID.to_string(),
            app_certificate: CERTIFICATE.to_string(),
            token_expire_seconds: EXPIRY_SECS,
        };

        let router = huddle_server::create_app(config);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        // Create shutdown channel
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        // Spawn server
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .ok();
        });

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn coordinator(server: &TestServer, hub: &LoopbackHub) -> SessionCoordinator {
    SessionCoordinator::new(
        SessionConfig {
            app_id: APP_ID.to_string(),
            credential_timeout: Duration::from_secs(5),
            ..Default::default()
        },
        Arc::new(CredentialClient::new(server.http_url())),
        Arc::new(hub.transport()),
    )
}

#[tokio::test]
async fn test_health_check() {
    let server = start_test_server().await;
    let client = Client::new();

    let response = client
        .get(format!("{}/health", server.http_url()))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
    assert_eq!(response.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_issue_token_over_http() {
    let server = start_test_server().await;
    let client = Client::new();

    let response = client
        .post(format!("{}/api/token", server.http_url()))
        .json(&json!({ "channelName": "room-1", "uid": 42 }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();

    let token = body["token"].as_str().expect("token missing");
    let claims = assert_ok!(verify_channel_token(token, CERTIFICATE));
    assert_eq!(claims.app_id, APP_ID);
    assert_eq!(claims.channel, "room-1");
    assert_eq!(claims.uid, 42);
    assert_eq!(body["expiresAt"].as_i64(), Some(claims.iat + EXPIRY_SECS));
}

#[tokio::test]
async fn test_missing_uid_is_rejected() {
    let server = start_test_server().await;
    let client = Client::new();

    let response = client
        .post(format!("{}/api/token", server.http_url()))
        .json(&json!({ "channelName": "room-1" }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "channelName and uid are required");
}

#[tokio::test]
async fn test_credential_client_fetches_token() {
    let server = start_test_server().await;
    let credentials = CredentialClient::new(server.http_url());

    let token = assert_ok!(credentials.fetch_token("room-1", 7).await);
    let claims = assert_ok!(verify_channel_token(token.value(), CERTIFICATE));
    assert_eq!(claims.uid, 7);
    assert_eq!(token.expires_at(), claims.exp);
}

#[tokio::test]
async fn test_session_reaches_active_against_live_service() {
    let server = start_test_server().await;
    let hub = LoopbackHub::new();
    let coordinator = coordinator(&server, &hub);

    assert_ok!(coordinator.join("room-1", 42, "Ava").await);
    assert_eq!(coordinator.phase(), Phase::Active);
    assert_eq!(hub.members("room-1"), vec![42]);

    let tracks = coordinator.local_tracks();
    assert!(tracks.audio_present && tracks.video_present);
    assert!(tracks.audio_enabled && tracks.video_enabled);

    let report = coordinator.leave().await;
    assert!(report.is_clean());
    assert_eq!(hub.open_local_tracks(), 0);
    assert_eq!(hub.membership_count(), 0);
}

#[tokio::test]
async fn test_zero_uid_fails_before_transport_join() {
    let server = start_test_server().await;
    let hub = LoopbackHub::new();
    let coordinator = coordinator(&server, &hub);

    let err = assert_err!(coordinator.join("room-1", 0, "Ava").await);
    match err {
        SessionError::CredentialAcquisition(CredentialError::Rejected { status, message }) => {
            assert_eq!(status, 400);
            assert_eq!(message, "channelName and uid are required");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(coordinator.phase(), Phase::Left);
    assert_eq!(hub.join_attempts(), 0);
    assert_eq!(hub.open_local_tracks(), 0);
}

#[tokio::test]
async fn test_unreachable_service_fails_join() {
    // Grab a free port, then close it again
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let hub = LoopbackHub::new();
    let coordinator = SessionCoordinator::new(
        SessionConfig {
            app_id: APP_ID.to_string(),
            ..Default::default()
        },
        Arc::new(CredentialClient::new(format!("http://{}", addr))),
        Arc::new(hub.transport()),
    );

    let err = assert_err!(coordinator.join("room-1", 42, "Ava").await);
    assert!(matches!(
        err,
        SessionError::CredentialAcquisition(CredentialError::Http(_))
    ));
    assert_eq!(coordinator.phase(), Phase::Left);
    assert_eq!(hub.join_attempts(), 0);
}

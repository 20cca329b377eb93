use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use huddle_client::settings::{ClientConfig, generate_uid};
use huddle_client::transport::LoopbackHub;
use huddle_client::{CredentialClient, SessionCoordinator};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle_client=debug,huddle=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Huddle client...");

    let config = ClientConfig::load()?;
    let credentials = CredentialClient::new(config.server_url.clone());
    tracing::info!("Using credential service at {}", credentials.server_url());

    // No network media backend ships with the client; the loopback hub
    // stands in for the channel server
    let hub = LoopbackHub::new();
    let coordinator = SessionCoordinator::new(
        config.session_config(),
        Arc::new(credentials),
        Arc::new(hub.transport()),
    );

    let mut status = coordinator.watch();
    let status_task = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            tracing::info!(
                phase = %current.phase,
                audio = current.local.audio_enabled,
                video = current.local.video_enabled,
                participants = current.participants.len(),
                "Session status"
            );
        }
    });

    let uid = generate_uid();
    coordinator
        .join(&config.channel, uid, &config.display_name)
        .await?;

    tracing::info!("In channel {} as {}, press Ctrl-C to leave", config.channel, uid);
    tokio::signal::ctrl_c().await?;

    let report = coordinator.leave().await;
    if report.is_clean() {
        println!("Left {} cleanly", config.channel);
    } else {
        println!("Left {} with {} cleanup failure(s):", config.channel, report.failures.len());
        for failure in &report.failures {
            println!("  {}", failure);
        }
    }

    drop(coordinator);
    status_task.await?;

    Ok(())
}

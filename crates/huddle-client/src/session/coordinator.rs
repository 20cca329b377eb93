//! Join/leave orchestration for a single channel session
//!
//! [`SessionCoordinator`] drives credential acquisition, the transport join
//! and local media publishing, and guarantees that every resource it created
//! is released again whichever way the session ends: a failed join, an
//! explicit [`leave`](SessionCoordinator::leave), a leave racing an
//! in-flight join, or the coordinator being dropped.

use huddle_protocol::{MediaKind, TransportEvent, Uid};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::lock;
use super::phase::{Phase, SessionStatus};
use super::registry::{ParticipantRegistry, ParticipantSummary, RegistryEvent};
use crate::error::{CleanupFailure, CleanupStep, SessionError, TeardownReport};
use crate::media::{LocalMediaManager, LocalTrackSet};
use crate::network::{CredentialError, CredentialProvider};
use crate::transport::{MediaTransport, TransportError};

/// Per-coordinator settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Application identifier handed to the transport on join
    pub app_id: String,
    pub credential_timeout: Duration,
    pub join_timeout: Duration,
    pub leave_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            credential_timeout: Duration::from_secs(5),
            join_timeout: Duration::from_secs(10),
            leave_timeout: Duration::from_secs(5),
        }
    }
}

struct SessionInner {
    phase: Phase,
    /// Cancelled by `leave()`; replaced on every join
    cancel: CancellationToken,
    pump: Option<JoinHandle<()>>,
}

struct Core {
    config: SessionConfig,
    credentials: Arc<dyn CredentialProvider>,
    transport: Arc<dyn MediaTransport>,
    media: AsyncMutex<LocalMediaManager>,
    registry: Arc<Mutex<ParticipantRegistry>>,
    inner: Mutex<SessionInner>,
    status: Arc<watch::Sender<SessionStatus>>,
    /// Held for the whole of `join()`
    join_lock: AsyncMutex<()>,
}

impl Core {
    fn phase(&self) -> Phase {
        lock(&self.inner).phase
    }

    fn transition(&self, inner: &mut SessionInner, next: Phase) -> bool {
        if !inner.phase.can_transition_to(next) {
            tracing::debug!(from = %inner.phase, to = %next, "Rejected phase transition");
            return false;
        }

        tracing::debug!(from = %inner.phase, to = %next, "Session phase changed");
        inner.phase = next;
        self.status.send_modify(|status| status.phase = next);
        true
    }

    /// Cancel the current session and move it to `Leaving`.
    /// Returns false when there is nothing to leave.
    fn begin_leave(&self) -> bool {
        let mut inner = lock(&self.inner);
        if inner.phase.is_settled() {
            return false;
        }

        inner.cancel.cancel();
        if inner.phase != Phase::Leaving {
            self.transition(&mut inner, Phase::Leaving);
        }
        true
    }

    fn require_active(&self, operation: &'static str) -> Result<(), SessionError> {
        match self.phase() {
            Phase::Active => Ok(()),
            phase => Err(SessionError::InvalidState { operation, phase }),
        }
    }

    /// Release everything the session may hold. Each step runs regardless
    /// of earlier failures.
    async fn teardown(&self) -> TeardownReport {
        let mut report = TeardownReport::default();

        report.extend(self.media.lock().await.release());
        self.status
            .send_modify(|status| status.local = LocalTrackSet::default());

        let leave_timeout = self.config.leave_timeout;
        match tokio::time::timeout(leave_timeout, self.transport.leave()).await {
            Ok(Ok(())) | Ok(Err(TransportError::NotJoined)) => {}
            Ok(Err(e)) => report.extend([CleanupFailure::new(
                CleanupStep::LeaveChannel,
                e.to_string(),
            )]),
            Err(_) => report.extend([CleanupFailure::new(
                CleanupStep::LeaveChannel,
                TransportError::Timeout(leave_timeout).to_string(),
            )]),
        }

        self.transport.set_event_sink(None);
        let pump = lock(&self.inner).pump.take();
        if let Some(pump) = pump {
            pump.abort();
            if let Err(e) = pump.await {
                if !e.is_cancelled() {
                    report.extend([CleanupFailure::new(CleanupStep::StopEventPump, e.to_string())]);
                }
            }
        }

        lock(&self.registry).clear();
        self.status.send_modify(|status| status.participants.clear());

        report
    }

    fn settle(&self) {
        let mut inner = lock(&self.inner);
        self.transition(&mut inner, Phase::Left);
        self.status.send_modify(|status| {
            status.channel = None;
            status.uid = None;
            status.display_name = None;
            status.local = LocalTrackSet::default();
            status.participants.clear();
        });
    }

    /// Cancel the session and run the teardown as a task on the current runtime
    fn leave_in_background(self: &Arc<Self>) {
        if !self.begin_leave() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let core = self.clone();
                handle.spawn(async move {
                    let _join_guard = core.join_lock.lock().await;
                    if core.phase() == Phase::Leaving {
                        core.teardown().await;
                        core.settle();
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    "No tokio runtime for teardown; local tracks are released but the channel is not left"
                );
            }
        }
    }

    /// Unwind a join that failed on its own and hand back its error
    async fn abort_join(&self, error: SessionError) -> SessionError {
        tracing::error!("Join failed: {}", error);

        let report = self.teardown().await;
        if !report.is_clean() {
            tracing::warn!(failures = report.failures.len(), "Teardown after failed join was incomplete");
        }

        self.settle();
        error
    }
}

/// Tears the session down if a `join()` future is dropped before finishing.
/// Every join that runs to completion has moved the phase on from `Joining`.
struct AbandonedJoin {
    core: Arc<Core>,
}

impl Drop for AbandonedJoin {
    fn drop(&mut self) {
        if self.core.phase() == Phase::Joining {
            tracing::warn!("Join dropped before completing, leaving");
            self.core.leave_in_background();
        }
    }
}

/// Apply transport notifications to the registry, one at a time and in
/// delivery order
async fn run_event_pump(
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    transport: Arc<dyn MediaTransport>,
    registry: Arc<Mutex<ParticipantRegistry>>,
    status: Arc<watch::Sender<SessionStatus>>,
) {
    while let Some(event) = events.recv().await {
        tracing::debug!(?event, "Transport event");

        let update = match event {
            TransportEvent::Published { uid, kind } => match transport.subscribe(uid, kind).await {
                Ok(track) => RegistryEvent::Published { uid, kind, track },
                Err(e) => {
                    tracing::warn!(uid, %kind, "Failed to subscribe to remote track: {}", e);
                    continue;
                }
            },
            TransportEvent::Unpublished { uid, kind } => RegistryEvent::Unpublished { uid, kind },
            TransportEvent::Left { uid } => RegistryEvent::Left { uid },
        };

        let summaries = {
            let mut registry = lock(&registry);
            registry.apply(update);
            registry.summaries()
        };
        status.send_modify(|status| status.participants = summaries);
    }

    tracing::debug!("Transport event stream closed");
}

/// Owns at most one channel session at a time
pub struct SessionCoordinator {
    core: Arc<Core>,
}

impl SessionCoordinator {
    pub fn new(
        config: SessionConfig,
        credentials: Arc<dyn CredentialProvider>,
        transport: Arc<dyn MediaTransport>,
    ) -> Self {
        let (status, _) = watch::channel(SessionStatus::default());

        Self {
            core: Arc::new(Core {
                media: AsyncMutex::new(LocalMediaManager::new(transport.clone())),
                config,
                credentials,
                transport,
                registry: Arc::new(Mutex::new(ParticipantRegistry::new())),
                inner: Mutex::new(SessionInner {
                    phase: Phase::Idle,
                    cancel: CancellationToken::new(),
                    pump: None,
                }),
                status: Arc::new(status),
                join_lock: AsyncMutex::new(()),
            }),
        }
    }

    /// Join `channel` as `uid` and start publishing microphone and camera.
    ///
    /// Any failure unwinds what was set up so far and leaves the session in
    /// [`Phase::Left`]. A [`leave`](Self::leave) that arrives while this is
    /// in flight makes it return [`SessionError::Cancelled`]; the leaving
    /// side then performs the teardown.
    ///
    /// Dropping the returned future before it completes (inside a caller's
    /// `select!` or timeout) cancels the session and tears it down in the
    /// background, ending in [`Phase::Left`].
    pub async fn join(&self, channel: &str, uid: Uid, display_name: &str) -> Result<(), SessionError> {
        let core = &self.core;

        let Ok(_join_guard) = core.join_lock.try_lock() else {
            return Err(SessionError::InvalidState {
                operation: "join",
                phase: core.phase(),
            });
        };

        let cancel = {
            let mut inner = lock(&core.inner);
            if !inner.phase.is_settled() {
                return Err(SessionError::InvalidState {
                    operation: "join",
                    phase: inner.phase,
                });
            }

            inner.cancel = CancellationToken::new();
            core.status.send_modify(|status| {
                status.channel = Some(channel.to_string());
                status.uid = Some(uid);
                status.display_name = Some(display_name.to_string());
                status.local = LocalTrackSet::default();
                status.participants.clear();
            });
            core.transition(&mut inner, Phase::Joining);
            inner.cancel.clone()
        };
        // Declared after the join lock guard so it drops first
        let _abandoned = AbandonedJoin { core: core.clone() };

        tracing::info!(channel, uid, display_name, "Joining channel");

        let credential_timeout = core.config.credential_timeout;
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = tokio::time::timeout(credential_timeout, core.credentials.fetch_token(channel, uid)) => Some(result),
        };

        let token = match fetched {
            None => return Err(SessionError::Cancelled),
            Some(Ok(Ok(token))) => token,
            Some(Ok(Err(e))) => return Err(core.abort_join(e.into()).await),
            Some(Err(_)) => {
                let error = CredentialError::Timeout(credential_timeout);
                return Err(core.abort_join(error.into()).await);
            }
        };

        // The sink goes in before the transport join so no early event is lost
        let (sink, events) = mpsc::unbounded_channel();
        core.transport.set_event_sink(Some(sink));
        let pump = tokio::spawn(run_event_pump(
            events,
            core.transport.clone(),
            core.registry.clone(),
            core.status.clone(),
        ));
        lock(&core.inner).pump = Some(pump);

        let join_timeout = core.config.join_timeout;
        let joined = tokio::time::timeout(
            join_timeout,
            core.transport
                .join(&core.config.app_id, channel, token.value(), uid),
        )
        .await;

        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(core.abort_join(SessionError::Join(e)).await),
            Err(_) => {
                let error = SessionError::Join(TransportError::Timeout(join_timeout));
                return Err(core.abort_join(error).await);
            }
        }

        if cancel.is_cancelled() {
            tracing::info!(channel, "Join cancelled after transport join");
            return Err(SessionError::Cancelled);
        }

        let published = core.media.lock().await.acquire_and_publish().await;
        let tracks = match published {
            Ok(tracks) => tracks,
            Err(e) => return Err(core.abort_join(SessionError::Publish(e)).await),
        };

        let mut inner = lock(&core.inner);
        if cancel.is_cancelled() {
            tracing::info!(channel, "Join cancelled after publishing");
            return Err(SessionError::Cancelled);
        }

        core.status.send_modify(|status| status.local = tracks);
        core.transition(&mut inner, Phase::Active);
        tracing::info!(channel, uid, "Joined channel");

        Ok(())
    }

    /// Tear the session down. Never fails; cleanup problems are logged and
    /// returned in the report. A no-op when there is no session.
    pub async fn leave(&self) -> TeardownReport {
        let core = &self.core;

        if !core.begin_leave() {
            return TeardownReport::default();
        }

        // Wait for an in-flight join to reach a checkpoint
        let _join_guard = core.join_lock.lock().await;
        if core.phase() != Phase::Leaving {
            return TeardownReport::default();
        }

        let report = core.teardown().await;
        core.settle();

        if report.is_clean() {
            tracing::info!("Left channel");
        } else {
            tracing::warn!(failures = report.failures.len(), "Left channel with cleanup failures");
        }

        report
    }

    /// Flip the microphone's enabled flag and return the new value
    pub async fn toggle_audio(&self) -> Result<bool, SessionError> {
        self.toggle(MediaKind::Audio).await
    }

    /// Flip the camera's enabled flag and return the new value
    pub async fn toggle_video(&self) -> Result<bool, SessionError> {
        self.toggle(MediaKind::Video).await
    }

    async fn toggle(&self, kind: MediaKind) -> Result<bool, SessionError> {
        let operation = match kind {
            MediaKind::Audio => "toggle audio",
            MediaKind::Video => "toggle video",
        };

        self.core.require_active(operation)?;
        let mut media = self.core.media.lock().await;
        // A leave may have started while we waited for the tracks
        self.core.require_active(operation)?;

        let enabled = match kind {
            MediaKind::Audio => !media.audio_enabled(),
            MediaKind::Video => !media.video_enabled(),
        };

        let result = match kind {
            MediaKind::Audio => media.set_audio_enabled(enabled).await,
            MediaKind::Video => media.set_video_enabled(enabled).await,
        };
        result.map_err(SessionError::Media)?;

        let tracks = media.track_set();
        drop(media);
        self.core.status.send_modify(|status| status.local = tracks);

        Ok(enabled)
    }

    pub fn phase(&self) -> Phase {
        self.core.phase()
    }

    /// Subscribe to status changes
    pub fn watch(&self) -> watch::Receiver<SessionStatus> {
        self.core.status.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        self.core.status.borrow().clone()
    }

    pub fn participants(&self) -> Vec<ParticipantSummary> {
        lock(&self.core.registry).summaries()
    }

    pub fn local_tracks(&self) -> LocalTrackSet {
        self.core.status.borrow().local
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        if self.core.phase().is_settled() {
            return;
        }

        tracing::warn!("Session coordinator dropped while in a channel, leaving");
        self.core.leave_in_background();
    }
}

//! Media transport abstraction
//!
//! The coordinator only ever talks to the real-time media layer through
//! [`MediaTransport`]. Implementations own connection establishment, codecs
//! and network transmission; this crate ships [`loopback`] for development
//! and tests.

pub mod loopback;

use async_trait::async_trait;
use huddle_protocol::{MediaKind, TransportEvent, Uid};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

pub use loopback::{LoopbackFaults, LoopbackHub, LoopbackTransport, Step, StepGate};

/// Receiving end registered by the coordinator for transport notifications
pub type EventSink = mpsc::UnboundedSender<TransportEvent>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("not joined to a channel")]
    NotJoined,

    #[error("already joined to channel {0}")]
    AlreadyJoined(String),

    #[error("join rejected: {0}")]
    Rejected(String),

    #[error("capture device unavailable: {0}")]
    Device(String),

    #[error("user {uid} has not published {kind}")]
    NotPublished { uid: Uid, kind: MediaKind },

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport failure: {0}")]
    Other(String),
}

/// A locally captured audio or video track
#[async_trait]
pub trait LocalTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn kind(&self) -> MediaKind;

    fn is_enabled(&self) -> bool;

    /// Mute or unmute without unpublishing
    async fn set_enabled(&self, enabled: bool) -> Result<(), TransportError>;

    /// Stop capture and free the device. Consumes the track so it can only
    /// be closed once.
    fn close(self: Box<Self>) -> Result<(), TransportError>;
}

/// A track received from a remote channel member
pub trait RemoteTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn uid(&self) -> Uid;

    fn kind(&self) -> MediaKind;
}

/// Primitive channel operations consumed by the session coordinator
#[async_trait]
pub trait MediaTransport: Send + Sync {
    async fn join(
        &self,
        app_id: &str,
        channel: &str,
        token: &str,
        uid: Uid,
    ) -> Result<(), TransportError>;

    /// Leave the current channel. Returns [`TransportError::NotJoined`] when
    /// there is nothing to leave; callers treat that as success.
    async fn leave(&self) -> Result<(), TransportError>;

    async fn create_microphone_track(&self) -> Result<Box<dyn LocalTrack>, TransportError>;

    async fn create_camera_track(&self) -> Result<Box<dyn LocalTrack>, TransportError>;

    async fn publish(&self, tracks: &[&dyn LocalTrack]) -> Result<(), TransportError>;

    async fn subscribe(
        &self,
        uid: Uid,
        kind: MediaKind,
    ) -> Result<Arc<dyn RemoteTrack>, TransportError>;

    /// Register (or with `None`, unregister) the single consumer of
    /// [`TransportEvent`]s. Events are delivered in transport order.
    fn set_event_sink(&self, sink: Option<EventSink>);
}

//! Local media ownership
//!
//! [`LocalMediaManager`] is the only owner of the participant's own
//! microphone and camera tracks. Every track it creates is closed exactly
//! once, either by [`LocalMediaManager::release`] or when the manager is
//! dropped.

use huddle_protocol::MediaKind;
use std::sync::Arc;

use crate::error::{CleanupFailure, CleanupStep, MediaError};
use crate::transport::{LocalTrack, MediaTransport};

/// Point-in-time view of the local tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTrackSet {
    pub audio_present: bool,
    pub video_present: bool,
    pub audio_enabled: bool,
    pub video_enabled: bool,
}

impl Default for LocalTrackSet {
    fn default() -> Self {
        Self {
            audio_present: false,
            video_present: false,
            audio_enabled: true,
            video_enabled: true,
        }
    }
}

impl LocalTrackSet {
    pub fn is_empty(&self) -> bool {
        !self.audio_present && !self.video_present
    }
}

pub struct LocalMediaManager {
    transport: Arc<dyn MediaTransport>,
    audio: Option<Box<dyn LocalTrack>>,
    video: Option<Box<dyn LocalTrack>>,
    audio_enabled: bool,
    video_enabled: bool,
}

impl LocalMediaManager {
    pub fn new(transport: Arc<dyn MediaTransport>) -> Self {
        Self {
            transport,
            audio: None,
            video: None,
            audio_enabled: true,
            video_enabled: true,
        }
    }

    /// Capture microphone and camera as a pair and publish both.
    ///
    /// Each track is stored as soon as it exists, so an abandoned call still
    /// leaves it reachable by [`release`](Self::release). On any failure the
    /// tracks captured so far are closed before the error is returned.
    pub async fn acquire_and_publish(&mut self) -> Result<LocalTrackSet, MediaError> {
        if self.audio.is_some() || self.video.is_some() {
            return Err(MediaError::AlreadyAcquired);
        }

        let audio = self
            .transport
            .create_microphone_track()
            .await
            .map_err(|source| MediaError::Capture {
                kind: MediaKind::Audio,
                source,
            })?;
        self.audio_enabled = audio.is_enabled();
        self.audio = Some(audio);

        let video = match self.transport.create_camera_track().await {
            Ok(video) => video,
            Err(source) => {
                self.release();
                return Err(MediaError::Capture {
                    kind: MediaKind::Video,
                    source,
                });
            }
        };
        self.video_enabled = video.is_enabled();
        self.video = Some(video);

        let published = match (self.audio.as_deref(), self.video.as_deref()) {
            (Some(audio), Some(video)) => self.transport.publish(&[audio, video]).await,
            // Only reachable if a concurrent release emptied a slot
            _ => Err(crate::transport::TransportError::Other(
                "local tracks released before publish".to_string(),
            )),
        };

        if let Err(source) = published {
            self.release();
            return Err(MediaError::Publish(source));
        }

        tracing::info!("Published local audio and video tracks");
        Ok(self.track_set())
    }

    pub async fn set_audio_enabled(&mut self, enabled: bool) -> Result<(), MediaError> {
        self.set_enabled(MediaKind::Audio, enabled).await
    }

    pub async fn set_video_enabled(&mut self, enabled: bool) -> Result<(), MediaError> {
        self.set_enabled(MediaKind::Video, enabled).await
    }

    /// No-op when the track is absent or already in the requested state.
    /// The flag only changes once the track accepted the change.
    async fn set_enabled(&mut self, kind: MediaKind, enabled: bool) -> Result<(), MediaError> {
        let (track, flag) = match kind {
            MediaKind::Audio => (self.audio.as_deref(), &mut self.audio_enabled),
            MediaKind::Video => (self.video.as_deref(), &mut self.video_enabled),
        };

        let Some(track) = track else {
            return Ok(());
        };
        if *flag == enabled {
            return Ok(());
        }

        track
            .set_enabled(enabled)
            .await
            .map_err(|source| MediaError::Toggle { kind, source })?;
        *flag = enabled;

        tracing::debug!(%kind, enabled, "Local track toggled");
        Ok(())
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled
    }

    pub fn video_enabled(&self) -> bool {
        self.video_enabled
    }

    pub fn track_set(&self) -> LocalTrackSet {
        LocalTrackSet {
            audio_present: self.audio.is_some(),
            video_present: self.video.is_some(),
            audio_enabled: self.audio_enabled,
            video_enabled: self.video_enabled,
        }
    }

    /// Close whatever tracks are held. Never fails; close errors are logged
    /// and returned for the caller's teardown report. Repeated calls are no-ops.
    pub fn release(&mut self) -> Vec<CleanupFailure> {
        let mut failures = Vec::new();

        for track in [self.audio.take(), self.video.take()].into_iter().flatten() {
            let kind = track.kind();
            match track.close() {
                Ok(()) => tracing::debug!(%kind, "Released local track"),
                Err(e) => failures.push(CleanupFailure::new(
                    CleanupStep::ReleaseTrack(kind),
                    e.to_string(),
                )),
            }
        }

        self.audio_enabled = true;
        self.video_enabled = true;
        failures
    }
}

impl Drop for LocalMediaManager {
    fn drop(&mut self) {
        if !self.track_set().is_empty() {
            tracing::warn!("Media manager dropped while holding tracks, releasing");
            self.release();
        }
    }
}

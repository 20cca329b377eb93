//! In-process media transport
//!
//! A [`LoopbackHub`] plays the role of the channel server: it tracks
//! memberships, published tracks and open capture devices for every
//! [`LoopbackTransport`] endpoint created from it, and fans out
//! [`TransportEvent`]s the way a real SFU would. No media flows.
//!
//! Endpoints support fault injection ([`LoopbackFaults`]) and can park any
//! operation at a [`Step`] until the test releases it.

use super::{EventSink, LocalTrack, MediaTransport, RemoteTrack, TransportError};
use async_trait::async_trait;
use huddle_protocol::{MediaKind, TransportEvent, Uid};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Operations that can be parked with [`LoopbackTransport::hold`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Join,
    CreateMicrophone,
    CreateCamera,
    Publish,
    Leave,
}

/// Failures to inject into a loopback endpoint
#[derive(Debug, Clone, Default)]
pub struct LoopbackFaults {
    pub fail_join: bool,
    pub fail_microphone: bool,
    pub fail_camera: bool,
    pub fail_publish: bool,
    pub fail_leave: bool,
    pub fail_close: bool,
    pub fail_set_enabled: bool,
}

#[derive(Debug, Default)]
struct GateInner {
    reached: Notify,
    released: Notify,
}

/// One-shot pause point for a single operation
#[derive(Debug, Clone, Default)]
pub struct StepGate {
    inner: Arc<GateInner>,
}

impl StepGate {
    /// Resolves once the held operation has started and is parked
    pub async fn reached(&self) {
        self.inner.reached.notified().await;
    }

    /// Let the parked operation continue
    pub fn release(&self) {
        self.inner.released.notify_one();
    }
}

#[derive(Debug, Default)]
struct Member {
    endpoint: u64,
    published: BTreeMap<MediaKind, String>,
}

#[derive(Debug, Default)]
struct HubInner {
    channels: HashMap<String, BTreeMap<Uid, Member>>,
    memberships: HashMap<u64, (String, Uid)>,
    sinks: HashMap<u64, EventSink>,
    /// Open local track id -> owning endpoint
    open_tracks: HashMap<String, u64>,
    join_attempts: usize,
    next_endpoint: u64,
}

impl HubInner {
    fn broadcast(&self, channel: &str, except: u64, event: TransportEvent) {
        let Some(members) = self.channels.get(channel) else {
            return;
        };

        for member in members.values().filter(|m| m.endpoint != except) {
            if let Some(sink) = self.sinks.get(&member.endpoint) {
                // A dropped receiver just means that endpoint stopped listening
                let _ = sink.send(event);
            }
        }
    }

    fn join(&mut self, endpoint: u64, channel: &str, uid: Uid) -> Result<(), TransportError> {
        if let Some((current, _)) = self.memberships.get(&endpoint) {
            return Err(TransportError::AlreadyJoined(current.clone()));
        }

        let members = self.channels.entry(channel.to_string()).or_default();
        if members.contains_key(&uid) {
            return Err(TransportError::Rejected(format!(
                "uid {} is already in channel {}",
                uid, channel
            )));
        }

        // The newcomer learns about everything already published
        let existing: Vec<TransportEvent> = members
            .iter()
            .flat_map(|(uid, member)| {
                member
                    .published
                    .keys()
                    .map(move |kind| TransportEvent::Published { uid: *uid, kind: *kind })
            })
            .collect();

        members.insert(
            uid,
            Member {
                endpoint,
                published: BTreeMap::new(),
            },
        );
        self.memberships.insert(endpoint, (channel.to_string(), uid));

        if let Some(sink) = self.sinks.get(&endpoint) {
            for event in existing {
                let _ = sink.send(event);
            }
        }

        Ok(())
    }

    fn leave(&mut self, endpoint: u64) -> Result<(), TransportError> {
        let (channel, uid) = self
            .memberships
            .remove(&endpoint)
            .ok_or(TransportError::NotJoined)?;

        if let Some(members) = self.channels.get_mut(&channel) {
            members.remove(&uid);
            if members.is_empty() {
                self.channels.remove(&channel);
            }
        }

        self.broadcast(&channel, endpoint, TransportEvent::Left { uid });
        Ok(())
    }

    fn publish(&mut self, endpoint: u64, tracks: &[(String, MediaKind)]) -> Result<(), TransportError> {
        let (channel, uid) = self
            .memberships
            .get(&endpoint)
            .cloned()
            .ok_or(TransportError::NotJoined)?;

        if let Some((id, _)) = tracks.iter().find(|(id, _)| !self.open_tracks.contains_key(id)) {
            return Err(TransportError::Other(format!("track {} is closed", id)));
        }

        let member = self
            .channels
            .get_mut(&channel)
            .and_then(|members| members.get_mut(&uid))
            .ok_or(TransportError::NotJoined)?;

        let mut announced = Vec::new();
        for (id, kind) in tracks {
            if member.published.insert(*kind, id.clone()).as_ref() != Some(id) {
                announced.push(*kind);
            }
        }

        for kind in announced {
            self.broadcast(&channel, endpoint, TransportEvent::Published { uid, kind });
        }

        Ok(())
    }

    fn close_track(&mut self, endpoint: u64, id: &str, kind: MediaKind) {
        self.open_tracks.remove(id);

        let Some((channel, uid)) = self.memberships.get(&endpoint).cloned() else {
            return;
        };

        let unpublished = self
            .channels
            .get_mut(&channel)
            .and_then(|members| members.get_mut(&uid))
            .is_some_and(|member| {
                if member.published.get(&kind).map(String::as_str) == Some(id) {
                    member.published.remove(&kind);
                    true
                } else {
                    false
                }
            });

        if unpublished {
            self.broadcast(&channel, endpoint, TransportEvent::Unpublished { uid, kind });
        }
    }

    fn subscribe(&self, endpoint: u64, uid: Uid, kind: MediaKind) -> Result<LoopbackRemoteTrack, TransportError> {
        let (channel, _) = self
            .memberships
            .get(&endpoint)
            .ok_or(TransportError::NotJoined)?;

        let id = self
            .channels
            .get(channel)
            .and_then(|members| members.get(&uid))
            .and_then(|member| member.published.get(&kind))
            .ok_or(TransportError::NotPublished { uid, kind })?;

        Ok(LoopbackRemoteTrack {
            id: id.clone(),
            uid,
            kind,
        })
    }
}

/// Shared in-process channel server
#[derive(Debug, Clone, Default)]
pub struct LoopbackHub {
    inner: Arc<Mutex<HubInner>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new client endpoint attached to this hub
    pub fn transport(&self) -> LoopbackTransport {
        let endpoint = {
            let mut inner = lock(&self.inner);
            inner.next_endpoint += 1;
            inner.next_endpoint
        };

        LoopbackTransport {
            hub: self.clone(),
            endpoint,
            faults: Arc::new(Mutex::new(LoopbackFaults::default())),
            gates: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Local tracks created by any endpoint and not yet closed
    pub fn open_local_tracks(&self) -> usize {
        lock(&self.inner).open_tracks.len()
    }

    /// Number of endpoints currently joined to some channel
    pub fn membership_count(&self) -> usize {
        lock(&self.inner).memberships.len()
    }

    pub fn members(&self, channel: &str) -> Vec<Uid> {
        lock(&self.inner)
            .channels
            .get(channel)
            .map(|members| members.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Total join calls received, including failed ones
    pub fn join_attempts(&self) -> usize {
        lock(&self.inner).join_attempts
    }

    /// Number of endpoints with a registered event sink
    pub fn registered_sinks(&self) -> usize {
        lock(&self.inner).sinks.len()
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        lock(&self.inner)
    }
}

/// Local track handed out by a loopback endpoint
#[derive(Debug)]
pub struct LoopbackLocalTrack {
    id: String,
    kind: MediaKind,
    enabled: AtomicBool,
    hub: LoopbackHub,
    endpoint: u64,
    faults: Arc<Mutex<LoopbackFaults>>,
}

#[async_trait]
impl LocalTrack for LoopbackLocalTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn set_enabled(&self, enabled: bool) -> Result<(), TransportError> {
        if lock(&self.faults).fail_set_enabled {
            return Err(TransportError::Device(format!("{} track refused change", self.kind)));
        }
        self.enabled.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), TransportError> {
        if lock(&self.faults).fail_close {
            return Err(TransportError::Device(format!("{} device did not stop", self.kind)));
        }
        self.hub.lock().close_track(self.endpoint, &self.id, self.kind);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct LoopbackRemoteTrack {
    id: String,
    uid: Uid,
    kind: MediaKind,
}

impl RemoteTrack for LoopbackRemoteTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn uid(&self) -> Uid {
        self.uid
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }
}

/// One client's connection to a [`LoopbackHub`]
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    hub: LoopbackHub,
    endpoint: u64,
    faults: Arc<Mutex<LoopbackFaults>>,
    gates: Arc<Mutex<HashMap<Step, StepGate>>>,
}

impl LoopbackTransport {
    pub fn hub(&self) -> &LoopbackHub {
        &self.hub
    }

    pub fn set_faults(&self, faults: LoopbackFaults) {
        *lock(&self.faults) = faults;
    }

    /// Park the next call of `step` until the returned gate is released
    pub fn hold(&self, step: Step) -> StepGate {
        let gate = StepGate::default();
        lock(&self.gates).insert(step, gate.clone());
        gate
    }

    pub fn is_joined(&self) -> bool {
        self.hub.lock().memberships.contains_key(&self.endpoint)
    }

    fn faults(&self) -> LoopbackFaults {
        lock(&self.faults).clone()
    }

    async fn checkpoint(&self, step: Step) {
        let gate = lock(&self.gates).remove(&step);
        if let Some(gate) = gate {
            tracing::debug!(?step, "Loopback operation parked");
            gate.inner.reached.notify_one();
            gate.inner.released.notified().await;
        }
    }

    fn open_track(&self, kind: MediaKind) -> LoopbackLocalTrack {
        let id = format!("{}-{}", kind, Uuid::new_v4());
        self.hub.lock().open_tracks.insert(id.clone(), self.endpoint);

        LoopbackLocalTrack {
            id,
            kind,
            enabled: AtomicBool::new(true),
            hub: self.hub.clone(),
            endpoint: self.endpoint,
            faults: self.faults.clone(),
        }
    }
}

#[async_trait]
impl MediaTransport for LoopbackTransport {
    async fn join(
        &self,
        _app_id: &str,
        channel: &str,
        token: &str,
        uid: Uid,
    ) -> Result<(), TransportError> {
        self.hub.lock().join_attempts += 1;
        self.checkpoint(Step::Join).await;

        if self.faults().fail_join {
            return Err(TransportError::Rejected("loopback join refused".to_string()));
        }
        if token.is_empty() {
            return Err(TransportError::Rejected("missing token".to_string()));
        }

        self.hub.lock().join(self.endpoint, channel, uid)
    }

    async fn leave(&self) -> Result<(), TransportError> {
        self.checkpoint(Step::Leave).await;

        if self.faults().fail_leave {
            return Err(TransportError::Other("loopback leave failed".to_string()));
        }

        self.hub.lock().leave(self.endpoint)
    }

    async fn create_microphone_track(&self) -> Result<Box<dyn LocalTrack>, TransportError> {
        self.checkpoint(Step::CreateMicrophone).await;

        if self.faults().fail_microphone {
            return Err(TransportError::Device("microphone unavailable".to_string()));
        }

        Ok(Box::new(self.open_track(MediaKind::Audio)))
    }

    async fn create_camera_track(&self) -> Result<Box<dyn LocalTrack>, TransportError> {
        self.checkpoint(Step::CreateCamera).await;

        if self.faults().fail_camera {
            return Err(TransportError::Device("camera unavailable".to_string()));
        }

        Ok(Box::new(self.open_track(MediaKind::Video)))
    }

    async fn publish(&self, tracks: &[&dyn LocalTrack]) -> Result<(), TransportError> {
        let tracks: Vec<(String, MediaKind)> = tracks
            .iter()
            .map(|track| (track.id().to_string(), track.kind()))
            .collect();

        self.checkpoint(Step::Publish).await;

        if self.faults().fail_publish {
            return Err(TransportError::Other("loopback publish rejected".to_string()));
        }

        self.hub.lock().publish(self.endpoint, &tracks)
    }

    async fn subscribe(
        &self,
        uid: Uid,
        kind: MediaKind,
    ) -> Result<Arc<dyn RemoteTrack>, TransportError> {
        let track = self.hub.lock().subscribe(self.endpoint, uid, kind)?;
        Ok(Arc::new(track))
    }

    fn set_event_sink(&self, sink: Option<EventSink>) {
        let mut inner = self.hub.lock();
        match sink {
            Some(sink) => {
                inner.sinks.insert(self.endpoint, sink);
            }
            None => {
                inner.sinks.remove(&self.endpoint);
            }
        }
    }
}

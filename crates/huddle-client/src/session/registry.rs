//! Reconciled view of remote channel members
//!
//! The registry is keyed by identity and only changes through the three
//! transport notifications. Removal is absorbing: once a member has left,
//! a later publish for the same identity starts a new participant with a
//! new epoch instead of reviving the old entry.

use huddle_protocol::{MediaKind, Uid};
use std::collections::HashMap;
use std::sync::Arc;

use crate::transport::RemoteTrack;

#[derive(Debug, Clone)]
pub struct Participant {
    pub uid: Uid,
    pub audio: Option<Arc<dyn RemoteTrack>>,
    pub video: Option<Arc<dyn RemoteTrack>>,
    /// Registry-wide creation counter; also the insertion order
    pub epoch: u64,
}

impl Participant {
    pub fn track(&self, kind: MediaKind) -> Option<&Arc<dyn RemoteTrack>> {
        match kind {
            MediaKind::Audio => self.audio.as_ref(),
            MediaKind::Video => self.video.as_ref(),
        }
    }

    fn slot_mut(&mut self, kind: MediaKind) -> &mut Option<Arc<dyn RemoteTrack>> {
        match kind {
            MediaKind::Audio => &mut self.audio,
            MediaKind::Video => &mut self.video,
        }
    }

    pub fn summary(&self) -> ParticipantSummary {
        ParticipantSummary {
            uid: self.uid,
            audio_track: self.track(MediaKind::Audio).map(|t| t.id().to_string()),
            video_track: self.track(MediaKind::Video).map(|t| t.id().to_string()),
        }
    }
}

/// Plain-data copy of a participant for observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantSummary {
    pub uid: Uid,
    pub audio_track: Option<String>,
    pub video_track: Option<String>,
}

impl ParticipantSummary {
    pub fn has_audio(&self) -> bool {
        self.audio_track.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.video_track.is_some()
    }
}

/// Registry mutation, already resolved to a concrete remote track
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Published {
        uid: Uid,
        kind: MediaKind,
        track: Arc<dyn RemoteTrack>,
    },
    Unpublished {
        uid: Uid,
        kind: MediaKind,
    },
    Left {
        uid: Uid,
    },
}

#[derive(Debug, Default)]
pub struct ParticipantRegistry {
    participants: HashMap<Uid, Participant>,
    next_epoch: u64,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: RegistryEvent) {
        match event {
            RegistryEvent::Published { uid, kind, track } => self.on_published(uid, kind, track),
            RegistryEvent::Unpublished { uid, kind } => self.on_unpublished(uid, kind),
            RegistryEvent::Left { uid } => self.on_left(uid),
        }
    }

    /// Fill the `kind` slot, creating the participant on first sight
    pub fn on_published(&mut self, uid: Uid, kind: MediaKind, track: Arc<dyn RemoteTrack>) {
        let next_epoch = &mut self.next_epoch;
        let participant = self.participants.entry(uid).or_insert_with(|| {
            *next_epoch += 1;
            tracing::debug!(uid, "Participant appeared");
            Participant {
                uid,
                audio: None,
                video: None,
                epoch: *next_epoch,
            }
        });

        *participant.slot_mut(kind) = Some(track);
    }

    /// Clear the `kind` slot. Unknown identities are ignored.
    pub fn on_unpublished(&mut self, uid: Uid, kind: MediaKind) {
        match self.participants.get_mut(&uid) {
            Some(participant) => *participant.slot_mut(kind) = None,
            None => tracing::debug!(uid, %kind, "Dropping unpublish for unknown participant"),
        }
    }

    /// Remove the participant and drop our references to its tracks
    pub fn on_left(&mut self, uid: Uid) {
        if self.participants.remove(&uid).is_some() {
            tracing::debug!(uid, "Participant left");
        }
    }

    pub fn get(&self, uid: Uid) -> Option<&Participant> {
        self.participants.get(&uid)
    }

    pub fn contains(&self, uid: Uid) -> bool {
        self.participants.contains_key(&uid)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Participants in order of first appearance
    pub fn snapshot(&self) -> Vec<Participant> {
        let mut participants: Vec<Participant> = self.participants.values().cloned().collect();
        participants.sort_by_key(|p| p.epoch);
        participants
    }

    pub fn summaries(&self) -> Vec<ParticipantSummary> {
        self.snapshot().iter().map(Participant::summary).collect()
    }

    pub fn clear(&mut self) {
        self.participants.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug)]
    struct FakeTrack {
        id: String,
        uid: Uid,
        kind: MediaKind,
    }

    impl RemoteTrack for FakeTrack {
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

    fn track(uid: Uid, kind: MediaKind) -> Arc<dyn RemoteTrack> {
        Arc::new(FakeTrack {
            id: format!("{uid}-{kind}"),
            uid,
            kind,
        })
    }

    #[test]
    fn publish_creates_then_updates_in_place() {
        let mut registry = ParticipantRegistry::new();
        registry.on_published(7, MediaKind::Audio, track(7, MediaKind::Audio));

        let first = registry.get(7).unwrap();
        assert!(first.audio.is_some());
        assert!(first.video.is_none());
        let epoch = first.epoch;

        registry.on_published(7, MediaKind::Video, track(7, MediaKind::Video));
        let updated = registry.get(7).unwrap();
        assert!(updated.audio.is_some());
        assert!(updated.video.is_some());
        assert_eq!(updated.epoch, epoch);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn republishing_is_idempotent() {
        let mut registry = ParticipantRegistry::new();
        let video = track(3, MediaKind::Video);

        registry.on_published(3, MediaKind::Video, video.clone());
        let once = registry.summaries();
        registry.on_published(3, MediaKind::Video, video);

        assert_eq!(registry.summaries(), once);
    }

    #[test]
    fn unpublish_keeps_entry_and_other_slot() {
        let mut registry = ParticipantRegistry::new();
        registry.on_published(1, MediaKind::Audio, track(1, MediaKind::Audio));
        registry.on_published(1, MediaKind::Video, track(1, MediaKind::Video));

        registry.on_unpublished(1, MediaKind::Video);
        let participant = registry.get(1).unwrap();
        assert!(participant.audio.is_some());
        assert!(participant.video.is_none());

        registry.on_unpublished(99, MediaKind::Audio);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn publish_unpublish_left_leaves_no_entry() {
        let mut registry = ParticipantRegistry::new();
        registry.on_published(7, MediaKind::Audio, track(7, MediaKind::Audio));
        registry.on_unpublished(7, MediaKind::Audio);
        registry.on_left(7);

        assert!(registry.snapshot().iter().all(|p| p.uid != 7));
        assert!(registry.is_empty());
    }

    #[test]
    fn left_is_absorbing() {
        let mut registry = ParticipantRegistry::new();
        registry.on_published(5, MediaKind::Audio, track(5, MediaKind::Audio));
        registry.on_published(6, MediaKind::Audio, track(6, MediaKind::Audio));
        let old_epoch = registry.get(5).unwrap().epoch;

        registry.on_left(5);
        registry.on_unpublished(5, MediaKind::Audio);
        assert!(!registry.contains(5));

        registry.on_published(5, MediaKind::Video, track(5, MediaKind::Video));
        let rejoined = registry.get(5).unwrap();
        assert!(rejoined.epoch > old_epoch);
        assert!(rejoined.audio.is_none(), "old audio slot must not come back");

        // A rejoin goes to the end of the list
        let order: Vec<Uid> = registry.snapshot().iter().map(|p| p.uid).collect();
        assert_eq!(order, vec![6, 5]);
    }

    #[test]
    fn snapshot_keeps_first_appearance_order() {
        let mut registry = ParticipantRegistry::new();
        for uid in [30, 10, 20] {
            registry.on_published(uid, MediaKind::Audio, track(uid, MediaKind::Audio));
        }
        registry.on_published(10, MediaKind::Video, track(10, MediaKind::Video));

        let order: Vec<Uid> = registry.snapshot().iter().map(|p| p.uid).collect();
        assert_eq!(order, vec![30, 10, 20]);
    }

    #[test]
    fn clear_empties_registry() {
        let mut registry = ParticipantRegistry::new();
        registry.on_published(1, MediaKind::Audio, track(1, MediaKind::Audio));
        registry.on_published(2, MediaKind::Audio, track(2, MediaKind::Audio));
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.snapshot().is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Published(Uid, MediaKind),
        Unpublished(Uid, MediaKind),
        Left(Uid),
    }

    fn kind_strategy() -> impl Strategy<Value = MediaKind> {
        prop_oneof![Just(MediaKind::Audio), Just(MediaKind::Video)]
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        let uid = 1u32..6;
        prop_oneof![
            (uid.clone(), kind_strategy()).prop_map(|(u, k)| Op::Published(u, k)),
            (uid.clone(), kind_strategy()).prop_map(|(u, k)| Op::Unpublished(u, k)),
            uid.prop_map(Op::Left),
        ]
    }

    fn apply(registry: &mut ParticipantRegistry, op: &Op) {
        match *op {
            Op::Published(uid, kind) => registry.on_published(uid, kind, track(uid, kind)),
            Op::Unpublished(uid, kind) => registry.on_unpublished(uid, kind),
            Op::Left(uid) => registry.on_left(uid),
        }
    }

    proptest! {
        #[test]
        fn identities_are_never_duplicated(ops in prop::collection::vec(op_strategy(), 0..64)) {
            let mut registry = ParticipantRegistry::new();
            for op in &ops {
                apply(&mut registry, op);

                let snapshot = registry.snapshot();
                let mut uids: Vec<Uid> = snapshot.iter().map(|p| p.uid).collect();
                uids.sort_unstable();
                uids.dedup();
                prop_assert_eq!(uids.len(), snapshot.len());
            }
        }

        #[test]
        fn replaying_an_event_changes_nothing(
            ops in prop::collection::vec(op_strategy(), 1..32),
            index in any::<prop::sample::Index>(),
        ) {
            let replayed = index.get(&ops).clone();

            let mut registry = ParticipantRegistry::new();
            for op in &ops {
                apply(&mut registry, op);
            }
            apply(&mut registry, &replayed);
            let after_replay = registry.summaries();
            apply(&mut registry, &replayed);

            prop_assert_eq!(registry.summaries(), after_replay);
        }
    }
}

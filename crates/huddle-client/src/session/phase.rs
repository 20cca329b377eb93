use huddle_protocol::Uid;
use std::fmt;

use crate::media::LocalTrackSet;
use crate::session::registry::ParticipantSummary;

/// Lifecycle of a channel session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Joining,
    Active,
    Leaving,
    Left,
}

impl Phase {
    /// Forward-only transitions, plus the cancellation shortcut from
    /// `Joining` straight into teardown. `Left -> Joining` starts a new session.
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;

        matches!(
            (self, next),
            (Idle, Joining)
                | (Left, Joining)
                | (Joining, Active)
                | (Joining, Leaving)
                | (Joining, Left)
                | (Active, Leaving)
                | (Leaving, Left)
        )
    }

    /// No session resources can be held in this phase
    pub fn is_settled(self) -> bool {
        matches!(self, Phase::Idle | Phase::Left)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Joining => "joining",
            Phase::Active => "active",
            Phase::Leaving => "leaving",
            Phase::Left => "left",
        };
        f.write_str(name)
    }
}

/// Everything a presentation layer needs, published on every change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub phase: Phase,
    pub channel: Option<String>,
    pub uid: Option<Uid>,
    pub display_name: Option<String>,
    pub local: LocalTrackSet,
    pub participants: Vec<ParticipantSummary>,
}

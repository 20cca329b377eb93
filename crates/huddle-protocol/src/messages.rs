use serde::{Deserialize, Serialize};

use crate::types::{MediaKind, Uid};

/// Notifications delivered by the media transport about remote channel members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransportEvent {
    /// A remote member made a track available
    #[serde(rename = "user-published")]
    Published { uid: Uid, kind: MediaKind },

    /// A remote member withdrew a track
    #[serde(rename = "user-unpublished")]
    Unpublished { uid: Uid, kind: MediaKind },

    /// A remote member left the channel
    #[serde(rename = "user-left")]
    Left { uid: Uid },
}

impl TransportEvent {
    pub fn uid(&self) -> Uid {
        match self {
            TransportEvent::Published { uid, .. }
            | TransportEvent::Unpublished { uid, .. }
            | TransportEvent::Left { uid } => *uid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_use_transport_names() {
        let json = serde_json::to_value(TransportEvent::Published {
            uid: 7,
            kind: MediaKind::Audio,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "type": "user-published", "uid": 7, "kind": "audio" })
        );

        let left: TransportEvent =
            serde_json::from_str(r#"{"type":"user-left","uid":7}"#).unwrap();
        assert_eq!(left, TransportEvent::Left { uid: 7 });
        assert_eq!(left.uid(), 7);
    }
}

//! Shared protocol definitions for Huddle
//!
//! Types exchanged with the credential service and the events a media
//! transport reports about remote channel members.

pub mod messages;
pub mod types;

pub use messages::TransportEvent;
pub use types::*;

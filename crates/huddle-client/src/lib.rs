//! Huddle client library
//!
//! This crate provides the client side of a Huddle channel: credential
//! acquisition, local media ownership, remote participant tracking and the
//! session coordinator that ties them together over a [`MediaTransport`].

pub mod error;
pub mod media;
pub mod network;
pub mod session;
pub mod settings;
pub mod transport;

pub use error::{CleanupFailure, CleanupStep, MediaError, SessionError, TeardownReport};
pub use network::{CredentialClient, CredentialError, CredentialProvider};
pub use session::{Phase, SessionConfig, SessionCoordinator, SessionStatus};
pub use transport::MediaTransport;

mod coordinator;
mod phase;
mod registry;

pub use coordinator::{SessionConfig, SessionCoordinator};
pub use phase::{Phase, SessionStatus};
pub use registry::{Participant, ParticipantRegistry, ParticipantSummary, RegistryEvent};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Session state stays usable even if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

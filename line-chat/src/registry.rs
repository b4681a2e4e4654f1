//! The set of active sessions.
//!
//! Membership and the `Active`/`Closed` state flips happen under the same
//! lock, so a session is registered exactly while it is `Active`. The lock
//! is never held across I/O: callers take a [`Registry::snapshot`] and
//! deliver outside it.

use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::session::{SessionHandle, SessionId};

#[derive(Default)]
pub struct Registry {
    sessions: Mutex<BTreeMap<SessionId, SessionHandle>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<SessionId, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Activates a handshaking session and inserts it. Returns `false` if the
    /// session was already active or closed.
    pub fn add(&self, session: SessionHandle) -> bool {
        let mut sessions = self.lock();
        if !session.activate() {
            return false;
        }
        sessions.insert(session.id(), session);
        true
    }

    /// Removes a session and marks it `Closed`. Only the first call for a
    /// given id returns it; later calls are no-ops. Signalling the
    /// connection to close is left to the caller.
    pub fn remove(&self, id: SessionId) -> Option<SessionHandle> {
        let mut sessions = self.lock();
        let session = sessions.remove(&id)?;
        session.deactivate();
        Some(session)
    }

    /// Removes every session at once, e.g. on server shutdown.
    pub fn drain(&self) -> Vec<SessionHandle> {
        let mut sessions = self.lock();
        let drained = std::mem::take(&mut *sessions);
        drained
            .into_values()
            .inspect(|session| {
                session.deactivate();
            })
            .collect()
    }

    /// Active sessions in join order at the moment of the call.
    pub fn snapshot(&self) -> Vec<SessionHandle> {
        self.lock().values().cloned().collect()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

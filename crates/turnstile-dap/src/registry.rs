//! Live sessions, indexed by thread code and by turn id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use turnstile_core::{Identifier, RegistryError};

use crate::session::{Session, TurnInfo};

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Identifier<Session>,
    by_turn: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn turns(&self) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.by_turn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create and index the session for a starting turn.
    ///
    /// A session displaced by a reused turn id keeps its code until it is
    /// closed, so it can still be resumed and released.
    pub fn open(&self, turn: &TurnInfo) -> Result<Arc<Session>, RegistryError> {
        let (code, session) = self
            .sessions
            .add_with(|code| Arc::new(Session::new(code, turn)))?;
        let previous = self
            .turns()
            .insert(session.turn_id().to_string(), session.clone());
        if let Some(previous) = previous {
            tracing::warn!(
                turn = session.turn_id(),
                previous = previous.code(),
                "turn id reused while a session was still open"
            );
        }
        tracing::debug!(turn = session.turn_id(), code, "session opened");
        Ok(session)
    }

    /// The session for a turn, if the turn is being tracked.
    pub fn by_turn(&self, turn_id: &str) -> Option<Arc<Session>> {
        self.turns().get(turn_id).cloned()
    }

    pub fn by_code(&self, code: u32) -> Result<Arc<Session>, RegistryError> {
        self.sessions.lookup(code)
    }

    pub fn try_by_code(&self, code: u32) -> Option<Arc<Session>> {
        self.sessions.try_lookup(code)
    }

    /// Forget a session. Its codes and handles stop resolving.
    pub fn close(&self, session: &Arc<Session>) {
        {
            let mut turns = self.turns();
            if turns
                .get(session.turn_id())
                .is_some_and(|current| Arc::ptr_eq(current, session))
            {
                turns.remove(session.turn_id());
            }
        }
        if self.sessions.remove(session).is_some() {
            tracing::debug!(turn = session.turn_id(), code = session.code(), "session closed");
        }
    }

    /// Every live session, ordered by code.
    pub fn all(&self) -> Vec<Arc<Session>> {
        self.sessions
            .entries()
            .into_iter()
            .map(|(_, session)| session)
            .collect()
    }
}

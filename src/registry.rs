//! The process-wide map of sessions, one per guild, created on first use.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use crate::{chat::GuildId, session::Session};

#[derive(Default)]
pub struct Sessions {
    sessions: Mutex<HashMap<GuildId, Arc<Session>>>,
}

impl Sessions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<GuildId, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The session of `guild`, created when it does not exist yet.
    pub fn get_or_create(&self, guild: GuildId) -> Arc<Session> {
        Arc::clone(
            self.sessions()
                .entry(guild)
                .or_insert_with(|| Arc::new(Session::new(guild))),
        )
    }

    #[must_use]
    pub fn get(&self, guild: GuildId) -> Option<Arc<Session>> {
        self.sessions().get(&guild).cloned()
    }

    #[must_use]
    pub fn all(&self) -> Vec<Arc<Session>> {
        self.sessions().values().cloned().collect()
    }

    /// Drops sessions holding neither a queue nor a voice connection.
    /// Returns how many were dropped.
    pub fn collect_garbage(&self) -> usize {
        let mut sessions = self.sessions();
        let before = sessions.len();
        sessions.retain(|_, session| {
            !session.is_dormant() || session.is_started() || Arc::strong_count(session) > 1
        });
        before - sessions.len()
    }
}

//! Registry of live player sessions, keyed by client ID

use std::collections::BTreeMap;
use std::time::Duration;

use futures::future::join_all;
use tracing::info;
use uuid::Uuid;

use super::player::PlayerSession;

/// Live sessions in ascending client-ID order.
///
/// Only the game engine task touches this, so nothing here locks.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: BTreeMap<Uuid, PlayerSession>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert by client ID, replacing (and returning) any previous session
    pub fn add(&mut self, session: PlayerSession) -> Option<PlayerSession> {
        self.sessions.insert(session.id(), session)
    }

    pub fn remove(&mut self, id: &Uuid) -> Option<PlayerSession> {
        self.sessions.remove(id)
    }

    pub fn find(&self, id: &Uuid) -> Option<&PlayerSession> {
        self.sessions.get(id)
    }

    pub fn find_mut(&mut self, id: &Uuid) -> Option<&mut PlayerSession> {
        self.sessions.get_mut(id)
    }

    /// Sessions whose connection is still open. Closed entries stay until removed.
    pub fn active(&self) -> impl Iterator<Item = &PlayerSession> + '_ {
        self.sessions.values().filter(|s| !s.conn.is_closed())
    }

    pub fn active_ids(&self) -> Vec<Uuid> {
        self.active().map(|s| s.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// IDs of sessions whose writer has gone away
    pub fn closed_ids(&self) -> Vec<Uuid> {
        self.sessions
            .values()
            .filter(|s| s.conn.is_closed())
            .map(|s| s.id())
            .collect()
    }

    /// Close every connection, waiting up to `wait` for each writer to acknowledge
    pub async fn shutdown(&mut self, wait: Duration) {
        if self.is_empty() {
            return;
        }

        let sessions = std::mem::take(&mut self.sessions);
        let results = join_all(sessions.values().map(|s| s.conn.close(wait))).await;
        let timed_out = results.iter().filter(|acked| !**acked).count();

        info!(closed = sessions.len(), timed_out, "Connection registry shut down");
    }
}

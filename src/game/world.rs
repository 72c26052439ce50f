//! Authoritative world state and the per-tick simulation step

use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::ws::connection::{Connection, SendError};
use crate::ws::protocol::Direction;

use super::player::{Color, PlayerSession, PlayerState};
use super::registry::ConnectionRegistry;
use super::snapshot::SnapshotBuilder;

/// Process-wide tag suppression window.
///
/// One timestamp for the whole world: after any tag, nobody can tag
/// anybody until the window has passed.
#[derive(Debug, Clone)]
pub struct TagCooldown {
    last_tag: Option<Instant>,
    window: Duration,
}

impl TagCooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            last_tag: None,
            window,
        }
    }

    pub fn is_active(&self) -> bool {
        self.last_tag.is_some()
    }

    pub fn arm(&mut self, now: Instant) {
        self.last_tag = Some(now);
    }

    /// Clear once the window has fully elapsed
    pub fn expire(&mut self, now: Instant) {
        if let Some(at) = self.last_tag {
            if now.saturating_duration_since(at) >= self.window {
                self.last_tag = None;
            }
        }
    }
}

/// A catcher swap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagEvent {
    /// Was the catcher before the tick
    pub tagger: Uuid,
    /// Is the catcher now
    pub tagged: Uuid,
}

/// What a non-idle tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub players: usize,
    pub tag: Option<TagEvent>,
    pub delivered: usize,
    /// Sessions removed because their channel was closed
    pub dropped: Vec<Uuid>,
}

/// All simulation state. Owned by exactly one task.
pub struct GameWorld {
    config: GameConfig,
    registry: ConnectionRegistry,
    cooldown: TagCooldown,
    snapshot_builder: SnapshotBuilder,
    rng: ChaCha8Rng,
    tick: u64,
}

impl GameWorld {
    pub fn new(config: GameConfig) -> Self {
        let rng = match config.color_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        Self {
            cooldown: TagCooldown::new(config.tag_cooldown),
            config,
            registry: ConnectionRegistry::new(),
            snapshot_builder: SnapshotBuilder::new(),
            rng,
            tick: 0,
        }
    }

    /// Registered sessions, including closed ones not yet removed
    pub fn player_count(&self) -> usize {
        self.registry.len()
    }

    /// Sessions whose connection is still open
    pub fn active_count(&self) -> usize {
        self.registry.active().count()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Register a player for this connection, replacing any session with the
    /// same client ID. The player is catcher iff nobody else active is.
    pub fn connect(&mut self, conn: Connection) -> PlayerState {
        let client_id = conn.client_id;
        let socket_id = conn.socket_id;

        let catcher = !self
            .registry
            .active()
            .any(|p| p.id() != client_id && p.state.catcher);
        let color = Color::random(&mut self.rng);
        let session = PlayerSession::new(
            conn,
            self.config.spawn,
            color,
            catcher,
            self.config.player_speed,
        );

        let state = session.state.clone();

        if self.registry.add(session).is_some() {
            info!(client_id = %client_id, socket_id = %socket_id, "Player re-registered");
        } else {
            info!(
                client_id = %client_id,
                socket_id = %socket_id,
                catcher,
                player_count = self.registry.len(),
                "Player connected"
            );
        }

        state
    }

    /// Apply a key event. Returns false for unknown clients.
    pub fn handle_input(&mut self, client_id: Uuid, key: Direction, pressed: bool) -> bool {
        match self.registry.find_mut(&client_id) {
            Some(session) => {
                session.update(key, pressed);
                true
            }
            None => {
                debug!(client_id = %client_id, "Input for unknown client dropped");
                false
            }
        }
    }

    /// Close notification from a socket. Ignored if the client has since
    /// re-registered from another socket.
    pub fn disconnect(&mut self, client_id: Uuid, socket_id: Uuid) -> bool {
        let owned = self
            .registry
            .find(&client_id)
            .is_some_and(|s| s.conn.socket_id == socket_id);

        if !owned {
            debug!(client_id = %client_id, socket_id = %socket_id, "Stale disconnect ignored");
            return false;
        }

        self.remove_player(&client_id);
        info!(
            client_id = %client_id,
            player_count = self.registry.len(),
            "Player disconnected"
        );
        true
    }

    /// Remove a session; if it held the catcher role and nobody else does,
    /// hand the role to the first remaining active player.
    fn remove_player(&mut self, client_id: &Uuid) {
        let Some(removed) = self.registry.remove(client_id) else {
            return;
        };

        if !removed.state.catcher || self.registry.active().any(|p| p.state.catcher) {
            return;
        }

        let heir = self.registry.active().next().map(|p| p.id());
        if let Some(heir) = heir {
            if let Some(session) = self.registry.find_mut(&heir) {
                session.state.catcher = true;
                info!(client_id = %heir, "Catcher role handed off");
            }
        }
    }

    /// Run one simulation step. Returns `None` when idle (no active players).
    pub fn tick(&mut self, now: Instant) -> Option<TickReport> {
        self.cooldown.expire(now);

        // Writers that died since the last tick
        let dropped = self.registry.closed_ids();
        for id in &dropped {
            self.remove_player(id);
            info!(client_id = %id, "Removed player with closed connection");
        }

        let ids = self.registry.active_ids();
        if ids.is_empty() {
            return None;
        }

        self.tick += 1;

        for id in &ids {
            if let Some(session) = self.registry.find_mut(id) {
                session.update_status(&self.config.bounds);
            }
        }

        let tag = self.resolve_tag(&ids, now);

        let mut report = TickReport {
            tick: self.tick,
            players: ids.len(),
            tag,
            delivered: 0,
            dropped,
        };

        let states = ids
            .iter()
            .filter_map(|id| self.registry.find(id))
            .map(|s| &s.state);
        let frame = match self.snapshot_builder.build(states) {
            Ok(frame) => frame,
            Err(e) => {
                error!(tick = self.tick, error = %e, "Failed to encode snapshot");
                return Some(report);
            }
        };

        let mut closed_mid_tick = Vec::new();
        for id in &ids {
            let Some(session) = self.registry.find(id) else {
                continue;
            };
            match session.conn.send(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(SendError::Lagging) => {
                    warn!(client_id = %id, tick = self.tick, "Client lagging, snapshot dropped");
                }
                Err(SendError::Closed) => closed_mid_tick.push(*id),
            }
        }

        for id in closed_mid_tick {
            self.remove_player(&id);
            info!(client_id = %id, "Removed player with closed connection");
            report.dropped.push(id);
        }

        Some(report)
    }

    /// Swap the catcher role for the first qualifying pair in registry order.
    /// At most one swap per tick since the swap arms the cooldown.
    fn resolve_tag(&mut self, ids: &[Uuid], now: Instant) -> Option<TagEvent> {
        if self.cooldown.is_active() {
            return None;
        }

        let players: Vec<_> = ids
            .iter()
            .filter_map(|id| self.registry.find(id))
            .map(|s| (s.id(), s.state.position, s.state.catcher))
            .collect();

        let (a, b) = players.iter().find_map(|(a_id, a_pos, a_catcher)| {
            players
                .iter()
                .find(|(b_id, b_pos, b_catcher)| {
                    b_id != a_id
                        && a_catcher != b_catcher
                        && a_pos.distance(b_pos) < self.config.tag_distance
                })
                .map(|(b_id, _, _)| (*a_id, *b_id))
        })?;

        self.cooldown.arm(now);

        let mut event = TagEvent {
            tagger: a,
            tagged: b,
        };
        for id in [a, b] {
            if let Some(session) = self.registry.find_mut(&id) {
                session.state.catcher = !session.state.catcher;
                if !session.state.catcher {
                    event.tagger = id;
                } else {
                    event.tagged = id;
                }
            }
        }

        info!(
            tick = self.tick,
            tagger = %event.tagger,
            tagged = %event.tagged,
            "Tag"
        );

        Some(event)
    }

    /// Close every connection and wait for the writers
    pub async fn shutdown(&mut self) {
        let stats = self.snapshot_builder.stats();
        info!(
            ticks = self.tick,
            snapshots = stats.total_snapshots,
            bytes = stats.total_bytes,
            avg_players = stats.avg_players_per_snapshot,
            "Shutting down world"
        );
        self.registry.shutdown(self.config.close_timeout).await;
    }
}

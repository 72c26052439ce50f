//! Player session: connection, public state and held keys in one entity

use std::fmt;

use rand::Rng;
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::ws::connection::Connection;
use crate::ws::protocol::{Direction, PlayerSnapshot};

use super::geometry::{Point, WorldBounds};

/// Opaque avatar color, sent as `rgba(r,g,b,1)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::new(rng.gen(), rng.gen(), rng.gen())
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rgba({},{},{},1)", self.r, self.g, self.b)
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Keys currently held by the client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputState {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl InputState {
    pub fn set(&mut self, key: Direction, pressed: bool) {
        match key {
            Direction::Up => self.up = pressed,
            Direction::Down => self.down = pressed,
            Direction::Left => self.left = pressed,
            Direction::Right => self.right = pressed,
        }
    }

    pub fn is_pressed(&self, key: Direction) -> bool {
        match key {
            Direction::Up => self.up,
            Direction::Down => self.down,
            Direction::Left => self.left,
            Direction::Right => self.right,
        }
    }
}

/// Public, broadcast part of a player
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub id: Uuid,
    pub position: Point,
    pub color: Color,
    pub catcher: bool,
    pub speed: i32,
}

impl From<&PlayerState> for PlayerSnapshot {
    fn from(p: &PlayerState) -> Self {
        Self {
            id: p.id,
            position: p.position,
            color: p.color,
            catcher: p.catcher,
            speed: p.speed,
        }
    }
}

/// A registered client: its outbound connection plus simulation state
#[derive(Debug, Clone)]
pub struct PlayerSession {
    pub conn: Connection,
    pub state: PlayerState,
    pub input: InputState,
}

impl PlayerSession {
    pub fn new(conn: Connection, spawn: Point, color: Color, catcher: bool, speed: i32) -> Self {
        let state = PlayerState {
            id: conn.client_id,
            position: spawn,
            color,
            catcher,
            speed,
        };

        Self {
            conn,
            state,
            input: InputState::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.state.id
    }

    /// Apply a key event. Only the matching flag changes.
    pub fn update(&mut self, key: Direction, pressed: bool) {
        self.input.set(key, pressed);
    }

    /// Advance one tick of movement from the held keys.
    ///
    /// Each held key moves `speed` along its axis and is clamped on its own,
    /// so opposing keys both apply. Calling this twice moves twice.
    pub fn update_status(&mut self, bounds: &WorldBounds) {
        let speed = self.state.speed;
        let pos = &mut self.state.position;

        if self.input.up {
            pos.y = bounds.clamp_y(pos.y - speed);
        }
        if self.input.down {
            pos.y = bounds.clamp_y(pos.y + speed);
        }
        if self.input.left {
            pos.x = bounds.clamp_x(pos.x - speed);
        }
        if self.input.right {
            pos.x = bounds.clamp_x(pos.x + speed);
        }
    }
}

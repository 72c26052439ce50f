//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::geometry::Point;
use crate::game::player::Color;

/// Arrow keys a client can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

/// Decoded inbound message, addressed by the client-generated ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub client: Uuid,
    pub msg: ClientMsg,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMsg {
    /// Register (or re-register) the player for this client ID
    Connect,
    /// Key state change
    Input { key: Direction, pressed: bool },
}

#[derive(Deserialize)]
struct RawEnvelope {
    client: Uuid,
    data: RawPayload,
}

/// Both payload shapes are tried in order; extra fields are ignored
#[derive(Deserialize)]
#[serde(untagged)]
enum RawPayload {
    Connect {
        connect: bool,
    },
    Input {
        key: Direction,
        #[serde(rename = "isPressed")]
        is_pressed: bool,
    },
}

/// Inbound decode errors. The caller drops the frame; nothing is reported back.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Connect payload without connect=true")]
    ConnectNotRequested,
}

/// Decode a text or binary frame into an envelope
pub fn decode(raw: &[u8]) -> Result<Envelope, DecodeError> {
    let envelope: RawEnvelope = serde_json::from_slice(raw)?;

    let msg = match envelope.data {
        RawPayload::Connect { connect: true } => ClientMsg::Connect,
        RawPayload::Connect { connect: false } => return Err(DecodeError::ConnectNotRequested),
        RawPayload::Input { key, is_pressed } => ClientMsg::Input {
            key,
            pressed: is_pressed,
        },
    };

    Ok(Envelope {
        client: envelope.client,
        msg,
    })
}

/// Public player state in a snapshot. Key state is never sent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerSnapshot {
    pub id: Uuid,
    pub position: Point,
    pub color: Color,
    pub catcher: bool,
    pub speed: i32,
}

/// Encode one tick's snapshot. Every recipient gets the same payload.
pub fn encode_snapshot(players: &[PlayerSnapshot]) -> Result<String, serde_json::Error> {
    serde_json::to_string(players)
}

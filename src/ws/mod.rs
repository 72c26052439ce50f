//! WebSocket transport: upgrade handling, outbound connections, wire protocol

pub mod connection;
pub mod handler;
pub mod protocol;

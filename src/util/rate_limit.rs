//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::game::player::InputState;
use crate::ws::protocol::ClientMsg;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Max key presses per second per socket
pub const INPUT_RATE_LIMIT: u32 = 120;

/// Per-socket inbound filter.
///
/// Only key presses spend quota. Releases of a forwarded press and Connects
/// always pass, so the engine never ends up with a key stuck down. Messages
/// that would not change the forwarded key state are dropped for free.
#[derive(Clone)]
pub struct PlayerRateLimiter {
    input_limiter: Arc<Limiter>,
    forwarded: InputState,
}

impl PlayerRateLimiter {
    pub fn new() -> Self {
        Self::with_rate(INPUT_RATE_LIMIT)
    }

    pub fn with_rate(presses_per_second: u32) -> Self {
        Self {
            input_limiter: create_limiter(presses_per_second),
            forwarded: InputState::default(),
        }
    }

    /// Check if an inbound message should reach the engine (returns true if allowed)
    pub fn check_message(&mut self, msg: &ClientMsg) -> bool {
        match *msg {
            ClientMsg::Connect => {
                // The engine starts the player with no keys held
                self.forwarded = InputState::default();
                true
            }
            ClientMsg::Input { key, pressed } => {
                if self.forwarded.is_pressed(key) == pressed {
                    return false;
                }
                if pressed && self.input_limiter.check().is_err() {
                    return false;
                }
                self.forwarded.set(key, pressed);
                true
            }
        }
    }
}

impl Default for PlayerRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

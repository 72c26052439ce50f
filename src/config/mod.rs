//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::game::geometry::{Point, WorldBounds};

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS (comma-separated); permissive when unset
    pub client_origin: Option<String>,
    /// Simulation parameters
    pub game: GameConfig,
}

/// Simulation tuning
#[derive(Clone, Debug)]
pub struct GameConfig {
    /// Fixed tick period
    pub tick_interval: Duration,
    /// Global suppression window after any tag
    pub tag_cooldown: Duration,
    /// Players closer than this (exclusive) can tag
    pub tag_distance: f64,
    /// Movement per tick per held key
    pub player_speed: i32,
    /// Inclusive play field bounds
    pub bounds: WorldBounds,
    /// Where new players appear
    pub spawn: Point,
    /// Seed for avatar colors; random when unset
    pub color_seed: Option<u64>,
    /// Snapshots buffered per socket before frames are dropped
    pub outbound_buffer: usize,
    /// Pending commands buffered for the engine task
    pub command_buffer: usize,
    /// How long shutdown waits for each socket writer to acknowledge a close
    pub close_timeout: Duration,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(20),
            tag_cooldown: Duration::from_secs(2),
            tag_distance: 18.0,
            player_speed: 4,
            bounds: WorldBounds::default(),
            spawn: Point::ORIGIN,
            color_seed: None,
            outbound_buffer: 32,
            command_buffer: 1024,
            close_timeout: Duration::from_secs(1),
        }
    }
}

impl GameConfig {
    /// Reject values the simulation cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval.is_zero() {
            return Err(ConfigError::Invalid("TICK_INTERVAL_MS"));
        }
        if !self.tag_distance.is_finite() || self.tag_distance <= 0.0 {
            return Err(ConfigError::Invalid("TAG_DISTANCE"));
        }
        if self.player_speed <= 0 {
            return Err(ConfigError::Invalid("PLAYER_SPEED"));
        }
        if self.bounds.width < 0 {
            return Err(ConfigError::Invalid("WORLD_WIDTH"));
        }
        if self.bounds.height < 0 {
            return Err(ConfigError::Invalid("WORLD_HEIGHT"));
        }
        if !self.bounds.contains(&self.spawn) {
            return Err(ConfigError::Invalid("SPAWN_X/SPAWN_Y"));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // PORT wins over SERVER_ADDR for hosted deployments
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let defaults = GameConfig::default();
        let game = GameConfig {
            tick_interval: Duration::from_millis(parse_var(
                "TICK_INTERVAL_MS",
                defaults.tick_interval.as_millis() as u64,
            )?),
            tag_cooldown: Duration::from_millis(parse_var(
                "TAG_COOLDOWN_MS",
                defaults.tag_cooldown.as_millis() as u64,
            )?),
            tag_distance: parse_var("TAG_DISTANCE", defaults.tag_distance)?,
            player_speed: parse_var("PLAYER_SPEED", defaults.player_speed)?,
            bounds: WorldBounds::new(
                parse_var("WORLD_WIDTH", defaults.bounds.width)?,
                parse_var("WORLD_HEIGHT", defaults.bounds.height)?,
            ),
            spawn: Point::new(
                parse_var("SPAWN_X", defaults.spawn.x)?,
                parse_var("SPAWN_Y", defaults.spawn.y)?,
            ),
            color_seed: parse_optional_var("COLOR_SEED")?,
            close_timeout: Duration::from_millis(parse_var(
                "CLOSE_TIMEOUT_MS",
                defaults.close_timeout.as_millis() as u64,
            )?),
            ..defaults
        };
        game.validate()?;

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            client_origin: env::var("CLIENT_ORIGIN").ok(),
            game,
        })
    }
}

/// Read `name`, falling back to `default` when unset
fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    Ok(parse_optional_var(name)?.unwrap_or(default))
}

fn parse_optional_var<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(None),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_game_defaults() {
        let game = GameConfig::default();
        assert_eq!(game.tick_interval, Duration::from_millis(20));
        assert_eq!(game.tag_cooldown, Duration::from_secs(2));
        assert_eq!(game.tag_distance, 18.0);
        assert_eq!(game.player_speed, 4);
        assert_eq!(game.bounds, WorldBounds::new(640, 480));
    }

    #[test]
    fn test_parse_var_unset_uses_default() {
        let value: i32 = parse_var("TAG_TEST_UNSET_VAR", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_parse_var_reads_env() {
        env::set_var("TAG_TEST_SPEED_VAR", " 6 ");
        let value: i32 = parse_var("TAG_TEST_SPEED_VAR", 4).unwrap();
        assert_eq!(value, 6);
    }

    #[test]
    fn test_parse_var_rejects_garbage() {
        env::set_var("TAG_TEST_BAD_VAR", "fast");
        let result: Result<i32, _> = parse_var("TAG_TEST_BAD_VAR", 4);
        assert!(matches!(result, Err(ConfigError::Invalid("TAG_TEST_BAD_VAR"))));
    }

    fn rejected(game: GameConfig) -> &'static str {
        match game.validate() {
            Err(ConfigError::Invalid(var)) => var,
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        tokio_test::assert_ok!(GameConfig::default().validate());
    }

    #[test]
    fn test_rejects_zero_tick() {
        let game = GameConfig {
            tick_interval: Duration::ZERO,
            ..GameConfig::default()
        };
        assert_eq!(rejected(game), "TICK_INTERVAL_MS");
    }

    #[test]
    fn test_rejects_negative_world_size() {
        let game = GameConfig {
            bounds: WorldBounds::new(-1, 480),
            ..GameConfig::default()
        };
        assert_eq!(rejected(game), "WORLD_WIDTH");

        let game = GameConfig {
            bounds: WorldBounds::new(640, -5),
            ..GameConfig::default()
        };
        assert_eq!(rejected(game), "WORLD_HEIGHT");
    }

    #[test]
    fn test_rejects_non_positive_speed() {
        for speed in [0, -4] {
            let game = GameConfig {
                player_speed: speed,
                ..GameConfig::default()
            };
            assert_eq!(rejected(game), "PLAYER_SPEED");
        }
    }

    #[test]
    fn test_rejects_bad_tag_distance() {
        for distance in [f64::NAN, f64::INFINITY, -18.0, 0.0] {
            let game = GameConfig {
                tag_distance: distance,
                ..GameConfig::default()
            };
            assert_eq!(rejected(game), "TAG_DISTANCE");
        }
    }

    #[test]
    fn test_rejects_spawn_outside_field() {
        let game = GameConfig {
            spawn: Point::new(641, 0),
            ..GameConfig::default()
        };
        assert_eq!(rejected(game), "SPAWN_X/SPAWN_Y");
    }

    #[test]
    fn test_zero_sized_field_is_valid() {
        let game = GameConfig {
            bounds: WorldBounds::new(0, 0),
            ..GameConfig::default()
        };
        tokio_test::assert_ok!(game.validate());
    }
}

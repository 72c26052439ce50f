//! Game simulation modules

pub mod engine;
pub mod geometry;
pub mod player;
pub mod registry;
pub mod snapshot;
pub mod world;

pub use engine::{EngineHandle, GameEngine};

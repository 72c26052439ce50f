//! Fixed-tick game engine task
//!
//! One task owns the [`GameWorld`]. Socket handlers talk to it through an
//! [`EngineHandle`]; commands and ticks are processed one at a time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::util::time::Timer;
use crate::ws::connection::Connection;
use crate::ws::protocol::Direction;

use super::world::GameWorld;

/// Mutations requested by socket handlers
#[derive(Debug)]
pub enum GameCommand {
    Connect {
        conn: Connection,
    },
    Input {
        client_id: Uuid,
        key: Direction,
        pressed: bool,
    },
    Disconnect {
        client_id: Uuid,
        socket_id: Uuid,
    },
}

/// Simulation phase, derived each tick from the active player set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationPhase {
    /// No active players, ticks are no-ops
    Idle,
    /// At least one active player
    Running,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Game engine has stopped")]
    Stopped,
}

/// Cloneable handle to the running engine
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: mpsc::Sender<GameCommand>,
    player_count: Arc<AtomicUsize>,
}

impl EngineHandle {
    pub async fn connect(&self, conn: Connection) -> Result<(), EngineError> {
        self.send(GameCommand::Connect { conn }).await
    }

    pub async fn input(
        &self,
        client_id: Uuid,
        key: Direction,
        pressed: bool,
    ) -> Result<(), EngineError> {
        self.send(GameCommand::Input {
            client_id,
            key,
            pressed,
        })
        .await
    }

    pub async fn disconnect(&self, client_id: Uuid, socket_id: Uuid) -> Result<(), EngineError> {
        self.send(GameCommand::Disconnect {
            client_id,
            socket_id,
        })
        .await
    }

    /// Active players as of the last processed command or tick
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    async fn send(&self, cmd: GameCommand) -> Result<(), EngineError> {
        self.command_tx
            .send(cmd)
            .await
            .map_err(|_| EngineError::Stopped)
    }
}

/// The authoritative game loop
pub struct GameEngine {
    world: GameWorld,
    command_rx: mpsc::Receiver<GameCommand>,
    shutdown_rx: oneshot::Receiver<()>,
    tick_interval: Duration,
    phase: SimulationPhase,
    player_count: Arc<AtomicUsize>,
}

impl GameEngine {
    /// Create the engine. Send on (or drop) the shutdown sender to stop it.
    pub fn new(config: GameConfig, shutdown_rx: oneshot::Receiver<()>) -> (Self, EngineHandle) {
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer.max(1));
        let player_count = Arc::new(AtomicUsize::new(0));

        let handle = EngineHandle {
            command_tx,
            player_count: player_count.clone(),
        };

        let engine = Self {
            tick_interval: config.tick_interval,
            world: GameWorld::new(config),
            command_rx,
            shutdown_rx,
            phase: SimulationPhase::Idle,
            player_count,
        };

        (engine, handle)
    }

    /// Run until shutdown, then close every connection
    pub async fn run(mut self) {
        info!(
            tick_ms = self.tick_interval.as_millis() as u64,
            "Game engine started"
        );

        // First tick fires one full interval after start
        let mut ticker = interval_at(Instant::now() + self.tick_interval, self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = &mut self.shutdown_rx => {
                    info!(
                        players = self.world.player_count(),
                        "Game engine received shutdown"
                    );
                    break;
                }
                Some(cmd) = self.command_rx.recv() => {
                    self.apply(cmd);
                }
                at = ticker.tick() => {
                    self.run_tick(at.into_std());
                }
            }
        }

        self.world.shutdown().await;
        self.player_count.store(0, Ordering::Relaxed);

        info!(ticks = self.world.tick_count(), "Game engine stopped");
    }

    fn apply(&mut self, cmd: GameCommand) {
        match cmd {
            GameCommand::Connect { conn } => {
                self.world.connect(conn);
            }
            GameCommand::Input {
                client_id,
                key,
                pressed,
            } => {
                self.world.handle_input(client_id, key, pressed);
            }
            GameCommand::Disconnect {
                client_id,
                socket_id,
            } => {
                self.world.disconnect(client_id, socket_id);
            }
        }

        self.publish_count();
    }

    fn run_tick(&mut self, now: std::time::Instant) {
        let timer = Timer::new();
        let report = self.world.tick(now);

        let phase = if report.is_some() {
            SimulationPhase::Running
        } else {
            SimulationPhase::Idle
        };
        if phase != self.phase {
            debug!(from = ?self.phase, to = ?phase, "Simulation phase changed");
            self.phase = phase;
        }

        // Sockets can close between commands
        self.publish_count();

        if let Some(report) = report {
            let elapsed = timer.elapsed_micros();
            if elapsed > self.tick_interval.as_micros() as u64 {
                warn!(
                    tick = report.tick,
                    players = report.players,
                    delivered = report.delivered,
                    elapsed_us = elapsed,
                    "Tick overran its interval"
                );
            }
        }
    }

    fn publish_count(&self) {
        self.player_count
            .store(self.world.active_count(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::connection::{self, Outbound};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn fast_config() -> GameConfig {
        GameConfig {
            tick_interval: Duration::from_millis(5),
            color_seed: Some(1),
            close_timeout: Duration::from_millis(50),
            ..GameConfig::default()
        }
    }

    /// Stand-in socket writer: discards snapshots, acknowledges the close
    fn spawn_writer(mut rx: mpsc::Receiver<Outbound>) -> tokio::task::JoinHandle<bool> {
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Outbound::Close(ack) = frame {
                    let _ = ack.send(());
                    return true;
                }
            }
            false
        })
    }

    async fn next_snapshot(rx: &mut mpsc::Receiver<Outbound>) -> Vec<serde_json::Value> {
        match timeout(WAIT, rx.recv()).await {
            Ok(Some(Outbound::Snapshot(frame))) => serde_json::from_str(&frame).unwrap(),
            Ok(Some(Outbound::Close(_))) => panic!("unexpected close"),
            Ok(None) => panic!("channel closed"),
            Err(_) => panic!("no snapshot within {WAIT:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_then_receive_snapshots() {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (engine, handle) = GameEngine::new(fast_config(), shutdown_rx);
        let task = tokio::spawn(engine.run());

        let (tx, mut rx) = connection::channel(64);
        let client_id = Uuid::new_v4();
        tokio_test::assert_ok!(
            handle
                .connect(Connection::new(client_id, Uuid::new_v4(), tx))
                .await
        );

        let snapshot = next_snapshot(&mut rx).await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0]["id"], client_id.to_string());
        assert_eq!(snapshot[0]["catcher"], true);
        assert_eq!(handle.player_count(), 1);

        let writer = spawn_writer(rx);
        let _ = shutdown_tx.send(());
        timeout(WAIT, task).await.unwrap().unwrap();
        assert!(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_input_moves_player() {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (engine, handle) = GameEngine::new(fast_config(), shutdown_rx);
        let task = tokio::spawn(engine.run());

        let (tx, mut rx) = connection::channel(64);
        let client_id = Uuid::new_v4();
        handle
            .connect(Connection::new(client_id, Uuid::new_v4(), tx))
            .await
            .unwrap();
        handle.input(client_id, Direction::Right, true).await.unwrap();

        let mut x = 0;
        for _ in 0..10 {
            x = next_snapshot(&mut rx).await[0]["position"]["x"]
                .as_i64()
                .unwrap();
            if x > 0 {
                break;
            }
        }
        assert!(x > 0);
        assert_eq!(x % 4, 0);

        drop(rx);
        let _ = shutdown_tx.send(());
        timeout(WAIT, task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_updates_count() {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (engine, handle) = GameEngine::new(fast_config(), shutdown_rx);
        let task = tokio::spawn(engine.run());

        let (tx, mut rx) = connection::channel(64);
        let client_id = Uuid::new_v4();
        let socket_id = Uuid::new_v4();
        handle
            .connect(Connection::new(client_id, socket_id, tx))
            .await
            .unwrap();
        next_snapshot(&mut rx).await;

        handle.disconnect(client_id, socket_id).await.unwrap();

        // The engine drops its sender once the session is removed
        let drained = timeout(WAIT, async {
            while let Some(frame) = rx.recv().await {
                drop(frame);
            }
        })
        .await;
        assert!(drained.is_ok());

        let counted = timeout(WAIT, async {
            while handle.player_count() != 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await;
        assert!(counted.is_ok());

        let _ = shutdown_tx.send(());
        timeout(WAIT, task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections() {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (engine, handle) = GameEngine::new(fast_config(), shutdown_rx);
        let task = tokio::spawn(engine.run());

        let (tx, mut rx) = connection::channel(64);
        handle
            .connect(Connection::new(Uuid::new_v4(), Uuid::new_v4(), tx))
            .await
            .unwrap();
        next_snapshot(&mut rx).await;

        let writer = spawn_writer(rx);

        let _ = shutdown_tx.send(());
        timeout(WAIT, task).await.unwrap().unwrap();

        assert!(writer.await.unwrap());
        assert!(matches!(
            handle.input(Uuid::new_v4(), Direction::Up, true).await,
            Err(EngineError::Stopped)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_with_stuck_writer_still_returns() {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (engine, handle) = GameEngine::new(fast_config(), shutdown_rx);
        let task = tokio::spawn(engine.run());

        // Receiver held but never read again, like a writer blocked on a dead peer
        let (tx, mut rx) = connection::channel(2);
        handle
            .connect(Connection::new(Uuid::new_v4(), Uuid::new_v4(), tx))
            .await
            .unwrap();
        next_snapshot(&mut rx).await;

        let _ = shutdown_tx.send(());
        let stopped = timeout(WAIT, task).await;
        assert!(stopped.is_ok());
        drop(rx);
    }

    #[tokio::test]
    async fn test_count_drops_when_writer_dies() {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (engine, handle) = GameEngine::new(fast_config(), shutdown_rx);
        let task = tokio::spawn(engine.run());

        let (tx, mut rx) = connection::channel(64);
        handle
            .connect(Connection::new(Uuid::new_v4(), Uuid::new_v4(), tx))
            .await
            .unwrap();
        next_snapshot(&mut rx).await;
        drop(rx);

        // No disconnect command: the next tick prunes it
        let counted = timeout(WAIT, async {
            while handle.player_count() != 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await;
        assert!(counted.is_ok());

        let _ = shutdown_tx.send(());
        timeout(WAIT, task).await.unwrap().unwrap();
    }
}

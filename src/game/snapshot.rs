//! Snapshot building for network transmission

use std::sync::Arc;

use crate::ws::protocol::{encode_snapshot, PlayerSnapshot};

use super::player::PlayerState;

/// Serializes one snapshot per tick and keeps running size stats
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    stats: SnapshotStats,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode the given players once; the result is shared by every recipient
    pub fn build<'a>(
        &mut self,
        players: impl IntoIterator<Item = &'a PlayerState>,
    ) -> Result<Arc<str>, serde_json::Error> {
        let records: Vec<PlayerSnapshot> = players.into_iter().map(PlayerSnapshot::from).collect();
        let json = encode_snapshot(&records)?;

        self.stats.record(records.len(), json.len());

        Ok(Arc::from(json))
    }

    pub fn stats(&self) -> &SnapshotStats {
        &self.stats
    }
}

/// Snapshot size stats for debugging
#[derive(Debug, Default, Clone)]
pub struct SnapshotStats {
    pub total_snapshots: u64,
    pub total_bytes: u64,
    pub avg_players_per_snapshot: f32,
}

impl SnapshotStats {
    pub fn record(&mut self, player_count: usize, bytes: usize) {
        self.total_snapshots += 1;
        self.total_bytes += bytes as u64;

        // Running average
        let n = self.total_snapshots as f32;
        self.avg_players_per_snapshot =
            self.avg_players_per_snapshot * ((n - 1.0) / n) + (player_count as f32 / n);
    }
}

//! Spectator snapshot building

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::game::world::World;
use crate::net::codec::{self, CodecError, Envelope};
use crate::net::protocol::{Message, ViewState};

/// Builds the `viewData` broadcast for spectators
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    stats: SnapshotStats,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot message of the whole world
    pub fn build(&self, world: &World) -> Message {
        let counters = &world.counters;
        Message::ViewData {
            state: ViewState {
                game_number: counters.game_number,
                game_step: counters.game_step,
                server_steps: counters.server_steps,
                drop_count: counters.drop_count,
                step_max: world.conf.step_max,
                games_to_play: world.conf.games_to_play,
            },
            bots: world
                .robots
                .iter()
                .map(|(src, robot)| (src.to_string(), robot.clone()))
                .collect(),
            shells: world
                .shells
                .iter()
                .map(|(src, shell)| (src.to_string(), *shell))
                .collect(),
            explosions: world
                .explosions
                .iter()
                .map(|(index, explosion)| (index.to_string(), explosion.clone()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    /// Serialize one snapshot to send to every spectator
    pub fn encode(&mut self, world: &World) -> Result<Bytes, CodecError> {
        let bytes = Bytes::from(codec::serialize(&Envelope::new(self.build(world)))?);
        self.stats.record(world.robots.len(), bytes.len());
        Ok(bytes)
    }

    pub fn stats(&self) -> &SnapshotStats {
        &self.stats
    }
}

/// Snapshot size stats for the periodic report
#[derive(Debug, Default, Clone)]
pub struct SnapshotStats {
    pub total_snapshots: u64,
    pub total_bytes: u64,
    pub max_bytes: usize,
    pub avg_robots_per_snapshot: f64,
}

impl SnapshotStats {
    pub fn record(&mut self, robot_count: usize, bytes: usize) {
        self.total_snapshots += 1;
        self.total_bytes += bytes as u64;
        self.max_bytes = self.max_bytes.max(bytes);

        // Running average
        let n = self.total_snapshots as f64;
        self.avg_robots_per_snapshot =
            self.avg_robots_per_snapshot * ((n - 1.0) / n) + (robot_count as f64 / n);
    }

    pub fn avg_bytes(&self) -> u64 {
        if self.total_snapshots == 0 {
            0
        } else {
            self.total_bytes / self.total_snapshots
        }
    }
}

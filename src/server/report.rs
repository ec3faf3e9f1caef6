//! Statistics, scoreboard and results file

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::game::snapshot::SnapshotStats;
use crate::game::world::World;
use crate::net::socket::SocketStats;

/// One robot's line in the results file
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotResult {
    pub name: String,
    pub class: String,
    pub points: i64,
    pub win_count: u32,
    pub win_health: f64,
    pub fired_count: u32,
    pub shell_damage: f64,
}

/// End-of-run results, keyed by robot endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Results {
    pub bots: BTreeMap<String, RobotResult>,
    pub games_played: u32,
    pub server_steps: u64,
    pub finished_at: DateTime<Utc>,
}

impl Results {
    pub fn from_world(world: &World) -> Self {
        let bots = world
            .robots
            .iter()
            .map(|(src, r)| {
                (
                    src.to_string(),
                    RobotResult {
                        name: r.name.clone(),
                        class: r.class_name.clone(),
                        points: r.points,
                        win_count: r.win_count,
                        win_health: r.win_health,
                        fired_count: r.fired_count,
                        shell_damage: r.shell_damage,
                    },
                )
            })
            .collect();

        Self {
            bots,
            games_played: world.counters.game_number,
            server_steps: world.counters.server_steps,
            finished_at: Utc::now(),
        }
    }

    /// Write the results as pretty JSON
    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }
}

/// Ranked table of every robot, best first
pub fn scoreboard(world: &World) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "{:<4} {:<16} {:<8} {:>7} {:>5} {:>10} {:>7} {:>8} {:>9} {:<21}",
        "Rank", "Name", "Class", "Points", "Wins", "AvgWinHlth", "Fired", "AvgDmg", "TotalDmg", "Endpoint"
    );
    for (rank, (src, r)) in world.ranking().into_iter().enumerate() {
        let avg_win_health = if r.win_count == 0 {
            0.0
        } else {
            r.win_health / r.win_count as f64
        };
        let avg_damage = if r.fired_count == 0 {
            0.0
        } else {
            r.shell_damage / r.fired_count as f64
        };
        let _ = writeln!(
            out,
            "{:<4} {:<16} {:<8} {:>7} {:>5} {:>10.2} {:>7} {:>8.2} {:>9.1} {:<21}",
            rank + 1,
            r.name,
            r.class_name,
            r.points,
            r.win_count,
            avg_win_health,
            r.fired_count,
            avg_damage,
            r.shell_damage,
            src
        );
    }
    out
}

/// Log the periodic server statistics
pub fn log_stats(world: &World, socket: &SocketStats, snapshots: &SnapshotStats) {
    let c = &world.counters;
    let steps = c.server_steps.max(1) as f64;
    let per_step_ms = |d: std::time::Duration| d.as_secs_f64() * 1000.0 / steps;

    let tournament_secs = c
        .tournament_started_at
        .map(|t| t.elapsed().as_secs_f64())
        .unwrap_or(0.0);

    info!(
        uptime_secs = c.started_at.elapsed().as_secs(),
        tournament_secs,
        game = c.game_number,
        games_to_play = world.conf.games_to_play,
        server_steps = c.server_steps,
        robots = world.robots.len(),
        viewers = world.spectators.len(),
        dropped = c.drop_count,
        long_steps = c.long_step_count,
        step_ms = per_step_ms(c.step_time),
        msg_ms = per_step_ms(c.msg_time),
        viewer_ms = per_step_ms(c.viewer_time),
        sleep_ms = per_step_ms(c.sleep_time),
        snapshot_avg_bytes = snapshots.avg_bytes(),
        snapshot_max_bytes = snapshots.max_bytes,
        "Server stats"
    );
    info!("Socket stats\n{socket}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::game::world::Robot;
    use std::net::SocketAddr;

    fn world_with_scores() -> World {
        let mut world = World::new(SimConfig::default(), 1);
        let mut a = Robot::new("alpha", None);
        a.points = 12;
        a.win_count = 2;
        a.win_health = 75.0;
        let mut b = Robot::new("bravo", Some("heavy".into()));
        b.points = 30;
        world.robots.insert("127.0.0.1:1".parse::<SocketAddr>().unwrap(), a);
        world.robots.insert("127.0.0.1:2".parse::<SocketAddr>().unwrap(), b);
        world.counters.game_number = 3;
        world
    }

    #[test]
    fn scoreboard_ranks_by_points() {
        let board = scoreboard(&world_with_scores());
        let lines: Vec<&str> = board.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("bravo"));
        assert!(lines[2].contains("alpha"));
        assert!(lines[2].contains("37.50"));
    }

    #[test]
    fn results_use_wire_names() {
        let results = Results::from_world(&world_with_scores());
        let value = serde_json::to_value(&results).unwrap();
        assert_eq!(value["gamesPlayed"], 3);
        assert_eq!(value["bots"]["127.0.0.1:2"]["class"], "heavy");
        assert_eq!(value["bots"]["127.0.0.1:1"]["winCount"], 2);
        assert!(value["finishedAt"].is_string());
    }
}

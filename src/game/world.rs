//! World state (owned exclusively by the tick loop)

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::SimConfig;
use crate::game::classes::DEFAULT_CLASS;
use crate::game::layout::{self, LayoutError, StartPlan};

/// Health every robot starts a game with
pub const FULL_HEALTH: f64 = 100.0;

/// Spectators silent for longer than this are dropped
pub const SPECTATOR_TIMEOUT: Duration = Duration::from_secs(10);

/// Fixed circular area: obstacles and jam zones
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
}

/// Last fire request, kept for spectators
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FireSnapshot {
    pub direction: f64,
    pub distance: f64,
}

/// Last scan request, kept for spectators
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSnapshot {
    pub start_radians: f64,
    pub end_radians: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastActions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fire_canon_request: Option<FireSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_request: Option<ScanSnapshot>,
}

/// A joined robot. Persists for the life of the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Robot {
    pub name: String,
    #[serde(rename = "class")]
    pub class_name: String,
    /// 0 means dead (or waiting for the next game)
    pub health: f64,
    pub x: f64,
    pub y: f64,
    pub current_speed: f64,
    pub requested_speed: f64,
    pub current_direction: f64,
    pub requested_direction: f64,
    pub points: i64,
    pub fired_count: u32,
    /// Explosion damage dealt to any robot, possibly including itself
    pub shell_damage: f64,
    pub win_health: f64,
    pub win_count: u32,
    pub last: LastActions,
}

impl Robot {
    pub fn new(name: impl Into<String>, class_name: Option<String>) -> Self {
        Self {
            name: name.into(),
            class_name: class_name.unwrap_or_else(|| DEFAULT_CLASS.to_string()),
            health: 0.0,
            x: 0.0,
            y: 0.0,
            current_speed: 0.0,
            requested_speed: 0.0,
            current_direction: 0.0,
            requested_direction: 0.0,
            points: 0,
            fired_count: 0,
            shell_damage: 0.0,
            win_health: 0.0,
            win_count: 0,
            last: LastActions::default(),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.health != 0.0
    }

    /// Reduce health by `damage`, never below zero
    pub fn take_damage(&mut self, damage: f64) {
        self.health = (self.health - damage.max(0.0)).max(0.0);
    }

    /// Full health, standing still, facing east
    fn reset_for_game(&mut self) {
        self.health = FULL_HEALTH;
        self.current_speed = 0.0;
        self.requested_speed = 0.0;
        self.current_direction = 0.0;
        self.requested_direction = 0.0;
        self.last = LastActions::default();
    }
}

/// Shell in flight. At most one per robot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shell {
    pub x: f64,
    pub y: f64,
    pub direction: f64,
    pub distance_remaining: f64,
}

/// Cosmetic record of a detonation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Explosion {
    pub x: f64,
    pub y: f64,
    pub steps_ago: u32,
    /// Endpoint of the robot that fired, used by viewers for coloring
    pub src: String,
}

#[derive(Debug, Clone)]
pub struct Spectator {
    pub last_keep_alive: Instant,
}

impl Spectator {
    pub fn new() -> Self {
        Self {
            last_keep_alive: Instant::now(),
        }
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_keep_alive) > SPECTATOR_TIMEOUT
    }
}

impl Default for Spectator {
    fn default() -> Self {
        Self::new()
    }
}

/// Tournament counters and timing statistics
#[derive(Debug, Clone)]
pub struct Counters {
    /// 0 while waiting for the first game
    pub game_number: u32,
    pub game_step: u32,
    pub server_steps: u64,
    pub drop_count: u64,
    pub expl_index: u32,
    pub step_time: Duration,
    pub msg_time: Duration,
    pub viewer_time: Duration,
    pub sleep_time: Duration,
    pub sleep_count: u64,
    pub long_step_count: u64,
    pub started_at: Instant,
    pub tournament_started_at: Option<Instant>,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            game_number: 0,
            game_step: 0,
            server_steps: 0,
            drop_count: 0,
            expl_index: 0,
            step_time: Duration::ZERO,
            msg_time: Duration::ZERO,
            viewer_time: Duration::ZERO,
            sleep_time: Duration::ZERO,
            sleep_count: 0,
            long_step_count: 0,
            started_at: Instant::now(),
            tournament_started_at: None,
        }
    }
}

/// Game lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No game running, waiting for robots or for the next game to start
    Lobby,
    /// A game is in progress
    Running,
    /// All configured games have been played
    Complete,
}

/// The authoritative world
pub struct World {
    pub conf: SimConfig,
    pub counters: Counters,
    pub robots: BTreeMap<SocketAddr, Robot>,
    pub shells: BTreeMap<SocketAddr, Shell>,
    pub explosions: BTreeMap<u32, Explosion>,
    pub spectators: BTreeMap<SocketAddr, Spectator>,
    pub(crate) starts: StartPlan,
    pub(crate) rng: ChaCha8Rng,
}

impl World {
    pub fn new(conf: SimConfig, seed: u64) -> Self {
        Self {
            conf,
            counters: Counters::default(),
            robots: BTreeMap::new(),
            shells: BTreeMap::new(),
            explosions: BTreeMap::new(),
            spectators: BTreeMap::new(),
            starts: StartPlan::default(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Count alive robots
    pub fn alive_count(&self) -> usize {
        self.robots.values().filter(|r| r.is_alive()).count()
    }

    pub fn phase(&self) -> Phase {
        if self.alive_count() > 0 {
            Phase::Running
        } else if self.counters.game_number > 0
            && self.counters.game_number >= self.conf.games_to_play
        {
            Phase::Complete
        } else {
            Phase::Lobby
        }
    }

    /// True when the lobby has exactly the robots a game needs
    pub fn ready_to_start(&self) -> bool {
        self.phase() == Phase::Lobby && self.robots.len() == self.conf.bots_in_game as usize
    }

    /// Reset every robot and lay them out for a new game
    pub fn start_game(&mut self) -> Result<(), LayoutError> {
        if self.counters.tournament_started_at.is_none() {
            self.counters.tournament_started_at = Some(Instant::now());
        }

        self.counters.game_number += 1;
        self.counters.game_step = 0;

        for robot in self.robots.values_mut() {
            robot.reset_for_game();
        }
        layout::place_robots(self)?;

        self.shells.clear();
        self.explosions.clear();

        info!(
            game = self.counters.game_number,
            robots = self.robots.len(),
            "Starting new game"
        );
        Ok(())
    }

    /// Robots sorted by points, best first
    pub fn ranking(&self) -> Vec<(SocketAddr, &Robot)> {
        let mut ranked: Vec<(SocketAddr, &Robot)> =
            self.robots.iter().map(|(src, r)| (*src, r)).collect();
        ranked.sort_by(|a, b| b.1.points.cmp(&a.1.points));
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn lifecycle_phases() {
        let conf = SimConfig {
            bots_in_game: 2,
            games_to_play: 1,
            ..SimConfig::default()
        };
        let mut world = World::new(conf, 7);
        assert_eq!(world.phase(), Phase::Lobby);
        assert!(!world.ready_to_start());

        world.robots.insert(addr(1), Robot::new("a", None));
        world.robots.insert(addr(2), Robot::new("b", None));
        assert!(world.ready_to_start());

        world.start_game().unwrap();
        assert_eq!(world.phase(), Phase::Running);
        assert!(world.robots.values().all(|r| r.health == FULL_HEALTH));

        for robot in world.robots.values_mut() {
            robot.health = 0.0;
        }
        assert_eq!(world.phase(), Phase::Complete);
    }

    #[test]
    fn damage_never_goes_negative() {
        let mut robot = Robot::new("a", None);
        robot.health = 5.0;
        robot.take_damage(50.0);
        assert_eq!(robot.health, 0.0);
        assert!(!robot.is_alive());
    }

    #[test]
    fn spectator_goes_stale_after_timeout() {
        let spectator = Spectator::new();
        let later = spectator.last_keep_alive + SPECTATOR_TIMEOUT + Duration::from_millis(1);
        assert!(spectator.is_stale(later));
        assert!(!spectator.is_stale(spectator.last_keep_alive));
    }
}

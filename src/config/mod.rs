//! Configuration module - environment variable parsing
//!
//! `Config` holds process-level settings. `SimConfig` holds the simulation
//! constants; it is fixed once the server starts and is sent verbatim to
//! robots and spectators as the `conf` field of their join replies.

use std::env;
use std::f64::consts::PI;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::game::classes::ClassTable;
use crate::game::world::Circle;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Where to write the end-of-run results, if anywhere
    pub results_path: Option<PathBuf>,
    /// Number of obstacles laid out at startup
    pub obstacle_count: u32,
    /// Number of jam zones laid out at startup
    pub jam_zone_count: u32,
    /// Interval between periodic statistics reports
    pub stats_interval: Duration,
    /// RNG seed for layouts, random when absent
    pub seed: Option<u64>,
    /// Simulation constants
    pub sim: SimConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 20000)),
            log_level: "info".to_string(),
            results_path: None,
            obstacle_count: 0,
            jam_zone_count: 0,
            stats_interval: Duration::from_secs(60),
            seed: None,
            sim: SimConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let d = &defaults.sim;

        let sim = SimConfig {
            server_name: env::var("NETBOTS_NAME").unwrap_or_else(|_| d.server_name.clone()),
            server_version: d.server_version.clone(),
            bots_in_game: parse_or("NETBOTS_BOTS", d.bots_in_game)?,
            games_to_play: parse_or("NETBOTS_GAMES", d.games_to_play)?,
            step_max: parse_or("NETBOTS_STEP_MAX", d.step_max)?,
            step_sec: parse_or("NETBOTS_STEP_SEC", d.step_sec)?,
            start_permutations: parse_or("NETBOTS_START_PERMUTATIONS", d.start_permutations)?,
            simple_collisions: parse_or("NETBOTS_SIMPLE_COLLISIONS", d.simple_collisions)?,
            scan_max_distance: parse_or("NETBOTS_SCAN_MAX_DISTANCE", d.scan_max_distance)?,
            count_self_damage: parse_or("NETBOTS_COUNT_SELF_DAMAGE", d.count_self_damage)?,
            drop_rate: parse_or("NETBOTS_DROP_RATE", d.drop_rate)?,
            bot_msgs_per_step: parse_or("NETBOTS_MSGS_PER_STEP", d.bot_msgs_per_step)?,
            allow_rejoin: parse_or("NETBOTS_ALLOW_REJOIN", d.allow_rejoin)?,
            no_viewers: parse_or("NETBOTS_NO_VIEWERS", d.no_viewers)?,
            arena_size: parse_or("NETBOTS_ARENA_SIZE", d.arena_size)?,
            bot_radius: parse_or("NETBOTS_BOT_RADIUS", d.bot_radius)?,
            expl_radius: parse_or("NETBOTS_EXPL_RADIUS", d.expl_radius)?,
            bot_max_speed: parse_or("NETBOTS_BOT_MAX_SPEED", d.bot_max_speed)?,
            bot_acc_rate: parse_or("NETBOTS_BOT_ACC_RATE", d.bot_acc_rate)?,
            shell_speed: parse_or("NETBOTS_SHELL_SPEED", d.shell_speed)?,
            bot_min_turn_rate: parse_or("NETBOTS_BOT_MIN_TURN_RATE", d.bot_min_turn_rate)?,
            bot_max_turn_rate: parse_or("NETBOTS_BOT_MAX_TURN_RATE", d.bot_max_turn_rate)?,
            hit_damage: parse_or("NETBOTS_HIT_DAMAGE", d.hit_damage)?,
            expl_damage: parse_or("NETBOTS_EXPL_DAMAGE", d.expl_damage)?,
            bot_armor: parse_or("NETBOTS_BOT_ARMOR", d.bot_armor)?,
            obstacles: Vec::new(),
            obstacle_radius: parse_or("NETBOTS_OBSTACLE_RADIUS", d.obstacle_radius)?,
            jam_zones: Vec::new(),
            keep_explosion_steps: parse_or("NETBOTS_KEEP_EXPLOSION_STEPS", d.keep_explosion_steps)?,
            allow_classes: parse_or("NETBOTS_ALLOW_CLASSES", d.allow_classes)?,
            classes: ClassTable::default(),
        };
        sim.validate()?;

        let server_addr = env::var("NETBOTS_ADDR")
            .unwrap_or_else(|_| defaults.server_addr.to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidAddress)?;

        let seed = match env::var("NETBOTS_SEED") {
            Ok(raw) => Some(raw.parse().map_err(|_| ConfigError::Invalid {
                key: "NETBOTS_SEED",
                value: raw,
            })?),
            Err(_) => None,
        };

        Ok(Self {
            server_addr,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| defaults.log_level.clone()),
            results_path: env::var("NETBOTS_RESULTS").ok().map(PathBuf::from),
            obstacle_count: parse_or("NETBOTS_OBSTACLES", defaults.obstacle_count)?,
            jam_zone_count: parse_or("NETBOTS_JAM_ZONES", defaults.jam_zone_count)?,
            stats_interval: Duration::from_secs(parse_or("NETBOTS_STATS_SECS", 60u64)?),
            seed,
            sim,
        })
    }
}

/// Read `key` from the environment, falling back to `default` when unset
fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        Err(_) => Ok(default),
    }
}

/// Simulation constants shared with every robot and spectator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimConfig {
    pub server_name: String,
    pub server_version: String,

    // Game and tournament
    /// Robots required before a game can start
    pub bots_in_game: u32,
    /// Games to play before the tournament completes
    pub games_to_play: u32,
    /// Steps after which every surviving robot is killed
    pub step_max: u32,
    /// Target wall-clock duration of one step in seconds
    pub step_sec: f64,
    /// Reuse start locations across games, rotating robots through them
    pub start_permutations: bool,
    /// Fixed collision severity of 1 instead of closing velocity
    pub simple_collisions: bool,
    /// Farthest distance a scan can detect a robot
    pub scan_max_distance: f64,
    /// Credit explosion damage a robot deals to itself as damage dealt
    pub count_self_damage: bool,

    // Messaging
    /// Drop every Nth message in and out, 0 disables
    pub drop_rate: u32,
    /// Messages per endpoint handled each step, extras are discarded
    pub bot_msgs_per_step: u32,
    /// Joined robots may join again (e.g. after a client crash)
    pub allow_rejoin: bool,
    /// Reject spectator registrations
    pub no_viewers: bool,

    // Sizes
    /// Arena is a square with this side, (0,0) bottom left, +y up
    pub arena_size: f64,
    pub bot_radius: f64,
    /// Robots beyond this distance from a detonation take no damage
    pub expl_radius: f64,

    // Speeds and rates of change
    /// Distance per step at 100% speed
    pub bot_max_speed: f64,
    /// Percent of speed gained or lost per step
    pub bot_acc_rate: f64,
    /// Shell distance per step
    pub shell_speed: f64,
    /// Radians per step a robot can turn at 100% speed
    pub bot_min_turn_rate: f64,
    /// Radians per step a robot can turn at 0% speed
    pub bot_max_turn_rate: f64,

    // Damage
    /// Damage from hitting a wall, obstacle or robot at severity 1
    pub hit_damage: f64,
    /// Damage at ground zero of an explosion
    pub expl_damage: f64,
    /// Damage multiplier applied to everything a robot takes
    pub bot_armor: f64,

    /// Obstacles stop robots and shells but not scans
    pub obstacles: Vec<Circle>,
    /// Obstacle radius as a percentage of arena size
    pub obstacle_radius: f64,
    /// Robots fully inside a jam zone are invisible to scans
    pub jam_zones: Vec<Circle>,

    /// Steps an explosion stays visible to spectators
    pub keep_explosion_steps: u32,

    pub allow_classes: bool,
    pub classes: ClassTable,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            server_name: "NetBot Server".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            bots_in_game: 4,
            games_to_play: 10,
            step_max: 1000,
            step_sec: 0.05,
            start_permutations: false,
            simple_collisions: true,
            scan_max_distance: 1415.0,
            count_self_damage: true,
            drop_rate: 11,
            bot_msgs_per_step: 4,
            allow_rejoin: true,
            no_viewers: false,
            arena_size: 1000.0,
            bot_radius: 25.0,
            expl_radius: 75.0,
            bot_max_speed: 5.0,
            bot_acc_rate: 2.0,
            shell_speed: 40.0,
            bot_min_turn_rate: PI / 6000.0,
            bot_max_turn_rate: PI / 50.0,
            hit_damage: 1.0,
            expl_damage: 10.0,
            bot_armor: 1.0,
            obstacles: Vec::new(),
            obstacle_radius: 5.0,
            jam_zones: Vec::new(),
            keep_explosion_steps: 10,
            allow_classes: false,
            classes: ClassTable::default(),
        }
    }
}

impl SimConfig {
    /// Reject configurations the simulation cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bots_in_game == 0 {
            return Err(ConfigError::OutOfRange("botsInGame must be at least 1"));
        }
        if !(self.arena_size > 0.0) || self.arena_size > 32767.0 {
            return Err(ConfigError::OutOfRange("arenaSize must be in (0, 32767]"));
        }
        if !(self.step_sec > 0.0) {
            return Err(ConfigError::OutOfRange("stepSec must be positive"));
        }
        if !(self.bot_radius > 0.0) || self.bot_radius * 4.0 > self.arena_size {
            return Err(ConfigError::OutOfRange(
                "botRadius must be positive and at most a quarter of arenaSize",
            ));
        }
        if !(self.expl_radius > 0.0) {
            return Err(ConfigError::OutOfRange("explRadius must be positive"));
        }
        if self.bot_min_turn_rate > self.bot_max_turn_rate {
            return Err(ConfigError::OutOfRange(
                "botMinTurnRate must not exceed botMaxTurnRate",
            ));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for environment variable {key}")]
    Invalid { key: &'static str, value: String },

    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Configuration out of range: {0}")]
    OutOfRange(&'static str),
}

//! One simulation step: movement, collisions, shells and scoring

use std::collections::BTreeSet;
use std::net::SocketAddr;

use tracing::{debug, info};

use crate::game::combat::CombatSystem;
use crate::game::physics::PhysicsSystem;
use crate::game::world::World;

/// Points for each robot that dies while more than half the game is alive
pub const POINTS_EARLY_DEATH: i64 = 2;
/// Points for each robot that dies once half the game or fewer is alive
pub const POINTS_LATE_DEATH: i64 = 5;
/// Bonus for the last robot standing
pub const POINTS_WIN: i64 = 10;

/// What happened during a step
#[derive(Debug, Clone, Default)]
pub struct StepReport {
    /// Robots that died this step, including the winner
    pub deaths: Vec<SocketAddr>,
    pub winner: Option<SocketAddr>,
    /// Survivors were killed because the game hit its step limit
    pub timed_out: bool,
    /// No robot is alive any more
    pub game_over: bool,
}

/// Advance the running game by one step
pub fn step(world: &mut World) -> StepReport {
    let mut report = StepReport::default();

    world.counters.game_step += 1;
    world.counters.server_steps += 1;

    let alive_before: BTreeSet<SocketAddr> = world
        .robots
        .iter()
        .filter(|(_, r)| r.is_alive())
        .map(|(src, _)| *src)
        .collect();

    let conf = &world.conf;
    for robot in world.robots.values_mut().filter(|r| r.is_alive()) {
        PhysicsSystem::update_motion(robot, conf);
    }

    let hits = PhysicsSystem::resolve_collisions(world);
    PhysicsSystem::apply_collision_damage(world, &hits);

    for blast in CombatSystem::advance_shells(world) {
        if !blast.killed.is_empty() {
            debug!(owner = %blast.owner, killed = ?blast.killed, "Explosion killed robots");
        }
    }
    CombatSystem::age_explosions(world);

    score(world, &alive_before, &mut report);
    report
}

/// Award points for deaths, resolve the winner and end the game when due
fn score(world: &mut World, alive_before: &BTreeSet<SocketAddr>, report: &mut StepReport) {
    let bots_in_game = world.conf.bots_in_game as usize;

    // Worth depends on how crowded the game was at the start of the step
    let before = alive_before.len();
    let worth = if before == bots_in_game {
        0
    } else if before > bots_in_game / 2 {
        POINTS_EARLY_DEATH
    } else {
        POINTS_LATE_DEATH
    };

    if world.counters.game_step >= world.conf.step_max && world.alive_count() != 1 {
        for robot in world.robots.values_mut() {
            robot.health = 0.0;
        }
        report.timed_out = true;
    }

    for src in alive_before {
        if let Some(robot) = world.robots.get_mut(src) {
            if !robot.is_alive() {
                robot.points += worth;
                report.deaths.push(*src);
            }
        }
    }

    if world.alive_count() == 1 {
        if let Some((src, robot)) = world.robots.iter_mut().find(|(_, r)| r.is_alive()) {
            robot.win_health += robot.health;
            robot.win_count += 1;
            robot.health = 0.0;
            robot.points += POINTS_WIN;
            report.winner = Some(*src);
            report.deaths.push(*src);
            info!(
                game = world.counters.game_number,
                step = world.counters.game_step,
                winner = %robot.name,
                "Game won"
            );
        }
    }

    if world.alive_count() == 0 {
        report.game_over = true;
        world.shells.clear();
        if report.winner.is_none() {
            info!(
                game = world.counters.game_number,
                step = world.counters.game_step,
                timed_out = report.timed_out,
                "Game ended without a winner"
            );
        }
    }
}

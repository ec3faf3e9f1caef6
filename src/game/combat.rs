//! Combat system - scanning, shells, explosions

use std::net::SocketAddr;

use tracing::debug;

use crate::config::SimConfig;
use crate::game::classes::ClassField;
use crate::game::world::{Explosion, FireSnapshot, ScanSnapshot, Shell, World};
use crate::util::math::{contains, distance, intersect_segment_circle, project};

/// Explosion keys wrap back to 0 after this
const MAX_EXPLOSION_INDEX: u32 = 65000;

/// A shell that reached its target point this step
#[derive(Debug, Clone, PartialEq)]
pub struct Detonation {
    pub owner: SocketAddr,
    pub x: f64,
    pub y: f64,
    /// Robots that died from this explosion
    pub killed: Vec<SocketAddr>,
}

/// Combat system for scanning, firing and resolving shells
pub struct CombatSystem;

impl CombatSystem {
    /// Distance to the nearest visible robot inside the scan window, 0 if none.
    ///
    /// Robots completely inside a jam zone are invisible. Obstacles do not
    /// block scans. The request is remembered for spectators.
    pub fn scan(world: &mut World, src: SocketAddr, start: f64, end: f64) -> f64 {
        let conf = &world.conf;
        let Some(scanner) = world.robots.get(&src) else {
            return 0.0;
        };

        let nearest = world
            .robots
            .iter()
            .filter(|(other, robot)| **other != src && robot.is_alive())
            .filter(|(_, robot)| !Self::is_jammed(conf, robot.x, robot.y))
            .map(|(_, robot)| contains(scanner.x, scanner.y, start, end, robot.x, robot.y))
            .filter(|d| *d > 0.0 && *d <= conf.scan_max_distance)
            .fold(None, |best: Option<f64>, d| Some(best.map_or(d, |b| b.min(d))));

        if let Some(robot) = world.robots.get_mut(&src) {
            robot.last.scan_request = Some(ScanSnapshot {
                start_radians: start,
                end_radians: end,
            });
        }

        nearest.unwrap_or(0.0)
    }

    /// True if a robot at (x, y) is fully inside some jam zone
    pub fn is_jammed(conf: &SimConfig, x: f64, y: f64) -> bool {
        conf.jam_zones
            .iter()
            .any(|jz| distance(x, y, jz.x, jz.y) + conf.bot_radius < jz.radius)
    }

    /// Launch a shell from the robot's position, replacing any shell in flight
    pub fn fire(world: &mut World, src: SocketAddr, direction: f64, dist: f64) {
        let Some(robot) = world.robots.get_mut(&src) else {
            return;
        };

        world.shells.insert(
            src,
            Shell {
                x: robot.x,
                y: robot.y,
                direction,
                distance_remaining: dist,
            },
        );
        robot.fired_count += 1;
        robot.last.fire_canon_request = Some(FireSnapshot {
            direction,
            distance: dist,
        });
    }

    /// Damage a robot of `class` takes at `dist` from a detonation
    pub fn explosion_damage(conf: &SimConfig, dist: f64, class: &str) -> f64 {
        if dist >= conf.expl_radius {
            return 0.0;
        }
        let armor = conf.class_value(ClassField::BotArmor, class);
        conf.expl_damage * (1.0 - dist / conf.expl_radius) * armor
    }

    /// Move every shell, removing those that hit an obstacle or leave the
    /// arena and detonating those that reach their target
    pub fn advance_shells(world: &mut World) -> Vec<Detonation> {
        let conf = &world.conf;
        let lower = -conf.expl_radius;
        let upper = conf.arena_size + conf.expl_radius;

        let mut arrived: Vec<(SocketAddr, f64, f64)> = Vec::new();
        world.shells.retain(|src, shell| {
            let travel = conf.shell_speed.min(shell.distance_remaining);
            let (x, y) = project(shell.x, shell.y, shell.direction, travel);

            let blocked = conf
                .obstacles
                .iter()
                .any(|o| intersect_segment_circle(shell.x, shell.y, x, y, o.x, o.y, o.radius));
            if blocked || x <= lower || x >= upper || y <= lower || y >= upper {
                return false;
            }

            shell.x = x;
            shell.y = y;
            shell.distance_remaining -= travel;
            if shell.distance_remaining <= 0.0 {
                arrived.push((*src, x, y));
                return false;
            }
            true
        });

        arrived
            .into_iter()
            .map(|(owner, x, y)| Self::detonate(world, owner, x, y))
            .collect()
    }

    /// Apply explosion damage around (x, y) and record the explosion
    pub fn detonate(world: &mut World, owner: SocketAddr, x: f64, y: f64) -> Detonation {
        let conf = &world.conf;
        let mut dealt = 0.0;
        let mut killed = Vec::new();

        for (target, robot) in world.robots.iter_mut() {
            if !robot.is_alive() {
                continue;
            }
            let d = distance(x, y, robot.x, robot.y);
            let damage = Self::explosion_damage(conf, d, &robot.class_name);
            if damage <= 0.0 {
                continue;
            }

            robot.take_damage(damage);
            if !robot.is_alive() {
                killed.push(*target);
            }
            if *target != owner || conf.count_self_damage {
                dealt += damage;
            }
        }

        if let Some(firer) = world.robots.get_mut(&owner) {
            firer.shell_damage += dealt;
        }

        let counters = &mut world.counters;
        counters.expl_index = if counters.expl_index >= MAX_EXPLOSION_INDEX {
            0
        } else {
            counters.expl_index + 1
        };
        world.explosions.insert(
            counters.expl_index,
            Explosion {
                x,
                y,
                steps_ago: 0,
                src: owner.to_string(),
            },
        );

        debug!(%owner, x, y, dealt, killed = killed.len(), "Shell exploded");
        Detonation { owner, x, y, killed }
    }

    /// Age explosions, dropping those shown for long enough
    pub fn age_explosions(world: &mut World) {
        let keep = world.conf.keep_explosion_steps;
        world.explosions.retain(|_, e| {
            if e.steps_ago >= keep {
                false
            } else {
                e.steps_ago += 1;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::world::{Circle, Robot};
    use std::f64::consts::PI;

    const E: f64 = 1e-9;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn place(world: &mut World, port: u16, x: f64, y: f64) {
        let mut robot = Robot::new(format!("bot{port}"), None);
        robot.health = 100.0;
        robot.x = x;
        robot.y = y;
        world.robots.insert(addr(port), robot);
    }

    #[test]
    fn scan_finds_nearest_in_window() {
        let mut world = World::new(SimConfig::default(), 1);
        place(&mut world, 1, 100.0, 100.0);
        place(&mut world, 2, 400.0, 100.0);
        place(&mut world, 3, 300.0, 100.0);
        place(&mut world, 4, 100.0, 700.0);

        let d = CombatSystem::scan(&mut world, addr(1), 2.0 * PI - 0.1, 0.1);
        assert!((d - 200.0).abs() < E);

        let d = CombatSystem::scan(&mut world, addr(1), PI / 4.0, 3.0 * PI / 4.0);
        assert!((d - 600.0).abs() < E);

        let d = CombatSystem::scan(&mut world, addr(1), PI, 1.5 * PI);
        assert_eq!(d, 0.0);
        assert!(world.robots[&addr(1)].last.scan_request.is_some());
    }

    #[test]
    fn scan_respects_max_distance_and_jam_zones() {
        let mut conf = SimConfig {
            scan_max_distance: 150.0,
            ..SimConfig::default()
        };
        conf.jam_zones = vec![Circle {
            x: 500.0,
            y: 500.0,
            radius: 50.0,
        }];
        let mut world = World::new(conf, 1);
        place(&mut world, 1, 300.0, 500.0);
        place(&mut world, 2, 530.0, 500.0);

        // Too far
        assert_eq!(CombatSystem::scan(&mut world, addr(1), 2.0 * PI - 0.1, 0.1), 0.0);

        // Poking out of the jam zone
        world.conf.scan_max_distance = 1000.0;
        assert!((CombatSystem::scan(&mut world, addr(1), 2.0 * PI - 0.1, 0.1) - 230.0).abs() < E);

        // Fully inside it
        world.robots.get_mut(&addr(2)).unwrap().x = 510.0;
        assert_eq!(CombatSystem::scan(&mut world, addr(1), 2.0 * PI - 0.1, 0.1), 0.0);
    }

    #[test]
    fn firing_replaces_shell_in_flight() {
        let mut world = World::new(SimConfig::default(), 1);
        place(&mut world, 1, 100.0, 100.0);

        CombatSystem::fire(&mut world, addr(1), 0.0, 500.0);
        CombatSystem::fire(&mut world, addr(1), PI, 200.0);
        assert_eq!(world.shells.len(), 1);
        assert_eq!(world.shells[&addr(1)].direction, PI);
        assert_eq!(world.robots[&addr(1)].fired_count, 2);
    }

    #[test]
    fn explosion_damage_falls_off_linearly() {
        let conf = SimConfig::default();
        assert_eq!(CombatSystem::explosion_damage(&conf, 0.0, "default"), conf.expl_damage);
        assert!((CombatSystem::explosion_damage(&conf, conf.expl_radius / 2.0, "default") - 5.0).abs() < E);
        assert_eq!(CombatSystem::explosion_damage(&conf, conf.expl_radius, "default"), 0.0);
        assert!((CombatSystem::explosion_damage(&conf, 0.0, "heavy") - 7.7).abs() < E);
    }

    #[test]
    fn shell_travels_then_detonates() {
        let mut world = World::new(SimConfig::default(), 1);
        place(&mut world, 1, 100.0, 500.0);
        place(&mut world, 2, 200.0, 500.0);

        CombatSystem::fire(&mut world, addr(1), 0.0, 100.0);
        assert!(CombatSystem::advance_shells(&mut world).is_empty());
        assert!(CombatSystem::advance_shells(&mut world).is_empty());
        let blasts = CombatSystem::advance_shells(&mut world);

        assert_eq!(blasts.len(), 1);
        assert!((blasts[0].x - 200.0).abs() < 1e-6);
        assert!(world.shells.is_empty());
        assert!((world.robots[&addr(2)].health - 90.0).abs() < 1e-6);
        assert!((world.robots[&addr(1)].shell_damage - 10.0).abs() < 1e-6);
        assert_eq!(world.explosions.len(), 1);
    }

    #[test]
    fn obstacle_swallows_shell() {
        let mut conf = SimConfig::default();
        conf.obstacles = vec![Circle {
            x: 150.0,
            y: 500.0,
            radius: 10.0,
        }];
        let mut world = World::new(conf, 1);
        place(&mut world, 1, 100.0, 500.0);

        CombatSystem::fire(&mut world, addr(1), 0.0, 300.0);
        assert!(CombatSystem::advance_shells(&mut world).is_empty());
        assert!(world.shells.is_empty());
        assert!(world.explosions.is_empty());
    }

    #[test]
    fn self_damage_credit_is_configurable() {
        let conf = SimConfig {
            count_self_damage: false,
            ..SimConfig::default()
        };
        let mut world = World::new(conf, 1);
        place(&mut world, 1, 500.0, 500.0);

        CombatSystem::detonate(&mut world, addr(1), 500.0, 500.0);
        let robot = &world.robots[&addr(1)];
        assert!((robot.health - 90.0).abs() < E);
        assert_eq!(robot.shell_damage, 0.0);
    }

    #[test]
    fn explosions_expire() {
        let conf = SimConfig {
            keep_explosion_steps: 2,
            ..SimConfig::default()
        };
        let mut world = World::new(conf, 1);
        place(&mut world, 1, 100.0, 100.0);
        CombatSystem::detonate(&mut world, addr(1), 900.0, 900.0);

        CombatSystem::age_explosions(&mut world);
        CombatSystem::age_explosions(&mut world);
        assert_eq!(world.explosions.len(), 1);
        CombatSystem::age_explosions(&mut world);
        assert!(world.explosions.is_empty());
    }
}

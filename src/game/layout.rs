//! Random placement of obstacles, jam zones and robot start positions

use rand::Rng;
use tracing::debug;

use crate::config::SimConfig;
use crate::game::world::{Circle, World};
use crate::util::math::distance;

/// Attempts before a layout is declared impossible
pub const MAX_LAYOUT_ATTEMPTS: u32 = 1000;

/// Layout errors. Fatal at startup and at game start.
#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("Could not place {what} after {attempts} attempts")]
    Exhausted { what: &'static str, attempts: u32 },
}

/// Start locations shared by consecutive games when start permutations
/// are enabled. Robot `i` (in endpoint order) starts at
/// `locations[(i + rotation) % n]`.
#[derive(Debug, Clone, Default)]
pub struct StartPlan {
    locations: Vec<(f64, f64)>,
    rotation: usize,
}

/// Generate `count` obstacles that keep clear of each other and the walls
pub fn make_obstacles<R: Rng>(
    conf: &SimConfig,
    count: u32,
    rng: &mut R,
) -> Result<Vec<Circle>, LayoutError> {
    let radius = conf.arena_size * conf.obstacle_radius / 100.0;
    let margin = radius * 4.1;
    let mut obstacles: Vec<Circle> = Vec::with_capacity(count as usize);

    if count > 0 && margin * 2.0 >= conf.arena_size {
        return Err(LayoutError::Exhausted {
            what: "obstacles",
            attempts: 0,
        });
    }

    for _ in 0..count {
        let mut placed = false;
        for _ in 0..MAX_LAYOUT_ATTEMPTS {
            let candidate = Circle {
                x: rng.gen_range(margin..conf.arena_size - margin),
                y: rng.gen_range(margin..conf.arena_size - margin),
                radius,
            };
            let clear = obstacles.iter().all(|o| {
                distance(o.x, o.y, candidate.x, candidate.y)
                    >= o.radius + candidate.radius + conf.bot_radius * 4.1
            });
            if clear {
                obstacles.push(candidate);
                placed = true;
                break;
            }
        }
        if !placed {
            return Err(LayoutError::Exhausted {
                what: "obstacles",
                attempts: MAX_LAYOUT_ATTEMPTS,
            });
        }
    }

    debug!(count = obstacles.len(), radius, "Obstacles laid out");
    Ok(obstacles)
}

/// Generate `count` jam zones anywhere in the arena
pub fn make_jam_zones<R: Rng>(conf: &SimConfig, count: u32, rng: &mut R) -> Vec<Circle> {
    (0..count)
        .map(|_| Circle {
            x: rng.gen_range(0.0..conf.arena_size),
            y: rng.gen_range(0.0..conf.arena_size),
            radius: conf.bot_radius * 2.0,
        })
        .collect()
}

/// Pick `count` start locations in the central 80% of the arena that do
/// not overlap each other or any obstacle
fn random_locations<R: Rng>(
    conf: &SimConfig,
    count: usize,
    rng: &mut R,
) -> Result<Vec<(f64, f64)>, LayoutError> {
    let low = conf.arena_size * 0.1;
    let high = conf.arena_size * 0.9;
    let r = conf.bot_radius;

    for _ in 0..MAX_LAYOUT_ATTEMPTS {
        let locations: Vec<(f64, f64)> = (0..count)
            .map(|_| (rng.gen_range(low..high), rng.gen_range(low..high)))
            .collect();

        let robots_clear = locations.iter().enumerate().all(|(i, a)| {
            locations[i + 1..]
                .iter()
                .all(|b| distance(a.0, a.1, b.0, b.1) > r * 2.0)
        });
        let obstacles_clear = locations.iter().all(|(x, y)| {
            conf.obstacles
                .iter()
                .all(|o| distance(*x, *y, o.x, o.y) > r + o.radius)
        });

        if robots_clear && obstacles_clear {
            return Ok(locations);
        }
    }

    Err(LayoutError::Exhausted {
        what: "robots",
        attempts: MAX_LAYOUT_ATTEMPTS,
    })
}

/// Assign a start location to every robot in the world
pub fn place_robots(world: &mut World) -> Result<(), LayoutError> {
    let count = world.robots.len();
    if count == 0 {
        return Ok(());
    }

    let locations = if world.conf.start_permutations {
        // A fresh location set every `count` games, rotated in between
        let game_index = world.counters.game_number.saturating_sub(1) as usize;
        if game_index % count == 0 || world.starts.locations.len() != count {
            world.starts.locations = random_locations(&world.conf, count, &mut world.rng)?;
        }
        world.starts.rotation = game_index % count;
        (0..count)
            .map(|i| world.starts.locations[(i + world.starts.rotation) % count])
            .collect()
    } else {
        random_locations(&world.conf, count, &mut world.rng)?
    };

    for (robot, (x, y)) in world.robots.values_mut().zip(locations) {
        robot.x = x;
        robot.y = y;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::world::Robot;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::net::SocketAddr;

    fn world_with(count: u16, conf: SimConfig) -> World {
        let mut world = World::new(conf, 42);
        for port in 0..count {
            world.robots.insert(
                SocketAddr::from(([127, 0, 0, 1], 30000 + port)),
                Robot::new(format!("bot{port}"), None),
            );
        }
        world
    }

    #[test]
    fn obstacles_keep_their_distance() {
        let conf = SimConfig::default();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let obstacles = make_obstacles(&conf, 4, &mut rng).unwrap();
        assert_eq!(obstacles.len(), 4);

        let margin = obstacles[0].radius * 4.1;
        for (i, a) in obstacles.iter().enumerate() {
            assert!(a.x >= margin && a.x <= conf.arena_size - margin);
            for b in &obstacles[i + 1..] {
                let gap = a.radius + b.radius + conf.bot_radius * 4.1;
                assert!(distance(a.x, a.y, b.x, b.y) >= gap);
            }
        }
    }

    #[test]
    fn robots_start_apart_and_inside() {
        let mut world = world_with(4, SimConfig::default());
        world.start_game().unwrap();

        let r = world.conf.bot_radius;
        let positions: Vec<(f64, f64)> = world.robots.values().map(|b| (b.x, b.y)).collect();
        for (i, a) in positions.iter().enumerate() {
            assert!(a.0 >= 100.0 && a.0 <= 900.0);
            assert!(a.1 >= 100.0 && a.1 <= 900.0);
            for b in &positions[i + 1..] {
                assert!(distance(a.0, a.1, b.0, b.1) > 2.0 * r);
            }
        }
    }

    #[test]
    fn impossible_layout_is_an_error() {
        let conf = SimConfig {
            arena_size: 100.0,
            bot_radius: 25.0,
            ..SimConfig::default()
        };
        let mut world = world_with(9, conf);
        assert!(matches!(
            world.start_game(),
            Err(LayoutError::Exhausted { what: "robots", .. })
        ));
    }

    #[test]
    fn permutations_rotate_shared_locations() {
        let conf = SimConfig {
            start_permutations: true,
            ..SimConfig::default()
        };
        let mut world = world_with(3, conf);

        world.start_game().unwrap();
        let first: Vec<(f64, f64)> = world.robots.values().map(|b| (b.x, b.y)).collect();
        world.start_game().unwrap();
        let second: Vec<(f64, f64)> = world.robots.values().map(|b| (b.x, b.y)).collect();

        // Same set of spots, each robot moved one slot along
        assert_eq!(second[0], first[1]);
        assert_eq!(second[1], first[2]);
        assert_eq!(second[2], first[0]);
    }
}

//! Robot movement and collision resolution

use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::net::SocketAddr;

use tracing::warn;

use crate::config::SimConfig;
use crate::game::classes::ClassField;
use crate::game::world::{Robot, World};
use crate::util::math::{angle, distance, normalize_angle, project, signed_angle_delta};

/// Extra separation added when pushing overlapping bodies apart
pub const COLLISION_EPSILON: f64 = 0.5;

/// Upper bound on collision sweeps per step
pub const MAX_COLLISION_SWEEPS: u32 = 100;

// Outward normals of the four walls, as the bearing a robot faces when it hits them
const EAST_WALL: f64 = 0.0;
const NORTH_WALL: f64 = PI / 2.0;
const WEST_WALL: f64 = PI;
const SOUTH_WALL: f64 = 3.0 * PI / 2.0;

/// What a robot ran into
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Contact {
    Wall,
    Obstacle,
    Robot,
}

/// Alive robot as seen by the collision sweeps
#[derive(Debug, Clone)]
struct Body {
    src: SocketAddr,
    x: f64,
    y: f64,
    direction: f64,
    /// Speed as a fraction of default max speed
    frac: f64,
}

impl Body {
    /// Velocity component along bearing `n`
    fn along(&self, n: f64) -> f64 {
        self.frac * (self.direction - n).cos()
    }
}

/// Physics system for updating robot motion and resolving overlaps
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Ease speed, turn and move one robot for one step
    pub fn update_motion(robot: &mut Robot, conf: &SimConfig) {
        let class = robot.class_name.as_str();

        // Speed eases toward the requested speed
        let acc = conf.class_value(ClassField::BotAccRate, class);
        if robot.current_speed < robot.requested_speed {
            robot.current_speed = (robot.current_speed + acc).min(robot.requested_speed);
        } else if robot.current_speed > robot.requested_speed {
            robot.current_speed = (robot.current_speed - acc).max(robot.requested_speed);
        }

        // Turning is instant when stopped, slower the faster the robot goes
        if robot.current_direction != robot.requested_direction {
            if robot.current_speed == 0.0 {
                robot.current_direction = robot.requested_direction;
            } else {
                let min_rate = conf.class_value(ClassField::BotMinTurnRate, class);
                let max_rate = conf.class_value(ClassField::BotMaxTurnRate, class);
                let rate = min_rate + (max_rate - min_rate) * (1.0 - robot.current_speed / 100.0);

                let delta = signed_angle_delta(robot.current_direction, robot.requested_direction);
                if delta.abs() <= rate {
                    robot.current_direction = robot.requested_direction;
                } else {
                    robot.current_direction =
                        normalize_angle(robot.current_direction + rate * delta.signum());
                }
            }
        }

        if robot.current_speed > 0.0 {
            let dist = robot.current_speed / 100.0 * conf.class_value(ClassField::BotMaxSpeed, class);
            let (x, y) = project(robot.x, robot.y, robot.current_direction, dist);
            robot.x = x;
            robot.y = y;
        }
    }

    /// Current speed as a fraction of the default class's top speed
    pub fn velocity_fraction(robot: &Robot, conf: &SimConfig) -> f64 {
        let class_max = conf.class_value(ClassField::BotMaxSpeed, &robot.class_name);
        robot.current_speed / 100.0 * class_max / conf.bot_max_speed
    }

    /// Push every alive robot out of walls, obstacles and other robots.
    ///
    /// Returns the worst severity each robot suffered, keyed by endpoint.
    /// Robots absent from the result touched nothing.
    pub fn resolve_collisions(world: &mut World) -> BTreeMap<SocketAddr, (Contact, f64)> {
        let conf = &world.conf;
        let r = conf.bot_radius;
        let size = conf.arena_size;

        let mut bodies: Vec<Body> = world
            .robots
            .iter()
            .filter(|(_, robot)| robot.is_alive())
            .map(|(src, robot)| Body {
                src: *src,
                x: robot.x,
                y: robot.y,
                direction: robot.current_direction,
                frac: Self::velocity_fraction(robot, conf),
            })
            .collect();

        let mut hits: BTreeMap<SocketAddr, (Contact, f64)> = BTreeMap::new();
        let severity = |raw: f64| -> f64 {
            if conf.simple_collisions {
                1.0
            } else {
                raw.max(0.0)
            }
        };
        let mut record = |src: SocketAddr, contact: Contact, s: f64| {
            let entry = hits.entry(src).or_insert((contact, s));
            if s > entry.1 {
                *entry = (contact, s);
            }
        };

        let mut sweeps = 0;
        loop {
            let mut found = false;

            for body in bodies.iter_mut() {
                if body.x < r {
                    body.x = r + COLLISION_EPSILON;
                    record(body.src, Contact::Wall, severity(body.along(WEST_WALL)));
                    found = true;
                } else if body.x > size - r {
                    body.x = size - r - COLLISION_EPSILON;
                    record(body.src, Contact::Wall, severity(body.along(EAST_WALL)));
                    found = true;
                }
                if body.y < r {
                    body.y = r + COLLISION_EPSILON;
                    record(body.src, Contact::Wall, severity(body.along(SOUTH_WALL)));
                    found = true;
                } else if body.y > size - r {
                    body.y = size - r - COLLISION_EPSILON;
                    record(body.src, Contact::Wall, severity(body.along(NORTH_WALL)));
                    found = true;
                }
            }

            for body in bodies.iter_mut() {
                for o in &conf.obstacles {
                    if distance(body.x, body.y, o.x, o.y) < r + o.radius {
                        let face = angle(body.x, body.y, o.x, o.y);
                        record(body.src, Contact::Obstacle, severity(body.along(face)));

                        let away = angle(o.x, o.y, body.x, body.y);
                        let (x, y) = project(o.x, o.y, away, r + o.radius + COLLISION_EPSILON);
                        body.x = x;
                        body.y = y;
                        found = true;
                    }
                }
            }

            for i in 0..bodies.len() {
                for j in i + 1..bodies.len() {
                    let (head, tail) = bodies.split_at_mut(j);
                    let (b1, b2) = (&mut head[i], &mut tail[0]);

                    let between = distance(b1.x, b1.y, b2.x, b2.y);
                    if between > r * 2.0 {
                        continue;
                    }

                    // Coincident centers split along bearing 0
                    let n = angle(b1.x, b1.y, b2.x, b2.y);
                    let s = severity(b1.along(n) - b2.along(n));
                    record(b1.src, Contact::Robot, s);
                    record(b2.src, Contact::Robot, s);

                    let push = (r * 2.0 - between) / 2.0 + COLLISION_EPSILON / 2.0;
                    let (x1, y1) = project(b1.x, b1.y, n, -push);
                    let (x2, y2) = project(b2.x, b2.y, n, push);
                    b1.x = x1;
                    b1.y = y1;
                    b2.x = x2;
                    b2.y = y2;
                    found = true;
                }
            }

            if !found {
                break;
            }
            sweeps += 1;
            if sweeps >= MAX_COLLISION_SWEEPS {
                warn!(sweeps, "Collision resolution hit the sweep cap, overlaps may remain");
                break;
            }
        }

        for body in &bodies {
            if let Some(robot) = world.robots.get_mut(&body.src) {
                robot.x = body.x;
                robot.y = body.y;
            }
        }

        hits
    }

    /// Damage and stop every robot that hit something this step.
    /// Each robot takes damage once, at its worst severity. Contacts with
    /// zero severity neither hurt nor stop the robot.
    pub fn apply_collision_damage(world: &mut World, hits: &BTreeMap<SocketAddr, (Contact, f64)>) {
        let conf = &world.conf;
        for (src, (_, severity)) in hits {
            if *severity <= 0.0 {
                continue;
            }
            if let Some(robot) = world.robots.get_mut(src) {
                let armor = conf.class_value(ClassField::BotArmor, &robot.class_name);
                robot.take_damage(severity * conf.hit_damage * armor);
                robot.current_speed = 0.0;
                robot.requested_speed = 0.0;
            }
        }
    }
}

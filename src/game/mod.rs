//! Game simulation modules

pub mod classes;
pub mod combat;
pub mod layout;
pub mod physics;
pub mod snapshot;
pub mod step;
pub mod world;

pub use combat::CombatSystem;
pub use physics::PhysicsSystem;
pub use snapshot::SnapshotBuilder;
pub use step::{step, StepReport};
pub use world::{Circle, Phase, Robot, World};

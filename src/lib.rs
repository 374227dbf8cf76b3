//! bonk-solver: lightweight sub-stepping rigid-body solver for spheres
//! (integration, bounce and pairwise impulse on top of host-provided sweeps)

pub mod types;
pub mod api;
pub mod config;
pub mod error;
pub mod body;
pub mod response;
pub mod solver;
pub mod narrowphase;
pub mod scene;

pub use crate::types::*;
pub use crate::api::*;
pub use crate::config::SolverConfig;
pub use crate::error::{CollisionError, PhysicsError, PhysicsResult};
pub use crate::body::RigidBody;
pub use crate::response::{single_body_bounce, two_body_collision, ContactBody};
pub use crate::solver::Solver;
pub use crate::scene::{Scene, SceneBody, SceneEvent, StaticCollider, StaticShape};

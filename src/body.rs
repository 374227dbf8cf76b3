use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_GRAVITY;
use crate::error::{PhysicsError, PhysicsResult};
use crate::types::*;

/// Hit fractions at or below this are treated as "no time elapsed".
pub const KINDA_SMALL_NUMBER: f32 = 1.0e-4;

fn default_hit_time() -> f32 {
    1.0
}

fn default_gravity() -> f32 {
    DEFAULT_GRAVITY
}

/// A simulated sphere: physical parameters plus the dynamic state the
/// solver integrates.
///
/// Parameters deserialize from TOML presets; dynamic state never does.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RigidBody {
    pub mass: f32,
    /// Sphere radius used to derive the moment of inertia.
    pub radius: f32,
    /// Explicit moment of inertia. `None` derives it from `mass` and `radius`.
    pub inertia_override: Option<f32>,
    pub friction: f32,
    pub min_friction_fraction: f32,
    /// Bounciness in [0,1].
    pub restitution: f32,
    pub restitution_combine: RestitutionCombine,
    /// Glancing impacts lose more tangential speed than head-on ones.
    pub bounce_angle_affects_friction: bool,
    pub linear_damping: f32,
    pub angular_damping: f32,
    /// 0 disables the clamp.
    pub max_speed: f32,
    /// 0 disables the clamp.
    pub max_angular_speed: f32,
    pub use_gravity: bool,
    pub gravity_scale: f32,
    /// Impacts per frame that do not count against the iteration cap.
    pub bounce_additional_iterations: u32,
    pub plane_constraint: Option<PlaneConstraint>,

    /// Gravity magnitude; overwritten from the solver settings on registration.
    #[serde(skip, default = "default_gravity")]
    pub gravity: f32,
    #[serde(skip)]
    pub linear_velocity: Vec3,
    #[serde(skip)]
    pub angular_velocity: Vec3,
    #[serde(skip)]
    pending_force: Vec3,
    #[serde(skip)]
    pending_torque: Vec3,
    /// Last blocking contact; cleared by an unobstructed sub-step.
    #[serde(skip)]
    pub last_hit: Option<HitResult>,
    /// Hit fraction of the last sub-step, 1.0 when it was unobstructed.
    #[serde(skip, default = "default_hit_time")]
    pub previous_hit_time: f32,
    #[serde(skip)]
    pub previous_hit_normal: Vec3,
    #[serde(skip)]
    state: SimulationState,
}

impl Default for RigidBody {
    fn default() -> Self {
        Self {
            mass: 1.0,
            radius: 1.0,
            inertia_override: None,
            friction: 0.2,
            min_friction_fraction: 0.0,
            restitution: 0.6,
            restitution_combine: RestitutionCombine::Average,
            bounce_angle_affects_friction: false,
            linear_damping: 0.0,
            angular_damping: 0.0,
            max_speed: 1000.0,
            max_angular_speed: 0.0,
            use_gravity: false,
            gravity_scale: 1.0,
            bounce_additional_iterations: 0,
            plane_constraint: None,
            gravity: DEFAULT_GRAVITY,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            pending_force: Vec3::ZERO,
            pending_torque: Vec3::ZERO,
            last_hit: None,
            previous_hit_time: 1.0,
            previous_hit_normal: Vec3::ZERO,
            state: SimulationState::Stopped,
        }
    }
}

impl RigidBody {
    pub fn new(mass: f32) -> Self {
        Self {
            mass,
            ..Default::default()
        }
    }

    /// Load a parameter preset from TOML. Unlisted parameters take defaults.
    pub fn from_toml_str(text: &str) -> PhysicsResult<Self> {
        let body: RigidBody = toml::from_str(text)?;
        body.validate()?;
        Ok(body)
    }

    /// Check parameter ranges. Simulation asserts mass and inertia anyway;
    /// this lets a host reject a bad preset before it is ever simulated.
    pub fn validate(&self) -> PhysicsResult<()> {
        let unit = |name: &str, v: f32| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(PhysicsError::InvalidSettings(format!(
                    "{name} must be in [0,1], got {v}"
                )))
            }
        };
        let non_negative = |name: &str, v: f32| {
            if v >= 0.0 {
                Ok(())
            } else {
                Err(PhysicsError::InvalidSettings(format!(
                    "{name} must be >= 0, got {v}"
                )))
            }
        };
        if !(self.mass > 0.0) {
            return Err(PhysicsError::InvalidSettings(format!(
                "mass must be positive, got {}",
                self.mass
            )));
        }
        if !(self.moment_of_inertia() > 0.0) {
            return Err(PhysicsError::InvalidSettings(format!(
                "moment of inertia must be positive, got {}",
                self.moment_of_inertia()
            )));
        }
        unit("friction", self.friction)?;
        unit("min_friction_fraction", self.min_friction_fraction)?;
        unit("restitution", self.restitution)?;
        non_negative("linear_damping", self.linear_damping)?;
        non_negative("angular_damping", self.angular_damping)?;
        non_negative("max_speed", self.max_speed)?;
        non_negative("max_angular_speed", self.max_angular_speed)?;
        Ok(())
    }

    // --- Builders ----------------------------------------------------------

    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = radius;
        self
    }

    pub fn with_inertia(mut self, moment_of_inertia: f32) -> Self {
        self.inertia_override = Some(moment_of_inertia);
        self
    }

    pub fn with_restitution(mut self, restitution: f32, combine: RestitutionCombine) -> Self {
        self.restitution = restitution;
        self.restitution_combine = combine;
        self
    }

    pub fn with_friction(mut self, friction: f32) -> Self {
        self.friction = friction;
        self
    }

    pub fn with_damping(mut self, linear: f32, angular: f32) -> Self {
        self.linear_damping = linear;
        self.angular_damping = angular;
        self
    }

    pub fn with_max_speed(mut self, max_speed: f32) -> Self {
        self.max_speed = max_speed;
        self
    }

    pub fn with_gravity(mut self, scale: f32) -> Self {
        self.use_gravity = true;
        self.gravity_scale = scale;
        self
    }

    pub fn with_plane_constraint(mut self, normal: Vec3) -> Self {
        self.plane_constraint = Some(PlaneConstraint::new(normal));
        self
    }

    pub fn with_velocity(mut self, linear: Vec3) -> Self {
        self.linear_velocity = linear;
        self
    }

    pub fn with_angular_velocity(mut self, angular: Vec3) -> Self {
        self.angular_velocity = angular;
        self
    }

    // --- State -------------------------------------------------------------

    pub fn state(&self) -> SimulationState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: SimulationState) {
        self.state = state;
    }

    pub fn motion(&self) -> Motion {
        Motion::new(self.linear_velocity, self.angular_velocity)
    }

    /// Overwrite both velocities, clamped to the body's limits.
    pub fn set_motion(&mut self, motion: Motion) {
        self.linear_velocity = self.limit_velocity(motion.linear);
        self.angular_velocity = self.limit_angular_velocity(motion.angular);
    }

    pub fn set_velocity(&mut self, velocity: Vec3) {
        self.linear_velocity = self.limit_velocity(velocity);
    }

    pub fn set_angular_velocity(&mut self, angular_velocity: Vec3) {
        self.angular_velocity = self.limit_angular_velocity(angular_velocity);
    }

    pub fn stop_all_movement_immediately(&mut self) {
        self.linear_velocity = Vec3::ZERO;
        self.angular_velocity = Vec3::ZERO;
    }

    pub fn speed(&self) -> f32 {
        self.linear_velocity.length()
    }

    pub fn moment_of_inertia(&self) -> f32 {
        self.inertia_override
            .unwrap_or(0.4 * self.mass * self.radius * self.radius)
    }

    // --- Forces ------------------------------------------------------------

    pub fn add_force(&mut self, force: Vec3) {
        self.pending_force += force;
    }

    pub fn add_torque(&mut self, torque: Vec3) {
        self.pending_torque += torque;
    }

    pub fn pending_force(&self) -> Vec3 {
        self.pending_force
    }

    pub fn pending_torque(&self) -> Vec3 {
        self.pending_torque
    }

    pub fn clear_pending_force(&mut self) {
        self.pending_force = Vec3::ZERO;
    }

    pub fn clear_pending_torque(&mut self) {
        self.pending_torque = Vec3::ZERO;
    }

    pub fn linear_drag_force(&self, velocity: Vec3) -> Vec3 {
        -0.5 * velocity.normalize_or_zero() * velocity.length_squared() * self.linear_damping
    }

    fn gravity_acceleration(&self) -> Vec3 {
        if self.use_gravity {
            Vec3::new(0.0, 0.0, -self.gravity * self.gravity_scale)
        } else {
            Vec3::ZERO
        }
    }

    // --- Integration -------------------------------------------------------

    pub fn compute_acceleration(&self, velocity: Vec3, _dt: f32) -> Vec3 {
        assert!(
            self.mass > 0.0,
            "rigid body mass must be positive, got {}",
            self.mass
        );
        let force = self.linear_drag_force(velocity) + self.pending_force;
        self.gravity_acceleration() + force / self.mass
    }

    pub fn compute_angular_acceleration(&self, angular_velocity: Vec3, _dt: f32) -> Vec3 {
        let inertia = self.moment_of_inertia();
        assert!(
            inertia > 0.0,
            "rigid body moment of inertia must be positive, got {}",
            inertia
        );
        (self.pending_torque - self.angular_damping * angular_velocity) / inertia
    }

    /// Semi-implicit Euler: v = v0 + a*dt, then clamped and plane-constrained.
    pub fn compute_velocity(&self, initial: Vec3, dt: f32) -> Vec3 {
        let acceleration = self.compute_acceleration(initial, dt);
        self.limit_velocity(initial + acceleration * dt)
    }

    pub fn compute_angular_velocity(&self, initial: Vec3, dt: f32) -> Vec3 {
        let acceleration = self.compute_angular_acceleration(initial, dt);
        self.limit_angular_velocity(initial + acceleration * dt)
    }

    /// Velocity Verlet displacement for a step of `dt`.
    ///
    /// p = v0*t + 1/2*a*t^2 with a inferred from `compute_velocity`, i.e.
    /// p = v0*t + 1/2*(v1 - v0)*t.
    pub fn compute_move_delta(&self, velocity: Vec3, dt: f32) -> Vec3 {
        let new_velocity = self.compute_velocity(velocity, dt);
        velocity * dt + (new_velocity - velocity) * (0.5 * dt)
    }

    /// Scaled-axis rotation for a step of `dt`, same form as the move delta.
    pub fn compute_rotation_delta(&self, angular_velocity: Vec3, dt: f32) -> Vec3 {
        let new_angular = self.compute_angular_velocity(angular_velocity, dt);
        angular_velocity * dt + (new_angular - angular_velocity) * (0.5 * dt)
    }

    /// Update velocities after a swept move that started from `old`.
    ///
    /// If something already changed a velocity during the move (an event
    /// handler, a pairwise collision) that value is kept. Otherwise the
    /// velocity is re-integrated over the time actually travelled.
    pub fn apply_movement_result(&mut self, old: Motion, hit: Option<&HitResult>, dt: f32) {
        let travelled = match hit {
            Some(hit) if hit.blocking => {
                if hit.time > KINDA_SMALL_NUMBER {
                    Some(dt * hit.time)
                } else {
                    None
                }
            }
            _ => {
                self.last_hit = None;
                self.previous_hit_time = 1.0;
                Some(dt)
            }
        };

        if self.linear_velocity == old.linear {
            self.linear_velocity = match travelled {
                Some(t) => self.compute_velocity(old.linear, t),
                None => old.linear,
            };
        }
        if self.angular_velocity == old.angular {
            self.angular_velocity = match travelled {
                Some(t) => self.compute_angular_velocity(old.angular, t),
                None => old.angular,
            };
        }
    }

    // --- Limits ------------------------------------------------------------

    pub fn limit_velocity(&self, velocity: Vec3) -> Vec3 {
        let clamped = if self.max_speed > 0.0 {
            velocity.clamp_length_max(self.max_speed)
        } else {
            velocity
        };
        self.constrain_direction(clamped)
    }

    pub fn limit_angular_velocity(&self, angular_velocity: Vec3) -> Vec3 {
        let clamped = if self.max_angular_speed > 0.0 {
            angular_velocity.clamp_length_max(self.max_angular_speed)
        } else {
            angular_velocity
        };
        match self.plane_constraint {
            Some(plane) => plane.constrain_rotation(clamped),
            None => clamped,
        }
    }

    pub fn constrain_direction(&self, v: Vec3) -> Vec3 {
        match self.plane_constraint {
            Some(plane) => plane.constrain_direction(v),
            None => v,
        }
    }

    pub fn constrain_normal(&self, n: Vec3) -> Vec3 {
        match self.plane_constraint {
            Some(plane) => plane.constrain_normal(n),
            None => n.normalize_or_zero(),
        }
    }

    /// Effective restitution of this body against `other`, per this body's
    /// combine mode.
    pub fn restitution_against(&self, other: &RigidBody) -> f32 {
        let combined = match self.restitution_combine {
            RestitutionCombine::Minimum => self.restitution.min(other.restitution),
            RestitutionCombine::Maximum => self.restitution.max(other.restitution),
            RestitutionCombine::Average => 0.5 * (self.restitution + other.restitution),
            RestitutionCombine::Ignore => self.restitution,
        };
        combined.clamp(0.0, 1.0)
    }
}

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Stable identity of a simulated body, issued by the host.
///
/// The solver never dereferences a handle itself; it always asks the host,
/// so a handle that outlives its body simply stops resolving.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BodyHandle {
    pub index: u32,
    pub generation: u32,
}

impl BodyHandle {
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

/// What the swept move ran into.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum HitTarget {
    /// Scenery, or anything that does not resolve to a simulated body.
    StaticSurface,
    /// Another body the host knows about.
    Body(BodyHandle),
}

/// Result of one swept move, as reported by the host.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct HitResult {
    pub blocking: bool,
    /// The move began already overlapping the thing hit.
    pub started_penetrating: bool,
    /// Fraction in [0,1] of the attempted move completed before contact.
    pub time: f32,
    pub impact_point: Vec3,
    /// Surface normal at impact, pointing away from the obstacle.
    pub normal: Vec3,
    pub target: HitTarget,
}

impl HitResult {
    /// A full, unobstructed move.
    pub fn none() -> Self {
        Self {
            blocking: false,
            started_penetrating: false,
            time: 1.0,
            impact_point: Vec3::ZERO,
            normal: Vec3::ZERO,
            target: HitTarget::StaticSurface,
        }
    }

    pub fn blocking(time: f32, impact_point: Vec3, normal: Vec3, target: HitTarget) -> Self {
        Self {
            blocking: true,
            started_penetrating: false,
            time: time.clamp(0.0, 1.0),
            impact_point,
            normal,
            target,
        }
    }

    pub fn penetrating(impact_point: Vec3, normal: Vec3, target: HitTarget) -> Self {
        Self {
            blocking: true,
            started_penetrating: true,
            time: 0.0,
            impact_point,
            normal,
            target,
        }
    }
}

impl Default for HitResult {
    fn default() -> Self {
        Self::none()
    }
}

/// Linear and angular velocity of a body at one instant.
///
/// Angular velocity is a world-space rotation axis scaled by the rate in
/// radians per second.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Motion {
    pub linear: Vec3,
    pub angular: Vec3,
}

impl Motion {
    pub const ZERO: Motion = Motion {
        linear: Vec3::ZERO,
        angular: Vec3::ZERO,
    };

    pub fn new(linear: Vec3, angular: Vec3) -> Self {
        Self { linear, angular }
    }
}

/// First contact along a ray or sweep.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SweepHit {
    /// Fraction of the ray direction or sweep displacement, >= 0.
    pub toi: f32,
    /// Normal at impact, pointing from the obstacle toward the mover.
    pub normal: Vec3,
    pub contact: Vec3,
    /// The sweep started overlapping the obstacle.
    pub started_penetrating: bool,
}

/// How two bodies' restitution values combine in a pairwise collision.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestitutionCombine {
    Minimum,
    Maximum,
    #[default]
    Average,
    /// Use this body's own value, whatever the other body says.
    Ignore,
}

/// Confines motion to the plane through the origin with the given normal.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlaneConstraint {
    pub normal: Vec3,
}

impl PlaneConstraint {
    pub fn new(normal: Vec3) -> Self {
        Self {
            normal: normal.normalize_or_zero(),
        }
    }

    /// Remove the out-of-plane component of a direction or velocity.
    pub fn constrain_direction(&self, v: Vec3) -> Vec3 {
        v - self.normal * v.dot(self.normal)
    }

    /// Project a surface normal into the plane and renormalize it.
    pub fn constrain_normal(&self, n: Vec3) -> Vec3 {
        self.constrain_direction(n).normalize_or_zero()
    }

    /// Planar motion can only spin about the plane normal.
    pub fn constrain_rotation(&self, w: Vec3) -> Vec3 {
        self.normal * w.dot(self.normal)
    }
}

/// Whether the solver currently integrates a body.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SimulationState {
    #[default]
    Stopped,
    Simulating,
}

/// How a body's sub-step loop ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Time budget spent, or the iteration cap reached.
    Completed,
    /// The body went invalid or got stuck; remaining time dropped.
    Aborted,
    /// Speed fell below the simulation threshold.
    Stopped,
}

/// Per-body summary of one frame's sub-step loop.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SubStepReport {
    pub handle: BodyHandle,
    pub iterations: u32,
    /// Frame time left un-simulated when the loop exited.
    pub remaining_time: f32,
    pub impacts: u32,
    pub outcome: StepOutcome,
}

/// Counters for the last completed tick.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SolverStats {
    pub active: usize,
    pub simulated: usize,
    pub skipped: usize,
    pub sub_steps: u32,
    pub impacts: u32,
    pub pair_collisions: u32,
    pub memo_hits: u32,
    pub aborted: u32,
    pub stopped: u32,
}

/// Timing breakdown for the last tick (only filled when enabled).
#[derive(Copy, Clone, Debug, Default)]
pub struct SolverTiming {
    pub tick_ms: f64,
    pub register_ms: f64,
    pub simulate_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_plane_constraint_projects_out_normal() {
        let plane = PlaneConstraint::new(Vec3::new(0.0, 0.0, 2.0));
        let v = plane.constrain_direction(Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(v, Vec3::new(1.0, 2.0, 0.0));
        let w = plane.constrain_rotation(Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(w, Vec3::new(0.0, 0.0, 3.0));
    }

    #[test]
    fn test_plane_constraint_normal_renormalized() {
        let plane = PlaneConstraint::new(Vec3::Z);
        let n = plane.constrain_normal(Vec3::new(1.0, 0.0, 1.0));
        assert_abs_diff_eq!(n.length(), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(n.z, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_hit_result_time_clamped() {
        let hit = HitResult::blocking(1.5, Vec3::ZERO, Vec3::Z, HitTarget::StaticSurface);
        assert_eq!(hit.time, 1.0);
        assert!(!HitResult::none().blocking);
        assert_eq!(HitResult::none().time, 1.0);
    }
}

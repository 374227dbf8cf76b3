use glam::{Quat, Vec3};

use crate::body::RigidBody;
use crate::config::SolverConfig;
use crate::types::*;

/// Public API contract for the sphere solver.
pub trait SolverApi {
    /// Construct a solver from a settings snapshot. The settings are not
    /// re-read afterwards.
    fn new(cfg: SolverConfig) -> Self
    where
        Self: Sized;

    // --- Registration ------------------------------------------------------

    /// Queue a body to start simulating at the next frame boundary.
    fn request_enable(&mut self, handle: BodyHandle);

    /// Queue a body to stop simulating at the next frame boundary. Within one
    /// frame a disable always wins over an enable of the same body.
    fn request_disable(&mut self, handle: BodyHandle);

    /// True if the body is in the active set right now.
    fn is_simulating(&self, handle: BodyHandle) -> bool;

    /// True if there is anything to simulate or register.
    fn has_bodies(&self) -> bool;

    // --- Frame -------------------------------------------------------------

    /// Advance every active body by `dt` seconds.
    fn tick<H: SimulationHost + ?Sized>(&mut self, host: &mut H, dt: f32);
}

/// Everything the solver needs from the world that owns the bodies.
///
/// The solver calls back into the host between every step and re-checks
/// validity afterwards, since any call may destroy or teleport bodies.
pub trait SimulationHost {
    // --- Body access -------------------------------------------------------

    fn body(&self, handle: BodyHandle) -> Option<&RigidBody>;

    fn body_mut(&mut self, handle: BodyHandle) -> Option<&mut RigidBody>;

    /// The body and its collision component still exist.
    fn is_valid(&self, handle: BodyHandle) -> bool;

    /// The entity owning the body still exists.
    fn owner_is_valid(&self, handle: BodyHandle) -> bool {
        self.is_valid(handle)
    }

    /// World-space center of the body.
    fn position(&self, handle: BodyHandle) -> Option<Vec3>;

    /// Sphere radius used for pairwise lever arms, if the body has one.
    fn collision_radius(&self, handle: BodyHandle) -> Option<f32>;

    // --- Gates -------------------------------------------------------------

    /// Host-side throttling (LOD, suspended entity) for this frame.
    fn should_skip_update(&self, _handle: BodyHandle, _dt: f32) -> bool {
        false
    }

    /// The body is currently driven by a full physics engine.
    fn is_simulating_physics(&self, _handle: BodyHandle) -> bool {
        false
    }

    // --- Movement ----------------------------------------------------------

    /// Sweep the body along `delta`, stopping at the first blocking contact,
    /// and apply `rotation` on top of its current orientation.
    fn move_body(&mut self, handle: BodyHandle, delta: Vec3, rotation: Quat) -> HitResult;

    /// Push the body's integrated velocity out to rendering or networking.
    fn sync_velocity(&mut self, _handle: BodyHandle) {}

    // --- Notifications -----------------------------------------------------

    /// A bounce was resolved. The handler may change the body's velocity.
    fn on_bounce(&mut self, _handle: BodyHandle, _hit: &HitResult, _before: Vec3, _after: Vec3) {}

    /// The body fell below the simulation speed and was stopped.
    fn on_simulation_stopped(&mut self, _handle: BodyHandle) {}
}

/// Sphere sweep and ray primitives used by the reference scene.
///
/// Sweeps take the sphere's displacement for the whole move and report the
/// fraction of it completed before contact.
pub trait NarrowphaseApi {
    // Rays ------------------------------------------------------------------

    fn ray_aabb(origin: Vec3, dir: Vec3, aabb_min: Vec3, aabb_max: Vec3) -> Option<SweepHit>;

    // Sweeps ----------------------------------------------------------------

    fn sweep_sphere_plane(c: Vec3, r: f32, delta: Vec3, normal: Vec3, dist: f32) -> Option<SweepHit>;
    fn sweep_sphere_sphere(c0: Vec3, r0: f32, delta: Vec3, c1: Vec3, r1: f32) -> Option<SweepHit>;
    fn sweep_sphere_aabb(c: Vec3, r: f32, delta: Vec3, box_min: Vec3, box_max: Vec3) -> Option<SweepHit>;
}

use glam::{Quat, Vec3};
use log::{debug, trace, warn};

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::api::{SimulationHost, SolverApi};
use crate::config::SolverConfig;
use crate::error::CollisionError;
use crate::response::{single_body_bounce, two_body_collision, ContactBody};
use crate::types::*;

/// Remaining frame time below this is dropped rather than simulated.
pub const MIN_TICK_TIME: f32 = 1.0e-6;

/// Sub-stepping sphere solver.
///
/// Bodies live in the host; the solver only keeps handles. Enable and
/// disable requests are queued and applied at the top of the next tick, so
/// the active set never changes while it is being iterated.
pub struct Solver {
    pub cfg: SolverConfig,

    // Registration
    active: Vec<BodyHandle>,
    active_set: HashSet<BodyHandle>,
    pending_add: Vec<BodyHandle>,
    pending_remove: Vec<BodyHandle>,

    // Pairwise results computed this tick, keyed by the body they apply to
    pair_memo: HashMap<BodyHandle, PairOutcome>,
    // Bodies auto-stopped this tick; a strike may still cancel their removal
    came_to_rest: HashSet<BodyHandle>,

    // Diagnostics for the last tick
    reports: Vec<SubStepReport>,
    stats: SolverStats,
    last_timing: Option<SolverTiming>,
}

#[derive(Copy, Clone, Debug)]
struct PairOutcome {
    partner: BodyHandle,
    before: Vec3,
    motion: Motion,
}

impl SolverApi for Solver {
    fn new(cfg: SolverConfig) -> Self {
        Self {
            cfg,
            active: Vec::new(),
            active_set: HashSet::new(),
            pending_add: Vec::new(),
            pending_remove: Vec::new(),
            pair_memo: HashMap::new(),
            came_to_rest: HashSet::new(),
            reports: Vec::new(),
            stats: SolverStats::default(),
            last_timing: None,
        }
    }

    fn request_enable(&mut self, handle: BodyHandle) {
        if !self.pending_add.contains(&handle) {
            self.pending_add.push(handle);
        }
    }

    fn request_disable(&mut self, handle: BodyHandle) {
        if !self.pending_remove.contains(&handle) {
            self.pending_remove.push(handle);
        }
    }

    fn is_simulating(&self, handle: BodyHandle) -> bool {
        self.active_set.contains(&handle)
    }

    fn has_bodies(&self) -> bool {
        !self.active.is_empty() || !self.pending_add.is_empty() || !self.pending_remove.is_empty()
    }

    fn tick<H: SimulationHost + ?Sized>(&mut self, host: &mut H, dt: f32) {
        let t_all = if self.cfg.enable_timing { Some(Instant::now()) } else { None };
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };

        self.register(host);
        let register_ms = t_all.map(|t| t.elapsed().as_secs_f64() * 1000.0).unwrap_or(0.0);

        self.pair_memo.clear();
        self.came_to_rest.clear();
        self.reports.clear();
        let mut stats = SolverStats {
            active: self.active.len(),
            ..Default::default()
        };

        let t_sim = if self.cfg.enable_timing { Some(Instant::now()) } else { None };
        let snapshot = self.active.clone();
        for handle in snapshot {
            if !host.is_valid(handle) || !host.owner_is_valid(handle) {
                debug!("[Solver] dropping invalid body {:?}", handle);
                self.request_disable(handle);
                stats.skipped += 1;
                continue;
            }
            if host.should_skip_update(handle, dt) || host.is_simulating_physics(handle) {
                debug!("[Solver] {:?} is skipped or externally simulated; releasing it", handle);
                self.request_disable(handle);
                stats.skipped += 1;
                continue;
            }

            let report = self.simulate_body(host, handle, dt, &mut stats);
            stats.simulated += 1;
            match report.outcome {
                StepOutcome::Completed => {}
                StepOutcome::Aborted => stats.aborted += 1,
                StepOutcome::Stopped => stats.stopped += 1,
            }
            self.reports.push(report);
        }
        self.stats = stats;

        if let Some(t_all) = t_all {
            self.last_timing = Some(SolverTiming {
                tick_ms: t_all.elapsed().as_secs_f64() * 1000.0,
                register_ms,
                simulate_ms: t_sim.map(|t| t.elapsed().as_secs_f64() * 1000.0).unwrap_or(0.0),
            });
        }
    }
}

impl Solver {
    /// Apply queued requests. Adds go first, so a same-frame disable of the
    /// same body always wins.
    fn register<H: SimulationHost + ?Sized>(&mut self, host: &mut H) {
        for handle in std::mem::take(&mut self.pending_add) {
            if !self.active_set.insert(handle) {
                continue;
            }
            self.active.push(handle);
            if let Some(body) = host.body_mut(handle) {
                body.gravity = self.cfg.gravity;
                body.set_state(SimulationState::Simulating);
            }
            debug!("[Solver] {:?} started simulating", handle);
        }

        let removals = std::mem::take(&mut self.pending_remove);
        if removals.is_empty() {
            return;
        }
        let removed: HashSet<BodyHandle> = removals
            .into_iter()
            .filter(|h| self.active_set.remove(h))
            .collect();
        self.active.retain(|h| !removed.contains(h));
        for handle in removed {
            if let Some(body) = host.body_mut(handle) {
                body.set_state(SimulationState::Stopped);
            }
            debug!("[Solver] {:?} stopped simulating", handle);
        }
    }

    /// Run one body's sub-step loop for a frame of `dt` seconds.
    fn simulate_body<H: SimulationHost + ?Sized>(
        &mut self,
        host: &mut H,
        handle: BodyHandle,
        dt: f32,
        stats: &mut SolverStats,
    ) -> SubStepReport {
        let mut remaining = dt;
        let mut iterations = 0u32;
        let mut impacts = 0u32;
        let mut outcome = StepOutcome::Completed;

        while remaining >= MIN_TICK_TIME && iterations < self.cfg.max_iterations {
            iterations += 1;
            let step = remaining;
            remaining -= step;
            stats.sub_steps += 1;

            let Some(body) = host.body(handle) else {
                outcome = StepOutcome::Aborted;
                break;
            };
            let old = body.motion();
            let delta = body.compute_move_delta(old.linear, step);
            let rotation = Quat::from_scaled_axis(body.compute_rotation_delta(old.angular, step));
            trace!("[Solver] {:?} sub-step {} of {:.6}s, delta {:?}", handle, iterations, step, delta);

            let hit = host.move_body(handle, delta, rotation);
            if !host.is_valid(handle) {
                debug!("[Solver] {:?} was invalidated by its move", handle);
                outcome = StepOutcome::Aborted;
                break;
            }

            if !hit.blocking {
                // A body under gravity or a force passes through zero speed at
                // an apex; only a coasting body may settle in free flight.
                let coasting = match host.body_mut(handle) {
                    Some(body) => {
                        body.apply_movement_result(old, None, step);
                        let driven = body.compute_acceleration(Vec3::ZERO, step) != Vec3::ZERO;
                        body.clear_pending_force();
                        body.clear_pending_torque();
                        !driven
                    }
                    None => false,
                };
                if coasting && self.stop_if_slow(host, handle) {
                    outcome = StepOutcome::Stopped;
                    break;
                }
                continue;
            }

            impacts += 1;
            stats.impacts += 1;
            trace!("[Solver] {:?} hit {:?} at {:.4}", handle, hit.target, hit.time);
            if let Some(body) = host.body_mut(handle) {
                body.apply_movement_result(old, Some(&hit), step);
                body.clear_pending_force();
                body.clear_pending_torque();
            }

            if self.should_abort(&*host, handle, &hit) {
                outcome = StepOutcome::Aborted;
                break;
            }

            self.resolve_contact(host, handle, &hit, dt, stats);

            if self.should_abort(&*host, handle, &hit) {
                outcome = StepOutcome::Aborted;
                break;
            }
            if self.stop_if_slow(host, handle) {
                outcome = StepOutcome::Stopped;
                break;
            }

            let Some(body) = host.body_mut(handle) else {
                outcome = StepOutcome::Aborted;
                break;
            };
            body.last_hit = Some(hit);
            body.previous_hit_time = hit.time;
            body.previous_hit_normal = body.constrain_normal(hit.normal);
            let motion = body.motion();
            body.set_motion(motion);
            let free_impacts = body.bounce_additional_iterations;

            if hit.time < 1.0 {
                remaining += step * (1.0 - hit.time);
                if impacts <= free_impacts && remaining >= MIN_TICK_TIME {
                    iterations -= 1;
                }
            }
        }

        if host.is_valid(handle) {
            host.sync_velocity(handle);
        }

        SubStepReport {
            handle,
            iterations,
            remaining_time: remaining,
            impacts,
            outcome,
        }
    }

    fn should_abort<H: SimulationHost + ?Sized>(&self, host: &H, handle: BodyHandle, hit: &HitResult) -> bool {
        if !host.is_valid(handle) || !host.owner_is_valid(handle) {
            debug!("[Solver] {:?} became invalid during contact handling", handle);
            return true;
        }
        if hit.started_penetrating {
            let velocity = host.body(handle).map(|b| b.linear_velocity).unwrap_or_default();
            warn!(
                "[Solver] {:?} started inside {:?} at {:?} (velocity {:?}); skipping the rest of this frame",
                handle, hit.target, hit.impact_point, velocity
            );
            return true;
        }
        false
    }

    /// Stop the body if it fell below the simulation speed. Returns true if it
    /// was stopped.
    fn stop_if_slow<H: SimulationHost + ?Sized>(&mut self, host: &mut H, handle: BodyHandle) -> bool {
        let Some(body) = host.body_mut(handle) else {
            return false;
        };
        if body.speed() >= self.cfg.minimum_simulation_speed {
            return false;
        }
        body.stop_all_movement_immediately();
        debug!("[Solver] {:?} came to rest", handle);
        self.request_disable(handle);
        self.came_to_rest.insert(handle);
        host.on_simulation_stopped(handle);
        true
    }

    fn resolve_contact<H: SimulationHost + ?Sized>(
        &mut self,
        host: &mut H,
        handle: BodyHandle,
        hit: &HitResult,
        dt: f32,
        stats: &mut SolverStats,
    ) {
        let Some(mut before) = host.body(handle).map(|b| b.linear_velocity) else {
            return;
        };

        match hit.target {
            HitTarget::Body(other) if other != handle && is_pair_partner(&*host, other, dt) => {
                let memo = self.pair_memo.get(&handle).filter(|m| m.partner == other).copied();
                match memo {
                    Some(memo) => {
                        stats.memo_hits += 1;
                        before = memo.before;
                        if let Some(body) = host.body_mut(handle) {
                            body.set_motion(memo.motion);
                        }
                    }
                    None => match self.collide_pair(host, handle, other, hit) {
                        Ok(()) => stats.pair_collisions += 1,
                        Err(err) => {
                            debug!("[Solver] {}; treating {:?} as scenery", err, other);
                            bounce(host, handle, hit);
                        }
                    },
                }
            }
            _ => bounce(host, handle, hit),
        }

        if let Some(after) = host.body(handle).map(|b| b.linear_velocity) {
            host.on_bounce(handle, hit, before, after);
        }
    }

    /// Resolve a collision between `handle` and another body, write both
    /// results and remember them for the rest of the tick.
    fn collide_pair<H: SimulationHost + ?Sized>(
        &mut self,
        host: &mut H,
        handle: BodyHandle,
        other: BodyHandle,
        hit: &HitResult,
    ) -> Result<(), CollisionError> {
        let (before_a, before_b, out_a, out_b) = {
            let a = contact_of(&*host, handle).ok_or(CollisionError::MissingCollisionRadius(handle))?;
            let b = contact_of(&*host, other).ok_or(CollisionError::MissingCollisionRadius(other))?;
            let (out_a, out_b) = two_body_collision(&a, &b, hit)?;
            (a.body.linear_velocity, b.body.linear_velocity, out_a, out_b)
        };

        if let Some(body) = host.body_mut(handle) {
            body.set_motion(out_a);
        }
        if let Some(body) = host.body_mut(other) {
            body.set_motion(out_b);
        }
        self.pair_memo.insert(handle, PairOutcome { partner: other, before: before_a, motion: out_a });
        self.pair_memo.insert(other, PairOutcome { partner: handle, before: before_b, motion: out_b });

        // A struck body that is resting (or came to rest this tick) picks up
        // the impulse and starts simulating next tick.
        if self.came_to_rest.remove(&other) {
            self.pending_remove.retain(|h| *h != other);
        }
        if !self.active_set.contains(&other) {
            debug!("[Solver] {:?} woken by {:?}", other, handle);
            self.request_enable(other);
        }
        Ok(())
    }

    // --- Diagnostics -----------------------------------------------------------

    /// Handles simulated by the current tick, in iteration order.
    pub fn active_bodies(&self) -> &[BodyHandle] {
        &self.active
    }

    /// Per-body sub-step summaries for the last tick.
    pub fn last_frame_reports(&self) -> &[SubStepReport] {
        &self.reports
    }

    pub fn report_for(&self, handle: BodyHandle) -> Option<&SubStepReport> {
        self.reports.iter().find(|r| r.handle == handle)
    }

    pub fn debug_stats(&self) -> SolverStats {
        self.stats
    }

    /// Timing breakdown for the last tick (None unless `enable_timing`).
    pub fn timing(&self) -> Option<SolverTiming> {
        self.last_timing
    }
}

/// Snapshot a body for the response math. Only position is required; the
/// radius stays optional so pairwise handling can report its absence.
fn contact_of<H: SimulationHost + ?Sized>(host: &H, handle: BodyHandle) -> Option<ContactBody<'_>> {
    Some(ContactBody {
        handle,
        body: host.body(handle)?,
        center: host.position(handle)?,
        radius: host.collision_radius(handle),
    })
}

/// Only a live body the solver is free to drive takes part in a pairwise
/// collision. Anything else is treated as static scenery.
fn is_pair_partner<H: SimulationHost + ?Sized>(host: &H, other: BodyHandle, dt: f32) -> bool {
    host.body(other).is_some()
        && host.is_valid(other)
        && host.owner_is_valid(other)
        && !host.should_skip_update(other, dt)
        && !host.is_simulating_physics(other)
}

fn bounce<H: SimulationHost + ?Sized>(host: &mut H, handle: BodyHandle, hit: &HitResult) {
    let motion = contact_of(&*host, handle).map(|c| single_body_bounce(&c, hit));
    if let (Some(motion), Some(body)) = (motion, host.body_mut(handle)) {
        body.set_motion(motion);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::RigidBody;
    use crate::scene::{Scene, SceneEvent, StaticCollider};
    use approx::assert_abs_diff_eq;
    use glam::Vec3;
    use std::collections::VecDeque;

    fn cfg(max_iterations: u32) -> SolverConfig {
        SolverConfig {
            max_iterations,
            ..Default::default()
        }
    }

    fn ball(velocity: Vec3) -> RigidBody {
        RigidBody::new(1.0)
            .with_radius(1.0)
            .with_friction(0.0)
            .with_velocity(velocity)
    }

    fn elastic(velocity: Vec3) -> RigidBody {
        ball(velocity).with_restitution(1.0, RestitutionCombine::Ignore)
    }

    fn velocity(scene: &Scene, handle: BodyHandle) -> Vec3 {
        scene.body(handle).map(|b| b.linear_velocity).unwrap()
    }

    // --- Registration ----------------------------------------------------------

    #[test]
    fn test_enable_applies_next_tick() {
        let mut scene = Scene::new();
        let a = scene.spawn(ball(Vec3::X), Vec3::ZERO);
        let mut solver = Solver::new(cfg(3));
        solver.request_enable(a);
        assert!(!solver.is_simulating(a));
        assert!(solver.has_bodies());
        solver.tick(&mut scene, 0.1);
        assert!(solver.is_simulating(a));
        assert_eq!(scene.body(a).unwrap().state(), SimulationState::Simulating);
        assert_eq!(solver.active_bodies(), &[a]);
    }

    #[test]
    fn test_disable_then_enable_same_frame_stays_disabled() {
        let mut scene = Scene::new();
        let a = scene.spawn(ball(Vec3::X), Vec3::ZERO);
        let mut solver = Solver::new(cfg(3));
        solver.request_enable(a);
        solver.tick(&mut scene, 0.1);

        solver.request_disable(a);
        solver.request_enable(a);
        solver.tick(&mut scene, 0.1);
        assert!(!solver.is_simulating(a));
        assert_eq!(scene.body(a).unwrap().state(), SimulationState::Stopped);
        assert!(!solver.has_bodies());
    }

    #[test]
    fn test_enable_then_disable_same_frame_never_simulates() {
        let mut scene = Scene::new();
        let a = scene.spawn(ball(Vec3::X), Vec3::ZERO);
        let mut solver = Solver::new(cfg(3));
        solver.request_enable(a);
        solver.request_disable(a);
        solver.tick(&mut scene, 0.1);
        assert!(!solver.is_simulating(a));
        assert!(solver.last_frame_reports().is_empty());
        assert_eq!(scene.position(a), Some(Vec3::ZERO));
    }

    #[test]
    fn test_gravity_applied_on_registration() {
        let mut scene = Scene::new();
        let a = scene.spawn(RigidBody::new(1.0).with_gravity(1.0), Vec3::new(0.0, 0.0, 100.0));
        let mut solver = Solver::new(SolverConfig {
            gravity: 20.0,
            ..Default::default()
        });
        solver.request_enable(a);
        solver.tick(&mut scene, 0.5);
        assert_eq!(scene.body(a).unwrap().gravity, 20.0);
        assert_abs_diff_eq!(velocity(&scene, a).z, -10.0, epsilon = 1e-4);
        // Verlet displacement: 0.5 * 20 * 0.5^2
        assert_abs_diff_eq!(scene.position(a).unwrap().z, 97.5, epsilon = 1e-3);
    }

    // --- Sub-stepping ----------------------------------------------------------

    #[test]
    fn test_floor_bounce_reinjects_remaining_time() {
        let mut scene = Scene::new();
        scene.add_static(StaticCollider::plane(Vec3::Z, 0.0));
        let body = ball(Vec3::new(0.0, 0.0, -10.0)).with_restitution(0.6, RestitutionCombine::Average);
        let a = scene.spawn(body, Vec3::new(0.0, 0.0, 6.0));
        let mut solver = Solver::new(cfg(1));
        solver.request_enable(a);
        solver.tick(&mut scene, 1.0);

        let v = velocity(&scene, a);
        assert_abs_diff_eq!(v.z, 6.0, epsilon = 1e-4);
        assert_abs_diff_eq!(v.x, 0.0, epsilon = 1e-6);
        let report = solver.report_for(a).unwrap();
        assert_eq!(report.iterations, 1);
        assert_eq!(report.impacts, 1);
        assert_eq!(report.outcome, StepOutcome::Completed);
        assert_abs_diff_eq!(report.remaining_time, 0.5, epsilon = 1e-5);
        assert_abs_diff_eq!(scene.position(a).unwrap().z, 1.0, epsilon = 1e-4);

        let body = scene.body(a).unwrap();
        assert_abs_diff_eq!(body.previous_hit_time, 0.5, epsilon = 1e-5);
        assert_eq!(body.previous_hit_normal, Vec3::Z);
        assert!(body.last_hit.is_some());
        assert!(matches!(
            scene.events(),
            [SceneEvent::Bounced { target: HitTarget::StaticSurface, .. }]
        ));
    }

    #[test]
    fn test_floor_bounce_uses_remaining_time() {
        let mut scene = Scene::new();
        scene.add_static(StaticCollider::plane(Vec3::Z, 0.0));
        let body = ball(Vec3::new(0.0, 0.0, -10.0)).with_restitution(0.6, RestitutionCombine::Average);
        let a = scene.spawn(body, Vec3::new(0.0, 0.0, 6.0));
        let mut solver = Solver::new(cfg(3));
        solver.request_enable(a);
        solver.tick(&mut scene, 1.0);

        let report = solver.report_for(a).unwrap();
        assert_eq!(report.iterations, 2);
        assert!(report.remaining_time < MIN_TICK_TIME);
        // Half a second down to the floor, then half a second up at 6
        assert_abs_diff_eq!(scene.position(a).unwrap().z, 4.0, epsilon = 1e-3);
    }

    #[test]
    fn test_iteration_cap_between_close_walls() {
        let mut scene = Scene::new();
        scene.add_static(StaticCollider::plane(Vec3::NEG_X, -1.0));
        scene.add_static(StaticCollider::plane(Vec3::X, -1.0));
        let a = scene.spawn(elastic(Vec3::new(100.0, 0.0, 0.0)).with_radius(0.25), Vec3::ZERO);
        let mut solver = Solver::new(cfg(4));
        solver.request_enable(a);
        solver.tick(&mut scene, 1.0);

        let report = solver.report_for(a).unwrap();
        assert_eq!(report.iterations, 4);
        assert_eq!(report.impacts, 4);
        assert!(report.remaining_time > 0.0);
        assert_eq!(report.outcome, StepOutcome::Completed);
        assert_abs_diff_eq!(velocity(&scene, a).length(), 100.0, epsilon = 1e-2);
        assert_eq!(solver.debug_stats().sub_steps, 4);
    }

    #[test]
    fn test_bounce_additional_iterations_extend_cap() {
        let mut scene = Scene::new();
        scene.add_static(StaticCollider::plane(Vec3::NEG_X, -1.0));
        scene.add_static(StaticCollider::plane(Vec3::X, -1.0));
        let mut body = elastic(Vec3::new(100.0, 0.0, 0.0)).with_radius(0.25);
        body.bounce_additional_iterations = 2;
        let a = scene.spawn(body, Vec3::ZERO);
        let mut solver = Solver::new(cfg(4));
        solver.request_enable(a);
        solver.tick(&mut scene, 1.0);

        let report = solver.report_for(a).unwrap();
        assert_eq!(report.iterations, 4);
        assert_eq!(report.impacts, 6);
        assert_eq!(solver.debug_stats().sub_steps, 6);
    }

    #[test]
    fn test_pending_force_consumed_once() {
        let mut scene = Scene::new();
        let a = scene.spawn(ball(Vec3::ZERO), Vec3::ZERO);
        scene.body_mut(a).unwrap().add_force(Vec3::new(10.0, 0.0, 0.0));
        let mut solver = Solver::new(cfg(3));
        solver.request_enable(a);
        solver.tick(&mut scene, 1.0);
        assert_abs_diff_eq!(velocity(&scene, a).x, 10.0, epsilon = 1e-4);
        assert_eq!(scene.body(a).unwrap().pending_force(), Vec3::ZERO);

        solver.tick(&mut scene, 1.0);
        assert_abs_diff_eq!(velocity(&scene, a).x, 10.0, epsilon = 1e-4);
    }

    #[test]
    fn test_velocity_synced_to_host() {
        let mut scene = Scene::new();
        let a = scene.spawn(ball(Vec3::new(3.0, 0.0, 0.0)), Vec3::ZERO);
        let mut solver = Solver::new(cfg(3));
        solver.request_enable(a);
        solver.tick(&mut scene, 0.1);
        assert_eq!(scene.entry(a).unwrap().synced_velocity, Vec3::new(3.0, 0.0, 0.0));
    }

    // --- Stopping --------------------------------------------------------------

    #[test]
    fn test_damping_auto_stop_notifies_once() {
        let mut scene = Scene::new();
        let body = ball(Vec3::new(0.02, 0.0, 0.0)).with_damping(75.0, 0.0);
        let a = scene.spawn(body, Vec3::ZERO);
        let mut solver = Solver::new(cfg(3));
        solver.request_enable(a);
        solver.tick(&mut scene, 1.0);

        assert_eq!(velocity(&scene, a), Vec3::ZERO);
        assert_eq!(solver.report_for(a).unwrap().outcome, StepOutcome::Stopped);
        assert_eq!(solver.debug_stats().stopped, 1);
        // Still registered until the next frame boundary
        assert!(solver.is_simulating(a));

        solver.tick(&mut scene, 1.0);
        solver.tick(&mut scene, 1.0);
        assert!(!solver.is_simulating(a));
        assert_eq!(scene.body(a).unwrap().state(), SimulationState::Stopped);
        let stops = scene
            .events()
            .iter()
            .filter(|e| matches!(e, SceneEvent::Stopped { handle } if *handle == a))
            .count();
        assert_eq!(stops, 1);
    }

    #[test]
    fn test_thrown_body_keeps_falling_past_apex() {
        let mut scene = Scene::new();
        // Reaches zero vertical speed exactly at the end of the first frame
        let body = RigidBody::new(1.0).with_gravity(1.0).with_velocity(Vec3::new(0.0, 0.0, 0.981));
        let a = scene.spawn(body, Vec3::ZERO);
        let mut solver = Solver::new(cfg(3));
        solver.request_enable(a);
        for _ in 0..20 {
            solver.tick(&mut scene, 0.1);
        }

        // z = 0.981*2 - 0.5*9.81*2^2
        assert_abs_diff_eq!(scene.position(a).unwrap().z, -17.658, epsilon = 1e-2);
        assert!(solver.is_simulating(a));
        assert_eq!(solver.report_for(a).unwrap().outcome, StepOutcome::Completed);
        assert!(scene.events().iter().all(|e| !matches!(e, SceneEvent::Stopped { .. })));
    }

    #[test]
    fn test_sliding_on_floor_makes_progress() {
        let mut scene = Scene::new();
        scene.add_static(StaticCollider::plane(Vec3::Z, 0.0));
        let body = RigidBody::new(1.0)
            .with_gravity(1.0)
            .with_friction(0.2)
            .with_restitution(0.0, RestitutionCombine::Ignore)
            .with_velocity(Vec3::new(5.0, 0.0, 0.0));
        let a = scene.spawn(body, Vec3::new(0.0, 0.0, 1.0));
        let mut solver = Solver::new(cfg(3));
        solver.request_enable(a);
        for _ in 0..5 {
            solver.tick(&mut scene, 0.1);
        }

        // Friction takes a fifth of the tangential speed per contact frame:
        // 0.5 + 0.4 + 0.32 + 0.256 + 0.2048
        let p = scene.position(a).unwrap();
        assert_abs_diff_eq!(p.x, 1.6808, epsilon = 1e-2);
        assert_abs_diff_eq!(p.z, 1.0, epsilon = 1e-4);
        assert!(velocity(&scene, a).x < 5.0);
        assert!(solver.is_simulating(a));
    }

    #[test]
    fn test_kill_volume_aborts_and_drops_body() {
        let mut scene = Scene::new();
        scene.add_static(
            StaticCollider::aabb(Vec3::new(-5.0, -5.0, -2.0), Vec3::new(5.0, 5.0, 0.0)).kill_volume(),
        );
        let a = scene.spawn(ball(Vec3::new(0.0, 0.0, -10.0)), Vec3::new(0.0, 0.0, 3.0));
        let mut solver = Solver::new(cfg(3));
        solver.request_enable(a);
        solver.tick(&mut scene, 1.0);

        assert_eq!(solver.report_for(a).unwrap().outcome, StepOutcome::Aborted);
        assert!(scene.events().iter().all(|e| !matches!(e, SceneEvent::Bounced { .. })));

        solver.tick(&mut scene, 1.0);
        assert_eq!(solver.debug_stats().skipped, 1);
        solver.tick(&mut scene, 1.0);
        assert!(!solver.is_simulating(a));
        assert!(!solver.has_bodies());
    }

    #[test]
    fn test_skip_and_external_physics_release_bodies() {
        let mut scene = Scene::new();
        let a = scene.spawn(ball(Vec3::X), Vec3::ZERO);
        let b = scene.spawn(ball(Vec3::X), Vec3::new(0.0, 10.0, 0.0));
        scene.set_skip_update(a, true);
        scene.set_external_physics(b, true);
        let mut solver = Solver::new(cfg(3));
        solver.request_enable(a);
        solver.request_enable(b);
        solver.tick(&mut scene, 1.0);

        let stats = solver.debug_stats();
        assert_eq!(stats.active, 2);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.simulated, 0);
        assert_eq!(scene.position(a), Some(Vec3::ZERO));

        solver.tick(&mut scene, 1.0);
        assert!(!solver.is_simulating(a));
        assert!(!solver.is_simulating(b));
        assert!(scene.events().is_empty());
    }

    // --- Pairs -----------------------------------------------------------------

    #[test]
    fn test_head_on_equal_masses_swap() {
        let mut scene = Scene::new();
        let a = scene.spawn(elastic(Vec3::new(2.0, 0.0, 0.0)), Vec3::new(-2.5, 0.0, 0.0));
        let b = scene.spawn(elastic(Vec3::new(-2.0, 0.0, 0.0)), Vec3::new(2.5, 0.0, 0.0));
        let mut solver = Solver::new(cfg(3));
        solver.request_enable(a);
        solver.request_enable(b);
        solver.tick(&mut scene, 1.0);

        let va = velocity(&scene, a);
        let vb = velocity(&scene, b);
        assert_abs_diff_eq!(va.x, -2.0, epsilon = 1e-4);
        assert_abs_diff_eq!(vb.x, 2.0, epsilon = 1e-4);
        assert_abs_diff_eq!(va.y, 0.0, epsilon = 1e-6);
        assert_eq!(solver.debug_stats().pair_collisions, 1);
        assert_eq!(scene.body(a).unwrap().angular_velocity, Vec3::ZERO);
    }

    #[test]
    fn test_externally_simulated_partner_is_scenery() {
        let mut scene = Scene::new();
        let b = scene.spawn(elastic(Vec3::ZERO), Vec3::new(0.5, 0.0, 0.0));
        let a = scene.spawn(elastic(Vec3::new(2.0, 0.0, 0.0)), Vec3::new(-2.5, 0.0, 0.0));
        scene.set_external_physics(b, true);
        let mut solver = Solver::new(cfg(3));
        // b is iterated first, so its release is already queued when a strikes it
        solver.request_enable(b);
        solver.request_enable(a);
        solver.tick(&mut scene, 1.0);

        assert_eq!(velocity(&scene, b), Vec3::ZERO);
        assert_abs_diff_eq!(velocity(&scene, a).x, -2.0, epsilon = 1e-4);
        assert_eq!(solver.debug_stats().pair_collisions, 0);
        assert!(matches!(
            scene.events(),
            [SceneEvent::Bounced { target: HitTarget::Body(_), .. }]
        ));

        solver.tick(&mut scene, 1.0);
        assert!(!solver.is_simulating(b));
        assert_eq!(velocity(&scene, b), Vec3::ZERO);
        assert_eq!(scene.position(b), Some(Vec3::new(0.5, 0.0, 0.0)));
    }

    #[test]
    fn test_struck_resting_body_wakes() {
        let mut scene = Scene::new();
        let a = scene.spawn(elastic(Vec3::new(2.0, 0.0, 0.0)), Vec3::new(-2.5, 0.0, 0.0));
        let b = scene.spawn(elastic(Vec3::ZERO), Vec3::new(0.5, 0.0, 0.0));
        let mut solver = Solver::new(cfg(3));
        solver.request_enable(a);
        solver.tick(&mut scene, 1.0);

        // All momentum handed over; the striker comes to rest
        assert_eq!(velocity(&scene, a), Vec3::ZERO);
        assert_abs_diff_eq!(velocity(&scene, b).x, 2.0, epsilon = 1e-4);
        assert!(!solver.is_simulating(b));

        solver.tick(&mut scene, 1.0);
        assert!(solver.is_simulating(b));
        assert!(!solver.is_simulating(a));
        assert!(scene.position(b).unwrap().x > 0.5);
    }

    // --- Scripted host ---------------------------------------------------------

    /// Host that replays canned move results and never moves anything.
    #[derive(Default)]
    struct ScriptedHost {
        bodies: HashMap<BodyHandle, (RigidBody, Vec3)>,
        moves: HashMap<BodyHandle, VecDeque<HitResult>>,
        no_radius: HashSet<BodyHandle>,
        destroy_on_move: Option<BodyHandle>,
        bounces: Vec<(BodyHandle, Vec3, Vec3)>,
        stops: Vec<BodyHandle>,
    }

    impl ScriptedHost {
        fn add(&mut self, index: u32, body: RigidBody, position: Vec3) -> BodyHandle {
            let handle = BodyHandle::new(index, 0);
            self.bodies.insert(handle, (body, position));
            handle
        }

        fn script(&mut self, handle: BodyHandle, hits: impl IntoIterator<Item = HitResult>) {
            self.moves.entry(handle).or_default().extend(hits);
        }

        fn velocity(&self, handle: BodyHandle) -> Vec3 {
            self.bodies[&handle].0.linear_velocity
        }
    }

    impl SimulationHost for ScriptedHost {
        fn body(&self, handle: BodyHandle) -> Option<&RigidBody> {
            self.bodies.get(&handle).map(|(b, _)| b)
        }

        fn body_mut(&mut self, handle: BodyHandle) -> Option<&mut RigidBody> {
            self.bodies.get_mut(&handle).map(|(b, _)| b)
        }

        fn is_valid(&self, handle: BodyHandle) -> bool {
            self.bodies.contains_key(&handle)
        }

        fn position(&self, handle: BodyHandle) -> Option<Vec3> {
            self.bodies.get(&handle).map(|(_, p)| *p)
        }

        fn collision_radius(&self, handle: BodyHandle) -> Option<f32> {
            if self.no_radius.contains(&handle) {
                return None;
            }
            self.bodies.get(&handle).map(|(b, _)| b.radius)
        }

        fn move_body(&mut self, handle: BodyHandle, _delta: Vec3, _rotation: Quat) -> HitResult {
            if self.destroy_on_move == Some(handle) {
                self.bodies.remove(&handle);
            }
            self.moves
                .get_mut(&handle)
                .and_then(|q| q.pop_front())
                .unwrap_or_else(HitResult::none)
        }

        fn on_bounce(&mut self, handle: BodyHandle, _hit: &HitResult, before: Vec3, after: Vec3) {
            self.bounces.push((handle, before, after));
        }

        fn on_simulation_stopped(&mut self, handle: BodyHandle) {
            self.stops.push(handle);
        }
    }

    #[test]
    fn test_reciprocal_hit_reuses_memo() {
        let mut host = ScriptedHost::default();
        let a = host.add(0, elastic(Vec3::new(1.0, 0.0, 0.0)), Vec3::ZERO);
        let b = host.add(1, elastic(Vec3::new(-1.0, 0.0, 0.0)), Vec3::new(2.0, 0.0, 0.0));
        let contact = Vec3::new(1.0, 0.0, 0.0);
        host.script(a, [HitResult::blocking(0.5, contact, Vec3::NEG_X, HitTarget::Body(b))]);
        host.script(b, [HitResult::blocking(0.5, contact, Vec3::X, HitTarget::Body(a))]);

        let mut solver = Solver::new(cfg(1));
        solver.request_enable(a);
        solver.request_enable(b);
        solver.tick(&mut host, 1.0);

        let stats = solver.debug_stats();
        assert_eq!(stats.pair_collisions, 1);
        assert_eq!(stats.memo_hits, 1);
        assert_abs_diff_eq!(host.velocity(a).x, -1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(host.velocity(b).x, 1.0, epsilon = 1e-5);
        assert_eq!(host.bounces.len(), 2);

        // The reused result still reports b's velocity from before the pair resolved
        let (handle, before, after) = host.bounces[1];
        assert_eq!(handle, b);
        assert_abs_diff_eq!(before.x, -1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(after.x, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_memo_cleared_between_ticks() {
        let mut host = ScriptedHost::default();
        let a = host.add(0, elastic(Vec3::new(1.0, 0.0, 0.0)), Vec3::ZERO);
        let b = host.add(1, elastic(Vec3::new(-1.0, 0.0, 0.0)), Vec3::new(2.0, 0.0, 0.0));
        let contact = Vec3::new(1.0, 0.0, 0.0);
        host.script(a, [HitResult::blocking(0.5, contact, Vec3::NEG_X, HitTarget::Body(b))]);

        let mut solver = Solver::new(cfg(1));
        solver.request_enable(a);
        solver.request_enable(b);
        solver.tick(&mut host, 1.0);
        host.script(b, [HitResult::blocking(0.5, contact, Vec3::X, HitTarget::Body(a))]);
        solver.tick(&mut host, 1.0);

        assert_eq!(solver.debug_stats().memo_hits, 0);
        assert_eq!(solver.debug_stats().pair_collisions, 1);
    }

    #[test]
    fn test_missing_radius_falls_back_to_bounce() {
        let mut host = ScriptedHost::default();
        let a = host.add(0, elastic(Vec3::new(1.0, 0.0, 0.0)), Vec3::ZERO);
        let b = host.add(1, elastic(Vec3::new(-1.0, 0.0, 0.0)), Vec3::new(2.0, 0.0, 0.0));
        host.no_radius.insert(b);
        host.script(a, [HitResult::blocking(
            0.5,
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::NEG_X,
            HitTarget::Body(b),
        )]);

        let mut solver = Solver::new(cfg(1));
        solver.request_enable(a);
        solver.tick(&mut host, 1.0);

        assert_abs_diff_eq!(host.velocity(a).x, -1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(host.velocity(b).x, -1.0, epsilon = 1e-5);
        assert_eq!(solver.debug_stats().pair_collisions, 0);
        assert!(!solver.is_simulating(b));
    }

    #[test]
    fn test_penetration_aborts_without_bounce() {
        let mut host = ScriptedHost::default();
        let a = host.add(0, ball(Vec3::new(0.0, 0.0, -5.0)), Vec3::ZERO);
        host.script(a, [HitResult::penetrating(Vec3::ZERO, Vec3::Z, HitTarget::StaticSurface)]);

        let mut solver = Solver::new(cfg(3));
        solver.request_enable(a);
        solver.tick(&mut host, 1.0);

        let report = solver.report_for(a).unwrap();
        assert_eq!(report.outcome, StepOutcome::Aborted);
        assert_eq!(report.iterations, 1);
        assert!(host.bounces.is_empty());
        assert!(host.stops.is_empty());
        assert_eq!(host.velocity(a), Vec3::new(0.0, 0.0, -5.0));
        // Stuck bodies keep their registration
        solver.tick(&mut host, 1.0);
        assert!(solver.is_simulating(a));
    }

    #[test]
    fn test_destroyed_during_move_aborts() {
        let mut host = ScriptedHost::default();
        let a = host.add(0, ball(Vec3::X), Vec3::ZERO);
        let b = host.add(1, ball(Vec3::X), Vec3::new(0.0, 5.0, 0.0));
        host.destroy_on_move = Some(a);

        let mut solver = Solver::new(cfg(3));
        solver.request_enable(a);
        solver.request_enable(b);
        solver.tick(&mut host, 1.0);

        assert_eq!(solver.report_for(a).unwrap().outcome, StepOutcome::Aborted);
        assert_eq!(solver.report_for(b).unwrap().outcome, StepOutcome::Completed);
        let stats = solver.debug_stats();
        assert_eq!(stats.simulated, 2);
        assert_eq!(stats.aborted, 1);

        solver.tick(&mut host, 1.0);
        solver.tick(&mut host, 1.0);
        assert!(!solver.is_simulating(a));
        assert!(solver.is_simulating(b));
    }

    #[test]
    fn test_timing_only_when_enabled() {
        let mut scene = Scene::new();
        let a = scene.spawn(ball(Vec3::X), Vec3::ZERO);
        let mut solver = Solver::new(cfg(3));
        solver.request_enable(a);
        solver.tick(&mut scene, 0.1);
        assert!(solver.timing().is_none());

        let mut solver = Solver::new(SolverConfig {
            enable_timing: true,
            ..Default::default()
        });
        solver.request_enable(a);
        solver.tick(&mut scene, 0.1);
        assert!(solver.timing().is_some());
    }
}

use glam::{Quat, Vec3};
use log::debug;

use crate::api::{NarrowphaseApi, SimulationHost};
use crate::body::RigidBody;
use crate::narrowphase::Narrowphase;
use crate::types::*;

/// Immovable geometry the scene's bodies sweep against.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum StaticShape {
    /// Points `p` with `normal.dot(p) == dist`; solid behind the normal.
    Plane { normal: Vec3, dist: f32 },
    Aabb { min: Vec3, max: Vec3 },
    Sphere { center: Vec3, radius: f32 },
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct StaticCollider {
    pub shape: StaticShape,
    /// Touching this destroys the body (kill volume).
    pub destroys_on_contact: bool,
}

impl StaticCollider {
    pub fn plane(normal: Vec3, dist: f32) -> Self {
        Self::from_shape(StaticShape::Plane { normal: normal.normalize_or_zero(), dist })
    }

    pub fn aabb(min: Vec3, max: Vec3) -> Self {
        Self::from_shape(StaticShape::Aabb { min: min.min(max), max: min.max(max) })
    }

    pub fn sphere(center: Vec3, radius: f32) -> Self {
        Self::from_shape(StaticShape::Sphere { center, radius })
    }

    pub fn kill_volume(mut self) -> Self {
        self.destroys_on_contact = true;
        self
    }

    fn from_shape(shape: StaticShape) -> Self {
        Self { shape, destroys_on_contact: false }
    }

    fn sweep(&self, c: Vec3, r: f32, delta: Vec3) -> Option<SweepHit> {
        match self.shape {
            StaticShape::Plane { normal, dist } => Narrowphase::sweep_sphere_plane(c, r, delta, normal, dist),
            StaticShape::Aabb { min, max } => Narrowphase::sweep_sphere_aabb(c, r, delta, min, max),
            StaticShape::Sphere { center, radius } => {
                Narrowphase::sweep_sphere_sphere(c, r, delta, center, radius)
            }
        }
    }
}

/// Something the scene reported to its observers.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum SceneEvent {
    Bounced {
        handle: BodyHandle,
        target: HitTarget,
        before: Vec3,
        after: Vec3,
    },
    Stopped { handle: BodyHandle },
    Destroyed { handle: BodyHandle },
}

/// A body placed in the scene.
#[derive(Clone, Debug)]
pub struct SceneBody {
    pub body: RigidBody,
    pub position: Vec3,
    pub orientation: Quat,
    /// Last velocity pushed out by the solver at the end of a tick.
    pub synced_velocity: Vec3,
    pub destroyed: bool,
    pub skip_update: bool,
    pub external_physics: bool,
    /// Bodies without a collision radius still sweep as points but cannot
    /// take part in pairwise collisions.
    pub has_collision_radius: bool,
}

struct Slot {
    generation: u32,
    entry: Option<SceneBody>,
}

/// Minimal in-process world of spheres and static colliders.
pub struct Scene {
    slots: Vec<Slot>,
    free: Vec<u32>,
    statics: Vec<StaticCollider>,
    events: Vec<SceneEvent>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            statics: Vec::new(),
            events: Vec::new(),
        }
    }

    // --- Population --------------------------------------------------------

    pub fn spawn(&mut self, body: RigidBody, position: Vec3) -> BodyHandle {
        let entry = SceneBody {
            body,
            position,
            orientation: Quat::IDENTITY,
            synced_velocity: Vec3::ZERO,
            destroyed: false,
            skip_update: false,
            external_physics: false,
            has_collision_radius: true,
        };
        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                BodyHandle::new(index, slot.generation)
            }
            None => {
                self.slots.push(Slot { generation: 0, entry: Some(entry) });
                BodyHandle::new(self.slots.len() as u32 - 1, 0)
            }
        };
        debug!("[Scene] spawned {:?} at {:?}", handle, position);
        handle
    }

    /// Remove a body and retire its handle.
    pub fn despawn(&mut self, handle: BodyHandle) -> Option<RigidBody> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        Some(entry.body)
    }

    pub fn add_static(&mut self, collider: StaticCollider) -> usize {
        self.statics.push(collider);
        self.statics.len() - 1
    }

    /// Mark a body destroyed; it stays in its slot but no longer resolves.
    pub fn destroy(&mut self, handle: BodyHandle) {
        let newly_destroyed = match self.entry_mut(handle) {
            Some(entry) if !entry.destroyed => {
                entry.destroyed = true;
                true
            }
            _ => false,
        };
        if newly_destroyed {
            self.events.push(SceneEvent::Destroyed { handle });
        }
    }

    // --- Access ------------------------------------------------------------

    pub fn entry(&self, handle: BodyHandle) -> Option<&SceneBody> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    pub fn entry_mut(&mut self, handle: BodyHandle) -> Option<&mut SceneBody> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    /// Handles of every body that is still live.
    pub fn handles(&self) -> Vec<BodyHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.entry.as_ref().is_some_and(|e| !e.destroyed))
            .map(|(i, s)| BodyHandle::new(i as u32, s.generation))
            .collect()
    }

    pub fn set_skip_update(&mut self, handle: BodyHandle, skip: bool) {
        if let Some(entry) = self.entry_mut(handle) {
            entry.skip_update = skip;
        }
    }

    pub fn set_external_physics(&mut self, handle: BodyHandle, enabled: bool) {
        if let Some(entry) = self.entry_mut(handle) {
            entry.external_physics = enabled;
        }
    }

    pub fn events(&self) -> &[SceneEvent] {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<SceneEvent> {
        std::mem::take(&mut self.events)
    }

    fn live(&self, handle: BodyHandle) -> Option<&SceneBody> {
        self.entry(handle).filter(|e| !e.destroyed)
    }

    /// Earliest contact for a sphere sweeping from `c` along `delta`,
    /// ignoring the body `skip`.
    fn earliest_contact(&self, skip: BodyHandle, c: Vec3, r: f32, delta: Vec3) -> Option<(SweepHit, Contact)> {
        let mut best: Option<(SweepHit, Contact)> = None;
        let mut consider = |hit: SweepHit, contact: Contact| {
            let closer = match &best {
                None => true,
                Some((b, _)) => hit.toi < b.toi || (hit.started_penetrating && !b.started_penetrating),
            };
            if closer {
                best = Some((hit, contact));
            }
        };

        for (i, s) in self.statics.iter().enumerate() {
            if let Some(hit) = s.sweep(c, r, delta) {
                consider(hit, Contact::Static(i));
            }
        }
        for (i, slot) in self.slots.iter().enumerate() {
            let Some(other) = slot.entry.as_ref() else { continue };
            let handle = BodyHandle::new(i as u32, slot.generation);
            if handle == skip || other.destroyed {
                continue;
            }
            if let Some(hit) =
                Narrowphase::sweep_sphere_sphere(c, r, delta, other.position, other.body.radius.max(0.0))
            {
                consider(hit, Contact::Body(handle));
            }
        }
        best
    }

    /// Hit target for a contact, and whether touching it is fatal.
    fn classify(&self, contact: Contact) -> (HitTarget, bool) {
        match contact {
            Contact::Static(i) => (HitTarget::StaticSurface, self.statics[i].destroys_on_contact),
            Contact::Body(other) => (HitTarget::Body(other), false),
        }
    }
}

#[derive(Copy, Clone, Debug)]
enum Contact {
    Static(usize),
    Body(BodyHandle),
}

impl SimulationHost for Scene {
    fn body(&self, handle: BodyHandle) -> Option<&RigidBody> {
        self.live(handle).map(|e| &e.body)
    }

    fn body_mut(&mut self, handle: BodyHandle) -> Option<&mut RigidBody> {
        self.entry_mut(handle).filter(|e| !e.destroyed).map(|e| &mut e.body)
    }

    fn is_valid(&self, handle: BodyHandle) -> bool {
        self.live(handle).is_some()
    }

    fn position(&self, handle: BodyHandle) -> Option<Vec3> {
        self.live(handle).map(|e| e.position)
    }

    fn collision_radius(&self, handle: BodyHandle) -> Option<f32> {
        self.live(handle)
            .filter(|e| e.has_collision_radius)
            .map(|e| e.body.radius)
    }

    fn should_skip_update(&self, handle: BodyHandle, _dt: f32) -> bool {
        self.live(handle).is_some_and(|e| e.skip_update)
    }

    fn is_simulating_physics(&self, handle: BodyHandle) -> bool {
        self.live(handle).is_some_and(|e| e.external_physics)
    }

    fn move_body(&mut self, handle: BodyHandle, delta: Vec3, rotation: Quat) -> HitResult {
        let Some(entry) = self.live(handle) else {
            return HitResult::none();
        };
        let (c, r) = (entry.position, entry.body.radius.max(0.0));
        let mut delta = delta;
        let mut contact = self.earliest_contact(handle, c, r, delta);

        // Already touching a surface and pushing into it: slide along it
        // instead of reporting a zero-length move.
        let mut resting_on = None;
        if let Some((hit, found)) = contact {
            if hit.toi <= 0.0 && !hit.started_penetrating {
                let slide = delta - hit.normal * hit.normal.dot(delta).min(0.0);
                if slide.length_squared() > f32::EPSILON {
                    resting_on = Some((hit, found));
                    delta = slide;
                    contact = self.earliest_contact(handle, c, r, slide);
                }
            }
        }

        let (fraction, result, kill) = match (contact, resting_on) {
            (Some((hit, found)), _) => {
                let (target, kill) = self.classify(found);
                let result = if hit.started_penetrating {
                    HitResult::penetrating(hit.contact, hit.normal, target)
                } else {
                    HitResult::blocking(hit.toi, hit.contact, hit.normal, target)
                };
                (result.time, result, kill)
            }
            // The whole slide is free; still report the supporting surface
            (None, Some((hit, found))) => {
                let (target, kill) = self.classify(found);
                let result = HitResult::blocking(1.0, hit.contact + delta, hit.normal, target);
                (1.0, result, kill)
            }
            (None, None) => (1.0, HitResult::none(), false),
        };

        if let Some(entry) = self.entry_mut(handle) {
            entry.position = c + delta * fraction;
            let turned = Quat::IDENTITY.slerp(rotation, fraction);
            entry.orientation = (turned * entry.orientation).normalize();
        }
        if kill {
            debug!("[Scene] {:?} entered a kill volume", handle);
            self.destroy(handle);
        }
        result
    }

    fn sync_velocity(&mut self, handle: BodyHandle) {
        if let Some(entry) = self.entry_mut(handle) {
            entry.synced_velocity = entry.body.linear_velocity;
        }
    }

    fn on_bounce(&mut self, handle: BodyHandle, hit: &HitResult, before: Vec3, after: Vec3) {
        self.events.push(SceneEvent::Bounced {
            handle,
            target: hit.target,
            before,
            after,
        });
    }

    fn on_simulation_stopped(&mut self, handle: BodyHandle) {
        self.events.push(SceneEvent::Stopped { handle });
    }
}

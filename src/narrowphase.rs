use glam::Vec3;

use crate::api::NarrowphaseApi;
use crate::types::*;

/// Overlap deeper than this at the start of a sweep counts as penetration.
/// Anything shallower is treated as touching, so a body resting exactly on a
/// surface can still slide or lift off it.
pub const CONTACT_TOLERANCE: f32 = 1e-3;

/// Sphere sweeps (and the box ray they build on) for the reference scene.
pub struct Narrowphase;

impl NarrowphaseApi for Narrowphase {
    fn ray_aabb(origin: Vec3, dir: Vec3, aabb_min: Vec3, aabb_max: Vec3) -> Option<SweepHit> {
        // Slab method with normal tracking; returns earliest t >= 0
        let mut tmin = f32::NEG_INFINITY;
        let mut tmax = f32::INFINITY;
        let mut n_enter = Vec3::ZERO;

        for axis in 0..3 {
            let o = origin[axis];
            let d = dir[axis];
            if d.abs() < f32::EPSILON {
                if o < aabb_min[axis] || o > aabb_max[axis] {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / d;
            let mut t1 = (aabb_min[axis] - o) * inv;
            let mut t2 = (aabb_max[axis] - o) * inv;
            let mut sign = -1.0;
            if t1 > t2 {
                core::mem::swap(&mut t1, &mut t2);
                sign = 1.0;
            }
            if t1 > tmin {
                tmin = t1;
                n_enter = Vec3::ZERO;
                n_enter[axis] = sign;
            }
            if t2 < tmax {
                tmax = t2;
            }
            if tmin > tmax {
                return None;
            }
        }

        if tmax < 0.0 {
            return None;
        }

        // Origin inside the box: immediate hit with no meaningful normal
        let inside = tmin < 0.0;
        let toi = if inside { 0.0 } else { tmin };
        Some(SweepHit {
            toi,
            normal: if inside { Vec3::ZERO } else { n_enter },
            contact: origin + dir * toi,
            started_penetrating: inside,
        })
    }

    fn sweep_sphere_plane(c: Vec3, r: f32, delta: Vec3, normal: Vec3, dist: f32) -> Option<SweepHit> {
        let s0 = normal.dot(c) - dist;
        // Fully behind the plane: nothing to hit from this side
        if s0 <= -r {
            return None;
        }
        if s0 < r - CONTACT_TOLERANCE {
            return Some(SweepHit {
                toi: 0.0,
                normal,
                contact: c - normal * s0,
                started_penetrating: true,
            });
        }
        let approach = normal.dot(delta);
        if approach >= 0.0 {
            return None;
        }
        let toi = ((r - s0) / approach).max(0.0);
        if toi > 1.0 {
            return None;
        }
        let center_at_hit = c + delta * toi;
        Some(SweepHit {
            toi,
            normal,
            contact: center_at_hit - normal * r,
            started_penetrating: false,
        })
    }

    fn sweep_sphere_sphere(c0: Vec3, r0: f32, delta: Vec3, c1: Vec3, r1: f32) -> Option<SweepHit> {
        let rsum = r0 + r1;
        let m = c0 - c1;
        let dist2 = m.length_squared();
        let inner = (rsum - CONTACT_TOLERANCE).max(0.0);
        if dist2 < inner * inner {
            let normal = m.try_normalize().unwrap_or(-delta.normalize_or_zero());
            return Some(SweepHit {
                toi: 0.0,
                normal,
                contact: c1 + normal * r1,
                started_penetrating: true,
            });
        }
        // Separating or parallel: the spheres only move apart
        if m.dot(delta) >= 0.0 {
            return None;
        }
        let a = delta.length_squared();
        if a <= f32::EPSILON {
            return None;
        }
        let b = 2.0 * m.dot(delta);
        let c = dist2 - rsum * rsum;
        let disc = b * b - 4.0 * a * c;
        if disc < 0.0 {
            return None;
        }
        let toi = ((-b - disc.sqrt()) / (2.0 * a)).max(0.0);
        if toi > 1.0 {
            return None;
        }
        let center_at_hit = c0 + delta * toi;
        let normal = (center_at_hit - c1).normalize_or_zero(); // from B to A
        Some(SweepHit {
            toi,
            normal,
            contact: c1 + normal * r1,
            started_penetrating: false,
        })
    }

    /// Ray against the box grown by `r` on every face. Near edges and corners
    /// this reports contact slightly early.
    fn sweep_sphere_aabb(c: Vec3, r: f32, delta: Vec3, box_min: Vec3, box_max: Vec3) -> Option<SweepHit> {
        let closest = c.clamp(box_min, box_max);
        let offset = c - closest;
        let inner = (r - CONTACT_TOLERANCE).max(0.0);
        if offset.length_squared() < inner * inner {
            let normal = offset
                .try_normalize()
                .unwrap_or_else(|| shallowest_face_normal(c, box_min, box_max));
            return Some(SweepHit {
                toi: 0.0,
                normal,
                contact: closest,
                started_penetrating: true,
            });
        }

        let rvec = Vec3::splat(r);
        let hit = Self::ray_aabb(c, delta, box_min - rvec, box_max + rvec)?;
        if hit.toi > 1.0 {
            return None;
        }
        let center_at_hit = c + delta * hit.toi;
        let normal = if hit.started_penetrating {
            // Inside the grown box but within tolerance of the real one
            offset.normalize_or_zero()
        } else {
            hit.normal
        };
        if normal.dot(delta) >= 0.0 {
            return None;
        }
        Some(SweepHit {
            toi: hit.toi,
            normal,
            contact: center_at_hit - normal * r,
            started_penetrating: false,
        })
    }
}

/// Outward normal of the box face nearest to an interior point.
fn shallowest_face_normal(p: Vec3, box_min: Vec3, box_max: Vec3) -> Vec3 {
    let mut best = f32::INFINITY;
    let mut normal = Vec3::Z;
    for axis in 0..3 {
        let to_min = p[axis] - box_min[axis];
        let to_max = box_max[axis] - p[axis];
        if to_min < best {
            best = to_min;
            normal = Vec3::ZERO;
            normal[axis] = -1.0;
        }
        if to_max < best {
            best = to_max;
            normal = Vec3::ZERO;
            normal[axis] = 1.0;
        }
    }
    normal
}

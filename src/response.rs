//! Collision response: velocity changes from a single contact.
//!
//! Everything here is a pure function of its inputs. The solver decides
//! which response applies and writes the results back.

use glam::Vec3;

use crate::body::RigidBody;
use crate::error::CollisionError;
use crate::types::*;

/// A body at the instant of contact, as seen by the response math.
#[derive(Copy, Clone, Debug)]
pub struct ContactBody<'a> {
    pub handle: BodyHandle,
    pub body: &'a RigidBody,
    /// World-space center of mass.
    pub center: Vec3,
    /// Collision radius, if the host has one for this body.
    pub radius: Option<f32>,
}

/// Bounce a body off an immovable surface.
///
/// The into-surface part of the velocity is removed, the remaining tangential
/// part loses speed to friction, and the removed part is added back scaled by
/// restitution. This is not a mirror reflection: with restitution 1 and no
/// friction the two normal terms combine to exactly reverse the normal
/// component, and with restitution 0 the body slides.
///
/// Friction's tangential impulse acting at the contact point changes the spin.
pub fn single_body_bounce(contact: &ContactBody<'_>, hit: &HitResult) -> Motion {
    let body = contact.body;
    let velocity = body.linear_velocity;
    let normal = body.constrain_normal(hit.normal);
    let v_dot_n = velocity.dot(normal);

    // Already separating.
    if v_dot_n > 0.0 {
        return body.motion();
    }

    let projected_normal = normal * -v_dot_n;
    let tangential = velocity + projected_normal;

    let friction = if body.bounce_angle_affects_friction {
        let tangential_speed = tangential.length();
        let glancing = if tangential_speed > f32::EPSILON {
            (v_dot_n.abs() / tangential_speed).clamp(body.min_friction_fraction, 1.0)
        } else {
            1.0
        };
        glancing * body.friction
    } else {
        body.friction
    };
    let slowed = tangential * (1.0 - friction).clamp(0.0, 1.0);

    let linear = body.limit_velocity(slowed + projected_normal * body.restitution.max(0.0));

    let inertia = body.moment_of_inertia();
    assert!(
        inertia > 0.0,
        "rigid body moment of inertia must be positive, got {}",
        inertia
    );
    let lever = hit.impact_point - contact.center;
    let friction_impulse = (slowed - tangential) * body.mass;
    let angular =
        body.limit_angular_velocity(body.angular_velocity + lever.cross(friction_impulse) / inertia);

    Motion::new(linear, angular)
}

/// Exchange momentum between two colliding bodies.
///
/// The contact normal runs between the centers, A to B. Each body takes its
/// share of the elastic impulse scaled by its own combined restitution, so
/// the result is asymmetric when the bodies combine differently. Each spin
/// change runs about `cross(lever, normal)` with magnitude
/// `|dot(lever, normal)| / inertia`, negated for body A so the pair spins in
/// opposite senses.
///
/// Bodies already moving apart along the normal are returned unchanged.
pub fn two_body_collision(
    a: &ContactBody<'_>,
    b: &ContactBody<'_>,
    hit: &HitResult,
) -> Result<(Motion, Motion), CollisionError> {
    let (mass_a, mass_b) = (a.body.mass, b.body.mass);
    assert!(
        mass_a > 0.0 && mass_b > 0.0,
        "rigid body masses must be positive, got {} and {}",
        mass_a,
        mass_b
    );
    if a.radius.is_none() {
        return Err(CollisionError::MissingCollisionRadius(a.handle));
    }
    if b.radius.is_none() {
        return Err(CollisionError::MissingCollisionRadius(b.handle));
    }

    let normal = (b.center - a.center).normalize_or_zero();
    if normal == Vec3::ZERO {
        return Err(CollisionError::CoincidentCenters(a.handle, b.handle));
    }

    let mut out_a = a.body.motion();
    let mut out_b = b.body.motion();

    let relative = b.body.linear_velocity - a.body.linear_velocity;
    let closing = relative.dot(normal);
    if closing >= 0.0 {
        return Ok((out_a, out_b));
    }

    let impulse = (2.0 * mass_a * mass_b / (mass_a + mass_b)) * closing;
    let restitution_a = a.body.restitution_against(b.body);
    let restitution_b = b.body.restitution_against(a.body);
    out_a.linear += normal * (restitution_a * impulse / mass_a);
    out_b.linear -= normal * (restitution_b * impulse / mass_b);

    let spin = |lever: Vec3, inertia: f32| {
        assert!(
            inertia > 0.0,
            "rigid body moment of inertia must be positive, got {}",
            inertia
        );
        lever.cross(normal).normalize_or_zero() * (lever.dot(normal).abs() / inertia)
    };
    out_a.angular -= spin(hit.impact_point - a.center, a.body.moment_of_inertia());
    out_b.angular += spin(hit.impact_point - b.center, b.body.moment_of_inertia());

    Ok((out_a, out_b))
}

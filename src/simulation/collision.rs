//! Narrow-phase collision response between two particles.
//!
//! Overlapping pairs get a mass-weighted velocity push that removes the
//! overlap over one step; before that, friction scales down each particle's
//! tangential velocity and damping its normal velocity. Pairs just outside
//! contact but inside the adhesion distance lose part of their separating
//! velocity.
//!
//! Each pair is resolved once per step: both sides record the other in
//! `collided_with`, and linked pairs are left to the link solver.

use crate::simulation::params::GroupParams;
use crate::simulation::states::{NVec3, Particle};

/// Distances below this are treated as coincident.
pub const MIN_DISTANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contact {
    None,
    Touch,
    Adhesion,
}

/// Collision between particles of these two groups is enabled.
pub fn groups_collide(a_group: usize, ga: &GroupParams, b_group: usize, gb: &GroupParams) -> bool {
    if a_group == b_group {
        ga.collision.self_collision
    } else {
        ga.collision.other_collision && gb.collision.other_collision && ga.collision.group == gb.collision.group
    }
}

/// Share of a push taken by `a` (the lighter side moves more).
pub(crate) fn mass_ratios(a: &Particle, b: &Particle) -> (f64, f64) {
    let total = a.mass + b.mass;
    if total > 0.0 {
        let ra = b.mass / total;
        (ra, 1.0 - ra)
    } else {
        (0.5, 0.5)
    }
}

/// Resolve the pair `(a, b)` and return what kind of contact it was.
pub fn collide(a: &mut Particle, b: &mut Particle, ga: &GroupParams, gb: &GroupParams, dt: f64) -> Contact {
    if a.id == b.id || !a.state.is_active() || !b.state.is_active() {
        return Contact::None;
    }
    if !groups_collide(a.group, ga, b.group, gb) || a.is_linked_with(b.id) || b.collided_with.contains(&(a.id as u32)) {
        return Contact::None;
    }

    let adhesion_distance = [&ga.collision, &gb.collision]
        .iter()
        .filter(|c| c.adhesion_active())
        .map(|c| c.adhesion_distance)
        .fold(0.0, f64::max);

    let d = b.position - a.position;
    let dist2 = d.norm_squared();
    let target = a.size + b.size;
    let reach = target + adhesion_distance;
    if dist2 >= reach * reach {
        return Contact::None;
    }

    let dist = dist2.sqrt();
    // coincident pair: pick a fixed axis
    let normal = if dist > MIN_DISTANCE { d / dist } else { NVec3::x() };
    let (ra, rb) = mass_ratios(a, b);

    let contact = if dist < target {
        let friction = 0.5 * (ga.collision.friction + gb.collision.friction);
        let damping = 0.5 * (ga.collision.damping + gb.collision.damping);
        a.velocity = dissipate(&a.velocity, &normal, friction * ra, damping * ra);
        b.velocity = dissipate(&b.velocity, &-normal, friction * rb, damping * rb);

        let overlap = target - dist;
        let push = if dt > 0.0 { overlap / dt } else { overlap };
        a.velocity -= normal * (push * ra);
        b.velocity += normal * (push * rb);
        Contact::Touch
    } else {
        let factor = [&ga.collision, &gb.collision]
            .iter()
            .filter(|c| c.adhesion_active())
            .map(|c| c.adhesion_factor)
            .sum::<f64>()
            / 2.0;
        let separating = (b.velocity - a.velocity).dot(&normal);
        if separating > 0.0 {
            let dv = separating * factor.min(1.0);
            a.velocity += normal * (dv * ra);
            b.velocity -= normal * (dv * rb);
        }
        Contact::Adhesion
    };

    a.collided_with.push(b.id as u32);
    b.collided_with.push(a.id as u32);
    contact
}

/// Scale the tangential part of `v` by `1 - friction` and the normal part by `1 - damping`.
fn dissipate(v: &NVec3, normal: &NVec3, friction: f64, damping: f64) -> NVec3 {
    let vn = normal * v.dot(normal);
    let vt = v - vn;
    vn * (1.0 - damping).max(0.0) + vt * (1.0 - friction).max(0.0)
}

//! One-shot initial rotation.
//!
//! On the first call, every massive particle of a group with gravity and a
//! nonzero `initial_rotation` gets a tangential velocity about the z axis
//! through the system's center of mass:
//!
//! ```text
//! r_core = falloff · r_max
//! r_eff  = sqrt(r² + r_core²)
//! v      = strength · sqrt(G · M(r) / r_eff)
//! ```
//!
//! where `r` is the planar (xy) radius and `M(r)` the mass of every gravity
//! particle with planar radius `<= r`. The speed is added along the in-plane
//! perpendicular `(-dy, dx) / r`; a negative strength spins the other way.
//! The latch on `SimContext` makes later calls no-ops.

use tracing::debug;

use crate::simulation::params::{GroupParams, SimContext};
use crate::simulation::states::{NVec3, Particle};

/// Particles closer than this to the axis have no defined tangent and are skipped.
pub const AXIS_EPSILON: f64 = 1e-6;

/// Seed rotation once per run.
///
/// # Parameters
/// - `ctx`      : Run state; its `rotation_seeded` latch is checked and set.
/// - `particles`: Whole particle store. Only massive particles of gravity
///   groups with a nonzero `initial_rotation` are touched.
/// - `groups`   : Per-group parameters, indexed by `Particle::group`.
///
/// # Returns
/// How many particles were given velocity; `0` on every call after the first.
pub fn seed_rotation(ctx: &mut SimContext, particles: &mut [Particle], groups: &[GroupParams]) -> usize {
    if ctx.rotation_seeded {
        return 0;
    }
    ctx.rotation_seeded = true;

    if !groups.iter().any(|g| g.gravity.active && g.gravity.initial_rotation != 0.0) {
        return 0;
    }
    let in_gravity = |p: &Particle| p.is_massive() && groups[p.group].gravity.active;

    let center = center_of_mass(particles.iter().filter(|&p| in_gravity(p)));
    let planar = |p: &Particle| {
        let d = p.position - center;
        (d.x * d.x + d.y * d.y).sqrt()
    };

    // enclosed mass: radii ascending with running mass totals
    let mut profile: Vec<(f64, f64)> = particles.iter().filter(|&p| in_gravity(p)).map(|p| (planar(p), p.mass)).collect();
    profile.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut running = 0.0;
    for entry in profile.iter_mut() {
        running += entry.1;
        entry.1 = running;
    }
    let enclosed = |r: f64| -> f64 {
        match profile.partition_point(|&(radius, _)| radius <= r) {
            0 => 0.0,
            k => profile[k - 1].1,
        }
    };

    let r_max = match profile.last() {
        Some(&(r, _)) if r > 0.0 && r.is_finite() => r,
        _ => 1.0,
    };

    let mut seeded = 0;
    for p in particles.iter_mut() {
        let gravity = &groups[p.group].gravity;
        if !in_gravity(&*p) || gravity.initial_rotation == 0.0 {
            continue;
        }
        let d = p.position - center;
        let r = (d.x * d.x + d.y * d.y).sqrt();
        if r < AXIS_EPSILON {
            continue;
        }
        let r_core = gravity.rotation_falloff * r_max;
        let r_eff = (r * r + r_core * r_core).sqrt();
        let speed = gravity.initial_rotation * (gravity.strength * enclosed(r) / r_eff).max(0.0).sqrt();
        p.velocity += NVec3::new(-d.y, d.x, 0.0) * (speed / r);
        seeded += 1;
    }

    debug!(seeded, r_max, "initial rotation applied");
    seeded
}

/// Mass-weighted mean position; the origin when the total mass is zero.
pub fn center_of_mass<'a>(particles: impl Iterator<Item = &'a Particle>) -> NVec3 {
    let (weighted, total) = particles.fold((NVec3::zeros(), 0.0), |(sum, m), p| (sum + p.position * p.mass, m + p.mass));
    if total > 0.0 {
        weighted / total
    } else {
        NVec3::zeros()
    }
}

//! Fixed-step update of particle state.
//!
//! Gravity is a velocity kick read from the step's octree; positions are
//! then drifted with the final velocities once collisions and links have
//! been resolved:
//!
//! ```text
//! v += a(x) · dt     (gravity phase)
//! x += v · dt        (after resolution)
//! ```
//!
//! Both loops touch only the particle they are visiting and run on the
//! current rayon pool.

use rayon::prelude::*;

use crate::simulation::barnes_hut::Octree;
use crate::simulation::params::GroupParams;
use crate::simulation::states::Particle;

/// Add `a · dt` to every alive, positive-mass particle of a gravity-enabled
/// group. Massless particles are neither sources nor receivers.
///
/// Each particle is evaluated with its own group's G, θ and ε.
pub fn apply_gravity(particles: &mut [Particle], tree: &Octree, groups: &[GroupParams], dt: f64) {
    particles
        .par_iter_mut()
        .filter(|p| p.is_massive() && groups[p.group].gravity.active)
        .for_each(|p| {
            let g = &groups[p.group].gravity;
            let a = tree.acceleration(p.id, &p.position, g.strength, g.softening, g.theta);
            p.velocity += a * dt;
        });
}

/// `x += v · dt` for every alive particle.
pub fn integrate_positions(particles: &mut [Particle], dt: f64) {
    particles
        .par_iter_mut()
        .filter(|p| p.state.is_active())
        .for_each(|p| p.position += p.velocity * dt);
}

//! Gravity acceleration providers
//!
//! `Acceleration` is implemented by a direct O(N²) sum and by the Barnes–Hut
//! octree. The direct sum is the reference the tree is checked against; the
//! step loop itself drives [`GravitySolver`] with per-group parameters.

use rayon::prelude::*;

use crate::simulation::barnes_hut::{GravityBody, GravitySolver};
use crate::simulation::states::NVec3;

/// Acceleration source; implementations add into `out[i]` for each body.
pub trait Acceleration {
    fn acceleration(&self, bodies: &[GravityBody], out: &mut [NVec3]);
}

/// Newtonian gravity with softening, direct pairwise sum.
pub struct DirectGravity {
    pub g: f64,         // gravitational constant
    pub softening: f64, // epsilon, squared internally
}

impl Acceleration for DirectGravity {
    fn acceleration(&self, bodies: &[GravityBody], out: &mut [NVec3]) {
        let eps2 = self.softening * self.softening;
        let n = bodies.len();

        // Loop over each unordered pair (i, j) with i < j
        for i in 0..n {
            let bi = &bodies[i];
            for j in (i + 1)..n {
                let bj = &bodies[j];

                // r points from i to j: i is pulled along +r, j along -r
                let r = bj.position - bi.position;
                let d2 = r.norm_squared() + eps2;
                if d2 <= 0.0 {
                    continue;
                }
                let inv_r = d2.sqrt().recip();
                let coef = self.g * inv_r * inv_r * inv_r;

                out[i] += r * (coef * bj.mass);
                out[j] -= r * (coef * bi.mass);
            }
        }
    }
}

/// Newtonian gravity evaluated through a freshly built Barnes–Hut octree.
pub struct BarnesHutGravity {
    pub g: f64,
    pub softening: f64,
    pub theta: f64,
}

impl Acceleration for BarnesHutGravity {
    fn acceleration(&self, bodies: &[GravityBody], out: &mut [NVec3]) {
        let mut solver = GravitySolver::new();
        solver.build_bodies(bodies);
        let tree = solver.tree();

        out.par_iter_mut().zip(bodies.par_iter()).for_each(|(a, b)| {
            *a += tree.acceleration(b.id, &b.position, self.g, self.softening, self.theta);
        });
    }
}

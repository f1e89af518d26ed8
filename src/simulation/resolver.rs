//! Per-bin collision and link resolution.
//!
//! Run under [`Checkerboard::run`](crate::simulation::partition::Checkerboard::run):
//! each call handles one bin, particle by particle in ascending id order.
//! For every particle `a`:
//! 1. on the linking step, try an initial link with each neighbour,
//! 2. collide with each neighbour, and on contact try a relink,
//! 3. solve and break the links `a` owns,
//! 4. hand the emptied neighbour list back so its allocation is reused.

use crate::simulation::collision::{collide, Contact};
use crate::simulation::links::{particle_rng, solve_links, try_initial_link, try_relink, LinkTally};
use crate::simulation::params::GroupParams;
use crate::simulation::partition::ParticleCells;
use crate::simulation::states::Particle;

/// Read-only inputs shared by every bin of one pass.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResolveContext<'a> {
    pub groups: &'a [GroupParams],
    pub dt: f64,
    pub seed: u64,
    pub step: u64,
    pub link_init: bool,
}

pub(crate) fn resolve_bin(cells: &ParticleCells, bin: &[u32], cx: &ResolveContext) -> LinkTally {
    let mut tally = LinkTally::default();
    for &id in bin {
        // SAFETY: bins of the running parity are disjoint and out of each
        // other's reach; inside this bin particles are handled one at a time.
        let a = unsafe { cells.get(id as usize) };
        tally = tally + resolve_particle(cells, a, cx);
    }
    tally
}

fn resolve_particle(cells: &ParticleCells, a: &mut Particle, cx: &ResolveContext) -> LinkTally {
    let ga = &cx.groups[a.group];
    let mut rng = particle_rng(cx.seed, cx.step, a.id);
    let mut tally = LinkTally::default();
    let mut neighbors = std::mem::take(&mut a.neighbors);

    for &j in &neighbors {
        let j = j as usize;
        if j == a.id {
            continue;
        }
        // SAFETY: neighbours lie inside the interaction radius the bins were
        // sized for, and `j != a.id`.
        let b = unsafe { cells.get(j) };
        let gb = &cx.groups[b.group];

        if cx.link_init && try_initial_link(a, b, ga, gb, &mut rng) {
            tally.new_links += 1;
        }
        if collide(a, b, ga, gb, cx.dt) == Contact::Touch && try_relink(a, b, ga, gb, &mut rng) {
            tally.new_links += 1;
        }
    }

    tally.dead_links += solve_links(cells, a, cx.dt);

    neighbors.clear();
    a.neighbors = neighbors;
    tally
}

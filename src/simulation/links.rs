//! Link lifecycle: creation, spring solve and breaking.
//!
//! A link is a spring between two particles with separate compression and
//! expansion parameters. Links form
//! - once, on the first step, between neighbours inside the link search
//!   radius of groups with `links.active`, and
//! - on contact, with probability `relink.chance`, between groups that share
//!   a relink group.
//!
//! A link whose strain passes its break threshold is removed and counted as
//! dead; links touching a particle that is no longer alive are pruned the
//! same way before the parallel pass.

use std::ops::Add;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::simulation::collision::{mass_ratios, MIN_DISTANCE};
use crate::simulation::params::{GroupParams, SpringParams};
use crate::simulation::partition::ParticleCells;
use crate::simulation::states::{Link, NVec3, Particle};

/// Links created and destroyed during one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkTally {
    pub new_links: u64,
    pub dead_links: u64,
}

impl Add for LinkTally {
    type Output = LinkTally;

    fn add(self, rhs: LinkTally) -> LinkTally {
        LinkTally {
            new_links: self.new_links + rhs.new_links,
            dead_links: self.dead_links + rhs.dead_links,
        }
    }
}

/// Random stream for one particle in one step, independent of scheduling.
pub fn particle_rng(seed: u64, step: u64, id: usize) -> ChaCha8Rng {
    let mix = seed ^ step.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ (id as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    ChaCha8Rng::seed_from_u64(mix)
}

/// `base` scaled by a uniform factor in `[1 - spread, 1 + spread]`.
fn vary(base: f64, spread: f64, rng: &mut ChaCha8Rng) -> f64 {
    if spread > 0.0 {
        (base * (1.0 + rng.gen_range(-spread..=spread))).max(0.0)
    } else {
        base
    }
}

/// Parameters a new link is drawn from.
struct LinkTemplate<'a> {
    tension: f64,
    tension_rand: f64,
    friction: f64,
    compression: &'a SpringParams,
    expansion: &'a SpringParams,
}

fn draw_link(a: &Particle, b: &Particle, distance: f64, t: &LinkTemplate, rng: &mut ChaCha8Rng) -> Link {
    Link {
        start: a.id,
        end: b.id,
        rest_length: distance * vary(t.tension, t.tension_rand, rng),
        friction: t.friction,
        stiffness: vary(t.compression.stiffness, t.compression.stiffness_rand, rng),
        exponent: t.compression.exponent.max(1),
        damping: vary(t.compression.damping, t.compression.damping_rand, rng),
        broken: vary(t.compression.broken, t.compression.broken_rand, rng),
        e_stiffness: vary(t.expansion.stiffness, t.expansion.stiffness_rand, rng),
        e_exponent: t.expansion.exponent.max(1),
        e_damping: vary(t.expansion.damping, t.expansion.damping_rand, rng),
        e_broken: vary(t.expansion.broken, t.expansion.broken_rand, rng),
    }
}

fn attach(a: &mut Particle, b: &mut Particle, link: Link) {
    a.linked_with.push(b.id as u32);
    b.linked_with.push(a.id as u32);
    a.links.push(link);
}

/// First-step linking of `a` to neighbour `b`. Returns true if a link formed.
pub fn try_initial_link(a: &mut Particle, b: &mut Particle, ga: &GroupParams, gb: &GroupParams, rng: &mut ChaCha8Rng) -> bool {
    if !ga.links.active || a.id == b.id || !b.state.is_active() || a.is_linked_with(b.id) {
        return false;
    }
    if a.link_count() >= ga.links.max || b.link_count() >= gb.links.max {
        return false;
    }
    let same_group = a.group == b.group;
    if !same_group && !(ga.links.other_active && gb.links.other_active && ga.links.group == gb.links.group) {
        return false;
    }
    let distance = (b.position - a.position).norm();
    if distance <= MIN_DISTANCE || distance > ga.links.search_radius(a.size) {
        return false;
    }

    let template = LinkTemplate {
        tension: ga.links.tension,
        tension_rand: ga.links.tension_rand,
        friction: ga.links.friction,
        compression: &ga.links.compression,
        expansion: &ga.links.expansion,
    };
    let link = draw_link(a, b, distance, &template, rng);
    attach(a, b, link);
    true
}

/// Contact-time linking of a colliding pair. Returns true if a link formed.
pub fn try_relink(a: &mut Particle, b: &mut Particle, ga: &GroupParams, gb: &GroupParams, rng: &mut ChaCha8Rng) -> bool {
    if !ga.relink.enabled() || ga.relink.group != gb.relink.group || a.is_linked_with(b.id) {
        return false;
    }
    if a.link_count() >= ga.relink.max || b.link_count() >= gb.relink.max {
        return false;
    }
    let chance = vary(ga.relink.chance, ga.relink.chance_rand, rng) / 100.0;
    if rng.gen::<f64>() >= chance {
        return false;
    }
    let distance = (b.position - a.position).norm();
    if distance <= MIN_DISTANCE {
        return false;
    }

    let template = LinkTemplate {
        tension: ga.relink.tension,
        tension_rand: ga.relink.tension_rand,
        friction: ga.links.friction,
        compression: &ga.relink.compression,
        expansion: &ga.relink.expansion,
    };
    let link = draw_link(a, b, distance, &template, rng);
    attach(a, b, link);
    true
}

/// Solve, and break where needed, every link started by `a`.
///
/// Returns the number of links that broke.
pub(crate) fn solve_links(cells: &ParticleCells, a: &mut Particle, dt: f64) -> u64 {
    let inv_dt = if dt > 0.0 { dt.recip() } else { 0.0 };
    let mut dead = 0;
    let mut k = 0;

    while k < a.links.len() {
        let link = a.links[k];
        debug_assert_ne!(link.end, a.id);
        // SAFETY: the link end lies within the checkerboard interaction
        // radius of `a` and is a different particle.
        let b = unsafe { cells.get(link.end) };

        let d = b.position - a.position;
        let length = d.norm();
        if link.is_broken_at(length) {
            a.links.swap_remove(k);
            a.forget_link(b.id);
            b.forget_link(a.id);
            dead += 1;
            continue;
        }
        if length > MIN_DISTANCE {
            apply_spring(a, b, &link, d / length, length, inv_dt);
        }
        k += 1;
    }
    dead
}

/// Spring plus damping along the link axis, friction across it.
fn apply_spring(a: &mut Particle, b: &mut Particle, link: &Link, normal: NVec3, length: f64, inv_dt: f64) {
    let strain = link.strain(length);
    let (stiffness, exponent, damping) = if strain < 0.0 {
        (link.stiffness, link.exponent, link.damping)
    } else {
        (link.e_stiffness, link.e_exponent, link.e_damping)
    };

    // positional error the spring wants closed this step
    let spring = stiffness * strain.abs().powi(exponent) * strain.signum() * link.rest_length;
    let relative = b.velocity - a.velocity;
    let closing = relative.dot(&normal);
    let impulse = spring * inv_dt + damping.min(1.0) * closing;

    let (ra, rb) = mass_ratios(a, b);
    a.velocity += normal * (impulse * ra);
    b.velocity -= normal * (impulse * rb);

    if link.friction > 0.0 {
        let tangential = relative - normal * closing;
        let f = link.friction.min(1.0);
        a.velocity += tangential * (f * ra);
        b.velocity -= tangential * (f * rb);
    }
}

/// Drop links with an endpoint that is no longer alive. Serial.
///
/// Runs before the checkerboard pass so that every remaining link end is an
/// active, binned particle.
pub fn prune_inactive_links(particles: &mut [Particle]) -> u64 {
    let mut dropped = Vec::new();
    for i in 0..particles.len() {
        let start_alive = particles[i].state.is_active();
        let mut k = 0;
        while k < particles[i].links.len() {
            let end = particles[i].links[k].end;
            if start_alive && particles[end].state.is_active() {
                k += 1;
                continue;
            }
            particles[i].links.swap_remove(k);
            dropped.push((i, end));
        }
    }
    for &(start, end) in &dropped {
        particles[start].forget_link(end);
        particles[end].forget_link(start);
    }
    dropped.len() as u64
}

//! Step orchestrator and host interchange.
//!
//! A [`Simulation`] owns the particle store, the per-group parameters, the
//! run context and every per-step structure (grid, octree, checkerboard),
//! plus the worker pool all parallel phases run on.
//!
//! One step:
//! 1. clear per-particle scratch and snapshot alive positions
//! 2. build the spatial hash and collect neighbours (parallel)
//! 3. build the octree (serial) and kick velocities with gravity (parallel)
//! 4. seed the initial rotation (first step only)
//! 5. prune links to particles that are no longer alive
//! 6. bin particles and resolve collisions and links (checkerboard parallel)
//! 7. drift positions (parallel)
//!
//! Host data comes in as flat xyz arrays per group ([`GroupInit`],
//! [`FrameInput`]) and goes out the same way ([`StepOutput`]).

use std::time::Instant;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info};

use crate::simulation::barnes_hut::{GravitySolver, OctreeStats};
use crate::simulation::error::SimError;
use crate::simulation::integrator::{apply_gravity, integrate_positions};
use crate::simulation::links::{prune_inactive_links, LinkTally};
use crate::simulation::params::{GroupParams, SimContext};
use crate::simulation::partition::{Checkerboard, ParticleCells};
use crate::simulation::relax::{relax_overlaps, RelaxOptions, RelaxReport};
use crate::simulation::resolver::{resolve_bin, ResolveContext};
use crate::simulation::rotation::seed_rotation;
use crate::simulation::spatial_hash::SpatialHash;
use crate::simulation::states::{NVec3, Particle, ParticleState, ParticleStore};

/// Initial data for one host particle system.
#[derive(Debug, Clone, Default)]
pub struct GroupInit {
    pub params: GroupParams,
    pub positions: Vec<f64>,  // xyz interleaved
    pub velocities: Vec<f64>, // xyz interleaved
    pub sizes: Vec<f64>,
    pub masses: Vec<f64>,
    pub states: Vec<ParticleState>,
}

impl GroupInit {
    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }
}

/// Per-step host update for one group.
#[derive(Debug, Clone, Default)]
pub struct GroupFrame {
    pub positions: Vec<f64>,
    pub velocities: Vec<f64>,
    pub states: Vec<ParticleState>,
}

#[derive(Debug, Clone, Default)]
pub struct FrameInput {
    pub groups: Vec<GroupFrame>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupOutput {
    pub positions: Vec<f64>,
    pub velocities: Vec<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepStats {
    pub new_links: u64,
    pub dead_links: u64,
    pub live_links: usize,
    pub total_new_links: u64,
    pub total_dead_links: u64,
    pub octree: Option<OctreeStats>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutput {
    pub groups: Vec<GroupOutput>,
    pub stats: StepStats,
}

pub struct Simulation {
    ctx: SimContext,
    groups: Vec<GroupParams>,
    store: ParticleStore,
    grid: SpatialHash,
    snapshot: Vec<NVec3>, // positions of alive particles, grid order
    active: Vec<u32>,     // snapshot index -> particle id
    gravity: GravitySolver,
    board: Checkerboard,
    pool: ThreadPool,
}

impl Simulation {
    pub fn new(ctx: SimContext, groups: Vec<GroupInit>) -> Result<Self, SimError> {
        let mut store = ParticleStore::new();
        let mut params = Vec::with_capacity(groups.len());

        for (g, init) in groups.into_iter().enumerate() {
            let n = init.len();
            check_len(g, "positions", n * 3, init.positions.len())?;
            check_len(g, "velocities", n * 3, init.velocities.len())?;
            check_len(g, "masses", n, init.masses.len())?;
            check_len(g, "states", n, init.states.len())?;

            store.push_group((0..n).map(|i| {
                (
                    vec3_at(&init.positions, i),
                    vec3_at(&init.velocities, i),
                    init.sizes[i],
                    init.masses[i],
                    init.states[i],
                )
            }));
            params.push(init.params);
        }

        let pool = ThreadPoolBuilder::new().num_threads(ctx.workers).build()?;
        info!(particles = store.len(), groups = params.len(), workers = ctx.workers, dt = ctx.dt, "simulation ready");

        Ok(Self {
            ctx,
            groups: params,
            store,
            grid: SpatialHash::new(),
            snapshot: Vec::new(),
            active: Vec::new(),
            gravity: GravitySolver::new(),
            board: Checkerboard::new(),
            pool,
        })
    }

    pub fn context(&self) -> &SimContext {
        &self.ctx
    }

    pub fn groups(&self) -> &[GroupParams] {
        &self.groups
    }

    pub fn store(&self) -> &ParticleStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ParticleStore {
        &mut self.store
    }

    pub fn particles(&self) -> &[Particle] {
        &self.store.particles
    }

    /// Overwrite positions, velocities and states from the host.
    pub fn ingest(&mut self, frame: &FrameInput) -> Result<(), SimError> {
        if frame.groups.len() != self.store.spans.len() {
            return Err(SimError::GroupCount { expected: self.store.spans.len(), found: frame.groups.len() });
        }
        for (g, f) in frame.groups.iter().enumerate() {
            let n = self.store.spans[g].len;
            check_len(g, "positions", n * 3, f.positions.len())?;
            check_len(g, "velocities", n * 3, f.velocities.len())?;
            check_len(g, "states", n, f.states.len())?;
        }
        for (g, f) in frame.groups.iter().enumerate() {
            for (i, p) in self.store.group_mut(g).iter_mut().enumerate() {
                p.position = vec3_at(&f.positions, i);
                p.velocity = vec3_at(&f.velocities, i);
                p.state = f.states[i];
            }
        }
        Ok(())
    }

    /// Current positions and velocities, per group.
    pub fn export(&self) -> Vec<GroupOutput> {
        (0..self.store.spans.len())
            .map(|g| {
                let particles = self.store.group(g);
                let mut out = GroupOutput {
                    positions: Vec::with_capacity(particles.len() * 3),
                    velocities: Vec::with_capacity(particles.len() * 3),
                };
                for p in particles {
                    out.positions.extend_from_slice(p.position.as_slice());
                    out.velocities.extend_from_slice(p.velocity.as_slice());
                }
                out
            })
            .collect()
    }

    /// `ingest`, `step`, `export` in one call.
    pub fn step_frame(&mut self, frame: &FrameInput) -> Result<StepOutput, SimError> {
        self.ingest(frame)?;
        let stats = self.step()?;
        Ok(StepOutput { groups: self.export(), stats })
    }

    /// Relax initial overlaps of every particle in place.
    pub fn relax(&mut self, opts: &RelaxOptions) -> Result<RelaxReport, SimError> {
        let mut positions = Vec::new();
        positions.try_reserve_exact(self.store.len() * 3)?;
        let mut radii = Vec::new();
        radii.try_reserve_exact(self.store.len())?;
        for p in &self.store.particles {
            positions.extend_from_slice(p.position.as_slice());
            radii.push(p.size);
        }

        let report = relax_overlaps(&mut positions, &radii, opts)?;
        for (p, c) in self.store.particles.iter_mut().zip(positions.chunks_exact(3)) {
            p.position = NVec3::new(c[0], c[1], c[2]);
        }
        info!(
            iterations = report.iterations,
            initial = report.initial_overlaps,
            remaining = report.final_overlaps,
            "overlap relaxation finished"
        );
        Ok(report)
    }

    /// Advance one step of `ctx.dt`.
    pub fn step(&mut self) -> Result<StepStats, SimError> {
        let started = Instant::now();
        let dt = self.ctx.dt;
        let link_init = !self.ctx.links_initialized;

        // scratch + snapshot
        self.snapshot.clear();
        self.active.clear();
        let mut max_size = 0.0f64;
        for p in self.store.particles.iter_mut() {
            p.neighbors.clear();
            p.collided_with.clear();
            if p.state.is_active() {
                self.snapshot.push(p.position);
                self.active.push(p.id as u32);
                max_size = max_size.max(p.size);
            }
        }

        // neighbours
        let groups = &self.groups;
        let cell = self
            .store
            .particles
            .iter()
            .filter(|p| p.state.is_active() && wants_neighbors(&groups[p.group], link_init))
            .map(|p| query_radius(p, &groups[p.group], max_size, link_init))
            .fold(0.0, f64::max);
        self.grid.build(&self.snapshot, cell)?;
        {
            let (grid, snapshot, active) = (&self.grid, &self.snapshot, &self.active);
            let particles = &mut self.store.particles;
            self.pool.install(|| {
                particles
                    .par_iter_mut()
                    .filter(|p| p.state.is_active() && wants_neighbors(&groups[p.group], link_init))
                    .for_each(|p| {
                        let radius = query_radius(p, &groups[p.group], max_size, link_init);
                        grid.query_radius(snapshot, &p.position, radius, &mut p.neighbors);
                        for k in p.neighbors.iter_mut() {
                            *k = active[*k as usize];
                        }
                        let own = p.id as u32;
                        p.neighbors.retain(|&id| id != own);
                    });
            });
        }
        let t_neighbors = started.elapsed();

        // gravity
        let octree = if self.groups.iter().any(|g| g.gravity.active) {
            let stats = self.gravity.build(&self.store.particles, &self.groups);
            let (tree, particles, groups) = (self.gravity.tree(), &mut self.store.particles, &self.groups);
            self.pool.install(|| apply_gravity(particles, tree, groups, dt));
            Some(stats)
        } else {
            None
        };
        let t_gravity = started.elapsed();

        seed_rotation(&mut self.ctx, &mut self.store.particles, &self.groups);

        // collisions and links
        let pruned = prune_inactive_links(&mut self.store.particles);
        let reach = interaction_radius(&self.store.particles, &self.groups, max_size, link_init);
        let mut tally = LinkTally { new_links: 0, dead_links: pruned };
        if reach > 0.0 {
            self.board.build(&self.store.particles, reach);
            let cx = ResolveContext {
                groups: &self.groups,
                dt,
                seed: self.ctx.seed,
                step: self.ctx.step,
                link_init,
            };
            let board = &self.board;
            let cells = ParticleCells::new(&mut self.store.particles);
            tally = tally + self.pool.install(|| board.run(|bin| resolve_bin(&cells, bin, &cx)));
        }
        let t_resolve = started.elapsed();

        let particles = &mut self.store.particles;
        self.pool.install(|| integrate_positions(particles, dt));

        self.ctx.step += 1;
        self.ctx.links_initialized = true;
        self.ctx.total_new_links += tally.new_links;
        self.ctx.total_dead_links += tally.dead_links;

        let stats = StepStats {
            new_links: tally.new_links,
            dead_links: tally.dead_links,
            live_links: self.store.link_count(),
            total_new_links: self.ctx.total_new_links,
            total_dead_links: self.ctx.total_dead_links,
            octree,
        };
        debug!(
            step = self.ctx.step,
            active = self.active.len(),
            new_links = stats.new_links,
            dead_links = stats.dead_links,
            live_links = stats.live_links,
            neighbors_ms = t_neighbors.as_secs_f64() * 1e3,
            gravity_ms = (t_gravity - t_neighbors).as_secs_f64() * 1e3,
            resolve_ms = (t_resolve - t_gravity).as_secs_f64() * 1e3,
            total_ms = started.elapsed().as_secs_f64() * 1e3,
            "step done"
        );
        Ok(stats)
    }
}

// helpers ==============================================================================

fn check_len(group: usize, field: &'static str, expected: usize, found: usize) -> Result<(), SimError> {
    if expected == found {
        Ok(())
    } else {
        Err(SimError::FrameShape { group, field, expected, found })
    }
}

fn vec3_at(flat: &[f64], i: usize) -> NVec3 {
    NVec3::new(flat[3 * i], flat[3 * i + 1], flat[3 * i + 2])
}

/// Whether particles of this group need a neighbour list this step.
fn wants_neighbors(g: &GroupParams, link_init: bool) -> bool {
    g.collision.self_collision || g.collision.other_collision || (link_init && g.links.active)
}

/// Neighbour search radius: contact with the largest particle, plus the
/// adhesion band, widened to the link search radius on the linking step.
fn query_radius(p: &Particle, g: &GroupParams, max_size: f64, link_init: bool) -> f64 {
    let mut r = p.size + max_size;
    if g.collision.adhesion_active() {
        r += g.collision.adhesion_distance;
    }
    if link_init && g.links.active {
        r = r.max(g.links.search_radius(p.size));
    }
    r
}

/// Farthest any resolver can reach from its own particle this step.
fn interaction_radius(particles: &[Particle], groups: &[GroupParams], max_size: f64, link_init: bool) -> f64 {
    let mut reach = 0.0f64;
    for p in particles.iter().filter(|p| p.state.is_active()) {
        let g = &groups[p.group];
        if wants_neighbors(g, link_init) {
            reach = reach.max(query_radius(p, g, max_size, link_init));
        }
        for link in &p.links {
            reach = reach.max((particles[link.end].position - p.position).norm());
        }
    }
    reach
}

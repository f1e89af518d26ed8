//! Build runnable simulations from configuration
//!
//! Takes a `ScenarioConfig` (YAML-facing) and produces a [`Scenario`]
//! containing:
//! - the [`Simulation`] with every group's particles at t = 0
//! - the number of steps to run
//! - the optional relaxation pre-pass
//!
//! Disk groups are generated here with a seeded ChaCha stream, so the same
//! file always yields the same initial state.

use std::f64::consts::TAU;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::configuration::config::{BodyConfig, DiskConfig, GroupConfig, ScenarioConfig};
use crate::simulation::engine::{GroupInit, Simulation};
use crate::simulation::error::SimError;
use crate::simulation::params::SimContext;
use crate::simulation::relax::RelaxOptions;
use crate::simulation::states::ParticleState;

/// Fully-initialized simulation plus how the binary should drive it.
pub struct Scenario {
    pub simulation: Simulation,
    pub steps: usize,
    pub relax: Option<RelaxOptions>,
}

impl Scenario {
    pub fn build_scenario(cfg: ScenarioConfig) -> Result<Self, SimError> {
        let e_cfg = cfg.engine;
        let ctx = SimContext::new(e_cfg.dt, e_cfg.threads, e_cfg.seed);

        let relax = e_cfg.relax.map(|r| RelaxOptions {
            max_iterations: r.iterations,
            min_separation: r.separation,
            strength: r.strength,
            workers: ctx.workers,
        });

        let groups = cfg.groups.into_iter().map(group_init).collect();
        let simulation = Simulation::new(ctx, groups)?;

        Ok(Self {
            simulation,
            steps: e_cfg.steps,
            relax,
        })
    }
}

/// Flatten one group's bodies and generated disk into host arrays.
pub fn group_init(cfg: GroupConfig) -> GroupInit {
    let mut init = GroupInit { params: cfg.params, ..Default::default() };
    for b in &cfg.bodies {
        push_body(&mut init, b);
    }
    if let Some(disk) = &cfg.disk {
        for b in disk_bodies(disk) {
            push_body(&mut init, &b);
        }
    }
    init
}

fn push_body(init: &mut GroupInit, b: &BodyConfig) {
    init.positions.extend_from_slice(&b.x);
    init.velocities.extend_from_slice(&b.v);
    init.sizes.push(b.radius);
    init.masses.push(b.m);
    init.states.push(ParticleState::Alive);
}

/// Particles spread uniformly over a disk of `radius` in the xy plane,
/// uniformly across `thickness` in z, at rest.
pub fn disk_bodies(d: &DiskConfig) -> Vec<BodyConfig> {
    let mut rng = ChaCha8Rng::seed_from_u64(d.seed);
    let half = 0.5 * d.thickness;
    (0..d.count)
        .map(|_| {
            // sqrt keeps the areal density uniform
            let r = d.radius * rng.gen::<f64>().sqrt();
            let phi = rng.gen::<f64>() * TAU;
            let z = if half > 0.0 { rng.gen_range(-half..half) } else { 0.0 };
            BodyConfig {
                x: [r * phi.cos(), r * phi.sin(), z],
                v: [0.0; 3],
                m: d.mass,
                radius: d.size,
            }
        })
        .collect()
}

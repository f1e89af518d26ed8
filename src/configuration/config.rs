//! Configuration types for loading simulation scenarios from YAML.
//!
//! This module defines a thin, `serde`-deserializable representation of a
//! scenario. A scenario consists of:
//!
//! - [`EngineConfig`]   – step size, step count, worker count, seed, optional relaxation pre-pass
//! - [`GroupConfig`]    – one particle system: its [`GroupParams`] and where its particles come from
//! - [`ScenarioConfig`] – top-level wrapper used to load a scenario from YAML
//!
//! # YAML format
//! A small scenario matching these types:
//!
//! ```yaml
//! engine:
//!   threads: 4
//!   dt: 0.01
//!   steps: 200
//!   seed: 7
//!   relax:                  # optional pre-pass
//!     iterations: 100
//!     separation: 1.001
//!     strength: 0.8
//!
//! groups:
//!   - params:               # every field falls back to the host defaults
//!       gravity:
//!         active: true
//!         strength: 1.0
//!         theta: 0.5
//!         initial_rotation: 1.0
//!     disk:
//!       count: 2000
//!       radius: 10.0
//!       thickness: 0.5
//!       mass: 1.0
//!       size: 0.05
//!       seed: 1
//!   - params:
//!       collision:
//!         self_collision: true
//!     bodies:
//!       - x: [0.0, 0.0, 5.0]
//!         v: [0.0, 0.0, 0.0]
//!         m: 1.0
//!         radius: 0.2
//! ```
//!
//! The scenario builder maps this into a runnable
//! [`Simulation`](crate::simulation::engine::Simulation).

use serde::Deserialize;

use crate::simulation::params::GroupParams;

/// Overlap relaxation run once before the first step.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RelaxConfig {
    pub iterations: usize, // max sweeps
    pub separation: f64,   // required distance as a multiple of r_i + r_j
    pub strength: f64,     // share of the missing gap closed per sweep
}

impl Default for RelaxConfig {
    fn default() -> Self {
        Self {
            iterations: 100,
            separation: 1.001,
            strength: 0.8,
        }
    }
}

/// Run-wide engine settings.
#[derive(Deserialize, Debug, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_threads")]
    pub threads: usize, // worker pool size
    pub dt: f64, // fixed time step
    #[serde(default)]
    pub steps: usize, // steps the binary runs
    #[serde(default)]
    pub seed: u64, // base seed for link randomness
    #[serde(default)]
    pub relax: Option<RelaxConfig>,
}

fn default_threads() -> usize {
    4
}

/// Configuration for a single body's initial state.
#[derive(Deserialize, Debug, Clone)]
pub struct BodyConfig {
    pub x: [f64; 3], // initial position
    #[serde(default)]
    pub v: [f64; 3], // initial velocity
    pub m: f64,      // mass
    pub radius: f64, // collision radius
}

/// Uniform disk of particles in the xy plane, centered on the origin.
#[derive(Deserialize, Debug, Clone)]
pub struct DiskConfig {
    pub count: usize,
    pub radius: f64,
    #[serde(default)]
    pub thickness: f64, // full height along z
    pub mass: f64,      // per particle
    pub size: f64,      // per-particle radius
    #[serde(default)]
    pub seed: u64,
}

/// One particle system. Explicit `bodies` and a generated `disk` may be combined.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct GroupConfig {
    #[serde(default)]
    pub params: GroupParams,
    #[serde(default)]
    pub bodies: Vec<BodyConfig>,
    #[serde(default)]
    pub disk: Option<DiskConfig>,
}

/// Top-level scenario configuration loaded from YAML.
#[derive(Deserialize, Debug, Clone)]
pub struct ScenarioConfig {
    pub engine: EngineConfig,    // step size, workers, seed
    pub groups: Vec<GroupConfig>, // particle systems in host order
}

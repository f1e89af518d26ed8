//! Per-group configuration and the per-run simulation context.
//!
//! `GroupParams` mirrors the host add-on's particle-system settings:
//! - collision flags, friction, damping, adhesion
//! - initial links and re-links, each with compression/expansion springs
//! - Barnes–Hut gravity and initial rotation
//!
//! `SimContext` replaces the process-wide counters of a classic engine loop:
//! time step, worker count, step index, rng seed, the "rotation already
//! seeded" latch and cumulative link tallies.

use serde::Deserialize;

use crate::simulation::error::SimError;

/// Number of slots in the host's flat parameter array.
pub const HOST_PARAM_COUNT: usize = 56;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CollisionParams {
    pub self_collision: bool,
    pub other_collision: bool,
    pub group: i64,               // collide with other groups sharing this id
    pub friction: f64,            // tangential velocity loss, 0..1
    pub damping: f64,             // normal velocity loss, 0..1
    pub adhesion_distance: f64,   // search distance beyond contact
    pub adhesion_factor: f64,     // separating velocity loss inside that distance
}

impl Default for CollisionParams {
    fn default() -> Self {
        Self {
            self_collision: false,
            other_collision: false,
            group: 1,
            friction: 0.005,
            damping: 0.005,
            adhesion_distance: 0.1,
            adhesion_factor: 0.0,
        }
    }
}

impl CollisionParams {
    pub fn adhesion_active(&self) -> bool {
        self.adhesion_factor > 0.0 && self.adhesion_distance > 0.0
    }
}

/// One side (compression or expansion) of a link spring.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SpringParams {
    pub stiffness: f64,
    pub stiffness_rand: f64,
    pub exponent: i32,
    pub damping: f64,
    pub damping_rand: f64,
    pub broken: f64,       // strain fraction at which the link snaps
    pub broken_rand: f64,
}

impl Default for SpringParams {
    fn default() -> Self {
        Self {
            stiffness: 1.0,
            stiffness_rand: 0.0,
            exponent: 1,
            damping: 1.0,
            damping_rand: 0.0,
            broken: 0.5,
            broken_rand: 0.0,
        }
    }
}

/// Links created once, on the first step.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LinkParams {
    pub active: bool,
    pub other_active: bool,   // allow links to other groups sharing `group`
    pub group: i64,
    pub relative_length: bool,
    pub friction: f64,
    pub length: f64,          // search distance (in diameters when relative)
    pub max: usize,
    pub tension: f64,
    pub tension_rand: f64,
    pub compression: SpringParams,
    pub expansion: SpringParams,
}

impl Default for LinkParams {
    fn default() -> Self {
        Self {
            active: false,
            other_active: false,
            group: 1,
            relative_length: true,
            friction: 0.005,
            length: 1.0,
            max: 16,
            tension: 1.0,
            tension_rand: 0.0,
            compression: SpringParams::default(),
            expansion: SpringParams::default(),
        }
    }
}

impl LinkParams {
    /// Radius around a particle of radius `size` inside which initial links form.
    pub fn search_radius(&self, size: f64) -> f64 {
        if self.relative_length {
            self.length * 2.0 * size
        } else {
            self.length
        }
    }
}

/// Links created on contact during the simulation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RelinkParams {
    pub group: i64,
    pub chance: f64,          // percent per contact, 0..100
    pub chance_rand: f64,
    pub max: usize,
    pub tension: f64,
    pub tension_rand: f64,
    pub compression: SpringParams,
    pub expansion: SpringParams,
}

impl Default for RelinkParams {
    fn default() -> Self {
        Self {
            group: 1,
            chance: 0.0,
            chance_rand: 0.0,
            max: 16,
            tension: 1.0,
            tension_rand: 0.0,
            compression: SpringParams::default(),
            expansion: SpringParams::default(),
        }
    }
}

impl RelinkParams {
    pub fn enabled(&self) -> bool {
        self.chance > 0.0 && self.max > 0
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GravityParams {
    pub active: bool,
    pub strength: f64,          // G
    pub theta: f64,             // opening angle
    pub softening: f64,         // epsilon (not squared)
    pub initial_rotation: f64,  // 0 disables seeding; sign picks the spin direction
    pub rotation_falloff: f64,  // core radius as a fraction of the outermost radius
}

impl Default for GravityParams {
    fn default() -> Self {
        Self {
            active: false,
            strength: 1.0,
            theta: 0.5,
            softening: 0.01,
            initial_rotation: 0.0,
            rotation_falloff: 0.3,
        }
    }
}

/// Full parameter set for one host particle system.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct GroupParams {
    pub collision: CollisionParams,
    pub links: LinkParams,
    pub relink: RelinkParams,
    pub gravity: GravityParams,
}

impl GroupParams {
    /// Decode the host's flat 56-slot parameter array.
    ///
    /// Booleans are nonzero values, integer slots are truncated.
    pub fn from_host_array(p: &[f64]) -> Result<Self, SimError> {
        if p.len() < HOST_PARAM_COUNT {
            return Err(SimError::HostParams { expected: HOST_PARAM_COUNT, found: p.len() });
        }
        let flag = |i: usize| p[i] != 0.0;
        let int = |i: usize| p[i] as i64;
        let count = |i: usize| p[i].max(0.0) as usize;

        Ok(Self {
            collision: CollisionParams {
                self_collision: flag(0),
                other_collision: flag(1),
                group: int(2),
                friction: p[3],
                damping: p[4],
                adhesion_distance: p[48],
                adhesion_factor: p[49],
            },
            links: LinkParams {
                active: flag(5),
                length: p[6],
                max: count(7),
                tension: p[8],
                tension_rand: p[9],
                compression: SpringParams {
                    stiffness: p[10],
                    stiffness_rand: p[11],
                    exponent: int(12) as i32,
                    damping: p[13],
                    damping_rand: p[14],
                    broken: p[15],
                    broken_rand: p[16],
                },
                expansion: SpringParams {
                    stiffness: p[17],
                    stiffness_rand: p[18],
                    exponent: int(19) as i32,
                    damping: p[20],
                    damping_rand: p[21],
                    broken: p[22],
                    broken_rand: p[23],
                },
                friction: p[44],
                group: int(45),
                other_active: flag(46),
                relative_length: flag(47),
            },
            relink: RelinkParams {
                group: int(24),
                chance: p[25],
                chance_rand: p[26],
                max: count(27),
                tension: p[28],
                tension_rand: p[29],
                compression: SpringParams {
                    stiffness: p[30],
                    exponent: int(31) as i32,
                    stiffness_rand: p[32],
                    damping: p[33],
                    damping_rand: p[34],
                    broken: p[35],
                    broken_rand: p[36],
                },
                expansion: SpringParams {
                    stiffness: p[37],
                    exponent: int(38) as i32,
                    stiffness_rand: p[39],
                    damping: p[40],
                    damping_rand: p[41],
                    broken: p[42],
                    broken_rand: p[43],
                },
            },
            gravity: GravityParams {
                active: flag(50),
                strength: p[51],
                theta: p[52],
                softening: p[53],
                initial_rotation: p[54],
                rotation_falloff: p[55],
            },
        })
    }
}

/// Explicit run state threaded through every step.
#[derive(Debug, Clone)]
pub struct SimContext {
    pub dt: f64,                  // time step
    pub workers: usize,           // worker pool size
    pub seed: u64,                // base seed for per-particle randomness
    pub step: u64,                // completed steps
    pub rotation_seeded: bool,    // initial rotation has been applied
    pub links_initialized: bool,  // first-step linking has run
    pub total_new_links: u64,
    pub total_dead_links: u64,
}

impl SimContext {
    pub fn new(dt: f64, workers: usize, seed: u64) -> Self {
        Self {
            dt,
            workers: workers.max(1),
            seed,
            step: 0,
            rotation_seeded: false,
            links_initialized: false,
            total_new_links: 0,
            total_dead_links: 0,
        }
    }
}

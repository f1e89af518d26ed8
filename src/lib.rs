pub mod simulation;
pub mod configuration;
pub mod benchmark;

pub use simulation::states::{Link, NVec3, Particle, ParticleState, ParticleStore};
pub use simulation::params::{GroupParams, SimContext, HOST_PARAM_COUNT};
pub use simulation::error::SimError;
pub use simulation::barnes_hut::{GravitySolver, Octree, OctreeStats};
pub use simulation::forces::{Acceleration, BarnesHutGravity, DirectGravity};
pub use simulation::relax::{relax_overlaps, RelaxOptions, RelaxReport};
pub use simulation::rotation::seed_rotation;
pub use simulation::engine::{FrameInput, GroupFrame, GroupInit, GroupOutput, Simulation, StepOutput, StepStats};
pub use simulation::scenario::Scenario;

pub use configuration::config::{BodyConfig, DiskConfig, EngineConfig, GroupConfig, RelaxConfig, ScenarioConfig};

pub use benchmark::benchmark::{bench_gravity, bench_step};

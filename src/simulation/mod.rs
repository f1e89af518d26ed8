pub mod states;
pub mod params;
pub mod error;
pub mod spatial_hash;
pub mod barnes_hut;
pub mod forces;
pub mod partition;
pub mod collision;
pub mod links;
pub mod resolver;
pub mod rotation;
pub mod relax;
pub mod integrator;
pub mod engine;
pub mod scenario;

pub mod config;
pub mod sim_params;
pub mod snapshot;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{SimulationConfig, DomainConfig, TimingConfig, InitialConditions, CollisionConfig, OutputConfig, VelocityDistribution};
pub use sim_params::{SimParams, MAX_GRID_CELLS};
pub use snapshot::{ParticleSnapshot, Snapshot};
pub use vecmath::{Vec3, MAX_DIMENSIONS};

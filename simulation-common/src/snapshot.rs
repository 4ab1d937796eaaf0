use serde::{Deserialize, Serialize};

/// Read-only copy of one particle's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleSnapshot {
    /// Identity token assigned at creation.
    pub id: u64,
    pub radius: f64,
    pub center: [f64; 3],
    pub velocity: [f64; 3],
    /// Collisions the particle may still take part in.
    pub remaining_budget: u32,
}

/// A snapshot of the simulation state at a paused instant.
#[derive(Debug, Clone, Serialize, Deserialize)] // Derive traits for easy saving/loading
pub struct Snapshot {
    /// The simulation time at which the snapshot was taken.
    pub time: f64,
    /// The total number of particles in the simulation.
    pub total_particle_count: u32,
    /// Number of collisions resolved up to `time`.
    pub collision_count: u64,
    /// Per-particle state, in store order.
    pub particles: Vec<ParticleSnapshot>,
}

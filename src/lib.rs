//! Event-driven hard-sphere collision engine for a periodic cubic domain.
//!
//! Particles live in a [`store::ParticleStore`] owned by the
//! [`grid::SpatialGrid`]; candidate collisions and cell crossings wait in
//! the [`scheduler::EventQueue`] and are validated lazily by the
//! [`simulation::EventDrivenSimulation`] driver when popped.

pub mod error;
pub mod grid;
pub mod physics;
pub mod scheduler;
pub mod simulation;
pub mod store;

pub use error::{Error, Result};
pub use scheduler::EventKind;
pub use simulation::{EventDrivenSimulation, SimState, StepOutcome};
pub use store::{NewParticle, Particle, ParticleHandle, ParticleId};

use crate::error::{Error, Result};
use simulation_common::{ParticleSnapshot, Vec3};
use std::fmt;

/// Identity token handed out once per particle and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticleId(pub u64);

/// Stable index into the [`ParticleStore`]. Grid cells and queued events hold
/// these instead of references, so moving a particle between cells never
/// invalidates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticleHandle(pub u32);

impl ParticleHandle {
    #[inline(always)]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ParticleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Initial state for a particle that has not been stored yet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewParticle {
    pub radius: f64,
    pub center: Vec3,
    pub velocity: Vec3,
    /// Overrides the store-wide collision budget when set.
    pub budget: Option<u32>,
}

impl NewParticle {
    pub fn new(radius: f64, center: Vec3, velocity: Vec3) -> Self {
        NewParticle { radius, center, velocity, budget: None }
    }

    pub fn with_budget(mut self, budget: u32) -> Self {
        self.budget = Some(budget);
        self
    }
}

/// A hard sphere of unit mass.
#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    id: ParticleId,
    radius: f64,
    center: Vec3,
    velocity: Vec3,
    budget: u32,
}

impl Particle {
    pub fn id(&self) -> ParticleId {
        self.id
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn center(&self) -> Vec3 {
        self.center
    }

    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    /// Collisions this particle may still take part in.
    pub fn remaining_budget(&self) -> u32 {
        self.budget
    }

    /// True once the budget is spent; such particles are never scheduled again.
    pub fn is_exhausted(&self) -> bool {
        self.budget == 0
    }

    pub fn snapshot(&self) -> ParticleSnapshot {
        ParticleSnapshot {
            id: self.id.0,
            radius: self.radius,
            center: self.center.to_array(),
            velocity: self.velocity.to_array(),
            remaining_budget: self.budget,
        }
    }

    #[cfg(test)]
    pub(crate) fn detached(radius: f64, center: Vec3, velocity: Vec3, budget: u32) -> Self {
        Particle { id: ParticleId(u64::MAX), radius, center, velocity, budget }
    }
}

/// Contiguous arena owning every particle of a run.
///
/// Only the spatial grid holds a `&mut` to it; everything else reads copies.
#[derive(Debug, Default)]
pub struct ParticleStore {
    particles: Vec<Particle>,
    next_id: u64,
}

impl ParticleStore {
    /// Creates an empty store with room for `capacity` particles.
    ///
    /// Reservation failure is fatal for the run being built.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut particles = Vec::new();
        particles
            .try_reserve_exact(capacity)
            .map_err(|_| Error::Allocation { what: "particle store", count: capacity })?;
        Ok(Self { particles, next_id: 0 })
    }

    /// Stores a particle and returns its handle. The identity token comes from
    /// the store's own counter.
    pub fn insert(&mut self, new: NewParticle, default_budget: u32) -> Result<ParticleHandle> {
        if !new.radius.is_finite() || new.radius < 0.0 {
            return Err(Error::InvalidParticle(format!(
                "radius must be finite and non-negative, got {}",
                new.radius
            )));
        }
        if !new.center.is_finite() || !new.velocity.is_finite() {
            return Err(Error::InvalidParticle("center and velocity must be finite".into()));
        }
        let handle = u32::try_from(self.particles.len())
            .map(ParticleHandle)
            .map_err(|_| Error::Allocation { what: "particle handles", count: self.particles.len() })?;
        if self.particles.len() == self.particles.capacity() {
            self.particles
                .try_reserve(1)
                .map_err(|_| Error::Allocation { what: "particle store", count: self.particles.len() + 1 })?;
        }

        let id = ParticleId(self.next_id);
        self.next_id += 1;
        self.particles.push(Particle {
            id,
            radius: new.radius,
            center: new.center,
            velocity: new.velocity,
            budget: new.budget.unwrap_or(default_budget),
        });
        Ok(handle)
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn get(&self, handle: ParticleHandle) -> Option<&Particle> {
        self.particles.get(handle.index())
    }

    pub fn center(&self, handle: ParticleHandle) -> Vec3 {
        self.particles[handle.index()].center
    }

    pub fn velocity(&self, handle: ParticleHandle) -> Vec3 {
        self.particles[handle.index()].velocity
    }

    pub fn remaining_budget(&self, handle: ParticleHandle) -> u32 {
        self.particles[handle.index()].budget
    }

    pub fn set_velocity(&mut self, handle: ParticleHandle, velocity: Vec3) {
        self.particles[handle.index()].velocity = velocity;
    }

    pub(crate) fn set_center(&mut self, handle: ParticleHandle, center: Vec3) {
        self.particles[handle.index()].center = center;
    }

    /// Spends one unit of collision budget. Saturates at zero.
    pub fn decrement_budget(&mut self, handle: ParticleHandle) {
        let p = &mut self.particles[handle.index()];
        p.budget = p.budget.saturating_sub(1);
    }

    pub fn handles(&self) -> impl Iterator<Item = ParticleHandle> + '_ {
        (0..self.particles.len() as u32).map(ParticleHandle)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Particle> {
        self.particles.iter()
    }
}

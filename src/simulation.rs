use crate::error::{Error, Result};
use crate::grid::{cell_exit, neighborhood_covers_grid, SpatialGrid};
use crate::physics::{earliest_periodic_contact, minimum_image_offset, resolve_collision};
use crate::scheduler::{Event, EventKind, EventQueue};
use crate::store::{NewParticle, Particle, ParticleHandle};
use log::{debug, info, trace, warn};
use rand::distr::Uniform;
use rand::prelude::*;
use rand_distr::{Poisson, StandardNormal};
use simulation_common::{SimParams, SimulationConfig, Snapshot, Vec3, VelocityDistribution, MAX_DIMENSIONS};
use std::fmt;

/// Relative tolerance when comparing a re-predicted event time with the queued one.
const TIME_TOLERANCE: f64 = 1e-9;

/// Lifecycle of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimState {
    Uninitialized,
    Seeding,
    Running,
    Finished,
}

/// What a single [`EventDrivenSimulation::step`] did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// A valid collision was resolved.
    Collision { time: f64, a: ParticleHandle, b: ParticleHandle },
    /// A particle moved into a neighboring grid cell and was re-predicted there.
    CellCrossing { time: f64, particle: ParticleHandle },
    /// The popped event no longer described the particles' motion and was dropped.
    Stale,
    /// The run is over; nothing further happens.
    Finished,
}

/// Event-driven hard-sphere gas in a periodic cube.
pub struct EventDrivenSimulation {
    params: SimParams,
    /// Spatial index; owns every particle.
    grid: SpatialGrid,
    /// Predicted collisions and cell crossings, earliest first.
    queue: EventQueue,
    // Cell each particle was last re-predicted in, per handle
    home_cells: Vec<usize>,
    current_time: f64,
    /// Absolute times of resolved collisions, in order.
    collision_times: Vec<f64>,
    state: SimState,
    stale_events: u64,
}

impl EventDrivenSimulation {
    /// Creates a simulation with a Poisson-distributed number of randomly placed particles.
    pub fn new(config: &SimulationConfig) -> Result<Self> {
        let params = config.get_sim_params();
        validate_params(&params)?;

        // Host-side RNG for the particle count and initial placement.
        let mut rng: StdRng = match config.initial_conditions.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::seed_from_u64(rand::rng().random()),
        };

        let mean = config.initial_conditions.mean_particle_count as f64;
        let poisson = Poisson::new(mean).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        let drawn: f64 = rng.sample(poisson);
        let count = drawn as usize;
        debug!("Drew {} particles from Poisson(mean = {}).", count, mean);

        let particles = place_initial_particles(
            &params,
            config.initial_conditions.velocity_distribution,
            count,
            &mut rng,
        )?;
        Self::with_particles(params, &particles)
    }

    /// Creates a simulation from explicitly placed particles.
    pub fn with_particles(params: SimParams, particles: &[NewParticle]) -> Result<Self> {
        validate_params(&params)?;
        for (i, p) in particles.iter().enumerate() {
            if 2.0 * p.radius > params.grid_cell_size || 4.0 * p.radius >= params.domain_size {
                return Err(Error::InvalidConfig(format!(
                    "particle {} has diameter {}, too large for cells of {} in a domain of {}",
                    i,
                    2.0 * p.radius,
                    params.grid_cell_size,
                    params.domain_size
                )));
            }
        }

        let grid = SpatialGrid::new(params.clone(), particles)?;
        let home_cells = grid.store().handles().map(|h| grid.cell_of(h)).collect();
        let sim = Self {
            params,
            grid,
            queue: EventQueue::new(),
            home_cells,
            current_time: 0.0,
            collision_times: Vec::new(),
            state: SimState::Uninitialized,
            stale_events: 0,
        };
        info!("Initialized {}", sim);
        Ok(sim)
    }

    /// Seeds the queue with every predicted collision between neighboring
    /// particles and each particle's first cell crossing. Must run exactly
    /// once, before the first step.
    pub fn initialize_events(&mut self) -> Result<()> {
        if self.state != SimState::Uninitialized {
            return Err(Error::InvalidState(format!(
                "events can only be seeded once (state is {:?})",
                self.state
            )));
        }
        self.state = SimState::Seeding;

        let handles: Vec<ParticleHandle> = self.grid.store().handles().collect();
        for h in handles {
            // grid adjacency is symmetric; each unordered pair is tested once
            let partners: Vec<ParticleHandle> =
                self.grid.nearby_particles(h).into_iter().filter(|&o| o > h).collect();
            for other in partners {
                self.add_collision_event(h, other)?;
            }
            self.schedule_crossing(h)?;
        }

        debug!("Seeded {} candidate events.", self.queue.len());
        self.state = SimState::Running;
        Ok(())
    }

    /// Runs until the queue empties or the horizon is reached.
    /// Returns the number of resolved collisions.
    pub fn run(&mut self) -> Result<usize> {
        while self.step()? != StepOutcome::Finished {}
        info!(
            "Simulation finished at t = {:.6}: {} collisions, {} stale events discarded.",
            self.current_time,
            self.collision_times.len(),
            self.stale_events
        );
        Ok(self.collision_times.len())
    }

    /// Pops one event and acts on it.
    pub fn step(&mut self) -> Result<StepOutcome> {
        match self.state {
            SimState::Running => {}
            SimState::Finished => {
                return Err(Error::InvalidState("the simulation has already finished".into()));
            }
            SimState::Uninitialized | SimState::Seeding => {
                return Err(Error::InvalidState("initialize_events must run before stepping".into()));
            }
        }
        if self.current_time >= self.params.max_time {
            self.finish();
            return Ok(StepOutcome::Finished);
        }

        let Some(event) = self.queue.pop() else {
            // Nothing left to predict; drift to the horizon without rescanning.
            self.finish();
            return Ok(StepOutcome::Finished);
        };
        if event.time() > self.params.max_time {
            self.finish();
            return Ok(StepOutcome::Finished);
        }
        if !self.is_event_valid(&event) {
            self.stale_events += 1;
            trace!("Discarding stale event {:?} at t = {}.", event.kind(), event.time());
            return Ok(StepOutcome::Stale);
        }

        // Move to the time of the event
        self.advance(event.time() - self.current_time);
        self.current_time = event.time();

        match event.kind() {
            EventKind::Collision { a, b } => {
                self.handle_collision(a, b)?;
                Ok(StepOutcome::Collision { time: event.time(), a, b })
            }
            EventKind::CellCrossing { particle, to, .. } => {
                self.handle_crossing(particle, to)?;
                Ok(StepOutcome::CellCrossing { time: event.time(), particle })
            }
        }
    }

    /// Re-predicts the event from current state and checks it still lands on the queued time.
    fn is_event_valid(&self, event: &Event) -> bool {
        let expected = event.time() - self.current_time;
        let predicted = match event.kind() {
            EventKind::Collision { a, b } => self.predict(a, b),
            EventKind::CellCrossing { particle, from, to } => {
                if self.home_cells[particle.index()] != from || self.grid.store().remaining_budget(particle) == 0 {
                    return false;
                }
                match self.next_crossing(particle) {
                    Some((t, next)) if next == to => Some(t),
                    _ => None,
                }
            }
        };
        predicted.is_some_and(|t| (t - expected).abs() <= TIME_TOLERANCE * expected.abs().max(1.0))
    }

    fn handle_collision(&mut self, a: ParticleHandle, b: ParticleHandle) -> Result<()> {
        let store = self.grid.store();
        let delta = store.center(b) - store.center(a);
        let separation = delta + minimum_image_offset(delta, self.params.domain_size, self.params.dimensions);
        if separation.length_squared() == 0.0 {
            warn!("Particles {} and {} have coincident centers at t = {}; velocities kept.", a, b, self.current_time);
        }
        let (va, vb) = resolve_collision(separation, store.velocity(a), store.velocity(b));
        self.grid.set_velocity(a, va);
        self.grid.set_velocity(b, vb);

        self.grid.decrement_budget(a);
        self.grid.decrement_budget(b);
        self.collision_times.push(self.current_time);
        trace!("Collision {} / {} at t = {}.", a, b, self.current_time);

        for h in [a, b] {
            if self.grid.store().remaining_budget(h) > 0 {
                self.find_collision_events(h)?;
                self.schedule_crossing(h)?;
            }
        }
        Ok(())
    }

    /// Moves `particle` into its new home cell and predicts against the
    /// particles that just came into range.
    fn handle_crossing(&mut self, particle: ParticleHandle, to: usize) -> Result<()> {
        self.home_cells[particle.index()] = to;
        trace!("Particle {} entered cell {} at t = {}.", particle, to, self.current_time);
        self.find_collision_events(particle)?;
        self.schedule_crossing(particle)
    }

    /// Queues every predicted collision between `h` and the particles around its home cell.
    fn find_collision_events(&mut self, h: ParticleHandle) -> Result<()> {
        let partners = self.grid.particles_near_cell(self.home_cells[h.index()]);
        for other in partners {
            if other != h {
                self.add_collision_event(h, other)?;
            }
        }
        Ok(())
    }

    fn add_collision_event(&mut self, a: ParticleHandle, b: ParticleHandle) -> Result<()> {
        if let Some(t) = self.predict(a, b) {
            self.queue.push(self.current_time + t, EventKind::Collision { a, b })?;
        }
        Ok(())
    }

    /// Queues the moment `h` leaves its home cell, when that happens before the
    /// horizon. Grids of three cells or fewer per axis need no crossings: every
    /// cell neighbors every other.
    fn schedule_crossing(&mut self, h: ParticleHandle) -> Result<()> {
        if neighborhood_covers_grid(&self.params) || self.grid.store().remaining_budget(h) == 0 {
            return Ok(());
        }
        if let Some((t, to)) = self.next_crossing(h) {
            let time = self.current_time + t;
            if time <= self.params.max_time {
                let from = self.home_cells[h.index()];
                self.queue.push(time, EventKind::CellCrossing { particle: h, from, to })?;
            }
        }
        Ok(())
    }

    /// Relative time and target of the next exit from the home cell.
    fn next_crossing(&self, h: ParticleHandle) -> Option<(f64, usize)> {
        let store = self.grid.store();
        cell_exit(store.center(h), store.velocity(h), self.home_cells[h.index()], &self.params)
    }

    /// Earliest relative collision time of the pair over its periodic images.
    fn predict(&self, a: ParticleHandle, b: ParticleHandle) -> Option<f64> {
        let store = self.grid.store();
        let (pa, pb) = (store.get(a)?, store.get(b)?);
        let horizon = self.params.max_time - self.current_time;
        earliest_periodic_contact(pa, pb, horizon, self.params.domain_size, self.params.dimensions)
    }

    /// Advances every particle by `dt`, split so no update moves a particle
    /// further than one grid cell.
    fn advance(&mut self, dt: f64) {
        if dt <= 0.0 {
            return;
        }
        let max_speed = self.grid.max_speed();
        let max_step = if max_speed > 0.0 { self.params.grid_cell_size / max_speed } else { dt };
        let chunks = (dt / max_step).ceil().max(1.0) as usize;
        let sub_dt = dt / chunks as f64;
        for _ in 0..chunks {
            self.grid.update_positions(sub_dt);
        }
    }

    /// Drifts everything to the horizon and stops accepting events.
    fn finish(&mut self) {
        if self.current_time < self.params.max_time {
            self.advance(self.params.max_time - self.current_time);
            self.current_time = self.params.max_time;
        }
        self.state = SimState::Finished;
    }

    /// Absolute times of every resolved collision, in increasing order.
    pub fn collision_times(&self) -> &[f64] {
        &self.collision_times
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn state(&self) -> SimState {
        self.state
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    pub fn particle_count(&self) -> usize {
        self.grid.store().len()
    }

    pub fn particle(&self, handle: ParticleHandle) -> Option<&Particle> {
        self.grid.particle(handle)
    }

    pub fn particles(&self) -> impl Iterator<Item = &Particle> {
        self.grid.store().iter()
    }

    /// Queued events, stale ones included.
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    pub fn stale_events(&self) -> u64 {
        self.stale_events
    }

    /// Total kinetic energy, unit masses.
    pub fn kinetic_energy(&self) -> f64 {
        self.particles().map(|p| 0.5 * p.velocity().length_squared()).sum()
    }

    /// Total momentum, unit masses.
    pub fn total_momentum(&self) -> Vec3 {
        self.particles().fold(Vec3::zero(), |acc, p| acc + p.velocity())
    }

    /// Copies the current particle state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            time: self.current_time,
            total_particle_count: self.particle_count() as u32,
            collision_count: self.collision_times.len() as u64,
            particles: self.particles().map(Particle::snapshot).collect(),
        }
    }

    #[cfg(test)]
    fn queue_mut(&mut self) -> &mut EventQueue {
        &mut self.queue
    }

    #[cfg(test)]
    fn grid(&self) -> &SpatialGrid {
        &self.grid
    }
}

impl fmt::Display for EventDrivenSimulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EventDrivenSimulation {{ particles: {}, dimensions: {}, domain_size: {}, epsilon: {}, grid: {}^{} cells of {:.4}, max_time: {}, collision_budget: {} }}",
            self.particle_count(),
            self.params.dimensions,
            self.params.domain_size,
            self.params.epsilon,
            self.params.grid_resolution,
            self.params.dimensions,
            self.params.grid_cell_size,
            self.params.max_time,
            self.params.collision_budget,
        )
    }
}

/// Rejects parameters the engine cannot run with.
fn validate_params(params: &SimParams) -> Result<()> {
    if params.dimensions < 2 {
        return Err(Error::InvalidConfig(format!(
            "at least 2 spatial dimensions are required, got {}",
            params.dimensions
        )));
    }
    if params.dimensions > MAX_DIMENSIONS {
        return Err(Error::InvalidConfig(format!(
            "at most {} spatial dimensions are supported, got {}",
            MAX_DIMENSIONS, params.dimensions
        )));
    }
    if !params.domain_size.is_finite() || params.domain_size <= 0.0 {
        return Err(Error::InvalidConfig("domain size must be positive and finite".into()));
    }
    if !params.max_time.is_finite() || params.max_time < 0.0 {
        return Err(Error::InvalidConfig("max_time must be non-negative and finite".into()));
    }
    if params.grid_resolution == 0 || params.grid_cell_size <= 0.0 {
        return Err(Error::InvalidConfig(
            "particle density gives cells smaller than a particle".into(),
        ));
    }
    if 2.0 * params.radius > params.grid_cell_size || 4.0 * params.radius >= params.domain_size {
        return Err(Error::InvalidConfig(format!(
            "particle diameter {} is too large for cells of {} in a domain of {}",
            2.0 * params.radius,
            params.grid_cell_size,
            params.domain_size
        )));
    }
    Ok(())
}

/// Helper function for initial particle placement: uniform centers, unit
/// directions from the configured distribution scaled by the configured speed.
fn place_initial_particles(
    params: &SimParams,
    distribution: VelocityDistribution,
    count: usize,
    rng: &mut StdRng, // Uses the main host RNG
) -> Result<Vec<NewParticle>> {
    let position_dist = Uniform::new(0.0, params.domain_size).map_err(|e| Error::InvalidConfig(e.to_string()))?;
    let direction_dist = Uniform::new_inclusive(-1.0, 1.0).map_err(|e| Error::InvalidConfig(e.to_string()))?;

    let mut particles = Vec::new();
    particles
        .try_reserve_exact(count)
        .map_err(|_| Error::Allocation { what: "initial particles", count })?;

    for _ in 0..count {
        let mut center = Vec3::zero();
        for axis in 0..params.dimensions {
            center[axis] = rng.sample(position_dist);
        }

        let direction = loop {
            let mut v = Vec3::zero();
            for axis in 0..params.dimensions {
                v[axis] = match distribution {
                    VelocityDistribution::Normal => rng.sample(StandardNormal),
                    VelocityDistribution::Uniform => rng.sample(direction_dist),
                };
            }
            let len_sq = v.length_squared();
            // Uniform directions come from points inside the unit ball
            let accept = match distribution {
                VelocityDistribution::Normal => len_sq > 1e-24,
                VelocityDistribution::Uniform => len_sq > 1e-24 && len_sq <= 1.0,
            };
            if accept {
                break v.normalize_or_zero();
            }
        };

        particles.push(NewParticle::new(params.radius, center, direction * params.speed));
    }
    Ok(particles)
}

use crate::error::{Error, Result};
use crate::store::{NewParticle, Particle, ParticleHandle, ParticleStore};
use simulation_common::{SimParams, Vec3, MAX_DIMENSIONS};

/// Wraps one coordinate into `[0, domain_size)`, assuming it is at most one
/// domain width outside.
#[inline(always)]
pub fn wrap_coordinate(x: f64, domain_size: f64) -> f64 {
    let wrapped = if x < 0.0 {
        x + domain_size
    } else if x >= domain_size {
        x - domain_size
    } else {
        x
    };
    // a tiny negative x can round up to exactly domain_size
    if wrapped >= domain_size { 0.0 } else { wrapped }
}

/// Wraps every active axis of `pos` into the domain.
#[inline(always)]
pub fn wrap_position(pos: Vec3, params: &SimParams) -> Vec3 {
    let mut wrapped = pos;
    for axis in 0..params.dimensions {
        wrapped[axis] = wrap_coordinate(pos[axis], params.domain_size);
    }
    wrapped
}

// Calculates the flat grid cell index for a given position: floor(coord / cell_size)
// per axis, combined as sum(axis_index * resolution^axis).
#[inline(always)]
pub fn get_grid_cell_idx(pos: Vec3, params: &SimParams) -> usize {
    if params.grid_resolution == 0 { return 0; } // Avoid panic if grid is invalid
    let mut index = 0;
    let mut stride = 1;
    for axis in 0..params.dimensions {
        let coord = wrap_coordinate(pos[axis], params.domain_size);
        let cell = (coord * params.inv_grid_cell_size).floor() as usize;
        // Clamp to grid dimensions to handle edge cases
        index += cell.min(params.grid_resolution - 1) * stride;
        stride *= params.grid_resolution;
    }
    index
}

/// Per-axis cell coordinates of a flat cell index.
#[inline(always)]
pub fn cell_coords(cell_index: usize, params: &SimParams) -> [usize; MAX_DIMENSIONS] {
    let mut coords = [0usize; MAX_DIMENSIONS];
    let mut rest = cell_index;
    for coord in coords.iter_mut().take(params.dimensions) {
        *coord = rest % params.grid_resolution;
        rest /= params.grid_resolution;
    }
    coords
}

/// Flat index of per-axis cell coordinates, the inverse of [`cell_coords`].
#[inline(always)]
pub fn flat_cell_index(coords: &[usize; MAX_DIMENSIONS], params: &SimParams) -> usize {
    let mut index = 0;
    let mut stride = 1;
    for &coord in coords.iter().take(params.dimensions) {
        index += coord * stride;
        stride *= params.grid_resolution;
    }
    index
}

/// The 3^d cells around `cell_index` (itself included), each axis offset by
/// -1, 0 or +1 and wrapped. Returned sorted and without repeats, which only
/// occur on grids narrower than three cells.
pub fn neighbor_cells(cell_index: usize, params: &SimParams) -> Vec<usize> {
    let res = params.grid_resolution as isize;
    let center = cell_coords(cell_index, params);
    let count = 3usize.pow(params.dimensions as u32);

    let mut cells = Vec::with_capacity(count);
    for i in 0..count {
        let mut coords = center;
        let mut code = i;
        for coord in coords.iter_mut().take(params.dimensions) {
            let shift = (code % 3) as isize - 1;
            code /= 3;
            *coord = (*coord as isize + shift).rem_euclid(res) as usize;
        }
        cells.push(flat_cell_index(&coords, params));
    }
    cells.sort_unstable();
    cells.dedup();
    cells
}

/// True when every cell is a neighbor of every other, so no particle can
/// ever move out of another's neighborhood.
#[inline]
pub fn neighborhood_covers_grid(params: &SimParams) -> bool {
    params.grid_resolution <= 3
}

/// When and where a particle moving with `velocity` leaves `cell_index`.
///
/// Returns the time until its center reaches the first face of the cell in
/// the direction of motion, and the adjacent cell behind that face. The cell
/// is taken as given rather than recomputed from `center`, so a particle
/// sitting exactly on a face leaves the cell it is tracked in. `None` at rest.
pub fn cell_exit(center: Vec3, velocity: Vec3, cell_index: usize, params: &SimParams) -> Option<(f64, usize)> {
    let coords = cell_coords(cell_index, params);
    let mut exit: Option<(f64, usize, bool)> = None;
    for axis in 0..params.dimensions {
        let v = velocity[axis];
        if v == 0.0 {
            continue;
        }
        // lower face relative to the particle, through the nearest image
        let mut lower = coords[axis] as f64 * params.grid_cell_size - center[axis];
        lower -= params.domain_size * (lower / params.domain_size).round();
        let t = if v > 0.0 { (lower + params.grid_cell_size) / v } else { lower / v };
        let t = t.max(0.0);
        match exit {
            Some((best, _, _)) if best <= t => {}
            _ => exit = Some((t, axis, v > 0.0)),
        }
    }

    exit.map(|(t, axis, upward)| {
        let res = params.grid_resolution;
        let mut next = coords;
        next[axis] = if upward { (next[axis] + 1) % res } else { (next[axis] + res - 1) % res };
        (t, flat_cell_index(&next, params))
    })
}

/// Particle handles currently inside one cubic region of the domain.
#[derive(Debug, Default, Clone)]
pub struct GridCell {
    handles: Vec<ParticleHandle>,
}

impl GridCell {
    pub fn handles(&self) -> &[ParticleHandle] {
        &self.handles
    }

    fn remove(&mut self, handle: ParticleHandle) -> bool {
        match self.handles.iter().position(|&h| h == handle) {
            Some(pos) => {
                self.handles.swap_remove(pos);
                true
            }
            None => false,
        }
    }
}

/// Uniform grid over the periodic domain. Owns the particle store.
#[derive(Debug)]
pub struct SpatialGrid {
    params: SimParams,
    cells: Vec<GridCell>,
    store: ParticleStore,
    // Grid cell index for each particle
    particle_cells: Vec<usize>,
}

impl SpatialGrid {
    /// Allocates `resolution^d` cells and files every particle under the cell
    /// of its (wrapped) initial center. Centers themselves are stored as given.
    pub fn new(params: SimParams, particles: &[NewParticle]) -> Result<Self> {
        let num_cells = params.num_grid_cells;
        let mut cells = Vec::new();
        cells
            .try_reserve_exact(num_cells)
            .map_err(|_| Error::Allocation { what: "grid cells", count: num_cells })?;
        cells.resize_with(num_cells, GridCell::default);

        let mut particle_cells = Vec::new();
        particle_cells
            .try_reserve_exact(particles.len())
            .map_err(|_| Error::Allocation { what: "particle cell indices", count: particles.len() })?;

        let mut grid = Self {
            store: ParticleStore::with_capacity(particles.len())?,
            params,
            cells,
            particle_cells,
        };
        for new in particles {
            grid.add_particle(*new)?;
        }
        Ok(grid)
    }

    fn add_particle(&mut self, new: NewParticle) -> Result<ParticleHandle> {
        let handle = self.store.insert(new, self.params.collision_budget)?;
        let cell = get_grid_cell_idx(new.center, &self.params);
        self.cells[cell].handles.push(handle);
        self.particle_cells.push(cell);
        Ok(handle)
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    /// Read access to the particle store.
    pub fn store(&self) -> &ParticleStore {
        &self.store
    }

    pub fn particle(&self, handle: ParticleHandle) -> Option<&Particle> {
        self.store.get(handle)
    }

    /// Cell the particle is currently filed under.
    pub fn cell_of(&self, handle: ParticleHandle) -> usize {
        self.particle_cells[handle.index()]
    }

    pub fn set_velocity(&mut self, handle: ParticleHandle, velocity: Vec3) {
        self.store.set_velocity(handle, velocity);
    }

    pub fn decrement_budget(&mut self, handle: ParticleHandle) {
        self.store.decrement_budget(handle);
    }

    /// Fastest particle speed; bounds how far one update may move anything.
    pub fn max_speed(&self) -> f64 {
        self.store.iter().map(|p| p.velocity().length()).fold(0.0, f64::max)
    }

    /// Handles filed in `cell_index` and its neighbor cells.
    pub fn particles_near_cell(&self, cell_index: usize) -> Vec<ParticleHandle> {
        let mut nearby = Vec::new();
        for neighbor_cell in neighbor_cells(cell_index, &self.params) {
            nearby.extend_from_slice(self.cells[neighbor_cell].handles());
        }
        nearby
    }

    /// Handles in the 3^d neighborhood of `handle`, itself included.
    pub fn nearby_particles(&self, handle: ParticleHandle) -> Vec<ParticleHandle> {
        match self.particle_cells.get(handle.index()) {
            Some(&cell) => self.particles_near_cell(cell),
            None => {
                log::error!("Particle {} has no grid cell during neighbor search.", handle);
                Vec::new()
            }
        }
    }

    /// Moves every particle by `velocity * dt`, wraps it into the domain and
    /// refiles it when its cell changed. Handles stay valid throughout.
    ///
    /// Callers keep each move under one domain width; wrapping corrects once.
    pub fn update_positions(&mut self, dt: f64) {
        for i in 0..self.store.len() {
            let handle = ParticleHandle(i as u32);
            let moved = self.store.center(handle) + self.store.velocity(handle) * dt;
            let wrapped = wrap_position(moved, &self.params);
            self.store.set_center(handle, wrapped);

            let old_cell = self.particle_cells[i];
            let new_cell = get_grid_cell_idx(wrapped, &self.params);
            if old_cell != new_cell {
                if !self.cells[old_cell].remove(handle) {
                    log::error!("Particle {} missing from its grid cell {}.", handle, old_cell);
                }
                self.cells[new_cell].handles.push(handle);
                self.particle_cells[i] = new_cell;
            }
        }
    }

    /// Checks that every handle sits in exactly one cell, the one matching its center.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let mut seen = vec![0usize; self.store.len()];
        for (cell_index, cell) in self.cells.iter().enumerate() {
            for &h in cell.handles() {
                seen[h.index()] += 1;
                assert_eq!(cell_index, get_grid_cell_idx(self.store.center(h), &self.params));
                assert_eq!(cell_index, self.particle_cells[h.index()]);
            }
        }
        assert!(seen.iter().all(|&n| n == 1), "handle filed in zero or several cells");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(res: usize) -> SimParams {
        SimParams::for_grid(1.0, 3, res, 0.05, 1.0, 1)
    }

    fn at(x: f64, y: f64, z: f64, v: [f64; 3]) -> NewParticle {
        NewParticle::new(0.05, Vec3::new(x, y, z), Vec3::from(v))
    }

    #[test]
    fn cell_index_is_mixed_radix() {
        let p = params(4);
        assert_eq!(get_grid_cell_idx(Vec3::new(0.0, 0.0, 0.0), &p), 0);
        assert_eq!(get_grid_cell_idx(Vec3::new(0.3, 0.0, 0.0), &p), 1);
        assert_eq!(get_grid_cell_idx(Vec3::new(0.0, 0.3, 0.0), &p), 4);
        assert_eq!(get_grid_cell_idx(Vec3::new(0.8, 0.6, 0.3), &p), 3 + 2 * 4 + 16);
        // the upper face is the lower face
        assert_eq!(get_grid_cell_idx(Vec3::new(1.0, 0.0, 0.0), &p), 0);
        assert_eq!(cell_coords(3 + 2 * 4 + 16, &p), [3, 2, 1]);
    }

    #[test]
    fn two_dimensional_grid_ignores_z() {
        let p = SimParams::for_grid(1.0, 2, 5, 0.05, 1.0, 1);
        assert_eq!(p.num_grid_cells, 25);
        assert_eq!(get_grid_cell_idx(Vec3::new(0.5, 0.9, 0.7), &p), 2 + 4 * 5);
        assert_eq!(neighbor_cells(0, &p).len(), 9);
    }

    #[test]
    fn neighbor_cells_wrap_around_corners() {
        let p = params(4);
        let cells = neighbor_cells(0, &p);
        assert_eq!(cells.len(), 27);
        assert!(cells.contains(&0));
        // (3,3,3) is diagonally adjacent to (0,0,0) through the corner
        assert!(cells.contains(&(3 + 3 * 4 + 3 * 16)));
        // (2,0,0) is not adjacent
        assert!(!cells.contains(&2));
    }

    #[test]
    fn narrow_grids_do_not_repeat_cells() {
        let p = params(2);
        assert_eq!(neighbor_cells(0, &p), (0..8).collect::<Vec<_>>());
        let p = params(1);
        assert_eq!(neighbor_cells(0, &p), vec![0]);
    }

    #[test]
    fn cell_exit_finds_first_face_in_direction_of_motion() {
        let p = params(4);
        let cell = get_grid_cell_idx(Vec3::new(0.3, 0.6, 0.5), &p);
        // y leaves through 0.75 after 0.15 / 2, x through 0.5 after 0.2
        let exit = cell_exit(Vec3::new(0.3, 0.6, 0.5), Vec3::new(1.0, 2.0, 0.0), cell, &p);
        let (t, next) = exit.expect("moving particle leaves its cell");
        assert!((t - 0.075).abs() < 1e-12);
        assert_eq!(cell_coords(next, &p), [1, 3, 2]);
        assert_eq!(cell_exit(Vec3::new(0.3, 0.6, 0.5), Vec3::zero(), cell, &p), None);
    }

    #[test]
    fn cell_exit_wraps_through_the_domain_face() {
        let p = params(4);
        // raw center on the upper face, tracked in cell x = 0
        let cell = get_grid_cell_idx(Vec3::new(1.0, 0.5, 0.5), &p);
        let (t, next) = cell_exit(Vec3::new(1.0, 0.5, 0.5), Vec3::new(-1.0, 0.0, 0.0), cell, &p)
            .expect("moving particle leaves its cell");
        assert_eq!(t, 0.0);
        assert_eq!(cell_coords(next, &p)[0], 3);

        let center = Vec3::new(0.9, 0.5, 0.5);
        let (t, next) = cell_exit(center, Vec3::new(2.0, 0.0, 0.0), get_grid_cell_idx(center, &p), &p)
            .expect("moving particle leaves its cell");
        assert!((t - 0.05).abs() < 1e-12);
        assert_eq!(cell_coords(next, &p)[0], 0);
        assert_eq!(flat_cell_index(&cell_coords(next, &p), &p), next);
    }

    #[test]
    fn wrap_coordinate_folds_once() {
        assert!((wrap_coordinate(1.15, 1.0) - 0.15).abs() < 1e-12);
        assert!((wrap_coordinate(-0.25, 1.0) - 0.75).abs() < 1e-12);
        assert_eq!(wrap_coordinate(1.0, 1.0), 0.0);
        assert_eq!(wrap_coordinate(-1e-20, 1.0), 0.0);
        assert_eq!(wrap_coordinate(0.5, 1.0), 0.5);
    }

    #[test]
    fn nearby_includes_self_and_cross_face_neighbours() -> Result<()> {
        let grid = SpatialGrid::new(
            params(4),
            &[
                at(0.05, 0.5, 0.5, [0.0; 3]), // cell x=0
                at(0.95, 0.5, 0.5, [0.0; 3]), // cell x=3, adjacent through the face
                at(0.55, 0.5, 0.5, [0.0; 3]), // cell x=2, not adjacent to x=0
            ],
        )?;
        let nearby = grid.nearby_particles(ParticleHandle(0));
        assert!(nearby.contains(&ParticleHandle(0)));
        assert!(nearby.contains(&ParticleHandle(1)));
        assert!(!nearby.contains(&ParticleHandle(2)));
        grid.assert_consistent();
        Ok(())
    }

    #[test]
    fn update_positions_wraps_and_refiles() -> Result<()> {
        let mut grid = SpatialGrid::new(
            params(4),
            &[at(0.75, 0.5, 0.5, [1.0, 0.0, 0.0]), at(0.2, 0.2, 0.2, [0.0, -1.0, 0.0])],
        )?;
        let a = ParticleHandle(0);
        let id_before = grid.particle(a).map(|p| p.id());
        for _ in 0..2 {
            grid.update_positions(0.2);
            grid.assert_consistent();
        }
        let pa = grid.store().center(a);
        assert!(pa.approx_eq(Vec3::new(0.15, 0.5, 0.5), 1e-12));
        assert_eq!(grid.store().velocity(a), Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(grid.particle(a).map(|p| p.id()), id_before);
        assert_eq!(grid.cell_of(a), get_grid_cell_idx(pa, grid.params()));

        let pb = grid.store().center(ParticleHandle(1));
        assert!(pb.approx_eq(Vec3::new(0.2, 0.8, 0.2), 1e-12));
        Ok(())
    }

    #[test]
    fn initial_center_on_upper_face_is_kept_raw() -> Result<()> {
        let grid = SpatialGrid::new(params(4), &[at(1.0, 0.5, 0.5, [0.0; 3])])?;
        assert_eq!(grid.store().center(ParticleHandle(0)).x, 1.0);
        assert_eq!(grid.cell_of(ParticleHandle(0)), get_grid_cell_idx(Vec3::new(0.0, 0.5, 0.5), grid.params()));
        grid.assert_consistent();
        Ok(())
    }
}

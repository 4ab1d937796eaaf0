use serde::{Deserialize, Serialize};

/// Total cell budget for the spatial grid. Resolutions that would exceed it are
/// reduced; larger cells only widen the neighbor search.
pub const MAX_GRID_CELLS: usize = 1 << 21;

/// Simulation parameters derived from the configuration, used frequently during simulation steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimParams {
    // Domain & Grid
    pub domain_size: f64,
    pub dimensions: usize,
    pub grid_cell_size: f64,
    pub inv_grid_cell_size: f64,
    pub grid_resolution: usize,
    pub num_grid_cells: usize,

    // Time
    pub max_time: f64,

    // Particle properties
    pub epsilon: f64, // Particle diameter derived from the target density
    pub radius: f64,
    pub speed: f64,
    pub collision_budget: u32,
}

impl SimParams {
    /// Builds parameters for an explicit grid, bypassing the density derivation.
    ///
    /// `radius` is the default radius for generated particles; hand-placed
    /// particles carry their own.
    pub fn for_grid(
        domain_size: f64,
        dimensions: usize,
        grid_resolution: usize,
        radius: f64,
        max_time: f64,
        collision_budget: u32,
    ) -> Self {
        let grid_cell_size = if grid_resolution > 0 {
            domain_size / grid_resolution as f64
        } else {
            0.0
        };
        let inv_grid_cell_size = if grid_cell_size > 1e-12 { 1.0 / grid_cell_size } else { 0.0 };
        let num_grid_cells = u32::try_from(dimensions)
            .ok()
            .and_then(|d| grid_resolution.checked_pow(d))
            .unwrap_or(usize::MAX);

        SimParams {
            domain_size,
            dimensions,
            grid_cell_size,
            inv_grid_cell_size,
            grid_resolution,
            num_grid_cells,
            max_time,
            epsilon: 2.0 * radius,
            radius,
            speed: 1.0,
            collision_budget,
        }
    }

    /// Largest per-axis resolution whose cell count stays within [`MAX_GRID_CELLS`].
    pub fn max_resolution(dimensions: usize) -> usize {
        let dims = dimensions.max(1) as f64;
        let mut res = (MAX_GRID_CELLS as f64).powf(1.0 / dims).floor() as usize;
        // powf can land one off the exact root in either direction
        let fits = |r: usize| r.checked_pow(dimensions as u32).is_some_and(|c| c <= MAX_GRID_CELLS);
        while res > 1 && !fits(res) {
            res -= 1;
        }
        while fits(res + 1) {
            res += 1;
        }
        res
    }
}

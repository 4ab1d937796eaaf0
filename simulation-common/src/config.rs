use serde::{Deserialize, Serialize};
use anyhow::Result;
use crate::sim_params::SimParams;
use std::path::Path;

// Configuration for the periodic domain
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DomainConfig {
    #[serde(default = "default_domain_size")]
    pub size: f64,
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

// Configuration for timing
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimingConfig {
    #[serde(default = "default_max_time")]
    pub max_time: f64,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VelocityDistribution {
    /// Normal components, normalized afterwards.
    Normal,
    /// Uniform direction on the unit sphere.
    Uniform,
}

// Initial conditions for the simulation, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct InitialConditions {
    /// Mean of the Poisson distribution the particle count is drawn from.
    pub mean_particle_count: u32,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_velocity_distribution")]
    pub velocity_distribution: VelocityDistribution,
    #[serde(default = "default_speed")]
    pub speed: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CollisionConfig {
    #[serde(default = "default_budget")]
    pub budget: u32,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        CollisionConfig { budget: default_budget() }
    }
}

// Configuration for output settings, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    pub base_filename: String,
    #[serde(default = "default_true")]
    pub save_collision_times: bool,
    #[serde(default)]
    pub save_final_snapshot: bool,
    pub format: Option<String>, // Output format: "json", "bincode", "messagepack"
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            base_filename: "hard_spheres".to_string(),
            save_collision_times: true,
            save_final_snapshot: false,
            format: None,
        }
    }
}

// Main simulation configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SimulationConfig {
    pub domain: DomainConfig,
    pub timing: TimingConfig,
    pub initial_conditions: InitialConditions,
    #[serde(default)]
    pub collisions: CollisionConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl SimulationConfig {
    /// Loads the simulation configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        let config = Self::from_toml_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", path_ref.display(), e))?;
        Ok(config)
    }

    /// Parses and validates a configuration held in memory.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: SimulationConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.domain.size.is_finite() || self.domain.size <= 0.0 {
            anyhow::bail!("domain.size must be positive and finite.");
        }
        if self.initial_conditions.mean_particle_count == 0 {
            anyhow::bail!("mean_particle_count must be greater than 0.");
        }
        if !self.timing.max_time.is_finite() || self.timing.max_time < 0.0 {
            anyhow::bail!("max_time must be non-negative and finite.");
        }
        if !self.initial_conditions.speed.is_finite() || self.initial_conditions.speed < 0.0 {
            anyhow::bail!("speed must be non-negative and finite.");
        }
        // Dimension and density checks happen when the engine is built,
        // since they depend on the derived grid.
        Ok(())
    }

    /// Converts the configuration into simulation parameters used at runtime.
    pub fn get_sim_params(&self) -> SimParams {
        let size = self.domain.size;
        let dims = self.domain.dimensions;
        let n = self.initial_conditions.mean_particle_count as f64;

        // epsilon = size^d / n^(1/(d-1)); one particle diameter
        let exponent = if dims > 1 { 1.0 / (dims as f64 - 1.0) } else { 1.0 };
        let epsilon = size.powi(dims as i32) / n.powf(exponent);

        // Number of cells per axis, never smaller than a particle
        let mut grid_resolution = if epsilon > 0.0 { (size / epsilon).floor() as usize } else { 0 };
        grid_resolution = grid_resolution.min(SimParams::max_resolution(dims));

        let mut params = SimParams::for_grid(
            size,
            dims,
            grid_resolution,
            epsilon / 2.0,
            self.timing.max_time,
            self.collisions.budget,
        );
        params.epsilon = epsilon;
        params.speed = self.initial_conditions.speed;
        params
    }
}

fn default_domain_size() -> f64 {
    1.0
}

fn default_dimensions() -> usize {
    3
}

fn default_max_time() -> f64 {
    1.0
}

fn default_velocity_distribution() -> VelocityDistribution {
    VelocityDistribution::Normal
}

fn default_speed() -> f64 {
    1.0
}

fn default_budget() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [domain]
        [timing]
        max_time = 2.0
        [initial_conditions]
        mean_particle_count = 100
        seed = 7
    "#;

    #[test]
    fn minimal_config_uses_defaults() -> Result<()> {
        let config = SimulationConfig::from_toml_str(MINIMAL)?;
        assert_eq!(config.domain.size, 1.0);
        assert_eq!(config.domain.dimensions, 3);
        assert_eq!(config.collisions.budget, 1);
        assert_eq!(config.initial_conditions.velocity_distribution, VelocityDistribution::Normal);
        assert_eq!(config.initial_conditions.seed, Some(7));
        assert!(config.output.save_collision_times);
        Ok(())
    }

    #[test]
    fn sim_params_follow_density() -> Result<()> {
        let config = SimulationConfig::from_toml_str(MINIMAL)?;
        let p = config.get_sim_params();
        // 3D: epsilon = 1 / sqrt(100) = 0.1
        assert!((p.epsilon - 0.1).abs() < 1e-12);
        assert!((p.radius - 0.05).abs() < 1e-12);
        assert_eq!(p.grid_resolution, 10);
        assert_eq!(p.num_grid_cells, 1000);
        assert!(p.grid_cell_size >= p.epsilon);
        assert_eq!(p.max_time, 2.0);
        Ok(())
    }

    #[test]
    fn rejects_zero_particle_mean() {
        let bad = MINIMAL.replace("mean_particle_count = 100", "mean_particle_count = 0");
        let err = SimulationConfig::from_toml_str(&bad).unwrap_err();
        assert!(err.to_string().contains("mean_particle_count"));
    }

    #[test]
    fn parses_uniform_distribution() -> Result<()> {
        let cfg = MINIMAL.replace("seed = 7", "seed = 7\nvelocity_distribution = \"uniform\"");
        let config = SimulationConfig::from_toml_str(&cfg)?;
        assert_eq!(config.initial_conditions.velocity_distribution, VelocityDistribution::Uniform);
        Ok(())
    }
}

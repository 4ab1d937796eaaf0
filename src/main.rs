use anyhow::Result;
use clap::Parser;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;
use log::{info, error, debug};

use hard_sphere_engine::EventDrivenSimulation;
use simulation_common::{SimulationConfig, Snapshot};

#[derive(Parser, Debug)]
#[command(author, version, about = "Event-driven hard-sphere gas in a periodic box", long_about = None)]
struct Args {
    /// Path to the simulation config
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Overrides the seed from the config
    #[arg(short, long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();
    let args = Args::parse();

    info!("Starting hard-sphere collision engine...");

    // --- Load Configuration ---
    let mut config = SimulationConfig::load(&args.config)?;
    if let Some(seed) = args.seed {
        info!("Overriding seed with {}.", seed);
        config.initial_conditions.seed = Some(seed);
    }

    // --- Initialize Simulation ---
    let mut sim = EventDrivenSimulation::new(&config)
        .map_err(|e| anyhow::anyhow!("Failed to build simulation: {}", e))?;
    info!("State initialized with {} particles.", sim.particle_count());
    debug!("Simulation Parameters: {:#?}", sim.params());

    let energy_before = sim.kinetic_energy();
    sim.initialize_events()?;
    info!("Seeded {} candidate events.", sim.pending_events());

    // --- Event Loop ---
    let start_time = Instant::now();
    let collisions = sim.run()?;
    let total_duration = start_time.elapsed();
    info!(
        "Simulation finished in {:.3} seconds: {} collisions up to t = {}.",
        total_duration.as_secs_f64(),
        collisions,
        sim.current_time()
    );
    debug!(
        "Kinetic energy {:.9} -> {:.9}, {} stale events discarded.",
        energy_before,
        sim.kinetic_energy(),
        sim.stale_events()
    );

    // --- Save Recorded Data ---
    let base = &config.output.base_filename;
    if config.output.save_collision_times {
        let filename = format!("{}_collision_times.csv", base);
        // One record per run, appended so repeated runs accumulate
        let file = OpenOptions::new().create(true).append(true).open(&filename)
            .map_err(|e| anyhow::anyhow!("Error opening '{}': {}", filename, e))?;
        let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(file);
        writer.write_record(sim.collision_times().iter().map(|t| t.to_string()))?;
        writer.flush()?;
        info!("Collision times appended to {}", filename);
    } else {
        info!("Skipping saving collision times as per config.");
    }

    if config.output.save_final_snapshot {
        let output_format = config.output.format.as_deref().unwrap_or("json");
        save_snapshot(&sim.snapshot(), base, output_format);
    } else {
        info!("Skipping saving final snapshot as per config.");
    }

    info!("Simulation Complete.");
    Ok(())
}

fn save_snapshot(snapshot: &Snapshot, base: &str, output_format: &str) {
    match output_format {
        "bincode" => {
            // Binary format (much more compact)
            let filename = format!("{}_snapshot.bin", base);
            match File::create(&filename) {
                Ok(file) => match bincode::serialize_into(file, snapshot) {
                    Ok(_) => info!("Final snapshot saved to {} (binary format)", filename),
                    Err(e) => error!("Error serializing snapshot to bincode: {}", e),
                },
                Err(e) => error!("Error creating snapshot file '{}': {}", filename, e),
            }
        }
        "messagepack" => {
            // MessagePack format (compact and cross-platform)
            let filename = format!("{}_snapshot.msgpack", base);
            match &mut File::create(&filename) {
                Ok(file) => match rmp_serde::encode::write(file, snapshot) {
                    Ok(_) => info!("Final snapshot saved to {} (MessagePack format)", filename),
                    Err(e) => error!("Error serializing snapshot to MessagePack: {}", e),
                },
                Err(e) => error!("Error creating snapshot file '{}': {}", filename, e),
            }
        }
        other => {
            if other != "json" {
                error!("Unknown output format: {}. Using JSON instead.", other);
            }
            let filename = format!("{}_snapshot.json", base);
            match File::create(&filename) {
                Ok(mut file) => match serde_json::to_string(snapshot) {
                    Ok(json_string) => {
                        if let Err(e) = file.write_all(json_string.as_bytes()) {
                            error!("Error writing snapshot JSON to file '{}': {}", filename, e);
                        } else {
                            info!("Final snapshot saved to {}", filename);
                        }
                    }
                    Err(e) => error!("Error serializing snapshot to JSON: {}", e),
                },
                Err(e) => error!("Error creating snapshot file '{}': {}", filename, e),
            }
        }
    }
}

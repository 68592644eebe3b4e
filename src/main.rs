//! Grid Neighbor-Search Particle Simulation
//!
//! Headless driver: seeds a population, runs the six-stage GPU pipeline
//! once per tick with measured delta times, and periodically reads the
//! canonical particle store back to log summary statistics.

use glam::Vec3;
use neighbor_core::{seed_particles, SimConfig};
use neighbor_simulation::NeighborSimulation;
use std::time::Instant;

const TICKS: u32 = 600;
const REPORT_INTERVAL: u32 = 60;

async fn init_device() -> Result<(wgpu::Device, wgpu::Queue), Box<dyn std::error::Error>> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    });

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await?;

    log::info!("✓ Using GPU: {}", adapter.get_info().name);

    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some("Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            trace: wgpu::Trace::Off,
        })
        .await?;

    Ok((device, queue))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger (RUST_LOG=debug for verbose output)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting grid neighbor-search simulation...");

    let config = SimConfig::default();
    let particles = seed_particles(&config)?;
    log::info!("✓ Seeded {} particles", particles.len());

    let (device, queue) = pollster::block_on(init_device())?;
    let mut sim =
        pollster::block_on(NeighborSimulation::new(device, queue, &particles, &config))?;
    log::info!("✓ Simulation initialized");

    let mut last_tick = Instant::now();
    for tick in 0..TICKS {
        let dt = last_tick.elapsed().as_secs_f32();
        last_tick = Instant::now();

        sim.step(dt);

        // Slot identities are permuted every tick, so each report re-reads
        // the canonical store instead of reusing a previous readback.
        if tick % REPORT_INTERVAL == 0 {
            let particles = sim.read_particles()?;
            let with_neighbor = particles
                .iter()
                .filter(|p| p.color == config.highlight_color)
                .count();
            let avg_speed = particles
                .iter()
                .map(|p| p.velocity().length())
                .sum::<f32>()
                / particles.len() as f32;
            let center = particles
                .iter()
                .fold(Vec3::ZERO, |acc, p| acc + p.position())
                / particles.len() as f32;
            log::info!(
                "tick {:4}: {}/{} particles have a neighbor, avg speed {:.2}, center ({:.1}, {:.1}, {:.1})",
                tick,
                with_neighbor,
                particles.len(),
                avg_speed,
                center.x,
                center.y,
                center.z
            );
        }
    }

    sim.destroy();
    log::info!("Done after {} ticks", TICKS);
    Ok(())
}

//! Population seeding.
//!
//! Positions are uniform in the cubic extent; velocities are random
//! directions on the unit sphere scaled by the configured speed. The seeded
//! population is handed to the GPU simulation as its initial store.

use crate::config::{ConfigError, SimConfig};
use crate::particle::Particle;
use glam::Vec3;
use rand::Rng;

/// Seed a population from the configuration using the thread-local RNG.
///
/// The returned vector's length is the population rounded up to the next
/// power of two, which is the canonical count for the rest of the pipeline.
pub fn seed_particles(config: &SimConfig) -> Result<Vec<Particle>, ConfigError> {
    seed_particles_with(config, &mut rand::rng())
}

/// Seed a population with a caller-provided RNG (deterministic in tests).
pub fn seed_particles_with<R: Rng>(
    config: &SimConfig,
    rng: &mut R,
) -> Result<Vec<Particle>, ConfigError> {
    config.validate()?;
    let count = config.rounded_population()?;

    let mut particles = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let position = Vec3::new(
            rng.random_range(-config.extent..config.extent),
            rng.random_range(-config.extent..config.extent),
            rng.random_range(-config.extent..config.extent),
        );
        let velocity = random_unit_vector(rng) * config.speed;
        particles.push(Particle::new(
            position,
            velocity,
            config.base_color,
            config.scale,
        ));
    }

    Ok(particles)
}

/// Uniform random direction on the unit sphere.
fn random_unit_vector<R: Rng>(rng: &mut R) -> Vec3 {
    let theta = rng.random::<f32>() * std::f32::consts::TAU;
    let cos_phi = rng.random::<f32>() * 2.0 - 1.0;
    let sin_phi = (1.0 - cos_phi * cos_phi).sqrt();
    Vec3::new(sin_phi * theta.cos(), sin_phi * theta.sin(), cos_phi)
}

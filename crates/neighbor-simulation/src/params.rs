//! Uniform parameter blocks shared with the compute shaders.

use bytemuck::{Pod, Zeroable};
use neighbor_core::{GridSpec, SimConfig};

/// Per-tick simulation parameters (matches the WGSL `SimParams` struct).
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct SimParams {
    // Group 1: response colors
    pub base_color: [f32; 4],
    pub highlight_color: [f32; 4],
    pub target_color: [f32; 4],

    // Group 2: grid geometry and per-tick scalars
    // x: min_grid, y: cell_size, z: search_radius, w: dt
    pub min_grid: f32,
    pub cell_size: f32,
    pub search_radius: f32,
    pub dt: f32,

    // Group 3: counts
    // x: grid_resolution, y: cell_count, z: particle_count, w: target_index
    pub grid_resolution: u32,
    pub cell_count: u32,
    pub particle_count: u32,
    pub target_index: u32,

    // Group 4: response tuning
    // x: steer_strength, yzw: padding
    pub steer_strength: f32,
    pub _pad: [f32; 3],
}

impl SimParams {
    /// Build the uniform block from the validated configuration, the
    /// derived grid geometry and the canonical (power-of-two) count.
    pub fn new(config: &SimConfig, grid: &GridSpec, particle_count: u32) -> Self {
        Self {
            base_color: config.base_color,
            highlight_color: config.highlight_color,
            target_color: config.target_color,
            min_grid: grid.min_corner(),
            cell_size: grid.cell_size,
            search_radius: config.search_radius,
            dt: 0.0,
            grid_resolution: grid.resolution,
            cell_count: grid.cell_count(),
            particle_count,
            target_index: config.target_index,
            steer_strength: config.steer_strength,
            _pad: [0.0; 3],
        }
    }
}

/// One bitonic compare-and-swap pass (matches the WGSL `SortPass` struct).
/// Stored once per pass in a uniform buffer and selected with a dynamic
/// offset, one dispatch per pass.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct SortPassParams {
    pub swap_distance: u32,
    pub block_size: u32,
    pub _pad: [u32; 2],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_layout() {
        // Three vec4 color rows plus three scalar rows.
        assert_eq!(std::mem::size_of::<SimParams>(), 96);
        assert_eq!(std::mem::size_of::<SortPassParams>(), 16);
    }

    #[test]
    fn test_params_from_config() {
        let config = SimConfig::default();
        let grid = config.grid();
        let params = SimParams::new(&config, &grid, 4096);

        assert_eq!(params.min_grid, -config.extent);
        assert_eq!(params.cell_size, config.search_radius);
        assert_eq!(params.cell_count, grid.cell_count());
        assert_eq!(params.particle_count, 4096);
        assert_eq!(params.dt, 0.0);
    }
}

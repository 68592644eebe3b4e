//! CPU reference implementations of the pipeline stages.
//!
//! NOTE: These are reference implementations for documentation and testing.
//! The actual simulation runs the equivalent GPU compute kernels; the GPU
//! integration tests cross-check device results against this module.

use crate::config::SimConfig;
use crate::grid::{CellEntry, CellRange, GridSpec};
use crate::particle::Particle;
use glam::UVec3;

/// Parameters of a single bitonic compare-and-swap pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SortPass {
    pub swap_distance: u32,
    pub block_size: u32,
}

/// The fixed pass sequence sorting `n` elements (`n` a power of two):
/// outer stage `i` in `0..log2(n)`, inner step `j` in `0..=i`, with
/// `swap_distance = 1 << (i - j)` and `block_size = 2 << i`. Total length
/// is `log2(n)·(log2(n)+1)/2`.
pub fn sort_pass_schedule(n: u32) -> Vec<SortPass> {
    debug_assert!(n.is_power_of_two());
    let stages = n.trailing_zeros();
    let mut passes = Vec::with_capacity((stages * (stages + 1) / 2) as usize);
    for i in 0..stages {
        for j in 0..=i {
            passes.push(SortPass {
                swap_distance: 1 << (i - j),
                block_size: 2 << i,
            });
        }
    }
    passes
}

/// Stage 1: write each particle's `{cell, slot}` pairing entry.
pub fn assign_cells(particles: &[Particle], grid: &GridSpec) -> Vec<CellEntry> {
    particles
        .iter()
        .enumerate()
        .map(|(slot, p)| CellEntry {
            cell: grid.cell_index(p.position()),
            particle: slot as u32,
        })
        .collect()
}

/// One compare-and-swap pass of the bitonic network. Every element pairs
/// with `index ^ swap_distance`; the lower index of each pair performs the
/// conditional swap, ascending iff `(index & block_size) == 0`. Equal keys
/// never swap.
pub fn bitonic_sort_pass(entries: &mut [CellEntry], pass: SortPass) {
    for index in 0..entries.len() {
        let partner = index ^ pass.swap_distance as usize;
        if partner <= index {
            continue;
        }
        let ascending = (index & pass.block_size as usize) == 0;
        let out_of_order = if ascending {
            entries[index].cell > entries[partner].cell
        } else {
            entries[index].cell < entries[partner].cell
        };
        if out_of_order {
            entries.swap(index, partner);
        }
    }
}

/// Stage 2: full bitonic sort by cell index. Returns the number of passes
/// executed. The length must be a power of two.
pub fn bitonic_sort(entries: &mut [CellEntry]) -> u32 {
    let schedule = sort_pass_schedule(entries.len() as u32);
    for pass in &schedule {
        bitonic_sort_pass(entries, *pass);
    }
    schedule.len() as u32
}

/// Stage 3: per-cell `[begin, end)` ranges over the sorted entry array.
/// Every cell starts at the `{n, n}` sentinel; each occupied cell's bounds
/// are then written by the run-boundary slots, exactly once per bound.
pub fn build_ranges(entries: &[CellEntry], cell_count: u32) -> Vec<CellRange> {
    let n = entries.len() as u32;
    let mut ranges = vec![CellRange { begin: n, end: n }; cell_count as usize];
    for (k, entry) in entries.iter().enumerate() {
        let cell = entry.cell as usize;
        if k == 0 || entries[k - 1].cell != entry.cell {
            ranges[cell].begin = k as u32;
        }
        if k + 1 == entries.len() || entries[k + 1].cell != entry.cell {
            ranges[cell].end = k as u32 + 1;
        }
    }
    ranges
}

/// Stage 4: materialize the particle array in sorted order. The entry at
/// sorted slot `k` names the source slot; after this the range table maps
/// directly onto the returned array.
pub fn rearrange(particles: &[Particle], entries: &[CellEntry]) -> Vec<Particle> {
    entries
        .iter()
        .map(|entry| particles[entry.particle as usize])
        .collect()
}

/// The candidate cell coordinates for a query at `coord`: the 3×3×3 block,
/// with coordinates outside `[0, resolution)` skipped rather than wrapped.
pub fn neighbor_cells(grid: &GridSpec, coord: UVec3) -> Vec<UVec3> {
    let res = grid.resolution as i64;
    let mut cells = Vec::with_capacity(27);
    for dz in -1i64..=1 {
        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                let x = coord.x as i64 + dx;
                let y = coord.y as i64 + dy;
                let z = coord.z as i64 + dz;
                if x < 0 || y < 0 || z < 0 || x >= res || y >= res || z >= res {
                    continue;
                }
                cells.push(UVec3::new(x as u32, y as u32, z as u32));
            }
        }
    }
    cells
}

/// Stage 5 selection: the first candidate within `search_radius` of
/// particle `index`, scanning neighbor cells z-outer/y/x-inner and each
/// occupied cell's range in ascending slot order. Operates on the
/// rearranged store, where sorted slots and canonical slots coincide.
pub fn select_neighbor(
    index: usize,
    particles: &[Particle],
    ranges: &[CellRange],
    grid: &GridSpec,
    search_radius: f32,
) -> Option<usize> {
    let pos = particles[index].position();
    let radius_sq = search_radius * search_radius;
    for cell in neighbor_cells(grid, grid.cell_coord(pos)) {
        let range = ranges[grid.flatten(cell) as usize];
        if range.is_empty() {
            continue;
        }
        for slot in range.begin..range.end {
            let candidate = slot as usize;
            if candidate == index {
                continue;
            }
            if particles[candidate].position().distance_squared(pos) <= radius_sq {
                return Some(candidate);
            }
        }
    }
    None
}

/// Stage 5 response: recompute every particle's color from the base color
/// and nudge it away from its selected neighbor. The target slot (when the
/// target index is in range) is tinted instead of steered; a non-target
/// particle with no neighbor ends the stage with identical color and
/// velocity.
pub fn search_neighbors(
    particles: &mut [Particle],
    ranges: &[CellRange],
    grid: &GridSpec,
    config: &SimConfig,
) {
    let selections: Vec<Option<usize>> = (0..particles.len())
        .map(|index| select_neighbor(index, particles, ranges, grid, config.search_radius))
        .collect();

    let target = config.target_index as usize;
    let has_target = (config.target_index as u64) < particles.len() as u64;

    for (index, selection) in selections.iter().enumerate() {
        if has_target && index == target {
            particles[index].color = config.target_color;
            continue;
        }
        let Some(neighbor) = selection else {
            particles[index].color = config.base_color;
            continue;
        };

        let delta = particles[*neighbor].position() - particles[index].position();
        let dist = delta.length();
        if dist > 0.0 {
            let falloff = 1.0 - dist / config.search_radius;
            let nudge = delta / dist * config.steer_strength * falloff;
            particles[index].velocity =
                (particles[index].velocity() - nudge).to_array();
        }
        particles[index].color = config.highlight_color;
    }
}

/// Stage 6: forward Euler position update.
pub fn integrate(particles: &mut [Particle], dt: f32) {
    for p in particles.iter_mut() {
        p.position = (p.position() + p.velocity() * dt).to_array();
    }
}

/// Run one full tick on the CPU, mutating `particles` into its new
/// canonical order. Returns the sorted entry array and the range table for
/// inspection.
pub fn run_tick(
    particles: &mut Vec<Particle>,
    grid: &GridSpec,
    config: &SimConfig,
    dt: f32,
) -> (Vec<CellEntry>, Vec<CellRange>) {
    let mut entries = assign_cells(particles, grid);
    bitonic_sort(&mut entries);
    let ranges = build_ranges(&entries, grid.cell_count());
    *particles = rearrange(particles, &entries);
    search_neighbors(particles, &ranges, grid, config);
    integrate(particles, dt);
    (entries, ranges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spawn::seed_particles_with;
    use glam::Vec3;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Config used by most tests: small population, no target.
    fn test_config(population: u32) -> SimConfig {
        SimConfig {
            population,
            extent: 10.0,
            search_radius: 5.0,
            target_index: u32::MAX,
            ..SimConfig::default()
        }
    }

    fn entry(cell: u32, particle: u32) -> CellEntry {
        CellEntry { cell, particle }
    }

    #[test]
    fn test_schedule_length_for_eight() {
        // log2(8)·(log2(8)+1)/2 = 6 passes
        let schedule = sort_pass_schedule(8);
        assert_eq!(schedule.len(), 6);
        assert_eq!(
            schedule[0],
            SortPass {
                swap_distance: 1,
                block_size: 2
            }
        );
        assert_eq!(
            schedule[5],
            SortPass {
                swap_distance: 1,
                block_size: 8
            }
        );
    }

    #[test]
    fn test_bitonic_sorts_known_array_in_six_passes() {
        let keys = [5u32, 1, 4, 2, 8, 3, 7, 6];
        let mut entries: Vec<CellEntry> = keys
            .iter()
            .enumerate()
            .map(|(i, &cell)| entry(cell, i as u32))
            .collect();

        let passes = bitonic_sort(&mut entries);
        assert_eq!(passes, 6);

        let sorted: Vec<u32> = entries.iter().map(|e| e.cell).collect();
        assert_eq!(sorted, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_sortedness_after_assign_and_sort() {
        let config = test_config(256);
        let grid = config.grid();
        let mut rng = StdRng::seed_from_u64(11);
        let particles = seed_particles_with(&config, &mut rng).unwrap();

        let mut entries = assign_cells(&particles, &grid);
        bitonic_sort(&mut entries);

        for pair in entries.windows(2) {
            assert!(pair[0].cell <= pair[1].cell);
        }
        // Still a permutation of the particle slots.
        let mut slots: Vec<u32> = entries.iter().map(|e| e.particle).collect();
        slots.sort_unstable();
        assert_eq!(slots, (0..particles.len() as u32).collect::<Vec<_>>());
    }

    #[test]
    fn test_ranges_match_sorted_runs() {
        let config = test_config(256);
        let grid = config.grid();
        let mut rng = StdRng::seed_from_u64(13);
        let particles = seed_particles_with(&config, &mut rng).unwrap();

        let mut entries = assign_cells(&particles, &grid);
        bitonic_sort(&mut entries);
        let ranges = build_ranges(&entries, grid.cell_count());

        // Every entry lies inside its own cell's range, and every range
        // bound sits on a run boundary.
        for (k, e) in entries.iter().enumerate() {
            let range = ranges[e.cell as usize];
            assert!(range.begin <= k as u32 && (k as u32) < range.end);
        }
        let occupied: u32 = ranges.iter().map(|r| r.len()).sum();
        assert_eq!(occupied, entries.len() as u32);
    }

    #[test]
    fn test_scenario_two_shared_one_cell_six_singletons() {
        let config = test_config(8);
        let grid = config.grid(); // resolution 4, cell size 5, min corner -10
        let cell_center = |c: UVec3| {
            Vec3::splat(grid.min_corner())
                + c.as_vec3() * grid.cell_size
                + Vec3::splat(grid.cell_size * 0.5)
        };

        // Two particles forced into one cell, six in distinct cells.
        let coords = [
            UVec3::new(1, 1, 1),
            UVec3::new(1, 1, 1),
            UVec3::new(0, 0, 0),
            UVec3::new(3, 0, 0),
            UVec3::new(0, 3, 0),
            UVec3::new(0, 0, 3),
            UVec3::new(3, 3, 0),
            UVec3::new(3, 3, 3),
        ];
        let mut particles: Vec<Particle> = coords
            .iter()
            .map(|&c| Particle::new(cell_center(c), Vec3::ZERO, config.base_color, 1.0))
            .collect();

        let (_, ranges) = run_tick(&mut particles, &grid, &config, 0.0);

        let shared = ranges[grid.flatten(UVec3::new(1, 1, 1)) as usize];
        assert_eq!(shared.len(), 2);
        for &c in &coords[2..] {
            assert_eq!(ranges[grid.flatten(c) as usize].len(), 1);
        }
    }

    #[test]
    fn test_rearrange_is_a_permutation() {
        let config = test_config(128);
        let grid = config.grid();
        let mut rng = StdRng::seed_from_u64(17);
        let particles = seed_particles_with(&config, &mut rng).unwrap();

        let mut entries = assign_cells(&particles, &grid);
        bitonic_sort(&mut entries);
        let reordered = rearrange(&particles, &entries);

        let mut before: Vec<[u32; 3]> = particles
            .iter()
            .map(|p| p.position.map(f32::to_bits))
            .collect();
        let mut after: Vec<[u32; 3]> = reordered
            .iter()
            .map(|p| p.position.map(f32::to_bits))
            .collect();
        before.sort_unstable();
        after.sort_unstable();
        assert_eq!(before, after);
    }

    #[test]
    fn test_search_is_bounded_to_neighbor_block() {
        let grid = GridSpec::new(10.0, 5.0);
        for x in 0..grid.resolution {
            for y in 0..grid.resolution {
                for z in 0..grid.resolution {
                    let coord = UVec3::new(x, y, z);
                    let cells = neighbor_cells(&grid, coord);
                    assert!(cells.len() <= 27);
                    for c in cells {
                        assert!(c.x < grid.resolution);
                        assert!(c.y < grid.resolution);
                        assert!(c.z < grid.resolution);
                        let chebyshev = (c.as_ivec3() - coord.as_ivec3()).abs().max_element();
                        assert!(chebyshev <= 1);
                    }
                }
            }
        }
    }

    #[test]
    fn test_isolated_particle_left_untouched() {
        let config = test_config(2);
        let grid = config.grid();
        // Two particles far outside each other's search radius.
        let mut particles = vec![
            Particle::new(
                Vec3::new(-9.0, -9.0, -9.0),
                Vec3::new(1.0, 0.0, 0.0),
                config.base_color,
                1.0,
            ),
            Particle::new(
                Vec3::new(9.0, 9.0, 9.0),
                Vec3::new(0.0, 1.0, 0.0),
                config.base_color,
                1.0,
            ),
        ];
        let before = particles.clone();

        let mut entries = assign_cells(&particles, &grid);
        bitonic_sort(&mut entries);
        let ranges = build_ranges(&entries, grid.cell_count());
        let mut reordered = rearrange(&particles, &entries);
        search_neighbors(&mut reordered, &ranges, &grid, &config);

        for p in &reordered {
            let original = before
                .iter()
                .find(|b| b.position == p.position)
                .expect("rearrangement preserved positions");
            assert_eq!(p.velocity, original.velocity);
            assert_eq!(p.color, original.color);
        }
    }

    #[test]
    fn test_neighbor_hit_applies_response() {
        let config = test_config(2);
        let grid = config.grid();
        let mut particles = vec![
            Particle::new(Vec3::new(0.5, 0.5, 0.5), Vec3::ZERO, config.base_color, 1.0),
            Particle::new(Vec3::new(1.5, 0.5, 0.5), Vec3::ZERO, config.base_color, 1.0),
        ];

        let mut entries = assign_cells(&particles, &grid);
        bitonic_sort(&mut entries);
        let ranges = build_ranges(&entries, grid.cell_count());
        let mut reordered = rearrange(&particles, &entries);
        search_neighbors(&mut reordered, &ranges, &grid, &config);
        particles = reordered;

        for p in &particles {
            assert_eq!(p.color, config.highlight_color);
            // Nudged apart along x.
            assert!(p.velocity().x.abs() > 0.0);
        }
        // The nudges are symmetric and opposite.
        assert!(particles[0].velocity().x * particles[1].velocity().x < 0.0);
    }

    #[test]
    fn test_target_slot_is_tinted() {
        let mut config = test_config(8);
        config.target_index = 3;
        let grid = config.grid();
        let mut rng = StdRng::seed_from_u64(19);
        let mut particles = seed_particles_with(&config, &mut rng).unwrap();

        run_tick(&mut particles, &grid, &config, 0.0);
        assert_eq!(particles[3].color, config.target_color);
    }

    #[test]
    fn test_out_of_range_target_means_no_target() {
        let mut config = test_config(8);
        config.target_index = u32::MAX;
        let grid = config.grid();
        let mut rng = StdRng::seed_from_u64(19);
        let mut particles = seed_particles_with(&config, &mut rng).unwrap();

        // Must not panic or tint anything with the target color.
        run_tick(&mut particles, &grid, &config, 0.01);
        assert!(particles.iter().all(|p| p.color != config.target_color));
    }

    #[test]
    fn test_integrate_zero_dt_is_identity() {
        let config = test_config(64);
        let mut rng = StdRng::seed_from_u64(23);
        let mut particles = seed_particles_with(&config, &mut rng).unwrap();
        let before = particles.clone();

        integrate(&mut particles, 0.0);
        for (a, b) in particles.iter().zip(&before) {
            assert_eq!(a.position, b.position);
        }
    }

    #[test]
    fn test_integrate_advances_by_velocity() {
        let mut particles = vec![Particle::new(
            Vec3::ZERO,
            Vec3::new(2.0, -1.0, 0.5),
            [1.0; 4],
            1.0,
        )];
        integrate(&mut particles, 0.5);
        assert_eq!(particles[0].position(), Vec3::new(1.0, -0.5, 0.25));
    }
}

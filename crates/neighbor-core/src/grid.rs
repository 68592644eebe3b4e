//! Uniform spatial grid geometry and flat cell indexing.
//!
//! The grid covers the cube `[-extent, extent]³` with cubic cells of side
//! `cell_size` (the neighbor-search radius at initialization time), so a
//! radius query is bounded by the 3×3×3 block of cells around the query
//! point. Cell coordinates flatten to `x + y·R + z·R²`, which keeps entries
//! for the same cell contiguous once sorted by flat index.

use bytemuck::{Pod, Zeroable};
use glam::{UVec3, Vec3};

/// One entry of the per-particle pairing array: the particle's flat cell
/// index and its slot in the canonical particle store.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct CellEntry {
    pub cell: u32,
    pub particle: u32,
}

/// Half-open `[begin, end)` range of sorted slots belonging to one grid
/// cell. Empty cells hold `begin == end == population` (the reset
/// sentinel), so `begin >= end` always means "no particles here".
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct CellRange {
    pub begin: u32,
    pub end: u32,
}

impl CellRange {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.begin)
    }
}

/// Geometry of the uniform grid, fixed at initialization.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridSpec {
    /// Half-size of the cubic simulation extent
    pub extent: f32,
    /// Side length of one cell (the initial search radius)
    pub cell_size: f32,
    /// Cells per axis
    pub resolution: u32,
}

impl GridSpec {
    /// Build the grid covering `[-extent, extent]³` with the given cell
    /// size. The per-axis resolution is `ceil(2·extent / cell_size)`.
    pub fn new(extent: f32, cell_size: f32) -> Self {
        let resolution = ((2.0 * extent) / cell_size).ceil().max(1.0) as u32;
        Self {
            extent,
            cell_size,
            resolution,
        }
    }

    /// Minimum corner of the grid on every axis.
    #[inline]
    pub fn min_corner(&self) -> f32 {
        -self.extent
    }

    /// Total number of cells (`resolution³`).
    #[inline]
    pub fn cell_count(&self) -> u32 {
        self.resolution * self.resolution * self.resolution
    }

    /// Integer cell coordinate of a position, clamped to
    /// `[0, resolution-1]` per axis so drifting particles land in edge
    /// cells instead of out-of-range indices.
    pub fn cell_coord(&self, position: Vec3) -> UVec3 {
        let local = (position - Vec3::splat(self.min_corner())) / self.cell_size;
        let max = self.resolution.saturating_sub(1) as f32;
        local.floor().clamp(Vec3::ZERO, Vec3::splat(max)).as_uvec3()
    }

    /// Flatten a cell coordinate to its index: `x + y·R + z·R²`.
    #[inline]
    pub fn flatten(&self, coord: UVec3) -> u32 {
        coord.x + coord.y * self.resolution + coord.z * self.resolution * self.resolution
    }

    /// Inverse of [`flatten`](Self::flatten).
    #[inline]
    pub fn unflatten(&self, index: u32) -> UVec3 {
        let r = self.resolution;
        UVec3::new(index % r, (index / r) % r, index / (r * r))
    }

    /// Flat cell index of a position.
    #[inline]
    pub fn cell_index(&self, position: Vec3) -> u32 {
        self.flatten(self.cell_coord(position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_is_ceiling() {
        // 2*50 / 5 = 20 exactly
        assert_eq!(GridSpec::new(50.0, 5.0).resolution, 20);
        // 2*50 / 7 = 14.28… -> 15
        assert_eq!(GridSpec::new(50.0, 7.0).resolution, 15);
    }

    #[test]
    fn test_flatten_unflatten_round_trip() {
        let grid = GridSpec::new(10.0, 2.5);
        assert_eq!(grid.resolution, 8);
        for index in 0..grid.cell_count() {
            assert_eq!(grid.flatten(grid.unflatten(index)), index);
        }
    }

    #[test]
    fn test_cell_coord_interior() {
        let grid = GridSpec::new(10.0, 5.0); // resolution 4, min corner -10
        assert_eq!(grid.cell_coord(Vec3::new(-10.0, -10.0, -10.0)), UVec3::ZERO);
        assert_eq!(
            grid.cell_coord(Vec3::new(-7.5, -2.5, 2.5)),
            UVec3::new(0, 1, 2)
        );
        assert_eq!(grid.cell_coord(Vec3::new(9.9, 9.9, 9.9)), UVec3::new(3, 3, 3));
    }

    #[test]
    fn test_cell_coord_clamps_outside_extent() {
        let grid = GridSpec::new(10.0, 5.0);
        assert_eq!(grid.cell_coord(Vec3::splat(-999.0)), UVec3::ZERO);
        assert_eq!(grid.cell_coord(Vec3::splat(999.0)), UVec3::new(3, 3, 3));
    }

    #[test]
    fn test_cell_index_ordering_follows_z_major_layout() {
        let grid = GridSpec::new(10.0, 5.0);
        // +x advances the index by 1, +y by R, +z by R².
        let base = grid.flatten(UVec3::new(1, 1, 1));
        assert_eq!(grid.flatten(UVec3::new(2, 1, 1)), base + 1);
        assert_eq!(grid.flatten(UVec3::new(1, 2, 1)), base + grid.resolution);
        assert_eq!(
            grid.flatten(UVec3::new(1, 1, 2)),
            base + grid.resolution * grid.resolution
        );
    }

    #[test]
    fn test_empty_range_sentinel() {
        let range = CellRange { begin: 64, end: 64 };
        assert!(range.is_empty());
        assert_eq!(range.len(), 0);
    }
}

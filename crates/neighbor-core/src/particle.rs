//! Particle state for the neighbor-search simulation

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// GPU-compatible particle structure.
/// Aligned for WGSL struct compatibility (three 16-byte rows, 48 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Particle {
    /// Position in 3D space
    pub position: [f32; 3],
    /// Instance scale for rendering
    pub scale: f32,

    /// RGBA color, rewritten by the neighbor-search kernel every tick
    pub color: [f32; 4],

    /// Velocity vector
    pub velocity: [f32; 3],
    /// Padding to the next 16-byte boundary
    pub _pad: f32,
}

impl Particle {
    /// Create a particle at `position` moving with `velocity`.
    pub fn new(position: Vec3, velocity: Vec3, color: [f32; 4], scale: f32) -> Self {
        Self {
            position: position.to_array(),
            scale,
            color,
            velocity: velocity.to_array(),
            _pad: 0.0,
        }
    }

    /// Position as a vector.
    #[inline]
    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    /// Velocity as a vector.
    #[inline]
    pub fn velocity(&self) -> Vec3 {
        Vec3::from_array(self.velocity)
    }
}

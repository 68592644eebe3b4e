//! # Neighbor Core
//!
//! CPU-side domain types for the grid neighbor-search particle simulation:
//! the GPU-compatible particle struct, uniform-grid geometry, configuration,
//! population seeding, and reference implementations of the pipeline stages.

pub mod config;
pub mod grid;
pub mod particle;
pub mod reference;
pub mod spawn;

pub use config::*;
pub use grid::*;
pub use particle::*;
pub use spawn::*;

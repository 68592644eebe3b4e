//! Error types for simulation initialization and buffer readback.

use neighbor_core::ConfigError;
use std::fmt;

/// Errors that can occur while constructing a [`crate::NeighborSimulation`].
///
/// Initialization is all-or-nothing: any of these abort construction before
/// a partially usable simulation exists, and every buffer created up to that
/// point is released.
#[derive(Debug)]
pub enum InitError {
    /// The configuration failed fail-fast validation.
    Config(ConfigError),
    /// The seeded population length is not a power of two, which the
    /// sorting network requires.
    PopulationNotPowerOfTwo(usize),
    /// A GPU buffer allocation failed (device or host memory exhausted).
    Allocation(wgpu::Error),
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::Config(e) => write!(f, "invalid configuration: {}", e),
            InitError::PopulationNotPowerOfTwo(n) => {
                write!(f, "population must be a power of two, got {}", n)
            }
            InitError::Allocation(e) => write!(f, "GPU buffer allocation failed: {}", e),
        }
    }
}

impl std::error::Error for InitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InitError::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for InitError {
    fn from(e: ConfigError) -> Self {
        InitError::Config(e)
    }
}

/// Errors that can occur when reading a device buffer back to the CPU.
#[derive(Debug)]
pub enum ReadbackError {
    /// The simulation was torn down; its buffers no longer exist.
    Destroyed,
    /// Failed to map the staging buffer for reading.
    Map(wgpu::BufferAsyncError),
    /// The device failed while waiting for the copy to complete.
    Poll(wgpu::PollError),
}

impl fmt::Display for ReadbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadbackError::Destroyed => write!(f, "simulation has been destroyed"),
            ReadbackError::Map(e) => write!(f, "failed to map staging buffer: {}", e),
            ReadbackError::Poll(e) => write!(f, "device poll failed during readback: {}", e),
        }
    }
}

impl std::error::Error for ReadbackError {}

impl From<wgpu::BufferAsyncError> for ReadbackError {
    fn from(e: wgpu::BufferAsyncError) -> Self {
        ReadbackError::Map(e)
    }
}

impl From<wgpu::PollError> for ReadbackError {
    fn from(e: wgpu::PollError) -> Self {
        ReadbackError::Poll(e)
    }
}

//! Simulation configuration and fail-fast validation.

use crate::grid::GridSpec;
use std::fmt;

/// Parameters fixed at initialization plus the two runtime-tunable knobs
/// (`search_radius`, `target_index`). Grid geometry and buffer sizes are
/// derived from `population`, `extent` and `search_radius` once, at
/// initialization; changing either of the first two requires a re-init.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimConfig {
    /// Requested population; rounded up to the next power of two by the
    /// sorting network requirement.
    pub population: u32,
    /// Half-size of the cubic spawn/simulation extent
    pub extent: f32,
    /// Per-particle render scale
    pub scale: f32,
    /// Initial speed magnitude (velocity directions are random)
    pub speed: f32,
    /// Neighbor-search radius; also the grid cell size at initialization
    pub search_radius: f32,
    /// Slot index of the distinguished target particle. Any value
    /// `>= population` means "no target selected".
    pub target_index: u32,
    /// Strength of the separation nudge applied on a neighbor hit
    pub steer_strength: f32,
    /// Color written to particles with no selected neighbor
    pub base_color: [f32; 4],
    /// Color written to particles that selected a neighbor this tick
    pub highlight_color: [f32; 4],
    /// Color written to the particle occupying the target slot
    pub target_color: [f32; 4],
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            population: 4096,
            extent: 50.0,
            scale: 0.5,
            speed: 4.0,
            search_radius: 5.0,
            target_index: 0,
            steer_strength: 1.5,
            base_color: [0.55, 0.68, 0.90, 1.0],
            highlight_color: [1.00, 0.55, 0.15, 1.0],
            target_color: [1.00, 0.10, 0.10, 1.0],
        }
    }
}

impl SimConfig {
    /// Validate the configuration. Must pass before any buffer is
    /// allocated; every rejection here is a [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rounded_population()?;
        if !self.extent.is_finite() || self.extent <= 0.0 {
            return Err(ConfigError::NonPositiveExtent(self.extent));
        }
        if !self.search_radius.is_finite() || self.search_radius <= 0.0 {
            return Err(ConfigError::NonPositiveSearchRadius(self.search_radius));
        }
        Ok(())
    }

    /// The population rounded up to the nearest power of two.
    pub fn rounded_population(&self) -> Result<u32, ConfigError> {
        if self.population == 0 {
            return Err(ConfigError::ZeroPopulation);
        }
        self.population
            .checked_next_power_of_two()
            .ok_or(ConfigError::PopulationTooLarge(self.population))
    }

    /// Grid geometry derived from the extent and the initial search radius.
    pub fn grid(&self) -> GridSpec {
        GridSpec::new(self.extent, self.search_radius)
    }
}

/// Rejections produced by [`SimConfig::validate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigError {
    /// Population of zero cannot be rounded to a usable power of two.
    ZeroPopulation,
    /// Population has no power-of-two round-up within `u32`.
    PopulationTooLarge(u32),
    /// Search radius must be positive and finite.
    NonPositiveSearchRadius(f32),
    /// Spatial extent must be positive and finite.
    NonPositiveExtent(f32),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroPopulation => {
                write!(f, "population must be at least 1")
            }
            ConfigError::PopulationTooLarge(n) => {
                write!(f, "population {} has no power-of-two round-up in u32", n)
            }
            ConfigError::NonPositiveSearchRadius(r) => {
                write!(f, "search radius must be positive and finite, got {}", r)
            }
            ConfigError::NonPositiveExtent(e) => {
                write!(f, "spatial extent must be positive and finite, got {}", e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SimConfig::default().validate().is_ok());
    }

    #[test]
    fn test_population_rounds_up() {
        let config = SimConfig {
            population: 1000,
            ..SimConfig::default()
        };
        assert_eq!(config.rounded_population().unwrap(), 1024);

        let exact = SimConfig {
            population: 512,
            ..SimConfig::default()
        };
        assert_eq!(exact.rounded_population().unwrap(), 512);
    }

    #[test]
    fn test_zero_population_rejected() {
        let config = SimConfig {
            population: 0,
            ..SimConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroPopulation));
    }

    #[test]
    fn test_oversized_population_rejected() {
        let config = SimConfig {
            population: (1 << 31) + 1,
            ..SimConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PopulationTooLarge(_))
        ));
    }

    #[test]
    fn test_bad_radius_and_extent_rejected() {
        let radius = SimConfig {
            search_radius: 0.0,
            ..SimConfig::default()
        };
        assert!(matches!(
            radius.validate(),
            Err(ConfigError::NonPositiveSearchRadius(_))
        ));

        let extent = SimConfig {
            extent: -1.0,
            ..SimConfig::default()
        };
        assert!(matches!(
            extent.validate(),
            Err(ConfigError::NonPositiveExtent(_))
        ));

        let nan = SimConfig {
            search_radius: f32::NAN,
            ..SimConfig::default()
        };
        assert!(nan.validate().is_err());
    }
}

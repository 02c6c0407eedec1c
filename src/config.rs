use crate::error::ConfigError;
use crate::heat::DEFAULT_HEAT_DENSITY;
use crate::selector::ZoomThresholds;

pub const DEFAULT_PAGE_SIZE: usize = 20_000;
pub const DEFAULT_TOTAL_VOLUME: usize = 100_000;
pub const DEFAULT_INITIAL_ZOOM: f64 = 8.0;
pub const DEFAULT_SESSION_KEY: &str = "cities";

/// Engine tunables
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Records requested per page
    pub page_size: usize,
    /// Upper bound on records requested per session
    pub total_volume: usize,
    pub zoom: ZoomThresholds,
    /// Zoom level a new session starts at
    pub initial_zoom: f64,
    /// K in `weight = population * K`
    pub heat_density: f64,
    /// Prefix of the page snapshot keys in the persistence cache
    pub cache_session_key: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            total_volume: DEFAULT_TOTAL_VOLUME,
            zoom: ZoomThresholds::default(),
            initial_zoom: DEFAULT_INITIAL_ZOOM,
            heat_density: DEFAULT_HEAT_DENSITY,
            cache_session_key: DEFAULT_SESSION_KEY.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::ZeroPageSize);
        }
        if self.total_volume == 0 {
            return Err(ConfigError::ZeroVolume);
        }
        if !self.heat_density.is_finite() || self.heat_density < 0.0 {
            return Err(ConfigError::InvalidDensity(self.heat_density));
        }
        self.zoom.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.zoom.countries, 5.0);
        assert_eq!(config.zoom.regions, 8.0);
    }

    #[test]
    fn test_rejects_bad_values() {
        let config = EngineConfig {
            page_size: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroPageSize));

        let config = EngineConfig {
            heat_density: -1.0,
            ..EngineConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidDensity(-1.0)));

        let config = EngineConfig {
            zoom: ZoomThresholds { countries: 9.0, regions: 8.0 },
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidThresholds { .. })));
    }
}

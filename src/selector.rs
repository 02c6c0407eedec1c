use crate::cluster::{Cluster, ClusterIndex, Tier};
use crate::error::ConfigError;
use crate::geo::GeoBounds;

/// Zoom levels at which the visible tier switches
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomThresholds {
    /// Below this, continents are shown
    pub countries: f64,
    /// Below this (and at or above `countries`), countries are shown
    pub regions: f64,
}

impl ZoomThresholds {
    pub fn new(countries: f64, regions: f64) -> Result<Self, ConfigError> {
        let thresholds = Self { countries, regions };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.countries.is_finite() && self.regions.is_finite() && self.countries < self.regions) {
            return Err(ConfigError::InvalidThresholds {
                countries: self.countries,
                regions: self.regions,
            });
        }
        Ok(())
    }
}

impl Default for ZoomThresholds {
    fn default() -> Self {
        Self {
            countries: 5.0,
            regions: 8.0,
        }
    }
}

/// Clusters of one tier that intersect a viewport
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSet {
    pub tier: Tier,
    pub clusters: Vec<Cluster>,
}

impl ClusterSet {
    pub fn empty(tier: Tier) -> Self {
        Self {
            tier,
            clusters: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.clusters.iter().map(|c| c.key.as_str())
    }
}

/// Picks the tier for a zoom level and culls clusters outside the viewport.
/// Pure: never mutates the index.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LayerSelector {
    thresholds: ZoomThresholds,
}

impl LayerSelector {
    pub fn new(thresholds: ZoomThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> ZoomThresholds {
        self.thresholds
    }

    /// Most zoomed out maps to the coarsest tier
    pub fn tier_for(&self, zoom: f64) -> Tier {
        if zoom < self.thresholds.countries {
            Tier::Continent
        } else if zoom < self.thresholds.regions {
            Tier::Country
        } else {
            Tier::Region
        }
    }

    pub fn select(&self, zoom: f64, viewport: &GeoBounds, index: &ClusterIndex) -> ClusterSet {
        let tier = self.tier_for(zoom);
        let clusters = index
            .clusters(tier)
            .filter(|c| c.bounds.intersects(viewport))
            .cloned()
            .collect();
        ClusterSet { tier, clusters }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continent::ContinentResolver;
    use crate::record::fixtures::city;
    use std::collections::HashMap;

    fn index() -> ClusterIndex {
        let resolver = ContinentResolver::from_mapping(HashMap::from([
            ("US".to_string(), "NA".to_string()),
            ("FR".to_string(), "EU".to_string()),
        ]));
        let mut index = ClusterIndex::new(resolver);
        index.apply(&city("A", 40.0, -100.0, 1000, "US"));
        index.apply(&city("B", 45.0, -90.0, 1000, "US"));
        index.apply(&city("C", 48.8, 2.3, 500, "FR"));
        index
    }

    #[test]
    fn test_tier_boundaries() {
        let selector = LayerSelector::new(ZoomThresholds::new(5.0, 8.0).unwrap());
        let index = index();
        let world = GeoBounds::world();

        assert_eq!(selector.select(4.0, &world, &index).tier, Tier::Continent);
        assert_eq!(selector.select(5.0, &world, &index).tier, Tier::Country);
        assert_eq!(selector.select(7.0, &world, &index).tier, Tier::Country);
        assert_eq!(selector.select(8.0, &world, &index).tier, Tier::Region);
        assert_eq!(selector.select(18.0, &world, &index).tier, Tier::Region);
    }

    #[test]
    fn test_select_returns_clusters_of_chosen_tier() {
        let selector = LayerSelector::default();
        let index = index();
        let set = selector.select(2.0, &GeoBounds::world(), &index);
        assert_eq!(set.keys().collect::<Vec<_>>(), vec!["EU", "NA"]);
        assert!(set.clusters.iter().all(|c| c.tier == Tier::Continent));
    }

    #[test]
    fn test_viewport_culling() {
        let selector = LayerSelector::default();
        let index = index();

        // Europe only
        let europe = GeoBounds::new(35.0, -10.0, 60.0, 30.0);
        let set = selector.select(6.0, &europe, &index);
        assert_eq!(set.keys().collect::<Vec<_>>(), vec!["FR"]);

        // Overlaps the US cluster's eastern edge only
        let edge = GeoBounds::new(30.0, -90.0, 50.0, -80.0);
        let set = selector.select(6.0, &edge, &index);
        assert_eq!(set.keys().collect::<Vec<_>>(), vec!["US"]);

        // Open ocean
        let ocean = GeoBounds::new(-40.0, -30.0, -20.0, -10.0);
        assert!(selector.select(6.0, &ocean, &index).is_empty());
    }

    #[test]
    fn test_select_is_pure() {
        let selector = LayerSelector::default();
        let index = index();
        let before = index.clone();
        let view = GeoBounds::new(30.0, -110.0, 50.0, 10.0);

        let a = selector.select(9.0, &view, &index);
        let b = selector.select(9.0, &view, &index);
        assert_eq!(a, b);
        assert_eq!(index, before);
    }

    #[test]
    fn test_invalid_thresholds() {
        assert!(ZoomThresholds::new(8.0, 5.0).is_err());
        assert!(ZoomThresholds::new(5.0, 5.0).is_err());
        assert!(ZoomThresholds::new(f64::NAN, 5.0).is_err());
    }
}

use crate::record::ValidatedRecord;
use serde::Serialize;

/// Default density constant K in `weight = population * K`
pub const DEFAULT_HEAT_DENSITY: f64 = 0.002;

/// One weighted sample of the density overlay
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeatPoint {
    pub lat: f64,
    pub lng: f64,
    pub weight: f64,
}

/// Append-only list of weighted points for the density overlay.
///
/// Records without population are never appended: a zero-weight sample would
/// still count towards the overlay's auto-scaled intensity and dilute it.
#[derive(Debug, Clone, PartialEq)]
pub struct HeatWeightAccumulator {
    density: f64,
    points: Vec<HeatPoint>,
    max_weight: f64,
}

impl HeatWeightAccumulator {
    pub fn new(density: f64) -> Self {
        Self {
            density,
            points: Vec::new(),
            max_weight: 0.0,
        }
    }

    /// Append the record's weighted position. Returns false if skipped.
    pub fn add(&mut self, validated: &ValidatedRecord) -> bool {
        if !validated.is_countable() {
            return false;
        }
        let record = &validated.record;
        let weight = record.population as f64 * self.density;
        self.points.push(HeatPoint {
            lat: record.position.lat,
            lng: record.position.lng,
            weight,
        });
        self.max_weight = self.max_weight.max(weight);
        true
    }

    /// Current points, in insertion order
    pub fn snapshot(&self) -> &[HeatPoint] {
        &self.points
    }

    /// Heaviest weight seen, for intensity scaling
    pub fn max_weight(&self) -> f64 {
        self.max_weight
    }

    pub fn density(&self) -> f64 {
        self.density
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn reset(&mut self) {
        self.points.clear();
        self.max_weight = 0.0;
    }
}

impl Default for HeatWeightAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_HEAT_DENSITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::fixtures::city;

    #[test]
    fn test_weights_scale_with_population() {
        let mut heat = HeatWeightAccumulator::default();
        heat.add(&city("A", 10.0, 10.0, 1000, "US"));
        heat.add(&city("B", 12.0, 12.0, 2000, "US"));

        let points = heat.snapshot();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].weight, 1000.0 * DEFAULT_HEAT_DENSITY);
        assert_eq!(points[1].weight, 2000.0 * DEFAULT_HEAT_DENSITY);
        assert_eq!((points[1].lat, points[1].lng), (12.0, 12.0));
        assert_eq!(heat.max_weight(), 2000.0 * DEFAULT_HEAT_DENSITY);
    }

    #[test]
    fn test_zero_population_is_not_appended() {
        let mut heat = HeatWeightAccumulator::new(1.0);
        assert!(!heat.add(&city("A", 10.0, 10.0, 0, "US")));
        assert!(heat.is_empty());
    }

    #[test]
    fn test_reset() {
        let mut heat = HeatWeightAccumulator::new(1.0);
        heat.add(&city("A", 10.0, 10.0, 10, "US"));
        heat.reset();
        assert!(heat.is_empty());
        assert_eq!(heat.max_weight(), 0.0);
        assert_eq!(heat, HeatWeightAccumulator::new(1.0));
    }
}

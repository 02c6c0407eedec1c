use glam::DVec2;
use serde::{Deserialize, Serialize};

/// Latitude limit of the Web Mercator projection
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_78;

/// Wrap longitude into [-180, 180)
#[inline(always)]
pub fn wrap_lon(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

/// Clamp latitude to the range the projection can represent
#[inline(always)]
pub fn clamp_lat(lat: f64) -> f64 {
    lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT)
}

/// A geographic position in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Finite and inside the lat/lng domain
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// x = longitude, y = latitude
    #[inline(always)]
    fn to_vec(self) -> DVec2 {
        DVec2::new(self.lng, self.lat)
    }
}

/// Axis-aligned lat/lng rectangle. Edges are inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBounds {
    min: DVec2,
    max: DVec2,
}

impl GeoBounds {
    /// Build from two corners in any order
    pub fn new(lat_a: f64, lng_a: f64, lat_b: f64, lng_b: f64) -> Self {
        let a = DVec2::new(lng_a, lat_a);
        let b = DVec2::new(lng_b, lat_b);
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Degenerate rectangle covering a single point
    pub fn from_point(point: GeoPoint) -> Self {
        let v = point.to_vec();
        Self { min: v, max: v }
    }

    /// The whole globe
    pub fn world() -> Self {
        Self::new(-90.0, -180.0, 90.0, 180.0)
    }

    /// Grow to include a point
    pub fn extend(&mut self, point: GeoPoint) {
        let v = point.to_vec();
        self.min = self.min.min(v);
        self.max = self.max.max(v);
    }

    pub fn contains(&self, point: GeoPoint) -> bool {
        let v = point.to_vec();
        self.min.cmple(v).all() && v.cmple(self.max).all()
    }

    /// True if the rectangles share at least one point (touching edges count)
    pub fn intersects(&self, other: &GeoBounds) -> bool {
        self.min.cmple(other.max).all() && other.min.cmple(self.max).all()
    }

    pub fn center(&self) -> GeoPoint {
        let c = (self.min + self.max) * 0.5;
        GeoPoint::new(c.y, c.x)
    }

    pub fn min_lat(&self) -> f64 {
        self.min.y
    }

    pub fn min_lng(&self) -> f64 {
        self.min.x
    }

    pub fn max_lat(&self) -> f64 {
        self.max.y
    }

    pub fn max_lng(&self) -> f64 {
        self.max.x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_lon() {
        assert_eq!(wrap_lon(190.0), -170.0);
        assert_eq!(wrap_lon(-190.0), 170.0);
        assert_eq!(wrap_lon(45.0), 45.0);
    }

    #[test]
    fn test_extend_grows_to_cover_points() {
        let mut bounds = GeoBounds::from_point(GeoPoint::new(10.0, 10.0));
        bounds.extend(GeoPoint::new(12.0, 8.0));
        bounds.extend(GeoPoint::new(-3.0, 11.0));

        assert_eq!(bounds.min_lat(), -3.0);
        assert_eq!(bounds.max_lat(), 12.0);
        assert_eq!(bounds.min_lng(), 8.0);
        assert_eq!(bounds.max_lng(), 11.0);
        assert!(bounds.contains(GeoPoint::new(10.0, 10.0)));
        assert!(bounds.contains(GeoPoint::new(12.0, 8.0)));
    }

    #[test]
    fn test_corner_order_does_not_matter() {
        let a = GeoBounds::new(0.0, 0.0, 10.0, 20.0);
        let b = GeoBounds::new(10.0, 20.0, 0.0, 0.0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_intersects() {
        let viewport = GeoBounds::new(0.0, 0.0, 10.0, 10.0);

        assert!(viewport.intersects(&GeoBounds::new(5.0, 5.0, 15.0, 15.0)));
        // Touching the edge counts
        assert!(viewport.intersects(&GeoBounds::new(10.0, 10.0, 20.0, 20.0)));
        // Fully inside
        assert!(viewport.intersects(&GeoBounds::from_point(GeoPoint::new(1.0, 1.0))));
        // Disjoint
        assert!(!viewport.intersects(&GeoBounds::new(11.0, 0.0, 20.0, 10.0)));
        assert!(!viewport.intersects(&GeoBounds::new(0.0, -20.0, 10.0, -0.5)));
    }

    #[test]
    fn test_point_validity() {
        assert!(GeoPoint::new(59.9, 30.3).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, f64::NAN).is_valid());
    }
}

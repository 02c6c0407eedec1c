use crate::error::SourceError;
use crate::record::{RawCityRecord, RawId};
use crate::source::{page_of, RecordSource};
use geojson::{Feature, GeoJson, Value};
use rayon::prelude::*;
use std::fs;
use std::path::Path;
use tracing::info;

/// City points from a GeoJSON FeatureCollection (Natural Earth populated
/// places or anything with similar properties)
#[derive(Debug, Clone)]
pub struct GeoJsonCitySource {
    cities: Vec<RawCityRecord>,
}

impl GeoJsonCitySource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let content = fs::read_to_string(path)?;
        let source = Self::parse(&content)?;
        info!(path = %path.display(), cities = source.cities.len(), "Loaded GeoJSON cities");
        Ok(source)
    }

    pub fn parse(content: &str) -> Result<Self, SourceError> {
        let geojson: GeoJson = content
            .parse()
            .map_err(|e: geojson::Error| SourceError::Payload(e.to_string()))?;

        let features = match geojson {
            GeoJson::FeatureCollection(fc) => fc.features,
            GeoJson::Feature(f) => vec![f],
            GeoJson::Geometry(_) => Vec::new(),
        };

        // Features without a point geometry are dropped here; everything
        // else goes through normal record validation
        let cities = features.par_iter().filter_map(feature_to_record).collect();
        Ok(Self { cities })
    }

    pub fn len(&self) -> usize {
        self.cities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cities.is_empty()
    }
}

impl RecordSource for GeoJsonCitySource {
    fn fetch_page(&mut self, page_size: usize, page: usize) -> Result<Vec<RawCityRecord>, SourceError> {
        page_of(&self.cities, page_size, page)
    }
}

fn feature_to_record(feature: &Feature) -> Option<RawCityRecord> {
    let coords = match &feature.geometry.as_ref()?.value {
        Value::Point(coords) if coords.len() >= 2 => coords,
        _ => return None,
    };
    let props = feature.properties.as_ref();

    let text = |keys: &[&str]| {
        props.and_then(|p| {
            keys.iter()
                .find_map(|k| p.get(*k).and_then(|v| v.as_str()))
                .map(str::to_string)
        })
    };

    // Try multiple population fields
    let population = props.and_then(|p| {
        ["population", "pop_max", "POP_MAX", "pop_min"]
            .iter()
            .find_map(|k| p.get(*k).and_then(|v| v.as_f64()))
    });

    let id = feature.id.as_ref().map(|id| match id {
        geojson::feature::Id::String(s) => RawId::Text(s.clone()),
        geojson::feature::Id::Number(n) => RawId::Text(n.to_string()),
    });

    Some(RawCityRecord {
        id,
        city: text(&["name", "NAME", "city"]),
        // GeoJSON positions are [lng, lat]
        coordinates: Some(vec![coords[1], coords[0]]),
        population,
        country: text(&["country_code", "iso_a2", "ISO_A2"]),
        feature_code: text(&["feature_code", "featurecla", "FEATURECLA"]),
        state: text(&["state", "adm1name", "ADM1NAME"]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::validate;

    const CITIES: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "id": "tokyo",
             "geometry": {"type": "Point", "coordinates": [139.7, 35.7]},
             "properties": {"name": "Tokyo", "pop_max": 37400000, "iso_a2": "JP", "featurecla": "Admin-0 capital"}},
            {"type": "Feature",
             "geometry": {"type": "LineString", "coordinates": [[0, 0], [1, 1]]},
             "properties": {"name": "Not a city"}},
            {"type": "Feature",
             "geometry": {"type": "Point", "coordinates": [-0.1, 51.5]},
             "properties": {"name": "London", "population": 9000000, "country_code": "GB", "adm1name": "England"}}
        ]
    }"#;

    #[test]
    fn test_points_become_records() {
        let mut source = GeoJsonCitySource::parse(CITIES).unwrap();
        assert_eq!(source.len(), 2);

        let page = source.fetch_page(10, 1).unwrap();
        let tokyo = validate(page[0].clone()).unwrap();
        assert_eq!(tokyo.record.id.as_deref(), Some("tokyo"));
        assert_eq!(tokyo.record.position.lat, 35.7);
        assert_eq!(tokyo.record.position.lng, 139.7);
        assert_eq!(tokyo.record.population, 37_400_000);
        assert_eq!(tokyo.record.country_code, "JP");

        let london = validate(page[1].clone()).unwrap();
        assert_eq!(london.record.state.as_deref(), Some("England"));
        assert!(london.is_countable());
    }

    #[test]
    fn test_invalid_geojson() {
        assert!(matches!(GeoJsonCitySource::parse("{"), Err(SourceError::Payload(_))));
    }
}

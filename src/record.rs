//! City records: the wire shape, the validated form, identity and
//! classification.
//!
//! Classification happens exactly once, here, at the ingestion boundary.
//! Downstream components match on [`RecordClass`] instead of re-inspecting
//! feature codes or population values.

use crate::error::MalformedRecord;
use crate::geo::GeoPoint;
use serde::{Deserialize, Serialize};

/// Feature code of administrative-district duplicates of a real city
pub const SPURIOUS_FEATURE_CODE: &str = "PPLX";

/// Record id as served: json-server assigns numbers, other feeds use strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Number(u64),
    Text(String),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Number(n) => n.to_string(),
            RawId::Text(s) => s,
        }
    }
}

/// A city record exactly as a source delivers it. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCityRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RawId>,
    #[serde(default, alias = "name")]
    pub city: Option<String>,
    /// `[lat, lng]`
    #[serde(default)]
    pub coordinates: Option<Vec<f64>>,
    #[serde(default)]
    pub population: Option<f64>,
    #[serde(default, alias = "country_code")]
    pub country: Option<String>,
    #[serde(default)]
    pub feature_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// A record with usable coordinates and a country
#[derive(Debug, Clone, PartialEq)]
pub struct CityRecord {
    pub id: Option<String>,
    pub name: String,
    pub position: GeoPoint,
    /// 0 when the source had no population
    pub population: u64,
    pub country_code: String,
    pub feature_code: String,
    pub state: Option<String>,
}

/// Identity used for cross-page deduplication
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordKey {
    Id(String),
    /// Coordinates compared bit-for-bit
    NameAt {
        name: String,
        lat_bits: u64,
        lng_bits: u64,
    },
}

impl CityRecord {
    pub fn key(&self) -> RecordKey {
        match &self.id {
            Some(id) => RecordKey::Id(id.clone()),
            None => RecordKey::NameAt {
                name: self.name.clone(),
                lat_bits: self.position.lat.to_bits(),
                lng_bits: self.position.lng.to_bits(),
            },
        }
    }
}

impl TryFrom<RawCityRecord> for CityRecord {
    type Error = MalformedRecord;

    fn try_from(raw: RawCityRecord) -> Result<Self, Self::Error> {
        let coords = raw.coordinates.ok_or(MalformedRecord::MissingCoordinates)?;
        let (lat, lng) = match coords.as_slice() {
            [lat, lng, ..] => (*lat, *lng),
            _ => return Err(MalformedRecord::MissingCoordinates),
        };
        let position = GeoPoint::new(lat, lng);
        if !position.is_valid() {
            return Err(MalformedRecord::InvalidCoordinates { lat, lng });
        }

        let country_code = raw
            .country
            .filter(|c| !c.trim().is_empty())
            .ok_or(MalformedRecord::MissingCountry)?;

        let id = raw.id.map(RawId::into_string);
        let name = match (raw.city.filter(|n| !n.is_empty()), &id) {
            (Some(name), _) => name,
            (None, Some(id)) => id.clone(),
            (None, None) => return Err(MalformedRecord::MissingName),
        };

        let population = raw
            .population
            .filter(|p| p.is_finite() && *p > 0.0)
            .map(|p| p.round() as u64)
            .unwrap_or(0);

        Ok(Self {
            id,
            name,
            position,
            population,
            country_code,
            feature_code: raw.feature_code.unwrap_or_default(),
            state: raw.state,
        })
    }
}

/// Why a valid record does not contribute to aggregates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionReason {
    MissingPopulation,
    SpuriousFeature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordClass {
    Countable,
    Excluded(ExclusionReason),
}

/// A record paired with its classification
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRecord {
    pub record: CityRecord,
    pub class: RecordClass,
}

impl ValidatedRecord {
    pub fn classify(record: CityRecord) -> Self {
        let class = if record.population == 0 {
            RecordClass::Excluded(ExclusionReason::MissingPopulation)
        } else if record.feature_code == SPURIOUS_FEATURE_CODE {
            RecordClass::Excluded(ExclusionReason::SpuriousFeature)
        } else {
            RecordClass::Countable
        };
        Self { record, class }
    }

    #[inline(always)]
    pub fn is_countable(&self) -> bool {
        self.class == RecordClass::Countable
    }
}

/// Validate and classify a raw record
pub fn validate(raw: RawCityRecord) -> Result<ValidatedRecord, MalformedRecord> {
    CityRecord::try_from(raw).map(ValidatedRecord::classify)
}

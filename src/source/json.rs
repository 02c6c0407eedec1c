use crate::continent::{ContinentMapping, MappingSource};
use crate::error::SourceError;
use crate::record::RawCityRecord;
use crate::source::{page_of, RecordSource};
use rayon::prelude::*;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Layout of a json-server database file
#[derive(Debug, Default, Deserialize)]
struct Database {
    #[serde(default)]
    cities: Vec<RawCityRecord>,
    #[serde(default)]
    continent: Option<ContinentMapping>,
}

/// `{ "cities": [...], "continent": {...} }` database, served largest city
/// first like `/cities?_sort=population&_order=desc`
#[derive(Debug, Clone)]
pub struct JsonDatabaseSource {
    cities: Vec<RawCityRecord>,
    continent: Option<ContinentMapping>,
}

impl JsonDatabaseSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let bytes = fs::read(path)?;
        let source = Self::from_bytes(bytes)?;
        info!(
            path = %path.display(),
            cities = source.cities.len(),
            has_continents = source.continent.is_some(),
            "Loaded city database"
        );
        Ok(source)
    }

    pub fn from_bytes(mut bytes: Vec<u8>) -> Result<Self, SourceError> {
        let db: Database = simd_json::serde::from_slice(&mut bytes)?;
        let mut cities = db.cities;
        cities.par_sort_by(|a, b| {
            let pa = a.population.unwrap_or(0.0);
            let pb = b.population.unwrap_or(0.0);
            pb.total_cmp(&pa)
        });
        Ok(Self {
            cities,
            continent: db.continent,
        })
    }

    pub fn len(&self) -> usize {
        self.cities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cities.is_empty()
    }
}

impl RecordSource for JsonDatabaseSource {
    fn fetch_page(&mut self, page_size: usize, page: usize) -> Result<Vec<RawCityRecord>, SourceError> {
        page_of(&self.cities, page_size, page)
    }
}

impl MappingSource for JsonDatabaseSource {
    fn fetch_mapping(&mut self) -> Result<ContinentMapping, SourceError> {
        self.continent
            .clone()
            .ok_or_else(|| SourceError::MappingUnavailable("database has no continent table".into()))
    }
}

/// Standalone country → continent JSON object, read on each fetch
#[derive(Debug, Clone)]
pub struct JsonMappingSource {
    path: PathBuf,
}

impl JsonMappingSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl MappingSource for JsonMappingSource {
    fn fetch_mapping(&mut self) -> Result<ContinentMapping, SourceError> {
        let mut bytes = fs::read(&self.path)?;
        Ok(simd_json::serde::from_slice(&mut bytes)?)
    }
}

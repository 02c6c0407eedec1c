//! Country code → continent code lookup.
//!
//! The resolver has an explicit lifecycle: it is built once, before
//! ingestion starts, either from a mapping or as an unresolved resolver.
//! An unresolved resolver answers every lookup with the country code
//! itself, so a country becomes its own continent.

use crate::cache::PersistenceCache;
use crate::error::SourceError;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Storage key of the cached mapping
pub const MAPPING_CACHE_KEY: &str = "countryToContinentMap";

/// Country code → continent code
pub type ContinentMapping = HashMap<String, String>;

/// Supplies the country to continent mapping
pub trait MappingSource {
    fn fetch_mapping(&mut self) -> Result<ContinentMapping, SourceError>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContinentResolver {
    mapping: Option<ContinentMapping>,
}

impl ContinentResolver {
    /// Resolver without a mapping; every lookup falls back to the country code
    pub fn unresolved() -> Self {
        Self { mapping: None }
    }

    pub fn from_mapping(mapping: ContinentMapping) -> Self {
        Self {
            mapping: Some(mapping),
        }
    }

    /// Load the mapping, preferring a cached copy over the source.
    ///
    /// A freshly fetched mapping is written back to the cache; a failed cache
    /// write is logged and otherwise ignored.
    pub fn load(
        source: &mut dyn MappingSource,
        mut cache: Option<&mut PersistenceCache>,
    ) -> Result<Self, SourceError> {
        if let Some(cache) = cache.as_deref_mut() {
            match cache.get_json::<ContinentMapping>(MAPPING_CACHE_KEY) {
                Some(mapping) if !mapping.is_empty() => {
                    debug!(countries = mapping.len(), "Continent mapping loaded from cache");
                    return Ok(Self::from_mapping(mapping));
                }
                _ => {}
            }
        }

        let mapping = source.fetch_mapping()?;
        info!(countries = mapping.len(), "Continent mapping fetched");

        if let Some(cache) = cache {
            if let Err(e) = cache.put_json(MAPPING_CACHE_KEY, &mapping) {
                warn!(error = %e, "Could not cache continent mapping");
            }
        }

        Ok(Self::from_mapping(mapping))
    }

    /// Load the mapping, degrading to an unresolved resolver on failure
    pub fn load_or_fallback(
        source: &mut dyn MappingSource,
        cache: Option<&mut PersistenceCache>,
    ) -> (Self, Option<SourceError>) {
        match Self::load(source, cache) {
            Ok(resolver) => (resolver, None),
            Err(e) => {
                warn!(error = %e, "Continent mapping unavailable, countries become their own continents");
                (Self::unresolved(), Some(e))
            }
        }
    }

    /// True once a mapping is installed
    pub fn is_ready(&self) -> bool {
        self.mapping.is_some()
    }

    /// Continent key for a country, or the country itself when unmapped
    pub fn resolve<'a>(&'a self, country_code: &'a str) -> &'a str {
        self.mapping
            .as_ref()
            .and_then(|m| m.get(country_code))
            .map(String::as_str)
            .unwrap_or(country_code)
    }
}

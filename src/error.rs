//! Error types for the aggregation engine.
//!
//! Only transport failures ever reach the caller. Malformed and duplicate
//! records are skipped inside the pipeline and quota failures are absorbed
//! by the cache, so the worst outcome of any error is an incomplete but
//! consistent cluster index.

use thiserror::Error;

/// Failures reported by a record or mapping source.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    /// The fetch itself failed (network, server, file)
    #[error("transport failure: {0}")]
    Transport(String),

    /// The response arrived but could not be decoded
    #[error("undecodable payload: {0}")]
    Payload(String),

    /// The source has no country to continent mapping
    #[error("continent mapping unavailable: {0}")]
    MappingUnavailable(String),
}

impl From<std::io::Error> for SourceError {
    fn from(e: std::io::Error) -> Self {
        SourceError::Transport(e.to_string())
    }
}

impl From<simd_json::Error> for SourceError {
    fn from(e: simd_json::Error) -> Self {
        SourceError::Payload(e.to_string())
    }
}

/// Why a raw record was rejected at the ingestion boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MalformedRecord {
    #[error("record has no coordinates")]
    MissingCoordinates,

    #[error("coordinates out of range: lat={lat}, lng={lng}")]
    InvalidCoordinates { lat: f64, lng: f64 },

    #[error("record has no country code")]
    MissingCountry,

    #[error("record has neither id nor name")]
    MissingName,
}

/// Local persistence failures.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Writing would exceed the storage quota
    #[error("storage quota exceeded writing '{key}': needed {needed} bytes, {available} available")]
    QuotaExceeded {
        key: String,
        needed: usize,
        available: usize,
    },

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload could not be serialized or deserialized
    #[error("storage encoding error: {0}")]
    Encode(String),
}

impl From<simd_json::Error> for StorageError {
    fn from(e: simd_json::Error) -> Self {
        StorageError::Encode(e.to_string())
    }
}

/// Invalid engine configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("countries zoom threshold ({countries}) must be below regions threshold ({regions})")]
    InvalidThresholds { countries: f64, regions: f64 },

    #[error("page size must be greater than zero")]
    ZeroPageSize,

    #[error("total volume must be greater than zero")]
    ZeroVolume,

    #[error("heat density must be finite and non-negative, got {0}")]
    InvalidDensity(f64),
}

/// Errors surfaced by the engine to its caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Ingestion stopped early because a page could not be fetched
    #[error("ingestion terminated at page {page}: {source}")]
    Transport { page: usize, source: SourceError },
}

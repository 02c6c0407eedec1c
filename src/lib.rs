//! Population aggregation engine for a city map.
//!
//! Records stream in page by page through [`ingest::IngestionPipeline`], are
//! folded into a three-tier [`cluster::ClusterIndex`] and a heat point list,
//! and [`engine::AggregationEngine`] publishes which clusters are visible for
//! the current zoom and viewport.

pub mod braille;
pub mod cache;
pub mod cluster;
pub mod config;
pub mod continent;
pub mod engine;
pub mod error;
pub mod geo;
pub mod heat;
pub mod ingest;
pub mod logging;
pub mod map;
pub mod record;
pub mod selector;
pub mod source;

pub use cluster::{Cluster, ClusterIndex, Tier};
pub use config::EngineConfig;
pub use continent::ContinentResolver;
pub use engine::{AggregationEngine, EngineEvent};
pub use error::{EngineError, SourceError};
pub use geo::{GeoBounds, GeoPoint};
pub use heat::{HeatPoint, HeatWeightAccumulator};
pub use selector::{ClusterSet, LayerSelector, ZoomThresholds};

//! Session owner: applies ingested batches and publishes what the map shows.
//!
//! The engine is owned by a single thread. Ingestion runs elsewhere and
//! reaches it only through [`IngestEvent`]s, so index reads (selection) and
//! writes (batches) never overlap. Every batch is tagged with the session
//! generation it was fetched for; batches of an older generation arrive
//! after a reset and are dropped.
//!
//! For each applied batch subscribers receive, in order:
//! `BatchApplied`, `HeatPointsUpdated`, `ClusterSetUpdated`.

use crate::cache::SharedCache;
use crate::cluster::{ClusterIndex, Tier};
use crate::config::EngineConfig;
use crate::continent::ContinentResolver;
use crate::error::{EngineError, SourceError};
use crate::geo::GeoBounds;
use crate::heat::{HeatPoint, HeatWeightAccumulator};
use crate::ingest::{IngestEvent, IngestionPipeline, PageBatch, StreamOutcome};
use crate::selector::{ClusterSet, LayerSelector};
use crate::source::RecordSource;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    BatchApplied {
        generation: u64,
        page: usize,
        accepted: usize,
        skipped_malformed: usize,
        skipped_duplicate: usize,
    },
    /// Full heat point list after a change
    HeatPointsUpdated {
        points: Arc<[HeatPoint]>,
        max_weight: f64,
    },
    /// Visible clusters after a batch or a selector recomputation
    ClusterSetUpdated(ClusterSet),
    /// The continent mapping could not be loaded; countries are their own continents
    MappingUnavailable(SourceError),
    /// Emitted once per session
    LoadingFinished { generation: u64, outcome: StreamOutcome },
    SessionReset { generation: u64 },
}

/// Fan-out of engine events to every live subscriber
#[derive(Default)]
struct EventBus {
    subscribers: Vec<Sender<EngineEvent>>,
}

impl EventBus {
    fn subscribe(&mut self) -> Receiver<EngineEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    fn publish(&mut self, event: EngineEvent) {
        // Disconnected subscribers are dropped
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

pub struct AggregationEngine {
    config: EngineConfig,
    selector: LayerSelector,
    index: ClusterIndex,
    heat: HeatWeightAccumulator,
    zoom: f64,
    viewport: GeoBounds,
    visible: ClusterSet,
    generation: u64,
    loading_finished: bool,
    bus: EventBus,
}

impl AggregationEngine {
    /// New engine at session generation 0 with a world viewport.
    ///
    /// `resolver` must already be loaded (or deliberately unresolved).
    pub fn new(config: &EngineConfig, resolver: ContinentResolver) -> Self {
        let selector = LayerSelector::new(config.zoom);
        let zoom = config.initial_zoom;
        Self {
            config: config.clone(),
            selector,
            index: ClusterIndex::new(resolver),
            heat: HeatWeightAccumulator::new(config.heat_density),
            zoom,
            viewport: GeoBounds::world(),
            visible: ClusterSet::empty(selector.tier_for(zoom)),
            generation: 0,
            loading_finished: false,
            bus: EventBus::default(),
        }
    }

    pub fn subscribe(&mut self) -> Receiver<EngineEvent> {
        self.bus.subscribe()
    }

    /// Build a pipeline for the current session from the configured page plan
    pub fn pipeline<S: RecordSource>(&self, source: S, cache: Option<SharedCache>) -> IngestionPipeline<S> {
        let pipeline =
            IngestionPipeline::new(source, self.config.page_size, self.config.total_volume, self.generation);
        match cache {
            Some(cache) => pipeline.with_cache(cache, self.config.cache_session_key.as_str()),
            None => pipeline,
        }
    }

    /// Apply one event from the ingestion stream.
    ///
    /// Events of another generation are ignored. A stream that terminated
    /// early is reported as an error after `loading_finished` is set; the
    /// batches applied before the failure are kept.
    pub fn apply(&mut self, event: IngestEvent) -> Result<(), EngineError> {
        if event.generation() != self.generation {
            debug!(
                stale = event.generation(),
                current = self.generation,
                "Dropping event from a previous session"
            );
            return Ok(());
        }

        match event {
            IngestEvent::Page(batch) => {
                self.apply_batch(batch);
                Ok(())
            }
            IngestEvent::Finished { generation, outcome } => self.finish(generation, outcome),
        }
    }

    fn apply_batch(&mut self, batch: PageBatch) {
        if self.loading_finished {
            warn!(page = batch.page, "Ignoring batch after the stream finished");
            return;
        }

        let mut accepted = 0;
        for record in &batch.records {
            if self.index.apply(record) {
                accepted += 1;
            }
            self.heat.add(record);
        }
        debug!(generation = batch.generation, page = batch.page, accepted, "Batch applied");

        self.bus.publish(EngineEvent::BatchApplied {
            generation: batch.generation,
            page: batch.page,
            accepted,
            skipped_malformed: batch.skipped.malformed,
            skipped_duplicate: batch.skipped.duplicate,
        });
        self.publish_heat();
        self.recompute();
    }

    fn finish(&mut self, generation: u64, outcome: StreamOutcome) -> Result<(), EngineError> {
        if self.loading_finished {
            return Ok(());
        }
        self.loading_finished = true;

        let result = match &outcome {
            StreamOutcome::Completed { .. } => Ok(()),
            StreamOutcome::Terminated { page, error } => Err(EngineError::Transport {
                page: *page,
                source: error.clone(),
            }),
        };
        info!(
            generation,
            clusters = self.index.tier(Tier::Country).len(),
            heat_points = self.heat.len(),
            "Loading finished"
        );
        self.bus.publish(EngineEvent::LoadingFinished { generation, outcome });
        result
    }

    /// Drain a pipeline on the calling thread
    pub fn run_to_completion<S: RecordSource>(&mut self, pipeline: IngestionPipeline<S>) -> Result<(), EngineError> {
        for event in pipeline {
            self.apply(event)?;
        }
        Ok(())
    }

    pub fn on_zoom_changed(&mut self, zoom: f64) {
        self.zoom = zoom;
        self.recompute();
    }

    pub fn on_viewport_changed(&mut self, viewport: GeoBounds) {
        self.viewport = viewport;
        self.recompute();
    }

    /// Clear all session state and start a new generation.
    ///
    /// Returns the new generation; pipelines for the new session must be
    /// built after this call.
    pub fn on_session_reset(&mut self) -> u64 {
        self.index.reset();
        self.heat.reset();
        self.loading_finished = false;
        self.generation += 1;
        info!(generation = self.generation, "Session reset");

        self.bus.publish(EngineEvent::SessionReset {
            generation: self.generation,
        });
        self.publish_heat();
        self.recompute();
        self.generation
    }

    /// Use `resolver` for records applied from now on. Continent clusters
    /// already built with fallback keys stay as they are.
    pub fn on_mapping_available(&mut self, resolver: ContinentResolver) {
        info!("Continent mapping installed");
        self.index.install_resolver(resolver);
    }

    pub fn report_mapping_failure(&mut self, error: SourceError) {
        warn!(error = %error, "Continent mapping unavailable");
        self.bus.publish(EngineEvent::MappingUnavailable(error));
    }

    fn recompute(&mut self) {
        self.visible = self.selector.select(self.zoom, &self.viewport, &self.index);
        self.bus.publish(EngineEvent::ClusterSetUpdated(self.visible.clone()));
    }

    fn publish_heat(&mut self) {
        self.bus.publish(EngineEvent::HeatPointsUpdated {
            points: Arc::from(self.heat.snapshot()),
            max_weight: self.heat.max_weight(),
        });
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn loading_finished(&self) -> bool {
        self.loading_finished
    }

    pub fn index(&self) -> &ClusterIndex {
        &self.index
    }

    pub fn heat(&self) -> &HeatWeightAccumulator {
        &self.heat
    }

    /// Result of the latest selection
    pub fn visible(&self) -> &ClusterSet {
        &self.visible
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn viewport(&self) -> GeoBounds {
        self.viewport
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

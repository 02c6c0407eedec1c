use crate::Dataset;
use anyhow::Result;
use popmap::cache::SharedCache;
use popmap::engine::{AggregationEngine, EngineEvent};
use popmap::geo::GeoPoint;
use popmap::heat::HeatPoint;
use popmap::ingest::{self, IngestEvent, IngestHandle, StreamOutcome};
use popmap::map::Viewport;
use popmap::selector::ClusterSet;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use tracing::{info, warn};

/// Where the map opens when no centre is given
pub const DEFAULT_CENTER: GeoPoint = GeoPoint {
    lat: 59.866,
    lng: 30.163,
};

/// Ingestion progress of the current session, as shown in the status bar
#[derive(Debug, Clone, Default)]
pub struct Progress {
    pub pages: usize,
    pub accepted: usize,
    pub skipped: usize,
    pub finished: bool,
    pub from_cache: bool,
    pub error: Option<String>,
}

/// Application state
pub struct App {
    pub viewport: Viewport,
    pub engine: AggregationEngine,
    pub should_quit: bool,
    /// Last mouse position for drag tracking
    pub last_mouse: Option<(u16, u16)>,
    /// Current mouse position for cursor marker
    pub mouse_pos: Option<(u16, u16)>,
    /// Latest heat points published by the engine
    pub heat_points: Arc<[HeatPoint]>,
    pub heat_max: f64,
    /// Latest visible cluster set published by the engine
    pub clusters: ClusterSet,
    pub progress: Progress,
    /// Continent mapping could not be loaded
    pub mapping_unavailable: bool,
    engine_events: Receiver<EngineEvent>,
    ingest_tx: Sender<IngestEvent>,
    ingest_rx: Receiver<IngestEvent>,
    ingest: Option<IngestHandle>,
    dataset: Dataset,
    cache: Option<SharedCache>,
}

impl App {
    pub fn new(
        width: usize,
        height: usize,
        center: GeoPoint,
        mut engine: AggregationEngine,
        dataset: Dataset,
        cache: Option<SharedCache>,
    ) -> Self {
        let (pixel_width, pixel_height) = map_pixels(width, height);
        let engine_events = engine.subscribe();
        let (ingest_tx, ingest_rx) = mpsc::channel();
        let viewport = Viewport::new(center, engine.zoom(), pixel_width, pixel_height);
        let clusters = engine.visible().clone();

        let mut app = Self {
            viewport,
            engine,
            should_quit: false,
            last_mouse: None,
            mouse_pos: None,
            heat_points: Arc::from(Vec::new()),
            heat_max: 0.0,
            clusters,
            progress: Progress::default(),
            mapping_unavailable: false,
            engine_events,
            ingest_tx,
            ingest_rx,
            ingest: None,
            dataset,
            cache,
        };
        app.sync_view();
        app
    }

    /// Start ingesting for the engine's current generation
    pub fn start_session(&mut self) -> Result<()> {
        let pipeline = self.engine.pipeline(self.dataset.source(), self.cache.clone());
        info!(
            generation = pipeline.generation(),
            pages = pipeline.total_pages(),
            "Starting ingestion"
        );
        self.ingest = Some(ingest::spawn(pipeline, self.ingest_tx.clone())?);
        Ok(())
    }

    /// Drop everything loaded so far and ingest again
    pub fn reset_session(&mut self) -> Result<()> {
        // The old worker must be gone before the next session writes the same
        // cache keys
        if let Some(handle) = self.ingest.take() {
            handle.cancel();
            handle.join();
        }
        self.engine.on_session_reset();
        self.progress = Progress::default();
        self.start_session()
    }

    /// Apply pending ingestion events and collect what the engine published
    pub fn pump(&mut self) {
        let pending: Vec<IngestEvent> = self.ingest_rx.try_iter().collect();
        for event in pending {
            if let Err(e) = self.engine.apply(event) {
                warn!(error = %e, "Ingestion ended early");
                self.progress.error = Some(e.to_string());
            }
        }

        for event in self.engine_events.try_iter() {
            match event {
                EngineEvent::BatchApplied {
                    accepted,
                    skipped_malformed,
                    skipped_duplicate,
                    ..
                } => {
                    self.progress.pages += 1;
                    self.progress.accepted += accepted;
                    self.progress.skipped += skipped_malformed + skipped_duplicate;
                }
                EngineEvent::HeatPointsUpdated { points, max_weight } => {
                    self.heat_points = points;
                    self.heat_max = max_weight;
                }
                EngineEvent::ClusterSetUpdated(set) => self.clusters = set,
                EngineEvent::MappingUnavailable(_) => self.mapping_unavailable = true,
                EngineEvent::LoadingFinished { outcome, .. } => {
                    self.progress.finished = true;
                    if let StreamOutcome::Completed { from_cache, .. } = outcome {
                        self.progress.from_cache = from_cache;
                    }
                }
                EngineEvent::SessionReset { .. } => {}
            }
        }
    }

    /// Tell the engine about the current zoom and visible area
    fn sync_view(&mut self) {
        self.engine.on_zoom_changed(self.viewport.zoom);
        self.engine.on_viewport_changed(self.viewport.bounds());
    }

    /// Update viewport size when terminal resizes
    pub fn resize(&mut self, width: usize, height: usize) {
        let (pixel_width, pixel_height) = map_pixels(width, height);
        self.viewport.resize(pixel_width, pixel_height);
        self.sync_view();
    }

    /// Pan the map
    pub fn pan(&mut self, dx: i32, dy: i32) {
        self.viewport.pan(dx, dy);
        self.sync_view();
    }

    pub fn zoom_in(&mut self) {
        self.viewport.zoom_in();
        self.sync_view();
    }

    pub fn zoom_out(&mut self) {
        self.viewport.zoom_out();
        self.sync_view();
    }

    /// Zoom in towards a screen position (terminal column/row)
    pub fn zoom_in_at(&mut self, col: u16, row: u16) {
        let (px, py) = cell_to_pixel(col, row);
        self.viewport.zoom_in_at(px, py);
        self.sync_view();
    }

    /// Zoom out from a screen position (terminal column/row)
    pub fn zoom_out_at(&mut self, col: u16, row: u16) {
        let (px, py) = cell_to_pixel(col, row);
        self.viewport.zoom_out_at(px, py);
        self.sync_view();
    }

    pub fn quit(&mut self) {
        self.should_quit = true;
    }

    pub fn zoom_level(&self) -> String {
        format!("z{:.0}", self.viewport.zoom)
    }

    /// Get current center coordinates as a string
    pub fn center_coords(&self) -> String {
        let c = self.viewport.center;
        format!(
            "{:.1}°{}, {:.1}°{}",
            c.lat.abs(),
            if c.lat >= 0.0 { "N" } else { "S" },
            c.lng.abs(),
            if c.lng >= 0.0 { "E" } else { "W" }
        )
    }

    /// Handle mouse drag
    pub fn handle_drag(&mut self, x: u16, y: u16) {
        if let Some((last_x, last_y)) = self.last_mouse {
            let dx = last_x as i32 - x as i32;
            let dy = last_y as i32 - y as i32;
            // One cell of drag moves the map by one cell of pixels
            self.pan(dx * 2, dy * 4);
        }
        self.last_mouse = Some((x, y));
    }

    /// Reset drag state when mouse button released
    pub fn end_drag(&mut self) {
        self.last_mouse = None;
    }

    pub fn set_mouse_pos(&mut self, col: u16, row: u16) {
        self.mouse_pos = Some((col, row));
    }

    /// Get mouse position in braille pixel coordinates (for rendering marker)
    pub fn mouse_pixel_pos(&self) -> Option<(i32, i32)> {
        self.mouse_pos.map(|(col, row)| cell_to_pixel(col, row))
    }
}

/// Braille pixel size of the map area: 2x4 pixels per cell, minus the border
/// and the status bar
fn map_pixels(width: usize, height: usize) -> (usize, usize) {
    (width.saturating_sub(2) * 2, height.saturating_sub(3) * 4)
}

/// Terminal cell to braille pixel, accounting for the 1 cell border
fn cell_to_pixel(col: u16, row: u16) -> (i32, i32) {
    (col.saturating_sub(1) as i32 * 2, row.saturating_sub(1) as i32 * 4)
}

mod app;
mod ui;

use anyhow::{bail, Context, Result};
use app::{App, DEFAULT_CENTER};
use clap::Parser;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, MouseButton,
    MouseEvent, MouseEventKind,
};
use crossterm::execute;
use popmap::cache::{DirStorage, MemoryStorage, PersistenceCache, SharedCache, DEFAULT_QUOTA_BYTES};
use popmap::config::EngineConfig;
use popmap::continent::{ContinentResolver, MappingSource};
use popmap::engine::AggregationEngine;
use popmap::error::SourceError;
use popmap::geo::GeoPoint;
use popmap::logging::{init_logging, DEFAULT_LOG_FILE};
use popmap::selector::ZoomThresholds;
use popmap::source::{GeoJsonCitySource, JsonDatabaseSource, JsonMappingSource, RecordSource};
use ratatui::DefaultTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Terminal map of city populations: heat overlay plus region, country
/// and continent clusters
#[derive(Debug, Parser)]
#[command(name = "popmap", version, about)]
struct Args {
    /// City data: a `db.json` database or a GeoJSON FeatureCollection
    #[arg(long, default_value = "data/db.json")]
    data: PathBuf,

    /// Country to continent JSON object (defaults to the database's own table)
    #[arg(long)]
    mapping: Option<PathBuf>,

    /// Records per page
    #[arg(long, default_value_t = popmap::config::DEFAULT_PAGE_SIZE)]
    page_size: usize,

    /// Upper bound on records loaded per session
    #[arg(long, default_value_t = popmap::config::DEFAULT_TOTAL_VOLUME)]
    volume: usize,

    /// Zoom below which continents are shown
    #[arg(long, default_value_t = 5.0)]
    countries_zoom: f64,

    /// Zoom below which countries are shown
    #[arg(long, default_value_t = 8.0)]
    regions_zoom: f64,

    #[arg(long, default_value_t = popmap::heat::DEFAULT_HEAT_DENSITY)]
    heat_density: f64,

    #[arg(long, default_value_t = popmap::config::DEFAULT_INITIAL_ZOOM)]
    zoom: f64,

    #[arg(long, default_value_t = DEFAULT_CENTER.lat, allow_hyphen_values = true)]
    lat: f64,

    #[arg(long, default_value_t = DEFAULT_CENTER.lng, allow_hyphen_values = true)]
    lng: f64,

    /// Persist pages and the mapping here; in-memory only when absent
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Cache quota in bytes
    #[arg(long, default_value_t = DEFAULT_QUOTA_BYTES)]
    cache_quota: usize,

    #[arg(long, default_value = DEFAULT_LOG_FILE)]
    log_file: PathBuf,
}

impl Args {
    fn engine_config(&self) -> Result<EngineConfig> {
        let config = EngineConfig {
            page_size: self.page_size,
            total_volume: self.volume,
            zoom: ZoomThresholds {
                countries: self.countries_zoom,
                regions: self.regions_zoom,
            },
            initial_zoom: self.zoom,
            heat_density: self.heat_density,
            ..EngineConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}

/// City data loaded once at startup; every session pages through a copy
#[derive(Debug, Clone)]
pub enum Dataset {
    Database(JsonDatabaseSource),
    GeoJson(GeoJsonCitySource),
}

impl Dataset {
    fn open(path: &Path) -> Result<Self> {
        let is_geojson = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("geojson"));

        let dataset = if is_geojson {
            Dataset::GeoJson(GeoJsonCitySource::open(path)?)
        } else {
            Dataset::Database(JsonDatabaseSource::open(path)?)
        };
        Ok(dataset)
    }

    pub fn source(&self) -> Box<dyn RecordSource> {
        match self {
            Dataset::Database(db) => Box::new(db.clone()),
            Dataset::GeoJson(geojson) => Box::new(geojson.clone()),
        }
    }

    fn mapping_source(&self, mapping: Option<&Path>) -> Option<Box<dyn MappingSource>> {
        match (mapping, self) {
            (Some(path), _) => Some(Box::new(JsonMappingSource::new(path))),
            (None, Dataset::Database(db)) => Some(Box::new(db.clone())),
            (None, Dataset::GeoJson(_)) => None,
        }
    }
}

fn open_cache(args: &Args) -> Result<SharedCache> {
    let cache = match &args.cache_dir {
        Some(dir) => {
            let storage = DirStorage::open(dir, args.cache_quota)
                .with_context(|| format!("opening cache directory {}", dir.display()))?;
            PersistenceCache::new(Box::new(storage))
        }
        None => PersistenceCache::new(Box::new(MemoryStorage::new(args.cache_quota))),
    };
    Ok(cache.shared())
}

/// Settle the continent mapping before the first record is clustered.
///
/// GeoJSON data carries no continent table, so without `--mapping` it falls
/// back the same way a failed fetch does.
fn resolve_mapping(
    dataset: &Dataset,
    mapping: Option<&Path>,
    cache: &SharedCache,
) -> (ContinentResolver, Option<SourceError>) {
    match dataset.mapping_source(mapping) {
        Some(mut source) => {
            let mut guard = cache.lock();
            ContinentResolver::load_or_fallback(source.as_mut(), Some(&mut *guard))
        }
        None => {
            let e = SourceError::MappingUnavailable("GeoJSON city data has no continent table, pass --mapping".into());
            (ContinentResolver::unresolved(), Some(e))
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.engine_config()?;
    let _log_guard = init_logging(&args.log_file)
        .with_context(|| format!("opening log file {}", args.log_file.display()))?;

    if !args.data.exists() {
        bail!("city data not found: {}", args.data.display());
    }
    let dataset = Dataset::open(&args.data)?;
    let cache = open_cache(&args)?;

    let (resolver, mapping_error) = resolve_mapping(&dataset, args.mapping.as_deref(), &cache);

    let engine = AggregationEngine::new(&config, resolver);
    let center = GeoPoint::new(args.lat, args.lng);
    info!(data = %args.data.display(), page_size = config.page_size, volume = config.total_volume, "Starting viewer");

    // Initialize terminal
    let mut terminal = ratatui::init();
    terminal.clear()?;
    execute!(std::io::stdout(), EnableMouseCapture)?;

    let size = terminal.size()?;
    let mut app = App::new(size.width as usize, size.height as usize, center, engine, dataset, Some(cache));
    if let Some(e) = mapping_error {
        app.engine.report_mapping_failure(e);
    }

    let result = app.start_session().and_then(|()| run(&mut terminal, &mut app));

    // Disable mouse capture and restore terminal
    let _ = execute!(std::io::stdout(), DisableMouseCapture);
    ratatui::restore();

    result
}

/// Handle mouse events for panning and zooming
fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    app.set_mouse_pos(mouse.column, mouse.row);

    match mouse.kind {
        MouseEventKind::ScrollUp => app.zoom_in_at(mouse.column, mouse.row),
        MouseEventKind::ScrollDown => app.zoom_out_at(mouse.column, mouse.row),
        // Horizontal scroll for panning (trackpad two-finger swipe)
        MouseEventKind::ScrollLeft => app.pan(-15, 0),
        MouseEventKind::ScrollRight => app.pan(15, 0),
        MouseEventKind::Down(MouseButton::Left) => {
            app.last_mouse = Some((mouse.column, mouse.row));
        }
        MouseEventKind::Drag(MouseButton::Left) => {
            app.handle_drag(mouse.column, mouse.row);
        }
        MouseEventKind::Up(MouseButton::Left) => {
            app.end_drag();
        }
        _ => {}
    }
}

fn run(terminal: &mut DefaultTerminal, app: &mut App) -> Result<()> {
    loop {
        app.pump();
        terminal.draw(|frame| ui::render(frame, app))?;

        // Handle events with ~60fps target
        if event::poll(Duration::from_millis(16))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => app.quit(),

                    // Pan with hjkl or arrow keys
                    KeyCode::Left | KeyCode::Char('h') => app.pan(-10, 0),
                    KeyCode::Right | KeyCode::Char('l') => app.pan(10, 0),
                    KeyCode::Up | KeyCode::Char('k') => app.pan(0, -6),
                    KeyCode::Down | KeyCode::Char('j') => app.pan(0, 6),

                    KeyCode::Char('+') | KeyCode::Char('=') => app.zoom_in(),
                    KeyCode::Char('-') | KeyCode::Char('_') => app.zoom_out(),

                    KeyCode::Char('r') => app.reset_session()?,

                    _ => {}
                },
                Event::Mouse(mouse) => handle_mouse(app, mouse),
                Event::Resize(width, height) => app.resize(width as usize, height as usize),
                _ => {}
            }
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}

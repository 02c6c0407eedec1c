mod projection;

pub use projection::{Viewport, MAX_CENTER_LAT, MAX_ZOOM, MIN_ZOOM};

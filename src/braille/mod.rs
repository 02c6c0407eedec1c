mod canvas;
mod heat;

pub use canvas::BrailleCanvas;
pub use heat::{HeatCanvas, HeatLayer, DEFAULT_HEAT_RADIUS_PX};

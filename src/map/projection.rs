use crate::geo::{clamp_lat, wrap_lon, GeoBounds, GeoPoint, MAX_MERCATOR_LAT};
use glam::DVec2;
use std::f64::consts::PI;

/// World width in braille pixels at zoom 0
pub const TILE_PX: f64 = 256.0;
pub const MIN_ZOOM: f64 = 0.0;
pub const MAX_ZOOM: f64 = 18.0;
/// The map centre is kept inside this latitude band
pub const MAX_CENTER_LAT: f64 = 80.0;

/// Visible map area: a Web Mercator window around a centre point.
///
/// `zoom` follows slippy-map levels, so the world is `256 * 2^zoom` braille
/// pixels wide.
#[derive(Debug, Clone, PartialEq)]
pub struct Viewport {
    pub center: GeoPoint,
    pub zoom: f64,
    /// Canvas pixel width
    pub width: usize,
    /// Canvas pixel height
    pub height: usize,
}

impl Viewport {
    pub fn new(center: GeoPoint, zoom: f64, width: usize, height: usize) -> Self {
        let mut viewport = Self {
            center,
            zoom: zoom.clamp(MIN_ZOOM, MAX_ZOOM),
            width,
            height,
        };
        viewport.constrain_center();
        viewport
    }

    pub fn resize(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
    }

    fn world_px(&self) -> f64 {
        TILE_PX * self.zoom.exp2()
    }

    fn half_size(&self) -> DVec2 {
        DVec2::new(self.width as f64, self.height as f64) * 0.5
    }

    /// Pan the viewport by pixel delta
    pub fn pan(&mut self, dx: i32, dy: i32) {
        let world = self.world_px();
        let c = mercator(self.center) + DVec2::new(dx as f64, dy as f64) / world;
        self.center = inverse_mercator(c);
        self.constrain_center();
    }

    fn constrain_center(&mut self) {
        self.center.lng = wrap_lon(self.center.lng);
        self.center.lat = self.center.lat.clamp(-MAX_CENTER_LAT, MAX_CENTER_LAT);
    }

    /// One zoom level in
    pub fn zoom_in(&mut self) {
        self.set_zoom(self.zoom + 1.0);
    }

    /// One zoom level out
    pub fn zoom_out(&mut self) {
        self.set_zoom(self.zoom - 1.0);
    }

    pub fn set_zoom(&mut self, zoom: f64) {
        self.zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
    }

    /// Zoom in keeping the point under a pixel fixed
    pub fn zoom_in_at(&mut self, px: i32, py: i32) {
        self.zoom_at(px, py, 1.0);
    }

    pub fn zoom_out_at(&mut self, px: i32, py: i32) {
        self.zoom_at(px, py, -1.0);
    }

    fn zoom_at(&mut self, px: i32, py: i32, step: f64) {
        let anchor = self.unproject(px, py);
        self.set_zoom(self.zoom + step);
        let (new_px, new_py) = self.project(anchor);
        self.pan(new_px - px, new_py - py);
    }

    /// Project a geographic position to pixel coordinates
    pub fn project(&self, point: GeoPoint) -> (i32, i32) {
        let p = (mercator(point) - mercator(self.center)) * self.world_px() + self.half_size();
        (p.x.round() as i32, p.y.round() as i32)
    }

    /// Geographic position under a pixel
    pub fn unproject(&self, px: i32, py: i32) -> GeoPoint {
        let p = DVec2::new(px as f64, py as f64);
        inverse_mercator(mercator(self.center) + (p - self.half_size()) / self.world_px())
    }

    pub fn is_visible(&self, px: i32, py: i32) -> bool {
        px >= 0 && py >= 0 && (px as usize) < self.width && (py as usize) < self.height
    }

    /// Visible lat/lng rectangle, clipped to the world
    pub fn bounds(&self) -> GeoBounds {
        let top_left = self.unproject(0, 0);
        let bottom_right = self.unproject(self.width as i32, self.height as i32);
        let half_span = self.width as f64 / self.world_px() * 180.0;

        let (west, east) = if half_span >= 180.0 {
            (-180.0, 180.0)
        } else {
            (
                (self.center.lng - half_span).max(-180.0),
                (self.center.lng + half_span).min(180.0),
            )
        };
        GeoBounds::new(
            bottom_right.lat.max(-90.0),
            west,
            top_left.lat.min(90.0),
            east,
        )
    }
}

/// Normalised Web Mercator: x, y in [0, 1], y grows southwards
fn mercator(point: GeoPoint) -> DVec2 {
    let lat = clamp_lat(point.lat).to_radians();
    DVec2::new(
        (point.lng + 180.0) / 360.0,
        (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) / 2.0,
    )
}

fn inverse_mercator(v: DVec2) -> GeoPoint {
    let lat = (PI * (1.0 - 2.0 * v.y)).sinh().atan().to_degrees();
    GeoPoint::new(lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT), v.x * 360.0 - 180.0)
}

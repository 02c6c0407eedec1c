use super::BrailleCanvas;
use crate::geo::GeoPoint;
use crate::heat::HeatPoint;
use crate::map::Viewport;
use rayon::prelude::*;

/// Splat radius in braille pixels
pub const DEFAULT_HEAT_RADIUS_PX: f32 = 10.0;

/// Normalised intensity below which a pixel stays dark
const DOT_THRESHOLD: f32 = 0.04;

/// Density grid at braille pixel resolution.
///
/// Every point adds its weight to the pixels within `radius`, falling off
/// linearly with distance. Intensities are scaled against the hottest pixel
/// when rendered.
pub struct HeatCanvas {
    width: usize,  // Characters
    height: usize, // Characters
    radius: f32,
    grid: Vec<f32>,
}

/// Rendered heat overlay: the dots plus the peak intensity per cell, in 0..=1
pub struct HeatLayer {
    pub canvas: BrailleCanvas,
    pub intensity: Vec<f32>,
}

impl HeatLayer {
    pub fn cell_intensity(&self, cx: usize, cy: usize) -> f32 {
        self.intensity
            .get(cy * self.canvas.width() + cx)
            .copied()
            .unwrap_or(0.0)
    }
}

impl HeatCanvas {
    pub fn new(width: usize, height: usize, radius: f32) -> Self {
        Self {
            width,
            height,
            radius: radius.max(1.0),
            grid: vec![0.0; width * 2 * height * 4],
        }
    }

    fn pixel_width(&self) -> usize {
        self.width * 2
    }

    fn pixel_height(&self) -> usize {
        self.height * 4
    }

    /// Project and splat every point that lands near the viewport
    pub fn splat_points(&mut self, points: &[HeatPoint], viewport: &Viewport) {
        let margin = self.radius.ceil() as i32;
        let (w, h) = (self.pixel_width() as i32, self.pixel_height() as i32);

        let projected: Vec<(i32, i32, f32)> = points
            .par_iter()
            .filter_map(|p| {
                let (x, y) = viewport.project(GeoPoint::new(p.lat, p.lng));
                let near = x > -margin && y > -margin && x < w + margin && y < h + margin;
                near.then_some((x, y, p.weight as f32))
            })
            .collect();

        for (x, y, weight) in projected {
            self.splat(x, y, weight);
        }
    }

    /// Add `weight` around pixel (x, y)
    pub fn splat(&mut self, x: i32, y: i32, weight: f32) {
        if weight <= 0.0 {
            return;
        }
        let r = self.radius;
        let reach = r.ceil() as i32;
        let (w, h) = (self.pixel_width() as i32, self.pixel_height() as i32);

        for py in (y - reach).max(0)..(y + reach + 1).min(h) {
            for px in (x - reach).max(0)..(x + reach + 1).min(w) {
                let d = (((px - x).pow(2) + (py - y).pow(2)) as f32).sqrt();
                if d <= r {
                    self.grid[py as usize * w as usize + px as usize] += weight * (1.0 - d / r);
                }
            }
        }
    }

    pub fn render(&self) -> HeatLayer {
        let mut canvas = BrailleCanvas::new(self.width, self.height);
        let mut intensity = vec![0.0f32; self.width * self.height];
        let peak = self.grid.iter().copied().fold(0.0f32, f32::max);
        if peak <= 0.0 {
            return HeatLayer { canvas, intensity };
        }

        let w = self.pixel_width();
        for (i, &value) in self.grid.iter().enumerate() {
            let level = value / peak;
            if level < DOT_THRESHOLD {
                continue;
            }
            let (px, py) = (i % w, i / w);
            canvas.set_pixel(px, py);
            let cell = &mut intensity[(py / 4) * self.width + px / 2];
            *cell = cell.max(level);
        }
        HeatLayer { canvas, intensity }
    }
}

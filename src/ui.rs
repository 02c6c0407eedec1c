use crate::app::App;
use popmap::braille::{HeatCanvas, HeatLayer, DEFAULT_HEAT_RADIUS_PX};
use popmap::cluster::Cluster;
use popmap::map::Viewport;
use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Widget},
    Frame,
};

/// Render the UI
pub fn render(frame: &mut Frame, app: &App) {
    let area = frame.area();

    // Split into map area and status bar
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(3),    // Map
            Constraint::Length(1), // Status bar
        ])
        .split(area);

    render_map(frame, app, chunks[0]);
    render_status_bar(frame, app, chunks[1]);
}

fn render_map(frame: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(Span::styled(
            " City Population ",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    // Braille gives 2x4 resolution per character
    let mut viewport = app.viewport.clone();
    viewport.resize(inner.width as usize * 2, inner.height as usize * 4);

    let mut heat = HeatCanvas::new(inner.width as usize, inner.height as usize, DEFAULT_HEAT_RADIUS_PX);
    heat.splat_points(&app.heat_points, &viewport);

    let cursor_pos = app.mouse_pixel_pos().and_then(|(px, py)| {
        let (cx, cy) = ((px / 2) as u16, (py / 4) as u16);
        (cx < inner.width && cy < inner.height).then_some((cx, cy))
    });

    let labels = place_labels(&app.clusters.clusters, &viewport, inner.width, inner.height);

    frame.render_widget(
        MapWidget {
            heat: heat.render(),
            labels,
            cursor_pos,
        },
        inner,
    );
}

/// Cluster label positioned in map cells
struct Label {
    x: u16,
    y: u16,
    text: String,
}

/// Lay out one label per cluster at its centre, largest population first.
/// A label that would overlap one already placed is dropped, keeping the
/// tier's grouping radius free around each marker.
fn place_labels(clusters: &[Cluster], viewport: &Viewport, width: u16, height: u16) -> Vec<Label> {
    let mut ordered: Vec<&Cluster> = clusters.iter().collect();
    ordered.sort_by(|a, b| b.aggregate_population.cmp(&a.aggregate_population));

    let mut taken: Vec<(u16, u16, u16)> = Vec::new(); // y, x_start, x_end
    let mut labels = Vec::new();

    for cluster in ordered {
        let label = cluster.label();
        if label.is_empty() {
            continue;
        }
        let (px, py) = viewport.project(cluster.bounds.center());
        if !viewport.is_visible(px, py) {
            continue;
        }

        let text = format!("● {} {}", cluster.key, label);
        let (x, y) = ((px / 2) as u16, (py / 4) as u16);
        let len = text.chars().count() as u16;
        let end = x.saturating_add(len).min(width);
        // Grouping radius in screen pixels, roughly 8 pixels per cell
        let pad = (cluster.tier.cluster_radius_px() / 40) as u16;

        let overlaps = taken.iter().any(|&(ty, start, stop)| {
            ty.abs_diff(y) <= pad / 2 && start <= end.saturating_add(pad) && x <= stop.saturating_add(pad)
        });
        if overlaps || y >= height {
            continue;
        }
        taken.push((y, x, end));
        labels.push(Label { x, y, text });
    }
    labels
}

/// Heat intensity to colour, after the usual blue → red heat gradient
fn heat_color(intensity: f32) -> Color {
    match intensity {
        i if i >= 0.8 => Color::Red,
        i if i >= 0.6 => Color::Yellow,
        i if i >= 0.4 => Color::Green,
        i if i >= 0.2 => Color::Cyan,
        _ => Color::Blue,
    }
}

/// Braille heat overlay with cluster labels on top
struct MapWidget {
    heat: HeatLayer,
    labels: Vec<Label>,
    cursor_pos: Option<(u16, u16)>,
}

impl Widget for MapWidget {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let canvas = &self.heat.canvas;
        for cy in 0..canvas.height().min(area.height as usize) {
            for cx in 0..canvas.width().min(area.width as usize) {
                if let Some(ch) = canvas.glyph(cx, cy) {
                    let color = heat_color(self.heat.cell_intensity(cx, cy));
                    buf[(area.x + cx as u16, area.y + cy as u16)].set_char(ch).set_fg(color);
                }
            }
        }

        let label_style = Style::default().fg(Color::White).add_modifier(Modifier::BOLD);
        for label in &self.labels {
            let y = area.y + label.y;
            for (i, ch) in label.text.chars().enumerate() {
                let x = area.x + label.x + i as u16;
                if x >= area.x + area.width {
                    break;
                }
                buf[(x, y)].set_char(ch).set_style(label_style);
            }
        }

        if let Some((cx, cy)) = self.cursor_pos {
            buf[(area.x + cx, area.y + cy)].set_char('╋').set_fg(Color::Red);
        }
    }
}

fn render_status_bar(frame: &mut Frame, app: &App, area: Rect) {
    let progress = &app.progress;
    let (loading, loading_color) = match (&progress.error, progress.finished) {
        (Some(_), _) => ("failed", Color::Red),
        (None, true) if progress.from_cache => ("cached", Color::Green),
        (None, true) => ("loaded", Color::Green),
        (None, false) => ("loading", Color::Yellow),
    };

    let mut spans = vec![
        Span::styled(" Zoom: ", Style::default().fg(Color::DarkGray)),
        Span::styled(app.zoom_level(), Style::default().fg(Color::Yellow)),
        Span::styled(" Tier: ", Style::default().fg(Color::DarkGray)),
        Span::styled(app.clusters.tier.name(), Style::default().fg(Color::Magenta)),
        Span::styled(" Visible: ", Style::default().fg(Color::DarkGray)),
        Span::styled(app.clusters.len().to_string(), Style::default().fg(Color::White)),
        Span::styled(" | ", Style::default().fg(Color::DarkGray)),
        Span::styled(loading, Style::default().fg(loading_color)),
        Span::styled(
            format!(" {} cities, {} pages ", progress.accepted, progress.pages),
            Style::default().fg(Color::DarkGray),
        ),
    ];
    if app.mapping_unavailable {
        spans.push(Span::styled("[no continents] ", Style::default().fg(Color::Red)));
    }
    spans.extend([
        Span::styled("| ", Style::default().fg(Color::DarkGray)),
        Span::styled(app.center_coords(), Style::default().fg(Color::Cyan)),
        Span::styled(
            " | hjkl:pan +/-:zoom r:reload q:quit",
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use popmap::geo::{GeoBounds, GeoPoint};
    use popmap::Tier;

    fn cluster(key: &str, lat: f64, lng: f64, population: u64) -> Cluster {
        Cluster {
            tier: Tier::Country,
            key: key.to_string(),
            member_count: 1,
            aggregate_population: population,
            bounds: GeoBounds::new(lat, lng, lat, lng),
        }
    }

    #[test]
    fn test_heat_gradient() {
        assert_eq!(heat_color(0.1), Color::Blue);
        assert_eq!(heat_color(0.5), Color::Green);
        assert_eq!(heat_color(1.0), Color::Red);
    }

    #[test]
    fn test_labels_skip_overlaps_and_empty() {
        let viewport = Viewport::new(GeoPoint::new(50.0, 10.0), 4.0, 200, 100);
        let clusters = [
            cluster("FR", 48.8, 2.3, 2_000_000),
            cluster("BE", 48.9, 2.4, 1_000),
            cluster("XX", 50.0, 10.0, 0),
            cluster("US", 40.7, -74.0, 8_000_000),
        ];
        let labels = place_labels(&clusters, &viewport, 100, 25);

        let texts: Vec<_> = labels.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["● FR 2 000 000"]);
    }
}

//!
//! # Overlays
//!
//! The non-geometry furniture of a frame: the decade grid under the
//! layout, the scale bar, the metrics readout, and the pointer coordinate
//! label. All of it draws in screen space through the same [DrawList] as
//! the geometry.
//!

// Std-Lib
use std::time::{Duration, Instant};

// Crates.io
use gdscope_model::{Color, Units};

// Local imports
use crate::draw::DrawList;
use crate::viewport::Viewport;
use crate::Metrics;

/// Grid lines aimed at roughly this many per viewport width
const GRID_TARGET_LINES: f64 = 10.0;
const GRID_ALPHA: f32 = 0.3;
const GRID_COLOR: Color = Color {
    r: 0x3a,
    g: 0x3f,
    b: 0x4a,
};
const OVERLAY_COLOR: Color = Color {
    r: 0xd0,
    g: 0xd4,
    b: 0xdc,
};

/// Decade grid spacing for a given world width:
/// `10^⌊log₁₀(width / target)⌋`
pub fn grid_spacing(world_width: f64) -> f64 {
    10f64.powf((world_width / GRID_TARGET_LINES).log10().floor())
}

/// Draw the grid. Called before any geometry so the lines sit underneath.
pub fn draw_grid(vp: &Viewport, draw: &mut dyn DrawList) {
    let bounds = vp.world_bounds();
    let spacing = grid_spacing(bounds.width());
    if !spacing.is_finite() || spacing <= 0.0 {
        return;
    }
    // Cap runaway line counts when the spacing collapses against a huge
    // window
    if bounds.width() / spacing > 200.0 || bounds.height() / spacing > 200.0 {
        return;
    }
    let mut x = (bounds.min_x / spacing).floor() * spacing;
    while x <= bounds.max_x {
        let a = vp.world_to_screen(x, bounds.min_y);
        let b = vp.world_to_screen(x, bounds.max_y);
        draw.stroke_line(a, b, GRID_COLOR, GRID_ALPHA, 1.0);
        x += spacing;
    }
    let mut y = (bounds.min_y / spacing).floor() * spacing;
    while y <= bounds.max_y {
        let a = vp.world_to_screen(bounds.min_x, y);
        let b = vp.world_to_screen(bounds.max_x, y);
        draw.stroke_line(a, b, GRID_COLOR, GRID_ALPHA, 1.0);
        y += spacing;
    }
}

/// Scale-bar choice: a round micrometer length whose bar is about a
/// quarter of the viewport, and its label.
pub fn scale_bar_value(vp: &Viewport, units: &Units) -> (f64, String) {
    let quarter_dbu = (vp.width / 4.0) / vp.zoom();
    let quarter_um = units.dbu_to_um(quarter_dbu);
    let round_um = round_1_2_5(quarter_um);
    (round_um, format_length_um(round_um))
}

/// Largest 1/2/5 × 10ⁿ value not above `value`
fn round_1_2_5(value: f64) -> f64 {
    if value <= 0.0 || !value.is_finite() {
        return 0.0;
    }
    let decade = 10f64.powf(value.log10().floor());
    for mult in [5.0, 2.0, 1.0] {
        if decade * mult <= value {
            return decade * mult;
        }
    }
    decade
}

/// Label a micrometer length as nm, µm, or mm by magnitude
fn format_length_um(um: f64) -> String {
    if um >= 1000.0 {
        format!("{} mm", trim(um / 1000.0))
    } else if um >= 1.0 {
        format!("{} µm", trim(um))
    } else {
        format!("{} nm", trim(um * 1000.0))
    }
}
fn trim(v: f64) -> String {
    if (v - v.round()).abs() < 1e-9 {
        format!("{}", v.round() as i64)
    } else {
        format!("{:.2}", v)
    }
}

/// Draw the scale bar near the bottom-left corner
pub fn draw_scale_bar(vp: &Viewport, units: &Units, draw: &mut dyn DrawList) {
    let (um, label) = scale_bar_value(vp, units);
    if um <= 0.0 {
        return;
    }
    let dbu = um / (units.dbu_in_meters() * 1e6);
    let px = dbu * vp.zoom();
    let y = vp.height - 24.0;
    draw.stroke_line([16.0, y], [16.0 + px, y], OVERLAY_COLOR, 1.0, 2.0);
    draw.stroke_line([16.0, y - 4.0], [16.0, y + 4.0], OVERLAY_COLOR, 1.0, 2.0);
    draw.stroke_line(
        [16.0 + px, y - 4.0],
        [16.0 + px, y + 4.0],
        OVERLAY_COLOR,
        1.0,
        2.0,
    );
    draw.text([16.0 + px / 2.0 - 12.0, y - 8.0], &label, OVERLAY_COLOR);
}

/// Pointer coordinate readout: screen position → world DBU → µm text
pub fn coordinate_readout(vp: &Viewport, units: &Units, sx: f64, sy: f64) -> String {
    let w = vp.screen_to_world(sx, sy);
    format!(
        "x {:.3} µm  y {:.3} µm",
        units.dbu_to_um(w[0]),
        units.dbu_to_um(w[1])
    )
}

/// # Frame-Rate Counter
/// Counts frames and refreshes the published rate every 500 ms.
#[derive(Debug, Clone)]
pub struct FpsCounter {
    interval: Duration,
    frames: u32,
    window_start: Instant,
    fps: f64,
}
impl FpsCounter {
    pub fn new(now: Instant) -> Self {
        Self {
            interval: Duration::from_millis(500),
            frames: 0,
            window_start: now,
            fps: 0.0,
        }
    }
    /// Count one frame; updates the published value each interval
    pub fn frame(&mut self, now: Instant) {
        self.frames += 1;
        let elapsed = now.duration_since(self.window_start);
        if elapsed >= self.interval {
            self.fps = self.frames as f64 / elapsed.as_secs_f64();
            self.frames = 0;
            self.window_start = now;
        }
    }
    pub fn fps(&self) -> f64 {
        self.fps
    }
}

/// Draw the metrics panel text block in the top-left corner
pub fn draw_metrics(metrics: &Metrics, draw: &mut dyn DrawList) {
    let lines = [
        format!("{:.0} fps", metrics.fps),
        format!(
            "{} / {} polygons ({} budget)",
            metrics.visible_polygons, metrics.total_polygons, metrics.polygon_budget
        ),
        format!(
            "depth {}  zoom {:.3e}  util {:.0}%",
            metrics.current_depth,
            metrics.zoom_level,
            metrics.budget_utilization * 100.0
        ),
    ];
    for (i, line) in lines.iter().enumerate() {
        draw.text([8.0, 16.0 + 14.0 * i as f64], line, OVERLAY_COLOR);
    }
}

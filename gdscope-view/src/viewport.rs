//!
//! # Viewport
//!
//! World-to-screen mapping and its mutations. The mapping is
//! `p_screen = (p_world − T) · S` with a signed per-axis scale whose Y
//! component is negative: world Y grows up, screen Y grows down.
//!
//! Every mutation validates the resulting state; a NaN or zero-scale
//! outcome is discarded in favor of the last valid state and counted.
//!

// Crates.io
use serde::{Deserialize, Serialize};

// Local imports
use gdscope_model::{BoundBox, Units};

/// Fraction of the viewport kept as margin by [Viewport::fit]
const FIT_MARGIN: f64 = 0.9;
/// The scale bar spans about a quarter of the viewport; its label range
/// (1 nm to 1 m) bounds the zoom
const BAR_FRACTION: f64 = 0.25;
const BAR_MIN_METERS: f64 = 1e-9;
const BAR_MAX_METERS: f64 = 1.0;

/// Axis-aligned world-space rectangle, in floating-point DBU
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldRect {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}
impl WorldRect {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }
    pub fn from_bbox(bbox: &BoundBox) -> Self {
        Self::new(
            bbox.p0.x as f64,
            bbox.p0.y as f64,
            bbox.p1.x as f64,
            bbox.p1.y as f64,
        )
    }
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
    pub fn intersects(&self, other: &Self) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.min_x <= x && x <= self.max_x && self.min_y <= y && y <= self.max_y
    }
}

/// Serializable viewport state, as persisted by hosts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportState {
    pub t: [f64; 2],
    pub s: [f64; 2],
}

///
/// # Viewport
///
/// Screen size in logical pixels plus the `(T, S)` mapping state.
///
#[derive(Debug, Clone)]
pub struct Viewport {
    /// World-space translation
    t: [f64; 2],
    /// Signed scale, pixels per DBU; `s[1] < 0`
    s: [f64; 2],
    /// Screen width, pixels
    pub width: f64,
    /// Screen height, pixels
    pub height: f64,
    /// Last state that passed validation
    last_valid: ([f64; 2], [f64; 2]),
    /// Count of updates discarded as invalid
    pub invalid_updates: usize,
    /// Zoom clamp derived from document units
    dbu_in_meters: f64,
}
impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        let t = [0.0, 0.0];
        let s = [1.0, -1.0];
        Self {
            t,
            s,
            width,
            height,
            last_valid: (t, s),
            invalid_updates: 0,
            dbu_in_meters: Units::default().dbu_in_meters(),
        }
    }
    /// Adopt the unit scale of a newly loaded document; drives the zoom
    /// clamp
    pub fn set_units(&mut self, units: &Units) {
        self.dbu_in_meters = units.dbu_in_meters();
    }
    /// Pixels per DBU
    pub fn zoom(&self) -> f64 {
        self.s[0]
    }
    /// Current mapping state
    pub fn state(&self) -> ViewportState {
        ViewportState {
            t: self.t,
            s: self.s,
        }
    }
    /// Restore a host-persisted mapping state
    pub fn set_state(&mut self, state: ViewportState) {
        self.t = state.t;
        self.s = state.s;
        self.commit();
    }
    /// Resize the screen, keeping the world mapping
    pub fn resize(&mut self, width: f64, height: f64) {
        self.width = width;
        self.height = height;
    }

    /// World → screen
    pub fn world_to_screen(&self, x: f64, y: f64) -> [f64; 2] {
        [(x - self.t[0]) * self.s[0], (y - self.t[1]) * self.s[1]]
    }
    /// Screen → world
    pub fn screen_to_world(&self, x: f64, y: f64) -> [f64; 2] {
        [x / self.s[0] + self.t[0], y / self.s[1] + self.t[1]]
    }
    /// The visible world rectangle
    pub fn world_bounds(&self) -> WorldRect {
        let a = self.screen_to_world(0.0, 0.0);
        let b = self.screen_to_world(self.width, self.height);
        WorldRect::new(
            a[0].min(b[0]),
            a[1].min(b[1]),
            a[0].max(b[0]),
            a[1].max(b[1]),
        )
    }
    /// World point at the screen center
    pub fn center(&self) -> [f64; 2] {
        self.screen_to_world(self.width / 2.0, self.height / 2.0)
    }

    /// Pan by a screen-space pixel delta
    pub fn pan(&mut self, dx: f64, dy: f64) {
        self.t[0] -= dx / self.s[0];
        self.t[1] -= dy / self.s[1];
        self.commit();
    }
    /// Zoom by `factor` keeping the world point under screen `(cx, cy)`
    /// fixed
    pub fn zoom_at(&mut self, cx: f64, cy: f64, factor: f64) {
        let anchor = self.screen_to_world(cx, cy);
        let mag = self.clamp_zoom(self.s[0] * factor);
        self.s = [mag, -mag];
        // T = p_world − p_screen / S
        self.t = [anchor[0] - cx / self.s[0], anchor[1] - cy / self.s[1]];
        self.commit();
    }
    /// Fit `bbox` into the viewport with a small margin
    pub fn fit(&mut self, bbox: &BoundBox) {
        if bbox.is_empty() {
            return;
        }
        let rect = WorldRect::from_bbox(bbox);
        let (w, h) = (rect.width().max(1.0), rect.height().max(1.0));
        let mag = self.clamp_zoom((self.width / w).min(self.height / h) * FIT_MARGIN);
        self.s = [mag, -mag];
        let cx = (rect.min_x + rect.max_x) / 2.0;
        let cy = (rect.min_y + rect.max_y) / 2.0;
        self.t = [
            cx - (self.width / 2.0) / self.s[0],
            cy - (self.height / 2.0) / self.s[1],
        ];
        self.commit();
    }
    /// Center the view on a world point, keeping the zoom
    pub fn center_on(&mut self, x: f64, y: f64) {
        self.t = [
            x - (self.width / 2.0) / self.s[0],
            y - (self.height / 2.0) / self.s[1],
        ];
        self.commit();
    }

    /// Clamp a magnification to the range the scale bar can label,
    /// 1 nm to 1 m
    fn clamp_zoom(&self, mag: f64) -> f64 {
        let bar_px = self.width * BAR_FRACTION;
        // mag = bar_px · dbu_in_meters / bar_meters
        let min_mag = bar_px * self.dbu_in_meters / BAR_MAX_METERS;
        let max_mag = bar_px * self.dbu_in_meters / BAR_MIN_METERS;
        mag.clamp(min_mag, max_mag)
    }

    /// Accept the pending state if valid, else restore and count
    fn commit(&mut self) {
        let finite = self.t.iter().chain(self.s.iter()).all(|v| v.is_finite());
        if finite && self.s[0] > 0.0 && self.s[1] < 0.0 {
            self.last_valid = (self.t, self.s);
        } else {
            let (t, s) = self.last_valid;
            self.t = t;
            self.s = s;
            self.invalid_updates += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gdscope_model::Point;

    fn square_1000() -> BoundBox {
        BoundBox::new(Point::new(0, 0), Point::new(1000, 1000))
    }

    #[test]
    fn screen_mapping_round_trips() {
        let mut vp = Viewport::new(800.0, 600.0);
        vp.fit(&square_1000());
        let w = vp.screen_to_world(123.0, 456.0);
        let s = vp.world_to_screen(w[0], w[1]);
        assert!((s[0] - 123.0).abs() < 1e-9);
        assert!((s[1] - 456.0).abs() < 1e-9);
    }

    #[test]
    fn y_axis_flips() {
        let mut vp = Viewport::new(800.0, 600.0);
        vp.fit(&square_1000());
        // A world point above another lands above it on screen,
        // i.e. at a *smaller* screen Y
        let low = vp.world_to_screen(500.0, 100.0);
        let high = vp.world_to_screen(500.0, 900.0);
        assert!(high[1] < low[1]);
    }

    #[test]
    fn fit_centers_and_contains_the_box() {
        let mut vp = Viewport::new(800.0, 600.0);
        vp.fit(&square_1000());
        let c = vp.center();
        assert!((c[0] - 500.0).abs() < 1e-6);
        assert!((c[1] - 500.0).abs() < 1e-6);
        let bounds = vp.world_bounds();
        assert!(bounds.min_x <= 0.0 && bounds.max_x >= 1000.0);
        assert!(bounds.min_y <= 0.0 && bounds.max_y >= 1000.0);
    }

    #[test]
    fn fit_twice_is_a_no_op() {
        let mut vp = Viewport::new(800.0, 600.0);
        vp.fit(&square_1000());
        let first = vp.state();
        vp.fit(&square_1000());
        let second = vp.state();
        assert!((first.t[0] - second.t[0]).abs() < 1e-9);
        assert!((first.t[1] - second.t[1]).abs() < 1e-9);
        assert!((first.s[0] - second.s[0]).abs() < 1e-12);
    }

    #[test]
    fn zoom_in_then_out_restores_state() {
        let mut vp = Viewport::new(800.0, 600.0);
        vp.fit(&square_1000());
        let before = vp.state();
        vp.zoom_at(320.0, 200.0, 1.1);
        vp.zoom_at(320.0, 200.0, 1.0 / 1.1);
        let after = vp.state();
        assert!((before.s[0] - after.s[0]).abs() < 1e-9);
        assert!((before.t[0] - after.t[0]).abs() < 1e-6);
        assert!((before.t[1] - after.t[1]).abs() < 1e-6);
    }

    #[test]
    fn zoom_keeps_cursor_point_fixed() {
        let mut vp = Viewport::new(800.0, 600.0);
        vp.fit(&square_1000());
        let anchor = vp.screen_to_world(600.0, 150.0);
        vp.zoom_at(600.0, 150.0, 1.1);
        let after = vp.screen_to_world(600.0, 150.0);
        assert!((anchor[0] - after[0]).abs() < 1e-6);
        assert!((anchor[1] - after[1]).abs() < 1e-6);
    }

    #[test]
    fn pan_moves_the_visible_window() {
        let mut vp = Viewport::new(800.0, 600.0);
        vp.fit(&square_1000());
        let before = vp.world_bounds();
        vp.pan(80.0, 0.0);
        let after = vp.world_bounds();
        // Dragging right moves the window left in world space
        assert!(after.min_x < before.min_x);
        assert!((before.min_y - after.min_y).abs() < 1e-9);
    }

    #[test]
    fn invalid_updates_are_discarded_and_counted() {
        let mut vp = Viewport::new(800.0, 600.0);
        vp.fit(&square_1000());
        let good = vp.state();
        vp.pan(f64::NAN, 0.0);
        assert_eq!(vp.invalid_updates, 1);
        assert_eq!(vp.state(), good);
        // Zero scale via a zero factor
        vp.zoom_at(0.0, 0.0, 0.0);
        assert_eq!(vp.state().s[0], vp.last_valid.1[0]);
        assert!(vp.state().s[0] > 0.0);
    }

    #[test]
    fn zoom_is_clamped_to_scale_bar_range() {
        let mut vp = Viewport::new(800.0, 600.0);
        vp.set_units(&Units::default());
        vp.fit(&square_1000());
        for _ in 0..2000 {
            vp.zoom_at(400.0, 300.0, 1.1);
        }
        // A quarter of the viewport must still span at least a nanometer
        let bar_meters = (vp.width * BAR_FRACTION / vp.zoom()) * 1e-9;
        assert!(bar_meters >= BAR_MIN_METERS * (1.0 - 1e-9));
        for _ in 0..4000 {
            vp.zoom_at(400.0, 300.0, 0.9);
        }
        let bar_meters = (vp.width * BAR_FRACTION / vp.zoom()) * 1e-9;
        assert!(bar_meters <= BAR_MAX_METERS * (1.0 + 1e-9));
    }

    #[test]
    fn center_on_lands_within_half_a_dbu() {
        let mut vp = Viewport::new(800.0, 600.0);
        vp.fit(&square_1000());
        vp.center_on(312.0, 877.0);
        let c = vp.center();
        assert!((c[0] - 312.0).abs() < 0.5);
        assert!((c[1] - 877.0).abs() < 0.5);
    }

    #[test]
    fn state_round_trips_through_serde() {
        let mut vp = Viewport::new(800.0, 600.0);
        vp.fit(&square_1000());
        let json = serde_json::to_string(&vp.state()).unwrap();
        let state: ViewportState = serde_json::from_str(&json).unwrap();
        let mut vp2 = Viewport::new(800.0, 600.0);
        vp2.set_state(state);
        assert_eq!(vp.state(), vp2.state());
    }
}

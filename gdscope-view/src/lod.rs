//!
//! # Level-of-Detail Controller
//!
//! Owns the current hierarchical render depth. After each window query the
//! controller observes the visible polygon count (hidden layers already
//! excluded), smooths it through an exponential moving average, and
//! compares the budget utilization against two thresholds to nominate a
//! depth change. Nominations only *commit* under a double hysteresis: at
//! least one second since the previous commit, and the zoom has left the
//! regime of that commit by crossing a 5× band (below 0.2× or above 2×).
//! Smooth zooming inside the current regime never thrashes the depth.
//!

// Std-Lib
use std::time::{Duration, Instant};

// Crates.io
use log::debug;

/// Tuning knobs, fixed at construction
#[derive(Debug, Clone, Copy)]
pub struct LodConfig {
    /// Maximum depth the controller will commit
    pub max_depth: u32,
    /// Utilization below this nominates a depth increase
    pub low: f64,
    /// Utilization above this nominates a depth decrease
    pub high: f64,
    /// Minimum wall time between commits
    pub min_commit_interval: Duration,
    /// A commit additionally requires zoom outside
    /// [zoom_out_ratio, zoom_in_ratio] of the zoom at the last commit
    pub zoom_out_ratio: f64,
    pub zoom_in_ratio: f64,
    /// Weight of the newest sample in the moving average
    pub ema_weight: f64,
}
impl Default for LodConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            low: 0.30,
            high: 0.90,
            min_commit_interval: Duration::from_secs(1),
            zoom_out_ratio: 0.2,
            zoom_in_ratio: 2.0,
            ema_weight: 0.1,
        }
    }
}

///
/// # LOD Controller
///
#[derive(Debug, Clone)]
pub struct LodController {
    config: LodConfig,
    depth: u32,
    avg_visible: f64,
    last_commit: Option<Instant>,
    zoom_at_commit: f64,
}
impl LodController {
    pub fn new(config: LodConfig) -> Self {
        Self {
            config,
            depth: 0,
            avg_visible: 0.0,
            last_commit: None,
            zoom_at_commit: 0.0,
        }
    }
    /// Committed depth
    pub fn depth(&self) -> u32 {
        self.depth
    }
    /// Smoothed visible-polygon count
    pub fn avg_visible(&self) -> f64 {
        self.avg_visible
    }
    /// Utilization thresholds nominating the next depth change
    pub fn thresholds(&self) -> (f64, f64) {
        (self.config.low, self.config.high)
    }

    /// Rebase after a load or an externally chosen depth: adopt `depth`
    /// and make `(zoom, now)` the commit reference point.
    pub fn reset(&mut self, depth: u32, zoom: f64, now: Instant) {
        self.depth = depth.min(self.config.max_depth);
        self.avg_visible = 0.0;
        self.last_commit = Some(now);
        self.zoom_at_commit = zoom;
    }

    /// Feed one frame's measurement. Returns the newly committed depth
    /// when both hysteresis gates open, `None` otherwise.
    pub fn observe(
        &mut self,
        visible_polygons: usize,
        budget: usize,
        zoom: f64,
        now: Instant,
    ) -> Option<u32> {
        let w = self.config.ema_weight;
        self.avg_visible = (1.0 - w) * self.avg_visible + w * visible_polygons as f64;
        let utilization = self.avg_visible / budget.max(1) as f64;

        let candidate = if utilization < self.config.low {
            (self.depth + 1).min(self.config.max_depth)
        } else if utilization > self.config.high {
            self.depth.saturating_sub(1)
        } else {
            self.depth
        };
        if candidate == self.depth {
            return None;
        }
        // Gate (a): a full commit interval has elapsed
        if let Some(at) = self.last_commit {
            if now.duration_since(at) < self.config.min_commit_interval {
                return None;
            }
        }
        // Gate (b): zoom has left the last commit's regime
        if self.last_commit.is_some() {
            let lo = self.zoom_at_commit * self.config.zoom_out_ratio;
            let hi = self.zoom_at_commit * self.config.zoom_in_ratio;
            if zoom >= lo && zoom <= hi {
                return None;
            }
        }
        self.depth = candidate;
        self.last_commit = Some(now);
        self.zoom_at_commit = zoom;
        debug!(
            "LOD commit: depth {} at utilization {:.2}",
            self.depth, utilization
        );
        Some(self.depth)
    }
}

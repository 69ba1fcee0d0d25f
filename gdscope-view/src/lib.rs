//!
//! # gdscope Viewer Core
//!
//! The frame pipeline over a loaded [Document]: spatial index, batcher,
//! LOD controller, viewport, overlays, input mapping, and minimap, all
//! behind the [ViewerEngine] façade. The engine emits draw primitives
//! against the opaque [DrawList] interface and never touches a GPU.
//!
//! Per frame, in order: input has been applied by the host, the viewport
//! is read, the spatial index is window-queried, batch visibilities are
//! committed, visible batches and overlays are submitted, and only then
//! may a level-of-detail commit swap the batcher.
//!

// Std-Lib
use std::time::Instant;

// Crates.io
use log::info;
use serde::{Deserialize, Serialize};

// Local imports
use gdscope_model::{
    dxf, CancelToken, Color, DocBuilder, Document, LayerId, LoadError, LoadResult, Statistics,
};

pub mod batch;
pub mod draw;
pub mod input;
pub mod lod;
pub mod minimap;
pub mod overlay;
pub mod spatial;
pub mod viewport;

pub use batch::Batcher;
pub use draw::DrawList;
pub use input::{Command, InputController, InputEvent};
pub use lod::{LodConfig, LodController};
pub use minimap::Minimap;
pub use spatial::{BatchHandle, ItemKind};
pub use viewport::{Viewport, ViewportState, WorldRect};


/// Construction-time configuration. No global mutable state: everything
/// tunable lives here, and per-session layer/viewport state is explicit.
#[derive(Debug, Clone)]
pub struct ViewerConfig {
    /// Global polygons-per-pass budget for the batcher
    pub polygon_budget: usize,
    /// LOD controller tuning
    pub lod: LodConfig,
    /// Minimap rectangle, logical pixels
    pub minimap_size: (f64, f64),
}
impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            polygon_budget: 100_000,
            lod: LodConfig::default(),
            minimap_size: (200.0, 200.0),
        }
    }
}

/// Frame metrics, refreshed by every render pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub fps: f64,
    pub visible_polygons: usize,
    pub total_polygons: usize,
    pub polygon_budget: usize,
    pub budget_utilization: f64,
    pub current_depth: u32,
    pub zoom_level: f64,
    pub next_lod_threshold_low: f64,
    pub next_lod_threshold_high: f64,
}

/// One layer's persisted user state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerStateEntry {
    pub id: LayerId,
    pub visible: bool,
    pub color: Color,
}
/// Host-persisted layer state, applied on load
pub type LayerState = Vec<LayerStateEntry>;

///
/// # Viewer Engine
///
/// Owns the document and every per-session piece of the pipeline. The
/// engine persists nothing itself; hosts may capture and restore
/// [ViewportState] and [LayerState].
///
pub struct ViewerEngine {
    config: ViewerConfig,
    doc: Option<Document>,
    batcher: Option<Batcher>,
    lod: LodController,
    pub viewport: Viewport,
    pub input: InputController,
    minimap: Minimap,
    fps: overlay::FpsCounter,
    pub grid_visible: bool,
    pub metrics_visible: bool,
    pub layer_panel_visible: bool,
    metrics: Metrics,
}

impl ViewerEngine {
    pub fn new(config: ViewerConfig, width: f64, height: f64) -> Self {
        let lod = LodController::new(config.lod);
        let minimap = Minimap::new(config.minimap_size.0, config.minimap_size.1);
        Self {
            lod,
            minimap,
            viewport: Viewport::new(width, height),
            input: InputController::new(width, height),
            fps: overlay::FpsCounter::new(Instant::now()),
            doc: None,
            batcher: None,
            grid_visible: true,
            metrics_visible: true,
            layer_panel_visible: true,
            metrics: Metrics {
                polygon_budget: config.polygon_budget,
                ..Metrics::default()
            },
            config,
        }
    }

    /// Load a GDSII (or, by file extension, DXF) byte buffer.
    ///
    /// On success the previous document is replaced, the viewport fits the
    /// new one, and an initial render depth is chosen. On any failure the
    /// live document is untouched.
    pub fn load(
        &mut self,
        bytes: &[u8],
        file_name: &str,
        progress: &mut dyn FnMut(u8, &str),
        cancel: &CancelToken,
    ) -> LoadResult<Statistics> {
        let is_dxf = file_name
            .rsplit('.')
            .next()
            .map(|e| e.eq_ignore_ascii_case("dxf"))
            .unwrap_or(false);
        let (doc, stats) = if is_dxf {
            let text = std::str::from_utf8(bytes).map_err(|_| LoadError::Malformed {
                offset: 0,
                msg: "DXF input is not valid text".into(),
            })?;
            dxf::import(text, file_name)?
        } else {
            DocBuilder::parse_with(bytes, file_name, &mut *progress, cancel)?
        };
        self.install(doc, progress, cancel)?;
        info!(
            "viewing {:?}: {} cells / {} polygons",
            file_name, stats.cell_count, stats.polygon_count
        );
        Ok(stats)
    }

    /// Adopt a parsed document: fit the viewport, choose the starting
    /// depth, and build the batcher.
    fn install(
        &mut self,
        doc: Document,
        progress: &mut dyn FnMut(u8, &str),
        cancel: &CancelToken,
    ) -> LoadResult<()> {
        self.viewport.set_units(&doc.units);
        self.viewport.fit(&doc.bbox);
        let depth = initial_depth(&doc, self.config.polygon_budget, self.config.lod.max_depth);
        let batcher = Batcher::build_with(
            &doc,
            depth,
            self.config.polygon_budget,
            &mut *progress,
            cancel,
        )?;
        self.lod.reset(depth, self.viewport.zoom(), Instant::now());
        self.batcher = Some(batcher);
        self.doc = Some(doc);
        Ok(())
    }

    /// The loaded document, if any
    pub fn document(&self) -> Option<&Document> {
        self.doc.as_ref()
    }
    pub fn minimap_mut(&mut self) -> &mut Minimap {
        &mut self.minimap
    }
    /// Visible world rectangle
    pub fn viewport_bounds(&self) -> WorldRect {
        self.viewport.world_bounds()
    }
    /// Metrics from the latest frame
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Route a raw input event through the controller
    pub fn handle_input(&mut self, event: InputEvent) {
        for cmd in self.input.handle(event) {
            self.apply(cmd);
        }
    }

    /// Execute one command. Synchronous; never re-enters rendering.
    pub fn apply(&mut self, cmd: Command) {
        match cmd {
            Command::Pan { dx, dy } => self.viewport.pan(dx, dy),
            Command::ZoomAt { x, y, factor } => self.viewport.zoom_at(x, y, factor),
            Command::Fit => {
                if let Some(doc) = &self.doc {
                    self.viewport.fit(&doc.bbox);
                }
            }
            Command::ToggleGrid => self.grid_visible = !self.grid_visible,
            Command::ToggleMetrics => self.metrics_visible = !self.metrics_visible,
            Command::ToggleLayerPanel => self.layer_panel_visible = !self.layer_panel_visible,
            Command::CenterOn { x, y } => self.viewport.center_on(x, y),
        }
    }

    /// A click on the minimap: navigate the main viewport there
    pub fn minimap_click(&mut self, x: f64, y: f64) {
        let doc = match &self.doc {
            Some(d) => d,
            None => return,
        };
        if let Some((wx, wy)) = self.minimap.click(doc, x, y) {
            self.viewport.center_on(wx, wy);
        }
    }

    /// Render the minimap into its own draw list
    pub fn render_minimap(&self, draw: &mut dyn DrawList) {
        if let Some(doc) = &self.doc {
            self.minimap.render(doc, &self.viewport.world_bounds(), draw);
        }
    }

    /// Render one frame
    pub fn render_frame(&mut self, draw: &mut dyn DrawList, now: Instant) {
        let mut noop = |_: &str| {};
        self.render_frame_with(draw, now, &mut noop);
    }

    /// Render one frame, surfacing partial-render and LOD messages
    /// through `on_progress`
    pub fn render_frame_with(
        &mut self,
        draw: &mut dyn DrawList,
        now: Instant,
        on_progress: &mut dyn FnMut(&str),
    ) {
        let (doc, batcher) = match (&self.doc, &mut self.batcher) {
            (Some(d), Some(b)) => (d, b),
            _ => return,
        };

        // Query the index for the visible window
        let bounds = self.viewport.world_bounds();
        let visible_slots: Vec<usize> = batcher
            .index
            .window_query(&bounds)
            .into_iter()
            .filter(|i| i.kind == ItemKind::PolygonBatch)
            .map(|i| i.slot)
            .collect();

        // Commit batch visibilities
        batcher.set_all_visible(false);
        for slot in visible_slots {
            batcher.batches[slot].visible = true;
        }

        // Grid sits under the geometry
        if self.grid_visible {
            overlay::draw_grid(&self.viewport, draw);
        }

        // Submit visible batches in document order, hidden layers excluded
        let mut visible_polygons = 0usize;
        for batch in &batcher.batches {
            if !batch.visible {
                continue;
            }
            let layer = match doc.layers.get(batch.layer) {
                Some(l) if l.visible => l,
                _ => continue,
            };
            visible_polygons += batch.polygons.len();
            for poly in &batch.polygons {
                let points: Vec<[f64; 2]> = poly
                    .iter()
                    .map(|p| self.viewport.world_to_screen(p[0], p[1]))
                    .collect();
                draw.fill_polygon(&points, layer.color, 0.75);
            }
        }
        if batcher.exhausted {
            on_progress("Polygon budget exhausted; render is partial");
        }

        // Overlays on top
        overlay::draw_scale_bar(&self.viewport, &doc.units, draw);
        if let Some((px, py)) = self.input.pointer {
            let label = overlay::coordinate_readout(&self.viewport, &doc.units, px, py);
            draw.text(
                [self.viewport.width - 180.0, self.viewport.height - 8.0],
                &label,
                Color::new(0xd0, 0xd4, 0xdc),
            );
        }

        // Metrics for this frame
        self.fps.frame(now);
        let (low, high) = self.lod.thresholds();
        self.metrics = Metrics {
            fps: self.fps.fps(),
            visible_polygons,
            total_polygons: batcher.emitted_polygons,
            polygon_budget: batcher.budget(),
            budget_utilization: batcher.emitted_polygons as f64 / batcher.budget().max(1) as f64,
            current_depth: batcher.depth(),
            zoom_level: self.viewport.zoom(),
            next_lod_threshold_low: low,
            next_lod_threshold_high: high,
        };
        if self.metrics_visible {
            overlay::draw_metrics(&self.metrics, draw);
        }

        // LOD last: a commit swaps the batcher only at this frame boundary
        if let Some(new_depth) = self.lod.observe(
            visible_polygons,
            batcher.budget(),
            self.viewport.zoom(),
            now,
        ) {
            on_progress("Adjusting level of detail");
            batcher.set_depth(doc, new_depth);
        }
    }

    /// Batches whose world box contains the point, expanded by `tolerance`
    pub fn hit_test(&self, x: f64, y: f64, tolerance: f64) -> Vec<BatchHandle> {
        match &self.batcher {
            Some(b) => b
                .index
                .point_query(x, y, tolerance)
                .into_iter()
                .filter(|i| i.kind == ItemKind::PolygonBatch)
                .map(|i| BatchHandle(i.slot))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn set_layer_visible(&mut self, layer: u16, datatype: u16, visible: bool) {
        if let Some(doc) = &mut self.doc {
            doc.layers.set_visible(LayerId::new(layer, datatype), visible);
        }
    }
    pub fn set_layer_color(&mut self, layer: u16, datatype: u16, color: Color) {
        if let Some(doc) = &mut self.doc {
            doc.layers.set_color(LayerId::new(layer, datatype), color);
        }
    }
    pub fn toggle_grid(&mut self) {
        self.apply(Command::ToggleGrid);
    }

    /// Capture the viewport mapping for host persistence
    pub fn viewport_state(&self) -> ViewportState {
        self.viewport.state()
    }
    pub fn set_viewport_state(&mut self, state: ViewportState) {
        self.viewport.set_state(state);
    }
    /// Capture per-layer user state for host persistence
    pub fn layer_state(&self) -> LayerState {
        match &self.doc {
            Some(doc) => {
                let mut entries: Vec<LayerStateEntry> = doc
                    .layers
                    .iter()
                    .map(|(_, l)| LayerStateEntry {
                        id: l.id,
                        visible: l.visible,
                        color: l.color,
                    })
                    .collect();
                entries.sort_by_key(|e| e.id);
                entries
            }
            None => Vec::new(),
        }
    }
    pub fn set_layer_state(&mut self, state: &LayerState) {
        if let Some(doc) = &mut self.doc {
            for entry in state {
                doc.layers.set_visible(entry.id, entry.visible);
                doc.layers.set_color(entry.id, entry.color);
            }
        }
    }
}

/// Starting depth for a fresh document: the deepest level whose expanded
/// polygon count still fits comfortably (90%) inside the budget.
fn initial_depth(doc: &Document, budget: usize, max_depth: u32) -> u32 {
    let counts = batch::polygon_counts_by_depth(doc, max_depth);
    let cap = (budget as f64 * 0.9) as usize;
    (0..=max_depth)
        .rev()
        .find(|d| counts[*d as usize] <= cap)
        .unwrap_or(0)
}

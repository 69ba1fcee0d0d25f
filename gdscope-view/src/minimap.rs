//!
//! # Minimap
//!
//! An independent low-detail renderer over the same document, drawn into a
//! fixed-size rectangle. It fits the document box with a small padding,
//! applies the Y-flip, and renders one full-depth pass with no LOD and no
//! viewport culling, skipping cells flagged as too small to matter. The
//! main viewport's world box is layered on top as a red outline, and a
//! click converts back to world coordinates for a center-on command.
//!

// Crates.io
use gdscope_model::{CellKey, Color, Document, Transform};

// Local imports
use crate::draw::DrawList;
use crate::viewport::WorldRect;

/// Fraction of the minimap left as padding around the document
const PADDING: f64 = 0.05;
const OUTLINE_COLOR: Color = Color {
    r: 0xe5,
    g: 0x39,
    b: 0x35,
};

/// Navigation callback: world coordinates of a click
pub type NavigateFn = Box<dyn FnMut(f64, f64)>;

///
/// # Minimap
///
pub struct Minimap {
    pub width: f64,
    pub height: f64,
    on_navigate: Option<NavigateFn>,
}
impl Minimap {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            on_navigate: None,
        }
    }
    /// Register the navigation callback invoked on every click
    pub fn on_navigate(&mut self, callback: NavigateFn) {
        self.on_navigate = Some(callback);
    }

    /// Pixels-per-DBU scale and world offset fitting `doc` into the map
    /// with padding. Returns `None` for an empty document.
    fn mapping(&self, doc: &Document) -> Option<MiniMapping> {
        if doc.bbox.is_empty() {
            return None;
        }
        let rect = WorldRect::from_bbox(&doc.bbox);
        let (w, h) = (rect.width().max(1.0), rect.height().max(1.0));
        let scale = ((self.width * (1.0 - 2.0 * PADDING)) / w)
            .min((self.height * (1.0 - 2.0 * PADDING)) / h);
        // Center the fitted document in the map rectangle
        let offset_x = (self.width - w * scale) / 2.0;
        let offset_y = (self.height - h * scale) / 2.0;
        Some(MiniMapping {
            scale,
            rect,
            offset_x,
            offset_y,
        })
    }

    /// Map-local screen coordinates of a world point
    fn to_screen(&self, m: &MiniMapping, x: f64, y: f64) -> [f64; 2] {
        [
            m.offset_x + (x - m.rect.min_x) * m.scale,
            // Y-flip: world up is map up
            self.height - m.offset_y - (y - m.rect.min_y) * m.scale,
        ]
    }

    /// Render the document and the main viewport outline
    pub fn render(&self, doc: &Document, main_view: &WorldRect, draw: &mut dyn DrawList) {
        let m = match self.mapping(doc) {
            Some(m) => m,
            None => return,
        };
        for top in &doc.top_cells {
            self.render_cell(doc, *top, Transform::identity(), &m, draw);
        }
        // Main viewport outline in red, clamped into the map
        let a = self.to_screen(&m, main_view.min_x, main_view.min_y);
        let b = self.to_screen(&m, main_view.max_x, main_view.max_y);
        let (min, max) = (
            [a[0].min(b[0]).max(0.0), a[1].min(b[1]).max(0.0)],
            [a[0].max(b[0]).min(self.width), a[1].max(b[1]).min(self.height)],
        );
        draw.stroke_rect(min, max, OUTLINE_COLOR, 1.0, 1.0);
    }

    /// Single full-depth pass; instances of skip-flagged cells are pruned
    fn render_cell(
        &self,
        doc: &Document,
        key: CellKey,
        world: Transform,
        m: &MiniMapping,
        draw: &mut dyn DrawList,
    ) {
        let cell = &doc.cells[key];
        if cell.skip_in_minimap {
            return;
        }
        for poly in &cell.polygons {
            let layer = match doc.layers.get(poly.layer) {
                Some(l) if l.visible => l,
                _ => continue,
            };
            let points: Vec<[f64; 2]> = poly
                .points
                .iter()
                .map(|p| {
                    let x = world.a[0][0] * p.x as f64 + world.a[0][1] * p.y as f64 + world.b[0];
                    let y = world.a[1][0] * p.x as f64 + world.a[1][1] * p.y as f64 + world.b[1];
                    self.to_screen(m, x, y)
                })
                .collect();
            draw.fill_polygon(&points, layer.color, 0.8);
        }
        for r in &cell.refs {
            let target = match r.cell {
                Some(t) => t,
                None => continue,
            };
            let rt = r.transform();
            for (dx, dy) in r.grid_offsets() {
                let child = Transform::cascade(&world, &rt.shifted(dx as f64, dy as f64));
                self.render_cell(doc, target, child, m, draw);
            }
        }
    }

    /// A click at map-local `(x, y)`: reverse-map to world coordinates,
    /// fire the navigation callback, and return the world point.
    pub fn click(&mut self, doc: &Document, x: f64, y: f64) -> Option<(f64, f64)> {
        let m = self.mapping(doc)?;
        let wx = (x - m.offset_x) / m.scale + m.rect.min_x;
        let wy = (self.height - m.offset_y - y) / m.scale + m.rect.min_y;
        if let Some(cb) = self.on_navigate.as_mut() {
            cb(wx, wy);
        }
        Some((wx, wy))
    }
}

struct MiniMapping {
    scale: f64,
    rect: WorldRect,
    offset_x: f64,
    offset_y: f64,
}

//!
//! # Geometry Model
//!
//! The in-memory library a parsed layout file becomes: cells holding
//! polygons and references to other cells, a layer table, unit metadata,
//! and the document-level bounding box. The model is read-only after load,
//! excepting per-layer visibility and color, which are user state.
//!
//! Cells reference their targets *by name*; names are resolved to stable
//! [CellKey]s in a single pass after the full parse, at which point the
//! reference graph is checked to be a DAG. Every downstream consumer
//! (spatial index, batcher, minimap) addresses geometry through those keys
//! and never through owning pointers.
//!

// Std-Lib
use std::collections::HashMap;
use std::time::Duration;

// Crates.io
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use slotmap::{new_key_type, SlotMap};

// Local imports
pub mod bbox;
pub mod builder;
pub mod dep_order;
pub mod dxf;
pub mod geom;

pub use bbox::BoundBox;
pub use builder::DocBuilder;
pub use geom::{Point, Transform};

#[cfg(test)]
mod tests;

/// Primitive coordinate type: database units (DBU), signed
pub type Int = i64;

// Key types for the slot-maps holding cells and layers
new_key_type! {
    /// Stable handle to a [Cell]
    pub struct CellKey;
    /// Stable handle to a [Layer]
    pub struct LayerKey;
}

/// [LoadError]-specialized Result type
pub type LoadResult<T> = Result<T, LoadError>;

///
/// # Load Error Enumeration
///
/// The finitely many ways a load can fail, each with enough context to
/// point at the offending record, cell, or reference chain. Fatal: a load
/// that returns any of these leaves the previously loaded document (if
/// any) untouched.
///
#[derive(Debug, Clone, PartialEq)]
pub enum LoadError {
    /// Record-layer failure (truncation, bad lengths, bad data types)
    Gds(gdscope_gds::GdsError),
    /// Geometry encountered before the UNITS record
    MissingUnits { offset: usize },
    /// A reference whose target cell does not exist
    UnresolvedReference { cell: String, target: String },
    /// A cycle in the cell-reference graph, as a name path ending where it began
    ReferenceCycle { path: Vec<String> },
    /// A record sequence the builder's state machine cannot accept
    Malformed { offset: usize, msg: String },
    /// The load was canceled at a yield point; no state was mutated
    Canceled,
}
impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            LoadError::Gds(e) => write!(f, "{}", e),
            LoadError::MissingUnits { offset } => {
                write!(f, "geometry at byte {} precedes the UNITS record", offset)
            }
            LoadError::UnresolvedReference { cell, target } => {
                write!(f, "cell {:?} references undefined cell {:?}", cell, target)
            }
            LoadError::ReferenceCycle { path } => {
                write!(f, "reference cycle: {}", path.join(" -> "))
            }
            LoadError::Malformed { offset, msg } => {
                write!(f, "malformed stream at byte {}: {}", offset, msg)
            }
            LoadError::Canceled => write!(f, "load canceled"),
        }
    }
}
impl std::error::Error for LoadError {}
impl From<gdscope_gds::GdsError> for LoadError {
    fn from(e: gdscope_gds::GdsError) -> Self {
        Self::Gds(e)
    }
}

/// # Layer Identifier
/// The (layer, datatype) pair that partitions polygons by meaning.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct LayerId {
    pub layer: u16,
    pub datatype: u16,
}
impl LayerId {
    pub fn new(layer: u16, datatype: u16) -> Self {
        Self { layer, datatype }
    }
}
impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}/{}", self.layer, self.datatype)
    }
}

/// sRGB display color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}
impl Color {
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
    /// Deterministic default color for a layer, drawn from a fixed palette
    /// cycled by layer number and nudged per datatype. Chosen to read well
    /// on the dark theme.
    pub fn default_for(id: LayerId) -> Self {
        const PALETTE: [(u8, u8, u8); 10] = [
            (0x4f, 0xc3, 0xf7), // light blue
            (0xff, 0x8a, 0x65), // orange
            (0x81, 0xc7, 0x84), // green
            (0xba, 0x68, 0xc8), // purple
            (0xff, 0xd5, 0x4f), // yellow
            (0x4d, 0xd0, 0xe1), // cyan
            (0xf0, 0x62, 0x92), // pink
            (0xa1, 0x88, 0x7f), // brown
            (0x90, 0xa4, 0xae), // gray-blue
            (0xae, 0xd5, 0x81), // light green
        ];
        let (r, g, b) = PALETTE[id.layer as usize % PALETTE.len()];
        // Shift the hue slightly for nonzero datatypes so 1/0 and 1/1 differ
        let shift = (id.datatype as u8).wrapping_mul(23);
        Self::new(r.wrapping_add(shift / 4), g, b.wrapping_sub(shift / 4))
    }
}

/// # Display Layer
/// A (layer, datatype) table entry: color, visibility, optional name.
/// Visibility and color are the only mutable state on a loaded document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub id: LayerId,
    pub name: Option<String>,
    pub color: Color,
    pub visible: bool,
}
impl Layer {
    pub fn new(id: LayerId) -> Self {
        Self {
            id,
            name: None,
            color: Color::default_for(id),
            visible: true,
        }
    }
}

/// # Layer Table
/// Keeps the document's layers, indexed both by key and by (layer, datatype).
/// Serializes as the slot-map alone; the id index is rebuilt on the way in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "SlotMap<LayerKey, Layer>", into = "SlotMap<LayerKey, Layer>")]
pub struct Layers {
    slots: SlotMap<LayerKey, Layer>,
    ids: HashMap<LayerId, LayerKey>,
}
impl From<SlotMap<LayerKey, Layer>> for Layers {
    fn from(slots: SlotMap<LayerKey, Layer>) -> Self {
        let ids = slots.iter().map(|(k, l)| (l.id, k)).collect();
        Self { slots, ids }
    }
}
impl From<Layers> for SlotMap<LayerKey, Layer> {
    fn from(layers: Layers) -> Self {
        layers.slots
    }
}
impl Layers {
    /// Get the key for `id`, creating a default-colored [Layer] if absent
    pub fn get_or_insert(&mut self, id: LayerId) -> LayerKey {
        match self.ids.get(&id) {
            Some(key) => *key,
            None => {
                let key = self.slots.insert(Layer::new(id));
                self.ids.insert(id, key);
                key
            }
        }
    }
    pub fn get(&self, key: LayerKey) -> Option<&Layer> {
        self.slots.get(key)
    }
    pub fn get_mut(&mut self, key: LayerKey) -> Option<&mut Layer> {
        self.slots.get_mut(key)
    }
    pub fn key(&self, id: LayerId) -> Option<LayerKey> {
        self.ids.get(&id).copied()
    }
    pub fn by_id(&self, id: LayerId) -> Option<&Layer> {
        self.key(id).and_then(|k| self.slots.get(k))
    }
    pub fn iter(&self) -> impl Iterator<Item = (LayerKey, &Layer)> {
        self.slots.iter()
    }
    pub fn len(&self) -> usize {
        self.slots.len()
    }
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
    pub fn set_visible(&mut self, id: LayerId, visible: bool) {
        if let Some(key) = self.key(id) {
            self.slots[key].visible = visible;
        }
    }
    pub fn set_color(&mut self, id: LayerId, color: Color) {
        if let Some(key) = self.key(id) {
            self.slots[key].color = color;
        }
    }
}

///
/// # Unit Metadata
///
/// GDSII's UNITS record stores the database unit twice: once in user units
/// and once in meters. The fields here keep the viewer-facing derivation:
/// the database unit in user units, and the user unit in meters. µm and nm
/// are display conversions on top.
///
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Units {
    /// Size of one database unit, in user units
    pub dbu_in_user: f64,
    /// Size of one user unit, in meters
    pub user_in_meters: f64,
}
impl Units {
    /// Build from the raw UNITS record pair:
    /// (dbu in user units, dbu in meters)
    pub fn from_gds(dbu_in_user: f64, dbu_in_meters: f64) -> Self {
        Self {
            dbu_in_user,
            user_in_meters: dbu_in_meters / dbu_in_user,
        }
    }
    /// Size of one database unit, in meters
    pub fn dbu_in_meters(&self) -> f64 {
        self.dbu_in_user * self.user_in_meters
    }
    /// Convert a DBU distance to micrometers
    pub fn dbu_to_um(&self, dbu: f64) -> f64 {
        dbu * self.dbu_in_meters() * 1e6
    }
}
impl Default for Units {
    /// 1 DBU = 1 nm, 1 user unit = 1 µm
    fn default() -> Self {
        Self {
            dbu_in_user: 1e-3,
            user_in_meters: 1e-6,
        }
    }
}

/// # Polygon
/// A closed sequence of three or more points on one layer, with its
/// precomputed bounding box. Points are kept in input order; closure back
/// to the first point is implied and an explicit closing duplicate has
/// already been stripped by the builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub layer: LayerKey,
    pub points: Vec<Point>,
    pub bbox: BoundBox,
}
impl Polygon {
    pub fn new(layer: LayerKey, points: Vec<Point>) -> Self {
        let bbox = BoundBox::of_points(&points);
        Self {
            layer,
            points,
            bbox,
        }
    }
}

/// Regular-grid array dimensions on a [CellRef]. Step vectors are the
/// per-column and per-row displacement; negative or skewed vectors are
/// legal and simply displace in that direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArrayDims {
    pub rows: u32,
    pub cols: u32,
    pub col_step: (Int, Int),
    pub row_step: (Int, Int),
}
impl ArrayDims {
    /// Total instance count of the expanded grid
    pub fn count(&self) -> usize {
        self.rows as usize * self.cols as usize
    }
}

///
/// # Cell Reference
///
/// An oriented, scaled, optionally reflected, optionally arrayed instance
/// of another cell. The target is stored by name to keep the model
/// serializable and cycle-free by construction; `cell` holds the key
/// resolved during post-parse validation.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellRef {
    /// Target cell name
    pub cell_name: String,
    /// Resolved target, filled after the full parse
    pub cell: Option<CellKey>,
    /// Translation, in DBU
    pub origin: Point,
    /// Rotation in degrees, counter-clockwise. Arbitrary angles are legal.
    pub angle: f64,
    /// Reflection across the X axis, applied before rotation
    pub reflect: bool,
    /// Magnification
    pub mag: f64,
    /// Array dimensions; `None` for a single instance
    pub array: Option<ArrayDims>,
    /// World bounding box of the (array-expanded) transformed target
    pub bbox: BoundBox,
}
impl CellRef {
    /// The instance transform: reflect, magnify, rotate, then translate
    pub fn transform(&self) -> Transform {
        Transform::from_reference(&self.origin, self.reflect, self.angle, self.mag)
    }
    /// Grid origin offsets of the array expansion; a single (0,0) offset
    /// when not arrayed. Yields in row-major document order.
    pub fn grid_offsets(&self) -> Vec<(Int, Int)> {
        match &self.array {
            None => vec![(0, 0)],
            Some(a) => {
                let mut offsets = Vec::with_capacity(a.count());
                for row in 0..a.rows as Int {
                    for col in 0..a.cols as Int {
                        offsets.push((
                            col * a.col_step.0 + row * a.row_step.0,
                            col * a.col_step.1 + row * a.row_step.1,
                        ));
                    }
                }
                offsets
            }
        }
    }
}

/// # Cell
/// A named container of polygons and references to other cells, with the
/// union bounding box of both.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cell {
    pub name: String,
    pub polygons: Vec<Polygon>,
    pub refs: Vec<CellRef>,
    pub bbox: BoundBox,
    /// Advisory: too small relative to the document to matter in the minimap
    pub skip_in_minimap: bool,
}
impl Cell {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bbox: BoundBox::empty(),
            ..Default::default()
        }
    }
}

/// Library-level metadata carried off the GDS header records
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMeta {
    /// Originating file name
    pub file_name: String,
    /// GDSII library name
    pub lib_name: String,
    /// GDSII format version
    pub version: i16,
    /// Last-modified timestamp from BGNLIB
    pub modified: Option<NaiveDateTime>,
    /// Last-accessed timestamp from BGNLIB
    pub accessed: Option<NaiveDateTime>,
}

///
/// # Document
///
/// Everything a loaded file becomes: the cell and layer tables, the
/// top-cell roots of the reference DAG, the overall bounding box, and unit
/// metadata. Immutable after load, except per-layer visibility and color.
///
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    /// All cells, owned exclusively here
    pub cells: SlotMap<CellKey, Cell>,
    /// Name → key lookup; names are unique within a document
    pub cell_names: HashMap<String, CellKey>,
    /// Cells in file order, for deterministic traversal
    pub cell_order: Vec<CellKey>,
    /// Layer table
    pub layers: Layers,
    /// Cells not referenced by any other cell, in file order
    pub top_cells: Vec<CellKey>,
    /// Union of all top-cell bounding boxes
    pub bbox: BoundBox,
    /// Unit metadata
    pub units: Units,
    /// Library metadata
    pub meta: DocumentMeta,
}
impl Document {
    /// Look a cell up by name
    pub fn cell(&self, name: &str) -> Option<&Cell> {
        self.cell_names.get(name).map(|k| &self.cells[*k])
    }
    /// Names of the top cells, in file order
    pub fn top_cell_names(&self) -> Vec<&str> {
        self.top_cells
            .iter()
            .map(|k| self.cells[*k].name.as_str())
            .collect()
    }
    /// Total polygon count over all cell definitions (not expanded)
    pub fn polygon_count(&self) -> usize {
        self.cells.values().map(|c| c.polygons.len()).sum()
    }
}

///
/// # Load Statistics
///
/// Returned alongside the document. Also the carrier for the non-fatal
/// warnings channel: degenerate polygons and arrays are dropped, counted,
/// and described here rather than failing the load.
///
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Statistics {
    pub file_size: usize,
    pub parse_time: Duration,
    pub cell_count: usize,
    pub polygon_count: usize,
    pub top_cells: Vec<String>,
    pub polygons_per_layer: HashMap<LayerId, usize>,
    pub bbox: BoundBox,
    pub width_um: f64,
    pub height_um: f64,
    pub degenerate_polygons: usize,
    pub unknown_records: usize,
    pub warnings: Vec<String>,
}

/// Cooperative cancellation flag, checked at every yield point. Cloned
/// handles observe the same flag, so a host can keep one side and hand the
/// other to a load.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(std::sync::Arc<std::sync::atomic::AtomicBool>);
impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn cancel(&self) {
        self.0.store(true, std::sync::atomic::Ordering::Relaxed);
    }
    pub fn is_canceled(&self) -> bool {
        self.0.load(std::sync::atomic::Ordering::Relaxed)
    }
}

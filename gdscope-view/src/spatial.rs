//!
//! # Spatial Index
//!
//! A bulk-loadable R-tree over the world-space bounding boxes of draw
//! batches and collapsed cell instances. Window queries drive culling;
//! point queries (with a tolerance) drive hit-testing. Insertion order has
//! no semantic effect, and items are never split across leaves.
//!

// Crates.io
use rstar::{RTree, RTreeObject, AABB};

// Local imports
use crate::viewport::WorldRect;

/// Stable handle into the batcher, toggling one batch's visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchHandle(pub usize);

/// What an index item stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    /// A flattened per-(instance, layer) polygon batch
    PolygonBatch,
    /// A cell instance whose subtree was cut by the depth limit
    CellInstance,
}

/// One indexed entry: a world box, a unique id, and the batcher slot the
/// item resolves to ([BatchHandle] for batches, an instance index for
/// collapsed instances).
#[derive(Debug, Clone)]
pub struct IndexItem {
    pub bbox: WorldRect,
    pub id: usize,
    pub kind: ItemKind,
    pub slot: usize,
}
impl PartialEq for IndexItem {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl RTreeObject for IndexItem {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.bbox.min_x, self.bbox.min_y],
            [self.bbox.max_x, self.bbox.max_y],
        )
    }
}

/// R-tree index over [IndexItem]s
#[derive(Debug, Default)]
pub struct SpatialIndex {
    tree: RTree<IndexItem>,
}
impl SpatialIndex {
    pub fn new() -> Self {
        Self::default()
    }
    /// Build from a full item set at once; preferred after (re)batching
    pub fn bulk_load(items: Vec<IndexItem>) -> Self {
        Self {
            tree: RTree::bulk_load(items),
        }
    }
    /// Insert one item
    pub fn insert(&mut self, item: IndexItem) {
        self.tree.insert(item);
    }
    /// Remove the item with `id`, if present
    pub fn remove(&mut self, id: usize) -> Option<IndexItem> {
        let found = self.tree.iter().find(|i| i.id == id)?.clone();
        self.tree.remove(&found)
    }
    /// Drop everything
    pub fn clear(&mut self) {
        self.tree = RTree::new();
    }
    /// Items whose box intersects `window`
    pub fn window_query(&self, window: &WorldRect) -> Vec<&IndexItem> {
        let envelope = AABB::from_corners(
            [window.min_x, window.min_y],
            [window.max_x, window.max_y],
        );
        self.tree.locate_in_envelope_intersecting(&envelope).collect()
    }
    /// Items whose box contains `(x, y)` expanded by `tolerance`
    pub fn point_query(&self, x: f64, y: f64, tolerance: f64) -> Vec<&IndexItem> {
        let envelope = AABB::from_corners(
            [x - tolerance, y - tolerance],
            [x + tolerance, y + tolerance],
        );
        self.tree.locate_in_envelope_intersecting(&envelope).collect()
    }
    pub fn len(&self) -> usize {
        self.tree.size()
    }
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

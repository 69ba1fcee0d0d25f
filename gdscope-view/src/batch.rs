//!
//! # Batcher / Scene Graph
//!
//! Flattens the cell hierarchy into draw batches: per (cell instance,
//! layer) lists of polygons in world coordinates. Traversal starts at the
//! top cells with the identity transform and recurses through references
//! with composed transforms, stopping at the current depth limit or when
//! the global polygon budget runs out, whichever comes first. Budget
//! exhaustion stops emission deterministically in document order.
//!
//! Instances cut by the depth limit are parked on a *frontier* with their
//! composed transforms, so that a later depth increase materializes only
//! the newly reachable subtrees instead of rebatching the world. Every
//! batch (and every frontier instance) lands in the spatial index.
//!

// Std-Lib
use std::collections::HashMap;

// Crates.io
use gdscope_model::{
    CancelToken, CellKey, Document, LayerId, LayerKey, LoadError, LoadResult, Transform,
};
use log::{debug, warn};

// Local imports
use crate::spatial::{IndexItem, ItemKind, SpatialIndex};
use crate::viewport::WorldRect;

/// One draw batch: all direct polygons of one cell instance on one layer,
/// flattened into world coordinates.
#[derive(Debug, Clone)]
pub struct Batch {
    pub cell: CellKey,
    pub layer: LayerKey,
    pub layer_id: LayerId,
    /// Hierarchy depth of the owning instance (top cells are depth 0)
    pub depth: u32,
    /// World-space polygons, one point list each
    pub polygons: Vec<Vec<[f64; 2]>>,
    pub bbox: WorldRect,
    /// Toggled by culling; only visible batches reach the draw list
    pub visible: bool,
}

/// A materialized cell instance: the composed transform placing one cell
/// occurrence in world space
#[derive(Debug, Clone)]
pub struct FlatInstance {
    pub cell: CellKey,
    pub world: Transform,
    pub depth: u32,
}

///
/// # Batcher
///
/// Owns the flattened batches, the expansion frontier, and the spatial
/// index built over both.
///
#[derive(Debug, Default)]
pub struct Batcher {
    pub batches: Vec<Batch>,
    pub index: SpatialIndex,
    /// Expanded instances, by increasing depth along each path
    instances: Vec<FlatInstance>,
    /// Instances cut by the depth limit, with their composed transforms
    frontier: Vec<FlatInstance>,
    /// Current depth limit
    depth_limit: u32,
    /// Global per-pass polygon budget
    budget: usize,
    /// Polygons emitted across all batches
    pub emitted_polygons: usize,
    /// Whether emission stopped on the budget
    pub exhausted: bool,
}

impl Batcher {
    /// Flatten `doc` to `depth_limit` under `budget`
    pub fn build(doc: &Document, depth_limit: u32, budget: usize) -> Self {
        let mut noop = |_: u8, _: &str| {};
        // Infallible without a live cancel token
        Self::build_with(doc, depth_limit, budget, &mut noop, &CancelToken::new()).unwrap()
    }

    /// Flatten with progress reporting and cancellation, yielding once per
    /// top cell
    pub fn build_with(
        doc: &Document,
        depth_limit: u32,
        budget: usize,
        progress: &mut dyn FnMut(u8, &str),
        cancel: &CancelToken,
    ) -> LoadResult<Self> {
        let mut b = Self {
            depth_limit,
            budget,
            ..Self::default()
        };
        let tops = doc.top_cells.len().max(1);
        for (i, top) in doc.top_cells.iter().enumerate() {
            b.expand(doc, *top, Transform::identity(), 0);
            progress(
                ((i + 1) * 100 / tops) as u8,
                "Building display batches",
            );
            if cancel.is_canceled() {
                return Err(LoadError::Canceled);
            }
            if b.exhausted {
                break;
            }
        }
        if b.exhausted {
            warn!(
                "polygon budget of {} exhausted; render is partial",
                budget
            );
        }
        b.rebuild_index(doc);
        debug!(
            "batched {} polygons into {} batches at depth {}",
            b.emitted_polygons,
            b.batches.len(),
            depth_limit
        );
        Ok(b)
    }

    /// Current depth limit
    pub fn depth(&self) -> u32 {
        self.depth_limit
    }
    /// Configured polygon budget
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Expand one instance of `cell_key`: emit its direct polygons as
    /// per-layer batches, then recurse into its references.
    fn expand(&mut self, doc: &Document, cell_key: CellKey, world: Transform, depth: u32) {
        if self.exhausted {
            return;
        }
        self.instances.push(FlatInstance {
            cell: cell_key,
            world,
            depth,
        });
        let cell = &doc.cells[cell_key];

        // One batch per layer for this instance's own polygons, created in
        // first-seen order
        let mut layer_batches: HashMap<LayerKey, usize> = HashMap::new();
        for poly in &cell.polygons {
            if self.emitted_polygons >= self.budget {
                self.exhausted = true;
                return;
            }
            let slot = *layer_batches.entry(poly.layer).or_insert_with(|| {
                self.batches.push(Batch {
                    cell: cell_key,
                    layer: poly.layer,
                    layer_id: doc.layers.get(poly.layer).map(|l| l.id).unwrap_or_default(),
                    depth,
                    polygons: Vec::new(),
                    bbox: WorldRect::new(f64::MAX, f64::MAX, f64::MIN, f64::MIN),
                    visible: true,
                });
                self.batches.len() - 1
            });
            let batch = &mut self.batches[slot];
            let mut points = Vec::with_capacity(poly.points.len());
            for pt in &poly.points {
                let x = world.a[0][0] * pt.x as f64 + world.a[0][1] * pt.y as f64 + world.b[0];
                let y = world.a[1][0] * pt.x as f64 + world.a[1][1] * pt.y as f64 + world.b[1];
                batch.bbox.min_x = batch.bbox.min_x.min(x);
                batch.bbox.min_y = batch.bbox.min_y.min(y);
                batch.bbox.max_x = batch.bbox.max_x.max(x);
                batch.bbox.max_y = batch.bbox.max_y.max(y);
                points.push([x, y]);
            }
            batch.polygons.push(points);
            self.emitted_polygons += 1;
        }

        // References, array-expanded, in document order
        for r in &cell.refs {
            if self.exhausted {
                return;
            }
            let target = match r.cell {
                Some(t) => t,
                None => continue,
            };
            let rt = r.transform();
            for (dx, dy) in r.grid_offsets() {
                if self.exhausted {
                    return;
                }
                let child = Transform::cascade(&world, &rt.shifted(dx as f64, dy as f64));
                if depth + 1 > self.depth_limit {
                    self.frontier.push(FlatInstance {
                        cell: target,
                        world: child,
                        depth: depth + 1,
                    });
                } else {
                    self.expand(doc, target, child, depth + 1);
                }
            }
        }
    }

    /// Rebuild the index over the current batches and frontier
    fn rebuild_index(&mut self, doc: &Document) {
        let mut items = Vec::with_capacity(self.batches.len() + self.frontier.len());
        for (slot, batch) in self.batches.iter().enumerate() {
            if batch.polygons.is_empty() {
                continue;
            }
            items.push(IndexItem {
                bbox: batch.bbox,
                id: items.len(),
                kind: ItemKind::PolygonBatch,
                slot,
            });
        }
        for (slot, inst) in self.frontier.iter().enumerate() {
            items.push(IndexItem {
                bbox: frontier_bbox(doc, inst),
                id: items.len(),
                kind: ItemKind::CellInstance,
                slot,
            });
        }
        self.index = SpatialIndex::bulk_load(items);
    }

    /// Move to a new depth limit, reusing what survives.
    ///
    /// Deepening drains the frontier, expanding only the newly reachable
    /// subtrees; shallowing discards out-of-depth batches and re-cuts the
    /// frontier at the new limit. A previously budget-exhausted pass left
    /// no trustworthy frontier, so that case rebuilds from scratch.
    pub fn set_depth(&mut self, doc: &Document, new_depth: u32) {
        if new_depth == self.depth_limit {
            return;
        }
        if self.exhausted {
            *self = Self::build(doc, new_depth, self.budget);
            return;
        }
        if new_depth > self.depth_limit {
            self.depth_limit = new_depth;
            let parked = std::mem::take(&mut self.frontier);
            for f in parked {
                if f.depth <= new_depth {
                    self.expand(doc, f.cell, f.world, f.depth);
                } else {
                    self.frontier.push(f);
                }
                if self.exhausted {
                    break;
                }
            }
        } else {
            self.depth_limit = new_depth;
            self.batches.retain(|b| b.depth <= new_depth);
            self.frontier.retain(|f| f.depth > new_depth);
            // Children of instances now sitting at the cut become frontier
            let cut: Vec<FlatInstance> = self
                .instances
                .iter()
                .filter(|i| i.depth == new_depth)
                .cloned()
                .collect();
            self.instances.retain(|i| i.depth <= new_depth);
            for inst in cut {
                for r in &doc.cells[inst.cell].refs {
                    let target = match r.cell {
                        Some(t) => t,
                        None => continue,
                    };
                    let rt = r.transform();
                    for (dx, dy) in r.grid_offsets() {
                        self.frontier.push(FlatInstance {
                            cell: target,
                            world: Transform::cascade(&inst.world, &rt.shifted(dx as f64, dy as f64)),
                            depth: new_depth + 1,
                        });
                    }
                }
            }
            self.emitted_polygons = self.batches.iter().map(|b| b.polygons.len()).sum();
        }
        self.rebuild_index(doc);
    }

    /// Set every batch's visibility; culling then re-enables the window
    /// hits
    pub fn set_all_visible(&mut self, visible: bool) {
        for b in &mut self.batches {
            b.visible = visible;
        }
    }

    /// Polygons in currently visible batches, counting only layers the
    /// `visible_layer` predicate admits
    pub fn visible_polygons(&self, visible_layer: impl Fn(LayerId) -> bool) -> usize {
        self.batches
            .iter()
            .filter(|b| b.visible && visible_layer(b.layer_id))
            .map(|b| b.polygons.len())
            .sum()
    }
}

/// Document-wide expanded polygon counts for each depth `0..=max_depth`,
/// without materializing batches. Drives the initial LOD choice.
pub fn polygon_counts_by_depth(doc: &Document, max_depth: u32) -> Vec<usize> {
    let mut memo: HashMap<(CellKey, u32), usize> = HashMap::new();
    (0..=max_depth)
        .map(|d| {
            doc.top_cells
                .iter()
                .map(|top| cell_count(doc, *top, d, &mut memo))
                .fold(0usize, usize::saturating_add)
        })
        .collect()
}

fn cell_count(
    doc: &Document,
    key: CellKey,
    depth: u32,
    memo: &mut HashMap<(CellKey, u32), usize>,
) -> usize {
    if let Some(n) = memo.get(&(key, depth)) {
        return *n;
    }
    let cell = &doc.cells[key];
    let mut count = cell.polygons.len();
    if depth > 0 {
        for r in &cell.refs {
            if let Some(target) = r.cell {
                let per = cell_count(doc, target, depth - 1, memo);
                let copies = r.array.map(|a| a.count()).unwrap_or(1);
                count = count.saturating_add(per.saturating_mul(copies));
            }
        }
    }
    memo.insert((key, depth), count);
    count
}

/// World box of a frontier instance: the target cell's box put through
/// the instance's composed transform
pub fn frontier_bbox(doc: &Document, inst: &FlatInstance) -> WorldRect {
    let cell_bbox = doc.cells[inst.cell].bbox;
    if cell_bbox.is_empty() {
        return WorldRect::new(inst.world.b[0], inst.world.b[1], inst.world.b[0], inst.world.b[1]);
    }
    let corners = [
        (cell_bbox.p0.x as f64, cell_bbox.p0.y as f64),
        (cell_bbox.p1.x as f64, cell_bbox.p0.y as f64),
        (cell_bbox.p1.x as f64, cell_bbox.p1.y as f64),
        (cell_bbox.p0.x as f64, cell_bbox.p1.y as f64),
    ];
    let mut rect = WorldRect::new(f64::MAX, f64::MAX, f64::MIN, f64::MIN);
    for (x, y) in corners {
        let wx = inst.world.a[0][0] * x + inst.world.a[0][1] * y + inst.world.b[0];
        let wy = inst.world.a[1][0] * x + inst.world.a[1][1] * y + inst.world.b[1];
        rect.min_x = rect.min_x.min(wx);
        rect.min_y = rect.min_y.min(wy);
        rect.max_x = rect.max_x.max(wx);
        rect.max_y = rect.max_y.max(wy);
    }
    rect
}

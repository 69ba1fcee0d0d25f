//!
//! # Document Builder
//!
//! Folds the GDSII record stream into a [Document]. A small pushdown state
//! machine rides the builder's call stack:
//!
//! * `TopLevel` — before HEADER
//! * `InLibrary` — between HEADER and ENDLIB; collects UNITS and metadata
//! * `InCell` — between BGNSTR/STRNAME and ENDSTR
//! * `InBoundary` / `InPath` / `InBox` / `InSref` / `InAref` — one element
//!
//! Geometry decode is single-pass; everything hierarchical happens after
//! ENDLIB: reference names resolve to keys, the reference graph is checked
//! to be a DAG, and cell bounding boxes fold bottom-up in dependency
//! order. Progress is reported as a monotonic 0–100 value tied to bytes
//! consumed, and cancellation is honored at the same yield points.
//!

// Std-Lib
use std::collections::HashSet;
use std::time::Instant;

// Crates.io
use chrono::NaiveDate;
use gdscope_gds::{GdsRecord, RecordReader};
use log::{debug, warn};

// Local imports
use crate::dep_order::order_cells;
use crate::geom::Point;
use crate::{
    ArrayDims, BoundBox, CancelToken, Cell, CellKey, CellRef, Document, Int, LayerId, LoadError,
    LoadResult, Polygon, Statistics, Units,
};

/// Records between progress / cancellation checks
const YIELD_EVERY_RECORDS: usize = 10_000;

/// Parse-time context, pushed and popped around each nested state for
/// error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuilderCtx {
    Library,
    Cell,
    Boundary,
    Path,
    Box,
    Sref,
    Aref,
}

///
/// # Document Builder
///
/// One-shot: construct via [DocBuilder::parse] or [DocBuilder::parse_with].
///
pub struct DocBuilder<'b, 'p> {
    reader: RecordReader<'b>,
    doc: Document,
    stats: Statistics,
    ctx_stack: Vec<BuilderCtx>,
    progress: &'p mut dyn FnMut(u8, &str),
    cancel: &'p CancelToken,
    records_read: usize,
    last_progress: u8,
    units_present: bool,
}

impl<'b> DocBuilder<'b, '_> {
    /// Parse `bytes` into a document, with no progress reporting
    pub fn parse(bytes: &'b [u8], file_name: &str) -> LoadResult<(Document, Statistics)> {
        let mut noop = |_: u8, _: &str| {};
        let cancel = CancelToken::new();
        DocBuilder::parse_with(bytes, file_name, &mut noop, &cancel)
    }
}

impl<'b, 'p> DocBuilder<'b, 'p> {
    /// Parse `bytes` into a document. `progress` is invoked with a
    /// monotonic 0–100 value at every yield point; `cancel` is observed at
    /// the same points, aborting with [LoadError::Canceled] and dropping
    /// all partial state.
    pub fn parse_with(
        bytes: &'b [u8],
        file_name: &str,
        progress: &'p mut dyn FnMut(u8, &str),
        cancel: &'p CancelToken,
    ) -> LoadResult<(Document, Statistics)> {
        let started = Instant::now();
        let mut builder = Self {
            reader: RecordReader::new(bytes),
            doc: Document::default(),
            stats: Statistics::default(),
            ctx_stack: Vec::new(),
            progress,
            cancel,
            records_read: 0,
            last_progress: 0,
            units_present: false,
        };
        builder.doc.meta.file_name = file_name.to_string();
        builder.stats.file_size = bytes.len();
        builder.parse_library()?;
        builder.finish()?;

        let Self {
            doc, mut stats, ..
        } = builder;
        stats.parse_time = started.elapsed();
        debug!(
            "loaded {:?}: {} cells, {} polygons in {:?}",
            file_name, stats.cell_count, stats.polygon_count, stats.parse_time
        );
        Ok((doc, stats))
    }

    /// Advance the record stream, servicing progress and cancellation
    fn next(&mut self) -> LoadResult<GdsRecord> {
        let record = self
            .reader
            .next_record()?
            .ok_or(gdscope_gds::GdsError::TruncatedFile {
                offset: self.reader.pos(),
            })?;
        self.records_read += 1;
        if self.records_read % YIELD_EVERY_RECORDS == 0 {
            self.report_progress("Parsing records");
            if self.cancel.is_canceled() {
                return Err(LoadError::Canceled);
            }
        }
        Ok(record)
    }

    /// Emit the byte-consumption progress fraction, never regressing
    fn report_progress(&mut self, msg: &str) {
        let len = self.reader.len().max(1);
        let pct = ((self.reader.pos() * 100) / len).min(100) as u8;
        if pct > self.last_progress {
            self.last_progress = pct;
            (self.progress)(pct, msg);
        }
    }

    /// `TopLevel` + `InLibrary` states: HEADER through ENDLIB
    fn parse_library(&mut self) -> LoadResult<()> {
        self.ctx_stack.push(BuilderCtx::Library);
        // TopLevel accepts exactly one record: HEADER
        match self.next()? {
            GdsRecord::Header { version } => self.doc.meta.version = version,
            _ => return self.fail("expected HEADER as the first record"),
        }
        loop {
            match self.next()? {
                GdsRecord::EndLib => break,
                GdsRecord::BgnLib { dates } => self.store_dates(&dates),
                GdsRecord::LibName(name) => self.doc.meta.lib_name = name,
                GdsRecord::Units(dbu_in_user, dbu_in_meters) => {
                    self.doc.units = Units::from_gds(dbu_in_user, dbu_in_meters);
                    self.units_present = true;
                }
                GdsRecord::BgnStruct { .. } => self.parse_cell()?,
                GdsRecord::Unknown { rtype } => self.count_unknown(rtype),
                r => {
                    return self.fail(format!("unexpected record {:?} at library level", r));
                }
            }
        }
        self.ctx_stack.pop();
        Ok(())
    }

    /// `InCell` state: STRNAME through ENDSTR
    fn parse_cell(&mut self) -> LoadResult<()> {
        self.ctx_stack.push(BuilderCtx::Cell);
        let name = match self.next()? {
            GdsRecord::StructName(name) => name,
            _ => return self.fail("cell without a STRNAME record"),
        };
        if self.doc.cell_names.contains_key(&name) {
            return self.fail(format!("duplicate cell name {:?}", name));
        }
        let mut cell = Cell::new(name);
        loop {
            match self.next()? {
                GdsRecord::EndStruct => break,
                GdsRecord::Boundary => {
                    if let Some(poly) = self.parse_boundary(&cell.name)? {
                        cell.polygons.push(poly);
                    }
                }
                GdsRecord::Path => cell.polygons.extend(self.parse_path(&cell.name)?),
                GdsRecord::Box => {
                    if let Some(poly) = self.parse_box(&cell.name)? {
                        cell.polygons.push(poly);
                    }
                }
                GdsRecord::StructRef => {
                    cell.refs.push(self.parse_reference()?);
                }
                GdsRecord::ArrayRef => {
                    if let Some(r) = self.parse_array_reference()? {
                        cell.refs.push(r);
                    }
                }
                // Text and node elements carry no fill geometry; skip them
                GdsRecord::Text | GdsRecord::Node => self.skip_element()?,
                GdsRecord::Unknown { rtype } => self.count_unknown(rtype),
                r => return self.fail(format!("unexpected record {:?} in cell", r)),
            }
        }
        let key = self.doc.cells.insert(cell);
        let name = self.doc.cells[key].name.clone();
        self.doc.cell_names.insert(name, key);
        self.doc.cell_order.push(key);
        self.ctx_stack.pop();
        Ok(())
    }

    /// `InBoundary` state. Returns `None` for degenerate polygons, which
    /// are dropped with a warning.
    fn parse_boundary(&mut self, cell_name: &str) -> LoadResult<Option<Polygon>> {
        self.ctx_stack.push(BuilderCtx::Boundary);
        self.require_units()?;
        let (mut layer, mut datatype) = (0i16, 0i16);
        let mut xy: Vec<i32> = Vec::new();
        loop {
            match self.next()? {
                GdsRecord::EndElement => break,
                GdsRecord::Layer(d) => layer = d,
                GdsRecord::DataType(d) => datatype = d,
                GdsRecord::Xy(d) => xy = d,
                GdsRecord::Unknown { rtype } => self.count_unknown(rtype),
                // Plex, elflags, properties: legal, irrelevant here
                GdsRecord::Plex(_) | GdsRecord::PropAttr(_) | GdsRecord::PropValue(_) => (),
                r => return self.fail(format!("unexpected record {:?} in boundary", r)),
            }
        }
        self.ctx_stack.pop();
        let points = match self.decode_points(&xy)? {
            Some(points) => points,
            None => {
                self.drop_degenerate(cell_name, xy.len() / 2);
                return Ok(None);
            }
        };
        Ok(Some(self.make_polygon(layer, datatype, points)))
    }

    /// `InPath` state. A path is widened into one rectangle polygon per
    /// Manhattan segment; non-Manhattan segments are skipped with a
    /// warning.
    fn parse_path(&mut self, cell_name: &str) -> LoadResult<Vec<Polygon>> {
        self.ctx_stack.push(BuilderCtx::Path);
        self.require_units()?;
        let (mut layer, mut datatype) = (0i16, 0i16);
        let mut width: Option<i32> = None;
        let mut xy: Vec<i32> = Vec::new();
        loop {
            match self.next()? {
                GdsRecord::EndElement => break,
                GdsRecord::Layer(d) => layer = d,
                GdsRecord::DataType(d) => datatype = d,
                GdsRecord::Width(d) => width = Some(d),
                GdsRecord::Xy(d) => xy = d,
                GdsRecord::PathType(_) | GdsRecord::BeginExtn(_) | GdsRecord::EndExtn(_) => (),
                GdsRecord::Plex(_) | GdsRecord::PropAttr(_) | GdsRecord::PropValue(_) => (),
                GdsRecord::Unknown { rtype } => self.count_unknown(rtype),
                r => return self.fail(format!("unexpected record {:?} in path", r)),
            }
        }
        self.ctx_stack.pop();
        let half = match width {
            Some(w) if w > 0 => Int::from(w) / 2,
            _ => {
                self.stats
                    .warnings
                    .push(format!("zero-width path in cell {:?} skipped", cell_name));
                return Ok(Vec::new());
            }
        };
        let pts: Vec<Point> = xy
            .chunks_exact(2)
            .map(|c| Point::new(Int::from(c[0]), Int::from(c[1])))
            .collect();
        let mut polys = Vec::new();
        for seg in pts.windows(2) {
            let (a, b) = (seg[0], seg[1]);
            let rect = if a.x == b.x {
                BoundBox::from_corners(
                    Point::new(a.x - half, a.y.min(b.y)),
                    Point::new(a.x + half, a.y.max(b.y)),
                )
            } else if a.y == b.y {
                BoundBox::from_corners(
                    Point::new(a.x.min(b.x), a.y - half),
                    Point::new(a.x.max(b.x), a.y + half),
                )
            } else {
                self.stats.warnings.push(format!(
                    "non-Manhattan path segment in cell {:?} skipped",
                    cell_name
                ));
                continue;
            };
            let corners = vec![
                rect.p0,
                Point::new(rect.p1.x, rect.p0.y),
                rect.p1,
                Point::new(rect.p0.x, rect.p1.y),
            ];
            polys.push(self.make_polygon(layer, datatype, corners));
        }
        Ok(polys)
    }

    /// `InBox` state. GDS boxes carry five points (closed rectangle); the
    /// first four become a polygon.
    fn parse_box(&mut self, cell_name: &str) -> LoadResult<Option<Polygon>> {
        self.ctx_stack.push(BuilderCtx::Box);
        self.require_units()?;
        let (mut layer, mut boxtype) = (0i16, 0i16);
        let mut xy: Vec<i32> = Vec::new();
        loop {
            match self.next()? {
                GdsRecord::EndElement => break,
                GdsRecord::Layer(d) => layer = d,
                GdsRecord::BoxType(d) => boxtype = d,
                GdsRecord::Xy(d) => xy = d,
                GdsRecord::Plex(_) | GdsRecord::PropAttr(_) | GdsRecord::PropValue(_) => (),
                GdsRecord::Unknown { rtype } => self.count_unknown(rtype),
                r => return self.fail(format!("unexpected record {:?} in box", r)),
            }
        }
        self.ctx_stack.pop();
        let points = match self.decode_points(&xy)? {
            Some(points) => points,
            None => {
                self.drop_degenerate(cell_name, xy.len() / 2);
                return Ok(None);
            }
        };
        Ok(Some(self.make_polygon(layer, boxtype, points)))
    }

    /// `InSref` state
    fn parse_reference(&mut self) -> LoadResult<CellRef> {
        self.ctx_stack.push(BuilderCtx::Sref);
        let mut r = self.collect_reference()?;
        self.ctx_stack.pop();
        if r.xy.len() != 2 {
            return self.fail("SREF requires exactly one XY coordinate pair");
        }
        let origin = Point::new(Int::from(r.xy[0]), Int::from(r.xy[1]));
        Ok(CellRef {
            cell_name: std::mem::take(&mut r.name),
            cell: None,
            origin,
            angle: r.angle,
            reflect: r.reflect,
            mag: r.mag,
            array: None,
            bbox: BoundBox::empty(),
        })
    }

    /// `InAref` state. Returns `None` when the array is degenerate
    /// (zero rows or columns), which is dropped with a warning.
    fn parse_array_reference(&mut self) -> LoadResult<Option<CellRef>> {
        self.ctx_stack.push(BuilderCtx::Aref);
        let mut r = self.collect_reference()?;
        self.ctx_stack.pop();
        if r.xy.len() != 6 {
            return self.fail("AREF requires exactly three XY coordinate pairs");
        }
        let (cols, rows) = match r.colrow {
            Some(cr) => cr,
            None => return self.fail("AREF without a COLROW record"),
        };
        if cols <= 0 || rows <= 0 {
            self.stats.warnings.push(format!(
                "array of {:?} with {}x{} elements omitted",
                r.name, rows, cols
            ));
            return Ok(None);
        }
        let origin = Point::new(Int::from(r.xy[0]), Int::from(r.xy[1]));
        // The second and third points sit a full row/column span away from
        // the origin; their differences give the per-step vectors.
        let col_span = (Int::from(r.xy[2]) - origin.x, Int::from(r.xy[3]) - origin.y);
        let row_span = (Int::from(r.xy[4]) - origin.x, Int::from(r.xy[5]) - origin.y);
        let col_step = (col_span.0 / Int::from(cols), col_span.1 / Int::from(cols));
        let row_step = (row_span.0 / Int::from(rows), row_span.1 / Int::from(rows));
        if (col_step.0 < 0 && col_step.1 == 0) || (row_step.1 < 0 && row_step.0 == 0) {
            self.stats.warnings.push(format!(
                "array of {:?} runs in a reversed direction",
                r.name
            ));
        }
        // A 1x1 array is just a single reference
        let array = if cols == 1 && rows == 1 {
            None
        } else {
            Some(ArrayDims {
                rows: rows as u32,
                cols: cols as u32,
                col_step,
                row_step,
            })
        };
        Ok(Some(CellRef {
            cell_name: std::mem::take(&mut r.name),
            cell: None,
            origin,
            angle: r.angle,
            reflect: r.reflect,
            mag: r.mag,
            array,
            bbox: BoundBox::empty(),
        }))
    }

    /// Shared record collection for SREF and AREF bodies
    fn collect_reference(&mut self) -> LoadResult<RawReference> {
        let mut r = RawReference::default();
        loop {
            match self.next()? {
                GdsRecord::EndElement => break,
                GdsRecord::StructRefName(name) => r.name = name,
                GdsRecord::Strans(d0, _d1) => r.reflect = d0 & 0x80 != 0,
                GdsRecord::Mag(m) => r.mag = m,
                GdsRecord::Angle(a) => r.angle = a,
                GdsRecord::ColRow { cols, rows } => r.colrow = Some((cols, rows)),
                GdsRecord::Xy(d) => r.xy = d,
                GdsRecord::Plex(_) | GdsRecord::PropAttr(_) | GdsRecord::PropValue(_) => (),
                GdsRecord::Unknown { rtype } => self.count_unknown(rtype),
                rec => return self.fail(format!("unexpected record {:?} in reference", rec)),
            }
        }
        Ok(r)
    }

    /// Consume an element the viewer does not render (TEXT, NODE)
    fn skip_element(&mut self) -> LoadResult<()> {
        loop {
            match self.next()? {
                GdsRecord::EndElement => return Ok(()),
                GdsRecord::Unknown { rtype } => self.count_unknown(rtype),
                _ => (),
            }
        }
    }

    /// Decode an XY payload into points, stripping the explicit closing
    /// duplicate. Returns `None` when fewer than three distinct points
    /// remain.
    fn decode_points(&mut self, xy: &[i32]) -> LoadResult<Option<Vec<Point>>> {
        if xy.len() % 2 != 0 {
            return self.fail("XY record with an odd number of coordinates");
        }
        let mut points: Vec<Point> = xy
            .chunks_exact(2)
            .map(|c| Point::new(Int::from(c[0]), Int::from(c[1])))
            .collect();
        if points.len() > 1 && points.first() == points.last() {
            points.pop();
        }
        let distinct: HashSet<Point> = points.iter().copied().collect();
        if distinct.len() < 3 {
            return Ok(None);
        }
        Ok(Some(points))
    }

    /// Intern the layer and build the polygon, keeping statistics current
    fn make_polygon(&mut self, layer: i16, datatype: i16, points: Vec<Point>) -> Polygon {
        let id = LayerId::new(layer as u16, datatype as u16);
        let key = self.doc.layers.get_or_insert(id);
        *self.stats.polygons_per_layer.entry(id).or_insert(0) += 1;
        self.stats.polygon_count += 1;
        Polygon::new(key, points)
    }

    /// Record a dropped degenerate polygon
    fn drop_degenerate(&mut self, cell_name: &str, npoints: usize) {
        self.stats.degenerate_polygons += 1;
        warn!(
            "dropping degenerate {}-point polygon in cell {:?}",
            npoints, cell_name
        );
        self.stats.warnings.push(format!(
            "degenerate {}-point polygon in cell {:?} dropped",
            npoints, cell_name
        ));
    }

    /// Count a skipped unknown record
    fn count_unknown(&mut self, rtype: u8) {
        self.stats.unknown_records += 1;
        if self.stats.unknown_records == 1 {
            self.stats
                .warnings
                .push(format!("unknown record type 0x{:02x} skipped", rtype));
        }
    }

    /// Fail unless UNITS has been seen before this geometry
    fn require_units(&mut self) -> LoadResult<()> {
        if !self.units_present {
            return Err(LoadError::MissingUnits {
                offset: self.reader.pos(),
            });
        }
        Ok(())
    }

    /// BGNLIB carries two (year, month, day, hour, minute, second)
    /// sextets: last-modified and last-accessed
    fn store_dates(&mut self, dates: &[i16]) {
        if dates.len() != 12 {
            return;
        }
        let parse = |d: &[i16]| {
            NaiveDate::from_ymd_opt(d[0] as i32, d[1] as u32, d[2] as u32)
                .and_then(|date| date.and_hms_opt(d[3] as u32, d[4] as u32, d[5] as u32))
        };
        self.doc.meta.modified = parse(&dates[0..6]);
        self.doc.meta.accessed = parse(&dates[6..12]);
    }

    /// Post-parse pass: resolve references, reject cycles, fold bounding
    /// boxes bottom-up, and derive top cells and statistics.
    fn finish(&mut self) -> LoadResult<()> {
        // Resolve reference targets by name
        let keys: Vec<CellKey> = self.doc.cell_order.clone();
        for key in &keys {
            let cell_name = self.doc.cells[*key].name.clone();
            for i in 0..self.doc.cells[*key].refs.len() {
                let target_name = self.doc.cells[*key].refs[i].cell_name.clone();
                match self.doc.cell_names.get(&target_name) {
                    Some(target) => self.doc.cells[*key].refs[i].cell = Some(*target),
                    None => {
                        return Err(LoadError::UnresolvedReference {
                            cell: cell_name,
                            target: target_name,
                        })
                    }
                }
            }
        }
        // Topological ordering doubles as the cycle check
        let order = order_cells(&self.doc.cells, &keys)
            .map_err(|path| LoadError::ReferenceCycle { path })?;

        // Fold bounding boxes bottom-up; every target precedes its referents
        for key in &order {
            let mut bbox = BoundBox::empty();
            for poly in &self.doc.cells[*key].polygons {
                bbox = bbox.union(&poly.bbox);
            }
            for i in 0..self.doc.cells[*key].refs.len() {
                let r = &self.doc.cells[*key].refs[i];
                let target_bbox = self.doc.cells[r.cell.unwrap()].bbox;
                let rbox = reference_bbox(r, &target_bbox);
                self.doc.cells[*key].refs[i].bbox = rbox;
                bbox = bbox.union(&rbox);
            }
            self.doc.cells[*key].bbox = bbox;
            if self.cancel.is_canceled() {
                return Err(LoadError::Canceled);
            }
        }

        // Top cells: those never referenced, in file order
        let referenced: HashSet<CellKey> = self
            .doc
            .cells
            .values()
            .flat_map(|c| c.refs.iter().filter_map(|r| r.cell))
            .collect();
        self.doc.top_cells = self
            .doc
            .cell_order
            .iter()
            .copied()
            .filter(|k| !referenced.contains(k))
            .collect();

        // Document box: union of top-cell boxes
        let mut doc_bbox = BoundBox::empty();
        for key in &self.doc.top_cells {
            doc_bbox = doc_bbox.union(&self.doc.cells[*key].bbox);
        }
        self.doc.bbox = doc_bbox;

        // Flag cells too small to matter in the minimap: under 1% of the
        // document's largest extent
        let (dw, dh) = doc_bbox.size();
        let extent = dw.max(dh).max(0) as f64;
        for cell in self.doc.cells.values_mut() {
            let (cw, ch) = cell.bbox.size();
            cell.skip_in_minimap =
                cell.bbox.is_empty() || (cw.max(ch) as f64) < 0.01 * extent;
        }

        // Final statistics
        self.stats.cell_count = self.doc.cells.len();
        self.stats.top_cells = self
            .doc
            .top_cells
            .iter()
            .map(|k| self.doc.cells[*k].name.clone())
            .collect();
        self.stats.bbox = self.doc.bbox;
        if !doc_bbox.is_empty() {
            self.stats.width_um = self.doc.units.dbu_to_um(dw as f64);
            self.stats.height_um = self.doc.units.dbu_to_um(dh as f64);
        }
        if self.last_progress < 100 {
            self.last_progress = 100;
            (self.progress)(100, "Load complete");
        }
        Ok(())
    }

    /// Error helper: a malformed-stream failure at the current offset
    fn fail<T>(&mut self, msg: impl Into<String>) -> LoadResult<T> {
        Err(LoadError::Malformed {
            offset: self.reader.pos(),
            msg: format!("{} (in {:?})", msg.into(), self.ctx_stack),
        })
    }
}

/// World bounding box of a (possibly arrayed) reference to a target with
/// box `target_bbox`. Array expansion unions the four extreme grid
/// offsets; translation being linear, interior instances add nothing.
pub fn reference_bbox(r: &CellRef, target_bbox: &BoundBox) -> BoundBox {
    if target_bbox.is_empty() {
        return BoundBox::empty();
    }
    let single = target_bbox.transform(&r.transform());
    match &r.array {
        None => single,
        Some(a) => {
            let cs = (
                (a.cols as Int - 1) * a.col_step.0,
                (a.cols as Int - 1) * a.col_step.1,
            );
            let rs = (
                (a.rows as Int - 1) * a.row_step.0,
                (a.rows as Int - 1) * a.row_step.1,
            );
            single
                .union(&single.shift(cs.0, cs.1))
                .union(&single.shift(rs.0, rs.1))
                .union(&single.shift(cs.0 + rs.0, cs.1 + rs.1))
        }
    }
}

/// Record fields accumulated while inside a reference element.
/// MAG absent means 1.0; ANGLE absent means 0°; STRANS absent, no
/// reflection.
struct RawReference {
    name: String,
    reflect: bool,
    mag: f64,
    angle: f64,
    colrow: Option<(i16, i16)>,
    xy: Vec<i32>,
}
impl Default for RawReference {
    fn default() -> Self {
        Self {
            name: String::new(),
            reflect: false,
            mag: 1.0,
            angle: 0.0,
            colrow: None,
            xy: Vec::new(),
        }
    }
}

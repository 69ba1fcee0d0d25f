//!
//! # DXF Import
//!
//! A thin converter from DXF text to the same in-memory [Document] the
//! GDSII builder produces. DXF stores entities as (group code, value)
//! line pairs; the reader walks those pairs, collects the ENTITIES
//! section, and turns each supported entity into polygons:
//!
//! * `LWPOLYLINE` / `POLYLINE`+`VERTEX` — one polygon from the vertex list
//! * `CIRCLE` — approximated by a 32-gon
//! * `ARC` — 16 line segments closed back through the center
//! * `SOLID` / `3DFACE` — a polygon from the corner list
//! * `LINE` — no fillable area; skipped and counted
//!
//! Each DXF layer name maps to a distinct `(layer, 0)` identifier, with a
//! deterministic color derived from the name's hash. Default units:
//! 1 DBU = 1 nm, 1 user unit = 1 mm.
//!

// Std-Lib
use std::collections::HashMap;
use std::time::Instant;

// Crates.io
use log::debug;

// Local imports
use crate::geom::Point;
use crate::{
    BoundBox, Cell, Color, Document, Int, LayerId, LoadError, LoadResult, Polygon, Statistics,
    Units,
};

/// DXF coordinates are user units (millimeters); the model wants
/// nanometer DBUs.
const DBU_PER_MM: f64 = 1e6;

/// Import DXF text into a document. The single cell produced is the top
/// cell, named for the source file.
pub fn import(text: &str, file_name: &str) -> LoadResult<(Document, Statistics)> {
    let started = Instant::now();
    let mut importer = DxfImporter {
        reader: PairReader::new(text),
        doc: Document::default(),
        stats: Statistics::default(),
        layer_numbers: HashMap::new(),
    };
    importer.doc.meta.file_name = file_name.to_string();
    importer.doc.meta.lib_name = cell_name_for(file_name);
    importer.doc.units = Units {
        dbu_in_user: 1e-6,
        user_in_meters: 1e-3,
    };
    importer.stats.file_size = text.len();
    let (doc, mut stats) = importer.run(file_name)?;
    stats.parse_time = started.elapsed();
    debug!(
        "imported DXF {:?}: {} polygons in {:?}",
        file_name, stats.polygon_count, stats.parse_time
    );
    Ok((doc, stats))
}

/// Top-cell name: the file stem, uppercased
fn cell_name_for(file_name: &str) -> String {
    let stem = file_name
        .rsplit('/')
        .next()
        .unwrap_or(file_name)
        .split('.')
        .next()
        .unwrap_or(file_name);
    if stem.is_empty() {
        "DXF".to_string()
    } else {
        stem.to_ascii_uppercase()
    }
}

/// FNV-1a over a layer name; stable across runs, unlike the std hasher
fn name_hash(name: &str) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in name.bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    h
}

/// One (group code, value) pair
struct Pair<'t> {
    code: i32,
    value: &'t str,
}

/// Line-pair reader over DXF text
struct PairReader<'t> {
    lines: std::str::Lines<'t>,
    offset: usize,
}
impl<'t> PairReader<'t> {
    fn new(text: &'t str) -> Self {
        Self {
            lines: text.lines(),
            offset: 0,
        }
    }
    /// Read the next pair; `Ok(None)` at end of input
    fn next_pair(&mut self) -> LoadResult<Option<Pair<'t>>> {
        let code_line = match self.lines.next() {
            Some(l) => l,
            None => return Ok(None),
        };
        self.offset += code_line.len() + 1;
        let value = self.lines.next().ok_or(LoadError::Malformed {
            offset: self.offset,
            msg: "group code without a value line".into(),
        })?;
        self.offset += value.len() + 1;
        let code = code_line
            .trim()
            .parse::<i32>()
            .map_err(|_| LoadError::Malformed {
                offset: self.offset,
                msg: format!("invalid group code {:?}", code_line.trim()),
            })?;
        Ok(Some(Pair {
            code,
            value: value.trim(),
        }))
    }
}

struct DxfImporter<'t> {
    reader: PairReader<'t>,
    doc: Document,
    stats: Statistics,
    /// Layer name → assigned GDS-style layer number, in first-seen order
    layer_numbers: HashMap<String, u16>,
}

impl<'t> DxfImporter<'t> {
    fn run(mut self, file_name: &str) -> LoadResult<(Document, Statistics)> {
        let mut cell = Cell::new(cell_name_for(file_name));
        // Walk sections; only ENTITIES contributes geometry
        while let Some(pair) = self.reader.next_pair()? {
            if pair.code == 0 && pair.value == "SECTION" {
                if let Some(name) = self.reader.next_pair()? {
                    if name.code == 2 && name.value == "ENTITIES" {
                        self.parse_entities(&mut cell)?;
                    }
                }
            }
        }
        // Finalize the single-cell document
        let mut bbox = BoundBox::empty();
        for poly in &cell.polygons {
            bbox = bbox.union(&poly.bbox);
        }
        cell.bbox = bbox;
        let key = self.doc.cells.insert(cell);
        let name = self.doc.cells[key].name.clone();
        self.doc.cell_names.insert(name.clone(), key);
        self.doc.cell_order.push(key);
        self.doc.top_cells.push(key);
        self.doc.bbox = bbox;

        self.stats.cell_count = 1;
        self.stats.top_cells = vec![name];
        self.stats.bbox = bbox;
        if !bbox.is_empty() {
            let (w, h) = bbox.size();
            self.stats.width_um = self.doc.units.dbu_to_um(w as f64);
            self.stats.height_um = self.doc.units.dbu_to_um(h as f64);
        }
        Ok((self.doc, self.stats))
    }

    /// Consume pairs until ENDSEC, dispatching each `0`-code entity
    fn parse_entities(&mut self, cell: &mut Cell) -> LoadResult<()> {
        let mut pending = self.reader.next_pair()?;
        while let Some(pair) = pending.take() {
            if pair.code != 0 {
                pending = self.reader.next_pair()?;
                continue;
            }
            match pair.value {
                "ENDSEC" => return Ok(()),
                "LWPOLYLINE" => pending = self.parse_lwpolyline(cell)?,
                "POLYLINE" => pending = self.parse_polyline(cell)?,
                "CIRCLE" => pending = self.parse_circle(cell)?,
                "ARC" => pending = self.parse_arc(cell)?,
                "SOLID" | "3DFACE" => pending = self.parse_corner_entity(cell)?,
                "LINE" => {
                    self.stats
                        .warnings
                        .push("LINE entity has no area; skipped".into());
                    pending = self.reader.next_pair()?;
                }
                _ => {
                    self.stats.unknown_records += 1;
                    pending = self.reader.next_pair()?;
                }
            }
        }
        Ok(())
    }

    /// Collect this entity's pairs until the next `0` code, which is
    /// handed back to the dispatcher
    fn entity_fields(&mut self) -> LoadResult<(Vec<Pair<'t>>, Option<Pair<'t>>)> {
        let mut fields = Vec::new();
        loop {
            match self.reader.next_pair()? {
                Some(pair) if pair.code == 0 => return Ok((fields, Some(pair))),
                Some(pair) => fields.push(pair),
                None => return Ok((fields, None)),
            }
        }
    }

    fn parse_lwpolyline(&mut self, cell: &mut Cell) -> LoadResult<Option<Pair<'t>>> {
        let (fields, next) = self.entity_fields()?;
        let layer = field_str(&fields, 8).unwrap_or("0").to_string();
        let xs = field_f64s(&fields, 10);
        let ys = field_f64s(&fields, 20);
        let points: Vec<Point> = xs
            .iter()
            .zip(ys.iter())
            .map(|(x, y)| mm_point(*x, *y))
            .collect();
        self.push_polygon(cell, &layer, points);
        Ok(next)
    }

    /// Legacy POLYLINE: vertices arrive as separate VERTEX entities,
    /// terminated by SEQEND
    fn parse_polyline(&mut self, cell: &mut Cell) -> LoadResult<Option<Pair<'t>>> {
        let (fields, mut next) = self.entity_fields()?;
        let layer = field_str(&fields, 8).unwrap_or("0").to_string();
        let mut points = Vec::new();
        while let Some(pair) = next.take() {
            if pair.code != 0 {
                next = self.reader.next_pair()?;
                continue;
            }
            match pair.value {
                "VERTEX" => {
                    let (vf, n) = self.entity_fields()?;
                    if let (Some(x), Some(y)) = (field_f64(&vf, 10), field_f64(&vf, 20)) {
                        points.push(mm_point(x, y));
                    }
                    next = n;
                }
                "SEQEND" => {
                    let (_, n) = self.entity_fields()?;
                    next = n;
                    break;
                }
                // A POLYLINE without SEQEND; hand the entity back
                _ => {
                    next = Some(pair);
                    break;
                }
            }
        }
        self.push_polygon(cell, &layer, points);
        Ok(next)
    }

    fn parse_circle(&mut self, cell: &mut Cell) -> LoadResult<Option<Pair<'t>>> {
        let (fields, next) = self.entity_fields()?;
        let layer = field_str(&fields, 8).unwrap_or("0").to_string();
        let (cx, cy) = (
            field_f64(&fields, 10).unwrap_or(0.),
            field_f64(&fields, 20).unwrap_or(0.),
        );
        let r = field_f64(&fields, 40).unwrap_or(0.);
        // 32-gon approximation
        let points: Vec<Point> = (0..32)
            .map(|i| {
                let theta = i as f64 * std::f64::consts::TAU / 32.0;
                mm_point(cx + r * theta.cos(), cy + r * theta.sin())
            })
            .collect();
        self.push_polygon(cell, &layer, points);
        Ok(next)
    }

    fn parse_arc(&mut self, cell: &mut Cell) -> LoadResult<Option<Pair<'t>>> {
        let (fields, next) = self.entity_fields()?;
        let layer = field_str(&fields, 8).unwrap_or("0").to_string();
        let (cx, cy) = (
            field_f64(&fields, 10).unwrap_or(0.),
            field_f64(&fields, 20).unwrap_or(0.),
        );
        let r = field_f64(&fields, 40).unwrap_or(0.);
        let start = field_f64(&fields, 50).unwrap_or(0.).to_radians();
        let mut end = field_f64(&fields, 51).unwrap_or(0.).to_radians();
        if end <= start {
            end += std::f64::consts::TAU;
        }
        // 16 segments over the swept angle, closed through the center
        let mut points: Vec<Point> = (0..=16)
            .map(|i| {
                let theta = start + (end - start) * i as f64 / 16.0;
                mm_point(cx + r * theta.cos(), cy + r * theta.sin())
            })
            .collect();
        points.push(mm_point(cx, cy));
        self.push_polygon(cell, &layer, points);
        Ok(next)
    }

    /// SOLID / 3DFACE: a polygon from the corner points 10/20 .. 13/23
    fn parse_corner_entity(&mut self, cell: &mut Cell) -> LoadResult<Option<Pair<'t>>> {
        let (fields, next) = self.entity_fields()?;
        let layer = field_str(&fields, 8).unwrap_or("0").to_string();
        let mut points = Vec::new();
        for (xc, yc) in [(10, 20), (11, 21), (12, 22), (13, 23)] {
            if let (Some(x), Some(y)) = (field_f64(&fields, xc), field_f64(&fields, yc)) {
                points.push(mm_point(x, y));
            }
        }
        points.dedup();
        self.push_polygon(cell, &layer, points);
        Ok(next)
    }

    /// Intern the layer for `name` and add the polygon, dropping
    /// degenerates just as the GDS builder does
    fn push_polygon(&mut self, cell: &mut Cell, layer_name: &str, mut points: Vec<Point>) {
        if points.len() > 1 && points.first() == points.last() {
            points.pop();
        }
        let distinct: std::collections::HashSet<Point> = points.iter().copied().collect();
        if distinct.len() < 3 {
            self.stats.degenerate_polygons += 1;
            self.stats.warnings.push(format!(
                "degenerate {}-point entity on layer {:?} dropped",
                points.len(),
                layer_name
            ));
            return;
        }
        let id = self.layer_id(layer_name);
        let key = self.doc.layers.get_or_insert(id);
        // Name and color come from the DXF layer name, not the defaults
        let layer = self.doc.layers.get_mut(key).unwrap();
        if layer.name.is_none() {
            layer.name = Some(layer_name.to_string());
            let h = name_hash(layer_name);
            layer.color = Color::new(
                0x40 | (h >> 16) as u8 & 0xBF,
                0x40 | (h >> 8) as u8 & 0xBF,
                0x40 | h as u8 & 0xBF,
            );
        }
        *self.stats.polygons_per_layer.entry(id).or_insert(0) += 1;
        self.stats.polygon_count += 1;
        cell.polygons.push(Polygon::new(key, points));
    }

    /// Distinct `(layer, 0)` per DXF layer name, assigned in first-seen
    /// order
    fn layer_id(&mut self, name: &str) -> LayerId {
        let next = self.layer_numbers.len() as u16 + 1;
        let number = *self
            .layer_numbers
            .entry(name.to_string())
            .or_insert(next);
        LayerId::new(number, 0)
    }
}

/// Millimeter coordinates to nanometer DBU
fn mm_point(x: f64, y: f64) -> Point {
    Point::new(
        (x * DBU_PER_MM).round() as Int,
        (y * DBU_PER_MM).round() as Int,
    )
}

fn field_str<'t>(fields: &[Pair<'t>], code: i32) -> Option<&'t str> {
    fields.iter().find(|p| p.code == code).map(|p| p.value)
}
fn field_f64(fields: &[Pair], code: i32) -> Option<f64> {
    field_str(fields, code)?.parse().ok()
}
fn field_f64s(fields: &[Pair], code: i32) -> Vec<f64> {
    fields
        .iter()
        .filter(|p| p.code == code)
        .filter_map(|p| p.value.parse().ok())
        .collect()
}

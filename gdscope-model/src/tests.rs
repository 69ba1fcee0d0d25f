use super::*;
use gdscope_gds::write::library_stream;
use gdscope_gds::GdsRecord;

/// Standard units: 1 DBU = 1 nm, 1 user unit = 1 µm
const UNITS: (f64, f64) = (1e-3, 1e-9);

/// Records of one BOUNDARY element
fn boundary(layer: i16, datatype: i16, xy: Vec<i32>) -> Vec<GdsRecord> {
    vec![
        GdsRecord::Boundary,
        GdsRecord::Layer(layer),
        GdsRecord::DataType(datatype),
        GdsRecord::Xy(xy),
        GdsRecord::EndElement,
    ]
}

/// Records of one cell holding `body` elements
fn cell(name: &str, body: Vec<GdsRecord>) -> Vec<GdsRecord> {
    let mut records = vec![
        GdsRecord::BgnStruct { dates: vec![0; 12] },
        GdsRecord::StructName(name.into()),
    ];
    records.extend(body);
    records.push(GdsRecord::EndStruct);
    records
}

/// Records of one SREF to `target` at `(x, y)`
fn sref(target: &str, x: i32, y: i32) -> Vec<GdsRecord> {
    vec![
        GdsRecord::StructRef,
        GdsRecord::StructRefName(target.into()),
        GdsRecord::Xy(vec![x, y]),
        GdsRecord::EndElement,
    ]
}

fn parse(body: Vec<GdsRecord>) -> LoadResult<(Document, Statistics)> {
    let bytes = library_stream("testlib", UNITS, body).unwrap();
    DocBuilder::parse(&bytes, "test.gds")
}

/// The unit square of scenario S1: one TOP cell, one 1000×1000 boundary
fn single_square() -> Vec<GdsRecord> {
    cell(
        "TOP",
        boundary(1, 0, vec![0, 0, 1000, 0, 1000, 1000, 0, 1000, 0, 0]),
    )
}

#[test]
fn single_square_loads() {
    let (doc, stats) = parse(single_square()).unwrap();
    assert_eq!(doc.cells.len(), 1);
    assert_eq!(doc.top_cell_names(), vec!["TOP"]);
    assert_eq!(
        doc.bbox,
        BoundBox::new(Point::new(0, 0), Point::new(1000, 1000))
    );
    // Exactly the 1/0 layer, auto-created
    assert_eq!(doc.layers.len(), 1);
    assert!(doc.layers.by_id(LayerId::new(1, 0)).is_some());
    // The closing duplicate has been stripped
    let top = doc.cell("TOP").unwrap();
    assert_eq!(top.polygons[0].points.len(), 4);
    assert_eq!(top.polygons[0].bbox, doc.bbox);
    // Statistics: 1000 nm on a side is one micron
    assert_eq!(stats.polygon_count, 1);
    assert_eq!(stats.top_cells, vec!["TOP".to_string()]);
    assert!((stats.width_um - 1.0).abs() < 1e-12);
    assert!((stats.height_um - 1.0).abs() < 1e-12);
}

#[test]
fn units_are_derived_from_the_record_pair() {
    let (doc, _) = parse(single_square()).unwrap();
    assert!((doc.units.dbu_in_meters() - 1e-9).abs() < 1e-24);
    assert!((doc.units.user_in_meters - 1e-6).abs() < 1e-21);
    assert!((doc.units.dbu_to_um(1000.0) - 1.0).abs() < 1e-12);
}

#[test]
fn array_reference_expands_and_bounds() {
    // Scenario S2: CELL_A holds a 100×100 square; TOP arrays it 3 rows ×
    // 4 cols at 200 DBU pitch.
    let mut body = cell(
        "CELL_A",
        boundary(1, 0, vec![0, 0, 100, 0, 100, 100, 0, 100]),
    );
    body.extend(cell(
        "TOP",
        vec![
            GdsRecord::ArrayRef,
            GdsRecord::StructRefName("CELL_A".into()),
            GdsRecord::ColRow { cols: 4, rows: 3 },
            GdsRecord::Xy(vec![0, 0, 800, 0, 0, 600]),
            GdsRecord::EndElement,
        ],
    ));
    let (doc, _) = parse(body).unwrap();
    assert_eq!(
        doc.bbox,
        BoundBox::new(Point::new(0, 0), Point::new(700, 500))
    );
    assert_eq!(doc.top_cell_names(), vec!["TOP"]);
    let top = doc.cell("TOP").unwrap();
    let array = top.refs[0].array.unwrap();
    assert_eq!((array.rows, array.cols), (3, 4));
    assert_eq!(array.col_step, (200, 0));
    assert_eq!(array.row_step, (0, 200));
    assert_eq!(top.refs[0].grid_offsets().len(), 12);
}

#[test]
fn one_by_one_array_is_a_single_reference() {
    let mut body = cell("LEAF", boundary(1, 0, vec![0, 0, 10, 0, 10, 10]));
    body.extend(cell(
        "TOP",
        vec![
            GdsRecord::ArrayRef,
            GdsRecord::StructRefName("LEAF".into()),
            GdsRecord::ColRow { cols: 1, rows: 1 },
            GdsRecord::Xy(vec![0, 0, 5, 0, 0, 5]),
            GdsRecord::EndElement,
        ],
    ));
    let (doc, _) = parse(body).unwrap();
    assert!(doc.cell("TOP").unwrap().refs[0].array.is_none());
}

#[test]
fn zero_sized_array_is_omitted_with_warning() {
    let mut body = cell("LEAF", boundary(1, 0, vec![0, 0, 10, 0, 10, 10]));
    body.extend(cell(
        "TOP",
        vec![
            GdsRecord::ArrayRef,
            GdsRecord::StructRefName("LEAF".into()),
            GdsRecord::ColRow { cols: 0, rows: 3 },
            GdsRecord::Xy(vec![0, 0, 0, 0, 0, 0]),
            GdsRecord::EndElement,
        ],
    ));
    // LEAF must still be referenced by nothing, making both cells tops
    let (doc, stats) = parse(body).unwrap();
    assert!(doc.cell("TOP").unwrap().refs.is_empty());
    assert_eq!(doc.top_cells.len(), 2);
    assert!(stats.warnings.iter().any(|w| w.contains("omitted")));
}

#[test]
fn reference_cycle_fails_with_path() {
    // Scenario S3: A references B; B references A
    let mut body = cell("A", sref("B", 0, 0));
    body.extend(cell("B", sref("A", 0, 0)));
    match parse(body) {
        Err(LoadError::ReferenceCycle { path }) => {
            assert_eq!(path, vec!["A".to_string(), "B".into(), "A".into()]);
        }
        other => panic!("expected ReferenceCycle, got {:?}", other),
    }
}

#[test]
fn self_reference_fails() {
    let body = cell("A", sref("A", 0, 0));
    assert!(matches!(
        parse(body),
        Err(LoadError::ReferenceCycle { .. })
    ));
}

#[test]
fn unresolved_reference_fails() {
    let body = cell("TOP", sref("MISSING", 0, 0));
    match parse(body) {
        Err(LoadError::UnresolvedReference { cell, target }) => {
            assert_eq!(cell, "TOP");
            assert_eq!(target, "MISSING");
        }
        other => panic!("expected UnresolvedReference, got {:?}", other),
    }
}

#[test]
fn degenerate_polygons_are_dropped_and_counted() {
    let mut elements = Vec::new();
    // 0 points, 2 points, and a "triangle" whose three points coincide
    elements.extend(boundary(1, 0, vec![]));
    elements.extend(boundary(1, 0, vec![0, 0, 10, 10]));
    elements.extend(boundary(1, 0, vec![5, 5, 5, 5, 5, 5]));
    // And one real triangle, which must survive
    elements.extend(boundary(1, 0, vec![0, 0, 10, 0, 0, 10]));
    let (doc, stats) = parse(cell("TOP", elements)).unwrap();
    assert_eq!(stats.degenerate_polygons, 3);
    assert_eq!(stats.polygon_count, 1);
    let top = doc.cell("TOP").unwrap();
    assert_eq!(top.polygons.len(), 1);
    assert_eq!(top.polygons[0].points.len(), 3);
}

#[test]
fn geometry_before_units_fails() {
    // Hand-build a stream whose UNITS record is missing entirely
    let mut records = vec![
        GdsRecord::Header { version: 600 },
        GdsRecord::BgnLib { dates: vec![0; 12] },
        GdsRecord::LibName("nolib".into()),
    ];
    records.extend(cell("TOP", boundary(1, 0, vec![0, 0, 1, 0, 1, 1])));
    records.push(GdsRecord::EndLib);
    let bytes = gdscope_gds::write::encode_stream(&records).unwrap();
    assert!(matches!(
        DocBuilder::parse(&bytes, "nounits.gds"),
        Err(LoadError::MissingUnits { .. })
    ));
}

#[test]
fn duplicate_cell_names_fail() {
    let mut body = cell("TOP", vec![]);
    body.extend(cell("TOP", vec![]));
    assert!(matches!(parse(body), Err(LoadError::Malformed { .. })));
}

#[test]
fn empty_top_cell_loads_with_degenerate_bbox() {
    // Boundary behavior 11: a single empty top cell
    let (doc, stats) = parse(cell("TOP", vec![])).unwrap();
    assert_eq!(doc.cells.len(), 1);
    assert!(doc.bbox.is_empty());
    assert_eq!(stats.polygon_count, 0);
    assert_eq!(stats.width_um, 0.0);
}

#[test]
fn transformed_reference_bbox_folds_into_parent() {
    // LEAF spans (0,0)-(100,50); TOP places it rotated 90° at (1000, 0).
    let mut body = cell("LEAF", boundary(2, 0, vec![0, 0, 100, 0, 100, 50, 0, 50]));
    body.extend(cell(
        "TOP",
        vec![
            GdsRecord::StructRef,
            GdsRecord::StructRefName("LEAF".into()),
            GdsRecord::Strans(0x00, 0x00),
            GdsRecord::Angle(90.0),
            GdsRecord::Xy(vec![1000, 0]),
            GdsRecord::EndElement,
        ],
    ));
    let (doc, _) = parse(body).unwrap();
    let top = doc.cell("TOP").unwrap();
    // (100, 50) rotates to (-50, 100), so the box lands at (950, 0)-(1000, 100)
    assert_eq!(
        top.bbox,
        BoundBox::new(Point::new(950, 0), Point::new(1000, 100))
    );
    assert_eq!(doc.bbox, top.bbox);
}

#[test]
fn magnified_reflected_reference_bbox() {
    let mut body = cell("LEAF", boundary(1, 0, vec![0, 0, 10, 0, 10, 10, 0, 10]));
    body.extend(cell(
        "TOP",
        vec![
            GdsRecord::StructRef,
            GdsRecord::StructRefName("LEAF".into()),
            GdsRecord::Strans(0x80, 0x00),
            GdsRecord::Mag(3.0),
            GdsRecord::Xy(vec![0, 0]),
            GdsRecord::EndElement,
        ],
    ));
    let (doc, _) = parse(body).unwrap();
    // Reflection across X flips the square below the axis; mag 3 scales it
    assert_eq!(
        doc.bbox,
        BoundBox::new(Point::new(0, -30), Point::new(30, 0))
    );
}

#[test]
fn paths_widen_into_rectangles() {
    let body = cell(
        "TOP",
        vec![
            GdsRecord::Path,
            GdsRecord::Layer(3),
            GdsRecord::DataType(0),
            GdsRecord::Width(10),
            GdsRecord::Xy(vec![0, 0, 100, 0, 100, 100]),
            GdsRecord::EndElement,
        ],
    );
    let (doc, stats) = parse(body).unwrap();
    let top = doc.cell("TOP").unwrap();
    // Two Manhattan segments, one rectangle each
    assert_eq!(top.polygons.len(), 2);
    assert_eq!(stats.polygons_per_layer[&LayerId::new(3, 0)], 2);
    assert_eq!(
        top.polygons[0].bbox,
        BoundBox::new(Point::new(0, -5), Point::new(100, 5))
    );
}

#[test]
fn small_cells_are_flagged_for_minimap_skip() {
    // GRAIN is 10 DBU against a 10 000 DBU document: well under 1%
    let mut body = cell("GRAIN", boundary(1, 0, vec![0, 0, 10, 0, 10, 10]));
    body.extend(cell(
        "TOP",
        [
            boundary(1, 0, vec![0, 0, 10_000, 0, 10_000, 10_000, 0, 10_000]),
            sref("GRAIN", 500, 500),
        ]
        .concat(),
    ));
    let (doc, _) = parse(body).unwrap();
    assert!(doc.cell("GRAIN").unwrap().skip_in_minimap);
    assert!(!doc.cell("TOP").unwrap().skip_in_minimap);
}

#[test]
fn unknown_records_are_counted_not_fatal() {
    // Splice a FONTS record (type 0x20, Str) into the library level
    let mut records = vec![
        GdsRecord::Header { version: 600 },
        GdsRecord::BgnLib { dates: vec![0; 12] },
        GdsRecord::LibName("lib".into()),
        GdsRecord::Units(UNITS.0, UNITS.1),
    ];
    records.extend(cell("TOP", boundary(1, 0, vec![0, 0, 5, 0, 5, 5])));
    records.push(GdsRecord::EndLib);
    let mut bytes = Vec::new();
    for (i, r) in records.iter().enumerate() {
        if i == 4 {
            bytes.extend_from_slice(&[0x00, 0x06, 0x20, 0x06]);
            bytes.extend_from_slice(b"xy");
        }
        r.encode(&mut bytes).unwrap();
    }
    let (doc, stats) = DocBuilder::parse(&bytes, "fonts.gds").unwrap();
    assert_eq!(stats.unknown_records, 1);
    assert_eq!(doc.cells.len(), 1);
}

#[test]
fn canceled_load_returns_no_document() {
    // Enough boundaries to cross the 10 000-record yield threshold
    let mut elements = Vec::new();
    for i in 0..2_000 {
        elements.extend(boundary(1, 0, vec![i, 0, i + 10, 0, i + 10, 10]));
    }
    let bytes = library_stream("big", UNITS, cell("TOP", elements)).unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();
    let mut progress = |_: u8, _: &str| {};
    let result = DocBuilder::parse_with(&bytes, "big.gds", &mut progress, &cancel);
    assert!(matches!(result, Err(LoadError::Canceled)));
}

#[test]
fn progress_is_monotonic_and_completes() {
    let mut elements = Vec::new();
    for i in 0..3_000 {
        elements.extend(boundary(1, 0, vec![i, 0, i + 10, 0, i + 10, 10]));
    }
    let bytes = library_stream("big", UNITS, cell("TOP", elements)).unwrap();
    let mut reported: Vec<u8> = Vec::new();
    let mut progress = |pct: u8, _msg: &str| reported.push(pct);
    let cancel = CancelToken::new();
    DocBuilder::parse_with(&bytes, "big.gds", &mut progress, &cancel).unwrap();
    assert!(!reported.is_empty());
    assert!(reported.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(*reported.last().unwrap(), 100);
}

#[test]
fn every_polygon_bbox_matches_its_points() {
    let mut body = cell(
        "SHAPES",
        [
            boundary(1, 0, vec![0, 0, 10, 0, 5, 8]),
            boundary(2, 1, vec![-5, -5, 5, -5, 5, 5, -5, 5]),
        ]
        .concat(),
    );
    body.extend(cell("TOP", sref("SHAPES", 0, 0)));
    let (doc, _) = parse(body).unwrap();
    for c in doc.cells.values() {
        for poly in &c.polygons {
            assert_eq!(poly.bbox, BoundBox::of_points(&poly.points));
        }
    }
}

#[test]
fn document_serde_round_trips() {
    let (doc, _) = parse(single_square()).unwrap();
    let json = serde_json::to_string(&doc).unwrap();
    let back: Document = serde_json::from_str(&json).unwrap();
    assert_eq!(back.cell_names.len(), 1);
    assert_eq!(back.bbox, doc.bbox);
    assert_eq!(back.units, doc.units);
}

mod dxf_import {
    use super::*;
    use crate::dxf;

    /// Assemble DXF text from (code, value) pairs
    fn dxf_text(pairs: &[(i32, &str)]) -> String {
        let mut s = String::new();
        for (code, value) in pairs {
            s.push_str(&format!("{}\n{}\n", code, value));
        }
        s
    }

    fn entities(body: &[(i32, &str)]) -> String {
        let mut pairs = vec![(0, "SECTION"), (2, "ENTITIES")];
        pairs.extend_from_slice(body);
        pairs.extend_from_slice(&[(0, "ENDSEC"), (0, "EOF")]);
        dxf_text(&pairs)
    }

    #[test]
    fn lwpolyline_becomes_polygon() {
        let text = entities(&[
            (0, "LWPOLYLINE"),
            (8, "METAL1"),
            (90, "4"),
            (10, "0.0"),
            (20, "0.0"),
            (10, "1.0"),
            (20, "0.0"),
            (10, "1.0"),
            (20, "1.0"),
            (10, "0.0"),
            (20, "1.0"),
        ]);
        let (doc, stats) = dxf::import(&text, "plate.dxf").unwrap();
        assert_eq!(stats.polygon_count, 1);
        assert_eq!(doc.top_cell_names(), vec!["PLATE"]);
        // 1 mm square in nanometer DBU
        assert_eq!(
            doc.bbox,
            BoundBox::new(Point::new(0, 0), Point::new(1_000_000, 1_000_000))
        );
        // The layer carries its DXF name
        let (_, layer) = doc.layers.iter().next().unwrap();
        assert_eq!(layer.name.as_deref(), Some("METAL1"));
        assert_eq!(layer.id.datatype, 0);
    }

    #[test]
    fn circle_becomes_32_gon() {
        let text = entities(&[
            (0, "CIRCLE"),
            (8, "VIA"),
            (10, "0.0"),
            (20, "0.0"),
            (40, "1.0"),
        ]);
        let (doc, _) = dxf::import(&text, "c.dxf").unwrap();
        let cell = doc.cell("C").unwrap();
        assert_eq!(cell.polygons[0].points.len(), 32);
        assert_eq!(
            cell.polygons[0].bbox,
            BoundBox::new(
                Point::new(-1_000_000, -1_000_000),
                Point::new(1_000_000, 1_000_000)
            )
        );
    }

    #[test]
    fn arc_spans_sixteen_segments() {
        let text = entities(&[
            (0, "ARC"),
            (8, "EDGE"),
            (10, "0.0"),
            (20, "0.0"),
            (40, "1.0"),
            (50, "0.0"),
            (51, "90.0"),
        ]);
        let (doc, _) = dxf::import(&text, "a.dxf").unwrap();
        // 17 rim points plus the center
        assert_eq!(doc.cell("A").unwrap().polygons[0].points.len(), 18);
    }

    #[test]
    fn line_is_skipped_with_warning() {
        let text = entities(&[
            (0, "LINE"),
            (8, "W"),
            (10, "0.0"),
            (20, "0.0"),
            (11, "5.0"),
            (21, "5.0"),
        ]);
        let (_, stats) = dxf::import(&text, "l.dxf").unwrap();
        assert_eq!(stats.polygon_count, 0);
        assert!(stats.warnings.iter().any(|w| w.contains("LINE")));
    }

    #[test]
    fn solid_corners_become_polygon() {
        let text = entities(&[
            (0, "SOLID"),
            (8, "FILL"),
            (10, "0.0"),
            (20, "0.0"),
            (11, "2.0"),
            (21, "0.0"),
            (12, "2.0"),
            (22, "2.0"),
            (13, "0.0"),
            (23, "2.0"),
        ]);
        let (doc, _) = dxf::import(&text, "s.dxf").unwrap();
        assert_eq!(doc.cell("S").unwrap().polygons[0].points.len(), 4);
    }

    #[test]
    fn layer_colors_are_deterministic() {
        let text = entities(&[
            (0, "LWPOLYLINE"),
            (8, "POLY"),
            (10, "0.0"),
            (20, "0.0"),
            (10, "1.0"),
            (20, "0.0"),
            (10, "0.0"),
            (20, "1.0"),
        ]);
        let (doc1, _) = dxf::import(&text, "x.dxf").unwrap();
        let (doc2, _) = dxf::import(&text, "x.dxf").unwrap();
        let c1 = doc1.layers.iter().next().unwrap().1.color;
        let c2 = doc2.layers.iter().next().unwrap().1.color;
        assert_eq!(c1, c2);
    }
}

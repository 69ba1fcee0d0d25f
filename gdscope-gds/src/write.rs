//!
//! # GDSII Record Writing
//!
//! Stream-level helpers over [GdsRecord::encode]. The viewer never writes
//! layout to disk; these exist for round-trip checks and for authoring
//! synthetic streams in tests.
//!

// Std-Lib
use std::io::Write;

// Local imports
use crate::{GdsRecord, GdsResult};

/// Encode `records` in order onto `writer`
pub fn write_records(records: &[GdsRecord], writer: &mut impl Write) -> GdsResult<()> {
    for r in records {
        r.encode(writer)?;
    }
    Ok(())
}

/// Encode `records` into a fresh byte buffer
pub fn encode_stream(records: &[GdsRecord]) -> GdsResult<Vec<u8>> {
    let mut buf = Vec::new();
    write_records(records, &mut buf)?;
    Ok(buf)
}

/// A minimal library skeleton wrapped around `body`: HEADER, BGNLIB,
/// LIBNAME, UNITS, `body`..., ENDLIB. Most synthetic test streams start
/// here.
pub fn library_stream(
    name: &str,
    units: (f64, f64),
    body: Vec<GdsRecord>,
) -> GdsResult<Vec<u8>> {
    let mut records = vec![
        GdsRecord::Header { version: 600 },
        GdsRecord::BgnLib {
            dates: vec![0; 12],
        },
        GdsRecord::LibName(name.to_string()),
        GdsRecord::Units(units.0, units.1),
    ];
    records.extend(body);
    records.push(GdsRecord::EndLib);
    encode_stream(&records)
}

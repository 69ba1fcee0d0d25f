//!
//! # GDSII Record Layer
//!
//! GDSII is a stream of big-endian records, each led by a four-byte header:
//! a 16-bit total length (header included), a record-type byte, and a
//! data-type byte. This crate decodes that stream into a lazy sequence of
//! typed [GdsRecord]s, and encodes records back into bytes for round-trip
//! checks and synthetic test streams.
//!
//! The record layer does not interpret record *meaning*: folding records
//! into cells, polygons, and references is the job of the document builder
//! in `gdscope-model`. Accordingly the [RecordReader] is restartable from
//! any record boundary, reports its byte position for error messages and
//! load progress, and passes record types it does not know through as
//! [GdsRecord::Unknown] rather than dropping them.
//!

// Std-Lib
use std::fmt;
use std::io::Write;

// Crates.io
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};

pub mod read;
pub mod write;
pub use read::RecordReader;

#[cfg(test)]
mod tests;

/// [GdsError]-specialized Result type
pub type GdsResult<T> = Result<T, GdsError>;

///
/// # Gds Record-Layer Errors
///
/// Every decode-side variant carries the byte offset at which decoding
/// failed, measured from the start of the buffer.
///
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GdsError {
    /// A record header or payload runs past the end of the buffer
    TruncatedFile { offset: usize },
    /// A record length field that is odd, or shorter than its own header
    OddRecordLength { offset: usize, len: u16 },
    /// A data-type byte outside the set the format defines
    UnknownDataType { offset: usize, dtype: u8 },
    /// A structurally valid record whose payload cannot be decoded
    Decode { offset: usize, msg: String },
    /// Encode-side: a record payload too long for the 16-bit length field
    RecordLen(usize),
}
impl fmt::Display for GdsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GdsError::TruncatedFile { offset } => {
                write!(f, "truncated GDSII stream at byte {}", offset)
            }
            GdsError::OddRecordLength { offset, len } => {
                write!(f, "invalid record length {} at byte {}", len, offset)
            }
            GdsError::UnknownDataType { offset, dtype } => {
                write!(f, "unknown data-type 0x{:02x} at byte {}", dtype, offset)
            }
            GdsError::Decode { offset, msg } => {
                write!(f, "record decode failure at byte {}: {}", offset, msg)
            }
            GdsError::RecordLen(len) => {
                write!(f, "record payload of {} bytes exceeds the 16-bit length field", len)
            }
        }
    }
}
impl std::error::Error for GdsError {}

///
/// # Gds Record Types
///
/// In the numeric order assigned by the format, for automatic
/// `FromPrimitive` conversion from the header's record-type byte.
///
#[derive(FromPrimitive, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum GdsRecordType {
    Header = 0x00,
    BgnLib,
    LibName,
    Units,
    EndLib,
    BgnStruct,
    StructName, // STRNAME
    EndStruct,
    Boundary,
    Path,
    StructRef,
    ArrayRef,
    Text,
    Layer,
    DataType,
    Width,
    Xy,
    EndElement,
    StructRefName, // SNAME
    ColRow,
    TextNode,
    Node,
    TextType,
    Presentation,
    Spacing,
    String,
    Strans,
    Mag,
    Angle,
    Uinteger,
    Ustring,
    RefLibs,
    Fonts,
    PathType,
    Generations,
    AttrTable,
    StypTable,
    StrType,
    ElemFlags,
    ElemKey,
    LinkType,
    LinkKeys,
    Nodetype,
    PropAttr,
    PropValue,
    Box,
    BoxType,
    Plex,
    BeginExtn,
    EndExtn,
    TapeNum,
    TapeCode,
    StrClass,
    Reserved,
    Format,
    Mask,
    EndMasks,
    LibDirSize,
    SrfName,
    LibSecur,
}

/// # Gds Data-Type Enumeration
///
/// In order as encoded in the header's data-type byte.
#[derive(FromPrimitive, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum GdsDataType {
    NoData = 0,
    BitArray = 1,
    I16 = 2,
    I32 = 3,
    F32 = 4,
    F64 = 5,
    Str = 6,
}

///
/// # Gds Record Enumeration
///
/// One variant per record the document builder interprets, each holding its
/// decoded payload. Anything else structurally valid lands in
/// [GdsRecord::Unknown], payload skipped, so that downstream consumers can
/// count and report it.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GdsRecord {
    Header { version: i16 },
    BgnLib { dates: Vec<i16> },
    LibName(String),
    Units(f64, f64),
    EndLib,
    BgnStruct { dates: Vec<i16> },
    StructName(String),    // STRNAME
    StructRefName(String), // SNAME
    EndStruct,
    Boundary,
    Path,
    StructRef,
    ArrayRef,
    Text,
    Layer(i16),
    DataType(i16),
    Width(i32),
    Xy(Vec<i32>),
    EndElement,
    ColRow { cols: i16, rows: i16 },
    TextType(i16),
    Presentation(u8, u8),
    AsciiString(String),
    Strans(u8, u8),
    Mag(f64),
    Angle(f64),
    PathType(i16),
    Node,
    Nodetype(i16),
    PropAttr(i16),
    PropValue(String),
    Box,
    BoxType(i16),
    Plex(i32),
    BeginExtn(i32),
    EndExtn(i32),
    /// A record type outside the set above (or one the format has retired);
    /// carried through with its raw type byte so consumers can report it.
    Unknown { rtype: u8 },
}

///
/// # GDSII's Home-Grown Floating-Point Format
///
/// GDSII predates IEEE-754 and stores all real numbers in an eight-byte
/// "Excess-64" format: a sign bit, a seven-bit base-16 exponent biased by
/// 64, and a 56-bit integer mantissa normalized into (1/16, 1).
///
/// [GdsFloat64] is a namespace for the `decode` and `encode` conversions
/// between that representation and `f64`.
///
pub struct GdsFloat64;
impl GdsFloat64 {
    /// Decode eight excess-64-encoded bytes (as a big-endian `u64`) to `f64`
    pub fn decode(val: u64) -> f64 {
        if val == 0 {
            return 0.0;
        }
        let neg = (val >> 63) & 1 != 0;
        let exp = ((val >> 56) & 0x7F) as i32 - 64;
        // The low seven bytes form the integer mantissa,
        // normalized into (1/16, 1) by a 2^-56 scaling.
        let mantissa = (val & 0x00FF_FFFF_FFFF_FFFF) as f64 / 2f64.powi(56);
        let mag = mantissa * 16f64.powi(exp);
        if neg {
            -mag
        } else {
            mag
        }
    }
    /// Encode `f64` to eight excess-64 bytes, represented as `u64`
    pub fn encode(mut val: f64) -> u64 {
        if val == 0.0 {
            return 0;
        }
        let mut top: u8 = 0;
        if val < 0.0 {
            top = 0x80;
            val = -val;
        }
        let fexp: f64 = 0.25 * val.log2();
        let mut exponent = fexp.ceil() as i32;
        if fexp == fexp.ceil() {
            exponent += 1;
        }
        let mantissa: u64 = (val * 16f64.powi(14 - exponent)).round() as u64;
        top += (64 + exponent) as u8;
        (top as u64) << 56 | (mantissa & 0x00FF_FFFF_FFFF_FFFF)
    }
}

impl GdsRecord {
    /// Encode into bytes and write onto `writer`
    pub fn encode(&self, writer: &mut impl Write) -> GdsResult<()> {
        // GDS strings are padded to even length with a trailing NUL
        let strlen = |s: &str| -> usize { s.len() + s.len() % 2 };
        use GdsDataType::{BitArray, NoData, Str, F64, I16, I32};
        // First resolve the header fields: record type, data type, payload length
        let (rtype, dtype, len) = match self {
            GdsRecord::Header { .. } => (GdsRecordType::Header, I16, 2),
            GdsRecord::BgnLib { dates } => (GdsRecordType::BgnLib, I16, 2 * dates.len()),
            GdsRecord::LibName(s) => (GdsRecordType::LibName, Str, strlen(s)),
            GdsRecord::Units(_, _) => (GdsRecordType::Units, F64, 16),
            GdsRecord::EndLib => (GdsRecordType::EndLib, NoData, 0),
            GdsRecord::BgnStruct { dates } => (GdsRecordType::BgnStruct, I16, 2 * dates.len()),
            GdsRecord::StructName(s) => (GdsRecordType::StructName, Str, strlen(s)),
            GdsRecord::StructRefName(s) => (GdsRecordType::StructRefName, Str, strlen(s)),
            GdsRecord::EndStruct => (GdsRecordType::EndStruct, NoData, 0),
            GdsRecord::Boundary => (GdsRecordType::Boundary, NoData, 0),
            GdsRecord::Path => (GdsRecordType::Path, NoData, 0),
            GdsRecord::StructRef => (GdsRecordType::StructRef, NoData, 0),
            GdsRecord::ArrayRef => (GdsRecordType::ArrayRef, NoData, 0),
            GdsRecord::Text => (GdsRecordType::Text, NoData, 0),
            GdsRecord::Layer(_) => (GdsRecordType::Layer, I16, 2),
            GdsRecord::DataType(_) => (GdsRecordType::DataType, I16, 2),
            GdsRecord::Width(_) => (GdsRecordType::Width, I32, 4),
            GdsRecord::Xy(d) => (GdsRecordType::Xy, I32, 4 * d.len()),
            GdsRecord::EndElement => (GdsRecordType::EndElement, NoData, 0),
            GdsRecord::ColRow { .. } => (GdsRecordType::ColRow, I16, 4),
            GdsRecord::TextType(_) => (GdsRecordType::TextType, I16, 2),
            GdsRecord::Presentation(_, _) => (GdsRecordType::Presentation, BitArray, 2),
            GdsRecord::AsciiString(s) => (GdsRecordType::String, Str, strlen(s)),
            GdsRecord::Strans(_, _) => (GdsRecordType::Strans, BitArray, 2),
            GdsRecord::Mag(_) => (GdsRecordType::Mag, F64, 8),
            GdsRecord::Angle(_) => (GdsRecordType::Angle, F64, 8),
            GdsRecord::PathType(_) => (GdsRecordType::PathType, I16, 2),
            GdsRecord::Node => (GdsRecordType::Node, NoData, 0),
            GdsRecord::Nodetype(_) => (GdsRecordType::Nodetype, I16, 2),
            GdsRecord::PropAttr(_) => (GdsRecordType::PropAttr, I16, 2),
            GdsRecord::PropValue(s) => (GdsRecordType::PropValue, Str, strlen(s)),
            GdsRecord::Box => (GdsRecordType::Box, NoData, 0),
            GdsRecord::BoxType(_) => (GdsRecordType::BoxType, I16, 2),
            GdsRecord::Plex(_) => (GdsRecordType::Plex, I32, 4),
            GdsRecord::BeginExtn(_) => (GdsRecordType::BeginExtn, I32, 4),
            GdsRecord::EndExtn(_) => (GdsRecordType::EndExtn, I32, 4),
            GdsRecord::Unknown { .. } => {
                return Err(GdsError::Decode {
                    offset: 0,
                    msg: "cannot encode an unknown record type".into(),
                })
            }
        };
        // Write the four header bytes; total length includes them
        let total = len + 4;
        let total16 = u16::try_from(total).map_err(|_| GdsError::RecordLen(len))?;
        writer.write_u16::<BigEndian>(total16).map_err(io_err)?;
        writer.write_u8(rtype as u8).map_err(io_err)?;
        writer.write_u8(dtype as u8).map_err(io_err)?;

        // And the payload, organized by data type
        match self {
            // NoData
            GdsRecord::EndLib
            | GdsRecord::EndStruct
            | GdsRecord::Boundary
            | GdsRecord::Path
            | GdsRecord::StructRef
            | GdsRecord::ArrayRef
            | GdsRecord::Text
            | GdsRecord::EndElement
            | GdsRecord::Node
            | GdsRecord::Box => (),

            // Bit-arrays
            GdsRecord::Presentation(d0, d1) | GdsRecord::Strans(d0, d1) => {
                writer.write_u8(*d0).map_err(io_err)?;
                writer.write_u8(*d1).map_err(io_err)?;
            }
            // Single i16s
            GdsRecord::Header { version: d }
            | GdsRecord::Layer(d)
            | GdsRecord::DataType(d)
            | GdsRecord::TextType(d)
            | GdsRecord::PathType(d)
            | GdsRecord::Nodetype(d)
            | GdsRecord::PropAttr(d)
            | GdsRecord::BoxType(d) => writer.write_i16::<BigEndian>(*d).map_err(io_err)?,

            // Single i32s
            GdsRecord::Width(d)
            | GdsRecord::Plex(d)
            | GdsRecord::BeginExtn(d)
            | GdsRecord::EndExtn(d) => writer.write_i32::<BigEndian>(*d).map_err(io_err)?,

            // Single f64s
            GdsRecord::Mag(d) | GdsRecord::Angle(d) => writer
                .write_u64::<BigEndian>(GdsFloat64::encode(*d))
                .map_err(io_err)?,

            // "Structs"
            GdsRecord::Units(d0, d1) => {
                writer
                    .write_u64::<BigEndian>(GdsFloat64::encode(*d0))
                    .map_err(io_err)?;
                writer
                    .write_u64::<BigEndian>(GdsFloat64::encode(*d1))
                    .map_err(io_err)?;
            }
            GdsRecord::ColRow { cols, rows } => {
                writer.write_i16::<BigEndian>(*cols).map_err(io_err)?;
                writer.write_i16::<BigEndian>(*rows).map_err(io_err)?;
            }
            // Vectors
            GdsRecord::BgnLib { dates: d } | GdsRecord::BgnStruct { dates: d } => {
                for val in d.iter() {
                    writer.write_i16::<BigEndian>(*val).map_err(io_err)?;
                }
            }
            GdsRecord::Xy(d) => {
                for val in d.iter() {
                    writer.write_i32::<BigEndian>(*val).map_err(io_err)?;
                }
            }
            // Strings
            GdsRecord::LibName(s)
            | GdsRecord::StructName(s)
            | GdsRecord::StructRefName(s)
            | GdsRecord::AsciiString(s)
            | GdsRecord::PropValue(s) => {
                writer.write_all(s.as_bytes()).map_err(io_err)?;
                if s.len() % 2 != 0 {
                    // Pad odd-length strings with a zero-valued byte
                    writer.write_u8(0x00).map_err(io_err)?;
                }
            }
            GdsRecord::Unknown { .. } => unreachable!(),
        };
        Ok(())
    }
}

/// Map an I/O failure into the record layer's error type
fn io_err(e: std::io::Error) -> GdsError {
    GdsError::Decode {
        offset: 0,
        msg: format!("i/o failure while encoding: {}", e),
    }
}

/// Decode `f64`s from a big-endian byte slice of excess-64 values
pub(crate) fn decode_f64s(bytes: &[u8]) -> Vec<f64> {
    bytes
        .chunks_exact(8)
        .map(|c| GdsFloat64::decode(BigEndian::read_u64(c)))
        .collect()
}

//!
//! # GDSII Record Reading & Scanning
//!

// Std-Lib
use std::fs::File;
use std::path::Path;

// Crates.io
use byteorder::{BigEndian, ByteOrder};
use memmap::Mmap;
use num_traits::FromPrimitive;

// Local imports
use crate::{decode_f64s, GdsDataType, GdsError, GdsRecord, GdsRecordType, GdsResult};

/// Decoded record header: type, data type, and payload length (header bytes
/// already stripped).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub rtype: GdsRecordType,
    pub dtype: GdsDataType,
    pub len: u16,
}

///
/// # GDSII Record Reader
///
/// Pull-style decoder over an in-memory byte buffer. Each call to
/// [RecordReader::next_record] decodes one record and advances to the next
/// record boundary; [RecordReader::seek] restarts the reader at any such
/// boundary. The reader never interprets record meaning.
///
/// Errors carry the byte offset of the record at fault. Record types the
/// reader does not recognize are returned as [GdsRecord::Unknown] with
/// their payload skipped; only malformed lengths, undecodable data-type
/// bytes, and buffer overruns are errors.
///
pub struct RecordReader<'b> {
    /// Byte buffer being decoded
    buf: &'b [u8],
    /// Position of the next record boundary
    pos: usize,
}
impl<'b> RecordReader<'b> {
    /// Create a reader over `buf`, positioned at its first record
    pub fn new(buf: &'b [u8]) -> Self {
        Self { buf, pos: 0 }
    }
    /// Current byte position; always a record boundary between calls
    pub fn pos(&self) -> usize {
        self.pos
    }
    /// Total buffer length, for progress reporting
    pub fn len(&self) -> usize {
        self.buf.len()
    }
    /// Whether the buffer holds any bytes at all
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
    /// Restart at byte `offset`, which must be a record boundary
    pub fn seek(&mut self, offset: usize) {
        self.pos = offset;
    }
    /// Whether the reader has consumed the whole buffer
    pub fn at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }
    /// Decode the four-byte header at the current position
    fn read_header(&mut self) -> GdsResult<RecordHeader> {
        let start = self.pos;
        if self.buf.len() < start + 4 {
            return Err(GdsError::TruncatedFile { offset: start });
        }
        let total = BigEndian::read_u16(&self.buf[start..start + 2]);
        if total < 4 || total % 2 != 0 {
            return Err(GdsError::OddRecordLength {
                offset: start,
                len: total,
            });
        }
        let rbyte = self.buf[start + 2];
        let dbyte = self.buf[start + 3];
        // Unknown record-type bytes are deferred to the caller; an
        // undecodable data type is an error outright.
        let rtype = GdsRecordType::from_u8(rbyte).unwrap_or(GdsRecordType::Reserved);
        let dtype = GdsDataType::from_u8(dbyte).ok_or(GdsError::UnknownDataType {
            offset: start,
            dtype: dbyte,
        })?;
        self.pos += 4;
        Ok(RecordHeader {
            rtype,
            dtype,
            len: total - 4,
        })
    }
    /// Take the next `len` payload bytes, checking the buffer bound
    fn take(&mut self, len: u16) -> GdsResult<&'b [u8]> {
        let len = usize::from(len);
        if self.buf.len() < self.pos + len {
            return Err(GdsError::TruncatedFile { offset: self.pos });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
    /// Decode `len` bytes as an even-padded ASCII string, stripping the
    /// optional trailing NUL
    fn read_str(&mut self, len: u16) -> GdsResult<String> {
        let offset = self.pos;
        let mut bytes = self.take(len)?;
        if let [rest @ .., 0x00] = bytes {
            bytes = rest;
        }
        match std::str::from_utf8(bytes) {
            Ok(s) => Ok(s.to_string()),
            Err(_) => Err(GdsError::Decode {
                offset,
                msg: "non-ASCII bytes in string record".into(),
            }),
        }
    }
    /// Decode `len/2` big-endian i16s
    fn read_i16s(&mut self, len: u16) -> GdsResult<Vec<i16>> {
        let bytes = self.take(len)?;
        Ok(bytes.chunks_exact(2).map(BigEndian::read_i16).collect())
    }
    /// Decode `len/4` big-endian i32s
    fn read_i32s(&mut self, len: u16) -> GdsResult<Vec<i32>> {
        let bytes = self.take(len)?;
        Ok(bytes.chunks_exact(4).map(BigEndian::read_i32).collect())
    }
    /// Decode `len/8` excess-64 floats
    fn read_f64s(&mut self, len: u16) -> GdsResult<Vec<f64>> {
        let bytes = self.take(len)?;
        Ok(decode_f64s(bytes))
    }
    /// Decode the next record. Returns `Ok(None)` at end-of-buffer.
    ///
    /// Note a well-formed stream terminates with `ENDLIB` before the buffer
    /// runs out; consumers that stop there never observe the `None`.
    pub fn next_record(&mut self) -> GdsResult<Option<GdsRecord>> {
        if self.at_end() {
            return Ok(None);
        }
        let start = self.pos;
        let header = self.read_header()?;
        use GdsDataType::{BitArray, NoData, Str, F64, I16, I32};
        let len = header.len;
        let record = match (header.rtype, header.dtype, len) {
            // Library-level records
            (GdsRecordType::Header, I16, 2) => GdsRecord::Header {
                version: self.read_i16s(len)?[0],
            },
            (GdsRecordType::BgnLib, I16, 24) => GdsRecord::BgnLib {
                dates: self.read_i16s(len)?,
            },
            (GdsRecordType::LibName, Str, _) => GdsRecord::LibName(self.read_str(len)?),
            (GdsRecordType::Units, F64, 16) => {
                let v = self.read_f64s(len)?;
                GdsRecord::Units(v[0], v[1])
            }
            (GdsRecordType::EndLib, NoData, 0) => GdsRecord::EndLib,

            // Structure (cell) level records
            (GdsRecordType::BgnStruct, I16, 24) => GdsRecord::BgnStruct {
                dates: self.read_i16s(len)?,
            },
            (GdsRecordType::StructName, Str, _) => GdsRecord::StructName(self.read_str(len)?),
            (GdsRecordType::StructRefName, Str, _) => {
                GdsRecord::StructRefName(self.read_str(len)?)
            }
            (GdsRecordType::EndStruct, NoData, 0) => GdsRecord::EndStruct,

            // Element-level records
            (GdsRecordType::Boundary, NoData, 0) => GdsRecord::Boundary,
            (GdsRecordType::Path, NoData, 0) => GdsRecord::Path,
            (GdsRecordType::StructRef, NoData, 0) => GdsRecord::StructRef,
            (GdsRecordType::ArrayRef, NoData, 0) => GdsRecord::ArrayRef,
            (GdsRecordType::Text, NoData, 0) => GdsRecord::Text,
            (GdsRecordType::Layer, I16, 2) => GdsRecord::Layer(self.read_i16s(len)?[0]),
            (GdsRecordType::DataType, I16, 2) => GdsRecord::DataType(self.read_i16s(len)?[0]),
            (GdsRecordType::Width, I32, 4) => GdsRecord::Width(self.read_i32s(len)?[0]),
            (GdsRecordType::Xy, I32, _) => GdsRecord::Xy(self.read_i32s(len)?),
            (GdsRecordType::EndElement, NoData, 0) => GdsRecord::EndElement,

            // Reference and annotation records
            (GdsRecordType::ColRow, I16, 4) => {
                let d = self.read_i16s(len)?;
                GdsRecord::ColRow {
                    cols: d[0],
                    rows: d[1],
                }
            }
            (GdsRecordType::TextType, I16, 2) => GdsRecord::TextType(self.read_i16s(len)?[0]),
            (GdsRecordType::Presentation, BitArray, 2) => {
                let bytes = self.take(len)?;
                GdsRecord::Presentation(bytes[0], bytes[1])
            }
            (GdsRecordType::String, Str, _) => GdsRecord::AsciiString(self.read_str(len)?),
            (GdsRecordType::Strans, BitArray, 2) => {
                let bytes = self.take(len)?;
                GdsRecord::Strans(bytes[0], bytes[1])
            }
            (GdsRecordType::Mag, F64, 8) => GdsRecord::Mag(self.read_f64s(len)?[0]),
            (GdsRecordType::Angle, F64, 8) => GdsRecord::Angle(self.read_f64s(len)?[0]),
            (GdsRecordType::PathType, I16, 2) => GdsRecord::PathType(self.read_i16s(len)?[0]),
            (GdsRecordType::Node, NoData, 0) => GdsRecord::Node,
            (GdsRecordType::Nodetype, I16, 2) => GdsRecord::Nodetype(self.read_i16s(len)?[0]),
            (GdsRecordType::PropAttr, I16, 2) => GdsRecord::PropAttr(self.read_i16s(len)?[0]),
            (GdsRecordType::PropValue, Str, _) => GdsRecord::PropValue(self.read_str(len)?),
            (GdsRecordType::Box, NoData, 0) => GdsRecord::Box,
            (GdsRecordType::BoxType, I16, 2) => GdsRecord::BoxType(self.read_i16s(len)?[0]),
            (GdsRecordType::Plex, I32, 4) => GdsRecord::Plex(self.read_i32s(len)?[0]),
            (GdsRecordType::BeginExtn, I32, 4) => GdsRecord::BeginExtn(self.read_i32s(len)?[0]),
            (GdsRecordType::EndExtn, I32, 4) => GdsRecord::EndExtn(self.read_i32s(len)?[0]),

            // Everything else: skip the payload, report the raw type byte
            _ => {
                self.take(len)?;
                GdsRecord::Unknown {
                    rtype: self.buf[start + 2],
                }
            }
        };
        Ok(Some(record))
    }
    /// Adapt the reader into a lazy iterator of records, ending after
    /// `ENDLIB` (or at end-of-buffer)
    pub fn records(self) -> Records<'b> {
        Records {
            reader: self,
            done: false,
        }
    }
}

/// Iterator adapter over [RecordReader]
pub struct Records<'b> {
    reader: RecordReader<'b>,
    done: bool,
}
impl<'b> Iterator for Records<'b> {
    type Item = GdsResult<GdsRecord>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_record() {
            Ok(Some(r)) => {
                if r == GdsRecord::EndLib {
                    self.done = true;
                }
                Some(Ok(r))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Memory-map the file at `path` for record reading.
///
/// The mapping keeps the parse path identical to in-memory buffers:
/// [RecordReader::new] over the mapped bytes. The `unsafe` here is the
/// usual mmap caveat that the file must not be concurrently truncated.
pub fn map_file(path: impl AsRef<Path>) -> std::io::Result<Mmap> {
    let file = File::open(path)?;
    unsafe { Mmap::map(&file) }
}

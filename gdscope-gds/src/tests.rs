use super::*;
use crate::write::{encode_stream, library_stream};

/// Decode every record in `buf`, panicking on any error
fn decode_all(buf: &[u8]) -> Vec<GdsRecord> {
    RecordReader::new(buf)
        .records()
        .collect::<GdsResult<Vec<_>>>()
        .unwrap()
}

#[test]
fn float64_round_trips() {
    for val in [
        0.0, 1.0, -1.0, 1e-9, 1e-6, 2.5, -65536.0, 1e-3, 3.141592653589793,
    ] {
        let enc = GdsFloat64::encode(val);
        let dec = GdsFloat64::decode(enc);
        assert!(
            (dec - val).abs() <= val.abs() * 1e-14,
            "{} decoded as {}",
            val,
            dec
        );
    }
}

#[test]
fn float64_known_encoding() {
    // 1.0 in excess-64: exponent 65, mantissa 0x10_0000_0000_0000
    assert_eq!(GdsFloat64::encode(1.0), 0x4110_0000_0000_0000);
    assert_eq!(GdsFloat64::decode(0x4110_0000_0000_0000), 1.0);
    // Sign bit only flips the value
    assert_eq!(GdsFloat64::decode(0xC110_0000_0000_0000), -1.0);
}

#[test]
fn records_round_trip() {
    let records = vec![
        GdsRecord::Header { version: 600 },
        GdsRecord::BgnLib { dates: vec![0; 12] },
        GdsRecord::LibName("lib".into()),
        GdsRecord::Units(1e-3, 1e-9),
        GdsRecord::BgnStruct { dates: vec![0; 12] },
        GdsRecord::StructName("TOP".into()),
        GdsRecord::Boundary,
        GdsRecord::Layer(1),
        GdsRecord::DataType(0),
        GdsRecord::Xy(vec![0, 0, 1000, 0, 1000, 1000, 0, 1000, 0, 0]),
        GdsRecord::EndElement,
        GdsRecord::StructRef,
        GdsRecord::StructRefName("TOP".into()),
        GdsRecord::Strans(0x80, 0x00),
        GdsRecord::Mag(2.0),
        GdsRecord::Angle(90.0),
        GdsRecord::Xy(vec![5, 5]),
        GdsRecord::EndElement,
        GdsRecord::EndStruct,
        GdsRecord::EndLib,
    ];
    let buf = encode_stream(&records).unwrap();
    assert_eq!(decode_all(&buf), records);
}

#[test]
fn odd_length_string_is_padded() {
    // "TOP_A" is five bytes; on the wire it is padded to six with a NUL
    // which the reader must strip.
    let buf = encode_stream(&[GdsRecord::StructName("TOP_A".into())]).unwrap();
    assert_eq!(buf.len(), 4 + 6);
    let mut rdr = RecordReader::new(&buf);
    assert_eq!(
        rdr.next_record().unwrap(),
        Some(GdsRecord::StructName("TOP_A".into()))
    );
}

#[test]
fn truncated_header_fails() {
    let buf = library_stream("lib", (1e-3, 1e-9), vec![]).unwrap();
    // Chop mid-header of the final record
    let cut = &buf[..buf.len() - 2];
    let result: GdsResult<Vec<_>> = RecordReader::new(cut).records().collect();
    match result {
        Err(GdsError::TruncatedFile { offset }) => assert!(offset < buf.len()),
        other => panic!("expected TruncatedFile, got {:?}", other),
    }
}

#[test]
fn truncated_payload_fails() {
    let mut buf = encode_stream(&[GdsRecord::Xy(vec![0, 0, 10, 10])]).unwrap();
    buf.truncate(buf.len() - 4);
    let mut rdr = RecordReader::new(&buf);
    match rdr.next_record() {
        Err(GdsError::TruncatedFile { offset: 4 }) => (),
        other => panic!("expected TruncatedFile at payload, got {:?}", other),
    }
}

#[test]
fn odd_record_length_fails() {
    // Length field of 5: odd, invalid
    let buf = [0x00, 0x05, 0x06, 0x06, 0x41];
    let mut rdr = RecordReader::new(&buf);
    match rdr.next_record() {
        Err(GdsError::OddRecordLength { offset: 0, len: 5 }) => (),
        other => panic!("expected OddRecordLength, got {:?}", other),
    }
    // Length shorter than the header itself
    let buf = [0x00, 0x02, 0x04, 0x00];
    let mut rdr = RecordReader::new(&buf);
    assert!(matches!(
        rdr.next_record(),
        Err(GdsError::OddRecordLength { offset: 0, len: 2 })
    ));
}

#[test]
fn unknown_data_type_fails() {
    // Data-type byte 0x09 is outside the format
    let buf = [0x00, 0x04, 0x0D, 0x09];
    let mut rdr = RecordReader::new(&buf);
    match rdr.next_record() {
        Err(GdsError::UnknownDataType {
            offset: 0,
            dtype: 0x09,
        }) => (),
        other => panic!("expected UnknownDataType, got {:?}", other),
    }
}

#[test]
fn unknown_record_type_is_skipped_not_dropped() {
    // FONTS (0x20, Str) is valid GDSII the viewer does not interpret
    let mut buf = Vec::new();
    buf.extend_from_slice(&[0x00, 0x08, 0x20, 0x06]);
    buf.extend_from_slice(b"abcd");
    GdsRecord::EndLib.encode(&mut buf).unwrap();
    let records = decode_all(&buf);
    assert_eq!(
        records,
        vec![GdsRecord::Unknown { rtype: 0x20 }, GdsRecord::EndLib]
    );
}

#[test]
fn reader_restarts_at_record_boundaries() {
    let buf = encode_stream(&[
        GdsRecord::Header { version: 600 },
        GdsRecord::Layer(7),
        GdsRecord::EndLib,
    ])
    .unwrap();
    let mut rdr = RecordReader::new(&buf);
    rdr.next_record().unwrap();
    let boundary = rdr.pos();
    assert_eq!(rdr.next_record().unwrap(), Some(GdsRecord::Layer(7)));
    // Rewind to the recorded boundary and re-read the same record
    rdr.seek(boundary);
    assert_eq!(rdr.next_record().unwrap(), Some(GdsRecord::Layer(7)));
}

#[test]
fn iterator_stops_after_endlib() {
    // Trailing garbage after ENDLIB must not be decoded
    let mut buf = encode_stream(&[GdsRecord::EndLib]).unwrap();
    buf.extend_from_slice(&[0xFF, 0xFF, 0xFF]);
    let records: Vec<_> = RecordReader::new(&buf)
        .records()
        .collect::<GdsResult<_>>()
        .unwrap();
    assert_eq!(records, vec![GdsRecord::EndLib]);
}

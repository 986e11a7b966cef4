//! Helpers for checking encoded FIT files in tests.
//!
//! Encoder output is decoded with `fitparser`, which validates the header and
//! file CRCs and resolves the profile's field names and dynamic subfields, so
//! tests check the wire format against an independent reader.

use anyhow::{Result, anyhow};
use fitparser::profile::MesgNum;
use fitparser::{FitDataRecord, Value};

pub fn decode(bytes: &[u8]) -> Result<Vec<FitDataRecord>> {
    fitparser::from_bytes(bytes).map_err(|e| anyhow!("FIT decoding failed: {e}"))
}

pub fn messages(records: &[FitDataRecord], kind: MesgNum) -> Vec<&FitDataRecord> {
    records.iter().filter(|r| r.kind() == kind).collect()
}

pub fn field<'a>(record: &'a FitDataRecord, name: &str) -> Option<&'a Value> {
    record
        .fields()
        .iter()
        .find(|f| f.name() == name)
        .map(|f| f.value())
}

/// A numeric field, with the profile's scale and offset applied.
pub fn number(record: &FitDataRecord, name: &str) -> Option<f64> {
    match field(record, name)? {
        Value::Byte(v) | Value::Enum(v) | Value::UInt8(v) | Value::UInt8z(v) => {
            Some(f64::from(*v))
        }
        Value::SInt8(v) => Some(f64::from(*v)),
        Value::UInt16(v) | Value::UInt16z(v) => Some(f64::from(*v)),
        Value::SInt16(v) => Some(f64::from(*v)),
        Value::UInt32(v) | Value::UInt32z(v) => Some(f64::from(*v)),
        Value::SInt32(v) => Some(f64::from(*v)),
        Value::Float32(v) => Some(f64::from(*v)),
        Value::Float64(v) => Some(*v),
        _ => None,
    }
}

/// A string field, or the name of a profile enum value.
pub fn text<'a>(record: &'a FitDataRecord, name: &str) -> Option<&'a str> {
    match field(record, name)? {
        Value::String(s) => Some(s.as_str()),
        _ => None,
    }
}

/// A date_time field as Unix seconds.
pub fn timestamp(record: &FitDataRecord, name: &str) -> Option<i64> {
    match field(record, name)? {
        Value::Timestamp(t) => Some(t.timestamp()),
        _ => None,
    }
}

/// The (local type, global message) pair of each definition record, in file
/// order.
///
/// fitparser consumes definitions internally, so this walks the record
/// headers directly. It only handles the little-endian normal records the
/// encoder writes.
pub fn definitions(bytes: &[u8]) -> Vec<(u8, u16)> {
    let end = bytes.len().saturating_sub(2);
    let mut sizes = [0usize; 16];
    let mut defs = vec![];
    let mut pos = usize::from(bytes.first().copied().unwrap_or(14));
    while pos < end {
        let header = bytes[pos];
        let local = header & 0x0F;
        if header & 0x40 != 0 {
            let global = u16::from_le_bytes([bytes[pos + 3], bytes[pos + 4]]);
            let num_fields = usize::from(bytes[pos + 5]);
            let fields = &bytes[pos + 6..pos + 6 + 3 * num_fields];
            sizes[usize::from(local)] = fields.chunks(3).map(|f| usize::from(f[1])).sum();
            defs.push((local, global));
            pos += 6 + 3 * num_fields;
        } else {
            pos += 1 + sizes[usize::from(local)];
        }
    }
    defs
}

//! The built-in type dictionary and the per-type payload codecs.
//!
//! Every field payload is read and written through this module. Fixed-width
//! types carry their byte count in the dictionary; variable-width types rely
//! on the size decoded from the field prefix. Ids outside the dictionary are
//! preserved as opaque [`Value::Unknown`] payloads when the prefix declares
//! variable width, and are fatal when it declares fixed width, unless a
//! recovery size has been registered.

use std::convert::TryFrom;

use byteorder::{BigEndian, ReadBytesExt};

use crate::datetime::{self, DateTime};
use crate::error::{Error, Result};
use crate::value::Value;

/// Wire type ids, stable across implementations.
pub mod type_id {
    pub const INDICATOR: u8 = 0;
    pub const BOOLEAN: u8 = 1;
    pub const BYTE: u8 = 2;
    pub const SHORT: u8 = 3;
    pub const INT: u8 = 4;
    pub const LONG: u8 = 5;
    pub const BYTE_ARRAY: u8 = 6;
    pub const SHORT_ARRAY: u8 = 7;
    pub const INT_ARRAY: u8 = 8;
    pub const LONG_ARRAY: u8 = 9;
    pub const FLOAT: u8 = 10;
    pub const DOUBLE: u8 = 11;
    pub const FLOAT_ARRAY: u8 = 12;
    pub const DOUBLE_ARRAY: u8 = 13;
    pub const STRING: u8 = 14;
    pub const MESSAGE: u8 = 15;
    pub const BYTE_ARRAY_4: u8 = 17;
    pub const BYTE_ARRAY_8: u8 = 18;
    pub const BYTE_ARRAY_16: u8 = 19;
    pub const BYTE_ARRAY_20: u8 = 20;
    pub const BYTE_ARRAY_32: u8 = 21;
    pub const BYTE_ARRAY_64: u8 = 22;
    pub const BYTE_ARRAY_128: u8 = 23;
    pub const BYTE_ARRAY_256: u8 = 24;
    pub const BYTE_ARRAY_512: u8 = 25;
    pub const DATE_TIME: u8 = 26;

    /// The fixed-array id for a byte payload of exactly `len` bytes, if one
    /// is assigned.
    pub fn fixed_array_id(len: usize) -> Option<u8> {
        match len {
            4 => Some(BYTE_ARRAY_4),
            8 => Some(BYTE_ARRAY_8),
            16 => Some(BYTE_ARRAY_16),
            20 => Some(BYTE_ARRAY_20),
            32 => Some(BYTE_ARRAY_32),
            64 => Some(BYTE_ARRAY_64),
            128 => Some(BYTE_ARRAY_128),
            256 => Some(BYTE_ARRAY_256),
            512 => Some(BYTE_ARRAY_512),
            _ => None,
        }
    }
}

/// Descriptor for one entry of the type dictionary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldType {
    /// The wire id.
    pub id: u8,
    /// Diagnostic name.
    pub name: &'static str,
    /// Payload byte count for fixed-width types, `None` for variable width.
    pub fixed_size: Option<usize>,
}

/// The built-in descriptor for a type id, if assigned.
pub fn builtin(id: u8) -> Option<FieldType> {
    use self::type_id::*;
    let (name, fixed_size) = match id {
        INDICATOR => ("indicator", Some(0)),
        BOOLEAN => ("boolean", Some(1)),
        BYTE => ("byte", Some(1)),
        SHORT => ("short", Some(2)),
        INT => ("int", Some(4)),
        LONG => ("long", Some(8)),
        BYTE_ARRAY => ("byte[]", None),
        SHORT_ARRAY => ("short[]", None),
        INT_ARRAY => ("int[]", None),
        LONG_ARRAY => ("long[]", None),
        FLOAT => ("float", Some(4)),
        DOUBLE => ("double", Some(8)),
        FLOAT_ARRAY => ("float[]", None),
        DOUBLE_ARRAY => ("double[]", None),
        STRING => ("string", None),
        MESSAGE => ("message", None),
        BYTE_ARRAY_4 => ("byte[4]", Some(4)),
        BYTE_ARRAY_8 => ("byte[8]", Some(8)),
        BYTE_ARRAY_16 => ("byte[16]", Some(16)),
        BYTE_ARRAY_20 => ("byte[20]", Some(20)),
        BYTE_ARRAY_32 => ("byte[32]", Some(32)),
        BYTE_ARRAY_64 => ("byte[64]", Some(64)),
        BYTE_ARRAY_128 => ("byte[128]", Some(128)),
        BYTE_ARRAY_256 => ("byte[256]", Some(256)),
        BYTE_ARRAY_512 => ("byte[512]", Some(512)),
        DATE_TIME => ("datetime", Some(datetime::ENCODED_SIZE)),
        _ => return None,
    };
    Some(FieldType {
        id,
        name,
        fixed_size,
    })
}

/// The registry of wire-level value codecs. Read-only once configured;
/// customize a clone rather than a shared instance.
#[derive(Clone, Debug, Default)]
pub struct TypeDictionary {
    recovery_sizes: Vec<(u8, usize)>,
}

impl TypeDictionary {
    pub fn new() -> TypeDictionary {
        TypeDictionary::default()
    }

    /// Look up a type id. Unknown ids return `None`; their payloads are
    /// still readable opaquely when the field prefix supplies a size.
    pub fn lookup(&self, id: u8) -> Option<FieldType> {
        builtin(id)
    }

    /// Supply the payload size for an otherwise-unknown fixed-width type id,
    /// letting its fields round-trip opaquely instead of failing.
    pub fn register_fixed(&mut self, id: u8, size: usize) {
        self.recovery_sizes.retain(|&(rid, _)| rid != id);
        self.recovery_sizes.push((id, size));
    }

    /// The fixed payload size for `id`: the built-in size, or a registered
    /// recovery size.
    pub fn fixed_size(&self, id: u8) -> Option<usize> {
        if let Some(ft) = builtin(id) {
            return ft.fixed_size;
        }
        self.recovery_sizes
            .iter()
            .find(|&&(rid, _)| rid == id)
            .map(|&(_, size)| size)
    }
}

/// Decode one field payload. `data` must hold exactly the payload bytes;
/// the caller has already consumed the prefix, header, and size. Sub-message
/// payloads are handled structurally by the stream readers and never arrive
/// here. Ids outside the dictionary decode opaquely; the reader has already
/// verified that a payload size was available for them.
pub fn decode_value(id: u8, data: &[u8]) -> Result<Value> {
    use self::type_id::*;
    let value = match id {
        INDICATOR => Value::Indicator,
        BOOLEAN => Value::Boolean(read_all(data, "decode boolean", |r| r.read_u8())? != 0),
        BYTE => Value::Byte(read_all(data, "decode byte", |r| r.read_i8())?),
        SHORT => Value::Short(read_all(data, "decode short", |r| r.read_i16::<BigEndian>())?),
        INT => Value::Int(read_all(data, "decode int", |r| r.read_i32::<BigEndian>())?),
        LONG => Value::Long(read_all(data, "decode long", |r| r.read_i64::<BigEndian>())?),
        FLOAT => Value::Float(read_all(data, "decode float", |r| r.read_f32::<BigEndian>())?),
        DOUBLE => Value::Double(read_all(data, "decode double", |r| {
            r.read_f64::<BigEndian>()
        })?),
        BYTE_ARRAY | BYTE_ARRAY_4 | BYTE_ARRAY_8 | BYTE_ARRAY_16 | BYTE_ARRAY_20
        | BYTE_ARRAY_32 | BYTE_ARRAY_64 | BYTE_ARRAY_128 | BYTE_ARRAY_256 | BYTE_ARRAY_512 => {
            Value::ByteArray(data.to_vec())
        }
        SHORT_ARRAY => Value::ShortArray(decode_array(data, 2, "decode short[]", |r| {
            r.read_i16::<BigEndian>()
        })?),
        INT_ARRAY => Value::IntArray(decode_array(data, 4, "decode int[]", |r| {
            r.read_i32::<BigEndian>()
        })?),
        LONG_ARRAY => Value::LongArray(decode_array(data, 8, "decode long[]", |r| {
            r.read_i64::<BigEndian>()
        })?),
        FLOAT_ARRAY => Value::FloatArray(decode_array(data, 4, "decode float[]", |r| {
            r.read_f32::<BigEndian>()
        })?),
        DOUBLE_ARRAY => Value::DoubleArray(decode_array(data, 8, "decode double[]", |r| {
            r.read_f64::<BigEndian>()
        })?),
        STRING => {
            let s = std::str::from_utf8(data)
                .map_err(|e| Error::BadEncode(format!("invalid UTF-8 in string field: {}", e)))?;
            Value::String(s.to_string())
        }
        DATE_TIME => Value::DateTime(DateTime::try_from(data).map_err(Error::BadEncode)?),
        MESSAGE => {
            return Err(Error::BadEncode(
                "sub-message payload handled structurally, not as a value".to_string(),
            ))
        }
        other => Value::Unknown {
            type_id: other,
            bytes: data.to_vec(),
        },
    };
    Ok(value)
}

/// Append one field payload to `buf`. The inverse of [`decode_value`].
/// Sub-messages are handled structurally by the stream writers.
pub fn encode_value(buf: &mut Vec<u8>, value: &Value) -> Result<()> {
    match value {
        Value::Indicator => {}
        Value::Boolean(v) => buf.push(*v as u8),
        Value::Byte(v) => buf.push(*v as u8),
        Value::Short(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Value::Int(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Value::Long(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Value::Float(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Value::Double(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Value::ByteArray(v) => buf.extend_from_slice(v),
        Value::ShortArray(v) => {
            buf.reserve(v.len() * 2);
            for x in v {
                buf.extend_from_slice(&x.to_be_bytes());
            }
        }
        Value::IntArray(v) => {
            buf.reserve(v.len() * 4);
            for x in v {
                buf.extend_from_slice(&x.to_be_bytes());
            }
        }
        Value::LongArray(v) => {
            buf.reserve(v.len() * 8);
            for x in v {
                buf.extend_from_slice(&x.to_be_bytes());
            }
        }
        Value::FloatArray(v) => {
            buf.reserve(v.len() * 4);
            for x in v {
                buf.extend_from_slice(&x.to_be_bytes());
            }
        }
        Value::DoubleArray(v) => {
            buf.reserve(v.len() * 8);
            for x in v {
                buf.extend_from_slice(&x.to_be_bytes());
            }
        }
        Value::String(v) => buf.extend_from_slice(v.as_bytes()),
        Value::DateTime(v) => v.encode_vec(buf),
        Value::Unknown { bytes, .. } => buf.extend_from_slice(bytes),
        Value::Message(_) => {
            return Err(Error::BadEncode(
                "sub-message payload handled structurally, not as a value".to_string(),
            ))
        }
    }
    Ok(())
}

/// The encoded payload byte count of a value. Sub-messages have no flat
/// payload size and return `None`.
pub fn payload_size(value: &Value) -> Option<usize> {
    let size = match value {
        Value::Indicator => 0,
        Value::Boolean(_) | Value::Byte(_) => 1,
        Value::Short(_) => 2,
        Value::Int(_) | Value::Float(_) => 4,
        Value::Long(_) | Value::Double(_) => 8,
        Value::ByteArray(v) => v.len(),
        Value::ShortArray(v) => v.len() * 2,
        Value::IntArray(v) => v.len() * 4,
        Value::LongArray(v) => v.len() * 8,
        Value::FloatArray(v) => v.len() * 4,
        Value::DoubleArray(v) => v.len() * 8,
        Value::String(v) => v.len(),
        Value::DateTime(_) => datetime::ENCODED_SIZE,
        Value::Unknown { bytes, .. } => bytes.len(),
        Value::Message(_) => return None,
    };
    Some(size)
}

fn read_all<T>(
    data: &[u8],
    step: &'static str,
    f: impl FnOnce(&mut &[u8]) -> std::io::Result<T>,
) -> Result<T> {
    let mut r = data;
    f(&mut r).map_err(|_| Error::LengthTooShort {
        step,
        expected: data.len() + 1,
        actual: data.len(),
    })
}

fn decode_array<T>(
    data: &[u8],
    width: usize,
    step: &'static str,
    f: impl Fn(&mut &[u8]) -> std::io::Result<T>,
) -> Result<Vec<T>> {
    if data.len() % width != 0 {
        return Err(Error::BadEncode(format!(
            "array payload of {} bytes is not a multiple of the {}-byte element on step [{}]",
            data.len(),
            width,
            step
        )));
    }
    let mut r = data;
    let mut out = Vec::with_capacity(data.len() / width);
    for _ in 0..data.len() / width {
        out.push(f(&mut r).map_err(|_| Error::LengthTooShort {
            step,
            expected: width,
            actual: 0,
        })?);
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;

    fn roundtrip(value: Value) {
        let mut buf = Vec::new();
        encode_value(&mut buf, &value).unwrap();
        assert_eq!(buf.len(), payload_size(&value).unwrap());
        let decoded = decode_value(value.type_id(), &buf).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn primitives() {
        roundtrip(Value::Indicator);
        roundtrip(Value::Boolean(true));
        roundtrip(Value::Boolean(false));
        roundtrip(Value::Byte(-7));
        roundtrip(Value::Short(i16::MIN));
        roundtrip(Value::Int(1234));
        roundtrip(Value::Long(i64::MIN));
        roundtrip(Value::Float(123.45));
        roundtrip(Value::Double(-1_234_500.0));
        roundtrip(Value::String("fred".to_string()));
        roundtrip(Value::String(String::new()));
    }

    #[test]
    fn arrays() {
        roundtrip(Value::ByteArray(vec![1, 2, 3]));
        roundtrip(Value::ByteArray(vec![0; 16]));
        roundtrip(Value::ShortArray(vec![-1, 0, 1]));
        roundtrip(Value::IntArray(vec![1, 2, 4]));
        roundtrip(Value::LongArray(vec![i64::MIN, i64::MAX]));
        roundtrip(Value::FloatArray(vec![1.5, -2.5]));
        roundtrip(Value::DoubleArray(vec![0.1, 0.2]));
        roundtrip(Value::IntArray(Vec::new()));
    }

    #[test]
    fn big_endian_layout() {
        let mut buf = Vec::new();
        encode_value(&mut buf, &Value::Int(0x0102_0304)).unwrap();
        assert_eq!(buf, [0x01, 0x02, 0x03, 0x04]);

        let mut buf = Vec::new();
        encode_value(&mut buf, &Value::Short(0x0102)).unwrap();
        assert_eq!(buf, [0x01, 0x02]);
    }

    #[test]
    fn ragged_array_rejected() {
        assert!(decode_value(type_id::INT_ARRAY, &[0, 0, 0]).is_err());
        assert!(decode_value(type_id::SHORT_ARRAY, &[0]).is_err());
    }

    #[test]
    fn bad_utf8_rejected() {
        assert!(decode_value(type_id::STRING, &[0xff, 0xfe]).is_err());
    }

    #[test]
    fn unknown_type_opaque() {
        let decoded = decode_value(200, &[1, 2, 3]).unwrap();
        assert_eq!(
            decoded,
            Value::Unknown {
                type_id: 200,
                bytes: vec![1, 2, 3],
            }
        );
        roundtrip(decoded);
    }

    #[test]
    fn recovery_size() {
        let mut dict = TypeDictionary::new();
        assert_eq!(dict.fixed_size(200), None);
        dict.register_fixed(200, 6);
        assert_eq!(dict.fixed_size(200), Some(6));
        // Built-ins are untouched.
        assert_eq!(dict.fixed_size(type_id::INT), Some(4));
        assert_eq!(dict.fixed_size(type_id::STRING), None);
    }
}

//! Field values.

use num_traits::cast;

use crate::datetime::DateTime;
use crate::message::Message;
use crate::wire_type::type_id;

/// The value carried by a single field. One variant per built-in wire type,
/// plus [`Unknown`](Value::Unknown) for opaque user types preserved for
/// round-tripping.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Present but carries no payload.
    Indicator,
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    ByteArray(Vec<u8>),
    ShortArray(Vec<i16>),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
    FloatArray(Vec<f32>),
    DoubleArray(Vec<f64>),
    String(String),
    Message(Message),
    DateTime(DateTime),
    /// A type id outside the built-in dictionary, kept as raw payload bytes.
    Unknown { type_id: u8, bytes: Vec<u8> },
}

impl Value {
    /// The wire type id this value encodes as. Byte arrays whose length
    /// exactly matches one of the fixed-array types use the fixed id.
    pub fn type_id(&self) -> u8 {
        use self::Value::*;
        match self {
            Indicator => type_id::INDICATOR,
            Boolean(_) => type_id::BOOLEAN,
            Byte(_) => type_id::BYTE,
            Short(_) => type_id::SHORT,
            Int(_) => type_id::INT,
            Long(_) => type_id::LONG,
            Float(_) => type_id::FLOAT,
            Double(_) => type_id::DOUBLE,
            ByteArray(v) => type_id::fixed_array_id(v.len()).unwrap_or(type_id::BYTE_ARRAY),
            ShortArray(_) => type_id::SHORT_ARRAY,
            IntArray(_) => type_id::INT_ARRAY,
            LongArray(_) => type_id::LONG_ARRAY,
            FloatArray(_) => type_id::FLOAT_ARRAY,
            DoubleArray(_) => type_id::DOUBLE_ARRAY,
            String(_) => type_id::STRING,
            Message(_) => type_id::MESSAGE,
            DateTime(_) => type_id::DATE_TIME,
            Unknown { type_id, .. } => *type_id,
        }
    }

    /// A short name for the variant, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        use self::Value::*;
        match self {
            Indicator => "indicator",
            Boolean(_) => "boolean",
            Byte(_) => "byte",
            Short(_) => "short",
            Int(_) => "int",
            Long(_) => "long",
            Float(_) => "float",
            Double(_) => "double",
            ByteArray(_) => "byte[]",
            ShortArray(_) => "short[]",
            IntArray(_) => "int[]",
            LongArray(_) => "long[]",
            FloatArray(_) => "float[]",
            DoubleArray(_) => "double[]",
            String(_) => "string",
            Message(_) => "message",
            DateTime(_) => "datetime",
            Unknown { .. } => "unknown",
        }
    }

    pub fn is_indicator(&self) -> bool {
        matches!(self, Value::Indicator)
    }

    pub fn as_bool(&self) -> Option<bool> {
        if let Value::Boolean(v) = *self {
            Some(v)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        if let Value::String(ref v) = *self {
            Some(v)
        } else {
            None
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        if let Value::ByteArray(ref v) = *self {
            Some(v)
        } else {
            None
        }
    }

    pub fn as_message(&self) -> Option<&Message> {
        if let Value::Message(ref v) = *self {
            Some(v)
        } else {
            None
        }
    }

    pub fn as_datetime(&self) -> Option<&DateTime> {
        if let Value::DateTime(ref v) = *self {
            Some(v)
        } else {
            None
        }
    }

    /// The value as an `i64` if it holds any integer kind. Widening only.
    pub fn to_i64(&self) -> Option<i64> {
        match *self {
            Value::Byte(v) => Some(v as i64),
            Value::Short(v) => Some(v as i64),
            Value::Int(v) => Some(v as i64),
            Value::Long(v) => Some(v),
            _ => None,
        }
    }

    /// The value as an `i32` if it holds an integer kind representable in 32
    /// bits. Narrowing is checked, never lossy.
    pub fn to_i32(&self) -> Option<i32> {
        self.to_i64().and_then(cast)
    }

    /// The value as an `i16` if representable.
    pub fn to_i16(&self) -> Option<i16> {
        self.to_i64().and_then(cast)
    }

    /// The value as an `i8` if representable.
    pub fn to_i8(&self) -> Option<i8> {
        self.to_i64().and_then(cast)
    }

    /// The value as an `f64` if it holds any numeric kind. Integers widen.
    pub fn to_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(v) => Some(v as f64),
            Value::Double(v) => Some(v),
            _ => self.to_i64().and_then(cast),
        }
    }

    /// The value as an `f32` if it holds a floating kind. A double narrows
    /// only when no precision is lost.
    pub fn to_f32(&self) -> Option<f32> {
        match *self {
            Value::Float(v) => Some(v),
            Value::Double(v) => {
                let narrowed = v as f32;
                if narrowed as f64 == v || v.is_nan() {
                    Some(narrowed)
                } else {
                    None
                }
            }
            _ => self.to_i64().and_then(cast),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Value {
        Value::Boolean(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Value {
        Value::Byte(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Value {
        Value::Short(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Value {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Value {
        Value::Long(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Value {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Value {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Value {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Value {
        Value::ByteArray(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Value {
        Value::ByteArray(v.to_vec())
    }
}

impl From<Vec<i16>> for Value {
    fn from(v: Vec<i16>) -> Value {
        Value::ShortArray(v)
    }
}

impl From<Vec<i32>> for Value {
    fn from(v: Vec<i32>) -> Value {
        Value::IntArray(v)
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Value {
        Value::LongArray(v)
    }
}

impl From<Vec<f32>> for Value {
    fn from(v: Vec<f32>) -> Value {
        Value::FloatArray(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Value {
        Value::DoubleArray(v)
    }
}

impl From<Message> for Value {
    fn from(v: Message) -> Value {
        Value::Message(v)
    }
}

impl From<DateTime> for Value {
    fn from(v: DateTime) -> Value {
        Value::DateTime(v)
    }
}

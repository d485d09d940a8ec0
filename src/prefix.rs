//! The packed byte that begins every encoded field.
//!
//! Layout, most significant bit first: bit 7 is the fixed-width flag, bits
//! 6..5 hold the variable-size width (0, 1, 2, or 4 bytes), bit 4 flags an
//! ordinal, bit 3 flags a name. The low three bits are reserved and written
//! as zero.

use crate::error::{Error, Result};

const FIXED_WIDTH: u8 = 0x80;
const VAR_WIDTH_MASK: u8 = 0x60;
const VAR_WIDTH_SHIFT: u8 = 5;
const ORDINAL_PRESENT: u8 = 0x10;
const NAME_PRESENT: u8 = 0x08;

/// Decoded form of a field prefix byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldPrefix {
    /// The payload length is implied by the type, not encoded.
    pub fixed_width: bool,
    /// Byte count of the size field that follows the name: 0, 1, 2, or 4.
    /// Only meaningful when `fixed_width` is false.
    pub var_size_bytes: u8,
    /// An `i16` ordinal follows the type id.
    pub has_ordinal: bool,
    /// A length-prefixed name follows the ordinal.
    pub has_name: bool,
}

impl FieldPrefix {
    /// Unpack a prefix byte. Reserved low bits are ignored.
    pub fn from_byte(b: u8) -> FieldPrefix {
        let var_size_bytes = match (b & VAR_WIDTH_MASK) >> VAR_WIDTH_SHIFT {
            0 => 0,
            1 => 1,
            2 => 2,
            _ => 4,
        };
        FieldPrefix {
            fixed_width: b & FIXED_WIDTH != 0,
            var_size_bytes,
            has_ordinal: b & ORDINAL_PRESENT != 0,
            has_name: b & NAME_PRESENT != 0,
        }
    }

    /// Pack into the single-byte wire form.
    pub fn to_byte(self) -> u8 {
        let mut b = 0u8;
        if self.fixed_width {
            b |= FIXED_WIDTH;
        } else {
            let width = match self.var_size_bytes {
                0 => 0,
                1 => 1,
                2 => 2,
                _ => 3,
            };
            b |= width << VAR_WIDTH_SHIFT;
        }
        if self.has_ordinal {
            b |= ORDINAL_PRESENT;
        }
        if self.has_name {
            b |= NAME_PRESENT;
        }
        b
    }

    /// Prefix for a fixed-width field.
    pub fn fixed(has_ordinal: bool, has_name: bool) -> FieldPrefix {
        FieldPrefix {
            fixed_width: true,
            var_size_bytes: 0,
            has_ordinal,
            has_name,
        }
    }

    /// Prefix for a variable-width field, picking the narrowest size width
    /// that can hold `payload_len`. Zero-length payloads use the zero-byte
    /// width.
    pub fn variable(payload_len: usize, has_ordinal: bool, has_name: bool) -> Result<FieldPrefix> {
        if payload_len > u32::MAX as usize {
            return Err(Error::BadEncode(format!(
                "Field payload of {} bytes cannot be size-encoded",
                payload_len
            )));
        }
        Ok(FieldPrefix {
            fixed_width: false,
            var_size_bytes: narrowest_width(payload_len),
            has_ordinal,
            has_name,
        })
    }
}

/// The narrowest size-field width (0, 1, 2, or 4 bytes) that holds `len`.
pub fn narrowest_width(len: usize) -> u8 {
    if len == 0 {
        0
    } else if len <= u8::MAX as usize {
        1
    } else if len <= u16::MAX as usize {
        2
    } else {
        4
    }
}

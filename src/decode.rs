//! The binary stream reader.
//!
//! Consumes a byte stream and exposes the event sequence of every envelope
//! it contains. Sizes are tracked per frame: each open message or
//! sub-message knows how many payload bytes it declared and how many have
//! been consumed, and the reader emits the matching end event exactly when
//! the two meet. A clean end of stream between envelopes is detected with a
//! single byte of lookahead; running dry anywhere else is an error, and any
//! error leaves the reader terminal.

use std::io::{ErrorKind, Read};
use std::rc::Rc;

use byteorder::{BigEndian, ReadBytesExt};

use crate::encode::CodecSettings;
use crate::error::{Error, Result};
use crate::prefix::FieldPrefix;
use crate::stream::{StreamEvent, StreamReader};
use crate::taxonomy::Taxonomy;
use crate::value::Value;
use crate::wire_type::{self, type_id, TypeDictionary};
use crate::{ENVELOPE_HEADER_SIZE, MAX_DEPTH};

struct Frame {
    /// Payload bytes this frame may consume. For the envelope frame this is
    /// the full envelope size including its header.
    size: usize,
    consumed: usize,
}

/// Reads the binary encoding from any [`Read`] source.
pub struct BinaryReader<R: Read> {
    src: R,
    dict: TypeDictionary,
    settings: CodecSettings,
    taxonomy: Option<Rc<dyn Taxonomy>>,
    frames: Vec<Frame>,
    lookahead: Option<u8>,
    errored: bool,
    offset: u64,
    directives: u8,
    schema: u8,
    taxonomy_id: i16,
    f_name: Option<String>,
    f_ordinal: Option<i16>,
    f_type: Option<u8>,
    f_value: Option<Value>,
}

impl<R: Read> BinaryReader<R> {
    pub fn new(src: R) -> BinaryReader<R> {
        BinaryReader::with_settings(src, CodecSettings::default())
    }

    pub fn with_settings(src: R, settings: CodecSettings) -> BinaryReader<R> {
        BinaryReader {
            src,
            dict: TypeDictionary::new(),
            settings,
            taxonomy: None,
            frames: Vec::new(),
            lookahead: None,
            errored: false,
            offset: 0,
            directives: 0,
            schema: 0,
            taxonomy_id: 0,
            f_name: None,
            f_ordinal: None,
            f_type: None,
            f_value: None,
        }
    }

    /// Replace the type dictionary, e.g. to add recovery sizes for unknown
    /// fixed-width type ids.
    pub fn dictionary(mut self, dict: TypeDictionary) -> BinaryReader<R> {
        self.dict = dict;
        self
    }

    /// Give back the underlying source without draining it.
    pub fn release(self) -> R {
        self.src
    }

    fn fail<T>(&mut self, err: Error) -> Result<T> {
        self.errored = true;
        Err(err)
    }

    fn read_buf(&mut self, step: &'static str, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        match self.src.read_exact(&mut buf) {
            Ok(()) => {
                self.offset += len as u64;
                Ok(buf)
            }
            Err(e) => {
                self.errored = true;
                Err(Error::io_at(step, self.offset, len, e))
            }
        }
    }

    fn read_u8(&mut self, step: &'static str) -> Result<u8> {
        if let Some(b) = self.lookahead.take() {
            return Ok(b);
        }
        match self.src.read_u8() {
            Ok(b) => {
                self.offset += 1;
                Ok(b)
            }
            Err(e) => {
                self.errored = true;
                Err(Error::io_at(step, self.offset, 1, e))
            }
        }
    }

    fn read_i16(&mut self, step: &'static str) -> Result<i16> {
        match self.src.read_i16::<BigEndian>() {
            Ok(v) => {
                self.offset += 2;
                Ok(v)
            }
            Err(e) => {
                self.errored = true;
                Err(Error::io_at(step, self.offset, 2, e))
            }
        }
    }

    fn read_u16(&mut self, step: &'static str) -> Result<u16> {
        match self.src.read_u16::<BigEndian>() {
            Ok(v) => {
                self.offset += 2;
                Ok(v)
            }
            Err(e) => {
                self.errored = true;
                Err(Error::io_at(step, self.offset, 2, e))
            }
        }
    }

    fn read_u32(&mut self, step: &'static str) -> Result<u32> {
        match self.src.read_u32::<BigEndian>() {
            Ok(v) => {
                self.offset += 4;
                Ok(v)
            }
            Err(e) => {
                self.errored = true;
                Err(Error::io_at(step, self.offset, 4, e))
            }
        }
    }

    fn clear_field(&mut self) {
        self.f_name = None;
        self.f_ordinal = None;
        self.f_type = None;
        self.f_value = None;
    }

    /// Probe for another envelope. Consumes at most one byte, which is
    /// handed back to the header parse later.
    fn probe(&mut self) -> Result<bool> {
        if self.lookahead.is_some() {
            return Ok(true);
        }
        let mut byte = [0u8; 1];
        loop {
            match self.src.read(&mut byte) {
                Ok(0) => return Ok(false),
                Ok(_) => {
                    self.offset += 1;
                    self.lookahead = Some(byte[0]);
                    return Ok(true);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return self.fail(Error::io_at("probe next envelope", self.offset, 1, e)),
            }
        }
    }

    fn start_envelope(&mut self) -> Result<StreamEvent> {
        self.directives = self.read_u8("read envelope directives")?;
        self.schema = self.read_u8("read envelope schema version")?;
        self.taxonomy_id = self.read_i16("read envelope taxonomy")?;
        let size = self.read_u32("read envelope size")? as usize;
        if size < ENVELOPE_HEADER_SIZE {
            return self.fail(Error::BadEncode(format!(
                "envelope size {} is smaller than its header",
                size
            )));
        }
        self.taxonomy = self
            .settings
            .taxonomy_resolver
            .as_ref()
            .and_then(|resolve| resolve(self.taxonomy_id));
        self.frames.push(Frame {
            size,
            consumed: ENVELOPE_HEADER_SIZE,
        });
        self.clear_field();
        Ok(StreamEvent::MessageStart)
    }

    fn read_field(&mut self) -> Result<StreamEvent> {
        let prefix = FieldPrefix::from_byte(self.read_u8("read field prefix")?);
        let ty = self.read_u8("read field type")?;
        let mut header = 2usize;

        let ordinal = if prefix.has_ordinal {
            header += 2;
            Some(self.read_i16("read field ordinal")?)
        } else {
            None
        };

        let mut name = if prefix.has_name {
            let len = self.read_u8("read field name length")? as usize;
            let raw = self.read_buf("read field name", len)?;
            header += 1 + len;
            match String::from_utf8(raw) {
                Ok(s) => Some(s),
                Err(e) => {
                    return self.fail(Error::BadEncode(format!(
                        "invalid UTF-8 in field name: {}",
                        e
                    )))
                }
            }
        } else {
            None
        };

        // Taxonomy fill-in: a miss just leaves the name absent.
        if name.is_none() {
            if let (Some(ordinal), Some(taxonomy)) = (ordinal, self.taxonomy.as_ref()) {
                name = taxonomy.field_name(ordinal).map(str::to_string);
            }
        }

        let size = if ty == type_id::MESSAGE {
            if prefix.fixed_width {
                return self.fail(Error::BadEncode(
                    "sub-message field declared fixed width".to_string(),
                ));
            }
            let (sz, read) = self.read_var_size(prefix.var_size_bytes)?;
            header += read;
            sz
        } else {
            match self.dict.fixed_size(ty) {
                Some(fixed) => {
                    if !prefix.fixed_width {
                        return self.fail(Error::BadEncode(format!(
                            "fixed-width type {} declared variable width",
                            ty
                        )));
                    }
                    fixed
                }
                None => {
                    if prefix.fixed_width {
                        if wire_type::builtin(ty).is_some() {
                            return self.fail(Error::BadEncode(format!(
                                "variable-width type {} declared fixed width",
                                ty
                            )));
                        }
                        // No way to know how many bytes to skip.
                        return self.fail(Error::UnknownFixedType(ty));
                    }
                    let (sz, read) = self.read_var_size(prefix.var_size_bytes)?;
                    header += read;
                    sz
                }
            }
        };

        let frame = self.frames.last().expect("field read inside a frame");
        let remaining = frame.size - frame.consumed;
        if header + size > remaining {
            return self.fail(Error::BadEncode(format!(
                "field of {} bytes overruns its frame ({} left)",
                header + size,
                remaining
            )));
        }

        self.f_name = name;
        self.f_ordinal = ordinal;
        self.f_type = Some(ty);

        if ty == type_id::MESSAGE {
            if self.frames.len() >= MAX_DEPTH {
                return self.fail(Error::DepthLimit);
            }
            self.frames.last_mut().expect("checked").consumed += header;
            self.frames.push(Frame { size, consumed: 0 });
            self.f_value = None;
            return Ok(StreamEvent::SubmessageFieldStart);
        }

        let payload = self.read_buf("read field payload", size)?;
        let value = match wire_type::decode_value(ty, &payload) {
            Ok(v) => v,
            Err(e) => return self.fail(e),
        };
        self.frames.last_mut().expect("checked").consumed += header + size;
        self.f_value = Some(value);
        Ok(StreamEvent::SimpleField)
    }

    fn read_var_size(&mut self, width: u8) -> Result<(usize, usize)> {
        let size = match width {
            0 => 0,
            1 => self.read_u8("read field size")? as usize,
            2 => self.read_u16("read field size")? as usize,
            _ => self.read_u32("read field size")? as usize,
        };
        Ok((size, width as usize))
    }
}

impl<R: Read> StreamReader for BinaryReader<R> {
    fn has_next(&mut self) -> Result<bool> {
        if self.errored {
            return Ok(false);
        }
        if !self.frames.is_empty() {
            return Ok(true);
        }
        self.probe()
    }

    fn move_next(&mut self) -> Result<StreamEvent> {
        if self.errored {
            return Err(Error::BadEncode(
                "stream reader used after an error".to_string(),
            ));
        }

        if self.frames.is_empty() {
            if !self.probe()? {
                return Ok(StreamEvent::NoElement);
            }
            return self.start_envelope();
        }

        let top = self.frames.last().expect("checked non-empty");
        if top.consumed >= top.size {
            if top.consumed > top.size {
                let (declared, actual) = (top.size, top.consumed);
                return self.fail(Error::SizeMismatch { declared, actual });
            }
            let closed = self.frames.pop().expect("checked non-empty");
            self.clear_field();
            return if let Some(parent) = self.frames.last_mut() {
                parent.consumed += closed.size;
                Ok(StreamEvent::SubmessageFieldEnd)
            } else {
                Ok(StreamEvent::MessageEnd)
            };
        }

        self.read_field()
    }

    fn field_name(&self) -> Option<&str> {
        self.f_name.as_deref()
    }

    fn field_ordinal(&self) -> Option<i16> {
        self.f_ordinal
    }

    fn field_type(&self) -> Option<u8> {
        self.f_type
    }

    fn field_value(&self) -> Option<&Value> {
        self.f_value.as_ref()
    }

    fn processing_directives(&self) -> u8 {
        self.directives
    }

    fn schema_version(&self) -> u8 {
        self.schema
    }

    fn taxonomy_id(&self) -> i16 {
        self.taxonomy_id
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::stream::read_envelope;

    fn read_all(bytes: &[u8]) -> Result<crate::envelope::Envelope> {
        let mut reader = BinaryReader::new(bytes);
        read_envelope(&mut reader)
    }

    #[test]
    fn known_layout() {
        // {"i": 1234} as an int field inside an 16-byte envelope.
        let bytes = [
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, // header
            0x88, 0x04, 0x01, b'i', 0x00, 0x00, 0x04, 0xd2, // field
        ];
        let env = read_all(&bytes).unwrap();
        assert_eq!(env.message.len(), 1);
        assert_eq!(env.message.i32_by_name("i"), Some(1234));
    }

    #[test]
    fn empty_stream() {
        let mut reader = BinaryReader::new(&[][..]);
        assert!(!reader.has_next().unwrap());
        assert_eq!(reader.move_next().unwrap(), StreamEvent::NoElement);
    }

    #[test]
    fn truncated_header() {
        let bytes = [0x00, 0x00, 0x00];
        let mut reader = BinaryReader::new(&bytes[..]);
        assert!(reader.has_next().unwrap());
        assert!(reader.move_next().is_err());
        // Terminal after the error.
        assert!(!reader.has_next().unwrap());
        assert!(reader.move_next().is_err());
    }

    #[test]
    fn truncated_payload() {
        let bytes = [
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, // claims 16 bytes
            0x88, 0x04, 0x01, b'i', 0x00, 0x00, // payload cut short
        ];
        assert!(read_all(&bytes).is_err());
    }

    #[test]
    fn envelope_smaller_than_header() {
        let bytes = [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04];
        assert!(read_all(&bytes).is_err());
    }

    #[test]
    fn field_overruns_frame() {
        // Envelope claims 12 bytes total but the field needs more.
        let bytes = [
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0c, //
            0x88, 0x04, 0x01, b'i', 0x00, 0x00, 0x04, 0xd2,
        ];
        assert!(read_all(&bytes).is_err());
    }

    #[test]
    fn unknown_fixed_type_is_fatal() {
        // Type id 200 with the fixed-width bit set and no recovery size.
        let bytes = [
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0a, //
            0x80, 200,
        ];
        match read_all(&bytes) {
            Err(Error::UnknownFixedType(200)) => {}
            other => panic!("expected UnknownFixedType, got {:?}", other),
        }
    }

    #[test]
    fn unknown_fixed_type_with_recovery_size() {
        let bytes = [
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0d, //
            0x80, 200, 0xaa, 0xbb, 0xcc,
        ];
        let mut dict = TypeDictionary::new();
        dict.register_fixed(200, 3);
        let mut reader = BinaryReader::new(&bytes[..]).dictionary(dict);
        let env = read_envelope(&mut reader).unwrap();
        assert_eq!(
            env.message.field_at(0).unwrap().value(),
            &Value::Unknown {
                type_id: 200,
                bytes: vec![0xaa, 0xbb, 0xcc],
            }
        );
    }

    #[test]
    fn unknown_variable_type_roundtrips() {
        let bytes = [
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0d, //
            0x20, 200, 0x02, 0xaa, 0xbb,
        ];
        let env = read_all(&bytes).unwrap();
        assert_eq!(
            env.message.field_at(0).unwrap().value(),
            &Value::Unknown {
                type_id: 200,
                bytes: vec![0xaa, 0xbb],
            }
        );
    }

    #[test]
    fn fixed_type_with_variable_prefix_rejected() {
        // int (fixed) flagged as variable width
        let bytes = [
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0e, //
            0x20, 0x04, 0x04, 0x00, 0x00, 0x04,
        ];
        assert!(read_all(&bytes).is_err());
    }

    #[test]
    fn variable_type_with_fixed_prefix_rejected() {
        let bytes = [
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0c, //
            0x80, 0x0e, b'h', b'i',
        ];
        assert!(read_all(&bytes).is_err());
    }

    #[test]
    fn taxonomy_fills_in_names() {
        use crate::taxonomy::MapTaxonomy;
        // Field with ordinal 1 and no name, envelope taxonomy id 4.
        let bytes = [
            0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x10, //
            0x90, 0x04, 0x00, 0x01, 0x00, 0x00, 0x04, 0xd2,
        ];
        let tax: Rc<dyn Taxonomy> = Rc::new(MapTaxonomy::new([(1, "id".to_string())]));
        let settings = CodecSettings {
            taxonomy_resolver: Some(Rc::new(move |id| {
                if id == 4 {
                    Some(tax.clone())
                } else {
                    None
                }
            })),
            ..CodecSettings::default()
        };
        let mut reader = BinaryReader::with_settings(&bytes[..], settings);
        let env = read_envelope(&mut reader).unwrap();
        let field = env.message.field_at(0).unwrap();
        assert_eq!(field.name(), Some("id"));
        assert_eq!(field.ordinal(), Some(1));
        assert_eq!(env.message.i32_by_name("id"), Some(1234));

        // Without a resolver the name stays absent.
        let mut reader = BinaryReader::new(&bytes[..]);
        let env = read_envelope(&mut reader).unwrap();
        assert_eq!(env.message.field_at(0).unwrap().name(), None);
    }

    #[test]
    fn two_envelopes_back_to_back() {
        let one = [
            0x00u8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, //
            0x88, 0x04, 0x01, b'i', 0x00, 0x00, 0x04, 0xd2,
        ];
        let mut bytes = one.to_vec();
        bytes.extend_from_slice(&one);
        let mut reader = BinaryReader::new(&bytes[..]);
        let first = read_envelope(&mut reader).unwrap();
        assert!(reader.has_next().unwrap());
        let second = read_envelope(&mut reader).unwrap();
        assert_eq!(first.message, second.message);
        assert!(!reader.has_next().unwrap());
    }
}

//! The binary stream writer.
//!
//! Events are encoded into an internal buffer so that the size of every
//! sub-message, and of the envelope itself, can be backpatched once known.
//! Simple fields pick the narrowest size width that fits their payload;
//! sub-message fields always reserve the four-byte width because their size
//! is unknown until they close.

use std::fmt;
use std::io::Write;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::prefix::FieldPrefix;
use crate::stream::StreamWriter;
use crate::taxonomy::{Taxonomy, TaxonomyResolver};
use crate::value::Value;
use crate::wire_type::{self, type_id, TypeDictionary};
use crate::{MAX_DEPTH, MAX_NAME_LEN};

/// Options shared by the binary reader and writer.
#[derive(Clone)]
pub struct CodecSettings {
    /// Maps an envelope's taxonomy id to a taxonomy. Readers use it to fill
    /// in missing names; writers use it to strip known names down to
    /// ordinals.
    pub taxonomy_resolver: Option<TaxonomyResolver>,
    /// Push each completed envelope to the sink as soon as it closes.
    pub auto_flush_on_message_end: bool,
}

impl CodecSettings {
    pub fn new() -> CodecSettings {
        CodecSettings {
            taxonomy_resolver: None,
            auto_flush_on_message_end: true,
        }
    }
}

impl Default for CodecSettings {
    fn default() -> CodecSettings {
        CodecSettings::new()
    }
}

impl fmt::Debug for CodecSettings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CodecSettings")
            .field("taxonomy_resolver", &self.taxonomy_resolver.is_some())
            .field("auto_flush_on_message_end", &self.auto_flush_on_message_end)
            .finish()
    }
}

/// Writes the binary encoding to any [`Write`] sink.
pub struct BinaryWriter<W: Write> {
    sink: W,
    settings: CodecSettings,
    dict: TypeDictionary,
    buf: Vec<u8>,
    /// Offsets of the reserved four-byte size slots, one per open frame.
    /// The first entry is the envelope's.
    frames: Vec<usize>,
    env_start: usize,
    taxonomy: Option<Rc<dyn Taxonomy>>,
    written: u64,
}

impl<W: Write> BinaryWriter<W> {
    pub fn new(sink: W) -> BinaryWriter<W> {
        BinaryWriter::with_settings(sink, CodecSettings::new())
    }

    pub fn with_settings(sink: W, settings: CodecSettings) -> BinaryWriter<W> {
        BinaryWriter {
            sink,
            settings,
            dict: TypeDictionary::new(),
            buf: Vec::new(),
            frames: Vec::new(),
            env_start: 0,
            taxonomy: None,
            written: 0,
        }
    }

    /// Replace the type dictionary, e.g. to declare fixed sizes for user
    /// type ids so their fields encode with the fixed-width prefix.
    pub fn dictionary(mut self, dict: TypeDictionary) -> BinaryWriter<W> {
        self.dict = dict;
        self
    }

    /// Flush and give back the underlying sink.
    pub fn into_inner(mut self) -> Result<W> {
        self.flush()?;
        Ok(self.sink)
    }

    fn check_name(name: Option<&str>) -> Result<()> {
        if let Some(name) = name {
            if name.len() > MAX_NAME_LEN {
                return Err(Error::BadEncode(format!(
                    "field name of {} bytes exceeds the {}-byte limit",
                    name.len(),
                    MAX_NAME_LEN
                )));
            }
        }
        Ok(())
    }

    /// Writer-side taxonomy substitution: a named field whose name the
    /// taxonomy knows is sent as the bare ordinal.
    fn apply_taxonomy<'a>(
        &self,
        name: Option<&'a str>,
        ordinal: Option<i16>,
    ) -> (Option<&'a str>, Option<i16>) {
        if ordinal.is_none() {
            if let (Some(n), Some(tax)) = (name, self.taxonomy.as_ref()) {
                if let Some(ord) = tax.field_ordinal(n) {
                    return (None, Some(ord));
                }
            }
        }
        (name, ordinal)
    }

    fn push_field_header(
        &mut self,
        prefix: FieldPrefix,
        ty: u8,
        name: Option<&str>,
        ordinal: Option<i16>,
    ) {
        self.buf.push(prefix.to_byte());
        self.buf.push(ty);
        if let Some(ordinal) = ordinal {
            self.buf.extend_from_slice(&ordinal.to_be_bytes());
        }
        if let Some(name) = name {
            self.buf.push(name.len() as u8);
            self.buf.extend_from_slice(name.as_bytes());
        }
    }

    fn push_var_size(&mut self, width: u8, size: usize) {
        match width {
            0 => {}
            1 => self.buf.push(size as u8),
            2 => self.buf.extend_from_slice(&(size as u16).to_be_bytes()),
            _ => self.buf.extend_from_slice(&(size as u32).to_be_bytes()),
        }
    }

    fn patch_size_slot(&mut self, slot: usize, size: usize) -> Result<()> {
        if size > u32::MAX as usize {
            return Err(Error::BadEncode(format!(
                "frame of {} bytes cannot be size-encoded",
                size
            )));
        }
        self.buf[slot..slot + 4].copy_from_slice(&(size as u32).to_be_bytes());
        Ok(())
    }

    fn flush_buf(&mut self) -> Result<()> {
        self.sink
            .write_all(&self.buf)
            .map_err(|e| Error::io_at("write envelope", self.written, self.buf.len(), e))?;
        self.written += self.buf.len() as u64;
        self.buf.clear();
        self.env_start = 0;
        self.sink
            .flush()
            .map_err(|e| Error::io_at("flush sink", self.written, 0, e))
    }
}

impl<W: Write> StreamWriter for BinaryWriter<W> {
    fn start_message(
        &mut self,
        processing_directives: u8,
        schema_version: u8,
        taxonomy_id: i16,
    ) -> Result<()> {
        if !self.frames.is_empty() {
            return Err(Error::BadEncode("message already in progress".to_string()));
        }
        self.taxonomy = self
            .settings
            .taxonomy_resolver
            .as_ref()
            .and_then(|resolve| resolve(taxonomy_id));
        self.env_start = self.buf.len();
        self.buf.push(processing_directives);
        self.buf.push(schema_version);
        self.buf.extend_from_slice(&taxonomy_id.to_be_bytes());
        let slot = self.buf.len();
        self.buf.extend_from_slice(&[0u8; 4]);
        self.frames.push(slot);
        Ok(())
    }

    fn write_field(
        &mut self,
        name: Option<&str>,
        ordinal: Option<i16>,
        value: &Value,
    ) -> Result<()> {
        if self.frames.is_empty() {
            return Err(Error::BadEncode("no message in progress".to_string()));
        }

        // A tree-valued field is unrolled into sub-message events.
        if let Value::Message(sub) = value {
            self.start_submessage(name, ordinal)?;
            for field in sub.iter() {
                self.write_field(field.name(), field.ordinal(), field.value())?;
            }
            return self.end_submessage();
        }

        Self::check_name(name)?;
        let (name, ordinal) = self.apply_taxonomy(name, ordinal);

        let ty = value.type_id();
        let size = wire_type::payload_size(value).expect("message handled above");
        let prefix = match self.dict.fixed_size(ty) {
            Some(fixed) => {
                if fixed != size {
                    return Err(Error::BadEncode(format!(
                        "payload of {} bytes does not match the {}-byte fixed type {}",
                        size, fixed, ty
                    )));
                }
                FieldPrefix::fixed(ordinal.is_some(), name.is_some())
            }
            None => FieldPrefix::variable(size, ordinal.is_some(), name.is_some())?,
        };

        self.push_field_header(prefix, ty, name, ordinal);
        if !prefix.fixed_width {
            self.push_var_size(prefix.var_size_bytes, size);
        }
        wire_type::encode_value(&mut self.buf, value)?;
        Ok(())
    }

    fn start_submessage(&mut self, name: Option<&str>, ordinal: Option<i16>) -> Result<()> {
        if self.frames.is_empty() {
            return Err(Error::BadEncode("no message in progress".to_string()));
        }
        if self.frames.len() >= MAX_DEPTH {
            return Err(Error::DepthLimit);
        }
        Self::check_name(name)?;
        let (name, ordinal) = self.apply_taxonomy(name, ordinal);

        // Size unknown until the sub-message closes, so reserve the full
        // four-byte width.
        let prefix = FieldPrefix {
            fixed_width: false,
            var_size_bytes: 4,
            has_ordinal: ordinal.is_some(),
            has_name: name.is_some(),
        };
        self.push_field_header(prefix, type_id::MESSAGE, name, ordinal);
        let slot = self.buf.len();
        self.buf.extend_from_slice(&[0u8; 4]);
        self.frames.push(slot);
        Ok(())
    }

    fn end_submessage(&mut self) -> Result<()> {
        if self.frames.len() < 2 {
            return Err(Error::BadEncode("no sub-message in progress".to_string()));
        }
        let slot = self.frames.pop().expect("length checked");
        let size = self.buf.len() - (slot + 4);
        self.patch_size_slot(slot, size)
    }

    fn end_message(&mut self) -> Result<()> {
        if self.frames.len() != 1 {
            return Err(Error::BadEncode(
                "sub-messages still open at message end".to_string(),
            ));
        }
        let slot = self.frames.pop().expect("length checked");
        let size = self.buf.len() - self.env_start;
        self.patch_size_slot(slot, size)?;
        self.taxonomy = None;
        if self.settings.auto_flush_on_message_end {
            self.flush_buf()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if !self.frames.is_empty() {
            return Err(Error::BadEncode(
                "cannot flush inside an open message".to_string(),
            ));
        }
        if self.buf.is_empty() {
            return self
                .sink
                .flush()
                .map_err(|e| Error::io_at("flush sink", self.written, 0, e));
        }
        self.flush_buf()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::decode::BinaryReader;
    use crate::envelope::Envelope;
    use crate::message::Message;
    use crate::stream::{read_envelope, write_envelope};

    fn encode(msg: &Message) -> Vec<u8> {
        let mut writer = BinaryWriter::new(Vec::new());
        write_envelope(&mut writer, &Envelope::new(msg.clone())).unwrap();
        writer.into_inner().unwrap()
    }

    fn decode(bytes: &[u8]) -> Message {
        let mut reader = BinaryReader::new(bytes);
        read_envelope(&mut reader).unwrap().message
    }

    #[test]
    fn known_layout() {
        let msg = Message::new().with("i", 1234i32).unwrap();
        let bytes = encode(&msg);
        assert_eq!(
            bytes,
            [
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, // header
                0x88, 0x04, 0x01, b'i', 0x00, 0x00, 0x04, 0xd2, // field
            ]
        );
    }

    #[test]
    fn envelope_size_matches_output() {
        let inner = Message::new().with("b", "fred").unwrap();
        let msg = Message::new()
            .with("a", 7i32)
            .unwrap()
            .with("outer", inner)
            .unwrap();
        let bytes = encode(&msg);
        let declared = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        assert_eq!(declared, bytes.len());
    }

    #[test]
    fn roundtrip_rich_message() {
        use crate::datetime::{Accuracy, DateTime};
        let sub = Message::new()
            .with("a", 7i32)
            .unwrap()
            .with("b", "fred")
            .unwrap();
        let mut msg = Message::new();
        msg.add("bool", true).unwrap();
        msg.add("byte", -5i8).unwrap();
        msg.add("short", -300i16).unwrap();
        msg.add("int", 1234i32).unwrap();
        msg.add("long", 1i64 << 40).unwrap();
        msg.add("float", 123.45f32).unwrap();
        msg.add("exp", -1_234_500.0f64).unwrap();
        msg.add("str", "hello").unwrap();
        msg.add("empty", "").unwrap();
        msg.add("bytes", vec![1u8, 2, 3]).unwrap();
        msg.add("fixed", vec![0u8; 16]).unwrap();
        msg.add("ints", vec![1i32, 2, 4]).unwrap();
        msg.add("doubles", vec![0.5f64, -0.25]).unwrap();
        msg.add(
            "when",
            DateTime::new(-1_261_397_083, 456_000_000, Accuracy::Nanosecond, Some(0)).unwrap(),
        )
        .unwrap();
        msg.add("outer", sub).unwrap();
        msg.add_ordinal(9, "by ordinal");
        msg.push(crate::message::Field::new(None, None, Value::Indicator).unwrap());

        let bytes = encode(&msg);
        assert_eq!(decode(&bytes), msg);
    }

    #[test]
    fn narrowest_size_widths() {
        use rand::prelude::*;
        let mut rng = rand::thread_rng();
        // Strings are always variable width, so every boundary exercises the
        // size encoding rather than a fixed-array id.
        for (len, width) in [
            (0usize, 0usize),
            (1, 1),
            (255, 1),
            (256, 2),
            (65535, 2),
            (65536, 4),
        ] {
            let payload: String = rand::distributions::Alphanumeric
                .sample_iter(&mut rng)
                .take(len)
                .map(char::from)
                .collect();
            let msg = Message::new().with("d", payload.clone()).unwrap();
            let bytes = encode(&msg);
            let prefix = FieldPrefix::from_byte(bytes[8]);
            assert!(!prefix.fixed_width);
            assert_eq!(prefix.var_size_bytes as usize, width, "len = {}", len);
            assert_eq!(decode(&bytes).str_by_name("d").unwrap(), payload);
        }
    }

    #[test]
    fn zero_length_payload_omits_size() {
        let msg = Message::new().with("e", "").unwrap();
        let bytes = encode(&msg);
        // 8 header + prefix + type + namelen + name
        assert_eq!(bytes.len(), 12);
        assert_eq!(bytes[8], 0x08);
    }

    #[test]
    fn submessage_always_four_byte_size() {
        let msg = Message::new()
            .with("s", Message::new().with("x", 1i32).unwrap())
            .unwrap();
        let bytes = encode(&msg);
        let prefix = FieldPrefix::from_byte(bytes[8]);
        assert!(!prefix.fixed_width);
        assert_eq!(prefix.var_size_bytes, 4);
        assert_eq!(decode(&bytes), msg);
    }

    #[test]
    fn writer_taxonomy_substitution() {
        use crate::taxonomy::MapTaxonomy;
        let tax: Rc<dyn Taxonomy> = Rc::new(MapTaxonomy::new([(7, "name".to_string())]));
        let resolver: TaxonomyResolver = {
            let tax = tax.clone();
            Rc::new(move |id| if id == 1 { Some(tax.clone()) } else { None })
        };
        let settings = CodecSettings {
            taxonomy_resolver: Some(resolver.clone()),
            ..CodecSettings::new()
        };

        let mut writer = BinaryWriter::with_settings(Vec::new(), settings.clone());
        let mut env = Envelope::new(Message::new().with("name", "fred").unwrap());
        env.taxonomy_id = 1;
        write_envelope(&mut writer, &env).unwrap();
        let bytes = writer.into_inner().unwrap();

        // The name is gone from the wire; the prefix carries only an ordinal.
        let prefix = FieldPrefix::from_byte(bytes[8]);
        assert!(prefix.has_ordinal);
        assert!(!prefix.has_name);

        // A resolving reader restores it.
        let mut reader = BinaryReader::with_settings(&bytes[..], settings);
        let decoded = read_envelope(&mut reader).unwrap();
        assert_eq!(decoded.message.str_by_name("name"), Some("fred"));

        // A plain reader sees just the ordinal.
        let mut reader = BinaryReader::new(&bytes[..]);
        let decoded = read_envelope(&mut reader).unwrap();
        let field = decoded.message.field_at(0).unwrap();
        assert_eq!(field.name(), None);
        assert_eq!(field.ordinal(), Some(7));
    }

    #[test]
    fn auto_flush_off_buffers_output() {
        let settings = CodecSettings {
            auto_flush_on_message_end: false,
            ..CodecSettings::new()
        };
        let mut writer = BinaryWriter::with_settings(Vec::new(), settings);
        write_envelope(&mut writer, &Envelope::new(Message::new().with("i", 1i32).unwrap()))
            .unwrap();
        write_envelope(&mut writer, &Envelope::new(Message::new().with("j", 2i32).unwrap()))
            .unwrap();
        let bytes = writer.into_inner().unwrap();
        let mut reader = BinaryReader::new(&bytes[..]);
        let first = read_envelope(&mut reader).unwrap();
        let second = read_envelope(&mut reader).unwrap();
        assert_eq!(first.message.i32_by_name("i"), Some(1));
        assert_eq!(second.message.i32_by_name("j"), Some(2));
    }

    #[test]
    fn unbalanced_calls_rejected() {
        let mut writer = BinaryWriter::new(Vec::new());
        assert!(writer.write_field(Some("x"), None, &Value::Int(1)).is_err());
        assert!(writer.end_message().is_err());
        writer.start_message(0, 0, 0).unwrap();
        assert!(writer.end_submessage().is_err());
        assert!(writer.start_message(0, 0, 0).is_err());
        writer.start_submessage(None, Some(1)).unwrap();
        assert!(writer.flush().is_err());
    }
}

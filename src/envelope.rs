//! The framing around one top-level message.

use crate::decode::BinaryReader;
use crate::encode::{BinaryWriter, CodecSettings};
use crate::error::Result;
use crate::message::Message;
use crate::stream;

/// One top-level message together with its envelope attributes. The binary
/// framing adds an eight-byte header carrying these attributes and the total
/// envelope size.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Envelope {
    pub processing_directives: u8,
    pub schema_version: u8,
    pub taxonomy_id: i16,
    pub message: Message,
}

impl Envelope {
    /// Wrap a message with zeroed attributes.
    pub fn new(message: Message) -> Envelope {
        Envelope {
            processing_directives: 0,
            schema_version: 0,
            taxonomy_id: 0,
            message,
        }
    }

    /// Encode to a byte vector with default settings.
    pub fn encode_to_vec(&self) -> Result<Vec<u8>> {
        self.encode_to_vec_with(CodecSettings::new())
    }

    /// Encode to a byte vector with explicit codec settings.
    pub fn encode_to_vec_with(&self, settings: CodecSettings) -> Result<Vec<u8>> {
        let mut writer = BinaryWriter::with_settings(Vec::new(), settings);
        stream::write_envelope(&mut writer, self)?;
        writer.into_inner()
    }

    /// Decode a single envelope from a byte slice with default settings.
    pub fn decode_from_slice(bytes: &[u8]) -> Result<Envelope> {
        Envelope::decode_from_slice_with(bytes, CodecSettings::default())
    }

    /// Decode a single envelope from a byte slice with explicit settings.
    pub fn decode_from_slice_with(bytes: &[u8], settings: CodecSettings) -> Result<Envelope> {
        let mut reader = BinaryReader::with_settings(bytes, settings);
        stream::read_envelope(&mut reader)
    }
}

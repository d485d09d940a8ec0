//! The JSON encoding of the message stream.
//!
//! A JSON object maps to a message, members map to fields, and nested
//! objects map to sub-messages. Member keys that look like integers can be
//! read back as ordinals, repeated field names collapse to JSON arrays, and
//! uniform numeric JSON arrays become primitive-array fields. Envelope
//! attributes ride along as reserved members at the head of the top-level
//! object.

mod lexer;
mod reader;
mod writer;

pub use reader::JsonReader;
pub use writer::JsonWriter;

use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::stream;

/// Options controlling both JSON directions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JsonSettings {
    /// Member name carrying the envelope processing directives. `None`
    /// suppresses the member entirely.
    pub processing_directives_field: Option<String>,
    /// Member name carrying the envelope schema version.
    pub schema_version_field: Option<String>,
    /// Member name carrying the envelope taxonomy id.
    pub taxonomy_field: Option<String>,
    /// When a field has both a name and an ordinal, emit the name. Otherwise
    /// whichever is present is emitted either way.
    pub prefer_field_names: bool,
    /// Treat integer-shaped member keys as ordinals when reading.
    pub numbers_are_ordinals: bool,
}

impl Default for JsonSettings {
    fn default() -> JsonSettings {
        JsonSettings {
            processing_directives_field: Some("fudgeProcessingDirectives".to_string()),
            schema_version_field: Some("fudgeSchemaVersion".to_string()),
            taxonomy_field: Some("fudgeTaxonomy".to_string()),
            prefer_field_names: true,
            numbers_are_ordinals: true,
        }
    }
}

/// Render an envelope as a JSON string with default settings.
pub fn to_string(envelope: &Envelope) -> Result<String> {
    to_string_with(envelope, JsonSettings::default())
}

/// Render an envelope as a JSON string.
pub fn to_string_with(envelope: &Envelope, settings: JsonSettings) -> Result<String> {
    let mut writer = JsonWriter::with_settings(Vec::new(), settings);
    stream::write_envelope(&mut writer, envelope)?;
    let bytes = writer.into_inner()?;
    String::from_utf8(bytes).map_err(|e| Error::BadEncode(format!("non-UTF-8 JSON output: {}", e)))
}

/// Parse a JSON string into an envelope with default settings.
pub fn from_str(src: &str) -> Result<Envelope> {
    from_str_with(src, JsonSettings::default())
}

/// Parse a JSON string into an envelope.
pub fn from_str_with(src: &str, settings: JsonSettings) -> Result<Envelope> {
    let mut reader = JsonReader::with_settings(src, settings);
    stream::read_envelope(&mut reader)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::decode::BinaryReader;
    use crate::message::Message;
    use crate::stream::StreamPipe;

    #[test]
    fn json_to_binary_and_back() {
        let env = from_str(r#"{"outer": {"a": 7, "b": "fred"}}"#).unwrap();
        let bytes = env.encode_to_vec().unwrap();
        let decoded = Envelope::decode_from_slice(&bytes).unwrap();
        assert_eq!(decoded.message, env.message);
        let outer = decoded.message.message_by_name("outer").unwrap();
        assert_eq!(outer.i32_by_name("a"), Some(7));
        assert_eq!(outer.str_by_name("b"), Some("fred"));
    }

    #[test]
    fn mixed_name_ordinal_json_is_stable() {
        let src = r#"{"1":"ord","A":"name","B":"name and ord","":"empty"}"#;
        let env = from_str(src).unwrap();
        let out = to_string(&env).unwrap();
        let expected: serde_json::Value = serde_json::from_str(src).unwrap();
        let actual: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn tree_to_json_to_tree() {
        let inner = Message::new().with("deep", "v").unwrap();
        let msg = Message::new()
            .with("nums", vec![1i32, 2, 4])
            .unwrap()
            .with("s", "x")
            .unwrap()
            .with("inner", inner)
            .unwrap();
        let text = to_string(&Envelope::new(msg.clone())).unwrap();
        let back = from_str(&text).unwrap();
        assert_eq!(back.message, msg);
    }

    #[test]
    fn envelope_attributes_survive_json() {
        let mut env = Envelope::new(Message::new().with("x", 1i32).unwrap());
        env.processing_directives = 1;
        env.schema_version = 2;
        env.taxonomy_id = -3;
        let text = to_string(&env).unwrap();
        let back = from_str(&text).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn binary_pipes_straight_into_json() {
        let inner = Message::new().with("a", 7i32).unwrap();
        let msg = Message::new().with("outer", inner).unwrap();
        let bytes = Envelope::new(msg).encode_to_vec().unwrap();

        // No intermediate tree: binary events feed the JSON writer directly.
        let reader = BinaryReader::new(&bytes[..]);
        let writer = JsonWriter::new(Vec::new());
        let mut pipe = StreamPipe::new(reader, writer);
        pipe.run().unwrap();
        let (_, writer) = pipe.release();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(text, r#"{"outer":{"a":7}}"#);
    }

    #[test]
    fn json_repeated_fields_survive_binary() {
        let env = from_str(r#"{"mixed": [1, 2, "fred", 2.3]}"#).unwrap();
        let bytes = env.encode_to_vec().unwrap();
        let decoded = Envelope::decode_from_slice(&bytes).unwrap();
        assert_eq!(decoded.message.fields_by_name("mixed").count(), 4);
        let text = to_string(&decoded).unwrap();
        assert_eq!(text, r#"{"mixed":[1,2,"fred",2.3]}"#);
    }
}

//! The JSON stream writer.
//!
//! Members are grouped before they are committed: successive fields sharing
//! a JSON key collapse into one array member, which is the inverse of the
//! reader's repeated-field handling. Each open object buffers its rendered
//! members so sub-messages can be grouped the same way.

use std::io::Write;

use super::JsonSettings;
use crate::error::{Error, Result};
use crate::stream::StreamWriter;
use crate::value::Value;
use crate::{MAX_DEPTH, MAX_NAME_LEN};

struct JsonFrame {
    /// This object's key in its parent; `None` for the top-level object.
    key: Option<String>,
    /// Committed members, comma-joined.
    buf: String,
    /// Key of the member group still being collected.
    pending_key: Option<String>,
    /// Rendered fragments of the pending group.
    pending: Vec<String>,
}

impl JsonFrame {
    fn new(key: Option<String>) -> JsonFrame {
        JsonFrame {
            key,
            buf: String::new(),
            pending_key: None,
            pending: Vec::new(),
        }
    }

    /// Commit the pending group as a single member or an array member.
    fn flush_group(&mut self) {
        let key = match self.pending_key.take() {
            Some(key) => key,
            None => return,
        };
        if !self.buf.is_empty() {
            self.buf.push(',');
        }
        self.buf.push_str(&quote(&key));
        self.buf.push(':');
        if self.pending.len() == 1 {
            self.buf.push_str(&self.pending[0]);
        } else {
            self.buf.push('[');
            self.buf.push_str(&self.pending.join(","));
            self.buf.push(']');
        }
        self.pending.clear();
    }

    fn add(&mut self, key: String, fragment: String) {
        if self.pending_key.as_deref() != Some(key.as_str()) {
            self.flush_group();
            self.pending_key = Some(key);
        }
        self.pending.push(fragment);
    }

    fn render(mut self) -> String {
        self.flush_group();
        format!("{{{}}}", self.buf)
    }
}

/// Writes the JSON encoding to any [`Write`] sink, one line per envelope.
pub struct JsonWriter<W: Write> {
    sink: W,
    settings: JsonSettings,
    frames: Vec<JsonFrame>,
    written: u64,
}

impl<W: Write> JsonWriter<W> {
    pub fn new(sink: W) -> JsonWriter<W> {
        JsonWriter::with_settings(sink, JsonSettings::default())
    }

    pub fn with_settings(sink: W, settings: JsonSettings) -> JsonWriter<W> {
        JsonWriter {
            sink,
            settings,
            frames: Vec::new(),
            written: 0,
        }
    }

    /// Flush and give back the underlying sink.
    pub fn into_inner(mut self) -> Result<W> {
        self.flush()?;
        Ok(self.sink)
    }

    /// The JSON member key for a field, honoring `prefer_field_names`.
    fn key_for(&self, name: Option<&str>, ordinal: Option<i16>) -> String {
        let (primary, fallback) = if self.settings.prefer_field_names {
            (name.map(str::to_string), ordinal.map(|o| o.to_string()))
        } else {
            (ordinal.map(|o| o.to_string()), name.map(str::to_string))
        };
        primary.or(fallback).unwrap_or_default()
    }
}

impl<W: Write> StreamWriter for JsonWriter<W> {
    fn start_message(
        &mut self,
        processing_directives: u8,
        schema_version: u8,
        taxonomy_id: i16,
    ) -> Result<()> {
        if !self.frames.is_empty() {
            return Err(Error::BadEncode("message already in progress".to_string()));
        }
        let mut root = JsonFrame::new(None);
        // Envelope attributes lead the object; zero values stay implicit so
        // attribute-free messages render without extra members.
        if let Some(key) = self.settings.processing_directives_field.as_ref() {
            if processing_directives != 0 {
                root.add(key.clone(), processing_directives.to_string());
            }
        }
        if let Some(key) = self.settings.schema_version_field.as_ref() {
            if schema_version != 0 {
                root.add(key.clone(), schema_version.to_string());
            }
        }
        if let Some(key) = self.settings.taxonomy_field.as_ref() {
            if taxonomy_id != 0 {
                root.add(key.clone(), taxonomy_id.to_string());
            }
        }
        self.frames.push(root);
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

        if let Value::Message(sub) = value {
            self.start_submessage(name, ordinal)?;
            for field in sub.iter() {
                self.write_field(field.name(), field.ordinal(), field.value())?;
            }
            return self.end_submessage();
        }

        if let Some(name) = name {
            if name.len() > MAX_NAME_LEN {
                return Err(Error::BadEncode(format!(
                    "field name of {} bytes exceeds the {}-byte limit",
                    name.len(),
                    MAX_NAME_LEN
                )));
            }
        }

        let key = self.key_for(name, ordinal);
        let fragment = render_value(value)?;
        self.frames
            .last_mut()
            .expect("checked non-empty")
            .add(key, fragment);
        Ok(())
    }

    fn start_submessage(&mut self, name: Option<&str>, ordinal: Option<i16>) -> Result<()> {
        if self.frames.is_empty() {
            return Err(Error::BadEncode("no message in progress".to_string()));
        }
        if self.frames.len() >= MAX_DEPTH {
            return Err(Error::DepthLimit);
        }
        let key = self.key_for(name, ordinal);
        self.frames.push(JsonFrame::new(Some(key)));
        Ok(())
    }

    fn end_submessage(&mut self) -> Result<()> {
        if self.frames.len() < 2 {
            return Err(Error::BadEncode("no sub-message in progress".to_string()));
        }
        let frame = self.frames.pop().expect("length checked");
        let key = frame.key.clone().expect("sub-message frames carry a key");
        let rendered = frame.render();
        self.frames
            .last_mut()
            .expect("length checked")
            .add(key, rendered);
        Ok(())
    }

    fn end_message(&mut self) -> Result<()> {
        if self.frames.len() != 1 {
            return Err(Error::BadEncode(
                "sub-messages still open at message end".to_string(),
            ));
        }
        let rendered = self.frames.pop().expect("length checked").render();
        self.sink
            .write_all(rendered.as_bytes())
            .map_err(|e| Error::io_at("write json", self.written, rendered.len(), e))?;
        self.written += rendered.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if !self.frames.is_empty() {
            return Err(Error::BadEncode(
                "cannot flush inside an open message".to_string(),
            ));
        }
        self.sink
            .flush()
            .map_err(|e| Error::io_at("flush sink", self.written, 0, e))
    }
}

/// Render a leaf value as a JSON fragment.
fn render_value(value: &Value) -> Result<String> {
    let out = match value {
        Value::Indicator => "null".to_string(),
        Value::Boolean(v) => v.to_string(),
        Value::Byte(v) => v.to_string(),
        Value::Short(v) => v.to_string(),
        Value::Int(v) => v.to_string(),
        Value::Long(v) => v.to_string(),
        Value::Float(v) => render_f32(*v),
        Value::Double(v) => render_f64(*v),
        Value::String(v) => quote(v),
        Value::ByteArray(v) => render_array(v.iter().map(|b| b.to_string())),
        Value::ShortArray(v) => render_array(v.iter().map(|x| x.to_string())),
        Value::IntArray(v) => render_array(v.iter().map(|x| x.to_string())),
        Value::LongArray(v) => render_array(v.iter().map(|x| x.to_string())),
        Value::FloatArray(v) => render_array(v.iter().map(|x| render_f32(*x))),
        Value::DoubleArray(v) => render_array(v.iter().map(|x| render_f64(*x))),
        Value::DateTime(v) => quote(&v.to_string()),
        Value::Unknown { bytes, .. } => render_array(bytes.iter().map(|b| b.to_string())),
        Value::Message(_) => {
            return Err(Error::BadEncode(
                "sub-message rendered structurally, not as a value".to_string(),
            ))
        }
    };
    Ok(out)
}

fn render_array(items: impl Iterator<Item = String>) -> String {
    let mut out = String::from("[");
    let mut first = true;
    for item in items {
        if !first {
            out.push(',');
        }
        first = false;
        out.push_str(&item);
    }
    out.push(']');
    out
}

/// Shortest round-trip rendering that still re-reads as floating point: an
/// integral value keeps a trailing `.0`, or switches to exponent form once
/// the mantissa cannot carry it exactly. Non-finite values have no JSON
/// number form and render as strings.
fn render_f64(v: f64) -> String {
    if v.is_nan() {
        return "\"NaN\"".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "\"Infinity\"" } else { "\"-Infinity\"" }.to_string();
    }
    if v == v.trunc() {
        if v.abs() < 1e16 {
            format!("{:.1}", v)
        } else {
            format!("{:e}", v)
        }
    } else {
        format!("{}", v)
    }
}

fn render_f32(v: f32) -> String {
    if v.is_nan() {
        return "\"NaN\"".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "\"Infinity\"" } else { "\"-Infinity\"" }.to_string();
    }
    if v == v.trunc() {
        if v.abs() < 1e7 {
            format!("{:.1}", v)
        } else {
            format!("{:e}", v)
        }
    } else {
        format!("{}", v)
    }
}

/// Quote and escape a string per RFC 8259.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

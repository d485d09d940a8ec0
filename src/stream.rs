//! The streaming event model.
//!
//! Readers turn a message source into a linear event sequence; writers
//! consume the same sequence. Any reader can feed any writer, which is how
//! the binary codec, the JSON codec, and the in-memory tree interconvert
//! without materializing intermediate trees. [`TreeReader`] and
//! [`TreeWriter`] are the in-memory ends of that pipeline, and
//! [`StreamPipe`] is the pump.

use std::collections::VecDeque;

use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::value::Value;
use crate::MAX_DEPTH;

/// One step of a message stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// A new top-level message begins; envelope attributes are readable.
    MessageStart,
    /// A leaf field; name, ordinal, type, and value are readable.
    SimpleField,
    /// A sub-message field begins; name and ordinal are readable.
    SubmessageFieldStart,
    /// The current sub-message ended.
    SubmessageFieldEnd,
    /// The top-level message ended.
    MessageEnd,
    /// Nothing left to read.
    NoElement,
}

/// A pull source of stream events.
///
/// After [`move_next`](Self::move_next) the current-element accessors
/// describe the event just returned: field accessors are populated for
/// `SimpleField` (all four) and `SubmessageFieldStart` (name, ordinal, and
/// type), and cleared again when a message or sub-message ends. A reader
/// that has returned an error is terminal.
pub trait StreamReader {
    /// Whether another event is available. Between envelopes this may probe
    /// the underlying source; a clean end-of-stream is `false`, not an error.
    fn has_next(&mut self) -> Result<bool>;

    /// Advance to the next event.
    fn move_next(&mut self) -> Result<StreamEvent>;

    fn field_name(&self) -> Option<&str>;
    fn field_ordinal(&self) -> Option<i16>;
    fn field_type(&self) -> Option<u8>;
    fn field_value(&self) -> Option<&Value>;

    /// Envelope attribute, valid from `MessageStart` to `MessageEnd`.
    fn processing_directives(&self) -> u8;
    /// Envelope attribute, valid from `MessageStart` to `MessageEnd`.
    fn schema_version(&self) -> u8;
    /// Envelope attribute, valid from `MessageStart` to `MessageEnd`.
    fn taxonomy_id(&self) -> i16;
}

/// A push sink of stream events.
pub trait StreamWriter {
    /// Begin a top-level message with the given envelope attributes.
    fn start_message(
        &mut self,
        processing_directives: u8,
        schema_version: u8,
        taxonomy_id: i16,
    ) -> Result<()>;

    /// Write one leaf field.
    fn write_field(
        &mut self,
        name: Option<&str>,
        ordinal: Option<i16>,
        value: &Value,
    ) -> Result<()>;

    /// Begin a sub-message field.
    fn start_submessage(&mut self, name: Option<&str>, ordinal: Option<i16>) -> Result<()>;

    /// End the innermost sub-message.
    fn end_submessage(&mut self) -> Result<()>;

    /// End the top-level message.
    fn end_message(&mut self) -> Result<()>;

    /// Push any buffered output to the underlying sink.
    fn flush(&mut self) -> Result<()>;
}

/// Forward one complete top-level message from `reader` to `writer`.
/// Fails if the reader has nothing to offer or ends mid-message.
pub fn pump_message(reader: &mut dyn StreamReader, writer: &mut dyn StreamWriter) -> Result<()> {
    if !reader.has_next()? {
        return Err(Error::BadEncode("no message available to pump".to_string()));
    }
    loop {
        match reader.move_next()? {
            StreamEvent::MessageStart => writer.start_message(
                reader.processing_directives(),
                reader.schema_version(),
                reader.taxonomy_id(),
            )?,
            StreamEvent::SimpleField => {
                let value = reader
                    .field_value()
                    .ok_or_else(|| {
                        Error::BadEncode("reader emitted a field without a value".to_string())
                    })?
                    .clone();
                writer.write_field(reader.field_name(), reader.field_ordinal(), &value)?;
            }
            StreamEvent::SubmessageFieldStart => {
                let name = reader.field_name().map(str::to_string);
                writer.start_submessage(name.as_deref(), reader.field_ordinal())?;
            }
            StreamEvent::SubmessageFieldEnd => writer.end_submessage()?,
            StreamEvent::MessageEnd => {
                writer.end_message()?;
                return Ok(());
            }
            StreamEvent::NoElement => {
                return Err(Error::BadEncode(
                    "stream ended inside a message".to_string(),
                ))
            }
        }
    }
}

/// Write a whole envelope to a stream writer by walking its tree.
pub fn write_envelope(writer: &mut dyn StreamWriter, envelope: &Envelope) -> Result<()> {
    writer.start_message(
        envelope.processing_directives,
        envelope.schema_version,
        envelope.taxonomy_id,
    )?;
    write_fields(writer, &envelope.message)?;
    writer.end_message()
}

fn write_fields(writer: &mut dyn StreamWriter, msg: &Message) -> Result<()> {
    for field in msg {
        match field.value() {
            Value::Message(sub) => {
                writer.start_submessage(field.name(), field.ordinal())?;
                write_fields(writer, sub)?;
                writer.end_submessage()?;
            }
            value => writer.write_field(field.name(), field.ordinal(), value)?,
        }
    }
    Ok(())
}

/// Materialize the next envelope offered by a stream reader.
pub fn read_envelope(reader: &mut dyn StreamReader) -> Result<Envelope> {
    let mut tree = TreeWriter::new();
    pump_message(reader, &mut tree)?;
    tree.take_envelopes()
        .pop()
        .ok_or_else(|| Error::BadEncode("no message available".to_string()))
}

/// Couples a reader to a writer. [`run`](Self::run) pumps every remaining
/// message; the per-message callback can stop the pump early, releasing the
/// reader without consuming the rest of its input.
pub struct StreamPipe<R: StreamReader, W: StreamWriter> {
    reader: R,
    writer: W,
    on_message: Option<Box<dyn FnMut() -> bool>>,
}

impl<R: StreamReader, W: StreamWriter> StreamPipe<R, W> {
    pub fn new(reader: R, writer: W) -> StreamPipe<R, W> {
        StreamPipe {
            reader,
            writer,
            on_message: None,
        }
    }

    /// Invoke `f` after each top-level message. Returning `false` aborts the
    /// pump at that message boundary.
    pub fn on_message_end(mut self, f: impl FnMut() -> bool + 'static) -> StreamPipe<R, W> {
        self.on_message = Some(Box::new(f));
        self
    }

    /// Pump messages until the reader is exhausted or the callback aborts,
    /// then flush the writer.
    pub fn run(&mut self) -> Result<()> {
        while self.reader.has_next()? {
            pump_message(&mut self.reader, &mut self.writer)?;
            if let Some(cb) = self.on_message.as_mut() {
                if !cb() {
                    break;
                }
            }
        }
        self.writer.flush()
    }

    /// Pump exactly one message.
    pub fn process_one(&mut self) -> Result<()> {
        pump_message(&mut self.reader, &mut self.writer)
    }

    /// Give back the reader and writer, consuming the pipe.
    pub fn release(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

/// A stream reader that walks in-memory envelopes.
pub struct TreeReader {
    queue: VecDeque<Envelope>,
    frames: Vec<TreeFrame>,
    walking: bool,
    directives: u8,
    schema: u8,
    taxonomy: i16,
    f_name: Option<String>,
    f_ordinal: Option<i16>,
    f_type: Option<u8>,
    f_value: Option<Value>,
}

struct TreeFrame {
    msg: Message,
    idx: usize,
}

impl TreeReader {
    pub fn new(envelope: Envelope) -> TreeReader {
        let mut queue = VecDeque::new();
        queue.push_back(envelope);
        TreeReader {
            queue,
            frames: Vec::new(),
            walking: false,
            directives: 0,
            schema: 0,
            taxonomy: 0,
            f_name: None,
            f_ordinal: None,
            f_type: None,
            f_value: None,
        }
    }

    /// Walk a bare message with default envelope attributes.
    pub fn from_message(message: Message) -> TreeReader {
        TreeReader::new(Envelope::new(message))
    }

    /// Queue another envelope behind whatever is still unread.
    pub fn push_envelope(&mut self, envelope: Envelope) {
        self.queue.push_back(envelope);
    }

    fn clear_field(&mut self) {
        self.f_name = None;
        self.f_ordinal = None;
        self.f_type = None;
        self.f_value = None;
    }
}

impl StreamReader for TreeReader {
    fn has_next(&mut self) -> Result<bool> {
        Ok(self.walking || !self.queue.is_empty())
    }

    fn move_next(&mut self) -> Result<StreamEvent> {
        if !self.walking {
            let env = match self.queue.pop_front() {
                Some(env) => env,
                None => return Ok(StreamEvent::NoElement),
            };
            self.directives = env.processing_directives;
            self.schema = env.schema_version;
            self.taxonomy = env.taxonomy_id;
            self.frames.push(TreeFrame {
                msg: env.message,
                idx: 0,
            });
            self.walking = true;
            self.clear_field();
            return Ok(StreamEvent::MessageStart);
        }

        let top = self
            .frames
            .last_mut()
            .expect("walking implies an open frame");
        if top.idx < top.msg.len() {
            let idx = top.idx;
            top.idx += 1;
            let field = top.msg.field_at(idx).expect("index checked against len");
            self.f_name = field.name().map(str::to_string);
            self.f_ordinal = field.ordinal();
            self.f_type = Some(field.value().type_id());
            if let Value::Message(sub) = field.value() {
                let sub = sub.clone();
                self.f_value = None;
                self.frames.push(TreeFrame { msg: sub, idx: 0 });
                return Ok(StreamEvent::SubmessageFieldStart);
            }
            self.f_value = Some(field.value().clone());
            return Ok(StreamEvent::SimpleField);
        }

        self.frames.pop();
        self.clear_field();
        if self.frames.is_empty() {
            self.walking = false;
            Ok(StreamEvent::MessageEnd)
        } else {
            Ok(StreamEvent::SubmessageFieldEnd)
        }
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
        self.taxonomy
    }
}

/// A stream writer that builds in-memory envelopes.
#[derive(Default)]
pub struct TreeWriter {
    stack: Vec<(Option<String>, Option<i16>, Message)>,
    directives: u8,
    schema: u8,
    taxonomy: i16,
    completed: Vec<Envelope>,
}

impl TreeWriter {
    pub fn new() -> TreeWriter {
        TreeWriter::default()
    }

    /// All envelopes completed so far, in order.
    pub fn take_envelopes(&mut self) -> Vec<Envelope> {
        std::mem::take(&mut self.completed)
    }
}

impl StreamWriter for TreeWriter {
    fn start_message(
        &mut self,
        processing_directives: u8,
        schema_version: u8,
        taxonomy_id: i16,
    ) -> Result<()> {
        if !self.stack.is_empty() {
            return Err(Error::BadEncode(
                "message already in progress".to_string(),
            ));
        }
        self.directives = processing_directives;
        self.schema = schema_version;
        self.taxonomy = taxonomy_id;
        self.stack.push((None, None, Message::new()));
        Ok(())
    }

    fn write_field(
        &mut self,
        name: Option<&str>,
        ordinal: Option<i16>,
        value: &Value,
    ) -> Result<()> {
        let top = self
            .stack
            .last_mut()
            .ok_or_else(|| Error::BadEncode("no message in progress".to_string()))?;
        top.2.add_full(name, ordinal, value.clone())?;
        Ok(())
    }

    fn start_submessage(&mut self, name: Option<&str>, ordinal: Option<i16>) -> Result<()> {
        if self.stack.is_empty() {
            return Err(Error::BadEncode("no message in progress".to_string()));
        }
        if self.stack.len() > MAX_DEPTH {
            return Err(Error::DepthLimit);
        }
        self.stack
            .push((name.map(str::to_string), ordinal, Message::new()));
        Ok(())
    }

    fn end_submessage(&mut self) -> Result<()> {
        if self.stack.len() < 2 {
            return Err(Error::BadEncode("no sub-message in progress".to_string()));
        }
        let (name, ordinal, msg) = self.stack.pop().expect("length checked");
        let top = self.stack.last_mut().expect("length checked");
        top.2.add_full(name.as_deref(), ordinal, Value::Message(msg))?;
        Ok(())
    }

    fn end_message(&mut self) -> Result<()> {
        if self.stack.len() != 1 {
            return Err(Error::BadEncode(
                "sub-messages still open at message end".to_string(),
            ));
        }
        let (_, _, message) = self.stack.pop().expect("length checked");
        self.completed.push(Envelope {
            processing_directives: self.directives,
            schema_version: self.schema,
            taxonomy_id: self.taxonomy,
            message,
        });
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_message() -> Message {
        let inner = Message::new()
            .with("a", 7i32)
            .unwrap()
            .with("b", "fred")
            .unwrap();
        Message::new().with("outer", inner).unwrap()
    }

    #[test]
    fn tree_reader_event_sequence() {
        let mut reader = TreeReader::from_message(sample_message());
        let mut events = Vec::new();
        while reader.has_next().unwrap() {
            events.push(reader.move_next().unwrap());
        }
        assert_eq!(
            events,
            [
                StreamEvent::MessageStart,
                StreamEvent::SubmessageFieldStart,
                StreamEvent::SimpleField,
                StreamEvent::SimpleField,
                StreamEvent::SubmessageFieldEnd,
                StreamEvent::MessageEnd,
            ]
        );
        assert_eq!(reader.move_next().unwrap(), StreamEvent::NoElement);
    }

    #[test]
    fn field_state_cleared_at_end() {
        let mut reader = TreeReader::from_message(sample_message());
        loop {
            match reader.move_next().unwrap() {
                StreamEvent::SubmessageFieldEnd => {
                    assert!(reader.field_name().is_none());
                    assert!(reader.field_value().is_none());
                }
                StreamEvent::MessageEnd => break,
                _ => {}
            }
        }
    }

    #[test]
    fn tree_to_tree_roundtrip() {
        let msg = sample_message();
        let mut reader = TreeReader::from_message(msg.clone());
        let rebuilt = read_envelope(&mut reader).unwrap();
        assert_eq!(rebuilt.message, msg);
    }

    #[test]
    fn envelope_attributes_forwarded() {
        let env = Envelope {
            processing_directives: 3,
            schema_version: 9,
            taxonomy_id: -2,
            message: sample_message(),
        };
        let mut reader = TreeReader::new(env);
        let rebuilt = read_envelope(&mut reader).unwrap();
        assert_eq!(rebuilt.processing_directives, 3);
        assert_eq!(rebuilt.schema_version, 9);
        assert_eq!(rebuilt.taxonomy_id, -2);
    }

    #[test]
    fn pipe_abort_leaves_rest_unread() {
        let mut reader = TreeReader::from_message(sample_message());
        reader.push_envelope(Envelope::new(sample_message()));
        reader.push_envelope(Envelope::new(sample_message()));
        let pipe = StreamPipe::new(reader, TreeWriter::new());
        let mut pipe = pipe.on_message_end(|| false);
        pipe.run().unwrap();
        let (mut reader, mut writer) = pipe.release();
        assert_eq!(writer.take_envelopes().len(), 1);
        // Two envelopes remain unconsumed.
        assert!(reader.has_next().unwrap());
    }

    #[test]
    fn pipe_runs_all_messages() {
        let mut reader = TreeReader::from_message(sample_message());
        reader.push_envelope(Envelope::new(sample_message()));
        let mut pipe = StreamPipe::new(reader, TreeWriter::new());
        pipe.run().unwrap();
        let (_, mut writer) = pipe.release();
        assert_eq!(writer.take_envelopes().len(), 2);
    }

    #[test]
    fn unbalanced_writer_calls_rejected() {
        let mut w = TreeWriter::new();
        assert!(w.end_message().is_err());
        w.start_message(0, 0, 0).unwrap();
        assert!(w.end_submessage().is_err());
        w.start_submessage(Some("s"), None).unwrap();
        assert!(w.end_message().is_err());
    }
}

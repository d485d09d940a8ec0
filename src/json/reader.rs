//! The JSON stream reader.
//!
//! Lexes JSON text into the message event sequence. Top-level members are
//! parsed lazily; array values need arbitrary lookahead to decide between a
//! primitive-array field and repeated fields, so an array (and anything
//! nested in it) is materialized into a queue of pending events when its
//! opening bracket is seen.

use std::collections::VecDeque;

use super::lexer::{Lexer, Token};
use super::JsonSettings;
use crate::error::{Error, Result};
use crate::stream::{StreamEvent, StreamReader};
use crate::value::Value;
use crate::wire_type::type_id;
use crate::MAX_DEPTH;

enum Pending {
    Start {
        name: Option<String>,
        ordinal: Option<i16>,
    },
    End,
    Field {
        name: Option<String>,
        ordinal: Option<i16>,
        value: Value,
    },
    MessageEnd,
}

struct ObjFrame {
    first: bool,
}

/// Reads the JSON encoding from a string slice.
pub struct JsonReader<'a> {
    lexer: Lexer<'a>,
    settings: JsonSettings,
    pending: VecDeque<Pending>,
    frames: Vec<ObjFrame>,
    started: bool,
    finished: bool,
    directives: u8,
    schema: u8,
    taxonomy: i16,
    f_name: Option<String>,
    f_ordinal: Option<i16>,
    f_type: Option<u8>,
    f_value: Option<Value>,
}

impl<'a> JsonReader<'a> {
    pub fn new(src: &'a str) -> JsonReader<'a> {
        JsonReader::with_settings(src, JsonSettings::default())
    }

    pub fn with_settings(src: &'a str, settings: JsonSettings) -> JsonReader<'a> {
        JsonReader {
            lexer: Lexer::new(src),
            settings,
            pending: VecDeque::new(),
            frames: Vec::new(),
            started: false,
            finished: false,
            directives: 0,
            schema: 0,
            taxonomy: 0,
            f_name: None,
            f_ordinal: None,
            f_type: None,
            f_value: None,
        }
    }

    fn parse_err(&self, msg: impl Into<String>) -> Error {
        // Position information lives in the lexer errors; structural errors
        // reported here carry only the message.
        Error::Parse {
            line: 0,
            col: 0,
            msg: msg.into(),
        }
    }

    fn clear_field(&mut self) {
        self.f_name = None;
        self.f_ordinal = None;
        self.f_type = None;
        self.f_value = None;
    }

    /// Split a member key into field name and ordinal.
    fn classify_key(&self, key: String) -> (Option<String>, Option<i16>) {
        if key.is_empty() {
            return (None, None);
        }
        if self.settings.numbers_are_ordinals && is_ordinal_shaped(&key) {
            if let Ok(ordinal) = key.parse::<i16>() {
                return (None, Some(ordinal));
            }
        }
        (Some(key), None)
    }

    fn scalar_value(&self, token: Token) -> Result<Value> {
        Ok(match token {
            Token::Str(s) => Value::String(s),
            Token::Int(v) => Value::Int(v),
            Token::Long(v) => Value::Long(v),
            Token::Double(v) => Value::Double(v),
            Token::Bool(v) => Value::Boolean(v),
            Token::Null => Value::Indicator,
            other => {
                return Err(self.parse_err(format!("expected a value, found {:?}", other)))
            }
        })
    }

    /// Consume the head of the top-level object: any reserved envelope
    /// members, then either the first real member or the closing brace.
    fn start_message(&mut self) -> Result<StreamEvent> {
        match self.lexer.next_token()? {
            Token::BeginObject => {}
            Token::Eof => {
                self.finished = true;
                return Ok(StreamEvent::NoElement);
            }
            other => {
                return Err(self.parse_err(format!("expected an object, found {:?}", other)))
            }
        }
        self.started = true;

        loop {
            match self.lexer.next_token()? {
                Token::EndObject => {
                    self.pending.push_back(Pending::MessageEnd);
                    break;
                }
                Token::Str(key) => {
                    if let Some(attr) = self.reserved_attr(&key) {
                        self.expect(Token::NameSep)?;
                        let token = self.lexer.next_token()?;
                        self.set_attr(attr, token)?;
                        match self.lexer.next_token()? {
                            Token::ValueSep => continue,
                            Token::EndObject => {
                                self.pending.push_back(Pending::MessageEnd);
                                break;
                            }
                            other => {
                                return Err(self.parse_err(format!(
                                    "expected ',' or '}}', found {:?}",
                                    other
                                )))
                            }
                        }
                    }
                    self.frames.push(ObjFrame { first: false });
                    self.expect(Token::NameSep)?;
                    self.parse_member_value(key)?;
                    break;
                }
                other => {
                    return Err(
                        self.parse_err(format!("expected a member name, found {:?}", other))
                    )
                }
            }
        }
        self.clear_field();
        Ok(StreamEvent::MessageStart)
    }

    fn reserved_attr(&self, key: &str) -> Option<EnvelopeAttr> {
        if self.settings.processing_directives_field.as_deref() == Some(key) {
            Some(EnvelopeAttr::Directives)
        } else if self.settings.schema_version_field.as_deref() == Some(key) {
            Some(EnvelopeAttr::Schema)
        } else if self.settings.taxonomy_field.as_deref() == Some(key) {
            Some(EnvelopeAttr::Taxonomy)
        } else {
            None
        }
    }

    fn set_attr(&mut self, attr: EnvelopeAttr, token: Token) -> Result<()> {
        let v = match token {
            Token::Int(v) => v as i64,
            Token::Long(v) => v,
            other => {
                return Err(self.parse_err(format!(
                    "envelope attribute must be an integer, found {:?}",
                    other
                )))
            }
        };
        match attr {
            EnvelopeAttr::Directives => {
                self.directives = u8::try_from(v)
                    .map_err(|_| self.parse_err("processing directives out of range"))?;
            }
            EnvelopeAttr::Schema => {
                self.schema = u8::try_from(v)
                    .map_err(|_| self.parse_err("schema version out of range"))?;
            }
            EnvelopeAttr::Taxonomy => {
                self.taxonomy =
                    i16::try_from(v).map_err(|_| self.parse_err("taxonomy id out of range"))?;
            }
        }
        Ok(())
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        let found = self.lexer.next_token()?;
        if found != token {
            return Err(self.parse_err(format!("expected {:?}, found {:?}", token, found)));
        }
        Ok(())
    }

    /// Parse the next member (or the object close) of the innermost lazily
    /// parsed object, queuing the resulting events.
    fn pump(&mut self) -> Result<()> {
        let first = {
            let frame = self
                .frames
                .last_mut()
                .expect("pump only runs with an open object");
            let first = frame.first;
            frame.first = false;
            first
        };

        let token = self.lexer.next_token()?;
        let key = if first {
            match token {
                Token::EndObject => return self.close_frame(),
                Token::Str(key) => key,
                other => {
                    return Err(
                        self.parse_err(format!("expected a member name, found {:?}", other))
                    )
                }
            }
        } else {
            match token {
                Token::EndObject => return self.close_frame(),
                Token::ValueSep => match self.lexer.next_token()? {
                    Token::Str(key) => key,
                    other => {
                        return Err(
                            self.parse_err(format!("expected a member name, found {:?}", other))
                        )
                    }
                },
                other => {
                    return Err(self.parse_err(format!("expected ',' or '}}', found {:?}", other)))
                }
            }
        };

        self.expect(Token::NameSep)?;
        self.parse_member_value(key)
    }

    fn close_frame(&mut self) -> Result<()> {
        self.frames.pop();
        if self.frames.is_empty() {
            // Top-level object closed; nothing may follow.
            if *self.lexer.peek()? != Token::Eof {
                return Err(self.parse_err("trailing characters after the message"));
            }
            self.pending.push_back(Pending::MessageEnd);
        } else {
            self.pending.push_back(Pending::End);
        }
        Ok(())
    }

    fn parse_member_value(&mut self, key: String) -> Result<()> {
        let (name, ordinal) = self.classify_key(key);
        match self.lexer.next_token()? {
            Token::BeginObject => {
                if self.frames.len() >= MAX_DEPTH {
                    return Err(Error::DepthLimit);
                }
                self.pending.push_back(Pending::Start { name, ordinal });
                self.frames.push(ObjFrame { first: true });
                Ok(())
            }
            Token::BeginArray => {
                let mut out = Vec::new();
                self.parse_array_into(&mut out, &name, ordinal, 0)?;
                self.pending.extend(out);
                Ok(())
            }
            scalar => {
                let value = self.scalar_value(scalar)?;
                self.pending.push_back(Pending::Field {
                    name,
                    ordinal,
                    value,
                });
                Ok(())
            }
        }
    }

    /// Materialize an array value. A uniform numeric array becomes one
    /// primitive-array field; anything else replays as repeated fields with
    /// the same name.
    fn parse_array_into(
        &mut self,
        out: &mut Vec<Pending>,
        name: &Option<String>,
        ordinal: Option<i16>,
        depth: usize,
    ) -> Result<()> {
        enum Item {
            Scalar(Value),
            Object(Vec<Pending>),
        }

        let mut items = Vec::new();
        let mut first = true;
        loop {
            let mut token = self.lexer.next_token()?;
            if first {
                first = false;
                if token == Token::EndArray {
                    break;
                }
            } else {
                match token {
                    Token::EndArray => break,
                    Token::ValueSep => token = self.lexer.next_token()?,
                    other => {
                        return Err(
                            self.parse_err(format!("expected ',' or ']', found {:?}", other))
                        )
                    }
                }
            }
            match token {
                Token::BeginObject => {
                    let mut sub = Vec::new();
                    self.parse_object_into(&mut sub, depth + 1)?;
                    items.push(Item::Object(sub));
                }
                Token::BeginArray => {
                    return Err(self.parse_err("arrays cannot nest directly inside arrays"))
                }
                scalar => items.push(Item::Scalar(self.scalar_value(scalar)?)),
            }
        }

        // Uniform numeric arrays collapse into a primitive-array field,
        // widening int to long where the two mix.
        let mut ints = 0usize;
        let mut longs = 0usize;
        let mut doubles = 0usize;
        let mut scalars = 0usize;
        for item in &items {
            if let Item::Scalar(v) = item {
                scalars += 1;
                match v {
                    Value::Int(_) => ints += 1,
                    Value::Long(_) => longs += 1,
                    Value::Double(_) => doubles += 1,
                    _ => {}
                }
            }
        }
        if scalars == items.len() {
            let value = if items.is_empty() {
                Some(Value::IntArray(Vec::new()))
            } else if ints == items.len() {
                Some(Value::IntArray(
                    items
                        .iter()
                        .map(|i| match i {
                            Item::Scalar(Value::Int(v)) => *v,
                            _ => unreachable!("counted above"),
                        })
                        .collect(),
                ))
            } else if ints + longs == items.len() {
                Some(Value::LongArray(
                    items
                        .iter()
                        .map(|i| match i {
                            Item::Scalar(v) => v.to_i64().expect("counted above"),
                            _ => unreachable!("counted above"),
                        })
                        .collect(),
                ))
            } else if doubles == items.len() {
                Some(Value::DoubleArray(
                    items
                        .iter()
                        .map(|i| match i {
                            Item::Scalar(Value::Double(v)) => *v,
                            _ => unreachable!("counted above"),
                        })
                        .collect(),
                ))
            } else {
                None
            };
            if let Some(value) = value {
                out.push(Pending::Field {
                    name: name.clone(),
                    ordinal,
                    value,
                });
                return Ok(());
            }
        }

        for item in items {
            match item {
                Item::Scalar(value) => out.push(Pending::Field {
                    name: name.clone(),
                    ordinal,
                    value,
                }),
                Item::Object(events) => {
                    out.push(Pending::Start {
                        name: name.clone(),
                        ordinal,
                    });
                    out.extend(events);
                    out.push(Pending::End);
                }
            }
        }
        Ok(())
    }

    /// Eagerly parse an object (its opening brace already consumed) into
    /// pending events. Used for objects nested inside arrays.
    fn parse_object_into(&mut self, out: &mut Vec<Pending>, depth: usize) -> Result<()> {
        if self.frames.len() + depth >= MAX_DEPTH {
            return Err(Error::DepthLimit);
        }
        let mut first = true;
        loop {
            let mut token = self.lexer.next_token()?;
            if first {
                first = false;
                if token == Token::EndObject {
                    return Ok(());
                }
            } else {
                match token {
                    Token::EndObject => return Ok(()),
                    Token::ValueSep => token = self.lexer.next_token()?,
                    other => {
                        return Err(
                            self.parse_err(format!("expected ',' or '}}', found {:?}", other))
                        )
                    }
                }
            }
            let key = match token {
                Token::Str(key) => key,
                other => {
                    return Err(
                        self.parse_err(format!("expected a member name, found {:?}", other))
                    )
                }
            };
            self.expect(Token::NameSep)?;
            let (name, ordinal) = self.classify_key(key);
            match self.lexer.next_token()? {
                Token::BeginObject => {
                    out.push(Pending::Start { name, ordinal });
                    self.parse_object_into(out, depth + 1)?;
                    out.push(Pending::End);
                }
                Token::BeginArray => self.parse_array_into(out, &name, ordinal, depth + 1)?,
                scalar => {
                    let value = self.scalar_value(scalar)?;
                    out.push(Pending::Field {
                        name,
                        ordinal,
                        value,
                    });
                }
            }
        }
    }

    fn apply(&mut self, pending: Pending) -> StreamEvent {
        match pending {
            Pending::Start { name, ordinal } => {
                self.f_name = name;
                self.f_ordinal = ordinal;
                self.f_type = Some(type_id::MESSAGE);
                self.f_value = None;
                StreamEvent::SubmessageFieldStart
            }
            Pending::End => {
                self.clear_field();
                StreamEvent::SubmessageFieldEnd
            }
            Pending::Field {
                name,
                ordinal,
                value,
            } => {
                self.f_name = name;
                self.f_ordinal = ordinal;
                self.f_type = Some(value.type_id());
                self.f_value = Some(value);
                StreamEvent::SimpleField
            }
            Pending::MessageEnd => {
                self.clear_field();
                self.finished = true;
                StreamEvent::MessageEnd
            }
        }
    }
}

enum EnvelopeAttr {
    Directives,
    Schema,
    Taxonomy,
}

fn is_ordinal_shaped(key: &str) -> bool {
    let digits = key.strip_prefix('-').unwrap_or(key);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

impl<'a> StreamReader for JsonReader<'a> {
    fn has_next(&mut self) -> Result<bool> {
        if self.finished {
            return Ok(false);
        }
        if !self.started {
            return Ok(*self.lexer.peek()? != Token::Eof);
        }
        Ok(true)
    }

    fn move_next(&mut self) -> Result<StreamEvent> {
        if self.finished {
            return Ok(StreamEvent::NoElement);
        }
        if !self.started {
            return self.start_message();
        }
        loop {
            if let Some(pending) = self.pending.pop_front() {
                return Ok(self.apply(pending));
            }
            self.pump()?;
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

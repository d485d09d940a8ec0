//! The mutable in-memory message tree.
//!
//! A [`Message`] is an ordered sequence of [`Field`]s. Duplicate names and
//! ordinals are allowed; a name or ordinal query returns the first match,
//! with `fields_by_*` iterators for the rest. Typed getters coerce through
//! the numeric widening rules of [`Value`], so a field stored as a byte can
//! be read back through `i32_by_name` without ceremony.

use crate::datetime::DateTime;
use crate::error::{Error, Result};
use crate::value::Value;
use crate::MAX_NAME_LEN;

/// One field of a message: an optional name, an optional ordinal, and a
/// typed value. At least conceptually both name and ordinal may be absent.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    name: Option<String>,
    ordinal: Option<i16>,
    value: Value,
}

impl Field {
    /// Construct a field. Fails if the name exceeds 255 UTF-8 bytes.
    pub fn new(name: Option<String>, ordinal: Option<i16>, value: Value) -> Result<Field> {
        if let Some(ref n) = name {
            if n.len() > MAX_NAME_LEN {
                return Err(Error::BadEncode(format!(
                    "field name of {} bytes exceeds the {}-byte limit",
                    n.len(),
                    MAX_NAME_LEN
                )));
            }
        }
        Ok(Field {
            name,
            ordinal,
            value,
        })
    }

    /// A field with a name only.
    pub fn named(name: impl Into<String>, value: impl Into<Value>) -> Result<Field> {
        Field::new(Some(name.into()), None, value.into())
    }

    /// A field with an ordinal only.
    pub fn at_ordinal(ordinal: i16, value: impl Into<Value>) -> Field {
        Field {
            name: None,
            ordinal: Some(ordinal),
            value: value.into(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn ordinal(&self) -> Option<i16> {
        self.ordinal
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }
}

/// An ordered, mutable sequence of fields.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Message {
    fields: Vec<Field>,
}

impl Message {
    pub fn new() -> Message {
        Message::default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Append an already-built field.
    pub fn push(&mut self, field: Field) {
        self.fields.push(field);
    }

    /// Append a named field, converting the value to its preferred wire
    /// type. Fails only if the name is too long.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Result<&mut Message> {
        self.push(Field::named(name, value)?);
        Ok(self)
    }

    /// Append a field carrying only an ordinal.
    pub fn add_ordinal(&mut self, ordinal: i16, value: impl Into<Value>) -> &mut Message {
        self.push(Field::at_ordinal(ordinal, value));
        self
    }

    /// Append a field with any combination of name and ordinal.
    pub fn add_full(
        &mut self,
        name: Option<&str>,
        ordinal: Option<i16>,
        value: Value,
    ) -> Result<&mut Message> {
        self.push(Field::new(name.map(str::to_string), ordinal, value)?);
        Ok(self)
    }

    /// Fluent variant of [`add`](Self::add) for building literals.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Result<Message> {
        self.add(name, value)?;
        Ok(self)
    }

    /// Fluent variant of [`add_ordinal`](Self::add_ordinal).
    pub fn with_ordinal(mut self, ordinal: i16, value: impl Into<Value>) -> Message {
        self.add_ordinal(ordinal, value);
        self
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Field> {
        self.fields.iter()
    }

    pub fn field_at(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    /// The first field with the given name.
    pub fn field_by_name(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name() == Some(name))
    }

    /// Every field with the given name, in order.
    pub fn fields_by_name<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Field> {
        self.fields.iter().filter(move |f| f.name() == Some(name))
    }

    /// The first field with the given ordinal.
    pub fn field_by_ordinal(&self, ordinal: i16) -> Option<&Field> {
        self.fields.iter().find(|f| f.ordinal() == Some(ordinal))
    }

    /// Every field with the given ordinal, in order.
    pub fn fields_by_ordinal(&self, ordinal: i16) -> impl Iterator<Item = &Field> {
        self.fields
            .iter()
            .filter(move |f| f.ordinal() == Some(ordinal))
    }

    pub fn bool_by_name(&self, name: &str) -> Option<bool> {
        self.field_by_name(name).and_then(|f| f.value().as_bool())
    }

    pub fn i32_by_name(&self, name: &str) -> Option<i32> {
        self.field_by_name(name).and_then(|f| f.value().to_i32())
    }

    pub fn i64_by_name(&self, name: &str) -> Option<i64> {
        self.field_by_name(name).and_then(|f| f.value().to_i64())
    }

    pub fn f64_by_name(&self, name: &str) -> Option<f64> {
        self.field_by_name(name).and_then(|f| f.value().to_f64())
    }

    pub fn str_by_name(&self, name: &str) -> Option<&str> {
        self.field_by_name(name).and_then(|f| f.value().as_str())
    }

    pub fn bytes_by_name(&self, name: &str) -> Option<&[u8]> {
        self.field_by_name(name).and_then(|f| f.value().as_bytes())
    }

    pub fn message_by_name(&self, name: &str) -> Option<&Message> {
        self.field_by_name(name)
            .and_then(|f| f.value().as_message())
    }

    pub fn datetime_by_name(&self, name: &str) -> Option<&DateTime> {
        self.field_by_name(name)
            .and_then(|f| f.value().as_datetime())
    }

    pub fn bool_by_ordinal(&self, ordinal: i16) -> Option<bool> {
        self.field_by_ordinal(ordinal)
            .and_then(|f| f.value().as_bool())
    }

    pub fn i32_by_ordinal(&self, ordinal: i16) -> Option<i32> {
        self.field_by_ordinal(ordinal)
            .and_then(|f| f.value().to_i32())
    }

    pub fn i64_by_ordinal(&self, ordinal: i16) -> Option<i64> {
        self.field_by_ordinal(ordinal)
            .and_then(|f| f.value().to_i64())
    }

    pub fn f64_by_ordinal(&self, ordinal: i16) -> Option<f64> {
        self.field_by_ordinal(ordinal)
            .and_then(|f| f.value().to_f64())
    }

    pub fn str_by_ordinal(&self, ordinal: i16) -> Option<&str> {
        self.field_by_ordinal(ordinal)
            .and_then(|f| f.value().as_str())
    }

    pub fn message_by_ordinal(&self, ordinal: i16) -> Option<&Message> {
        self.field_by_ordinal(ordinal)
            .and_then(|f| f.value().as_message())
    }

    /// Count every sub-message in the tree, depth first. Used by the object
    /// mapping layer to keep stream reference ids aligned.
    pub(crate) fn submessage_count(&self) -> usize {
        self.fields
            .iter()
            .filter_map(|f| f.value().as_message())
            .map(|m| 1 + m.submessage_count())
            .sum()
    }
}

impl<'a> IntoIterator for &'a Message {
    type Item = &'a Field;
    type IntoIter = std::slice::Iter<'a, Field>;
    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

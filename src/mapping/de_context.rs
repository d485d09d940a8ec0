//! The deserialization side of the object mapping layer.
//!
//! Loading walks the message tree once, assigning every sub-message a
//! reference id in first-encounter order, the same numbering the writer
//! used. Objects are then built on demand: resolving a reference either
//! returns the already-built (or registered-but-in-progress) instance or
//! runs the surrogate selected by the type header, following chained type
//! references and trying each candidate name in order.

use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::registry::{TypeEntry, TypeMap};
use super::{object_cell, ObjectRef, TYPE_ORDINAL};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::value::Value;

struct DeEntry {
    msg: Message,
    /// Field index to reference id, for this entry's direct sub-messages.
    children: HashMap<usize, usize>,
    obj: Option<ObjectRef>,
    in_progress: bool,
}

/// Drives surrogates while reading an object graph.
pub struct DeContext<'a> {
    map: &'a TypeMap,
    entries: Vec<DeEntry>,
    stack: Vec<usize>,
}

impl<'a> DeContext<'a> {
    pub fn new(map: &'a TypeMap, root: &Message) -> DeContext<'a> {
        let mut entries = Vec::new();
        index_message(root, &mut entries);
        DeContext {
            map,
            entries,
            stack: Vec::new(),
        }
    }

    /// Deserialize the object graph rooted at `root`.
    pub fn deserialize(map: &'a TypeMap, root: &Message) -> Result<ObjectRef> {
        DeContext::new(map, root).from_ref(0, None)
    }

    /// Deserialize and downcast the root object.
    pub fn deserialize_as<T: 'static>(map: &'a TypeMap, root: &Message) -> Result<Rc<RefCell<T>>> {
        let obj = DeContext::new(map, root).from_ref(0, Some(TypeId::of::<RefCell<T>>()))?;
        object_cell::<T>(&obj).ok_or_else(|| {
            Error::Mapping(format!(
                "deserialized object is not a {}",
                std::any::type_name::<T>()
            ))
        })
    }

    /// Reference id of the sub-message currently being deserialized.
    pub fn current_ref(&self) -> Option<usize> {
        self.stack.last().copied()
    }

    /// Record the (possibly still empty) instance for the sub-message being
    /// deserialized. Must happen before any object member is resolved, or a
    /// cycle back into this instance fails.
    pub fn register(&mut self, obj: ObjectRef) -> Result<()> {
        let refid = *self
            .stack
            .last()
            .ok_or_else(|| Error::Mapping("register called outside deserialization".to_string()))?;
        let entry = &mut self.entries[refid];
        if entry.obj.is_some() {
            return Err(Error::DuplicateRegistration(refid));
        }
        entry.obj = Some(obj);
        Ok(())
    }

    /// The object for a reference id, building it if this is the first
    /// request. `hint` names the expected type for sub-messages that carry
    /// no resolvable type header.
    pub fn from_ref(&mut self, refid: usize, hint: Option<TypeId>) -> Result<ObjectRef> {
        if refid >= self.entries.len() {
            return Err(Error::BadReference {
                from: refid,
                delta: 0,
            });
        }
        if let Some(obj) = &self.entries[refid].obj {
            return Ok(obj.clone());
        }
        if self.entries[refid].in_progress {
            return Err(Error::Mapping(format!(
                "cycle reached reference id {} before its object was registered",
                refid
            )));
        }

        let map = self.map;
        let entry = resolve_entry(map, &self.entries, refid, hint)?;

        self.entries[refid].in_progress = true;
        self.stack.push(refid);
        let msg = self.entries[refid].msg.clone();
        let result = entry.surrogate.build_object(&msg, self);
        self.stack.pop();
        self.entries[refid].in_progress = false;

        let obj = result?;
        if let Some(registered) = &self.entries[refid].obj {
            if !Rc::ptr_eq(registered, &obj) {
                return Err(Error::Mapping(format!(
                    "surrogate for reference id {} returned an object other than the one it registered",
                    refid
                )));
            }
        } else {
            self.entries[refid].obj = Some(obj.clone());
        }
        Ok(obj)
    }

    /// Resolve a field of the current sub-message as an object: a nested
    /// sub-message deserializes in place, an integer follows the relative
    /// reference back to an earlier sub-message.
    pub fn object_member(&mut self, field_index: usize, hint: Option<TypeId>) -> Result<ObjectRef> {
        let refid = *self.stack.last().ok_or_else(|| {
            Error::Mapping("object member resolved outside deserialization".to_string())
        })?;

        enum Member {
            Sub,
            Delta(i64),
            NotAnObject(&'static str),
        }
        let member = {
            let field = self.entries[refid]
                .msg
                .field_at(field_index)
                .ok_or_else(|| {
                    Error::Mapping(format!("no field at index {}", field_index))
                })?;
            match field.value() {
                Value::Message(_) => Member::Sub,
                value => match value.to_i64() {
                    Some(delta) => Member::Delta(delta),
                    None => Member::NotAnObject(value.kind_name()),
                },
            }
        };

        match member {
            Member::Sub => {
                let child = *self.entries[refid]
                    .children
                    .get(&field_index)
                    .expect("sub-messages indexed at load");
                self.from_ref(child, hint)
            }
            Member::Delta(delta) => {
                // The delta is relative to the current sub-message's id and
                // may be positive: an earlier-numbered container can refer
                // to a later-numbered sub-message that already appeared in
                // stream order. It must land on an existing id either way.
                let target = refid as i64 + delta;
                if target < 0 || target as usize >= self.entries.len() {
                    return Err(Error::BadReference { from: refid, delta });
                }
                self.from_ref(target as usize, hint)
            }
            Member::NotAnObject(kind) => Err(Error::Mapping(format!(
                "field is a {}, not an object or reference",
                kind
            ))),
        }
    }
}

/// Assign reference ids across the tree in first-encounter (pre-order)
/// stream order.
fn index_message(msg: &Message, entries: &mut Vec<DeEntry>) -> usize {
    let refid = entries.len();
    entries.push(DeEntry {
        msg: msg.clone(),
        children: HashMap::new(),
        obj: None,
        in_progress: false,
    });
    let mut children = HashMap::new();
    for (index, field) in msg.iter().enumerate() {
        if let Value::Message(sub) = field.value() {
            let child = index_message(sub, entries);
            children.insert(index, child);
        }
    }
    entries[refid].children = children;
    refid
}

/// Select the surrogate for a sub-message: follow chained type references
/// at ordinal -1, then try each candidate name in order, then fall back to
/// the caller's hint.
fn resolve_entry<'a>(
    map: &'a TypeMap,
    entries: &[DeEntry],
    refid: usize,
    hint: Option<TypeId>,
) -> Result<&'a TypeEntry> {
    let mut at = refid;
    let mut tried: Vec<String> = Vec::new();
    loop {
        let type_fields: Vec<&Value> = entries[at]
            .msg
            .fields_by_ordinal(TYPE_ORDINAL)
            .map(|f| f.value())
            .collect();
        let first = match type_fields.first() {
            Some(first) => *first,
            None => break,
        };
        match first {
            Value::String(_) => {
                for value in &type_fields {
                    if let Value::String(name) = value {
                        if let Some(entry) = map.entry_for_name(name) {
                            return Ok(entry);
                        }
                        tried.push(name.clone());
                    }
                }
                break;
            }
            value => {
                let delta = value.to_i64().ok_or_else(|| {
                    Error::Mapping(format!(
                        "type field is a {}, neither a name nor a reference",
                        value.kind_name()
                    ))
                })?;
                // A type reference always points strictly backwards.
                if delta >= 0 {
                    return Err(Error::BadReference { from: at, delta });
                }
                let target = at as i64 + delta;
                if target < 0 {
                    return Err(Error::BadReference { from: at, delta });
                }
                at = target as usize;
            }
        }
    }
    if let Some(tid) = hint {
        if let Some(entry) = map.entry_for_type(tid) {
            return Ok(entry);
        }
    }
    Err(Error::UnregisteredType(if tried.is_empty() {
        "sub-message without type information".to_string()
    } else {
        tried.join(", ")
    }))
}

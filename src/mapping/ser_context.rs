//! The serialization side of the object mapping layer.
//!
//! Every sub-message emitted through the context occupies one reference id,
//! assigned in stream order. An object seen a second time is not emitted
//! again; its field carries the signed delta from the current sub-message's
//! reference id back to the first emission. The type header at ordinal -1
//! carries the type names on the first instance of each class and a
//! negative delta to that first instance afterwards.

use std::any::TypeId;
use std::collections::HashMap;
use std::rc::Rc;

use super::registry::TypeMap;
use super::{ObjectRef, TYPE_ORDINAL};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::value::Value;

/// Drives surrogates while writing an object graph.
pub struct SerContext<'a> {
    map: &'a TypeMap,
    refs: HashMap<usize, usize>,
    // Holds every emitted object so reference-count blocks stay allocated
    // and pointer keys stay unique for the life of the context.
    retained: Vec<ObjectRef>,
    next_ref: usize,
    stack: Vec<usize>,
    type_protos: HashMap<TypeId, usize>,
}

impl<'a> SerContext<'a> {
    pub fn new(map: &'a TypeMap) -> SerContext<'a> {
        SerContext {
            map,
            refs: HashMap::new(),
            retained: Vec::new(),
            next_ref: 0,
            stack: Vec::new(),
            type_protos: HashMap::new(),
        }
    }

    /// Serialize an object graph to a message tree. The root object becomes
    /// the top-level message, reference id 0.
    pub fn serialize(map: &'a TypeMap, obj: &ObjectRef) -> Result<Message> {
        SerContext::new(map).object_message(obj)
    }

    /// Reference id of the sub-message currently being built.
    pub fn current_ref(&self) -> Option<usize> {
        self.stack.last().copied()
    }

    /// Add an object-valued field: inline as a nested sub-message the first
    /// time, as a relative back-reference afterwards.
    pub fn add_object(
        &mut self,
        msg: &mut Message,
        name: Option<&str>,
        ordinal: Option<i16>,
        obj: &ObjectRef,
    ) -> Result<()> {
        let key = ptr_key(obj);
        if let Some(&target) = self.refs.get(&key) {
            let current = *self.stack.last().ok_or_else(|| {
                Error::Mapping("shared reference emitted outside an object".to_string())
            })?;
            let delta = target as i64 - current as i64;
            msg.add_full(name, ordinal, Value::Int(delta as i32))?;
            return Ok(());
        }
        let sub = self.object_message(obj)?;
        msg.add_full(name, ordinal, Value::Message(sub))?;
        Ok(())
    }

    /// Add a plain tree-valued field. The sub-tree still occupies reference
    /// ids, keeping the stream numbering aligned with what a reader counts.
    pub fn add_message_field(
        &mut self,
        msg: &mut Message,
        name: Option<&str>,
        ordinal: Option<i16>,
        sub: Message,
    ) -> Result<()> {
        self.next_ref += 1 + sub.submessage_count();
        msg.add_full(name, ordinal, Value::Message(sub))?;
        Ok(())
    }

    fn object_message(&mut self, obj: &ObjectRef) -> Result<Message> {
        let tid = (**obj).type_id();
        let map = self.map;
        let entry = map.entry_for_type(tid).ok_or_else(|| {
            Error::UnregisteredType(format!("runtime type {:?}", tid))
        })?;

        let refid = self.next_ref;
        self.next_ref += 1;
        self.refs.insert(ptr_key(obj), refid);
        self.retained.push(obj.clone());

        let mut sub = Message::new();
        if let Some(&proto) = self.type_protos.get(&tid) {
            let delta = proto as i64 - refid as i64;
            sub.add_full(None, Some(TYPE_ORDINAL), Value::Int(delta as i32))?;
        } else {
            self.type_protos.insert(tid, refid);
            for name in &entry.names {
                sub.add_full(None, Some(TYPE_ORDINAL), Value::String(name.clone()))?;
            }
        }

        self.stack.push(refid);
        let result = entry.surrogate.build_message(obj, &mut sub, self);
        self.stack.pop();
        result?;
        Ok(sub)
    }
}

/// Identity of a shared object: the address of its reference count block.
fn ptr_key(obj: &ObjectRef) -> usize {
    Rc::as_ptr(obj) as *const () as usize
}

//! Surrogates adapt runtime objects to and from messages.
//!
//! Variants, in the order an application normally reaches for them: the
//! user-hook trait for types that know their own encoding, the info-bag for
//! types built from a name/value bag, list and dictionary surrogates for
//! container shapes, and the property-table bean surrogate for everything
//! with plain get/set members. Object-valued members must go through the
//! serialization context so shared references and cycles resolve to a
//! single instance.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

use super::de_context::DeContext;
use super::ser_context::SerContext;
use super::{new_object, object_cell, ObjectRef, TYPE_ORDINAL};
use crate::datetime::DateTime;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::value::Value;

/// Adapter between one runtime type and its message form.
pub trait Surrogate {
    /// Append the object's fields to `msg`. The type header at ordinal -1
    /// is already present; object members go through `ctx`.
    fn build_message(&self, obj: &ObjectRef, msg: &mut Message, ctx: &mut SerContext)
        -> Result<()>;

    /// Build an object from its message. A surrogate that can be the target
    /// of back-references must call [`DeContext::register`] before
    /// resolving any object member.
    fn build_object(&self, msg: &Message, ctx: &mut DeContext) -> Result<ObjectRef>;
}

/// The user-hook capability: a type that maps itself. Preferred over every
/// other surrogate shape when a type implements it.
pub trait MessageMappable: Sized + 'static {
    fn to_message(&self, msg: &mut Message, ctx: &mut SerContext) -> Result<()>;
    fn from_message(msg: &Message, ctx: &mut DeContext) -> Result<Self>;
}

/// Surrogate over a [`MessageMappable`] type.
pub struct HookSurrogate<T>(PhantomData<T>);

impl<T> HookSurrogate<T> {
    pub fn new() -> HookSurrogate<T> {
        HookSurrogate(PhantomData)
    }
}

impl<T> Default for HookSurrogate<T> {
    fn default() -> Self {
        HookSurrogate::new()
    }
}

impl<T: MessageMappable> Surrogate for HookSurrogate<T> {
    fn build_message(
        &self,
        obj: &ObjectRef,
        msg: &mut Message,
        ctx: &mut SerContext,
    ) -> Result<()> {
        let cell = object_cell::<T>(obj).ok_or_else(type_mismatch::<T>)?;
        let borrowed = cell.borrow();
        borrowed.to_message(msg, ctx)
    }

    fn build_object(&self, msg: &Message, ctx: &mut DeContext) -> Result<ObjectRef> {
        Ok(new_object(T::from_message(msg, ctx)?))
    }
}

/// A leaf-valued type usable as a list element, dictionary key or value, or
/// info-bag entry.
pub trait ValueMappable: Sized + 'static {
    fn to_value(&self) -> Value;
    fn from_value(value: &Value) -> Result<Self>;
}

macro_rules! value_mappable {
    ($ty:ty, $to:expr, $from:expr, $expect:literal) => {
        impl ValueMappable for $ty {
            fn to_value(&self) -> Value {
                $to(self)
            }
            fn from_value(value: &Value) -> Result<Self> {
                $from(value).ok_or_else(|| {
                    Error::Mapping(format!(
                        "cannot read a {} field as {}",
                        value.kind_name(),
                        $expect
                    ))
                })
            }
        }
    };
}

value_mappable!(bool, |v: &bool| Value::Boolean(*v), Value::as_bool, "bool");
value_mappable!(i8, |v: &i8| Value::Byte(*v), Value::to_i8, "i8");
value_mappable!(i16, |v: &i16| Value::Short(*v), Value::to_i16, "i16");
value_mappable!(i32, |v: &i32| Value::Int(*v), Value::to_i32, "i32");
value_mappable!(i64, |v: &i64| Value::Long(*v), Value::to_i64, "i64");
value_mappable!(f32, |v: &f32| Value::Float(*v), Value::to_f32, "f32");
value_mappable!(f64, |v: &f64| Value::Double(*v), Value::to_f64, "f64");
value_mappable!(
    String,
    |v: &String| Value::String(v.clone()),
    |v: &Value| v.as_str().map(str::to_string),
    "string"
);
value_mappable!(
    Vec<u8>,
    |v: &Vec<u8>| Value::ByteArray(v.clone()),
    |v: &Value| v.as_bytes().map(<[u8]>::to_vec),
    "byte array"
);
value_mappable!(
    DateTime,
    |v: &DateTime| Value::DateTime(*v),
    |v: &Value| v.as_datetime().copied(),
    "datetime"
);

/// Surrogate over `Vec<T>` for leaf-valued elements. Elements serialize as
/// repeated fields at ordinal 1.
pub struct ListSurrogate<T>(PhantomData<T>);

impl<T> ListSurrogate<T> {
    pub fn new() -> ListSurrogate<T> {
        ListSurrogate(PhantomData)
    }
}

impl<T> Default for ListSurrogate<T> {
    fn default() -> Self {
        ListSurrogate::new()
    }
}

impl<T: ValueMappable> Surrogate for ListSurrogate<T> {
    fn build_message(
        &self,
        obj: &ObjectRef,
        msg: &mut Message,
        _ctx: &mut SerContext,
    ) -> Result<()> {
        let cell = object_cell::<Vec<T>>(obj).ok_or_else(type_mismatch::<Vec<T>>)?;
        for item in cell.borrow().iter() {
            msg.add_full(None, Some(1), item.to_value())?;
        }
        Ok(())
    }

    fn build_object(&self, msg: &Message, _ctx: &mut DeContext) -> Result<ObjectRef> {
        let mut items = Vec::new();
        for field in msg.fields_by_ordinal(1) {
            items.push(T::from_value(field.value())?);
        }
        Ok(new_object(items))
    }
}

/// Surrogate over `Vec<ObjectRef>`: a list whose elements are themselves
/// mapped objects, shared references included.
pub struct ObjectListSurrogate;

impl Surrogate for ObjectListSurrogate {
    fn build_message(
        &self,
        obj: &ObjectRef,
        msg: &mut Message,
        ctx: &mut SerContext,
    ) -> Result<()> {
        let cell = object_cell::<Vec<ObjectRef>>(obj).ok_or_else(type_mismatch::<Vec<ObjectRef>>)?;
        for item in cell.borrow().iter() {
            ctx.add_object(msg, None, Some(1), item)?;
        }
        Ok(())
    }

    fn build_object(&self, msg: &Message, ctx: &mut DeContext) -> Result<ObjectRef> {
        let mut items: Vec<ObjectRef> = Vec::new();
        for (index, field) in msg.iter().enumerate() {
            if field.ordinal() == Some(1) {
                items.push(ctx.object_member(index, None)?);
            }
        }
        Ok(new_object(items))
    }
}

/// Surrogate over `Vec<(K, V)>`: an insertion-ordered dictionary. Keys go
/// out at ordinal 1 and values at ordinal 2 as parallel sequences; reading
/// pairs them by position and truncates to the shorter side.
pub struct MapSurrogate<K, V>(PhantomData<(K, V)>);

impl<K, V> MapSurrogate<K, V> {
    pub fn new() -> MapSurrogate<K, V> {
        MapSurrogate(PhantomData)
    }
}

impl<K, V> Default for MapSurrogate<K, V> {
    fn default() -> Self {
        MapSurrogate::new()
    }
}

impl<K: ValueMappable, V: ValueMappable> Surrogate for MapSurrogate<K, V> {
    fn build_message(
        &self,
        obj: &ObjectRef,
        msg: &mut Message,
        _ctx: &mut SerContext,
    ) -> Result<()> {
        let cell = object_cell::<Vec<(K, V)>>(obj).ok_or_else(type_mismatch::<Vec<(K, V)>>)?;
        for (key, value) in cell.borrow().iter() {
            msg.add_full(None, Some(1), key.to_value())?;
            msg.add_full(None, Some(2), value.to_value())?;
        }
        Ok(())
    }

    fn build_object(&self, msg: &Message, _ctx: &mut DeContext) -> Result<ObjectRef> {
        let mut keys = Vec::new();
        for field in msg.fields_by_ordinal(1) {
            keys.push(K::from_value(field.value())?);
        }
        let mut values = Vec::new();
        for field in msg.fields_by_ordinal(2) {
            values.push(V::from_value(field.value())?);
        }
        let pairs: Vec<(K, V)> = keys.into_iter().zip(values).collect();
        Ok(new_object(pairs))
    }
}

/// One entry of an [`ObjectInfo`] bag.
enum InfoSlot {
    Value(Value),
    Object(ObjectRef),
    /// Read side: the field as it appeared on the wire, resolvable as
    /// either a value or an object reference.
    Wire { index: usize, value: Value },
}

/// The classic name/value bag. A type writes its state into the bag; on
/// read the bag is populated from the message and handed to the
/// constructor, after the (default-initialized) instance has already been
/// registered so back-references can reach it.
#[derive(Default)]
pub struct ObjectInfo {
    entries: Vec<(String, InfoSlot)>,
}

impl ObjectInfo {
    pub fn new() -> ObjectInfo {
        ObjectInfo::default()
    }

    pub fn add_value(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.entries.push((name.into(), InfoSlot::Value(value.into())));
    }

    pub fn add_object(&mut self, name: impl Into<String>, obj: ObjectRef) {
        self.entries.push((name.into(), InfoSlot::Object(obj)));
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(n, _)| n == name).and_then(|(_, slot)| match slot {
            InfoSlot::Value(v) => Some(v),
            InfoSlot::Wire { value, .. } => Some(value),
            InfoSlot::Object(_) => None,
        })
    }

    /// Resolve a bag entry as an object, following shared references.
    pub fn object(&self, name: &str, ctx: &mut DeContext) -> Result<ObjectRef> {
        let slot = self
            .entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, slot)| slot)
            .ok_or_else(|| Error::Mapping(format!("no \"{}\" entry in the info bag", name)))?;
        match slot {
            InfoSlot::Object(obj) => Ok(obj.clone()),
            InfoSlot::Wire { index, .. } => ctx.object_member(*index, None),
            InfoSlot::Value(_) => Err(Error::Mapping(format!(
                "info entry \"{}\" is a plain value, not an object",
                name
            ))),
        }
    }

    pub fn i32(&self, name: &str) -> Option<i32> {
        self.value(name).and_then(Value::to_i32)
    }

    pub fn i64(&self, name: &str) -> Option<i64> {
        self.value(name).and_then(Value::to_i64)
    }

    pub fn f64(&self, name: &str) -> Option<f64> {
        self.value(name).and_then(Value::to_f64)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.value(name).and_then(Value::as_bool)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.value(name).and_then(Value::as_str)
    }
}

/// The classic-info capability: state goes through an [`ObjectInfo`] bag
/// and a bag-consuming constructor.
pub trait InfoMappable: Sized + 'static {
    fn write_info(&self, info: &mut ObjectInfo, ctx: &mut SerContext) -> Result<()>;
    fn from_info(info: &ObjectInfo, ctx: &mut DeContext) -> Result<Self>;
}

/// Surrogate over an [`InfoMappable`] type.
pub struct InfoSurrogate<T>(PhantomData<T>);

impl<T> InfoSurrogate<T> {
    pub fn new() -> InfoSurrogate<T> {
        InfoSurrogate(PhantomData)
    }
}

impl<T> Default for InfoSurrogate<T> {
    fn default() -> Self {
        InfoSurrogate::new()
    }
}

impl<T: InfoMappable + Default> Surrogate for InfoSurrogate<T> {
    fn build_message(
        &self,
        obj: &ObjectRef,
        msg: &mut Message,
        ctx: &mut SerContext,
    ) -> Result<()> {
        let cell = object_cell::<T>(obj).ok_or_else(type_mismatch::<T>)?;
        let mut info = ObjectInfo::new();
        cell.borrow().write_info(&mut info, ctx)?;
        for (name, slot) in info.entries {
            match slot {
                InfoSlot::Value(Value::Message(sub)) => {
                    ctx.add_message_field(msg, Some(&name), None, sub)?;
                }
                InfoSlot::Value(value) => {
                    msg.add_full(Some(&name), None, value)?;
                }
                InfoSlot::Object(member) => {
                    ctx.add_object(msg, Some(&name), None, &member)?;
                }
                InfoSlot::Wire { .. } => {
                    return Err(Error::Mapping(
                        "wire slots cannot appear in a written info bag".to_string(),
                    ))
                }
            }
        }
        Ok(())
    }

    fn build_object(&self, msg: &Message, ctx: &mut DeContext) -> Result<ObjectRef> {
        // Allocate without the constructor and register at once so cycles
        // back into this instance resolve.
        let cell = Rc::new(RefCell::new(T::default()));
        ctx.register(cell.clone())?;
        let mut info = ObjectInfo::new();
        for (index, field) in msg.iter().enumerate() {
            if field.ordinal() == Some(TYPE_ORDINAL) {
                continue;
            }
            let name = match field.name() {
                Some(name) => name,
                None => continue,
            };
            info.entries.push((
                name.to_string(),
                InfoSlot::Wire {
                    index,
                    value: field.value().clone(),
                },
            ));
        }
        let built = T::from_info(&info, ctx)?;
        *cell.borrow_mut() = built;
        Ok(cell)
    }
}

type ValueGet<T> = Box<dyn Fn(&T) -> Option<Value>>;
type ValueSet<T> = Box<dyn Fn(&mut T, &Value) -> Result<()>>;
type ObjectGet<T> = Box<dyn Fn(&T) -> Option<ObjectRef>>;
type ObjectSet<T> = Box<dyn Fn(&mut T, ObjectRef) -> Result<()>>;
type ListGet<T> = Box<dyn Fn(&T) -> Vec<Value>>;
type ListPush<T> = Box<dyn Fn(&mut T, &Value) -> Result<()>>;
type Lifecycle<T> = Box<dyn Fn(&mut T)>;

enum Property<T> {
    Value {
        name: String,
        get: ValueGet<T>,
        set: ValueSet<T>,
    },
    Object {
        name: String,
        get: ObjectGet<T>,
        set: ObjectSet<T>,
    },
    /// A list-shaped property with no setter; decoded values are appended
    /// one at a time.
    List {
        name: String,
        get: ListGet<T>,
        push: ListPush<T>,
    },
}

impl<T> Property<T> {
    fn name(&self) -> &str {
        match self {
            Property::Value { name, .. } => name,
            Property::Object { name, .. } => name,
            Property::List { name, .. } => name,
        }
    }
}

/// The property-table surrogate: the member table is declared once at
/// registration and indexed during serialization, with optional lifecycle
/// callbacks around each direction.
pub struct BeanSurrogate<T> {
    props: Vec<Property<T>>,
    on_serializing: Option<Box<dyn Fn(&T)>>,
    on_serialized: Option<Box<dyn Fn(&T)>>,
    on_deserializing: Option<Lifecycle<T>>,
    on_deserialized: Option<Lifecycle<T>>,
}

impl<T: 'static> BeanSurrogate<T> {
    pub fn new() -> BeanSurrogate<T> {
        BeanSurrogate {
            props: Vec::new(),
            on_serializing: None,
            on_serialized: None,
            on_deserializing: None,
            on_deserialized: None,
        }
    }

    /// A leaf-valued property. A getter returning `None` omits the field.
    pub fn value_property(
        mut self,
        name: &str,
        get: impl Fn(&T) -> Option<Value> + 'static,
        set: impl Fn(&mut T, &Value) -> Result<()> + 'static,
    ) -> BeanSurrogate<T> {
        self.props.push(Property::Value {
            name: name.to_string(),
            get: Box::new(get),
            set: Box::new(set),
        });
        self
    }

    /// An object-valued property, routed through the context so shared
    /// references keep their identity.
    pub fn object_property(
        mut self,
        name: &str,
        get: impl Fn(&T) -> Option<ObjectRef> + 'static,
        set: impl Fn(&mut T, ObjectRef) -> Result<()> + 'static,
    ) -> BeanSurrogate<T> {
        self.props.push(Property::Object {
            name: name.to_string(),
            get: Box::new(get),
            set: Box::new(set),
        });
        self
    }

    /// A list property with no setter: each decoded element is appended.
    pub fn list_property(
        mut self,
        name: &str,
        get: impl Fn(&T) -> Vec<Value> + 'static,
        push: impl Fn(&mut T, &Value) -> Result<()> + 'static,
    ) -> BeanSurrogate<T> {
        self.props.push(Property::List {
            name: name.to_string(),
            get: Box::new(get),
            push: Box::new(push),
        });
        self
    }

    pub fn serializing(mut self, f: impl Fn(&T) + 'static) -> BeanSurrogate<T> {
        self.on_serializing = Some(Box::new(f));
        self
    }

    pub fn serialized(mut self, f: impl Fn(&T) + 'static) -> BeanSurrogate<T> {
        self.on_serialized = Some(Box::new(f));
        self
    }

    pub fn deserializing(mut self, f: impl Fn(&mut T) + 'static) -> BeanSurrogate<T> {
        self.on_deserializing = Some(Box::new(f));
        self
    }

    pub fn deserialized(mut self, f: impl Fn(&mut T) + 'static) -> BeanSurrogate<T> {
        self.on_deserialized = Some(Box::new(f));
        self
    }
}

impl<T: 'static> Default for BeanSurrogate<T> {
    fn default() -> Self {
        BeanSurrogate::new()
    }
}

impl<T: Default + 'static> Surrogate for BeanSurrogate<T> {
    fn build_message(
        &self,
        obj: &ObjectRef,
        msg: &mut Message,
        ctx: &mut SerContext,
    ) -> Result<()> {
        let cell = object_cell::<T>(obj).ok_or_else(type_mismatch::<T>)?;
        let borrowed = cell.borrow();
        if let Some(f) = &self.on_serializing {
            f(&borrowed);
        }
        for prop in &self.props {
            match prop {
                Property::Value { name, get, .. } => {
                    if let Some(value) = get(&borrowed) {
                        match value {
                            Value::Message(sub) => {
                                ctx.add_message_field(msg, Some(name), None, sub)?
                            }
                            value => {
                                msg.add_full(Some(name), None, value)?;
                            }
                        }
                    }
                }
                Property::Object { name, get, .. } => {
                    if let Some(member) = get(&borrowed) {
                        ctx.add_object(msg, Some(name), None, &member)?;
                    }
                }
                Property::List { name, get, .. } => {
                    for value in get(&borrowed) {
                        msg.add_full(Some(name), None, value)?;
                    }
                }
            }
        }
        if let Some(f) = &self.on_serialized {
            f(&borrowed);
        }
        Ok(())
    }

    fn build_object(&self, msg: &Message, ctx: &mut DeContext) -> Result<ObjectRef> {
        let cell = Rc::new(RefCell::new(T::default()));
        // Registered before any member resolves, so back-edges find it.
        ctx.register(cell.clone())?;
        {
            let mut borrowed = cell.borrow_mut();
            if let Some(f) = &self.on_deserializing {
                f(&mut borrowed);
            }
            for (index, field) in msg.iter().enumerate() {
                if field.ordinal() == Some(TYPE_ORDINAL) {
                    continue;
                }
                let field_name = match field.name() {
                    Some(name) => name,
                    None => continue,
                };
                let prop = match self.props.iter().find(|p| p.name() == field_name) {
                    Some(prop) => prop,
                    // Unknown fields are tolerated, not errors.
                    None => continue,
                };
                match prop {
                    Property::Value { set, .. } => {
                        set(&mut borrowed, field.value()).map_err(|e| in_field(field_name, e))?;
                    }
                    Property::Object { set, .. } => {
                        let member = ctx.object_member(index, None)?;
                        set(&mut borrowed, member).map_err(|e| in_field(field_name, e))?;
                    }
                    Property::List { push, .. } => {
                        push(&mut borrowed, field.value()).map_err(|e| in_field(field_name, e))?;
                    }
                }
            }
            if let Some(f) = &self.on_deserialized {
                f(&mut borrowed);
            }
        }
        Ok(cell)
    }
}

fn type_mismatch<T>() -> Error {
    Error::Mapping(format!(
        "object is not the registered type {}",
        std::any::type_name::<T>()
    ))
}

fn in_field(name: &str, err: Error) -> Error {
    Error::Mapping(format!("in field \"{}\": {}", name, err))
}

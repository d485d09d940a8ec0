//! The object-graph mapping layer.
//!
//! Maps arbitrary runtime objects to and from messages through a registry
//! of surrogates. Shared objects and cycles survive the trip: every
//! sub-message gets a reference id in stream order, a repeated object is
//! written as a signed delta to its first emission, and surrogates register
//! partially built instances before resolving members so back-edges land on
//! the same instance.
//!
//! Mapped objects live behind `Rc<RefCell<T>>`, erased as [`ObjectRef`];
//! [`new_object`], [`object_cell`], and [`object_value`] convert between
//! the two views.

mod de_context;
mod registry;
mod ser_context;
mod surrogate;

pub use de_context::DeContext;
pub use registry::TypeMap;
pub use ser_context::SerContext;
pub use surrogate::{
    BeanSurrogate, HookSurrogate, InfoMappable, InfoSurrogate, ListSurrogate, MapSurrogate,
    MessageMappable, ObjectInfo, ObjectListSurrogate, Surrogate, ValueMappable,
};

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use crate::error::Result;
use crate::message::Message;

/// A type-erased handle to a mapped object.
pub type ObjectRef = Rc<dyn Any>;

/// Ordinal of the type header field that opens every object sub-message.
pub const TYPE_ORDINAL: i16 = -1;

/// Wrap a value as a mapped object.
pub fn new_object<T: 'static>(value: T) -> ObjectRef {
    Rc::new(RefCell::new(value))
}

/// Downcast a mapped object to its typed cell.
pub fn object_cell<T: 'static>(obj: &ObjectRef) -> Option<Rc<RefCell<T>>> {
    obj.clone().downcast::<RefCell<T>>().ok()
}

/// Downcast and clone a mapped object's value.
pub fn object_value<T: Clone + 'static>(obj: &ObjectRef) -> Option<T> {
    object_cell::<T>(obj).map(|cell| cell.borrow().clone())
}

/// Serialize an object graph to a message tree.
pub fn serialize(map: &TypeMap, obj: &ObjectRef) -> Result<Message> {
    SerContext::serialize(map, obj)
}

/// Deserialize the object graph rooted at `root`.
pub fn deserialize(map: &TypeMap, root: &Message) -> Result<ObjectRef> {
    DeContext::deserialize(map, root)
}

/// Deserialize and downcast the root object.
pub fn deserialize_as<T: 'static>(map: &TypeMap, root: &Message) -> Result<Rc<RefCell<T>>> {
    DeContext::deserialize_as::<T>(map, root)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;
    use crate::value::Value;

    #[derive(Clone, Debug, Default, PartialEq)]
    struct Person {
        name: String,
        age: i32,
    }

    fn person_bean() -> BeanSurrogate<Person> {
        BeanSurrogate::<Person>::new()
            .value_property(
                "name",
                |p| Some(Value::from(p.name.clone())),
                |p, v| {
                    p.name = v
                        .as_str()
                        .ok_or_else(|| Error::Mapping("name must be a string".to_string()))?
                        .to_string();
                    Ok(())
                },
            )
            .value_property(
                "age",
                |p| Some(Value::from(p.age)),
                |p, v| {
                    p.age = v
                        .to_i32()
                        .ok_or_else(|| Error::Mapping("age must be an int".to_string()))?;
                    Ok(())
                },
            )
    }

    fn person_map() -> TypeMap {
        let mut map = TypeMap::new();
        map.register_bean(&["com.example.Person", "Person"], person_bean())
            .unwrap();
        map
    }

    #[test]
    fn bean_roundtrip() {
        let map = person_map();
        let fred = new_object(Person {
            name: "fred".to_string(),
            age: 42,
        });
        let msg = serialize(&map, &fred).unwrap();

        // The type header leads the sub-message, most specific name first.
        let headers: Vec<_> = msg.fields_by_ordinal(TYPE_ORDINAL).collect();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].value().as_str(), Some("com.example.Person"));
        assert_eq!(headers[1].value().as_str(), Some("Person"));
        assert_eq!(msg.str_by_name("name"), Some("fred"));
        assert_eq!(msg.i32_by_name("age"), Some(42));

        let back = deserialize_as::<Person>(&map, &msg).unwrap();
        assert_eq!(
            *back.borrow(),
            Person {
                name: "fred".to_string(),
                age: 42,
            }
        );
    }

    #[test]
    fn resolves_by_any_candidate_name() {
        let write_map = person_map();
        let fred = new_object(Person {
            name: "fred".to_string(),
            age: 42,
        });
        let msg = serialize(&write_map, &fred).unwrap();

        // A reader that only knows the short name still resolves, because
        // each candidate is tried in order.
        let mut read_map = TypeMap::new();
        read_map.register_bean(&["Person"], person_bean()).unwrap();
        let back = deserialize_as::<Person>(&read_map, &msg).unwrap();
        assert_eq!(back.borrow().name, "fred");
    }

    #[test]
    fn falls_back_to_hint_without_type_header() {
        let map = person_map();
        let msg = Message::new()
            .with("name", "anon")
            .unwrap()
            .with("age", 7i32)
            .unwrap();
        let back = deserialize_as::<Person>(&map, &msg).unwrap();
        assert_eq!(back.borrow().age, 7);
        // Without the hint there is nothing to resolve.
        assert!(matches!(
            deserialize(&map, &msg),
            Err(Error::UnregisteredType(_))
        ));
    }

    #[derive(Default)]
    struct Parent {
        left: Option<ObjectRef>,
        right: Option<ObjectRef>,
    }

    fn family_map() -> TypeMap {
        let mut map = person_map();
        let bean = BeanSurrogate::<Parent>::new()
            .object_property(
                "left",
                |p| p.left.clone(),
                |p, o| {
                    p.left = Some(o);
                    Ok(())
                },
            )
            .object_property(
                "right",
                |p| p.right.clone(),
                |p, o| {
                    p.right = Some(o);
                    Ok(())
                },
            );
        map.register_bean(&["Parent"], bean).unwrap();
        map
    }

    #[test]
    fn shared_child_keeps_identity() {
        let map = family_map();
        let child = new_object(Person {
            name: "kid".to_string(),
            age: 9,
        });
        let parent = new_object(Parent {
            left: Some(child.clone()),
            right: Some(child),
        });

        let msg = serialize(&map, &parent).unwrap();
        // First occurrence is inline, the second is a relative reference:
        // the child is sub-message 1, referenced from the root (id 0).
        assert!(msg.field_by_name("left").unwrap().value().as_message().is_some());
        assert_eq!(msg.field_by_name("right").unwrap().value(), &Value::Int(1));

        let back = deserialize_as::<Parent>(&map, &msg).unwrap();
        let borrowed = back.borrow();
        let left = borrowed.left.as_ref().unwrap();
        let right = borrowed.right.as_ref().unwrap();
        assert!(Rc::ptr_eq(left, right));
        assert_eq!(object_value::<Person>(left).unwrap().name, "kid");
    }

    #[test]
    fn repeated_class_uses_type_reference() {
        let map = family_map();
        let parent = new_object(Parent {
            left: Some(new_object(Person {
                name: "a".to_string(),
                age: 1,
            })),
            right: Some(new_object(Person {
                name: "b".to_string(),
                age: 2,
            })),
        });

        let msg = serialize(&map, &parent).unwrap();
        let first = msg.field_by_name("left").unwrap().value().as_message().unwrap();
        let second = msg.field_by_name("right").unwrap().value().as_message().unwrap();
        // First instance of the class carries its names; the second carries
        // a negative delta back to it (sub-message 2 to sub-message 1).
        assert_eq!(
            first.field_by_ordinal(TYPE_ORDINAL).unwrap().value().as_str(),
            Some("com.example.Person")
        );
        assert_eq!(
            second.field_by_ordinal(TYPE_ORDINAL).unwrap().value(),
            &Value::Int(-1)
        );

        let back = deserialize_as::<Parent>(&map, &msg).unwrap();
        let borrowed = back.borrow();
        assert_eq!(
            object_value::<Person>(borrowed.right.as_ref().unwrap())
                .unwrap()
                .name,
            "b"
        );
    }

    #[derive(Default)]
    struct Node {
        tag: i32,
        other: Option<ObjectRef>,
    }

    #[test]
    fn cycle_roundtrips() {
        let mut map = TypeMap::new();
        let bean = BeanSurrogate::<Node>::new()
            .value_property(
                "tag",
                |n| Some(Value::from(n.tag)),
                |n, v| {
                    n.tag = v
                        .to_i32()
                        .ok_or_else(|| Error::Mapping("tag must be an int".to_string()))?;
                    Ok(())
                },
            )
            .object_property(
                "other",
                |n| n.other.clone(),
                |n, o| {
                    n.other = Some(o);
                    Ok(())
                },
            );
        map.register_bean(&["Node"], bean).unwrap();

        let a = new_object(Node {
            tag: 1,
            other: None,
        });
        let b = new_object(Node {
            tag: 2,
            other: Some(a.clone()),
        });
        object_cell::<Node>(&a).unwrap().borrow_mut().other = Some(b.clone());

        let msg = serialize(&map, &a).unwrap();
        // B's back-edge to A encodes as the delta -1.
        let b_msg = msg.field_by_name("other").unwrap().value().as_message().unwrap();
        assert_eq!(b_msg.field_by_name("other").unwrap().value(), &Value::Int(-1));

        let a2 = deserialize_as::<Node>(&map, &msg).unwrap();
        let b2 = {
            let borrowed = a2.borrow();
            borrowed.other.clone().unwrap()
        };
        let b2_cell = object_cell::<Node>(&b2).unwrap();
        let back_edge = b2_cell.borrow().other.clone().unwrap();
        let a2_as_ref: ObjectRef = a2.clone();
        assert!(Rc::ptr_eq(&back_edge, &a2_as_ref));
        assert_eq!(a2.borrow().tag, 1);
        assert_eq!(b2_cell.borrow().tag, 2);
    }

    struct Point {
        x: i32,
        y: i32,
    }

    impl MessageMappable for Point {
        fn to_message(&self, msg: &mut Message, _ctx: &mut SerContext) -> crate::error::Result<()> {
            msg.add("x", self.x)?;
            msg.add("y", self.y)?;
            Ok(())
        }
        fn from_message(msg: &Message, _ctx: &mut DeContext) -> crate::error::Result<Self> {
            Ok(Point {
                x: msg
                    .i32_by_name("x")
                    .ok_or_else(|| Error::Mapping("missing x".to_string()))?,
                y: msg
                    .i32_by_name("y")
                    .ok_or_else(|| Error::Mapping("missing y".to_string()))?,
            })
        }
    }

    #[test]
    fn hook_roundtrip() {
        let mut map = TypeMap::new();
        map.register_hook::<Point>(&["Point"]).unwrap();
        let p = new_object(Point { x: 3, y: -4 });
        let msg = serialize(&map, &p).unwrap();
        let back = deserialize_as::<Point>(&map, &msg).unwrap();
        assert_eq!(back.borrow().x, 3);
        assert_eq!(back.borrow().y, -4);
    }

    #[derive(Default)]
    struct Account {
        id: i64,
        owner: Option<ObjectRef>,
    }

    impl InfoMappable for Account {
        fn write_info(&self, info: &mut ObjectInfo, _ctx: &mut SerContext) -> crate::error::Result<()> {
            info.add_value("id", self.id);
            if let Some(owner) = &self.owner {
                info.add_object("owner", owner.clone());
            }
            Ok(())
        }
        fn from_info(info: &ObjectInfo, ctx: &mut DeContext) -> crate::error::Result<Self> {
            Ok(Account {
                id: info
                    .i64("id")
                    .ok_or_else(|| Error::Mapping("missing id".to_string()))?,
                owner: info.object("owner", ctx).ok(),
            })
        }
    }

    #[test]
    fn info_bag_roundtrip() {
        let mut map = person_map();
        map.register_info::<Account>(&["Account"]).unwrap();

        let owner = new_object(Person {
            name: "fred".to_string(),
            age: 42,
        });
        let account = new_object(Account {
            id: 12345,
            owner: Some(owner),
        });
        let msg = serialize(&map, &account).unwrap();
        let back = deserialize_as::<Account>(&map, &msg).unwrap();
        let borrowed = back.borrow();
        assert_eq!(borrowed.id, 12345);
        assert_eq!(
            object_value::<Person>(borrowed.owner.as_ref().unwrap())
                .unwrap()
                .name,
            "fred"
        );
    }

    #[test]
    fn list_surrogate_roundtrip() {
        let mut map = TypeMap::new();
        map.register_list::<i32>(&["IntList"]).unwrap();
        let list = new_object(vec![3i32, 1, 4, 1, 5]);
        let msg = serialize(&map, &list).unwrap();
        // Elements are repeated fields at ordinal 1.
        assert_eq!(msg.fields_by_ordinal(1).count(), 5);
        let back = deserialize_as::<Vec<i32>>(&map, &msg).unwrap();
        assert_eq!(*back.borrow(), vec![3, 1, 4, 1, 5]);
    }

    #[test]
    fn object_list_shares_elements() {
        let mut map = person_map();
        map.register_object_list(&["PersonList"]).unwrap();
        let fred = new_object(Person {
            name: "fred".to_string(),
            age: 42,
        });
        let list = new_object(vec![fred.clone(), fred]);
        let msg = serialize(&map, &list).unwrap();

        let back = deserialize_as::<Vec<ObjectRef>>(&map, &msg).unwrap();
        let items = back.borrow();
        assert_eq!(items.len(), 2);
        assert!(Rc::ptr_eq(&items[0], &items[1]));
    }

    #[test]
    fn map_surrogate_pairs_by_position() {
        let mut map = TypeMap::new();
        map.register_map::<String, i32>(&["Tally"]).unwrap();
        let tally = new_object(vec![
            ("a".to_string(), 1i32),
            ("b".to_string(), 2),
        ]);
        let msg = serialize(&map, &tally).unwrap();
        let back = deserialize_as::<Vec<(String, i32)>>(&map, &msg).unwrap();
        assert_eq!(
            *back.borrow(),
            vec![("a".to_string(), 1), ("b".to_string(), 2)]
        );

        // A missing value truncates the pairing to the shorter side.
        let mut truncated = Message::new();
        truncated.add_ordinal(1, "a");
        truncated.add_ordinal(1, "b");
        truncated.add_ordinal(2, 1i32);
        let back = deserialize_as::<Vec<(String, i32)>>(&map, &truncated).unwrap();
        assert_eq!(*back.borrow(), vec![("a".to_string(), 1)]);
    }

    #[test]
    fn unregistered_type_fails() {
        let map = TypeMap::new();
        let obj = new_object(Person::default());
        assert!(matches!(
            serialize(&map, &obj),
            Err(Error::UnregisteredType(_))
        ));
    }

    #[test]
    fn out_of_range_reference_fails() {
        let map = family_map();
        let mut msg = Message::new();
        msg.add_ordinal(TYPE_ORDINAL, "Parent");
        msg.add("left", 5i32).unwrap();
        match deserialize(&map, &msg) {
            Err(Error::BadReference { delta: 5, .. }) => {}
            other => panic!("expected BadReference, got {:?}", other),
        }

        let mut msg = Message::new();
        msg.add_ordinal(TYPE_ORDINAL, "Parent");
        msg.add("left", -3i32).unwrap();
        assert!(matches!(
            deserialize(&map, &msg),
            Err(Error::BadReference { delta: -3, .. })
        ));
    }

    #[test]
    fn forward_type_reference_fails() {
        let map = person_map();
        let mut msg = Message::new();
        msg.add_ordinal(TYPE_ORDINAL, 1i32);
        assert!(matches!(
            deserialize(&map, &msg),
            Err(Error::BadReference { delta: 1, .. })
        ));
    }

    #[test]
    fn graph_survives_binary_encoding() {
        use crate::envelope::Envelope;
        let map = family_map();
        let child = new_object(Person {
            name: "kid".to_string(),
            age: 9,
        });
        let parent = new_object(Parent {
            left: Some(child.clone()),
            right: Some(child),
        });

        let msg = serialize(&map, &parent).unwrap();
        let bytes = Envelope::new(msg).encode_to_vec().unwrap();
        let decoded = Envelope::decode_from_slice(&bytes).unwrap();
        let back = deserialize_as::<Parent>(&map, &decoded.message).unwrap();
        let borrowed = back.borrow();
        assert!(Rc::ptr_eq(
            borrowed.left.as_ref().unwrap(),
            borrowed.right.as_ref().unwrap()
        ));
    }
}

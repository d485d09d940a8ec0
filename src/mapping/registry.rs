//! The type map: runtime type to surrogate, with the wire names used to
//! identify each type across the stream.

use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashMap;

use super::surrogate::{
    BeanSurrogate, HookSurrogate, InfoMappable, InfoSurrogate, ListSurrogate, MapSurrogate,
    MessageMappable, ObjectListSurrogate, Surrogate, ValueMappable,
};
use super::ObjectRef;
use crate::error::{Error, Result};

pub(crate) struct TypeEntry {
    pub(crate) names: Vec<String>,
    pub(crate) surrogate: Box<dyn Surrogate>,
}

/// Registry of surrogates keyed by runtime type and by wire type name.
/// Built once, then treated as read-only; contexts borrow it immutably.
#[derive(Default)]
pub struct TypeMap {
    entries: Vec<TypeEntry>,
    by_type: HashMap<TypeId, usize>,
    by_name: HashMap<String, usize>,
}

impl TypeMap {
    pub fn new() -> TypeMap {
        TypeMap::default()
    }

    /// Register a surrogate for `T` under the given wire names, most
    /// specific first. Registering a type or name twice is an error.
    pub fn register<T: 'static>(
        &mut self,
        names: &[&str],
        surrogate: Box<dyn Surrogate>,
    ) -> Result<()> {
        let tid = TypeId::of::<RefCell<T>>();
        if self.by_type.contains_key(&tid) {
            return Err(Error::Mapping(format!(
                "type {} is already registered",
                std::any::type_name::<T>()
            )));
        }
        for name in names {
            if self.by_name.contains_key(*name) {
                return Err(Error::Mapping(format!(
                    "type name \"{}\" is already registered",
                    name
                )));
            }
        }
        let index = self.entries.len();
        self.entries.push(TypeEntry {
            names: names.iter().map(|n| n.to_string()).collect(),
            surrogate,
        });
        self.by_type.insert(tid, index);
        for name in names {
            self.by_name.insert(name.to_string(), index);
        }
        Ok(())
    }

    /// Register a type that maps itself through [`MessageMappable`].
    pub fn register_hook<T: MessageMappable>(&mut self, names: &[&str]) -> Result<()> {
        self.register::<T>(names, Box::new(HookSurrogate::<T>::new()))
    }

    /// Register a type that maps through a name/value bag.
    pub fn register_info<T: InfoMappable + Default>(&mut self, names: &[&str]) -> Result<()> {
        self.register::<T>(names, Box::new(InfoSurrogate::<T>::new()))
    }

    /// Register a property-table surrogate.
    pub fn register_bean<T: Default + 'static>(
        &mut self,
        names: &[&str],
        bean: BeanSurrogate<T>,
    ) -> Result<()> {
        self.register::<T>(names, Box::new(bean))
    }

    /// Register `Vec<T>` for a leaf-valued element type.
    pub fn register_list<T: ValueMappable>(&mut self, names: &[&str]) -> Result<()> {
        self.register::<Vec<T>>(names, Box::new(ListSurrogate::<T>::new()))
    }

    /// Register `Vec<ObjectRef>`, a list whose elements are mapped objects.
    pub fn register_object_list(&mut self, names: &[&str]) -> Result<()> {
        self.register::<Vec<ObjectRef>>(names, Box::new(ObjectListSurrogate))
    }

    /// Register `Vec<(K, V)>`, an insertion-ordered dictionary with
    /// leaf-valued keys and values.
    pub fn register_map<K: ValueMappable, V: ValueMappable>(
        &mut self,
        names: &[&str],
    ) -> Result<()> {
        self.register::<Vec<(K, V)>>(names, Box::new(MapSurrogate::<K, V>::new()))
    }

    pub(crate) fn entry_for_type(&self, tid: TypeId) -> Option<&TypeEntry> {
        self.by_type.get(&tid).map(|&i| &self.entries[i])
    }

    pub(crate) fn entry_for_name(&self, name: &str) -> Option<&TypeEntry> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Default)]
    struct Thing;

    impl MessageMappable for Thing {
        fn to_message(
            &self,
            _msg: &mut crate::message::Message,
            _ctx: &mut super::super::SerContext,
        ) -> Result<()> {
            Ok(())
        }
        fn from_message(
            _msg: &crate::message::Message,
            _ctx: &mut super::super::DeContext,
        ) -> Result<Self> {
            Ok(Thing)
        }
    }

    #[test]
    fn duplicate_type_rejected() {
        let mut map = TypeMap::new();
        map.register_hook::<Thing>(&["thing"]).unwrap();
        assert!(map.register_hook::<Thing>(&["other"]).is_err());
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut map = TypeMap::new();
        map.register_hook::<Thing>(&["thing"]).unwrap();
        assert!(map.register_list::<i32>(&["thing"]).is_err());
    }

    #[test]
    fn lookup_by_any_name() {
        let mut map = TypeMap::new();
        map.register_hook::<Thing>(&["com.example.Thing", "Thing"])
            .unwrap();
        assert!(map.entry_for_name("com.example.Thing").is_some());
        assert!(map.entry_for_name("Thing").is_some());
        assert!(map.entry_for_name("Missing").is_none());
    }
}

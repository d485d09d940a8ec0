//! Taxonomies map field ordinals to names, letting writers omit names from
//! the wire. Which taxonomy applies is chosen per envelope through its
//! 16-bit taxonomy id and a resolver hook supplied in the codec settings.

use std::collections::HashMap;
use std::rc::Rc;

/// An external ordinal-to-name mapping.
pub trait Taxonomy {
    /// The name assigned to an ordinal, if any.
    fn field_name(&self, ordinal: i16) -> Option<&str>;

    /// The ordinal assigned to a name, if any.
    fn field_ordinal(&self, name: &str) -> Option<i16>;
}

/// Resolves an envelope's taxonomy id to a taxonomy. Returning `None` means
/// names simply stay as they appear on the wire.
pub type TaxonomyResolver = Rc<dyn Fn(i16) -> Option<Rc<dyn Taxonomy>>>;

/// An in-memory taxonomy backed by hash maps in both directions.
#[derive(Clone, Debug, Default)]
pub struct MapTaxonomy {
    by_ordinal: HashMap<i16, String>,
    by_name: HashMap<String, i16>,
}

impl MapTaxonomy {
    pub fn new(entries: impl IntoIterator<Item = (i16, String)>) -> MapTaxonomy {
        let mut by_ordinal = HashMap::new();
        let mut by_name = HashMap::new();
        for (ordinal, name) in entries {
            by_name.insert(name.clone(), ordinal);
            by_ordinal.insert(ordinal, name);
        }
        MapTaxonomy {
            by_ordinal,
            by_name,
        }
    }
}

impl Taxonomy for MapTaxonomy {
    fn field_name(&self, ordinal: i16) -> Option<&str> {
        self.by_ordinal.get(&ordinal).map(String::as_str)
    }

    fn field_ordinal(&self, name: &str) -> Option<i16> {
        self.by_name.get(name).copied()
    }
}

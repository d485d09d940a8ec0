//! Self-describing hierarchical binary messages.
//!
//! A message is an ordered sequence of typed fields. Each field optionally
//! carries a short name and/or a 16-bit ordinal, and may itself hold a nested
//! sub-message. The crate provides:
//!
//! - the binary wire codec (envelope framing, packed field prefixes, the
//!   built-in type dictionary),
//! - an event-based streaming layer ([`StreamReader`]/[`StreamWriter`]) that
//!   lets any source feed any sink without materializing a tree,
//! - a JSON encoding speaking the same event model,
//! - a mutable in-memory tree ([`Message`]) with typed, coercing getters,
//! - an object-graph mapping layer ([`mapping`]) handling shared references
//!   and cycles through per-stream reference ids.

pub mod datetime;
pub mod decode;
pub mod encode;
pub mod envelope;
pub mod error;
pub mod json;
pub mod mapping;
pub mod message;
pub mod prefix;
pub mod stream;
pub mod taxonomy;
pub mod value;
pub mod wire_type;

pub use datetime::{Accuracy, DateTime};
pub use decode::BinaryReader;
pub use encode::{BinaryWriter, CodecSettings};
pub use envelope::Envelope;
pub use error::{Error, Result};
pub use json::{JsonReader, JsonSettings, JsonWriter};
pub use message::{Field, Message};
pub use stream::{StreamEvent, StreamPipe, StreamReader, StreamWriter, TreeReader, TreeWriter};
pub use taxonomy::{MapTaxonomy, Taxonomy, TaxonomyResolver};
pub use value::Value;
pub use wire_type::TypeDictionary;

/// Maximum encoded length of a field name, in UTF-8 bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Maximum sub-message nesting depth accepted by readers and writers.
pub const MAX_DEPTH: usize = 100;

/// Byte length of the envelope header preceding the top-level message
/// payload. The envelope size field counts these bytes too.
pub const ENVELOPE_HEADER_SIZE: usize = 8;

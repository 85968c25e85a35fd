pub mod entity;
pub mod key;
pub mod sets;
pub mod value;

pub use entity::{EntityKind, FileEntry, Ident, Tag};
pub use key::{Key, UNTAGGED};
pub use value::{Value, ValueKind};

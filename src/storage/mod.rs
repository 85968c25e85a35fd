pub mod connection;
pub mod repository;

pub use connection::{Store, SCHEMA_VERSION};
pub use repository::Repository;

/// A `tag` table row, as loaded for the startup rebuild.
#[derive(Debug, Clone)]
pub struct TagRow {
    pub id: u64,
    pub name: String,
    pub kind: u8,
    pub default_value: Option<Vec<u8>>,
    pub min_value: Option<i64>,
    pub max_value: Option<i64>,
    pub parent: Option<u64>,
}

/// A `file_tag` table row.
#[derive(Debug, Clone)]
pub struct LinkRow {
    pub file: u64,
    pub tag: u64,
    pub value: Option<Vec<u8>>,
}

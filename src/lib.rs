//! tagcabinet: a tag-based virtual filesystem engine
//!
//! Files carry an arbitrary set of tags instead of living in a
//! directory tree; "directories" are computed as the intersection of
//! the files carrying every tag on the path walked so far. This crate
//! is the indexing and query core: the [`TagDB`] registry owning all
//! Tag and File entities, the [`FileCabinet`] keeping the per-tag
//! drawers and tag-union indexes in lock-step with a SQLite store, and
//! the [`Stage`] holding proposed-but-uncommitted tags. Protocol
//! bindings (FUSE et al.), path parsing, and process bootstrap live in
//! host crates; this one is a synchronous in-process library.

pub mod cabinet;
pub mod config;
pub mod core;
pub mod error;
pub mod events;
pub mod stage;
pub mod storage;
pub mod tagdb;

pub use cabinet::FileCabinet;
pub use config::EngineConfig;
pub use crate::core::{EntityKind, FileEntry, Key, Tag, Value, ValueKind, UNTAGGED};
pub use error::{EngineError, Result};
pub use events::{ChangeEvent, Notifier};
pub use stage::Stage;
pub use storage::{Store, SCHEMA_VERSION};
pub use tagdb::TagDB;

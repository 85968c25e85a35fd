//! File and Tag entities
//!
//! Both entity types share an [`Ident`]: the registry-assigned id plus
//! a name guarded by a timed mutex. Renames and cross-entity name
//! comparisons acquire the lock with a bounded wait and degrade to a
//! logged no-op (or id-order fallback) on timeout, so no caller ever
//! blocks forever on a contended entity. Self-comparison short-circuits
//! before any lock attempt.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::core::key::Key;
use crate::core::value::{Value, ValueKind};
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    File,
    Tag,
}

/// Shared identity: id, lock-guarded name, and the bounded lock wait.
#[derive(Debug)]
pub struct Ident {
    id: u64,
    name: Mutex<String>,
    lock_timeout: Duration,
}

impl Ident {
    pub fn new(id: u64, name: impl Into<String>, lock_timeout: Duration) -> Self {
        Self {
            id,
            name: Mutex::new(name.into()),
            lock_timeout,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Reads the current name. Plain acquire: the read path never holds
    /// a second lock, so it cannot participate in a deadlock.
    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    /// Renames under the timed lock. On timeout the rename is dropped,
    /// a warning is logged, and `false` is returned; the caller may
    /// retry.
    pub fn set_name(&self, new_name: &str) -> bool {
        match self.name.try_lock_for(self.lock_timeout) {
            Some(mut guard) => {
                *guard = new_name.to_string();
                true
            }
            None => {
                tracing::warn!("rename of entity {} timed out; skipped", self.id);
                false
            }
        }
    }

    pub fn id_cmp(&self, other: &Ident) -> Ordering {
        self.id.cmp(&other.id)
    }

    /// Name order, ties broken by id. Used for stable directory sorts.
    pub fn name_id_cmp(&self, other: &Ident) -> Ordering {
        self.name_cmp(other).then(self.id.cmp(&other.id))
    }

    /// Compares names under both entity locks, acquired in id order so
    /// two concurrent comparisons can never deadlock each other.
    pub fn name_cmp(&self, other: &Ident) -> Ordering {
        if std::ptr::eq(self, other) || self.id == other.id {
            return Ordering::Equal;
        }
        let (first, second, flip) = if self.id < other.id {
            (self, other, false)
        } else {
            (other, self, true)
        };
        let Some(a) = first.name.try_lock_for(first.lock_timeout) else {
            tracing::warn!("name compare on entity {} timed out; using id order", first.id);
            return self.id.cmp(&other.id);
        };
        let Some(b) = second.name.try_lock_for(second.lock_timeout) else {
            tracing::warn!("name compare on entity {} timed out; using id order", second.id);
            return self.id.cmp(&other.id);
        };
        let ord = a.cmp(&b);
        if flip {
            ord.reverse()
        } else {
            ord
        }
    }
}

/// A file: identity plus its tag-id → value map.
#[derive(Debug)]
pub struct FileEntry {
    ident: Ident,
    tags: RwLock<HashMap<u64, Value>>,
}

impl FileEntry {
    pub fn new(id: u64, name: impl Into<String>, lock_timeout: Duration) -> Self {
        Self {
            ident: Ident::new(id, name, lock_timeout),
            tags: RwLock::new(HashMap::new()),
        }
    }

    pub fn ident(&self) -> &Ident {
        &self.ident
    }

    pub fn id(&self) -> u64 {
        self.ident.id()
    }

    pub fn name(&self) -> String {
        self.ident.name()
    }

    pub fn entity_kind(&self) -> EntityKind {
        EntityKind::File
    }

    pub fn has_tag(&self, tag_id: u64) -> bool {
        self.tags.read().contains_key(&tag_id)
    }

    pub fn tag_value(&self, tag_id: u64) -> Option<Value> {
        self.tags.read().get(&tag_id).cloned()
    }

    /// The file's full tag set as a Key, for drawer removal.
    pub fn tag_key(&self) -> Key {
        self.tags.read().keys().copied().collect()
    }

    pub fn tag_ids(&self) -> Vec<u64> {
        self.tags.read().keys().copied().collect()
    }

    pub fn ntags(&self) -> usize {
        self.tags.read().len()
    }

    pub fn is_untagged(&self) -> bool {
        self.tags.read().is_empty()
    }

    pub(crate) fn set_tag(&self, tag_id: u64, value: Value) {
        self.tags.write().insert(tag_id, value);
    }

    pub(crate) fn unset_tag(&self, tag_id: u64) -> bool {
        self.tags.write().remove(&tag_id).is_some()
    }
}

/// A tag: identity plus the kind of value it accepts, its default,
/// optional integer bounds, aliases, and an optional parent (the
/// plugin-tag tree is a relation, not a subtype).
#[derive(Debug)]
pub struct Tag {
    ident: Ident,
    kind: ValueKind,
    default_value: RwLock<Option<Value>>,
    min_value: RwLock<Option<i64>>,
    max_value: RwLock<Option<i64>>,
    aliases: RwLock<Vec<String>>,
    parent: RwLock<Option<u64>>,
}

impl Tag {
    pub fn new(id: u64, name: impl Into<String>, kind: ValueKind, lock_timeout: Duration) -> Self {
        Self {
            ident: Ident::new(id, name, lock_timeout),
            kind,
            default_value: RwLock::new(None),
            min_value: RwLock::new(None),
            max_value: RwLock::new(None),
            aliases: RwLock::new(Vec::new()),
            parent: RwLock::new(None),
        }
    }

    pub fn ident(&self) -> &Ident {
        &self.ident
    }

    pub fn id(&self) -> u64 {
        self.ident.id()
    }

    pub fn name(&self) -> String {
        self.ident.name()
    }

    pub fn value_kind(&self) -> ValueKind {
        self.kind
    }

    pub fn set_default_value(&self, value: Option<Value>) {
        *self.default_value.write() = value;
    }

    pub fn default_value(&self) -> Option<Value> {
        self.default_value.read().clone()
    }

    /// A fresh copy of the tag's default, or the kind's global default.
    /// Always a copy, never a shared reference.
    pub fn tag_new_default(&self) -> Value {
        self.default_value
            .read()
            .clone()
            .unwrap_or_else(|| self.kind.default_value())
    }

    /// Integer bounds are only meaningful for Int-kind tags.
    pub fn set_bounds(&self, min: Option<i64>, max: Option<i64>) {
        *self.min_value.write() = min;
        *self.max_value.write() = max;
    }

    pub fn bounds(&self) -> (Option<i64>, Option<i64>) {
        (*self.min_value.read(), *self.max_value.read())
    }

    pub fn set_parent(&self, parent: Option<u64>) {
        *self.parent.write() = parent;
    }

    pub fn parent(&self) -> Option<u64> {
        *self.parent.read()
    }

    /// Rejects values of the wrong kind, and out-of-range integers when
    /// bounds are set.
    pub fn check_value(&self, value: &Value) -> Result<()> {
        if value.kind() != self.kind {
            return Err(EngineError::Conflict(format!(
                "tag '{}' accepts {:?} values, got {:?}",
                self.name(),
                self.kind,
                value.kind()
            )));
        }
        if let Value::Int(n) = value {
            if let Some(min) = *self.min_value.read() {
                if *n < min {
                    return Err(EngineError::Conflict(format!(
                        "value {} below minimum {} for tag '{}'",
                        n,
                        min,
                        self.name()
                    )));
                }
            }
            if let Some(max) = *self.max_value.read() {
                if *n > max {
                    return Err(EngineError::Conflict(format!(
                        "value {} above maximum {} for tag '{}'",
                        n,
                        max,
                        self.name()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Adds an alias to the tag's own list. Keeping the registry's
    /// name map in sync is the caller's job; the tag holds no
    /// back-reference.
    pub fn add_alias(&self, alias: &str) {
        let mut aliases = self.aliases.write();
        if !aliases.iter().any(|a| a == alias) {
            aliases.push(alias.to_string());
        }
    }

    pub fn remove_alias(&self, alias: &str) -> bool {
        let mut aliases = self.aliases.write();
        if let Some(pos) = aliases.iter().position(|a| a == alias) {
            aliases.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn aliases(&self) -> Vec<String> {
        self.aliases.read().clone()
    }

    pub fn entity_kind(&self) -> EntityKind {
        EntityKind::Tag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(100);

    #[test]
    fn test_self_compare_never_locks() {
        let ident = Ident::new(1, "a", TIMEOUT);
        // Hold the lock; self-comparison must still return immediately.
        let _guard = ident.name.lock();
        assert_eq!(ident.name_cmp(&ident), Ordering::Equal);
    }

    #[test]
    fn test_name_id_cmp_breaks_ties_by_id() {
        let a = Ident::new(1, "same", TIMEOUT);
        let b = Ident::new(2, "same", TIMEOUT);
        assert_eq!(a.name_id_cmp(&b), Ordering::Less);
        assert_eq!(b.name_id_cmp(&a), Ordering::Greater);
    }

    #[test]
    fn test_set_name_times_out_as_noop() {
        let ident = Ident::new(3, "before", TIMEOUT);
        let guard = ident.name.lock();
        assert!(!ident.set_name("after"));
        drop(guard);
        assert_eq!(ident.name(), "before");
        assert!(ident.set_name("after"));
        assert_eq!(ident.name(), "after");
    }

    #[test]
    fn test_file_tag_map() {
        let file = FileEntry::new(1, "f", TIMEOUT);
        assert!(file.is_untagged());
        file.set_tag(7, Value::Int(1));
        file.set_tag(9, Value::Int(2));
        assert!(file.has_tag(7));
        assert!(!file.is_untagged());
        let mut ids = file.tag_ids();
        ids.sort_unstable();
        assert_eq!(ids, vec![7, 9]);
        assert!(file.unset_tag(7));
        assert!(!file.unset_tag(7));
    }

    #[test]
    fn test_tag_default_is_a_copy() {
        let tag = Tag::new(4, "rating", ValueKind::Int, TIMEOUT);
        assert_eq!(tag.tag_new_default(), Value::Int(0));
        tag.set_default_value(Some(Value::Int(5)));
        let one = tag.tag_new_default();
        let two = tag.tag_new_default();
        assert_eq!(one, two);
        assert_eq!(one, Value::Int(5));
    }

    #[test]
    fn test_tag_bounds_validation() {
        let tag = Tag::new(5, "rating", ValueKind::Int, TIMEOUT);
        tag.set_bounds(Some(0), Some(10));
        assert!(tag.check_value(&Value::Int(5)).is_ok());
        assert!(tag.check_value(&Value::Int(-1)).is_err());
        assert!(tag.check_value(&Value::Int(11)).is_err());
        assert!(tag.check_value(&Value::Str("x".into())).is_err());
    }

    #[test]
    fn test_alias_list() {
        let tag = Tag::new(6, "colour", ValueKind::Str, TIMEOUT);
        tag.add_alias("color");
        tag.add_alias("color");
        assert_eq!(tag.aliases(), vec!["color".to_string()]);
        assert!(tag.remove_alias("color"));
        assert!(!tag.remove_alias("color"));
    }
}

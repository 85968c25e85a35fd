//! The TagDB registry
//!
//! Owns every Tag and File entity, the tag name→id map (aliases
//! included), and the File Cabinet. All mutations flow through here so
//! the name map, the cabinet, and the backing store stay consistent:
//! storage commits first (multi-row mutations inside one transaction),
//! then the in-memory half is applied. A crash between the two is
//! healed at the next open, which rebuilds every in-memory index from
//! the store.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::cabinet::FileCabinet;
use crate::config::EngineConfig;
use crate::core::entity::{FileEntry, Tag};
use crate::core::key::Key;
use crate::core::value::{Value, ValueKind};
use crate::error::{EngineError, Result};
use crate::events::{ChangeEvent, Notifier};
use crate::stage::Stage;
use crate::storage::{Repository, Store};

type RemovePolicy = Box<dyn Fn(&Tag) -> bool + Send + Sync>;

pub struct TagDB {
    config: EngineConfig,
    store: Arc<Store>,
    tags: DashMap<u64, Arc<Tag>>,
    /// Canonical names and aliases, all resolving to a tag id.
    names: DashMap<String, u64>,
    files: Arc<DashMap<u64, Arc<FileEntry>>>,
    cabinet: FileCabinet,
    stage: Stage,
    file_max_id: AtomicU64,
    tag_max_id: AtomicU64,
    notifier: RwLock<Option<Notifier>>,
    remove_policy: RwLock<Option<RemovePolicy>>,
}

impl TagDB {
    /// Opens (or creates) the store and rebuilds the in-memory indexes
    /// from it.
    pub fn open(config: EngineConfig) -> Result<Self> {
        let store = Arc::new(Store::open(&config)?);
        Self::with_store(config, store)
    }

    /// A registry over a fresh in-memory store. Used by tests and
    /// embedded callers that want no durability.
    pub fn open_in_memory() -> Result<Self> {
        let store = Arc::new(Store::open_in_memory()?);
        Self::with_store(EngineConfig::default(), store)
    }

    fn with_store(config: EngineConfig, store: Arc<Store>) -> Result<Self> {
        let files: Arc<DashMap<u64, Arc<FileEntry>>> = Arc::new(DashMap::new());
        let cabinet = FileCabinet::shared(Arc::clone(&files), Arc::clone(&store));
        let db = Self {
            config,
            store,
            tags: DashMap::new(),
            names: DashMap::new(),
            files,
            cabinet,
            stage: Stage::new(),
            file_max_id: AtomicU64::new(0),
            tag_max_id: AtomicU64::new(0),
            notifier: RwLock::new(None),
            remove_policy: RwLock::new(None),
        };
        db.rebuild()?;
        Ok(db)
    }

    /// Rebuilds every in-memory index from the store, which is the
    /// single source of truth.
    fn rebuild(&self) -> Result<()> {
        let timeout = self.config.lock_timeout();
        self.store.with_conn(|conn| {
            let repo = Repository::new(conn);

            for row in repo.load_tags()? {
                let kind = ValueKind::from_code(row.kind).unwrap_or(ValueKind::Str);
                let tag = Arc::new(Tag::new(row.id, row.name.clone(), kind, timeout));
                if let Some(bytes) = &row.default_value {
                    match Value::from_binary(bytes) {
                        Ok(value) => tag.set_default_value(Some(value)),
                        Err(e) => {
                            tracing::warn!("tag {}: unreadable default value: {}", row.id, e)
                        }
                    }
                }
                tag.set_bounds(row.min_value, row.max_value);
                tag.set_parent(row.parent);
                self.names.insert(row.name, row.id);
                self.tags.insert(row.id, tag);
                self.cabinet.ensure_drawer(row.id);
            }

            for (tag_id, alias) in repo.load_aliases()? {
                if let Some(tag) = self.tags.get(&tag_id) {
                    tag.add_alias(&alias);
                    self.names.insert(alias, tag_id);
                }
            }

            for (id, name) in repo.load_files()? {
                self.files
                    .insert(id, Arc::new(FileEntry::new(id, name, timeout)));
            }

            for link in repo.load_links()? {
                let Some(file) = self.files.get(&link.file).map(|e| Arc::clone(e.value())) else {
                    tracing::warn!("link row for unknown file {}", link.file);
                    continue;
                };
                let value = match &link.value {
                    Some(bytes) => Value::from_binary(bytes).unwrap_or_else(|e| {
                        tracing::warn!("link ({}, {}): unreadable value: {}", link.file, link.tag, e);
                        self.default_for(link.tag)
                    }),
                    None => self.default_for(link.tag),
                };
                file.set_tag(link.tag, value);
                self.cabinet.insert_mem(link.tag, &file);
            }

            let (file_max, tag_max) = repo.max_ids()?;
            self.file_max_id.store(file_max, AtomicOrdering::SeqCst);
            self.tag_max_id.store(tag_max, AtomicOrdering::SeqCst);
            Ok(())
        })?;

        tracing::info!(
            "Rebuilt registry: {} tags, {} files",
            self.tags.len(),
            self.files.len()
        );
        Ok(())
    }

    fn default_for(&self, tag_id: u64) -> Value {
        self.tags
            .get(&tag_id)
            .map(|t| t.tag_new_default())
            .unwrap_or(Value::Str(String::new()))
    }

    fn notify(&self, event: ChangeEvent) {
        if let Some(hook) = &*self.notifier.read() {
            hook(&event);
        }
    }

    /// Installs the fire-and-forget change hook.
    pub fn set_notifier(&self, notifier: Notifier) {
        *self.notifier.write() = Some(notifier);
    }

    /// Overrides the tag-removal policy. The base policy permits every
    /// removal.
    pub fn set_remove_policy(&self, policy: RemovePolicy) {
        *self.remove_policy.write() = Some(policy);
    }

    fn can_remove_tag(&self, tag: &Tag) -> bool {
        match &*self.remove_policy.read() {
            Some(policy) => policy(tag),
            None => true,
        }
    }

    // ----- tag lifecycle -----

    /// Returns the existing tag of that name (canonical or alias), or
    /// mints one: string-kinded, registered, persisted, with its drawer
    /// materialized.
    pub fn make_tag(&self, name: &str) -> Result<Arc<Tag>> {
        self.make_tag_with_kind(name, ValueKind::Str)
    }

    pub fn make_tag_with_kind(&self, name: &str, kind: ValueKind) -> Result<Arc<Tag>> {
        if let Some(existing) = self.lookup_tag(name) {
            return Ok(existing);
        }

        let id = self.tag_max_id.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        let tag = Arc::new(Tag::new(id, name, kind, self.config.lock_timeout()));

        let inserted = self.store.with_conn(|conn| {
            match Repository::new(conn).insert_tag(id, name, kind.code(), None, None, None, None) {
                Ok(()) => Ok(true),
                // Lost a race on the unique name; the winner's tag is used.
                Err(EngineError::Database(rusqlite::Error::SqliteFailure(e, _)))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Ok(false)
                }
                Err(e) => Err(e),
            }
        })?;
        if !inserted {
            return self
                .lookup_tag(name)
                .ok_or_else(|| EngineError::Conflict(format!("tag '{}' vanished mid-create", name)));
        }

        self.tags.insert(id, Arc::clone(&tag));
        self.names.insert(name.to_string(), id);
        self.cabinet.ensure_drawer(id);
        tracing::debug!("created tag '{}' (id {})", name, id);
        self.notify(ChangeEvent::TagCreated { id, name: name.to_string() });
        Ok(tag)
    }

    /// Deletes a tag. Files carrying it simply lose it; they are never
    /// deleted. Returns false (no mutation) when the removal policy
    /// forbids it.
    pub fn delete_tag(&self, tag: &Arc<Tag>) -> Result<bool> {
        if !self.can_remove_tag(tag) {
            return Ok(false);
        }
        let id = tag.id();

        self.store.with_tx(|tx| {
            let repo = Repository::new(tx);
            repo.delete_aliases_for_tag(id)?;
            repo.unlink_all_for_tag(id)?;
            repo.delete_tag(id)?;
            Ok(())
        })?;

        for file in self.cabinet.get_drawer(id) {
            file.unset_tag(id);
        }
        self.cabinet.remove_drawer_mem(id);
        self.names.remove(&tag.name());
        for alias in tag.aliases() {
            self.names.remove(&alias);
        }
        self.tags.remove(&id);
        self.stage.remove_all(id);
        tracing::debug!("deleted tag '{}' (id {})", tag.name(), id);
        self.notify(ChangeEvent::TagDeleted { id });
        Ok(true)
    }

    /// Registers an alias. Fails (false) when the name already resolves
    /// to a different tag.
    pub fn alias_tag(&self, tag: &Arc<Tag>, alias: &str) -> Result<bool> {
        if let Some(existing) = self.names.get(alias) {
            if *existing.value() == tag.id() {
                return Ok(true);
            }
            tracing::warn!(
                "alias '{}' already resolves to tag {}, not {}",
                alias,
                existing.value(),
                tag.id()
            );
            return Ok(false);
        }

        self.store
            .with_conn(|conn| Repository::new(conn).insert_alias(tag.id(), alias))?;
        self.names.insert(alias.to_string(), tag.id());
        tag.add_alias(alias);
        self.notify(ChangeEvent::TagAliased { id: tag.id(), alias: alias.to_string() });
        Ok(true)
    }

    /// Drops an alias; false if the alias does not belong to this tag.
    pub fn unalias_tag(&self, tag: &Arc<Tag>, alias: &str) -> Result<bool> {
        match self.names.get(alias).map(|e| *e.value()) {
            Some(id) if id == tag.id() => {}
            _ => return Ok(false),
        }
        self.store
            .with_conn(|conn| {
                Repository::new(conn).delete_alias(alias)?;
                Ok(())
            })?;
        self.names.remove(alias);
        tag.remove_alias(alias);
        self.notify(ChangeEvent::TagUnaliased { id: tag.id(), alias: alias.to_string() });
        Ok(true)
    }

    /// Renames a tag, re-keying the name map. `Ok(false)` means the
    /// entity lock timed out and the rename was skipped (retryable);
    /// renaming onto an occupied name is a conflict.
    pub fn set_tag_name(&self, tag: &Arc<Tag>, new_name: &str) -> Result<bool> {
        let old_name = tag.name();
        if old_name == new_name {
            return Ok(true);
        }
        if let Some(existing) = self.names.get(new_name) {
            if *existing.value() != tag.id() {
                return Err(EngineError::Conflict(format!(
                    "name '{}' already resolves to tag {}",
                    new_name,
                    existing.value()
                )));
            }
        }

        // Memory first, rolled back if the storage write fails.
        if !tag.ident().set_name(new_name) {
            return Ok(false);
        }
        if let Err(e) = self
            .store
            .with_conn(|conn| Repository::new(conn).update_tag_name(tag.id(), new_name))
        {
            tag.ident().set_name(&old_name);
            return Err(e);
        }

        self.names.remove(&old_name);
        self.names.insert(new_name.to_string(), tag.id());
        self.notify(ChangeEvent::TagRenamed {
            id: tag.id(),
            old_name,
            new_name: new_name.to_string(),
        });
        Ok(true)
    }

    /// Persists a new default value for the tag.
    pub fn set_tag_default(&self, tag: &Arc<Tag>, value: Option<Value>) -> Result<()> {
        if let Some(v) = &value {
            tag.check_value(v)?;
        }
        let blob = value.as_ref().map(|v| v.to_binary());
        self.store
            .with_conn(|conn| Repository::new(conn).update_tag_default(tag.id(), blob.as_deref()))?;
        tag.set_default_value(value);
        Ok(())
    }

    // ----- file lifecycle -----

    /// Creates a new, untagged file with a fresh id.
    pub fn make_file(&self, name: &str) -> Result<Arc<FileEntry>> {
        let id = self.file_max_id.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        self.store
            .with_conn(|conn| Repository::new(conn).insert_file(id, name))?;
        let file = Arc::new(FileEntry::new(id, name, self.config.lock_timeout()));
        self.files.insert(id, Arc::clone(&file));
        tracing::debug!("created file '{}' (id {})", name, id);
        self.notify(ChangeEvent::FileCreated { id, name: name.to_string() });
        Ok(file)
    }

    /// Removes the file from every drawer, persists the deletion, then
    /// frees it, in that order.
    pub fn delete_file(&self, file: &Arc<FileEntry>) -> Result<()> {
        let id = file.id();
        self.store.with_tx(|tx| {
            let repo = Repository::new(tx);
            repo.unlink_all_for_file(id)?;
            repo.delete_file(id)?;
            Ok(())
        })?;
        self.cabinet.remove_all_mem(file);
        self.files.remove(&id);
        self.notify(ChangeEvent::FileDeleted { id });
        Ok(())
    }

    /// Renames a file. `Ok(false)` on entity-lock timeout (retryable).
    pub fn set_file_name(&self, file: &Arc<FileEntry>, new_name: &str) -> Result<bool> {
        let old_name = file.name();
        if old_name == new_name {
            return Ok(true);
        }
        if !file.ident().set_name(new_name) {
            return Ok(false);
        }
        if let Err(e) = self
            .store
            .with_conn(|conn| Repository::new(conn).update_file_name(file.id(), new_name))
        {
            file.ident().set_name(&old_name);
            return Err(e);
        }
        self.notify(ChangeEvent::FileRenamed {
            id: file.id(),
            old_name,
            new_name: new_name.to_string(),
        });
        Ok(true)
    }

    // ----- tagging -----

    /// Associates `tag_id` with `file`. Unknown tag or file is a no-op.
    /// A `None` value on an already-carried tag is a no-op (never
    /// overwrites with nothing); otherwise `None` means the tag's
    /// default. The value is always copied into the file's map.
    pub fn add_tag_to_file(
        &self,
        file: &Arc<FileEntry>,
        tag_id: u64,
        value: Option<Value>,
    ) -> Result<()> {
        let Some(tag) = self.tags.get(&tag_id).map(|e| Arc::clone(e.value())) else {
            return Ok(());
        };
        if !self.files.contains_key(&file.id()) {
            return Ok(());
        }
        if value.is_none() && file.has_tag(tag_id) {
            return Ok(());
        }
        let value = match value {
            Some(v) => v,
            None => tag.tag_new_default(),
        };
        tag.check_value(&value)?;

        self.store.with_conn(|conn| {
            Repository::new(conn).link(file.id(), tag_id, Some(&value.to_binary()))
        })?;
        file.set_tag(tag_id, value);
        self.cabinet.insert_mem(tag_id, file);
        self.notify(ChangeEvent::FileTagged { file: file.id(), tag: tag_id });
        Ok(())
    }

    /// Removes the association; idempotent when absent.
    pub fn remove_tag_from_file(&self, file: &Arc<FileEntry>, tag_id: u64) -> Result<()> {
        if !file.has_tag(tag_id) {
            return Ok(());
        }
        self.store.with_conn(|conn| {
            Repository::new(conn).unlink(file.id(), tag_id)?;
            Ok(())
        })?;
        self.cabinet.remove_mem(tag_id, file);
        file.unset_tag(tag_id);
        self.notify(ChangeEvent::FileUntagged { file: file.id(), tag: tag_id });
        Ok(())
    }

    // ----- lookups and enumeration -----

    pub fn lookup_tag(&self, name: &str) -> Option<Arc<Tag>> {
        let id = *self.names.get(name)?.value();
        self.tags.get(&id).map(|e| Arc::clone(e.value()))
    }

    pub fn retrieve_tag(&self, id: u64) -> Option<Arc<Tag>> {
        self.tags.get(&id).map(|e| Arc::clone(e.value()))
    }

    pub fn retrieve_file(&self, id: u64) -> Option<Arc<FileEntry>> {
        self.files.get(&id).map(|e| Arc::clone(e.value()))
    }

    pub fn lookup_file(&self, key: &Key, name: &str) -> Option<Arc<FileEntry>> {
        self.cabinet.lookup_file(key, name)
    }

    pub fn all_files(&self) -> Vec<Arc<FileEntry>> {
        let mut out: Vec<Arc<FileEntry>> =
            self.files.iter().map(|e| Arc::clone(e.value())).collect();
        out.sort_by(|a, b| a.ident().name_id_cmp(b.ident()));
        out
    }

    pub fn all_tags(&self) -> Vec<Arc<Tag>> {
        let mut out: Vec<Arc<Tag>> = self.tags.iter().map(|e| Arc::clone(e.value())).collect();
        out.sort_by(|a, b| a.ident().name_id_cmp(b.ident()));
        out
    }

    pub fn untagged_items(&self) -> Vec<Arc<FileEntry>> {
        self.cabinet.get_untagged_files()
    }

    pub fn ntags(&self) -> usize {
        self.tags.len()
    }

    pub fn nfiles(&self) -> usize {
        self.files.len()
    }

    pub fn cabinet(&self) -> &FileCabinet {
        &self.cabinet
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    /// Staged tags at a path position, resolved to live entities.
    pub fn staged_tags_at(&self, position: &Key) -> Vec<Arc<Tag>> {
        self.stage
            .list_position(position)
            .into_iter()
            .filter_map(|id| self.retrieve_tag(id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_make_tag_is_idempotent_by_name() {
        let db = TagDB::open_in_memory().unwrap();
        let a = db.make_tag("red").unwrap();
        let b = db.make_tag("red").unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(db.ntags(), 1);
    }

    #[test]
    fn test_unknown_tag_or_file_is_noop() {
        let db = TagDB::open_in_memory().unwrap();
        let file = db.make_file("a").unwrap();
        db.add_tag_to_file(&file, 999, None).unwrap();
        assert!(file.is_untagged());

        let orphan = Arc::new(FileEntry::new(888, "ghost", db.config.lock_timeout()));
        let tag = db.make_tag("t").unwrap();
        db.add_tag_to_file(&orphan, tag.id(), None).unwrap();
        assert_eq!(db.cabinet().drawer_size(tag.id()), 0);
    }

    #[test]
    fn test_none_value_never_overwrites() {
        let db = TagDB::open_in_memory().unwrap();
        let tag = db.make_tag("note").unwrap();
        let file = db.make_file("a").unwrap();

        db.add_tag_to_file(&file, tag.id(), Some(Value::Str("kept".into())))
            .unwrap();
        db.add_tag_to_file(&file, tag.id(), None).unwrap();
        assert_eq!(file.tag_value(tag.id()), Some(Value::Str("kept".into())));

        db.add_tag_to_file(&file, tag.id(), Some(Value::Str("new".into())))
            .unwrap();
        assert_eq!(file.tag_value(tag.id()), Some(Value::Str("new".into())));
    }

    #[test]
    fn test_int_tag_bounds_enforced() {
        let db = TagDB::open_in_memory().unwrap();
        let tag = db.make_tag_with_kind("rating", ValueKind::Int).unwrap();
        tag.set_bounds(Some(1), Some(5));
        let file = db.make_file("a").unwrap();

        assert!(db.add_tag_to_file(&file, tag.id(), Some(Value::Int(9))).is_err());
        assert!(!file.has_tag(tag.id()));
        db.add_tag_to_file(&file, tag.id(), Some(Value::Int(3))).unwrap();
        assert!(file.has_tag(tag.id()));
    }

    #[test]
    fn test_tag_rename_rekeys_name_map() {
        let db = TagDB::open_in_memory().unwrap();
        let t = db.make_tag("old").unwrap();

        assert!(db.set_tag_name(&t, "new").unwrap());
        assert_eq!(t.name(), "new");
        assert!(db.lookup_tag("old").is_none());
        assert_eq!(db.lookup_tag("new").unwrap().id(), t.id());
    }

    #[test]
    fn test_rename_conflict_refused() {
        let db = TagDB::open_in_memory().unwrap();
        let red = db.make_tag("red").unwrap();
        db.make_tag("blue").unwrap();

        let err = db.set_tag_name(&red, "blue");
        assert!(matches!(err, Err(EngineError::Conflict(_))));
        assert_eq!(red.name(), "red");
        assert!(db.lookup_tag("red").is_some());
    }

    #[test]
    fn test_alias_conflict_refused() {
        let db = TagDB::open_in_memory().unwrap();
        let red = db.make_tag("red").unwrap();
        let blue = db.make_tag("blue").unwrap();

        assert!(db.alias_tag(&red, "crimson").unwrap());
        assert!(!db.alias_tag(&blue, "crimson").unwrap());
        assert_eq!(db.lookup_tag("crimson").unwrap().id(), red.id());
    }

    #[test]
    fn test_remove_policy_blocks_deletion() {
        let db = TagDB::open_in_memory().unwrap();
        let keep = db.make_tag("keep").unwrap();
        db.set_remove_policy(Box::new(|tag| tag.name() != "keep"));

        assert!(!db.delete_tag(&keep).unwrap());
        assert!(db.lookup_tag("keep").is_some());

        let other = db.make_tag("other").unwrap();
        assert!(db.delete_tag(&other).unwrap());
        assert!(db.lookup_tag("other").is_none());
    }

    #[test]
    fn test_ids_are_never_reused() {
        let db = TagDB::open_in_memory().unwrap();
        let t1 = db.make_tag("a").unwrap();
        db.delete_tag(&t1).unwrap();
        let t2 = db.make_tag("b").unwrap();
        assert!(t2.id() > t1.id());

        let f1 = db.make_file("x").unwrap();
        db.delete_file(&f1).unwrap();
        let f2 = db.make_file("y").unwrap();
        assert!(f2.id() > f1.id());
    }

    #[test]
    fn test_change_events_fire_after_mutation() {
        let db = TagDB::open_in_memory().unwrap();
        let seen: Arc<Mutex<Vec<ChangeEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        db.set_notifier(Box::new(move |event| {
            sink.lock().unwrap().push(event.clone());
        }));

        let tag = db.make_tag("red").unwrap();
        let file = db.make_file("block").unwrap();
        db.add_tag_to_file(&file, tag.id(), None).unwrap();

        let events = seen.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                ChangeEvent::TagCreated { id: tag.id(), name: "red".into() },
                ChangeEvent::FileCreated { id: file.id(), name: "block".into() },
                ChangeEvent::FileTagged { file: file.id(), tag: tag.id() },
            ]
        );
    }

    #[test]
    fn test_staged_tags_resolve_and_purge() {
        let db = TagDB::open_in_memory().unwrap();
        let red = db.make_tag("red").unwrap();
        let square = db.make_tag("square").unwrap();
        let pos = Key::from_ids([red.id()]);

        db.stage().add(&pos, square.id());
        let staged = db.staged_tags_at(&pos);
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].id(), square.id());

        db.delete_tag(&square).unwrap();
        assert!(db.staged_tags_at(&pos).is_empty());
    }
}

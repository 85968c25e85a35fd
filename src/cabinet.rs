//! The File Cabinet
//!
//! For every tag id, a drawer: the set of files bearing that tag plus
//! the co-occurrence counts of every other tag seen together with it
//! (the "tag union"). Co-maintained with the `file_tag` table when a
//! store is attached; the in-memory side is a cache the startup rebuild
//! regenerates from the store.
//!
//! Invariants:
//! - a file id appears in drawer `t` iff the file's tag map contains `t`
//! - drawer `t`'s union counts `(t, u)` equal the number of files
//!   carrying both `t` and `u`; an entry disappears when the last such
//!   file loses one of the pair
//!
//! Union bookkeeping is driven by drawer membership at the time of the
//! mutation, so insert/remove sequences balance in any order.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;

use crate::core::entity::FileEntry;
use crate::core::key::Key;
use crate::core::sets;
use crate::error::Result;
use crate::storage::{Repository, Store};

#[derive(Default)]
struct Drawer {
    files: HashSet<u64>,
    union: HashMap<u64, usize>,
}

pub struct FileCabinet {
    drawers: DashMap<u64, Drawer>,
    files: Arc<DashMap<u64, Arc<FileEntry>>>,
    owns_files: bool,
    store: Option<Arc<Store>>,
}

impl FileCabinet {
    /// The common configuration: the file index is shared with (and
    /// populated by) the registry, and mutations mirror to the store.
    pub fn shared(files: Arc<DashMap<u64, Arc<FileEntry>>>, store: Arc<Store>) -> Self {
        Self {
            drawers: DashMap::new(),
            files,
            owns_files: false,
            store: Some(store),
        }
    }

    /// Standalone configuration: pure in-memory indexes, cabinet owns
    /// file storage.
    pub fn in_memory() -> Self {
        Self {
            drawers: DashMap::new(),
            files: Arc::new(DashMap::new()),
            owns_files: true,
            store: None,
        }
    }

    /// Materializes a drawer eagerly (done at tag creation; first
    /// insert would create it lazily anyway).
    pub fn ensure_drawer(&self, tag_id: u64) {
        self.drawers.entry(tag_id).or_default();
    }

    fn is_member(&self, tag_id: u64, file_id: u64) -> bool {
        self.drawers
            .get(&tag_id)
            .map(|d| d.files.contains(&file_id))
            .unwrap_or(false)
    }

    /// Adds `file` to drawer `tag_id`. The file's tag map must already
    /// contain `tag_id`. Idempotent: a second insert of the same pair
    /// is a no-op and leaves the tag union untouched.
    pub fn insert(&self, tag_id: u64, file: &Arc<FileEntry>) -> Result<bool> {
        if let Some(store) = &self.store {
            if self.is_member(tag_id, file.id()) {
                return Ok(false);
            }
            let value = file.tag_value(tag_id).map(|v| v.to_binary());
            store.with_conn(|conn| Repository::new(conn).link(file.id(), tag_id, value.as_deref()))?;
        }
        Ok(self.insert_mem(tag_id, file))
    }

    /// Inserts into every drawer named by `key` in one transaction.
    /// No-op fast path when the file is already present in all of them.
    pub fn insert_all(&self, key: &Key, file: &Arc<FileEntry>) -> Result<bool> {
        let missing: Vec<u64> = key
            .distinct()
            .into_iter()
            .filter(|&t| !self.is_member(t, file.id()))
            .collect();
        if missing.is_empty() {
            return Ok(false);
        }
        if let Some(store) = &self.store {
            store.with_tx(|tx| {
                let repo = Repository::new(tx);
                for &tag_id in &missing {
                    let value = file.tag_value(tag_id).map(|v| v.to_binary());
                    repo.link(file.id(), tag_id, value.as_deref())?;
                }
                Ok(())
            })?;
        }
        for tag_id in missing {
            self.insert_mem(tag_id, file);
        }
        Ok(true)
    }

    /// Removes `file` from drawer `tag_id` and clears the union
    /// contribution this file made between `tag_id` and its other tags.
    pub fn remove(&self, tag_id: u64, file: &Arc<FileEntry>) -> Result<bool> {
        if !self.is_member(tag_id, file.id()) {
            return Ok(false);
        }
        if let Some(store) = &self.store {
            store.with_conn(|conn| {
                Repository::new(conn).unlink(file.id(), tag_id)?;
                Ok(())
            })?;
        }
        Ok(self.remove_mem(tag_id, file))
    }

    /// Removes `file` from every drawer in its current tag set.
    pub fn remove_all(&self, file: &Arc<FileEntry>) -> Result<()> {
        if let Some(store) = &self.store {
            store.with_conn(|conn| {
                Repository::new(conn).unlink_all_for_file(file.id())?;
                Ok(())
            })?;
        }
        self.remove_all_mem(file);
        Ok(())
    }

    /// Deletes the drawer and all its backing rows. Files themselves
    /// are untouched.
    pub fn remove_drawer(&self, tag_id: u64) -> Result<()> {
        if let Some(store) = &self.store {
            store.with_conn(|conn| {
                Repository::new(conn).unlink_all_for_tag(tag_id)?;
                Ok(())
            })?;
        }
        self.remove_drawer_mem(tag_id);
        Ok(())
    }

    // ----- in-memory half, used directly by the registry inside its
    // ----- own transactions

    pub(crate) fn insert_mem(&self, tag_id: u64, file: &Arc<FileEntry>) -> bool {
        let file_id = file.id();
        if self.owns_files {
            self.files.entry(file_id).or_insert_with(|| Arc::clone(file));
        }
        if self.is_member(tag_id, file_id) {
            return false;
        }

        // Partners: the file's other tags whose drawers already hold it.
        let partners: Vec<u64> = file
            .tag_ids()
            .into_iter()
            .filter(|&u| u != tag_id && self.is_member(u, file_id))
            .collect();

        {
            let mut drawer = self.drawers.entry(tag_id).or_default();
            drawer.files.insert(file_id);
            for &u in &partners {
                *drawer.union.entry(u).or_insert(0) += 1;
            }
        }
        for u in partners {
            if let Some(mut other) = self.drawers.get_mut(&u) {
                *other.union.entry(tag_id).or_insert(0) += 1;
            }
        }
        tracing::debug!("drawer {}: inserted file {}", tag_id, file_id);
        true
    }

    pub(crate) fn remove_mem(&self, tag_id: u64, file: &Arc<FileEntry>) -> bool {
        let file_id = file.id();
        let removed = match self.drawers.get_mut(&tag_id) {
            Some(mut drawer) => drawer.files.remove(&file_id),
            None => false,
        };
        if !removed {
            return false;
        }

        let partners: Vec<u64> = file
            .tag_ids()
            .into_iter()
            .filter(|&u| u != tag_id && self.is_member(u, file_id))
            .collect();

        if let Some(mut drawer) = self.drawers.get_mut(&tag_id) {
            for &u in &partners {
                decrement(&mut drawer.union, u);
            }
        }
        for u in partners {
            if let Some(mut other) = self.drawers.get_mut(&u) {
                decrement(&mut other.union, tag_id);
            }
        }
        tracing::debug!("drawer {}: removed file {}", tag_id, file_id);
        true
    }

    pub(crate) fn remove_all_mem(&self, file: &Arc<FileEntry>) {
        for tag_id in file.tag_key().iter() {
            self.remove_mem(tag_id, file);
        }
    }

    pub(crate) fn remove_drawer_mem(&self, tag_id: u64) {
        let Some((_, drawer)) = self.drawers.remove(&tag_id) else {
            return;
        };
        for partner in drawer.union.keys() {
            if let Some(mut other) = self.drawers.get_mut(partner) {
                other.union.remove(&tag_id);
            }
        }
    }

    // ----- queries -----

    /// Resolves the unique file named `name` carrying every tag in
    /// `key`. An empty key matches only untagged files. When several
    /// same-named files qualify, the most specific match wins: fewest
    /// tags beyond the key, then lowest id.
    pub fn lookup_file(&self, key: &Key, name: &str) -> Option<Arc<FileEntry>> {
        if key.is_empty() {
            return self
                .files
                .iter()
                .filter(|entry| entry.value().is_untagged() && entry.value().name() == name)
                .map(|entry| Arc::clone(entry.value()))
                .min_by_key(|f| f.id());
        }

        let wanted = key.distinct();
        let mut drawer_sets: Vec<HashSet<u64>> = Vec::with_capacity(wanted.len());
        for tag_id in &wanted {
            match self.drawers.get(tag_id) {
                Some(drawer) => drawer_sets.push(drawer.files.clone()),
                None => return None,
            }
        }
        let refs: Vec<&HashSet<u64>> = drawer_sets.iter().collect();
        let candidates = sets::intersect_all(&refs);

        candidates
            .into_iter()
            .filter_map(|id| self.files.get(&id).map(|e| Arc::clone(e.value())))
            .filter(|f| f.name() == name)
            .min_by_key(|f| (f.ntags().saturating_sub(wanted.len()), f.id()))
    }

    pub fn drawer_size(&self, tag_id: u64) -> usize {
        self.drawers.get(&tag_id).map(|d| d.files.len()).unwrap_or(0)
    }

    pub fn drawer_labels(&self) -> Vec<u64> {
        let mut labels: Vec<u64> = self.drawers.iter().map(|e| *e.key()).collect();
        labels.sort_unstable();
        labels
    }

    /// The drawer's files, name-then-id ordered for stable listings.
    pub fn get_drawer(&self, tag_id: u64) -> Vec<Arc<FileEntry>> {
        let ids: Vec<u64> = match self.drawers.get(&tag_id) {
            Some(drawer) => drawer.files.iter().copied().collect(),
            None => return Vec::new(),
        };
        let mut out: Vec<Arc<FileEntry>> = ids
            .into_iter()
            .filter_map(|id| self.files.get(&id).map(|e| Arc::clone(e.value())))
            .collect();
        out.sort_by(|a, b| a.ident().name_id_cmp(b.ident()));
        out
    }

    /// Files present in no drawer at all.
    pub fn get_untagged_files(&self) -> Vec<Arc<FileEntry>> {
        let mut out: Vec<Arc<FileEntry>> = self
            .files
            .iter()
            .filter(|entry| entry.value().is_untagged())
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        out.sort_by(|a, b| a.ident().name_id_cmp(b.ident()));
        out
    }

    /// The tags co-occurring with `tag_id` on at least one file.
    pub fn tag_union(&self, tag_id: u64) -> HashSet<u64> {
        self.drawers
            .get(&tag_id)
            .map(|d| d.union.keys().copied().collect())
            .unwrap_or_default()
    }

    /// The tags co-occurring with every tag in `key`: the intersection
    /// of the named drawers' union sets. Identity for a one-element
    /// key, empty for an empty key.
    pub fn tag_intersection(&self, key: &Key) -> Vec<u64> {
        let wanted = key.distinct();
        let unions: Vec<HashSet<u64>> = wanted.iter().map(|&t| self.tag_union(t)).collect();
        let refs: Vec<&HashSet<u64>> = unions.iter().collect();
        let mut out: Vec<u64> = sets::intersect_all(&refs).into_iter().collect();
        out.sort_unstable();
        out
    }

    /// Registers a file in the cabinet-owned index (standalone
    /// configuration only; in the shared configuration the registry
    /// populates the index).
    pub fn register_file(&self, file: &Arc<FileEntry>) {
        self.files.insert(file.id(), Arc::clone(file));
    }

    /// Drops the file from the file index. The caller must have already
    /// removed it from every drawer.
    pub fn delete_file(&self, file: &Arc<FileEntry>) {
        self.files.remove(&file.id());
    }

    pub fn nfiles(&self) -> usize {
        self.files.len()
    }
}

fn decrement(union: &mut HashMap<u64, usize>, partner: u64) {
    if let Some(count) = union.get_mut(&partner) {
        *count -= 1;
        if *count == 0 {
            union.remove(&partner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::Value;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn file(id: u64, name: &str) -> Arc<FileEntry> {
        Arc::new(FileEntry::new(id, name, TIMEOUT))
    }

    fn tag_file(cabinet: &FileCabinet, file: &Arc<FileEntry>, tags: &[u64]) {
        cabinet.register_file(file);
        for &t in tags {
            file.set_tag(t, Value::Int(0));
            cabinet.insert(t, file).unwrap();
        }
    }

    #[test]
    fn test_duality_after_insert_and_remove() {
        let cabinet = FileCabinet::in_memory();
        let f = file(1, "block");
        tag_file(&cabinet, &f, &[10, 20]);

        assert_eq!(cabinet.drawer_size(10), 1);
        assert_eq!(cabinet.drawer_size(20), 1);

        cabinet.remove(10, &f).unwrap();
        f.unset_tag(10);
        assert_eq!(cabinet.drawer_size(10), 0);
        assert!(f.has_tag(20));
        assert_eq!(cabinet.drawer_size(20), 1);
    }

    #[test]
    fn test_idempotent_insert_leaves_union_unchanged() {
        let cabinet = FileCabinet::in_memory();
        let f = file(1, "block");
        tag_file(&cabinet, &f, &[10, 20]);

        assert!(!cabinet.insert(10, &f).unwrap());
        assert_eq!(cabinet.drawer_size(10), 1);
        assert_eq!(cabinet.tag_union(10), [20].into_iter().collect());

        cabinet.remove(20, &f).unwrap();
        f.unset_tag(20);
        // One balanced decrement clears the pair despite the repeat insert.
        assert!(cabinet.tag_union(10).is_empty());
    }

    #[test]
    fn test_union_tracks_last_co_occurrence() {
        let cabinet = FileCabinet::in_memory();
        let a = file(1, "a");
        let b = file(2, "b");
        tag_file(&cabinet, &a, &[10, 20]);
        tag_file(&cabinet, &b, &[10, 20]);

        assert_eq!(cabinet.tag_union(10), [20].into_iter().collect());

        cabinet.remove(20, &a).unwrap();
        a.unset_tag(20);
        // b still carries both.
        assert_eq!(cabinet.tag_union(10), [20].into_iter().collect());

        cabinet.remove(20, &b).unwrap();
        b.unset_tag(20);
        assert!(cabinet.tag_union(10).is_empty());
        assert!(cabinet.tag_union(20).is_empty());
    }

    #[test]
    fn test_remove_all_balances_in_any_order() {
        let cabinet = FileCabinet::in_memory();
        let f = file(1, "block");
        tag_file(&cabinet, &f, &[1, 2, 3]);

        cabinet.remove_all(&f).unwrap();
        for t in [1, 2, 3] {
            assert_eq!(cabinet.drawer_size(t), 0);
            assert!(cabinet.tag_union(t).is_empty());
        }
    }

    #[test]
    fn test_insert_all_fast_path() {
        let cabinet = FileCabinet::in_memory();
        let f = file(1, "block");
        cabinet.register_file(&f);
        f.set_tag(1, Value::Int(0));
        f.set_tag(2, Value::Int(0));

        let key = Key::from_ids([1, 2]);
        assert!(cabinet.insert_all(&key, &f).unwrap());
        assert!(!cabinet.insert_all(&key, &f).unwrap());
        assert_eq!(cabinet.tag_union(1), [2].into_iter().collect());
    }

    #[test]
    fn test_lookup_file_requires_all_tags() {
        let cabinet = FileCabinet::in_memory();
        let f = file(1, "block");
        tag_file(&cabinet, &f, &[10, 20]);

        assert!(cabinet.lookup_file(&Key::from_ids([10, 20]), "block").is_some());
        assert!(cabinet.lookup_file(&Key::from_ids([10, 30]), "block").is_none());
        assert!(cabinet.lookup_file(&Key::from_ids([10]), "other").is_none());
    }

    #[test]
    fn test_lookup_file_empty_key_matches_untagged_only() {
        let cabinet = FileCabinet::in_memory();
        let tagged = file(1, "block");
        let loose = file(2, "block");
        tag_file(&cabinet, &tagged, &[10]);
        cabinet.register_file(&loose);

        let hit = cabinet.lookup_file(&Key::new(), "block").unwrap();
        assert_eq!(hit.id(), 2);
    }

    #[test]
    fn test_lookup_file_prefers_most_specific() {
        let cabinet = FileCabinet::in_memory();
        let exact = file(5, "block");
        let broader = file(3, "block");
        tag_file(&cabinet, &broader, &[10, 20, 30]);
        tag_file(&cabinet, &exact, &[10, 20]);

        // Both carry {10, 20}; the file without extra tags wins even
        // though its id is higher.
        let hit = cabinet.lookup_file(&Key::from_ids([10, 20]), "block").unwrap();
        assert_eq!(hit.id(), 5);
    }

    #[test]
    fn test_tag_intersection_identity_for_single_tag() {
        let cabinet = FileCabinet::in_memory();
        let f = file(1, "a");
        let g = file(2, "b");
        tag_file(&cabinet, &f, &[1, 2]);
        tag_file(&cabinet, &g, &[1, 3]);

        assert_eq!(cabinet.tag_intersection(&Key::from_ids([1])), vec![2, 3]);
        assert!(cabinet.tag_intersection(&Key::new()).is_empty());
    }

    #[test]
    fn test_tag_intersection_across_drawers() {
        let cabinet = FileCabinet::in_memory();
        let f = file(1, "a");
        let g = file(2, "b");
        tag_file(&cabinet, &f, &[1, 2, 9]);
        tag_file(&cabinet, &g, &[1, 2, 9]);
        let h = file(3, "c");
        tag_file(&cabinet, &h, &[1, 7]);

        // 9 co-occurs with both 1 and 2; 7 only with 1.
        assert_eq!(cabinet.tag_intersection(&Key::from_ids([1, 2])), vec![9]);
    }

    #[test]
    fn test_remove_drawer_clears_partner_unions() {
        let cabinet = FileCabinet::in_memory();
        let f = file(1, "a");
        tag_file(&cabinet, &f, &[1, 2]);

        cabinet.remove_drawer(2).unwrap();
        assert_eq!(cabinet.drawer_size(2), 0);
        assert!(!cabinet.drawer_labels().contains(&2));
        assert!(cabinet.tag_union(1).is_empty());
        // The file itself is untouched.
        assert!(f.has_tag(2));
    }

    #[test]
    fn test_untagged_listing() {
        let cabinet = FileCabinet::in_memory();
        let loose = file(1, "loose");
        cabinet.register_file(&loose);
        let tagged = file(2, "tagged");
        tag_file(&cabinet, &tagged, &[4]);

        let untagged = cabinet.get_untagged_files();
        assert_eq!(untagged.len(), 1);
        assert_eq!(untagged[0].id(), 1);
    }
}

//! The Stage
//!
//! An ephemeral tree of tags "proposed" at a tag-path position (a
//! directory created but not yet backed by any tagged file). Purely
//! in-memory: staged entries are merged into directory listings by the
//! caller and never touch the cabinet or the store. The prefix-tree
//! encoding keyed by successive tag ids also gives cheap listing of
//! everything staged under a path prefix.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::core::key::Key;

#[derive(Default)]
struct StageNode {
    children: HashMap<u64, StageNode>,
    staged: Vec<u64>,
}

impl StageNode {
    fn is_empty(&self) -> bool {
        self.staged.is_empty() && self.children.is_empty()
    }

    fn descend(&self, position: &Key) -> Option<&StageNode> {
        let mut node = self;
        for tag_id in position.iter() {
            node = node.children.get(&tag_id)?;
        }
        Some(node)
    }

    fn collect(&self, out: &mut Vec<u64>) {
        out.extend_from_slice(&self.staged);
        for child in self.children.values() {
            child.collect(out);
        }
    }

    /// Removes `tag_id` everywhere and prunes empty subtrees.
    fn purge(&mut self, tag_id: u64) {
        self.staged.retain(|&t| t != tag_id);
        self.children.remove(&tag_id);
        self.children.retain(|_, child| {
            child.purge(tag_id);
            !child.is_empty()
        });
    }
}

#[derive(Default)]
pub struct Stage {
    root: RwLock<StageNode>,
}

impl Stage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages `tag_id` at `position`. Re-staging is a no-op.
    pub fn add(&self, position: &Key, tag_id: u64) {
        let mut root = self.root.write();
        let mut node = &mut *root;
        for step in position.iter() {
            node = node.children.entry(step).or_default();
        }
        if !node.staged.contains(&tag_id) {
            node.staged.push(tag_id);
        }
    }

    /// Unstages `tag_id` at exactly `position`.
    pub fn remove(&self, position: &Key, tag_id: u64) -> bool {
        let mut root = self.root.write();
        let mut node = &mut *root;
        for step in position.iter() {
            match node.children.get_mut(&step) {
                Some(child) => node = child,
                None => return false,
            }
        }
        let before = node.staged.len();
        node.staged.retain(|&t| t != tag_id);
        let removed = node.staged.len() != before;
        if removed {
            root.children.retain(|_, child| !prune(child));
        }
        removed
    }

    /// The tags staged at exactly `position`, in staging order.
    pub fn list_position(&self, position: &Key) -> Vec<u64> {
        let root = self.root.read();
        root.descend(position)
            .map(|node| node.staged.clone())
            .unwrap_or_default()
    }

    /// Everything staged at or below `prefix`.
    pub fn list_under(&self, prefix: &Key) -> Vec<u64> {
        let root = self.root.read();
        let mut out = Vec::new();
        if let Some(node) = root.descend(prefix) {
            node.collect(&mut out);
        }
        out
    }

    /// Purges every occurrence of `tag_id`, both as a staged entry and
    /// as a path step. Used when the tag is deleted outright.
    pub fn remove_all(&self, tag_id: u64) {
        self.root.write().purge(tag_id);
    }

    pub fn is_empty(&self) -> bool {
        self.root.read().is_empty()
    }
}

/// Depth-first prune of empty subtrees; true if `node` itself is empty.
fn prune(node: &mut StageNode) -> bool {
    node.children.retain(|_, child| !prune(child));
    node.is_empty()
}

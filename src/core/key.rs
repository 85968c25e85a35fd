//! Tag-path keys
//!
//! A `Key` is the ordered sequence of tag ids a path-resolution caller
//! produced by walking a tag path component by component. The engine
//! treats it as a value type: cheap to clone, never shared.

use std::collections::HashMap;

/// Reserved id meaning "untagged"; never a real tag id.
pub const UNTAGGED: u64 = 0;

/// An explicit-length sequence of tag ids.
///
/// Equality of the underlying sequence is positional (`PartialEq`);
/// path semantics use [`Key::set_eq`], which is strict multiset
/// equality: order-insensitive, multiplicity-sensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Key {
    elems: Vec<u64>,
}

impl Key {
    pub fn new() -> Self {
        Self { elems: Vec::new() }
    }

    pub fn from_ids(ids: impl IntoIterator<Item = u64>) -> Self {
        Self {
            elems: ids.into_iter().collect(),
        }
    }

    pub fn push_end(&mut self, elem: u64) {
        self.elems.push(elem);
    }

    /// Removes and returns the first element, if any.
    pub fn pop_front(&mut self) -> Option<u64> {
        if self.elems.is_empty() {
            None
        } else {
            Some(self.elems.remove(0))
        }
    }

    pub fn get(&self, index: usize) -> Option<u64> {
        self.elems.get(index).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn contains(&self, elem: u64) -> bool {
        self.elems.contains(&elem)
    }

    pub fn starts_with(&self, prefix: &Key) -> bool {
        self.elems.starts_with(&prefix.elems)
    }

    /// Strict multiset equality: same elements with the same counts,
    /// in any order.
    pub fn set_eq(&self, other: &Key) -> bool {
        if self.elems.len() != other.elems.len() {
            return false;
        }
        self.counts() == other.counts()
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.elems.iter().copied()
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.elems
    }

    /// The distinct ids in this key, first-occurrence order.
    pub fn distinct(&self) -> Vec<u64> {
        let mut seen = Vec::with_capacity(self.elems.len());
        for &id in &self.elems {
            if !seen.contains(&id) {
                seen.push(id);
            }
        }
        seen
    }

    fn counts(&self) -> HashMap<u64, usize> {
        let mut counts = HashMap::with_capacity(self.elems.len());
        for &id in &self.elems {
            *counts.entry(id).or_insert(0) += 1;
        }
        counts
    }
}

impl From<Vec<u64>> for Key {
    fn from(elems: Vec<u64>) -> Self {
        Self { elems }
    }
}

impl FromIterator<u64> for Key {
    fn from_iter<T: IntoIterator<Item = u64>>(iter: T) -> Self {
        Self {
            elems: iter.into_iter().collect(),
        }
    }
}

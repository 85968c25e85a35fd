//! Generic set operations over the hash-based index structures
//!
//! Used by the cabinet and path-resolution callers to compute
//! multi-tag intersections. Absent (`None`) operands follow the
//! engine-wide policy: empty for intersection, identity for union,
//! empty minuend / identity subtrahend for difference.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::hash::Hash;

/// Binary intersection. Iterates the smaller operand and probes the
/// larger, so the cost is O(min(|a|, |b|)) lookups.
pub fn intersect<T>(a: Option<&HashSet<T>>, b: Option<&HashSet<T>>) -> HashSet<T>
where
    T: Eq + Hash + Clone,
{
    let (Some(a), Some(b)) = (a, b) else {
        return HashSet::new();
    };
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small.iter().filter(|x| large.contains(x)).cloned().collect()
}

/// N-ary intersection; operands are visited smallest-first so the
/// running result only shrinks.
pub fn intersect_all<T>(sets: &[&HashSet<T>]) -> HashSet<T>
where
    T: Eq + Hash + Clone,
{
    match sets {
        [] => HashSet::new(),
        [only] => (*only).clone(),
        _ => {
            let mut ordered: Vec<&HashSet<T>> = sets.to_vec();
            ordered.sort_by_key(|s| s.len());
            let mut result = ordered[0].clone();
            for set in &ordered[1..] {
                result.retain(|x| set.contains(x));
                if result.is_empty() {
                    break;
                }
            }
            result
        }
    }
}

pub fn union<T>(a: Option<&HashSet<T>>, b: Option<&HashSet<T>>) -> HashSet<T>
where
    T: Eq + Hash + Clone,
{
    match (a, b) {
        (None, None) => HashSet::new(),
        (Some(s), None) | (None, Some(s)) => s.clone(),
        (Some(a), Some(b)) => a.union(b).cloned().collect(),
    }
}

/// First-minus-rest difference.
pub fn difference<T>(minuend: Option<&HashSet<T>>, subtrahends: &[&HashSet<T>]) -> HashSet<T>
where
    T: Eq + Hash + Clone,
{
    let Some(minuend) = minuend else {
        return HashSet::new();
    };
    minuend
        .iter()
        .filter(|x| !subtrahends.iter().any(|s| s.contains(*x)))
        .cloned()
        .collect()
}

pub fn subset<T, F>(set: &HashSet<T>, mut predicate: F) -> HashSet<T>
where
    T: Eq + Hash + Clone,
    F: FnMut(&T) -> bool,
{
    set.iter().filter(|x| predicate(x)).cloned().collect()
}

pub fn equal<T>(a: &HashSet<T>, b: &HashSet<T>) -> bool
where
    T: Eq + Hash,
{
    a == b
}

/// Weak order for use as a sort key: size first; equal-sized unequal
/// sets compare Greater. Not antisymmetric.
pub fn compare<T>(a: &HashSet<T>, b: &HashSet<T>) -> Ordering
where
    T: Eq + Hash,
{
    match a.len().cmp(&b.len()) {
        Ordering::Equal => {
            if a == b {
                Ordering::Equal
            } else {
                Ordering::Greater
            }
        }
        ord => ord,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[u64]) -> HashSet<u64> {
        items.iter().copied().collect()
    }

    #[test]
    fn test_intersect_commutative_and_identity() {
        let a = set(&[1, 2, 3]);
        let b = set(&[2, 3, 4]);
        assert_eq!(intersect(Some(&a), Some(&b)), intersect(Some(&b), Some(&a)));
        assert_eq!(intersect(Some(&a), Some(&a)), a);
    }

    #[test]
    fn test_intersect_with_absent_is_empty() {
        let a = set(&[1, 2]);
        assert!(intersect(Some(&a), None).is_empty());
        assert!(intersect::<u64>(None, None).is_empty());
    }

    #[test]
    fn test_union_with_absent_is_identity() {
        let a = set(&[1, 2]);
        assert_eq!(union(Some(&a), None), a);
        assert_eq!(union(None, Some(&a)), a);
        assert_eq!(union(Some(&a), Some(&set(&[3]))), set(&[1, 2, 3]));
    }

    #[test]
    fn test_intersect_all_single_is_identity() {
        let a = set(&[9, 10]);
        assert_eq!(intersect_all(&[&a]), a);
        assert!(intersect_all::<u64>(&[]).is_empty());
    }

    #[test]
    fn test_intersect_all_many() {
        let a = set(&[1, 2, 3, 4]);
        let b = set(&[2, 3, 4]);
        let c = set(&[3, 4, 5]);
        assert_eq!(intersect_all(&[&a, &b, &c]), set(&[3, 4]));
    }

    #[test]
    fn test_difference_policies() {
        let a = set(&[1, 2, 3]);
        let b = set(&[2]);
        assert_eq!(difference(Some(&a), &[&b]), set(&[1, 3]));
        assert_eq!(difference(Some(&a), &[]), a);
        assert!(difference::<u64>(None, &[&b]).is_empty());
    }

    #[test]
    fn test_compare_is_size_first() {
        assert_eq!(compare(&set(&[1]), &set(&[1, 2])), Ordering::Less);
        assert_eq!(compare(&set(&[1, 2]), &set(&[1, 2])), Ordering::Equal);
        assert_eq!(compare(&set(&[1, 3]), &set(&[1, 2])), Ordering::Greater);
    }

    #[test]
    fn test_subset_filters() {
        let a = set(&[1, 2, 3, 4]);
        assert_eq!(subset(&a, |x| x % 2 == 0), set(&[2, 4]));
    }
}

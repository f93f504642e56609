//! Multiset reconciliation of two transaction collections.
//!
//! Not a set difference: every item on one side cancels at most one item
//! with the same key on the other side, first match first. Duplicate keys
//! therefore survive as often as they outnumber their counterparts.

use std::collections::HashMap;
use std::hash::Hash;

/// Items left over on each side after pairwise cancellation.
#[derive(Debug, Clone, PartialEq)]
pub struct Difference<A, B> {
    pub only_a: Vec<A>,
    pub only_b: Vec<B>,
}

impl<A, B> Difference<A, B> {
    pub fn is_empty(&self) -> bool {
        self.only_a.is_empty() && self.only_b.is_empty()
    }
}

/// Reconciles `a` against `b`.
///
/// Each item goes through its side's transform and then through `equiv`
/// to produce its key. Input order is kept in both result lists.
pub fn symmetric_difference<A, B, T, K, FA, FB, E>(
    a: impl IntoIterator<Item = A>,
    b: impl IntoIterator<Item = B>,
    transform_a: FA,
    transform_b: FB,
    equiv: E,
) -> Difference<A, B>
where
    K: Eq + Hash,
    FA: Fn(&A) -> T,
    FB: Fn(&B) -> T,
    E: Fn(&T) -> K,
{
    let a: Vec<A> = a.into_iter().collect();
    let b: Vec<B> = b.into_iter().collect();
    let keys_a: Vec<K> = a.iter().map(|item| equiv(&transform_a(item))).collect();
    let keys_b: Vec<K> = b.iter().map(|item| equiv(&transform_b(item))).collect();

    let keep_a = survivors(&keys_a, &keys_b);
    let keep_b = survivors(&keys_b, &keys_a);

    Difference {
        only_a: select(a, &keep_a),
        only_b: select(b, &keep_b),
    }
}

/// For each key of `side`, whether it is left after cancelling against `other`.
fn survivors<K: Eq + Hash>(side: &[K], other: &[K]) -> Vec<bool> {
    let mut remaining: HashMap<&K, usize> = HashMap::new();
    for key in other {
        *remaining.entry(key).or_insert(0) += 1;
    }
    side.iter()
        .map(|key| match remaining.get_mut(key) {
            Some(count) if *count > 0 => {
                *count -= 1;
                false
            }
            _ => true,
        })
        .collect()
}

fn select<T>(items: Vec<T>, keep: &[bool]) -> Vec<T> {
    items
        .into_iter()
        .zip(keep)
        .filter_map(|(item, keep)| keep.then_some(item))
        .collect()
}

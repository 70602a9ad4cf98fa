use std::hash::Hash;

use dashmap::DashMap;

/// Concurrent reference counter keyed by an arbitrary hashable value.
///
/// `add` returns the new count. `remove` returns `None` when the key was
/// not tracked at all (a decrement that would have gone below zero) and
/// `Some(0)` when the key just dropped its last reference and was evicted.
/// Updates to a single key are atomic.
#[derive(Debug, Default)]
pub struct RefCounter<K>
where
    K: Eq + Hash,
{
    counts: DashMap<K, usize>,
}

impl<K> RefCounter<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        RefCounter { counts: DashMap::new() }
    }

    pub fn add(
        &self,
        key: K,
    ) -> usize {
        let mut entry = self.counts.entry(key).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn remove(
        &self,
        key: &K,
    ) -> Option<usize> {
        match self.counts.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let count = occupied.get_mut();
                *count -= 1;
                if *count == 0 {
                    occupied.remove();
                    Some(0)
                } else {
                    Some(*count)
                }
            }
            dashmap::mapref::entry::Entry::Vacant(_) => None,
        }
    }

    pub fn count(
        &self,
        key: &K,
    ) -> usize {
        self.counts.get(key).map(|entry| *entry).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn keys(&self) -> Vec<K> {
        self.counts.iter().map(|entry| entry.key().clone()).collect()
    }
}

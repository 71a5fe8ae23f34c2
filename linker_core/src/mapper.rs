//! Bidirectional map between domain object keys and spots.

use crate::types::SpotId;
use std::collections::BTreeMap;

/// 1:1 association key ↔ spot for the lifetime of one tracking run.
///
/// Spot ids are dense arena indices, so the reverse direction is a plain vector.
#[derive(Clone, Debug)]
pub struct GraphObjectMapper<K> {
    spot_of: BTreeMap<K, SpotId>,
    object_of: Vec<K>,
}

impl<K> Default for GraphObjectMapper<K> {
    fn default() -> Self {
        Self {
            spot_of: BTreeMap::new(),
            object_of: Vec::new(),
        }
    }
}

impl<K: Clone + Ord> GraphObjectMapper<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key`, returning its spot id and whether it was newly inserted.
    pub fn insert(&mut self, key: K) -> (SpotId, bool) {
        if let Some(&id) = self.spot_of.get(&key) {
            return (id, false);
        }
        let id = SpotId(self.object_of.len());
        self.spot_of.insert(key.clone(), id);
        self.object_of.push(key);
        (id, true)
    }

    pub fn spot(&self, key: &K) -> Option<SpotId> {
        self.spot_of.get(key).copied()
    }

    pub fn object(&self, spot: SpotId) -> Option<&K> {
        self.object_of.get(spot.index())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.spot_of.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.object_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.object_of.is_empty()
    }

    /// All (spot, key) pairs in spot-id order.
    pub fn iter(&self) -> impl Iterator<Item = (SpotId, &K)> {
        self.object_of
            .iter()
            .enumerate()
            .map(|(i, k)| (SpotId(i), k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_idempotent_per_key() {
        let mut mapper = GraphObjectMapper::new();
        let (a, new_a) = mapper.insert("a");
        let (b, new_b) = mapper.insert("b");
        let (a2, new_a2) = mapper.insert("a");
        assert!(new_a && new_b && !new_a2);
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(mapper.len(), 2);
        assert_eq!(mapper.object(b), Some(&"b"));
        assert_eq!(mapper.spot(&"a"), Some(a));
        assert_eq!(mapper.spot(&"c"), None);
    }
}

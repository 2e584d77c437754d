use std::collections::{BTreeMap, VecDeque};

use helm_schemas::OrderOutcome;

/// Bounded insertion-ordered map of client tag → last-known outcome.
///
/// Updating an existing tag replaces the value without refreshing its
/// position; eviction always drops the oldest first-seen tag.
#[derive(Clone, Debug)]
pub struct TagCache {
    map: BTreeMap<String, OrderOutcome>,
    order: VecDeque<String>,
    capacity: usize,
}

impl TagCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            map: BTreeMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, tag: &str) -> Option<&OrderOutcome> {
        self.map.get(tag)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.map.contains_key(tag)
    }

    pub fn put(&mut self, tag: impl Into<String>, outcome: OrderOutcome) {
        let tag = tag.into();
        if self.map.insert(tag.clone(), outcome).is_none() {
            self.order.push_back(tag);
            while self.order.len() > self.capacity {
                if let Some(evicted) = self.order.pop_front() {
                    self.map.remove(&evicted);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(ticket: i64) -> OrderOutcome {
        OrderOutcome::Placed { ticket }
    }

    #[test]
    fn put_and_get() {
        let mut cache = TagCache::new(4);
        cache.put("sig:a", outcome(1));
        assert_eq!(cache.get("sig:a"), Some(&outcome(1)));
        assert!(cache.get("sig:b").is_none());
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut cache = TagCache::new(2);
        cache.put("sig:a", outcome(1));
        cache.put("sig:b", outcome(2));
        cache.put("sig:c", outcome(3));
        assert!(!cache.contains("sig:a"));
        assert!(cache.contains("sig:b"));
        assert!(cache.contains("sig:c"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn update_replaces_value_without_new_slot() {
        let mut cache = TagCache::new(2);
        cache.put("sig:a", outcome(1));
        cache.put("sig:b", outcome(2));
        cache.put("sig:a", outcome(9));
        // Updating "sig:a" must not evict anything.
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("sig:a"), Some(&outcome(9)));
        // "sig:a" keeps its original age: next insert evicts it first.
        cache.put("sig:c", outcome(3));
        assert!(!cache.contains("sig:a"));
    }
}

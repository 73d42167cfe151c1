//! Ontology cache
//!
//! A bounded, write-expiring mapping from type label to type snapshot,
//! shared by every transaction of a keyspace. The cache holds immutable
//! `Arc<TypeConcept>` snapshots: readers never observe a half-constructed
//! concept, and writers replace whole entries at commit time
//! (copy-on-promote).
//!
//! Expiry is measured from the last write of each entry, against a
//! write-expiry chosen per lookup by the calling transaction's mode: batch
//! loaders use the short batch expiry so concurrently-mutated types are
//! re-read sooner, interactive transactions use the long normal expiry.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use trellis_core::TypeLabel;

use crate::concept::TypeConcept;

/// Default maximum number of cached types.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

#[derive(Debug, Clone)]
struct CacheEntry {
    concept: Arc<TypeConcept>,
    written: Instant,
}

/// Process-wide, time-expiring type cache. Safe for concurrent access.
#[derive(Debug)]
pub struct OntologyCache {
    entries: RwLock<HashMap<TypeLabel, CacheEntry>>,
    capacity: usize,
    normal_expiry: Duration,
    batch_expiry: Duration,
}

impl OntologyCache {
    /// Create a cache with the default capacity and the given per-mode
    /// write-expiries.
    pub fn new(normal_expiry: Duration, batch_expiry: Duration) -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY, normal_expiry, batch_expiry)
    }

    /// Create a cache with an explicit capacity.
    pub fn with_capacity(
        capacity: usize,
        normal_expiry: Duration,
        batch_expiry: Duration,
    ) -> Self {
        OntologyCache {
            entries: RwLock::new(HashMap::new()),
            capacity,
            normal_expiry,
            batch_expiry,
        }
    }

    /// The write-expiry in effect for the given loading mode.
    fn expiry_for(&self, batch_loading: bool) -> Duration {
        if batch_loading {
            self.batch_expiry
        } else {
            self.normal_expiry
        }
    }

    /// Entries are retained until no mode can still observe them.
    fn retention(&self) -> Duration {
        self.normal_expiry.max(self.batch_expiry)
    }

    /// Look up a snapshot by label, expired for the given loading mode.
    pub fn get(&self, label: &TypeLabel, batch_loading: bool) -> Option<Arc<TypeConcept>> {
        let entries = self.entries.read();
        let entry = entries.get(label)?;
        if entry.written.elapsed() >= self.expiry_for(batch_loading) {
            return None;
        }
        Some(Arc::clone(&entry.concept))
    }

    /// All snapshots not yet expired for the given loading mode, for
    /// seeding a transaction log.
    pub fn snapshot(&self, batch_loading: bool) -> Vec<Arc<TypeConcept>> {
        let expiry = self.expiry_for(batch_loading);
        let entries = self.entries.read();
        entries
            .values()
            .filter(|entry| entry.written.elapsed() < expiry)
            .map(|entry| Arc::clone(&entry.concept))
            .collect()
    }

    /// Atomically replace entries with fresh snapshots.
    ///
    /// Called at commit time with the transaction's accepted type entries.
    /// Entries expired for every mode are purged and, if the cache is over
    /// capacity, the oldest-written entries are evicted first.
    pub fn promote<I>(&self, types: I)
    where
        I: IntoIterator<Item = TypeConcept>,
    {
        let now = Instant::now();
        let retention = self.retention();
        let mut entries = self.entries.write();
        for concept in types {
            entries.insert(
                concept.label().clone(),
                CacheEntry {
                    concept: Arc::new(concept),
                    written: now,
                },
            );
        }
        entries.retain(|_, entry| entry.written.elapsed() < retention);
        while entries.len() > self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.written)
                .map(|(label, _)| label.clone());
            match oldest {
                Some(label) => entries.remove(&label),
                None => break,
            };
        }
    }

    /// Number of entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::{BaseKind, TypeId};
    use trellis_substrate::Substrate;

    fn sample_type(label: &str, id: u32) -> TypeConcept {
        // a vertex id is needed only for identity; fabricate one per type
        let substrate = Substrate::new();
        let mut session = substrate.session();
        let vertex = session.add_vertex(BaseKind::EntityType.as_str());
        TypeConcept::new(
            vertex,
            TypeId::new(id),
            TypeLabel::new(label),
            BaseKind::EntityType,
            None,
        )
    }

    fn cache(normal: Duration, batch: Duration) -> OntologyCache {
        OntologyCache::new(normal, batch)
    }

    #[test]
    fn get_returns_promoted_snapshots() {
        let cache = cache(Duration::from_secs(60), Duration::from_secs(60));
        cache.promote([sample_type("person", 9)]);
        let found = cache.get(&TypeLabel::new("person"), false).unwrap();
        assert_eq!(found.type_id(), TypeId::new(9));
        assert!(cache.get(&TypeLabel::new("company"), false).is_none());
    }

    #[test]
    fn entries_expire_after_the_write_timeout() {
        let cache = cache(Duration::from_millis(0), Duration::from_millis(0));
        cache.promote([sample_type("person", 9)]);
        assert!(cache.get(&TypeLabel::new("person"), false).is_none());
        assert!(cache.snapshot(false).is_empty());
    }

    #[test]
    fn expiry_follows_the_loading_mode() {
        // batch mode expires immediately, normal mode still sees the entry
        let cache = cache(Duration::from_secs(60), Duration::from_millis(0));
        cache.promote([sample_type("person", 9)]);
        assert!(cache.get(&TypeLabel::new("person"), false).is_some());
        assert!(cache.get(&TypeLabel::new("person"), true).is_none());
        assert_eq!(cache.snapshot(false).len(), 1);
        assert!(cache.snapshot(true).is_empty());
        // the entry is retained while any mode can still observe it
        cache.promote([]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn promote_replaces_existing_entries() {
        let cache = cache(Duration::from_secs(60), Duration::from_secs(1));
        cache.promote([sample_type("person", 9)]);
        let mut updated = sample_type("person", 9);
        updated.set_instance_count(5);
        cache.promote([updated]);
        let found = cache.get(&TypeLabel::new("person"), false).unwrap();
        assert_eq!(found.instance_count(), 5);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn capacity_bounds_the_cache() {
        let cache = OntologyCache::with_capacity(
            2,
            Duration::from_secs(60),
            Duration::from_secs(1),
        );
        cache.promote([sample_type("a", 9)]);
        cache.promote([sample_type("b", 10), sample_type("c", 11)]);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn snapshots_are_shared_immutably() {
        let cache = cache(Duration::from_secs(60), Duration::from_secs(1));
        cache.promote([sample_type("person", 9)]);
        let a = cache.get(&TypeLabel::new("person"), false).unwrap();
        let b = cache.get(&TypeLabel::new("person"), false).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}

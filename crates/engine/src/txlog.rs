//! Per-transaction log
//!
//! Scratch state owned by one transaction: the deep-cloned type cache seeded
//! from the ontology cache, a general concept cache, new relations keyed by
//! fingerprint, the modification sets that feed the commit log, and the
//! instance-count deltas.
//!
//! Seeding clones each cached type by value. Types refer to each other by
//! `TypeId` rather than by pointer, so the clone is complete in one pass;
//! there is no clone-map recursion to settle.

use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use trellis_core::{ConceptId, TypeLabel};

use crate::commit_log::{CommitLog, DuplicateCandidates, InstanceCountDelta};
use crate::concept::{Concept, TypeConcept};
use crate::ontology::OntologyCache;

/// Bookkeeping for one transaction.
#[derive(Debug, Default)]
pub struct TransactionLog {
    cached_types: HashMap<TypeLabel, TypeConcept>,
    cached_concepts: FxHashMap<ConceptId, Concept>,
    new_relations: FxHashMap<String, ConceptId>,
    modified_relations: FxHashMap<String, ConceptId>,
    modified_castings: BTreeMap<String, BTreeSet<ConceptId>>,
    modified_resources: BTreeMap<String, BTreeSet<ConceptId>>,
    instance_count_deltas: BTreeMap<TypeLabel, i64>,
    validation_targets: BTreeSet<ConceptId>,
}

impl TransactionLog {
    /// Create a log seeded with clones of the ontology cache's snapshots
    /// that are still live for the given loading mode.
    pub fn seeded_from(cache: &OntologyCache, batch_loading: bool) -> Self {
        let mut log = TransactionLog::default();
        for snapshot in cache.snapshot(batch_loading) {
            log.cache_type((*snapshot).clone());
        }
        log
    }

    // =========================================================================
    // Type cache
    // =========================================================================

    /// Whether a type with this label is cached.
    pub fn is_type_cached(&self, label: &TypeLabel) -> bool {
        self.cached_types.contains_key(label)
    }

    /// The cached type with this label.
    pub fn cached_type(&self, label: &TypeLabel) -> Option<&TypeConcept> {
        self.cached_types.get(label)
    }

    /// Mutable access to a cached type.
    pub fn cached_type_mut(&mut self, label: &TypeLabel) -> Option<&mut TypeConcept> {
        self.cached_types.get_mut(label)
    }

    /// Find a cached type by its type id.
    pub fn cached_type_by_id(&self, id: trellis_core::TypeId) -> Option<&TypeConcept> {
        self.cached_types.values().find(|t| t.type_id() == id)
    }

    /// Cache (or replace) a type.
    pub fn cache_type(&mut self, concept: TypeConcept) {
        self.cached_types.insert(concept.label().clone(), concept);
    }

    /// Clones of every cached type, for promotion into the ontology cache.
    pub fn types_for_promotion(&self) -> Vec<TypeConcept> {
        self.cached_types.values().cloned().collect()
    }

    // =========================================================================
    // Concept cache
    // =========================================================================

    /// Cache a concept by id.
    pub fn cache_concept(&mut self, concept: Concept) {
        self.cached_concepts
            .insert(concept.concept_id().clone(), concept);
    }

    /// The cached concept with this id.
    pub fn cached_concept(&self, id: &ConceptId) -> Option<&Concept> {
        self.cached_concepts.get(id)
    }

    /// Forget a concept entirely: cache, modification sets and validation
    /// targets. Used when the reconciler deletes a duplicate.
    pub fn remove_concept(&mut self, id: &ConceptId) {
        self.cached_concepts.remove(id);
        self.validation_targets.remove(id);
        for ids in self.modified_castings.values_mut() {
            ids.remove(id);
        }
        for ids in self.modified_resources.values_mut() {
            ids.remove(id);
        }
        self.new_relations.retain(|_, relation| relation != id);
        self.modified_relations.retain(|_, relation| relation != id);
    }

    // =========================================================================
    // Relations by fingerprint
    // =========================================================================

    /// Record a relation created in this transaction.
    pub fn register_new_relation(&mut self, fingerprint: String, relation: ConceptId) {
        self.new_relations.insert(fingerprint, relation);
    }

    /// Record a relation modified (or re-fingerprinted) in this transaction.
    pub fn register_modified_relation(&mut self, fingerprint: String, relation: ConceptId) {
        self.modified_relations.insert(fingerprint, relation);
    }

    /// Look up a relation by fingerprint among this transaction's new and
    /// modified relations.
    pub fn relation_by_fingerprint(&self, fingerprint: &str) -> Option<&ConceptId> {
        self.new_relations
            .get(fingerprint)
            .or_else(|| self.modified_relations.get(fingerprint))
    }

    // =========================================================================
    // Modification sets
    // =========================================================================

    /// Record a casting touched under its fingerprint.
    pub fn track_casting(&mut self, index: String, casting: ConceptId) {
        self.modified_castings.entry(index).or_default().insert(casting);
    }

    /// Record a resource touched under its fingerprint.
    pub fn track_resource(&mut self, index: String, resource: ConceptId) {
        self.modified_resources.entry(index).or_default().insert(resource);
    }

    /// Mark a concept for commit-time validation.
    pub fn track_for_validation(&mut self, id: ConceptId) {
        self.validation_targets.insert(id);
    }

    /// Concepts to validate at commit, in deterministic order.
    pub fn validation_targets(&self) -> impl Iterator<Item = &ConceptId> {
        self.validation_targets.iter()
    }

    /// Add to a type's instance-count delta.
    pub fn bump_instance_count(&mut self, label: TypeLabel, delta: i64) {
        *self.instance_count_deltas.entry(label).or_insert(0) += delta;
    }

    /// Whether this transaction produced anything worth publishing.
    pub fn has_changes(&self) -> bool {
        self.instance_count_deltas.values().any(|d| *d != 0)
            || self.modified_castings.values().any(|ids| !ids.is_empty())
            || self.modified_resources.values().any(|ids| !ids.is_empty())
    }

    /// The commit-log payload for this transaction, `None` when nothing
    /// was modified.
    pub fn commit_payload(&self) -> Option<CommitLog> {
        if !self.has_changes() {
            return None;
        }
        Some(CommitLog {
            instance_counts: self
                .instance_count_deltas
                .iter()
                .filter(|(_, delta)| **delta != 0)
                .map(|(label, delta)| InstanceCountDelta {
                    type_label: label.clone(),
                    delta: *delta,
                })
                .collect(),
            castings: self
                .modified_castings
                .iter()
                .filter(|(_, ids)| !ids.is_empty())
                .map(|(index, ids)| DuplicateCandidates {
                    index: index.clone(),
                    concept_ids: ids.iter().cloned().collect(),
                })
                .collect(),
            resources: self
                .modified_resources
                .iter()
                .filter(|(_, ids)| !ids.is_empty())
                .map(|(index, ids)| DuplicateCandidates {
                    index: index.clone(),
                    concept_ids: ids.iter().cloned().collect(),
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::OntologyCache;
    use std::time::Duration;
    use trellis_core::{BaseKind, TypeId};
    use trellis_substrate::Substrate;

    fn sample_type(label: &str, id: u32) -> TypeConcept {
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

    #[test]
    fn seeding_clones_the_central_cache() {
        let cache = OntologyCache::new(Duration::from_secs(60), Duration::from_secs(1));
        cache.promote([sample_type("person", 9)]);

        let mut log = TransactionLog::seeded_from(&cache, false);
        assert!(log.is_type_cached(&TypeLabel::new("person")));

        // mutating the transaction clone must not touch the central cache
        log.cached_type_mut(&TypeLabel::new("person"))
            .unwrap()
            .set_instance_count(99);
        assert_eq!(
            cache
                .get(&TypeLabel::new("person"), false)
                .unwrap()
                .instance_count(),
            0
        );
    }

    #[test]
    fn commit_payload_is_none_without_changes() {
        let log = TransactionLog::default();
        assert!(!log.has_changes());
        assert!(log.commit_payload().is_none());
    }

    #[test]
    fn commit_payload_collects_the_three_sections() {
        let mut log = TransactionLog::default();
        log.bump_instance_count(TypeLabel::new("person"), 1);
        log.bump_instance_count(TypeLabel::new("person"), 1);
        log.track_casting("c-index".to_string(), ConceptId::new("20"));
        log.track_resource("r-index".to_string(), ConceptId::new("21"));

        let payload = log.commit_payload().unwrap();
        assert_eq!(payload.instance_counts.len(), 1);
        assert_eq!(payload.instance_counts[0].delta, 2);
        assert_eq!(payload.castings[0].index, "c-index");
        assert_eq!(payload.resources[0].concept_ids, vec![ConceptId::new("21")]);
    }

    #[test]
    fn zero_deltas_do_not_trigger_publication() {
        let mut log = TransactionLog::default();
        log.bump_instance_count(TypeLabel::new("person"), 1);
        log.bump_instance_count(TypeLabel::new("person"), -1);
        assert!(!log.has_changes());
    }

    #[test]
    fn remove_concept_scrubs_every_set() {
        let mut log = TransactionLog::default();
        let id = ConceptId::new("30");
        log.track_casting("c-index".to_string(), id.clone());
        log.track_for_validation(id.clone());
        log.register_new_relation("fp".to_string(), id.clone());

        log.remove_concept(&id);
        assert!(log.commit_payload().is_none());
        assert_eq!(log.validation_targets().count(), 0);
        assert!(log.relation_by_fingerprint("fp").is_none());
    }

    #[test]
    fn fingerprint_lookup_covers_new_and_modified() {
        let mut log = TransactionLog::default();
        log.register_new_relation("fp-new".to_string(), ConceptId::new("1"));
        log.register_modified_relation("fp-mod".to_string(), ConceptId::new("2"));
        assert_eq!(log.relation_by_fingerprint("fp-new"), Some(&ConceptId::new("1")));
        assert_eq!(log.relation_by_fingerprint("fp-mod"), Some(&ConceptId::new("2")));
        assert!(log.relation_by_fingerprint("fp-other").is_none());
    }
}

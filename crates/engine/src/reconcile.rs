//! Post-processing reconciliation
//!
//! Concurrent transactions can create semantically-equivalent castings,
//! resources and relations: index lookups only observe committed state, so
//! two sessions racing on the same (role, player) pair or resource value
//! each build their own vertex. The commit log names these duplicate
//! candidates by fingerprint; the reconciler merges them after the fact.
//!
//! Every step is individually idempotent: ids that no longer resolve are
//! dropped, transfers check for equivalent edges before adding them, and
//! the winning vertex's `INDEX` property is re-asserted at the end, so a
//! crash mid-pass leaves a graph the next pass can complete. An external
//! dispatcher serializes passes per keyspace.

use tracing::{debug, trace};

use trellis_core::{ConceptId, EdgeLabel, EdgeProp, GraphError, PropertyValue, Result, TxKind, TypeId, VertexProp};
use trellis_substrate::VertexId;

use crate::commit_log::CommitLog;
use crate::concept::{build_instance, CastingConcept, Concept, InstanceConcept};
use crate::database::Keyspace;
use crate::fingerprint::relation_index;
use crate::transaction::Transaction;

/// Merges duplicate castings and resources discovered after commit.
#[derive(Debug, Clone)]
pub struct Reconciler {
    ks: Keyspace,
}

impl Reconciler {
    /// Create a reconciler for one keyspace.
    pub fn new(keyspace: Keyspace) -> Self {
        Reconciler { ks: keyspace }
    }

    /// Consume one commit-log payload: apply instance-count deltas (growing
    /// shards as thresholds are crossed), then merge duplicate castings and
    /// resources.
    ///
    /// Returns the payload of the reconciliation transaction itself, which
    /// may name new duplicate candidates discovered while repointing
    /// relations; feed it back into `apply` until it comes back empty.
    pub fn apply(&self, log: &CommitLog) -> Result<Option<CommitLog>> {
        let mut tx = self.ks.transaction(TxKind::Write)?;
        tx.update_type_shards(&log.instance_counts)?;

        for entry in &log.castings {
            let merged = self.fix_duplicate_castings(&mut tx, &entry.index, &entry.concept_ids)?;
            if merged {
                debug!(keyspace = %self.ks.name(), index = %entry.index, "merged duplicate castings");
            }
        }
        for entry in &log.resources {
            let merged = self.fix_duplicate_resources(&mut tx, &entry.index, &entry.concept_ids)?;
            if merged {
                debug!(keyspace = %self.ks.name(), index = %entry.index, "merged duplicate resources");
            }
        }

        tx.commit_into_log()
    }

    /// Run `apply` repeatedly until no new candidates surface.
    pub fn apply_to_fixpoint(&self, log: &CommitLog) -> Result<()> {
        let mut current = log.clone();
        loop {
            match self.apply(&current)? {
                Some(next) if !next.is_empty() => current = next,
                _ => return Ok(()),
            }
        }
    }

    // =========================================================================
    // Castings
    // =========================================================================

    /// Merge the duplicate castings recorded under one fingerprint.
    ///
    /// The casting currently returned by the index lookup is the "main" one;
    /// every other candidate transfers its relations to it and is deleted.
    /// Relations found equivalent to one already attached to the main
    /// casting are deleted as redundant.
    pub fn fix_duplicate_castings(
        &self,
        tx: &mut Transaction,
        index: &str,
        candidate_ids: &[ConceptId],
    ) -> Result<bool> {
        let mut duplicates = Vec::new();
        for id in candidate_ids {
            // already-deleted candidates resolve to nothing and are dropped
            if let Some(Concept::Casting(casting)) = tx.raw_concept(id)? {
                duplicates.push(casting);
            }
        }

        let Some(main) = self.indexed_casting(tx, index)? else {
            return Ok(false);
        };
        duplicates.retain(|casting| casting.id != main.id);
        if duplicates.is_empty() {
            return Ok(false);
        }

        let mut main_relations = relations_of_casting(tx, main.vertex)?;
        let mut redundant: Vec<ConceptId> = Vec::new();

        for other in &duplicates {
            for other_relation in relations_of_casting(tx, other.vertex)? {
                let mut equivalent = false;
                for main_relation in &main_relations {
                    if relations_equal(tx, main_relation, &other_relation)? {
                        equivalent = true;
                        break;
                    }
                }
                if equivalent {
                    redundant.push(other_relation.concept_id().clone());
                } else {
                    trace!(index = %index, relation = %other_relation.concept_id(), "repointing relation to main casting");
                    let edge = tx.store_mut().add_edge(
                        other_relation.vertex(),
                        main.vertex,
                        EdgeLabel::Casting,
                    )?;
                    tx.store_mut().set_edge_property(
                        edge,
                        EdgeProp::RoleTypeId,
                        PropertyValue::Long(main.role.as_u32() as i64),
                    )?;
                    main_relations.push(other_relation);
                }
            }
            tx.delete_concept(&other.id)?;
        }

        for relation in redundant {
            tx.delete_concept(&relation)?;
        }

        // defensive write: the index must keep resolving to the survivor
        tx.store_mut().set_property(
            main.vertex,
            VertexProp::Index,
            PropertyValue::Str(main.index.clone()),
        )?;
        Ok(true)
    }

    fn indexed_casting(
        &self,
        tx: &mut Transaction,
        index: &str,
    ) -> Result<Option<CastingConcept>> {
        let Some(vertex) = tx.indexed_vertex(index) else {
            return Ok(None);
        };
        match tx.raw_concept(&ConceptId::new(vertex.to_string()))? {
            Some(Concept::Casting(casting)) => Ok(Some(casting)),
            _ => Ok(None),
        }
    }

    // =========================================================================
    // Resources
    // =========================================================================

    /// Merge the duplicate resources recorded under one fingerprint.
    ///
    /// The indexed resource wins; every other candidate has its relations
    /// copied over to the winner (deduplicating by relation fingerprint)
    /// and is then deleted together with its castings.
    pub fn fix_duplicate_resources(
        &self,
        tx: &mut Transaction,
        index: &str,
        candidate_ids: &[ConceptId],
    ) -> Result<bool> {
        let mut duplicates = Vec::new();
        for id in candidate_ids {
            if let Some(Concept::Instance(instance)) = tx.raw_concept(id)? {
                if instance.is_resource() {
                    duplicates.push(instance);
                }
            }
        }

        let Some(main) = self.indexed_resource(tx, index)? else {
            return Ok(false);
        };
        duplicates.retain(|resource| resource.concept_id() != main.concept_id());
        if duplicates.is_empty() {
            return Ok(false);
        }

        for other in &duplicates {
            // drop the duplicate's shortcut edges so the copy below can
            // re-create them uniquely against the main resource
            for edge in tx.store().in_edges(other.vertex(), EdgeLabel::Shortcut) {
                tx.store_mut().remove_edge(edge.id)?;
            }

            for relation in relations_of_player(tx, other.vertex())? {
                self.copy_relation(tx, &main, other, &relation)?;
            }

            for casting in castings_of_player(tx, other.vertex())? {
                tx.delete_concept(&casting.id)?;
            }
            tx.delete_concept(other.concept_id())?;
        }

        tx.store_mut().set_property(
            main.vertex(),
            VertexProp::Index,
            PropertyValue::Str(index.to_string()),
        )?;
        Ok(true)
    }

    fn indexed_resource(
        &self,
        tx: &mut Transaction,
        index: &str,
    ) -> Result<Option<InstanceConcept>> {
        let Some(vertex) = tx.indexed_vertex(index) else {
            return Ok(None);
        };
        match tx.raw_concept(&ConceptId::new(vertex.to_string()))? {
            Some(Concept::Instance(instance)) if instance.is_resource() => Ok(Some(instance)),
            _ => Ok(None),
        }
    }

    /// Replace `other` with `main` in one of `other`'s relations.
    ///
    /// The role-map is rewritten with the main resource substituted, and its
    /// fingerprint recomputed. If a relation with that fingerprint already
    /// exists the copied relation is redundant and is deleted (its castings
    /// stay; they are deduplicated independently). Otherwise the relation is
    /// repointed by issuing fresh castings for the main resource and the new
    /// fingerprint is recorded.
    fn copy_relation(
        &self,
        tx: &mut Transaction,
        main: &InstanceConcept,
        other: &InstanceConcept,
        relation: &InstanceConcept,
    ) -> Result<()> {
        let mut players = tx.role_map_of(relation)?;
        let mut roles_of_resource: Vec<TypeId> = Vec::new();
        for (role, ids) in players.iter_mut() {
            if ids.remove(other.concept_id()) {
                ids.insert(main.concept_id().clone());
                roles_of_resource.push(*role);
            }
        }

        let fingerprint = relation_index(relation.type_id(), &players);
        let existing = self.relation_by_fingerprint(tx, &fingerprint)?;

        match existing {
            Some(found) if &found != relation.concept_id() => {
                // an equivalent relation already exists; the duplicate's
                // vertex goes, its castings stay
                trace!(fingerprint = %fingerprint, relation = %relation.concept_id(), "dropping redundant relation");
                tx.delete_concept(relation.concept_id())?;
            }
            _ => {
                for role in roles_of_resource {
                    let role_type = tx.type_by_id(role)?.ok_or_else(|| {
                        GraphError::corrupt(format!("unknown role type id [{}]", role))
                    })?;
                    tx.put_casting(relation, &role_type, main)?;
                }
                tx.store_mut().set_property(
                    relation.vertex(),
                    VertexProp::Index,
                    PropertyValue::Str(fingerprint.clone()),
                )?;
                tx.log_mut()
                    .register_modified_relation(fingerprint, relation.concept_id().clone());
            }
        }
        Ok(())
    }

    fn relation_by_fingerprint(
        &self,
        tx: &mut Transaction,
        fingerprint: &str,
    ) -> Result<Option<ConceptId>> {
        if let Some(id) = tx.log().relation_by_fingerprint(fingerprint) {
            return Ok(Some(id.clone()));
        }
        Ok(tx
            .indexed_vertex(fingerprint)
            .map(|vertex| ConceptId::new(vertex.to_string())))
    }
}

fn relations_of_casting(tx: &Transaction, casting: VertexId) -> Result<Vec<InstanceConcept>> {
    let mut relations = Vec::new();
    for edge in tx.store().in_edges(casting, EdgeLabel::Casting) {
        relations.push(build_instance(tx.store(), edge.from)?);
    }
    Ok(relations)
}

fn castings_of_player(tx: &Transaction, player: VertexId) -> Result<Vec<CastingConcept>> {
    let mut castings = Vec::new();
    for edge in tx.store().in_edges(player, EdgeLabel::RolePlayer) {
        castings.push(crate::concept::build_casting(tx.store(), edge.from)?);
    }
    Ok(castings)
}

fn relations_of_player(tx: &Transaction, player: VertexId) -> Result<Vec<InstanceConcept>> {
    let mut relations: Vec<InstanceConcept> = Vec::new();
    for casting in castings_of_player(tx, player)? {
        for relation in relations_of_casting(tx, casting.vertex)? {
            if !relations
                .iter()
                .any(|r| r.concept_id() == relation.concept_id())
            {
                relations.push(relation);
            }
        }
    }
    Ok(relations)
}

fn relations_equal(
    tx: &mut Transaction,
    a: &InstanceConcept,
    b: &InstanceConcept,
) -> Result<bool> {
    if a.type_id() != b.type_id() {
        return Ok(false);
    }
    Ok(tx.role_map_of(a)? == tx.role_map_of(b)?)
}

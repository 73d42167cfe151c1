//! Graph transactions
//!
//! The public mutation surface of the engine. A transaction is an explicit
//! value borrowed from a `Keyspace`; it owns a buffered substrate session,
//! a per-transaction log seeded from the ontology cache, and a read-only
//! flag derived from its kind. Commit validates the touched set, flushes
//! the session, promotes accepted type entries into the shared cache and
//! returns the commit-log payload for asynchronous reconciliation.

use tracing::{debug, trace};

use trellis_core::schema::{
    implicit_has_label, implicit_owner_label, implicit_value_label, MetaSchema,
};
use trellis_core::{
    BaseKind, ConceptId, DataValue, Datatype, EdgeLabel, EdgeProp, GraphError, KeyspaceName,
    PropertyValue, Result, TxKind, TypeId, TypeLabel, VertexProp,
};
use trellis_substrate::{CommitGuard, ElementStore, VertexId};

use crate::commit_log::{CommitLog, InstanceCountDelta};
use crate::concept::{
    build_concept, build_instance, build_type, Concept, InstanceConcept, TypeConcept,
};
use crate::database::{create_shard_vertex, Keyspace};
use crate::fingerprint::{casting_index, relation_index, resource_index, role_map, RoleMap};
use crate::txlog::TransactionLog;
use crate::validator;

#[derive(Debug, Clone, PartialEq, Eq)]
enum TxState {
    Open,
    Closed(String),
}

const REASON_COMMITTED: &str = "transaction committed";
const REASON_ABORTED: &str = "transaction aborted";
const REASON_CLOSED: &str = "transaction closed";

/// A transaction against one keyspace.
///
/// Dropping an open transaction rolls back its substrate session; only an
/// explicit `commit` publishes work.
#[derive(Debug)]
pub struct Transaction {
    ks: Keyspace,
    store: ElementStore,
    log: TransactionLog,
    kind: TxKind,
    state: TxState,
    counter_guard_taken: bool,
    show_implicit: bool,
}

impl Transaction {
    pub(crate) fn open(ks: Keyspace, kind: TxKind) -> Result<Transaction> {
        let session = ks.substrate().session();
        let store = ElementStore::new(session, ks.name().clone(), kind.is_read_only());
        let log = TransactionLog::seeded_from(ks.cache(), kind.is_batch());
        Ok(Transaction {
            ks,
            store,
            log,
            kind,
            state: TxState::Open,
            counter_guard_taken: false,
            show_implicit: false,
        })
    }

    // =========================================================================
    // State
    // =========================================================================

    /// The transaction kind.
    pub fn kind(&self) -> TxKind {
        self.kind
    }

    /// Whether the transaction is still open.
    pub fn is_open(&self) -> bool {
        self.state == TxState::Open
    }

    /// The keyspace this transaction runs against.
    pub fn keyspace_name(&self) -> &KeyspaceName {
        self.ks.name()
    }

    /// Make implicit (engine-generated) types visible in enumerations.
    pub fn show_implicit_concepts(&mut self, visible: bool) {
        self.show_implicit = visible;
    }

    /// Whether implicit types are visible in enumerations.
    pub fn implicit_concepts_visible(&self) -> bool {
        self.show_implicit
    }

    fn ensure_open(&self) -> Result<()> {
        match &self.state {
            TxState::Open => Ok(()),
            TxState::Closed(reason) => {
                Err(GraphError::closed(self.ks.name().clone(), reason.clone()))
            }
        }
    }

    fn check_mutation(&self) -> Result<()> {
        self.ensure_open()?;
        if self.kind.is_read_only() {
            return Err(GraphError::read_only(self.ks.name().clone()));
        }
        Ok(())
    }

    pub(crate) fn store(&self) -> &ElementStore {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut ElementStore {
        &mut self.store
    }

    pub(crate) fn log(&self) -> &TransactionLog {
        &self.log
    }

    pub(crate) fn log_mut(&mut self) -> &mut TransactionLog {
        &mut self.log
    }

    // =========================================================================
    // Index lookups
    // =========================================================================

    /// Look up a vertex by an indexed property, honoring the duplicate
    /// policy: batch loading prefers the indexed (first) vertex, interactive
    /// transactions raise `DuplicateConcept`.
    fn unique_index_vertex(
        &self,
        prop: VertexProp,
        value: &PropertyValue,
    ) -> Result<Option<VertexId>> {
        let vertices = self.store.vertices_by_property(prop, value);
        match vertices.len() {
            0 => Ok(None),
            1 => Ok(Some(vertices[0])),
            _ if self.kind.is_batch() => Ok(Some(vertices[0])),
            _ => Err(GraphError::duplicate_concept(
                prop.as_str(),
                value.to_string(),
            )),
        }
    }

    /// Reconciliation lookup: always prefer the indexed (first) vertex.
    pub(crate) fn indexed_vertex(&self, index: &str) -> Option<VertexId> {
        self.store
            .vertices_by_property(VertexProp::Index, &PropertyValue::Str(index.to_string()))
            .into_iter()
            .next()
    }

    // =========================================================================
    // Types: put
    // =========================================================================

    /// Idempotent creator for an entity type.
    pub fn put_entity_type(&mut self, label: impl Into<TypeLabel>) -> Result<TypeConcept> {
        self.put_type(label.into(), BaseKind::EntityType, None)
    }

    /// Idempotent creator for a relation type.
    pub fn put_relation_type(&mut self, label: impl Into<TypeLabel>) -> Result<TypeConcept> {
        self.put_type(label.into(), BaseKind::RelationType, None)
    }

    /// Idempotent creator for a role type.
    pub fn put_role_type(&mut self, label: impl Into<TypeLabel>) -> Result<TypeConcept> {
        self.put_type(label.into(), BaseKind::RoleType, None)
    }

    /// Idempotent creator for a rule type.
    pub fn put_rule_type(&mut self, label: impl Into<TypeLabel>) -> Result<TypeConcept> {
        self.put_type(label.into(), BaseKind::RuleType, None)
    }

    /// Idempotent creator for a resource type with a declared datatype.
    pub fn put_resource_type(
        &mut self,
        label: impl Into<TypeLabel>,
        datatype: Datatype,
    ) -> Result<TypeConcept> {
        self.put_type(label.into(), BaseKind::ResourceType, Some(datatype))
    }

    /// Idempotent type creator.
    ///
    /// Returns the existing type when `label` is taken and kind (and
    /// datatype, for resources) match; fails with `TypeConflict` on a
    /// mismatch; otherwise allocates the next type-id, creates the vertex
    /// and ensures a shard exists.
    pub fn put_type(
        &mut self,
        label: TypeLabel,
        kind: BaseKind,
        datatype: Option<Datatype>,
    ) -> Result<TypeConcept> {
        self.check_mutation()?;
        if !kind.is_schema() || kind == BaseKind::Type {
            return Err(GraphError::substrate(format!(
                "put_type requires a concrete schema kind, got [{}]",
                kind
            )));
        }
        if MetaSchema::is_meta_label(&label) {
            return Err(GraphError::meta_immutable(label));
        }
        if kind == BaseKind::ResourceType && datatype.is_none() {
            return Err(GraphError::invalid_datatype("none", Datatype::supported()));
        }
        self.put_type_inner(label, kind, datatype, false)
    }

    pub(crate) fn put_type_inner(
        &mut self,
        label: TypeLabel,
        kind: BaseKind,
        datatype: Option<Datatype>,
        implicit: bool,
    ) -> Result<TypeConcept> {
        if let Some(cached) = self.log.cached_type(&label).cloned() {
            return self.verify_existing_type(cached, kind, datatype);
        }

        let label_value = PropertyValue::Str(label.as_str().to_string());
        if let Some(vertex) = self.unique_index_vertex(VertexProp::TypeLabel, &label_value)? {
            let existing = build_type(&self.store, vertex)?;
            let mut verified = self.verify_existing_type(existing, kind, datatype)?;
            // an existing non-meta type must always carry a shard
            if verified.current_shard().is_none() {
                let shard = create_shard_vertex(&mut self.store, vertex, verified.kind())?;
                verified.set_current_shard(shard);
            }
            self.log.cache_type(verified.clone());
            return Ok(verified);
        }

        let type_id = self.next_type_id()?;
        let vertex = self.store.add_vertex(kind)?;
        self.store
            .set_property(vertex, VertexProp::TypeLabel, label_value.clone())?;
        self.store.set_property(
            vertex,
            VertexProp::TypeId,
            PropertyValue::Long(type_id.as_u32() as i64),
        )?;
        if implicit {
            self.store
                .set_property(vertex, VertexProp::IsImplicit, PropertyValue::Bool(true))?;
        }
        if let Some(dt) = datatype {
            self.store.set_property(
                vertex,
                VertexProp::DataType,
                PropertyValue::Str(dt.as_str().to_string()),
            )?;
        }

        // SUB to the kind's meta root
        let parent = meta_root_of(kind);
        let parent_type = self
            .get_type(&parent.label())?
            .ok_or_else(|| GraphError::corrupt(format!("meta type [{}] is missing", parent.label())))?;
        self.store
            .add_edge(vertex, parent_type.vertex(), EdgeLabel::Sub)?;

        // concurrent first-creation of the same label must fail one side
        self.store.guard(CommitGuard::UniqueProperty {
            key: VertexProp::TypeLabel.as_str().to_string(),
            value: label_value,
        })?;

        let mut concept = TypeConcept::new(vertex, type_id, label, kind, datatype);
        concept.set_supertype(parent_type.type_id());
        concept.set_implicit(implicit);
        let shard = create_shard_vertex(&mut self.store, vertex, kind)?;
        concept.set_current_shard(shard);

        trace!(keyspace = %self.ks.name(), label = %concept.label(), id = %type_id, "created type");
        self.log.cache_type(concept.clone());
        Ok(concept)
    }

    fn verify_existing_type(
        &mut self,
        existing: TypeConcept,
        kind: BaseKind,
        datatype: Option<Datatype>,
    ) -> Result<TypeConcept> {
        if existing.kind() != kind {
            return Err(GraphError::type_conflict(
                existing.label().clone(),
                format!("kind is [{}], requested [{}]", existing.kind(), kind),
            ));
        }
        if let Some(requested) = datatype {
            if existing.datatype() != Some(requested) {
                return Err(GraphError::type_conflict(
                    existing.label().clone(),
                    format!(
                        "datatype is [{}], requested [{}]",
                        existing
                            .datatype()
                            .map(|d| d.as_str())
                            .unwrap_or("none"),
                        requested
                    ),
                ));
            }
        }
        Ok(existing)
    }

    /// Allocate the next type-id from the counter on the meta root.
    ///
    /// The first allocation in a transaction guards the committed counter
    /// value, so concurrent allocators conflict at commit and one side
    /// retries.
    fn next_type_id(&mut self) -> Result<TypeId> {
        let meta = self.ks.meta_vertex();
        let current = self.store.property(meta, VertexProp::InstanceCount);
        if !self.counter_guard_taken {
            self.store.guard(CommitGuard::PropertyEquals {
                vertex: meta,
                key: VertexProp::InstanceCount.as_str().to_string(),
                expected: current.clone(),
            })?;
            self.counter_guard_taken = true;
        }
        let next = current
            .as_ref()
            .and_then(PropertyValue::as_long)
            .unwrap_or(MetaSchema::ALL.len() as i64)
            + 1;
        self.store
            .set_property(meta, VertexProp::InstanceCount, PropertyValue::Long(next))?;
        Ok(TypeId::new(next as u32))
    }

    // =========================================================================
    // Types: get
    // =========================================================================

    /// Cache-first type lookup by label.
    pub fn get_type(&mut self, label: &TypeLabel) -> Result<Option<TypeConcept>> {
        self.ensure_open()?;
        if let Some(cached) = self.log.cached_type(label) {
            return Ok(Some(cached.clone()));
        }
        let value = PropertyValue::Str(label.as_str().to_string());
        let Some(vertex) = self.unique_index_vertex(VertexProp::TypeLabel, &value)? else {
            return Ok(None);
        };
        let concept = build_type(&self.store, vertex)?;
        self.log.cache_type(concept.clone());
        Ok(Some(concept))
    }

    /// Type lookup filtered by kind; a kind mismatch returns `None`.
    pub fn get_type_of_kind(
        &mut self,
        label: &TypeLabel,
        kind: BaseKind,
    ) -> Result<Option<TypeConcept>> {
        Ok(self.get_type(label)?.filter(|t| t.kind() == kind))
    }

    /// The entity type with this label, if one exists.
    pub fn get_entity_type(&mut self, label: &str) -> Result<Option<TypeConcept>> {
        self.get_type_of_kind(&TypeLabel::new(label), BaseKind::EntityType)
    }

    /// The relation type with this label, if one exists.
    pub fn get_relation_type(&mut self, label: &str) -> Result<Option<TypeConcept>> {
        self.get_type_of_kind(&TypeLabel::new(label), BaseKind::RelationType)
    }

    /// The role type with this label, if one exists.
    pub fn get_role_type(&mut self, label: &str) -> Result<Option<TypeConcept>> {
        self.get_type_of_kind(&TypeLabel::new(label), BaseKind::RoleType)
    }

    /// The resource type with this label, if one exists.
    pub fn get_resource_type(&mut self, label: &str) -> Result<Option<TypeConcept>> {
        self.get_type_of_kind(&TypeLabel::new(label), BaseKind::ResourceType)
    }

    /// The rule type with this label, if one exists.
    pub fn get_rule_type(&mut self, label: &str) -> Result<Option<TypeConcept>> {
        self.get_type_of_kind(&TypeLabel::new(label), BaseKind::RuleType)
    }

    /// Cache-only peek at a label's type-id.
    pub fn type_id_of(&self, label: &TypeLabel) -> Option<TypeId> {
        self.log.cached_type(label).map(TypeConcept::type_id)
    }

    /// Type lookup by type-id.
    pub fn type_by_id(&mut self, id: TypeId) -> Result<Option<TypeConcept>> {
        self.ensure_open()?;
        if let Some(cached) = self.log.cached_type_by_id(id) {
            return Ok(Some(cached.clone()));
        }
        let value = PropertyValue::Long(id.as_u32() as i64);
        let Some(vertex) = self.unique_index_vertex(VertexProp::TypeId, &value)? else {
            return Ok(None);
        };
        let concept = build_type(&self.store, vertex)?;
        self.log.cache_type(concept.clone());
        Ok(Some(concept))
    }

    fn meta_type(&mut self, meta: MetaSchema) -> Result<TypeConcept> {
        self.get_type(&meta.label())?
            .ok_or_else(|| GraphError::corrupt(format!("meta type [{}] is missing", meta.label())))
    }

    /// The meta root.
    pub fn meta_concept(&mut self) -> Result<TypeConcept> {
        self.meta_type(MetaSchema::Concept)
    }

    /// The meta entity type.
    pub fn meta_entity_type(&mut self) -> Result<TypeConcept> {
        self.meta_type(MetaSchema::EntityType)
    }

    /// The meta relation type.
    pub fn meta_relation_type(&mut self) -> Result<TypeConcept> {
        self.meta_type(MetaSchema::RelationType)
    }

    /// The meta resource type.
    pub fn meta_resource_type(&mut self) -> Result<TypeConcept> {
        self.meta_type(MetaSchema::ResourceType)
    }

    /// The meta role type.
    pub fn meta_role_type(&mut self) -> Result<TypeConcept> {
        self.meta_type(MetaSchema::RoleType)
    }

    /// The meta rule type.
    pub fn meta_rule_type(&mut self) -> Result<TypeConcept> {
        self.meta_type(MetaSchema::RuleType)
    }

    /// The inference-rule subclass.
    pub fn meta_rule_inference(&mut self) -> Result<TypeConcept> {
        self.meta_type(MetaSchema::InferenceRule)
    }

    /// The constraint-rule subclass.
    pub fn meta_rule_constraint(&mut self) -> Result<TypeConcept> {
        self.meta_type(MetaSchema::ConstraintRule)
    }

    /// Every user-visible type, ordered by type-id. Implicit types are
    /// filtered out unless `show_implicit_concepts(true)` was called.
    pub fn types(&mut self) -> Result<Vec<TypeConcept>> {
        self.ensure_open()?;
        let mut result = Vec::new();
        for kind in [
            BaseKind::Type,
            BaseKind::EntityType,
            BaseKind::RelationType,
            BaseKind::ResourceType,
            BaseKind::RoleType,
            BaseKind::RuleType,
        ] {
            for vertex in self.store.vertices_of_kind(kind) {
                if self
                    .store
                    .property(vertex, VertexProp::IsShard)
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false)
                {
                    continue;
                }
                let concept = build_type(&self.store, vertex)?;
                if concept.is_implicit() && !self.show_implicit {
                    continue;
                }
                result.push(concept);
            }
        }
        result.sort_by_key(TypeConcept::type_id);
        Ok(result)
    }

    /// Re-point a type's SUB edge at a new supertype of the same kind.
    ///
    /// Types are created subtyping their kind's meta root; this moves them
    /// under a user-defined parent instead.
    pub fn sub(&mut self, child: &TypeConcept, parent: &TypeConcept) -> Result<TypeConcept> {
        self.check_mutation()?;
        if MetaSchema::is_meta_label(child.label()) {
            return Err(GraphError::meta_immutable(child.label().clone()));
        }
        if child.kind() != parent.kind() {
            return Err(GraphError::type_conflict(
                child.label().clone(),
                format!(
                    "cannot subtype [{}]: kind is [{}], parent is [{}]",
                    parent.label(),
                    child.kind(),
                    parent.kind()
                ),
            ));
        }

        let old_edges: Vec<_> = self
            .store
            .out_edges(child.vertex(), EdgeLabel::Sub)
            .iter()
            .map(|edge| edge.id)
            .collect();
        for edge in old_edges {
            self.store.remove_edge(edge)?;
        }
        self.store
            .add_edge(child.vertex(), parent.vertex(), EdgeLabel::Sub)?;

        let mut updated = self
            .log
            .cached_type(child.label())
            .cloned()
            .unwrap_or_else(|| child.clone());
        updated.set_supertype(parent.type_id());
        self.log.cache_type(updated.clone());
        Ok(updated)
    }

    /// Mark a type abstract (or concrete again). Abstract types cannot have
    /// direct instances.
    pub fn set_abstract(&mut self, of_type: &TypeConcept, is_abstract: bool) -> Result<TypeConcept> {
        self.check_mutation()?;
        if MetaSchema::is_meta_label(of_type.label()) {
            return Err(GraphError::meta_immutable(of_type.label().clone()));
        }
        self.store.set_property(
            of_type.vertex(),
            VertexProp::IsAbstract,
            PropertyValue::Bool(is_abstract),
        )?;
        let mut updated = self
            .log
            .cached_type(of_type.label())
            .cloned()
            .unwrap_or_else(|| of_type.clone());
        updated.set_abstract(is_abstract);
        self.log.cache_type(updated.clone());
        Ok(updated)
    }

    /// Declare a role on a relation type.
    pub fn relates(&mut self, relation: &TypeConcept, role: &TypeConcept) -> Result<()> {
        self.check_mutation()?;
        if relation.kind() != BaseKind::RelationType {
            return Err(GraphError::substrate(format!(
                "type [{}] is not a relation type",
                relation.label()
            )));
        }
        if role.kind() != BaseKind::RoleType {
            return Err(GraphError::substrate(format!(
                "type [{}] is not a role type",
                role.label()
            )));
        }
        if MetaSchema::is_meta_label(relation.label()) {
            return Err(GraphError::meta_immutable(relation.label().clone()));
        }

        let already = self
            .store
            .out_edges(relation.vertex(), EdgeLabel::Relates)
            .iter()
            .any(|edge| edge.to == role.vertex());
        if !already {
            self.store
                .add_edge(relation.vertex(), role.vertex(), EdgeLabel::Relates)?;
        }

        if !self.log.is_type_cached(relation.label()) {
            self.log.cache_type(relation.clone());
        }
        if let Some(cached) = self.log.cached_type_mut(relation.label()) {
            cached.add_role(role.type_id());
        }
        Ok(())
    }

    // =========================================================================
    // Concepts and instances
    // =========================================================================

    /// Cache-first concept lookup by id. Internal concepts (castings,
    /// shards) are never returned.
    pub fn get_concept(&mut self, id: &ConceptId) -> Result<Option<Concept>> {
        self.ensure_open()?;
        if let Some(cached) = self.log.cached_concept(id) {
            return Ok(Some(cached.clone()));
        }
        let value = PropertyValue::Str(id.as_str().to_string());
        let Some(vertex) = self.unique_index_vertex(VertexProp::Id, &value)? else {
            return Ok(None);
        };
        let concept = build_concept(&self.store, vertex)?;
        if !concept.is_public() {
            return Ok(None);
        }
        self.log.cache_concept(concept.clone());
        Ok(Some(concept))
    }

    /// Concept lookup by raw substrate id, bypassing the `ID` index.
    /// Internal concepts are never returned; see `raw_concept` for the
    /// reconciler's unfiltered variant.
    pub fn concept_by_raw_id(&mut self, id: &ConceptId) -> Result<Option<Concept>> {
        Ok(self.raw_concept(id)?.filter(Concept::is_public))
    }

    /// Unfiltered raw-id lookup, dropping already-deleted ids.
    pub(crate) fn raw_concept(&mut self, id: &ConceptId) -> Result<Option<Concept>> {
        self.ensure_open()?;
        let Some(vertex) = self.store.vertex_by_raw_id(id) else {
            return Ok(None);
        };
        build_concept(&self.store, vertex).map(Some)
    }

    /// All resources holding exactly this value.
    pub fn get_resources_by_value(&mut self, value: &DataValue) -> Result<Vec<InstanceConcept>> {
        self.ensure_open()?;
        let prop = value.datatype().value_property();
        let persisted = value.persisted();
        let mut result = Vec::new();
        for vertex in self.store.vertices_by_property(prop, &persisted) {
            if self.store.base_kind(vertex)? != BaseKind::Resource {
                continue;
            }
            let concept = build_instance(&self.store, vertex)?;
            if concept.value() == Some(value) {
                result.push(concept);
            }
        }
        Ok(result)
    }

    /// Create an entity instance of the given type.
    pub fn add_entity(&mut self, entity_type: &TypeConcept) -> Result<InstanceConcept> {
        self.expect_kind(entity_type, BaseKind::EntityType)?;
        self.add_instance(entity_type, BaseKind::Entity)
    }

    /// Create a resource instance holding `value`.
    ///
    /// # Errors
    ///
    /// `ImmutableValue` when the value's datatype differs from the type's
    /// declared datatype.
    pub fn add_resource(
        &mut self,
        resource_type: &TypeConcept,
        value: DataValue,
    ) -> Result<InstanceConcept> {
        self.expect_kind(resource_type, BaseKind::ResourceType)?;
        let declared = resource_type.datatype().ok_or_else(|| {
            GraphError::corrupt(format!(
                "resource type [{}] has no datatype",
                resource_type.label()
            ))
        })?;
        if value.datatype() != declared {
            return Err(GraphError::immutable_value(
                resource_type.label().clone(),
                declared.as_str(),
                value.datatype().as_str(),
            ));
        }

        let mut instance = self.add_instance(resource_type, BaseKind::Resource)?;
        self.store.set_property(
            instance.vertex(),
            declared.value_property(),
            value.persisted(),
        )?;
        let index = resource_index(resource_type.type_id(), &value);
        self.store.set_property(
            instance.vertex(),
            VertexProp::Index,
            PropertyValue::Str(index.clone()),
        )?;
        instance.set_value(value);
        self.log
            .track_resource(index, instance.concept_id().clone());
        self.log.cache_concept(Concept::Instance(instance.clone()));
        Ok(instance)
    }

    /// Create a rule instance with its left- and right-hand patterns.
    pub fn add_rule(
        &mut self,
        rule_type: &TypeConcept,
        lhs: &str,
        rhs: &str,
    ) -> Result<InstanceConcept> {
        self.expect_kind(rule_type, BaseKind::RuleType)?;
        let instance = self.add_instance(rule_type, BaseKind::Rule)?;
        self.store.set_property(
            instance.vertex(),
            VertexProp::RuleLhs,
            PropertyValue::Str(lhs.to_string()),
        )?;
        self.store.set_property(
            instance.vertex(),
            VertexProp::RuleRhs,
            PropertyValue::Str(rhs.to_string()),
        )?;
        Ok(instance)
    }

    fn expect_kind(&self, concept: &TypeConcept, kind: BaseKind) -> Result<()> {
        if concept.kind() != kind {
            return Err(GraphError::substrate(format!(
                "type [{}] has kind [{}], expected [{}]",
                concept.label(),
                concept.kind(),
                kind
            )));
        }
        Ok(())
    }

    fn add_instance(
        &mut self,
        of_type: &TypeConcept,
        kind: BaseKind,
    ) -> Result<InstanceConcept> {
        self.check_mutation()?;
        // the transaction's clone may be fresher than the caller's copy
        let current = self
            .log
            .cached_type(of_type.label())
            .cloned()
            .unwrap_or_else(|| of_type.clone());
        let shard = current.current_shard().ok_or_else(|| {
            GraphError::corrupt(format!("type [{}] has no shard", current.label()))
        })?;

        let vertex = self.store.add_vertex(kind)?;
        self.store.add_edge(vertex, shard, EdgeLabel::Isa)?;

        let instance = InstanceConcept::new(
            vertex,
            kind,
            current.type_id(),
            current.label().clone(),
            None,
        );
        self.log.bump_instance_count(current.label().clone(), 1);
        self.log
            .track_for_validation(instance.concept_id().clone());
        self.log.cache_concept(Concept::Instance(instance.clone()));
        Ok(instance)
    }

    // =========================================================================
    // Relations and castings
    // =========================================================================

    /// Create (or return) the relation of `relation_type` with exactly this
    /// role-map.
    ///
    /// The relation fingerprint is checked against the transaction log and
    /// the index first; an existing relation with an identical fingerprint
    /// is returned as-is.
    pub fn add_relation(
        &mut self,
        relation_type: &TypeConcept,
        players: &RoleMap,
    ) -> Result<InstanceConcept> {
        self.check_mutation()?;
        self.expect_kind(relation_type, BaseKind::RelationType)?;

        let fingerprint = relation_index(relation_type.type_id(), players);
        if let Some(existing) = self.log.relation_by_fingerprint(&fingerprint).cloned() {
            if let Some(Concept::Instance(instance)) = self.log.cached_concept(&existing) {
                return Ok(instance.clone());
            }
            if let Some(Concept::Instance(instance)) =
                self.raw_concept(&existing)?.filter(Concept::is_public)
            {
                return Ok(instance);
            }
        }
        let index_value = PropertyValue::Str(fingerprint.clone());
        if let Some(vertex) = self.unique_index_vertex(VertexProp::Index, &index_value)? {
            let existing = build_instance(&self.store, vertex)?;
            self.log
                .register_modified_relation(fingerprint, existing.concept_id().clone());
            self.log.cache_concept(Concept::Instance(existing.clone()));
            return Ok(existing);
        }

        let relation = self.add_instance(relation_type, BaseKind::Relation)?;
        self.store
            .set_property(relation.vertex(), VertexProp::Index, index_value)?;
        self.log
            .register_new_relation(fingerprint, relation.concept_id().clone());

        for (role_id, player_ids) in players {
            let role = self.type_by_id(*role_id)?.ok_or_else(|| {
                GraphError::substrate(format!("unknown role type id [{}]", role_id))
            })?;
            self.expect_kind(&role, BaseKind::RoleType)?;
            for player_id in player_ids {
                let player = self
                    .get_concept(player_id)?
                    .and_then(|c| c.as_instance().cloned())
                    .ok_or_else(|| {
                        GraphError::substrate(format!("role player [{}] not found", player_id))
                    })?;
                self.put_casting(&relation, &role, &player)?;
            }
        }
        Ok(relation)
    }

    /// The casting protocol for one (relation, role, player) triple.
    ///
    /// Reuses the casting indexed on `(role, player)` when one exists,
    /// otherwise creates it; then ensures the CASTING and SHORTCUT edges
    /// exist exactly once.
    pub(crate) fn put_casting(
        &mut self,
        relation: &InstanceConcept,
        role: &TypeConcept,
        player: &InstanceConcept,
    ) -> Result<VertexId> {
        let index = casting_index(role.type_id(), player.concept_id());
        let role_id_value = PropertyValue::Long(role.type_id().as_u32() as i64);

        let casting = match self.indexed_casting(&index) {
            Some(existing) => existing,
            None => {
                let vertex = self.store.add_vertex(BaseKind::Casting)?;
                self.store.set_property(
                    vertex,
                    VertexProp::Index,
                    PropertyValue::Str(index.clone()),
                )?;
                let edge = self
                    .store
                    .add_edge(vertex, player.vertex(), EdgeLabel::RolePlayer)?;
                self.store
                    .set_edge_property(edge, EdgeProp::RoleTypeId, role_id_value.clone())?;
                vertex
            }
        };

        let linked = self
            .store
            .out_edges(relation.vertex(), EdgeLabel::Casting)
            .iter()
            .any(|edge| edge.to == casting);
        if !linked {
            let edge = self
                .store
                .add_edge(relation.vertex(), casting, EdgeLabel::Casting)?;
            self.store
                .set_edge_property(edge, EdgeProp::RoleTypeId, role_id_value.clone())?;
        }

        self.put_shortcut_edge(relation, role, player)?;

        self.log
            .track_casting(index, ConceptId::new(casting.to_string()));
        self.log
            .track_for_validation(relation.concept_id().clone());
        Ok(casting)
    }

    fn indexed_casting(&self, index: &str) -> Option<VertexId> {
        self.store
            .vertices_by_property(VertexProp::Index, &PropertyValue::Str(index.to_string()))
            .into_iter()
            .find(|vertex| {
                matches!(self.store.base_kind(*vertex), Ok(BaseKind::Casting))
            })
    }

    fn put_shortcut_edge(
        &mut self,
        relation: &InstanceConcept,
        role: &TypeConcept,
        player: &InstanceConcept,
    ) -> Result<()> {
        let relation_type_value = PropertyValue::Long(relation.type_id().as_u32() as i64);
        let role_value = PropertyValue::Long(role.type_id().as_u32() as i64);
        let exists = self
            .store
            .out_edges(relation.vertex(), EdgeLabel::Shortcut)
            .iter()
            .any(|edge| {
                edge.to == player.vertex()
                    && self.store.edge_property(edge, EdgeProp::RelationTypeId).as_ref()
                        == Some(&relation_type_value)
                    && self.store.edge_property(edge, EdgeProp::RoleTypeId).as_ref()
                        == Some(&role_value)
            });
        if !exists {
            let edge = self
                .store
                .add_edge(relation.vertex(), player.vertex(), EdgeLabel::Shortcut)?;
            self.store
                .set_edge_property(edge, EdgeProp::RelationTypeId, relation_type_value)?;
            self.store
                .set_edge_property(edge, EdgeProp::RoleTypeId, role_value)?;
        }
        Ok(())
    }

    /// The full role-map of a relation, read through its castings.
    pub fn role_map_of(&mut self, relation: &InstanceConcept) -> Result<RoleMap> {
        self.ensure_open()?;
        let mut map = RoleMap::new();
        for edge in self.store.out_edges(relation.vertex(), EdgeLabel::Casting) {
            let role = self
                .store
                .edge_property(&edge, EdgeProp::RoleTypeId)
                .and_then(|v| v.as_long())
                .ok_or_else(|| {
                    GraphError::corrupt(format!("CASTING edge {} has no role id", edge.id))
                })?;
            for player_edge in self.store.out_edges(edge.to, EdgeLabel::RolePlayer) {
                map.entry(TypeId::new(role as u32))
                    .or_default()
                    .insert(ConceptId::new(player_edge.to.to_string()));
            }
        }
        Ok(map)
    }

    // =========================================================================
    // Resource ownership
    // =========================================================================

    /// Attach a resource to an owner through the implicit has-resource
    /// relation, creating the implicit types on demand.
    pub fn attach_resource(
        &mut self,
        owner: &InstanceConcept,
        resource: &InstanceConcept,
    ) -> Result<InstanceConcept> {
        self.check_mutation()?;
        if !resource.is_resource() {
            return Err(GraphError::substrate(format!(
                "concept [{}] is not a resource",
                resource.concept_id()
            )));
        }

        let resource_label = resource.type_label().clone();
        let has = self.put_type_inner(
            implicit_has_label(&resource_label),
            BaseKind::RelationType,
            None,
            true,
        )?;
        let owner_role = self.put_type_inner(
            implicit_owner_label(&resource_label),
            BaseKind::RoleType,
            None,
            true,
        )?;
        let value_role = self.put_type_inner(
            implicit_value_label(&resource_label),
            BaseKind::RoleType,
            None,
            true,
        )?;
        self.relates(&has, &owner_role)?;
        self.relates(&has, &value_role)?;
        let has = self
            .log
            .cached_type(has.label())
            .cloned()
            .unwrap_or(has);

        let players = role_map([
            (owner_role.type_id(), owner.concept_id().clone()),
            (value_role.type_id(), resource.concept_id().clone()),
        ]);
        self.add_relation(&has, &players)
    }

    /// Every resource attached to an instance through implicit ownership.
    pub fn resources_of(&mut self, owner: &InstanceConcept) -> Result<Vec<InstanceConcept>> {
        self.ownership_neighbours(owner, "-value")
    }

    /// Every owner of a resource.
    pub fn owners_of(&mut self, resource: &InstanceConcept) -> Result<Vec<InstanceConcept>> {
        self.ownership_neighbours(resource, "-owner")
    }

    /// Shared traversal: follow incoming SHORTCUT edges to implicit
    /// relations, then outgoing SHORTCUT edges whose role label carries the
    /// given suffix.
    fn ownership_neighbours(
        &mut self,
        instance: &InstanceConcept,
        role_suffix: &str,
    ) -> Result<Vec<InstanceConcept>> {
        self.ensure_open()?;
        let mut result: Vec<InstanceConcept> = Vec::new();
        for incoming in self.store.in_edges(instance.vertex(), EdgeLabel::Shortcut) {
            let relation_type = self
                .store
                .edge_property(&incoming, EdgeProp::RelationTypeId)
                .and_then(|v| v.as_long())
                .map(|raw| TypeId::new(raw as u32));
            let Some(relation_type) = relation_type else {
                continue;
            };
            let implicit = self
                .type_by_id(relation_type)?
                .map(|t| t.is_implicit())
                .unwrap_or(false);
            if !implicit {
                continue;
            }
            for outgoing in self.store.out_edges(incoming.from, EdgeLabel::Shortcut) {
                if outgoing.to == instance.vertex() {
                    continue;
                }
                let role = self
                    .store
                    .edge_property(&outgoing, EdgeProp::RoleTypeId)
                    .and_then(|v| v.as_long())
                    .map(|raw| TypeId::new(raw as u32));
                let Some(role) = role else { continue };
                let matches_suffix = self
                    .type_by_id(role)?
                    .map(|t| t.label().as_str().ends_with(role_suffix))
                    .unwrap_or(false);
                if !matches_suffix {
                    continue;
                }
                let neighbour = build_instance(&self.store, outgoing.to)?;
                if !result.iter().any(|r| r.concept_id() == neighbour.concept_id()) {
                    result.push(neighbour);
                }
            }
        }
        Ok(result)
    }

    // =========================================================================
    // Sharding
    // =========================================================================

    /// Apply post-commit instance-count deltas, growing shards when the
    /// threshold is crossed.
    ///
    /// A delta spanning several thresholds grows one shard per threshold
    /// crossed, and the remainder becomes the new count, so after N deltas
    /// of one the type carries ⌊N/threshold⌋ extra shards. The counter is
    /// rewritten in the same transaction that decides the rollover, so a
    /// redelivered sub-threshold delta is re-counted against the remainder
    /// instead of re-sharding.
    pub fn update_type_shards(&mut self, deltas: &[InstanceCountDelta]) -> Result<()> {
        self.check_mutation()?;
        let threshold = self.ks.config().sharding_threshold() as i64;
        for entry in deltas {
            if entry.delta == 0 {
                continue;
            }
            let Some(mut concept) = self.get_type(&entry.type_label)? else {
                continue;
            };
            let mut new_count = concept.instance_count() + entry.delta;
            while new_count >= threshold {
                let shard =
                    create_shard_vertex(&mut self.store, concept.vertex(), concept.kind())?;
                concept.set_current_shard(shard);
                new_count -= threshold;
                debug!(
                    keyspace = %self.ks.name(),
                    label = %concept.label(),
                    "instance count crossed {}, created shard",
                    threshold
                );
            }
            self.store.set_property(
                concept.vertex(),
                VertexProp::InstanceCount,
                PropertyValue::Long(new_count),
            )?;
            concept.set_instance_count(new_count);
            self.log.cache_type(concept);
        }
        Ok(())
    }

    /// Number of shards currently attached to a type.
    pub fn shard_count(&mut self, of_type: &TypeConcept) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.store.in_edges(of_type.vertex(), EdgeLabel::Shard).len())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Validate, flush, promote and publish.
    ///
    /// On success returns the commit-log payload (already submitted through
    /// the keyspace sink unless the keyspace is the system keyspace). On
    /// validation failure the substrate session is rolled back and the
    /// aggregated `Validation` error is returned.
    pub fn commit(&mut self) -> Result<Option<CommitLog>> {
        self.commit_inner(true)
    }

    /// Commit without publishing; the payload is only returned.
    pub fn commit_into_log(&mut self) -> Result<Option<CommitLog>> {
        self.commit_inner(false)
    }

    fn commit_inner(&mut self, publish: bool) -> Result<Option<CommitLog>> {
        self.ensure_open()?;

        if self.kind.is_read_only() {
            // nothing to flush; read types are safe to share
            self.ks.cache().promote(self.log.types_for_promotion());
            self.store.rollback();
            self.state = TxState::Closed(REASON_COMMITTED.to_string());
            return Ok(None);
        }

        let failures = validator::validate(&self.store, &self.log);
        if !failures.is_empty() {
            self.store.rollback();
            self.state = TxState::Closed("validation failed".to_string());
            return Err(GraphError::validation(failures));
        }

        let payload = self.log.commit_payload();
        trace!(keyspace = %self.ks.name(), "graph is valid, committing");
        if let Err(e) = self.store.commit() {
            self.store.rollback();
            self.state = TxState::Closed(format!("commit failed: {}", e));
            return Err(e);
        }

        self.ks.cache().promote(self.log.types_for_promotion());

        if publish && !self.ks.name().is_system() {
            if let Some(log) = &payload {
                if let Err(e) = self.ks.sink().submit(self.ks.name(), log) {
                    tracing::warn!(
                        keyspace = %self.ks.name(),
                        "commit log submission failed: {}",
                        e
                    );
                }
            }
        }

        debug!(keyspace = %self.ks.name(), "graph committed");
        self.state = TxState::Closed(REASON_COMMITTED.to_string());
        Ok(payload)
    }

    /// Discard the transaction log and roll back the substrate session.
    pub fn abort(&mut self) {
        self.close_with(REASON_ABORTED);
    }

    /// Release the transaction without committing.
    pub fn close(&mut self) {
        self.close_with(REASON_CLOSED);
    }

    fn close_with(&mut self, reason: &str) {
        if self.is_open() {
            if self.kind.is_read_only() {
                self.ks.cache().promote(self.log.types_for_promotion());
            }
            self.store.rollback();
            self.state = TxState::Closed(reason.to_string());
        }
    }

    /// Delete a concept's vertex and scrub it from the transaction log.
    pub(crate) fn delete_concept(&mut self, id: &ConceptId) -> Result<()> {
        if let Some(vertex) = self.store.vertex_by_raw_id(id) {
            self.store.remove_vertex(vertex)?;
        }
        self.log.remove_concept(id);
        Ok(())
    }
}

fn meta_root_of(kind: BaseKind) -> MetaSchema {
    match kind {
        BaseKind::EntityType => MetaSchema::EntityType,
        BaseKind::RelationType => MetaSchema::RelationType,
        BaseKind::ResourceType => MetaSchema::ResourceType,
        BaseKind::RoleType => MetaSchema::RoleType,
        _ => MetaSchema::RuleType,
    }
}

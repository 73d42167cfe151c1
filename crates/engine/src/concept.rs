//! Typed concepts and the concept factory
//!
//! Concepts are lightweight values built from substrate vertices using the
//! base-kind discriminator. Schema vertices become `TypeConcept`s, data
//! vertices become `InstanceConcept`s; castings and shards are internal and
//! never surface on the public API.
//!
//! Types refer to each other by `TypeId`, never by pointer, so cloning a
//! `TypeConcept` into a transaction is a plain value copy with no recursion.

use std::collections::BTreeSet;

use trellis_core::{
    BaseKind, ConceptId, DataValue, Datatype, EdgeLabel, EdgeProp, GraphError, Result, TypeId,
    TypeLabel, VertexProp,
};
use trellis_substrate::{ElementStore, VertexId};

// =============================================================================
// TypeConcept
// =============================================================================

/// A schema concept: one of the five type kinds or the meta root.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeConcept {
    vertex: VertexId,
    id: ConceptId,
    type_id: TypeId,
    label: TypeLabel,
    kind: BaseKind,
    is_abstract: bool,
    is_implicit: bool,
    instance_count: i64,
    current_shard: Option<VertexId>,
    datatype: Option<Datatype>,
    roles: BTreeSet<TypeId>,
    supertype: Option<TypeId>,
}

impl TypeConcept {
    pub(crate) fn new(
        vertex: VertexId,
        type_id: TypeId,
        label: TypeLabel,
        kind: BaseKind,
        datatype: Option<Datatype>,
    ) -> Self {
        TypeConcept {
            vertex,
            id: ConceptId::new(vertex.to_string()),
            type_id,
            label,
            kind,
            is_abstract: false,
            is_implicit: false,
            instance_count: 0,
            current_shard: None,
            datatype,
            roles: BTreeSet::new(),
            supertype: None,
        }
    }

    /// The substrate vertex backing this type.
    pub(crate) fn vertex(&self) -> VertexId {
        self.vertex
    }

    /// The opaque concept id.
    pub fn concept_id(&self) -> &ConceptId {
        &self.id
    }

    /// The dense type id.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The unique label.
    pub fn label(&self) -> &TypeLabel {
        &self.label
    }

    /// The schema base kind.
    pub fn kind(&self) -> BaseKind {
        self.kind
    }

    /// Whether direct instances are forbidden.
    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    /// Whether this type was generated by the engine (resource ownership).
    pub fn is_implicit(&self) -> bool {
        self.is_implicit
    }

    /// The sharding counter (the type-id counter on the meta root).
    pub fn instance_count(&self) -> i64 {
        self.instance_count
    }

    /// The current shard vertex, if one exists.
    pub(crate) fn current_shard(&self) -> Option<VertexId> {
        self.current_shard
    }

    /// The declared value datatype (resource types only).
    pub fn datatype(&self) -> Option<Datatype> {
        self.datatype
    }

    /// Declared roles (relation types only).
    pub fn roles(&self) -> &BTreeSet<TypeId> {
        &self.roles
    }

    /// The direct supertype's id (`None` only for the meta root).
    pub fn supertype(&self) -> Option<TypeId> {
        self.supertype
    }

    pub(crate) fn set_abstract(&mut self, value: bool) {
        self.is_abstract = value;
    }

    pub(crate) fn set_implicit(&mut self, value: bool) {
        self.is_implicit = value;
    }

    pub(crate) fn set_instance_count(&mut self, value: i64) {
        self.instance_count = value;
    }

    pub(crate) fn set_current_shard(&mut self, shard: VertexId) {
        self.current_shard = Some(shard);
    }

    pub(crate) fn set_supertype(&mut self, supertype: TypeId) {
        self.supertype = Some(supertype);
    }

    pub(crate) fn add_role(&mut self, role: TypeId) {
        self.roles.insert(role);
    }
}

// =============================================================================
// InstanceConcept
// =============================================================================

/// A data concept: an entity, relation, resource or rule instance.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceConcept {
    vertex: VertexId,
    id: ConceptId,
    kind: BaseKind,
    type_id: TypeId,
    type_label: TypeLabel,
    value: Option<DataValue>,
}

impl InstanceConcept {
    pub(crate) fn new(
        vertex: VertexId,
        kind: BaseKind,
        type_id: TypeId,
        type_label: TypeLabel,
        value: Option<DataValue>,
    ) -> Self {
        InstanceConcept {
            vertex,
            id: ConceptId::new(vertex.to_string()),
            kind,
            type_id,
            type_label,
            value,
        }
    }

    /// The substrate vertex backing this instance.
    pub(crate) fn vertex(&self) -> VertexId {
        self.vertex
    }

    /// The opaque concept id.
    pub fn concept_id(&self) -> &ConceptId {
        &self.id
    }

    /// The instance base kind.
    pub fn kind(&self) -> BaseKind {
        self.kind
    }

    /// The direct type's id.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The direct type's label.
    pub fn type_label(&self) -> &TypeLabel {
        &self.type_label
    }

    /// The stored value (resources only).
    pub fn value(&self) -> Option<&DataValue> {
        self.value.as_ref()
    }

    pub(crate) fn set_value(&mut self, value: DataValue) {
        self.value = Some(value);
    }

    /// Whether this is a resource instance.
    pub fn is_resource(&self) -> bool {
        self.kind == BaseKind::Resource
    }

    /// Whether this is a relation instance.
    pub fn is_relation(&self) -> bool {
        self.kind == BaseKind::Relation
    }
}

// =============================================================================
// Hidden concepts
// =============================================================================

/// Internal bridge concept: "instance plays role". Never exposed on the
/// public API; the casting protocol and the reconciler are its only users.
#[derive(Debug, Clone, PartialEq)]
pub struct CastingConcept {
    pub(crate) vertex: VertexId,
    pub(crate) id: ConceptId,
    pub(crate) index: String,
    pub(crate) role: TypeId,
}

/// Internal partitioning concept interposed between a type and its
/// instances. Never exposed on the public API.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardConcept {
    pub(crate) id: ConceptId,
}

// =============================================================================
// Concept - the discriminated root
// =============================================================================

/// The discriminated root of the concept model.
///
/// Public lookups only ever return the `Type` and `Instance` variants;
/// `Casting` and `Shard` are internal bridging concepts.
#[derive(Debug, Clone, PartialEq)]
pub enum Concept {
    /// A schema concept
    Type(TypeConcept),
    /// A data concept
    Instance(InstanceConcept),
    /// Hidden: a (role, player) bridge
    Casting(CastingConcept),
    /// Hidden: a type partition
    Shard(ShardConcept),
}

impl Concept {
    /// The opaque concept id.
    pub fn concept_id(&self) -> &ConceptId {
        match self {
            Concept::Type(t) => t.concept_id(),
            Concept::Instance(i) => i.concept_id(),
            Concept::Casting(c) => &c.id,
            Concept::Shard(s) => &s.id,
        }
    }

    /// Whether this concept is visible on the public API.
    pub fn is_public(&self) -> bool {
        matches!(self, Concept::Type(_) | Concept::Instance(_))
    }

    /// The type concept, if this is one.
    pub fn as_type(&self) -> Option<&TypeConcept> {
        match self {
            Concept::Type(t) => Some(t),
            _ => None,
        }
    }

    /// The instance concept, if this is one.
    pub fn as_instance(&self) -> Option<&InstanceConcept> {
        match self {
            Concept::Instance(i) => Some(i),
            _ => None,
        }
    }
}

// =============================================================================
// Factory
// =============================================================================

fn read_long(store: &ElementStore, vertex: VertexId, prop: VertexProp) -> Result<i64> {
    store
        .property(vertex, prop)
        .and_then(|v| v.as_long())
        .ok_or_else(|| {
            GraphError::corrupt(format!("vertex {} is missing property [{}]", vertex, prop))
        })
}

fn read_str(store: &ElementStore, vertex: VertexId, prop: VertexProp) -> Result<String> {
    store
        .property(vertex, prop)
        .and_then(|v| v.as_str().map(str::to_string))
        .ok_or_else(|| {
            GraphError::corrupt(format!("vertex {} is missing property [{}]", vertex, prop))
        })
}

fn read_bool(store: &ElementStore, vertex: VertexId, prop: VertexProp) -> bool {
    store
        .property(vertex, prop)
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

fn is_shard(store: &ElementStore, vertex: VertexId) -> bool {
    read_bool(store, vertex, VertexProp::IsShard)
}

/// Build a typed concept from a vertex using the base-kind discriminator.
///
/// # Errors
///
/// A missing or unknown base kind, or a vertex not conforming to the
/// vocabulary of its kind, is a corrupt-graph failure.
pub fn build_concept(store: &ElementStore, vertex: VertexId) -> Result<Concept> {
    let kind = store.base_kind(vertex)?;
    if kind.is_schema() {
        if is_shard(store, vertex) {
            return build_shard(store, vertex).map(Concept::Shard);
        }
        return build_type(store, vertex).map(Concept::Type);
    }
    if kind.is_instance() {
        return build_instance(store, vertex).map(Concept::Instance);
    }
    debug_assert_eq!(kind, BaseKind::Casting);
    build_casting(store, vertex).map(Concept::Casting)
}

/// Build a type concept from a schema vertex.
pub(crate) fn build_type(store: &ElementStore, vertex: VertexId) -> Result<TypeConcept> {
    let kind = store.base_kind(vertex)?;
    if !kind.is_schema() || is_shard(store, vertex) {
        return Err(GraphError::corrupt(format!(
            "vertex {} is not a type vertex",
            vertex
        )));
    }

    let type_id = TypeId::new(read_long(store, vertex, VertexProp::TypeId)? as u32);
    let label = TypeLabel::new(read_str(store, vertex, VertexProp::TypeLabel)?);
    let datatype = match store.property(vertex, VertexProp::DataType) {
        Some(value) => {
            let raw = value.as_str().map(str::to_string).unwrap_or_default();
            Some(Datatype::parse(&raw).ok_or_else(|| {
                GraphError::invalid_datatype(raw, Datatype::supported())
            })?)
        }
        None => None,
    };

    let mut concept = TypeConcept::new(vertex, type_id, label, kind, datatype);
    concept.set_abstract(read_bool(store, vertex, VertexProp::IsAbstract));
    concept.set_implicit(read_bool(store, vertex, VertexProp::IsImplicit));
    concept.set_instance_count(
        store
            .property(vertex, VertexProp::InstanceCount)
            .and_then(|v| v.as_long())
            .unwrap_or(0),
    );

    if let Some(shard) = store
        .property(vertex, VertexProp::CurrentShard)
        .and_then(|v| v.as_str().and_then(trellis_substrate::VertexId::parse))
    {
        concept.set_current_shard(shard);
    }

    // SUB points at the direct supertype; the meta root has none
    if let Some(edge) = store.out_edges(vertex, EdgeLabel::Sub).first() {
        let super_id = read_long(store, edge.to, VertexProp::TypeId)?;
        concept.set_supertype(TypeId::new(super_id as u32));
    }

    for edge in store.out_edges(vertex, EdgeLabel::Relates) {
        let role_id = read_long(store, edge.to, VertexProp::TypeId)?;
        concept.add_role(TypeId::new(role_id as u32));
    }

    Ok(concept)
}

/// Build an instance concept from a data vertex.
///
/// The direct type is resolved through the ISA edge: instance -> shard ->
/// type.
pub(crate) fn build_instance(store: &ElementStore, vertex: VertexId) -> Result<InstanceConcept> {
    let kind = store.base_kind(vertex)?;
    if !kind.is_instance() {
        return Err(GraphError::corrupt(format!(
            "vertex {} is not an instance vertex",
            vertex
        )));
    }

    let isa = store
        .out_edges(vertex, EdgeLabel::Isa)
        .first()
        .map(|edge| edge.to)
        .ok_or_else(|| {
            GraphError::corrupt(format!("instance {} has no ISA edge", vertex))
        })?;
    let type_vertex = store
        .out_edges(isa, EdgeLabel::Shard)
        .first()
        .map(|edge| edge.to)
        .ok_or_else(|| {
            GraphError::corrupt(format!("shard {} has no SHARD edge", isa))
        })?;

    let type_id = TypeId::new(read_long(store, type_vertex, VertexProp::TypeId)? as u32);
    let type_label = TypeLabel::new(read_str(store, type_vertex, VertexProp::TypeLabel)?);

    let value = if kind == BaseKind::Resource {
        let raw = read_str(store, type_vertex, VertexProp::DataType)?;
        let datatype = Datatype::parse(&raw)
            .ok_or_else(|| GraphError::invalid_datatype(raw, Datatype::supported()))?;
        let stored = store
            .property(vertex, datatype.value_property())
            .ok_or_else(|| {
                GraphError::corrupt(format!("resource {} has no stored value", vertex))
            })?;
        Some(DataValue::from_persisted(datatype, &stored).ok_or_else(|| {
            GraphError::invalid_datatype(
                format!("{} stored as {:?}", datatype, stored),
                Datatype::supported(),
            )
        })?)
    } else {
        None
    };

    Ok(InstanceConcept::new(vertex, kind, type_id, type_label, value))
}

/// Build a casting concept from a casting vertex.
pub(crate) fn build_casting(store: &ElementStore, vertex: VertexId) -> Result<CastingConcept> {
    let kind = store.base_kind(vertex)?;
    if kind != BaseKind::Casting {
        return Err(GraphError::corrupt(format!(
            "vertex {} is not a casting vertex",
            vertex
        )));
    }
    let index = read_str(store, vertex, VertexProp::Index)?;
    let role = store
        .out_edges(vertex, EdgeLabel::RolePlayer)
        .first()
        .and_then(|edge| store.edge_property(edge, EdgeProp::RoleTypeId))
        .and_then(|v| v.as_long())
        .ok_or_else(|| {
            GraphError::corrupt(format!("casting {} has no role player edge", vertex))
        })?;
    Ok(CastingConcept {
        vertex,
        id: ConceptId::new(vertex.to_string()),
        index,
        role: TypeId::new(role as u32),
    })
}

fn build_shard(store: &ElementStore, vertex: VertexId) -> Result<ShardConcept> {
    if store.out_edges(vertex, EdgeLabel::Shard).is_empty() {
        return Err(GraphError::corrupt(format!(
            "shard {} has no SHARD edge",
            vertex
        )));
    }
    Ok(ShardConcept {
        id: ConceptId::new(vertex.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::{KeyspaceName, PropertyValue};
    use trellis_substrate::Substrate;

    fn writable_store() -> ElementStore {
        let substrate = Substrate::new();
        ElementStore::new(substrate.session(), KeyspaceName::new("test"), false)
    }

    fn add_type(
        store: &mut ElementStore,
        kind: BaseKind,
        type_id: u32,
        label: &str,
    ) -> VertexId {
        let vertex = store.add_vertex(kind).unwrap();
        store
            .set_property(vertex, VertexProp::TypeId, PropertyValue::Long(type_id as i64))
            .unwrap();
        store
            .set_property(vertex, VertexProp::TypeLabel, PropertyValue::from(label))
            .unwrap();
        vertex
    }

    fn add_shard(store: &mut ElementStore, type_vertex: VertexId, kind: BaseKind) -> VertexId {
        let shard = store.add_vertex(kind).unwrap();
        store
            .set_property(shard, VertexProp::IsShard, PropertyValue::from(true))
            .unwrap();
        store.add_edge(shard, type_vertex, EdgeLabel::Shard).unwrap();
        store
            .set_property(
                type_vertex,
                VertexProp::CurrentShard,
                PropertyValue::Str(shard.to_string()),
            )
            .unwrap();
        shard
    }

    #[test]
    fn builds_a_type_with_roles_and_supertype() {
        let mut store = writable_store();
        let meta = add_type(&mut store, BaseKind::Type, 1, "concept");
        let parentage = add_type(&mut store, BaseKind::RelationType, 9, "parentage");
        let parent = add_type(&mut store, BaseKind::RoleType, 10, "parent");
        store.add_edge(parentage, meta, EdgeLabel::Sub).unwrap();
        store.add_edge(parentage, parent, EdgeLabel::Relates).unwrap();

        let concept = build_type(&store, parentage).unwrap();
        assert_eq!(concept.type_id(), TypeId::new(9));
        assert_eq!(concept.label().as_str(), "parentage");
        assert_eq!(concept.kind(), BaseKind::RelationType);
        assert_eq!(concept.supertype(), Some(TypeId::new(1)));
        assert!(concept.roles().contains(&TypeId::new(10)));
        assert!(!concept.is_abstract());
    }

    #[test]
    fn builds_an_instance_through_its_shard() {
        let mut store = writable_store();
        let person = add_type(&mut store, BaseKind::EntityType, 9, "person");
        let shard = add_shard(&mut store, person, BaseKind::EntityType);
        let alice = store.add_vertex(BaseKind::Entity).unwrap();
        store.add_edge(alice, shard, EdgeLabel::Isa).unwrap();

        let concept = build_instance(&store, alice).unwrap();
        assert_eq!(concept.kind(), BaseKind::Entity);
        assert_eq!(concept.type_id(), TypeId::new(9));
        assert_eq!(concept.type_label().as_str(), "person");
        assert_eq!(concept.value(), None);
    }

    #[test]
    fn builds_a_resource_with_its_value() {
        let mut store = writable_store();
        let name = add_type(&mut store, BaseKind::ResourceType, 9, "name");
        store
            .set_property(name, VertexProp::DataType, PropertyValue::from("string"))
            .unwrap();
        let shard = add_shard(&mut store, name, BaseKind::ResourceType);
        let value = store.add_vertex(BaseKind::Resource).unwrap();
        store.add_edge(value, shard, EdgeLabel::Isa).unwrap();
        store
            .set_property(value, VertexProp::ValueString, PropertyValue::from("alice"))
            .unwrap();

        let concept = build_instance(&store, value).unwrap();
        assert!(concept.is_resource());
        assert_eq!(concept.value(), Some(&DataValue::from("alice")));
    }

    #[test]
    fn shard_vertices_classify_as_hidden_shards() {
        let mut store = writable_store();
        let person = add_type(&mut store, BaseKind::EntityType, 9, "person");
        let shard = add_shard(&mut store, person, BaseKind::EntityType);

        let concept = build_concept(&store, shard).unwrap();
        assert!(!concept.is_public());
        assert!(matches!(concept, Concept::Shard(_)));
    }

    #[test]
    fn instance_without_isa_is_corrupt() {
        let mut store = writable_store();
        let orphan = store.add_vertex(BaseKind::Entity).unwrap();
        let err = build_instance(&store, orphan).unwrap_err();
        assert!(err.to_string().contains("no ISA edge"));
    }

    #[test]
    fn type_with_unknown_datatype_is_invalid() {
        let mut store = writable_store();
        let bad = add_type(&mut store, BaseKind::ResourceType, 9, "age");
        store
            .set_property(bad, VertexProp::DataType, PropertyValue::from("float"))
            .unwrap();
        assert!(matches!(
            build_type(&store, bad),
            Err(GraphError::InvalidDatatype { .. })
        ));
    }
}

//! Schema vocabulary
//!
//! The fixed enumeration of base kinds, edge labels, reserved vertex/edge
//! property names, and the meta-schema table that bootstraps every keyspace.
//! These names are the wire representation stored on the substrate; they are
//! frozen and will not change without a data migration.

use crate::ids::{TypeId, TypeLabel};

// =============================================================================
// BaseKind - Vertex Discriminator
// =============================================================================

/// The base kind of a vertex.
///
/// Every vertex carries its base kind as its substrate label. The kind is the
/// discriminator the concept factory uses to build typed concepts: the five
/// `*Type` kinds plus the meta root `Type` are schema vertices, the four
/// instance kinds are data vertices, and `Casting` is the hidden bridge kind.
///
/// Shard vertices reuse the base kind of the type they shard and are marked
/// with the `IS_SHARD` property instead of a dedicated kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseKind {
    /// The meta root schema kind (only the `concept` vertex)
    Type,
    /// Schema vertex: an entity type
    EntityType,
    /// Schema vertex: a relation type
    RelationType,
    /// Schema vertex: a resource type
    ResourceType,
    /// Schema vertex: a role type
    RoleType,
    /// Schema vertex: a rule type
    RuleType,
    /// Data vertex: an entity instance
    Entity,
    /// Data vertex: a relation instance
    Relation,
    /// Data vertex: a resource instance
    Resource,
    /// Data vertex: a rule instance
    Rule,
    /// Hidden bridge vertex carrying (role, player) identity
    Casting,
}

impl BaseKind {
    /// All base kinds, in a stable order.
    pub const ALL: [BaseKind; 11] = [
        BaseKind::Type,
        BaseKind::EntityType,
        BaseKind::RelationType,
        BaseKind::ResourceType,
        BaseKind::RoleType,
        BaseKind::RuleType,
        BaseKind::Entity,
        BaseKind::Relation,
        BaseKind::Resource,
        BaseKind::Rule,
        BaseKind::Casting,
    ];

    /// The canonical string stored as the vertex label.
    pub fn as_str(&self) -> &'static str {
        match self {
            BaseKind::Type => "TYPE",
            BaseKind::EntityType => "ENTITY_TYPE",
            BaseKind::RelationType => "RELATION_TYPE",
            BaseKind::ResourceType => "RESOURCE_TYPE",
            BaseKind::RoleType => "ROLE_TYPE",
            BaseKind::RuleType => "RULE_TYPE",
            BaseKind::Entity => "ENTITY",
            BaseKind::Relation => "RELATION",
            BaseKind::Resource => "RESOURCE",
            BaseKind::Rule => "RULE",
            BaseKind::Casting => "CASTING",
        }
    }

    /// Parse a base kind from its stored string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TYPE" => Some(BaseKind::Type),
            "ENTITY_TYPE" => Some(BaseKind::EntityType),
            "RELATION_TYPE" => Some(BaseKind::RelationType),
            "RESOURCE_TYPE" => Some(BaseKind::ResourceType),
            "ROLE_TYPE" => Some(BaseKind::RoleType),
            "RULE_TYPE" => Some(BaseKind::RuleType),
            "ENTITY" => Some(BaseKind::Entity),
            "RELATION" => Some(BaseKind::Relation),
            "RESOURCE" => Some(BaseKind::Resource),
            "RULE" => Some(BaseKind::Rule),
            "CASTING" => Some(BaseKind::Casting),
            _ => None,
        }
    }

    /// True for the schema kinds (`Type` and the five `*Type` kinds).
    pub fn is_schema(&self) -> bool {
        matches!(
            self,
            BaseKind::Type
                | BaseKind::EntityType
                | BaseKind::RelationType
                | BaseKind::ResourceType
                | BaseKind::RoleType
                | BaseKind::RuleType
        )
    }

    /// True for the instance kinds.
    pub fn is_instance(&self) -> bool {
        matches!(
            self,
            BaseKind::Entity | BaseKind::Relation | BaseKind::Resource | BaseKind::Rule
        )
    }

    /// The instance kind produced by a schema kind, if any.
    ///
    /// `RoleType` has no direct instances (roles are filled through castings)
    /// and the meta root has none either.
    pub fn instance_kind(&self) -> Option<BaseKind> {
        match self {
            BaseKind::EntityType => Some(BaseKind::Entity),
            BaseKind::RelationType => Some(BaseKind::Relation),
            BaseKind::ResourceType => Some(BaseKind::Resource),
            BaseKind::RuleType => Some(BaseKind::Rule),
            _ => None,
        }
    }
}

impl std::fmt::Display for BaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// EdgeLabel - Edge Vocabulary
// =============================================================================

/// The label of a substrate edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeLabel {
    /// subtype-of (type -> type)
    Sub,
    /// shard -> type
    Shard,
    /// relation -> casting
    Casting,
    /// casting -> instance
    RolePlayer,
    /// relation -> instance, denormalised for query
    Shortcut,
    /// instance -> shard-of-type
    Isa,
    /// relation type -> declared role type
    Relates,
}

impl EdgeLabel {
    /// The canonical string stored as the edge label.
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeLabel::Sub => "SUB",
            EdgeLabel::Shard => "SHARD",
            EdgeLabel::Casting => "CASTING",
            EdgeLabel::RolePlayer => "ROLE_PLAYER",
            EdgeLabel::Shortcut => "SHORTCUT",
            EdgeLabel::Isa => "ISA",
            EdgeLabel::Relates => "RELATES",
        }
    }

    /// Parse an edge label from its stored string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SUB" => Some(EdgeLabel::Sub),
            "SHARD" => Some(EdgeLabel::Shard),
            "CASTING" => Some(EdgeLabel::Casting),
            "ROLE_PLAYER" => Some(EdgeLabel::RolePlayer),
            "SHORTCUT" => Some(EdgeLabel::Shortcut),
            "ISA" => Some(EdgeLabel::Isa),
            "RELATES" => Some(EdgeLabel::Relates),
            _ => None,
        }
    }
}

impl std::fmt::Display for EdgeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// VertexProp / EdgeProp - Reserved Property Names
// =============================================================================

/// Reserved vertex property names.
///
/// `InstanceCount` is dual-purpose: on the meta root it is the monotonic
/// type-id counter; on ordinary types it is the sharding counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexProp {
    /// String copy of the raw substrate id, stamped at creation
    Id,
    /// Unique label of a type vertex
    TypeLabel,
    /// Dense integer id of a type vertex
    TypeId,
    /// Sharding counter (type-id counter on the meta root)
    InstanceCount,
    /// Abstract types cannot have direct instances
    IsAbstract,
    /// Marks a shard vertex
    IsShard,
    /// Marks an implicit (engine-generated) type
    IsImplicit,
    /// Raw id of the type's current shard vertex
    CurrentShard,
    /// Uniqueness fingerprint of a casting, resource or relation
    Index,
    /// Declared datatype of a resource type
    DataType,
    /// Left-hand side pattern of a rule instance
    RuleLhs,
    /// Right-hand side pattern of a rule instance
    RuleRhs,
    /// String resource value
    ValueString,
    /// Long resource value
    ValueLong,
    /// Double resource value
    ValueDouble,
    /// Boolean resource value
    ValueBoolean,
    /// Date resource value (ISO-8601)
    ValueDate,
}

impl VertexProp {
    /// The canonical property key stored on the substrate.
    pub fn as_str(&self) -> &'static str {
        match self {
            VertexProp::Id => "ID",
            VertexProp::TypeLabel => "TYPE_LABEL",
            VertexProp::TypeId => "TYPE_ID",
            VertexProp::InstanceCount => "INSTANCE_COUNT",
            VertexProp::IsAbstract => "IS_ABSTRACT",
            VertexProp::IsShard => "IS_SHARD",
            VertexProp::IsImplicit => "IS_IMPLICIT",
            VertexProp::CurrentShard => "CURRENT_SHARD",
            VertexProp::Index => "INDEX",
            VertexProp::DataType => "DATA_TYPE",
            VertexProp::RuleLhs => "RULE_LHS",
            VertexProp::RuleRhs => "RULE_RHS",
            VertexProp::ValueString => "VALUE_STRING",
            VertexProp::ValueLong => "VALUE_LONG",
            VertexProp::ValueDouble => "VALUE_DOUBLE",
            VertexProp::ValueBoolean => "VALUE_BOOLEAN",
            VertexProp::ValueDate => "VALUE_DATE",
        }
    }
}

impl std::fmt::Display for VertexProp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reserved edge property names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeProp {
    /// Role type id annotated on CASTING, ROLE_PLAYER and SHORTCUT edges
    RoleTypeId,
    /// Relation type id annotated on SHORTCUT edges
    RelationTypeId,
}

impl EdgeProp {
    /// The canonical property key stored on the substrate.
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeProp::RoleTypeId => "ROLE_TYPE_ID",
            EdgeProp::RelationTypeId => "RELATION_TYPE_ID",
        }
    }
}

impl std::fmt::Display for EdgeProp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// MetaSchema - Bootstrap Ontology
// =============================================================================

/// The meta-schema entries created when a keyspace is bootstrapped.
///
/// Type-ids 1 through 8 are reserved for these entries; user types are
/// allocated from 9 upwards. The two rule subclasses SUB `rule-type`; every
/// other entry SUBs the meta root `concept`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaSchema {
    /// The meta root
    Concept,
    /// Root of all entity types
    EntityType,
    /// Root of all relation types
    RelationType,
    /// Root of all resource types
    ResourceType,
    /// Root of all role types
    RoleType,
    /// Root of all rule types
    RuleType,
    /// Rule subclass holding inference rules
    InferenceRule,
    /// Rule subclass holding constraint rules
    ConstraintRule,
}

impl MetaSchema {
    /// All meta-schema entries in bootstrap order.
    pub const ALL: [MetaSchema; 8] = [
        MetaSchema::Concept,
        MetaSchema::EntityType,
        MetaSchema::RelationType,
        MetaSchema::ResourceType,
        MetaSchema::RoleType,
        MetaSchema::RuleType,
        MetaSchema::InferenceRule,
        MetaSchema::ConstraintRule,
    ];

    /// The stable type-id of this entry.
    pub fn type_id(&self) -> TypeId {
        let raw = match self {
            MetaSchema::Concept => 1,
            MetaSchema::EntityType => 2,
            MetaSchema::RelationType => 3,
            MetaSchema::ResourceType => 4,
            MetaSchema::RoleType => 5,
            MetaSchema::RuleType => 6,
            MetaSchema::InferenceRule => 7,
            MetaSchema::ConstraintRule => 8,
        };
        TypeId::new(raw)
    }

    /// The reserved label of this entry.
    pub fn label(&self) -> TypeLabel {
        TypeLabel::new(match self {
            MetaSchema::Concept => "concept",
            MetaSchema::EntityType => "entity-type",
            MetaSchema::RelationType => "relation-type",
            MetaSchema::ResourceType => "resource-type",
            MetaSchema::RoleType => "role-type",
            MetaSchema::RuleType => "rule-type",
            MetaSchema::InferenceRule => "inference-rule",
            MetaSchema::ConstraintRule => "constraint-rule",
        })
    }

    /// The base kind of the vertex representing this entry.
    pub fn base_kind(&self) -> BaseKind {
        match self {
            MetaSchema::Concept => BaseKind::Type,
            MetaSchema::EntityType => BaseKind::EntityType,
            MetaSchema::RelationType => BaseKind::RelationType,
            MetaSchema::ResourceType => BaseKind::ResourceType,
            MetaSchema::RoleType => BaseKind::RoleType,
            MetaSchema::RuleType | MetaSchema::InferenceRule | MetaSchema::ConstraintRule => {
                BaseKind::RuleType
            }
        }
    }

    /// The entry this one SUBs at bootstrap (`None` for the meta root).
    pub fn supertype(&self) -> Option<MetaSchema> {
        match self {
            MetaSchema::Concept => None,
            MetaSchema::InferenceRule | MetaSchema::ConstraintRule => Some(MetaSchema::RuleType),
            _ => Some(MetaSchema::Concept),
        }
    }

    /// Whether a label is reserved by the meta schema.
    pub fn is_meta_label(label: &TypeLabel) -> bool {
        Self::of_label(label).is_some()
    }

    /// Look up the meta entry carrying `label`.
    pub fn of_label(label: &TypeLabel) -> Option<MetaSchema> {
        Self::ALL.iter().copied().find(|m| &m.label() == label)
    }

    /// Look up the meta entry carrying `id`.
    pub fn of_type_id(id: TypeId) -> Option<MetaSchema> {
        Self::ALL.iter().copied().find(|m| m.type_id() == id)
    }
}

// =============================================================================
// Implicit Type Labels
// =============================================================================

/// Label of the implicit relation type connecting owners to a resource type.
pub fn implicit_has_label(resource: &TypeLabel) -> TypeLabel {
    TypeLabel::new(format!("has-{}", resource))
}

/// Label of the implicit role played by the owner of a resource.
pub fn implicit_owner_label(resource: &TypeLabel) -> TypeLabel {
    TypeLabel::new(format!("has-{}-owner", resource))
}

/// Label of the implicit role played by the resource value itself.
pub fn implicit_value_label(resource: &TypeLabel) -> TypeLabel {
    TypeLabel::new(format!("has-{}-value", resource))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_kind_round_trips() {
        for kind in BaseKind::ALL {
            assert_eq!(BaseKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(BaseKind::parse("NOT_A_KIND"), None);
    }

    #[test]
    fn schema_and_instance_kinds_are_disjoint() {
        for kind in BaseKind::ALL {
            assert!(!(kind.is_schema() && kind.is_instance()));
        }
        assert_eq!(BaseKind::EntityType.instance_kind(), Some(BaseKind::Entity));
        assert_eq!(BaseKind::RoleType.instance_kind(), None);
    }

    #[test]
    fn edge_label_round_trips() {
        for label in [
            EdgeLabel::Sub,
            EdgeLabel::Shard,
            EdgeLabel::Casting,
            EdgeLabel::RolePlayer,
            EdgeLabel::Shortcut,
            EdgeLabel::Isa,
            EdgeLabel::Relates,
        ] {
            assert_eq!(EdgeLabel::parse(label.as_str()), Some(label));
        }
    }

    #[test]
    fn meta_schema_ids_are_dense_from_one() {
        for (i, meta) in MetaSchema::ALL.iter().enumerate() {
            assert_eq!(meta.type_id(), TypeId::new(i as u32 + 1));
        }
    }

    #[test]
    fn meta_schema_label_lookup() {
        let label = TypeLabel::new("rule-type");
        assert!(MetaSchema::is_meta_label(&label));
        assert_eq!(MetaSchema::of_label(&label), Some(MetaSchema::RuleType));
        assert!(!MetaSchema::is_meta_label(&TypeLabel::new("person")));
    }

    #[test]
    fn rule_subclasses_sub_rule_type() {
        assert_eq!(
            MetaSchema::InferenceRule.supertype(),
            Some(MetaSchema::RuleType)
        );
        assert_eq!(
            MetaSchema::ConstraintRule.supertype(),
            Some(MetaSchema::RuleType)
        );
        assert_eq!(MetaSchema::Concept.supertype(), None);
        assert_eq!(
            MetaSchema::EntityType.supertype(),
            Some(MetaSchema::Concept)
        );
    }

    #[test]
    fn implicit_labels() {
        let name = TypeLabel::new("name");
        assert_eq!(implicit_has_label(&name).as_str(), "has-name");
        assert_eq!(implicit_owner_label(&name).as_str(), "has-name-owner");
        assert_eq!(implicit_value_label(&name).as_str(), "has-name-value");
    }
}

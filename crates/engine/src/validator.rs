//! Commit-time validation
//!
//! Walks the concepts marked in the transaction log and checks the model
//! invariants: exactly one ISA per instance, no instances of abstract
//! types, every relation has role players, every role played is declared on
//! the relation type, resource values conform to their datatype, and every
//! SHORTCUT edge is mirrored by a casting with the same role.
//!
//! Validation is total: it never short-circuits, and every failure found in
//! one pass is reported together.

use std::collections::BTreeSet;

use trellis_core::{BaseKind, DataValue, Datatype, EdgeLabel, EdgeProp, PropertyValue, TypeId, VertexProp};
use trellis_substrate::{ElementStore, VertexId};

use crate::concept::{build_instance, build_type, TypeConcept};
use crate::txlog::TransactionLog;

/// Validate every tracked concept, returning all failures found.
pub(crate) fn validate(store: &ElementStore, log: &TransactionLog) -> Vec<String> {
    let mut failures = Vec::new();
    for id in log.validation_targets() {
        // resolve through raw ids: tracked concepts may have been merged away
        let Some(vertex) = store.vertex_by_raw_id(id) else {
            continue;
        };
        validate_instance(store, log, vertex, &mut failures);
    }
    failures
}

fn validate_instance(
    store: &ElementStore,
    log: &TransactionLog,
    vertex: VertexId,
    failures: &mut Vec<String>,
) {
    let kind = match store.base_kind(vertex) {
        Ok(kind) => kind,
        Err(e) => {
            failures.push(e.to_string());
            return;
        }
    };
    if !kind.is_instance() {
        return;
    }

    // invariant: exactly one ISA to exactly one shard of one direct type
    let isa_count = store.out_edges(vertex, EdgeLabel::Isa).len();
    if isa_count != 1 {
        failures.push(format!(
            "instance [{}] has {} ISA edges, expected exactly one",
            vertex, isa_count
        ));
        return;
    }

    let instance = match build_instance(store, vertex) {
        Ok(instance) => instance,
        Err(e) => {
            failures.push(e.to_string());
            return;
        }
    };

    let direct_type = resolve_type(store, log, instance.type_id());
    match &direct_type {
        Some(t) if t.is_abstract() => {
            failures.push(format!(
                "type [{}] is abstract and cannot have direct instances",
                t.label()
            ));
        }
        Some(_) => {}
        None => {
            failures.push(format!(
                "instance [{}] points at unknown type id [{}]",
                vertex,
                instance.type_id()
            ));
        }
    }

    match kind {
        BaseKind::Relation => {
            validate_relation(store, vertex, direct_type.as_ref(), failures)
        }
        BaseKind::Resource => {
            validate_resource(store, vertex, direct_type.as_ref(), failures)
        }
        _ => {}
    }
}

fn validate_relation(
    store: &ElementStore,
    vertex: VertexId,
    relation_type: Option<&TypeConcept>,
    failures: &mut Vec<String>,
) {
    let castings = store.out_edges(vertex, EdgeLabel::Casting);
    if castings.is_empty() {
        let label = relation_type
            .map(|t| t.label().as_str().to_string())
            .unwrap_or_else(|| "?".to_string());
        failures.push(format!(
            "relation [{}] of type [{}] has no role players",
            vertex, label
        ));
        return;
    }

    let mut played: BTreeSet<TypeId> = BTreeSet::new();
    for edge in &castings {
        match store
            .edge_property(edge, EdgeProp::RoleTypeId)
            .and_then(|v| v.as_long())
        {
            Some(role) => {
                played.insert(TypeId::new(role as u32));
            }
            None => failures.push(format!(
                "relation [{}] has a casting without a role annotation",
                vertex
            )),
        }
    }

    if let Some(relation_type) = relation_type {
        for role in &played {
            if !relation_type.roles().contains(role) {
                failures.push(format!(
                    "role [{}] played in relation [{}] is not declared on type [{}]",
                    role,
                    vertex,
                    relation_type.label()
                ));
            }
        }
    }

    // invariant: every SHORTCUT is mirrored by a casting with the same role
    for edge in store.out_edges(vertex, EdgeLabel::Shortcut) {
        let role = store
            .edge_property(&edge, EdgeProp::RoleTypeId)
            .and_then(|v| v.as_long())
            .map(|raw| TypeId::new(raw as u32));
        match role {
            Some(role) if played.contains(&role) => {}
            Some(role) => failures.push(format!(
                "SHORTCUT edge on relation [{}] carries role [{}] with no matching casting",
                vertex, role
            )),
            None => failures.push(format!(
                "SHORTCUT edge on relation [{}] has no role annotation",
                vertex
            )),
        }
    }
}

fn validate_resource(
    store: &ElementStore,
    vertex: VertexId,
    resource_type: Option<&TypeConcept>,
    failures: &mut Vec<String>,
) {
    let Some(resource_type) = resource_type else {
        return; // already reported as an unknown type
    };
    let Some(datatype) = resource_type.datatype() else {
        failures.push(format!(
            "resource type [{}] declares no datatype",
            resource_type.label()
        ));
        return;
    };
    let stored = store.property(vertex, datatype.value_property());
    let conforms = stored
        .as_ref()
        .and_then(|value| DataValue::from_persisted(datatype, value))
        .is_some();
    if !conforms {
        failures.push(format!(
            "resource [{}] of type [{}] does not hold a [{}] value",
            vertex,
            resource_type.label(),
            datatype
        ));
    }
    // a value under a different datatype property means the datatype changed
    for other in Datatype::ALL {
        if other != datatype && store.property(vertex, other.value_property()).is_some() {
            failures.push(format!(
                "resource [{}] of type [{}] also stores a [{}] value",
                vertex,
                resource_type.label(),
                other
            ));
        }
    }
}

fn resolve_type(
    store: &ElementStore,
    log: &TransactionLog,
    id: TypeId,
) -> Option<TypeConcept> {
    if let Some(cached) = log.cached_type_by_id(id) {
        return Some(cached.clone());
    }
    let value = PropertyValue::Long(id.as_u32() as i64);
    let vertex = store
        .vertices_by_property(VertexProp::TypeId, &value)
        .into_iter()
        .next()?;
    build_type(store, vertex).ok()
}

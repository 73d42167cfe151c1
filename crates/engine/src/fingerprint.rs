//! Uniqueness fingerprints
//!
//! Deterministic canonical strings stored under the `INDEX` property and
//! used as uniqueness keys: equality of fingerprints is equivalent to
//! semantic equality of the indexed structure. Role-maps render with sorted
//! roles and sorted players so insertion order never leaks into the key.

use std::collections::{BTreeMap, BTreeSet};

use trellis_core::{ConceptId, DataValue, TypeId};

/// Role-map of a relation: role type id to the set of players filling it.
pub type RoleMap = BTreeMap<TypeId, BTreeSet<ConceptId>>;

/// Fingerprint of a casting: one (role, player) pair.
pub fn casting_index(role: TypeId, player: &ConceptId) -> String {
    format!("casting-role-{}-player-{}", role, player)
}

/// Fingerprint of a resource: one (resource type, value) pair.
pub fn resource_index(resource_type: TypeId, value: &DataValue) -> String {
    format!("resource-type-{}-value-{}", resource_type, value.canonical())
}

/// Fingerprint of a relation: its type plus its full role-map.
pub fn relation_index(relation_type: TypeId, role_map: &RoleMap) -> String {
    let mut index = format!("relation-type-{}", relation_type);
    for (role, players) in role_map {
        index.push_str(&format!("-role-{}-players", role));
        for player in players {
            index.push_str(&format!("-{}", player));
        }
    }
    index
}

/// Build a role-map from (role, player) pairs.
pub fn role_map<I>(pairs: I) -> RoleMap
where
    I: IntoIterator<Item = (TypeId, ConceptId)>,
{
    let mut map = RoleMap::new();
    for (role, player) in pairs {
        map.entry(role).or_default().insert(player);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(raw: &str) -> ConceptId {
        ConceptId::new(raw)
    }

    #[test]
    fn relation_index_ignores_insertion_order() {
        let a = role_map([
            (TypeId::new(10), cid("2")),
            (TypeId::new(9), cid("1")),
            (TypeId::new(9), cid("3")),
        ]);
        let b = role_map([
            (TypeId::new(9), cid("3")),
            (TypeId::new(9), cid("1")),
            (TypeId::new(10), cid("2")),
        ]);
        assert_eq!(
            relation_index(TypeId::new(4), &a),
            relation_index(TypeId::new(4), &b)
        );
    }

    #[test]
    fn relation_index_separates_types_and_players() {
        let map = role_map([(TypeId::new(9), cid("1"))]);
        assert_ne!(
            relation_index(TypeId::new(4), &map),
            relation_index(TypeId::new(5), &map)
        );
        let other = role_map([(TypeId::new(9), cid("2"))]);
        assert_ne!(
            relation_index(TypeId::new(4), &map),
            relation_index(TypeId::new(4), &other)
        );
    }

    #[test]
    fn casting_index_is_role_player_identity() {
        assert_eq!(
            casting_index(TypeId::new(9), &cid("42")),
            casting_index(TypeId::new(9), &cid("42"))
        );
        assert_ne!(
            casting_index(TypeId::new(9), &cid("42")),
            casting_index(TypeId::new(10), &cid("42"))
        );
    }

    #[test]
    fn resource_index_distinguishes_datatypes() {
        assert_ne!(
            resource_index(TypeId::new(9), &DataValue::from("1")),
            resource_index(TypeId::new(9), &DataValue::from(1i64))
        );
    }
}

//! Identifier newtypes
//!
//! Small value types used across every layer: type ids and labels, opaque
//! concept ids handed out by the substrate, keyspace names, and the
//! transaction kind selector.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;

/// Dense integer id of a type within a keyspace.
///
/// Ids 1..=8 are reserved for the meta schema; user types are allocated
/// monotonically from 9 by the counter stored on the meta root vertex.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct TypeId(u32);

impl TypeId {
    /// Wrap a raw type id.
    pub fn new(raw: u32) -> Self {
        TypeId(raw)
    }

    /// The raw integer value.
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// The id following this one.
    pub fn next(&self) -> TypeId {
        TypeId(self.0 + 1)
    }
}

impl std::fmt::Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique label of a type within a keyspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeLabel(String);

impl TypeLabel {
    /// Wrap a label string.
    pub fn new(label: impl Into<String>) -> Self {
        TypeLabel(label.into())
    }

    /// The label as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TypeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TypeLabel {
    fn from(s: &str) -> Self {
        TypeLabel::new(s)
    }
}

impl Borrow<str> for TypeLabel {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Opaque identifier of a concept, equal to the string form of the raw
/// substrate vertex id.
///
/// Some substrates expose raw ids only after a flush, which is why every
/// vertex also carries its id as the `ID` property at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConceptId(String);

impl ConceptId {
    /// Wrap a raw id string.
    pub fn new(raw: impl Into<String>) -> Self {
        ConceptId(raw.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConceptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of an isolated keyspace (roughly one database).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyspaceName(String);

/// The reserved system keyspace. Commits against it never publish a
/// commit log.
pub const SYSTEM_KEYSPACE: &str = "system";

impl KeyspaceName {
    /// Wrap a keyspace name, lowercasing it for case-insensitive identity.
    pub fn new(name: impl Into<String>) -> Self {
        KeyspaceName(name.into().to_lowercase())
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the reserved system keyspace.
    pub fn is_system(&self) -> bool {
        self.0 == SYSTEM_KEYSPACE
    }
}

impl std::fmt::Display for KeyspaceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxKind {
    /// Read-only: every mutating call fails with `ReadOnly`
    Read,
    /// Interactive read-write
    Write,
    /// Bulk-loading read-write: longer ontology cache expiry, index lookups
    /// prefer the indexed vertex instead of raising on duplicates
    Batch,
}

impl TxKind {
    /// Whether mutations are rejected under this kind.
    pub fn is_read_only(&self) -> bool {
        matches!(self, TxKind::Read)
    }

    /// Whether this kind runs in bulk-loading mode.
    pub fn is_batch(&self) -> bool {
        matches!(self, TxKind::Batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_id_next_is_monotonic() {
        let id = TypeId::new(8);
        assert_eq!(id.next(), TypeId::new(9));
        assert!(id < id.next());
    }

    #[test]
    fn keyspace_name_is_case_insensitive() {
        assert_eq!(KeyspaceName::new("MyGraph"), KeyspaceName::new("mygraph"));
        assert!(KeyspaceName::new("SYSTEM").is_system());
        assert!(!KeyspaceName::new("genealogy").is_system());
    }

    #[test]
    fn tx_kind_flags() {
        assert!(TxKind::Read.is_read_only());
        assert!(!TxKind::Write.is_read_only());
        assert!(TxKind::Batch.is_batch());
        assert!(!TxKind::Batch.is_read_only());
    }
}

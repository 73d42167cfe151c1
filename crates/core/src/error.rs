//! Error types for the trellis engine
//!
//! `GraphError` is the unified error type for the whole engine. The set is
//! closed: callers can match exhaustively, and every kind maps to exactly one
//! recovery strategy (abort-and-retry, fix the input, or give up).
//!
//! None of these are caught inside the engine; they propagate to the caller,
//! which is expected to abort the transaction and decide. `Validation`
//! carries the full list of invariant failures found in one pass.

use crate::ids::{KeyspaceName, TypeLabel};
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, GraphError>;

/// The closed error set of the graph transaction engine.
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    /// Any operation on a committed, aborted or otherwise closed transaction.
    ///
    /// Carries the reason the transaction closed when one was recorded
    /// (committed, aborted, keyspace cleared).
    #[error("graph [{keyspace}] is closed: {reason}")]
    GraphClosed {
        /// The keyspace the transaction belonged to
        keyspace: KeyspaceName,
        /// Why the transaction is closed
        reason: String,
    },

    /// Mutation attempted under a READ transaction.
    #[error("transaction on [{keyspace}] is read-only")]
    ReadOnly {
        /// The keyspace the transaction belongs to
        keyspace: KeyspaceName,
    },

    /// Attempt to alter a meta-type.
    #[error("meta type [{label}] is immutable")]
    MetaImmutable {
        /// The reserved label that was targeted
        label: TypeLabel,
    },

    /// `put_type` found an existing type with a mismatched kind or datatype.
    #[error("type [{label}] already exists: {reason}")]
    TypeConflict {
        /// The contested label
        label: TypeLabel,
        /// What did not match
        reason: String,
    },

    /// A persisted datatype discriminator or value property is outside the
    /// supported set.
    #[error("invalid datatype [{found}], supported: {supported}")]
    InvalidDatatype {
        /// The offending discriminator or value description
        found: String,
        /// The supported datatype names
        supported: String,
    },

    /// A resource write would change the effective datatype of its type.
    #[error("resource type [{label}] holds {declared} values, cannot store {attempted}")]
    ImmutableValue {
        /// The resource type
        label: TypeLabel,
        /// The declared datatype
        declared: String,
        /// The datatype of the rejected value
        attempted: String,
    },

    /// The substrate returned multiple concepts where uniqueness is required.
    #[error("more than one concept with property [{property}] = [{value}]")]
    DuplicateConcept {
        /// The indexed property key
        property: String,
        /// The looked-up value
        value: String,
    },

    /// Aggregated invariant failures from validation. Never short-circuits:
    /// all failures found in one pass are listed.
    #[error("validation failed with {} error(s): {}", failures.len(), failures.join("; "))]
    Validation {
        /// Every failure found, human-readable
        failures: Vec<String>,
    },

    /// Any lower-level substrate failure: I/O, commit conflicts, corrupt
    /// vertices.
    #[error("substrate failure: {message}")]
    SubstrateFailure {
        /// What went wrong
        message: String,
        /// Whether the failure is a commit-time conflict and worth retrying
        conflict: bool,
    },
}

impl GraphError {
    /// Create a `GraphClosed` error.
    pub fn closed(keyspace: KeyspaceName, reason: impl Into<String>) -> Self {
        GraphError::GraphClosed {
            keyspace,
            reason: reason.into(),
        }
    }

    /// Create a `ReadOnly` error.
    pub fn read_only(keyspace: KeyspaceName) -> Self {
        GraphError::ReadOnly { keyspace }
    }

    /// Create a `MetaImmutable` error.
    pub fn meta_immutable(label: TypeLabel) -> Self {
        GraphError::MetaImmutable { label }
    }

    /// Create a `TypeConflict` error.
    pub fn type_conflict(label: TypeLabel, reason: impl Into<String>) -> Self {
        GraphError::TypeConflict {
            label,
            reason: reason.into(),
        }
    }

    /// Create an `InvalidDatatype` error.
    pub fn invalid_datatype(found: impl Into<String>, supported: impl Into<String>) -> Self {
        GraphError::InvalidDatatype {
            found: found.into(),
            supported: supported.into(),
        }
    }

    /// Create an `ImmutableValue` error.
    pub fn immutable_value(
        label: TypeLabel,
        declared: impl Into<String>,
        attempted: impl Into<String>,
    ) -> Self {
        GraphError::ImmutableValue {
            label,
            declared: declared.into(),
            attempted: attempted.into(),
        }
    }

    /// Create a `DuplicateConcept` error.
    pub fn duplicate_concept(property: impl Into<String>, value: impl Into<String>) -> Self {
        GraphError::DuplicateConcept {
            property: property.into(),
            value: value.into(),
        }
    }

    /// Create a `Validation` error from accumulated failures.
    pub fn validation(failures: Vec<String>) -> Self {
        GraphError::Validation { failures }
    }

    /// Create a non-conflict `SubstrateFailure`.
    pub fn substrate(message: impl Into<String>) -> Self {
        GraphError::SubstrateFailure {
            message: message.into(),
            conflict: false,
        }
    }

    /// Create a conflict `SubstrateFailure` (commit-time race, retryable).
    pub fn substrate_conflict(message: impl Into<String>) -> Self {
        GraphError::SubstrateFailure {
            message: message.into(),
            conflict: true,
        }
    }

    /// A corrupt-graph failure: a vertex or edge that does not conform to
    /// the schema vocabulary.
    pub fn corrupt(message: impl Into<String>) -> Self {
        GraphError::SubstrateFailure {
            message: format!("corrupt graph: {}", message.into()),
            conflict: false,
        }
    }

    /// Whether the operation may succeed on retry against fresh state.
    ///
    /// Only commit-time substrate conflicts qualify; everything else needs
    /// an input change or indicates a bug.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GraphError::SubstrateFailure { conflict: true, .. }
        )
    }

    /// Whether this is an aggregated validation failure.
    pub fn is_validation(&self) -> bool {
        matches!(self, GraphError::Validation { .. })
    }

    /// The individual validation failures, if this is a `Validation` error.
    pub fn validation_failures(&self) -> Option<&[String]> {
        match self {
            GraphError::Validation { failures } => Some(failures),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_keyspace_and_reason() {
        let err = GraphError::closed(KeyspaceName::new("genealogy"), "transaction committed");
        let msg = err.to_string();
        assert!(msg.contains("genealogy"));
        assert!(msg.contains("transaction committed"));
    }

    #[test]
    fn validation_lists_every_failure() {
        let err = GraphError::validation(vec![
            "relation [5] has no role players".to_string(),
            "role [parent] is not declared".to_string(),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("2 error(s)"));
        assert!(msg.contains("no role players"));
        assert!(msg.contains("not declared"));
        assert_eq!(err.validation_failures().map(<[String]>::len), Some(2));
    }

    #[test]
    fn only_substrate_conflicts_are_retryable() {
        assert!(GraphError::substrate_conflict("label taken").is_retryable());
        assert!(!GraphError::substrate("io error").is_retryable());
        assert!(!GraphError::read_only(KeyspaceName::new("k")).is_retryable());
        assert!(!GraphError::validation(vec![]).is_retryable());
    }

    #[test]
    fn corrupt_is_a_substrate_failure() {
        let err = GraphError::corrupt("missing base kind");
        assert!(matches!(err, GraphError::SubstrateFailure { .. }));
        assert!(err.to_string().contains("corrupt graph"));
    }
}

//! Graph transaction engine for trellis
//!
//! This crate enforces the typed knowledge model on top of the property-graph
//! substrate:
//! - `Keyspace`: an isolated namespace of types and instances; bootstraps the
//!   meta ontology and hands out transactions
//! - `Transaction`: the public mutation surface — put/get typed concepts,
//!   create instances and relations, open/commit/abort
//! - `OntologyCache`: process-wide, write-expiring cache of type snapshots
//! - `TransactionLog`: per-transaction scratch state and commit-log source
//! - `Validator`: post-mutation invariant checker, total over the touched set
//! - `Reconciler`: post-commit merging of duplicate castings and resources
//!
//! Castings and shards are internal concepts; they never appear on the
//! public surface.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod commit_log;
pub mod concept;
pub mod database;
pub mod fingerprint;
pub mod ontology;
pub mod reconcile;
pub mod transaction;
pub mod txlog;
pub mod validator;

pub use commit_log::{CommitLog, CommitLogSink, DuplicateCandidates, InstanceCountDelta, NullSink, RecordingSink};
pub use concept::{Concept, InstanceConcept, TypeConcept};
pub use database::Keyspace;
pub use fingerprint::{role_map, RoleMap};
pub use ontology::OntologyCache;
pub use reconcile::Reconciler;
pub use transaction::Transaction;

pub use trellis_core::{
    BaseKind, ConceptId, DataValue, Datatype, GraphError, KeyspaceName, PropertyValue, Result,
    TrellisConfig, TxKind, TypeId, TypeLabel,
};

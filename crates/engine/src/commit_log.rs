//! Commit-log payload and outbound sink
//!
//! After a successful commit on a non-system keyspace, the engine emits a
//! commit log listing instance-count deltas and duplicate-candidate
//! fingerprints for castings and resources. The payload is a JSON object
//! with the three top-level keys `instance-counts`, `castings` and
//! `resources`; a post-processing dispatcher consumes it asynchronously.
//!
//! Submission is modelled as an outbound sink trait. The in-memory engine
//! wires a no-op sink; tests use a recording sink.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use trellis_core::{ConceptId, GraphError, KeyspaceName, Result, TypeLabel};

/// One instance-count delta accumulated by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceCountDelta {
    /// The affected type
    #[serde(rename = "type-label")]
    pub type_label: TypeLabel,
    /// Net change of the type's instance count
    pub delta: i64,
}

/// Duplicate candidates sharing one index fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateCandidates {
    /// The shared fingerprint
    pub index: String,
    /// Concept ids of the vertices touched under this fingerprint
    #[serde(rename = "concept-ids")]
    pub concept_ids: Vec<ConceptId>,
}

/// The commit-log payload emitted after a successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CommitLog {
    /// Net instance-count change per type
    #[serde(rename = "instance-counts")]
    pub instance_counts: Vec<InstanceCountDelta>,
    /// Casting duplicate candidates by fingerprint
    pub castings: Vec<DuplicateCandidates>,
    /// Resource duplicate candidates by fingerprint
    pub resources: Vec<DuplicateCandidates>,
}

impl CommitLog {
    /// Whether the payload carries nothing worth submitting.
    pub fn is_empty(&self) -> bool {
        self.instance_counts.is_empty() && self.castings.is_empty() && self.resources.is_empty()
    }

    /// Serialize to the wire format.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| GraphError::substrate(format!("commit log serialization failed: {}", e)))
    }

    /// Parse a payload from the wire format.
    pub fn from_json(raw: &str) -> Result<CommitLog> {
        serde_json::from_str(raw)
            .map_err(|e| GraphError::substrate(format!("commit log parse failed: {}", e)))
    }

    /// Merge another payload into this one. Used when draining several
    /// transactions' logs into one reconciliation pass.
    pub fn merge(&mut self, other: CommitLog) {
        for delta in other.instance_counts {
            match self
                .instance_counts
                .iter_mut()
                .find(|d| d.type_label == delta.type_label)
            {
                Some(existing) => existing.delta += delta.delta,
                None => self.instance_counts.push(delta),
            }
        }
        for candidate in other.castings {
            merge_candidates(&mut self.castings, candidate);
        }
        for candidate in other.resources {
            merge_candidates(&mut self.resources, candidate);
        }
    }
}

fn merge_candidates(target: &mut Vec<DuplicateCandidates>, candidate: DuplicateCandidates) {
    match target.iter_mut().find(|c| c.index == candidate.index) {
        Some(existing) => {
            for id in candidate.concept_ids {
                if !existing.concept_ids.contains(&id) {
                    existing.concept_ids.push(id);
                }
            }
        }
        None => target.push(candidate),
    }
}

/// Outbound destination for commit logs.
pub trait CommitLogSink: Send + Sync + std::fmt::Debug {
    /// Deliver one payload for the given keyspace.
    fn submit(&self, keyspace: &KeyspaceName, log: &CommitLog) -> Result<()>;
}

/// Sink that drops every payload. Used when `engine.url` is `IN_MEMORY`.
#[derive(Debug, Default)]
pub struct NullSink;

impl CommitLogSink for NullSink {
    fn submit(&self, _keyspace: &KeyspaceName, _log: &CommitLog) -> Result<()> {
        Ok(())
    }
}

/// Sink that records every payload in memory. Used by tests and by local
/// reconciliation pipelines.
#[derive(Debug, Default)]
pub struct RecordingSink {
    logs: Mutex<Vec<(KeyspaceName, CommitLog)>>,
}

impl RecordingSink {
    /// Create an empty recording sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain all recorded payloads.
    pub fn take(&self) -> Vec<(KeyspaceName, CommitLog)> {
        std::mem::take(&mut *self.logs.lock())
    }

    /// Number of recorded payloads.
    pub fn len(&self) -> usize {
        self.logs.lock().len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.logs.lock().is_empty()
    }
}

impl CommitLogSink for RecordingSink {
    fn submit(&self, keyspace: &KeyspaceName, log: &CommitLog) -> Result<()> {
        self.logs.lock().push((keyspace.clone(), log.clone()));
        Ok(())
    }
}

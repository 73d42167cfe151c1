//! In-memory property graph
//!
//! The committed state shared by every session: vertex and edge tables,
//! adjacency lists, and a property index supporting iteration by
//! `(key, value)`. All access goes through `Substrate`, which hands out
//! buffered `GraphSession`s; nothing mutates the committed state except a
//! session commit holding the write lock.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use trellis_core::PropertyValue;

use crate::session::GraphSession;

/// Raw id of a substrate vertex. Process-unique, allocated at creation time
/// so new vertices can be referenced before the session flushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId(u64);

impl VertexId {
    pub(crate) fn new(raw: u64) -> Self {
        VertexId(raw)
    }

    /// The raw integer id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Parse a vertex id from its string form, as stored under the `ID`
    /// property.
    pub fn parse(raw: &str) -> Option<VertexId> {
        raw.parse().ok().map(VertexId)
    }
}

impl std::fmt::Display for VertexId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raw id of a substrate edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(u64);

impl EdgeId {
    pub(crate) fn new(raw: u64) -> Self {
        EdgeId(raw)
    }

    /// The raw integer id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A vertex with its label and properties.
#[derive(Debug, Clone)]
pub struct VertexRecord {
    /// Raw id
    pub id: VertexId,
    /// Vertex label (the base kind)
    pub label: String,
    /// Property map
    pub properties: FxHashMap<String, PropertyValue>,
}

/// A directed, labelled edge with its properties.
#[derive(Debug, Clone)]
pub struct EdgeRecord {
    /// Raw id
    pub id: EdgeId,
    /// Source vertex
    pub from: VertexId,
    /// Target vertex
    pub to: VertexId,
    /// Edge label
    pub label: String,
    /// Property map
    pub properties: FxHashMap<String, PropertyValue>,
}

/// The committed graph state.
#[derive(Debug, Default)]
pub(crate) struct GraphStore {
    pub(crate) vertices: FxHashMap<VertexId, VertexRecord>,
    pub(crate) edges: FxHashMap<EdgeId, EdgeRecord>,
    pub(crate) out_edges: FxHashMap<VertexId, Vec<EdgeId>>,
    pub(crate) in_edges: FxHashMap<VertexId, Vec<EdgeId>>,
    // (key, value) -> vertex ids; BTreeSet keeps lookups deterministic
    pub(crate) vertex_index: HashMap<(String, PropertyValue), BTreeSet<VertexId>>,
}

impl GraphStore {
    pub(crate) fn insert_vertex(&mut self, record: VertexRecord) {
        for (key, value) in &record.properties {
            self.vertex_index
                .entry((key.clone(), value.clone()))
                .or_default()
                .insert(record.id);
        }
        self.vertices.insert(record.id, record);
    }

    pub(crate) fn insert_edge(&mut self, record: EdgeRecord) {
        self.out_edges.entry(record.from).or_default().push(record.id);
        self.in_edges.entry(record.to).or_default().push(record.id);
        self.edges.insert(record.id, record);
    }

    pub(crate) fn set_vertex_property(
        &mut self,
        id: VertexId,
        key: String,
        value: PropertyValue,
    ) {
        let Some(vertex) = self.vertices.get_mut(&id) else {
            return; // vertex deleted by a later writer; last-writer wins
        };
        if let Some(old) = vertex.properties.insert(key.clone(), value.clone()) {
            if let Some(ids) = self.vertex_index.get_mut(&(key.clone(), old)) {
                ids.remove(&id);
            }
        }
        self.vertex_index.entry((key, value)).or_default().insert(id);
    }

    pub(crate) fn remove_vertex(&mut self, id: VertexId) {
        let Some(vertex) = self.vertices.remove(&id) else {
            return;
        };
        for (key, value) in vertex.properties {
            if let Some(ids) = self.vertex_index.get_mut(&(key, value)) {
                ids.remove(&id);
            }
        }
        let incident: Vec<EdgeId> = self
            .out_edges
            .remove(&id)
            .unwrap_or_default()
            .into_iter()
            .chain(self.in_edges.remove(&id).unwrap_or_default())
            .collect();
        for edge_id in incident {
            self.remove_edge(edge_id);
        }
    }

    pub(crate) fn remove_edge(&mut self, id: EdgeId) {
        let Some(edge) = self.edges.remove(&id) else {
            return;
        };
        if let Some(out) = self.out_edges.get_mut(&edge.from) {
            out.retain(|e| *e != id);
        }
        if let Some(inc) = self.in_edges.get_mut(&edge.to) {
            inc.retain(|e| *e != id);
        }
    }

    pub(crate) fn vertices_with(&self, key: &str, value: &PropertyValue) -> Vec<VertexId> {
        self.vertex_index
            .get(&(key.to_string(), value.clone()))
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// The shared in-memory substrate.
///
/// Cheap to clone; all clones observe the same committed state. Vertex and
/// edge ids are allocated eagerly from shared counters so a session can
/// reference its own uncommitted elements by raw id.
#[derive(Debug, Clone, Default)]
pub struct Substrate {
    pub(crate) store: Arc<RwLock<GraphStore>>,
    next_vertex: Arc<AtomicU64>,
    next_edge: Arc<AtomicU64>,
}

impl Substrate {
    /// Create an empty substrate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a buffered session against this substrate.
    pub fn session(&self) -> GraphSession {
        GraphSession::new(self.clone())
    }

    /// Number of committed vertices.
    pub fn vertex_count(&self) -> usize {
        self.store.read().vertices.len()
    }

    /// Number of committed edges.
    pub fn edge_count(&self) -> usize {
        self.store.read().edges.len()
    }

    pub(crate) fn allocate_vertex_id(&self) -> VertexId {
        VertexId::new(self.next_vertex.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub(crate) fn allocate_edge_id(&self) -> EdgeId {
        EdgeId::new(self.next_edge.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

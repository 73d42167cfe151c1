//! Buffered substrate sessions
//!
//! A `GraphSession` is the substrate's unit of transactionality. All
//! mutations are buffered locally and applied to the committed store in one
//! atomic step under the write lock. Within the session, reads observe the
//! session's own prior writes; across sessions, visibility is at commit
//! boundaries only, with last-writer-wins on property values.
//!
//! Commit guards provide the substrate's conflict detection: a session may
//! record expectations (a property still holds the value it read, a property
//! value is still unclaimed) that are validated at commit time before any
//! buffered write is applied. A failed guard aborts the commit with a
//! conflict error and leaves the committed state untouched.

use rustc_hash::{FxHashMap, FxHashSet};

use trellis_core::{GraphError, PropertyValue, Result};

use crate::graph::{EdgeId, EdgeRecord, GraphStore, Substrate, VertexId, VertexRecord};

/// Lifecycle status of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// Executing; reads and writes allowed
    Active,
    /// Commit applied
    Committed,
    /// Buffered work discarded
    RolledBack,
}

/// An expectation validated at commit time, before buffered writes apply.
#[derive(Debug, Clone)]
pub enum CommitGuard {
    /// The committed value of `(vertex, key)` must still equal `expected`
    /// (`None` = the property must still be absent).
    PropertyEquals {
        /// Guarded vertex
        vertex: VertexId,
        /// Guarded property key
        key: String,
        /// Value observed when the guard was taken
        expected: Option<PropertyValue>,
    },
    /// No committed vertex may carry `(key, value)` yet. Used to detect
    /// concurrent first-creation of uniquely-labelled vertices.
    UniqueProperty {
        /// Guarded property key
        key: String,
        /// Value that must be unclaimed
        value: PropertyValue,
    },
}

/// A buffered transaction against the shared substrate.
///
/// Dropping an active session rolls it back; only an explicit `commit`
/// publishes buffered work.
#[derive(Debug)]
pub struct GraphSession {
    substrate: Substrate,
    status: SessionStatus,
    added_vertices: FxHashMap<VertexId, VertexRecord>,
    added_edges: FxHashMap<EdgeId, EdgeRecord>,
    vertex_writes: FxHashMap<(VertexId, String), PropertyValue>,
    edge_writes: FxHashMap<(EdgeId, String), PropertyValue>,
    removed_vertices: FxHashSet<VertexId>,
    removed_edges: FxHashSet<EdgeId>,
    guards: Vec<CommitGuard>,
    clear_all: bool,
}

impl GraphSession {
    pub(crate) fn new(substrate: Substrate) -> Self {
        GraphSession {
            substrate,
            status: SessionStatus::Active,
            added_vertices: FxHashMap::default(),
            added_edges: FxHashMap::default(),
            vertex_writes: FxHashMap::default(),
            edge_writes: FxHashMap::default(),
            removed_vertices: FxHashSet::default(),
            removed_edges: FxHashSet::default(),
            guards: Vec::new(),
            clear_all: false,
        }
    }

    /// Current lifecycle status.
    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    fn ensure_active(&self) -> Result<()> {
        match self.status {
            SessionStatus::Active => Ok(()),
            _ => Err(GraphError::substrate("session is not active")),
        }
    }

    // =========================================================================
    // Writes (buffered)
    // =========================================================================

    /// Add a vertex with the given label. The id is allocated immediately.
    pub fn add_vertex(&mut self, label: &str) -> VertexId {
        let id = self.substrate.allocate_vertex_id();
        self.added_vertices.insert(
            id,
            VertexRecord {
                id,
                label: label.to_string(),
                properties: FxHashMap::default(),
            },
        );
        id
    }

    /// Add an edge between two visible vertices.
    pub fn add_edge(&mut self, from: VertexId, to: VertexId, label: &str) -> Result<EdgeId> {
        self.ensure_active()?;
        if !self.vertex_exists(from) || !self.vertex_exists(to) {
            return Err(GraphError::substrate(format!(
                "edge endpoints must exist: {} -> {}",
                from, to
            )));
        }
        let id = self.substrate.allocate_edge_id();
        self.added_edges.insert(
            id,
            EdgeRecord {
                id,
                from,
                to,
                label: label.to_string(),
                properties: FxHashMap::default(),
            },
        );
        Ok(id)
    }

    /// Set a property on a visible vertex.
    pub fn set_vertex_property(
        &mut self,
        vertex: VertexId,
        key: &str,
        value: PropertyValue,
    ) -> Result<()> {
        self.ensure_active()?;
        if let Some(record) = self.added_vertices.get_mut(&vertex) {
            record.properties.insert(key.to_string(), value);
            return Ok(());
        }
        if !self.vertex_exists(vertex) {
            return Err(GraphError::substrate(format!("no such vertex: {}", vertex)));
        }
        self.vertex_writes.insert((vertex, key.to_string()), value);
        Ok(())
    }

    /// Set a property on a visible edge.
    pub fn set_edge_property(
        &mut self,
        edge: EdgeId,
        key: &str,
        value: PropertyValue,
    ) -> Result<()> {
        self.ensure_active()?;
        if let Some(record) = self.added_edges.get_mut(&edge) {
            record.properties.insert(key.to_string(), value);
            return Ok(());
        }
        if self.edge(edge).is_none() {
            return Err(GraphError::substrate(format!("no such edge: {}", edge)));
        }
        self.edge_writes.insert((edge, key.to_string()), value);
        Ok(())
    }

    /// Remove a vertex and its incident edges from the session's view.
    pub fn remove_vertex(&mut self, vertex: VertexId) -> Result<()> {
        self.ensure_active()?;
        for edge in self.incident_edges(vertex) {
            self.remove_edge(edge.id)?;
        }
        if self.added_vertices.remove(&vertex).is_none() {
            self.removed_vertices.insert(vertex);
            self.vertex_writes.retain(|(v, _), _| *v != vertex);
        }
        Ok(())
    }

    /// Remove an edge from the session's view.
    pub fn remove_edge(&mut self, edge: EdgeId) -> Result<()> {
        self.ensure_active()?;
        if self.added_edges.remove(&edge).is_none() {
            self.removed_edges.insert(edge);
            self.edge_writes.retain(|(e, _), _| *e != edge);
        }
        Ok(())
    }

    /// Drop every vertex and edge at commit time.
    pub fn clear(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.clear_all = true;
        self.added_vertices.clear();
        self.added_edges.clear();
        self.vertex_writes.clear();
        self.edge_writes.clear();
        self.removed_vertices.clear();
        self.removed_edges.clear();
        Ok(())
    }

    /// Record a commit guard.
    pub fn guard(&mut self, guard: CommitGuard) {
        self.guards.push(guard);
    }

    // =========================================================================
    // Reads (session view)
    // =========================================================================

    /// Whether a vertex is visible to this session.
    pub fn vertex_exists(&self, vertex: VertexId) -> bool {
        if self.added_vertices.contains_key(&vertex) {
            return true;
        }
        if self.removed_vertices.contains(&vertex) {
            return false;
        }
        self.substrate.store.read().vertices.contains_key(&vertex)
    }

    /// The label of a visible vertex.
    pub fn vertex_label(&self, vertex: VertexId) -> Option<String> {
        if let Some(record) = self.added_vertices.get(&vertex) {
            return Some(record.label.clone());
        }
        if self.removed_vertices.contains(&vertex) {
            return None;
        }
        self.substrate
            .store
            .read()
            .vertices
            .get(&vertex)
            .map(|record| record.label.clone())
    }

    /// A property of a visible vertex, observing the session's own writes.
    pub fn vertex_property(&self, vertex: VertexId, key: &str) -> Option<PropertyValue> {
        if let Some(record) = self.added_vertices.get(&vertex) {
            return record.properties.get(key).cloned();
        }
        if self.removed_vertices.contains(&vertex) {
            return None;
        }
        if let Some(value) = self.vertex_writes.get(&(vertex, key.to_string())) {
            return Some(value.clone());
        }
        self.substrate
            .store
            .read()
            .vertices
            .get(&vertex)
            .and_then(|record| record.properties.get(key).cloned())
    }

    /// A visible edge with the session's property overlays applied.
    pub fn edge(&self, edge: EdgeId) -> Option<EdgeRecord> {
        if let Some(record) = self.added_edges.get(&edge) {
            return Some(record.clone());
        }
        if self.removed_edges.contains(&edge) {
            return None;
        }
        let store = self.substrate.store.read();
        let record = store.edges.get(&edge)?;
        if self.removed_vertices.contains(&record.from)
            || self.removed_vertices.contains(&record.to)
        {
            return None;
        }
        Some(self.overlay_edge(record.clone()))
    }

    /// Outgoing edges of a vertex, optionally filtered by label.
    pub fn out_edges(&self, vertex: VertexId, label: Option<&str>) -> Vec<EdgeRecord> {
        self.adjacent_edges(vertex, label, true)
    }

    /// Incoming edges of a vertex, optionally filtered by label.
    pub fn in_edges(&self, vertex: VertexId, label: Option<&str>) -> Vec<EdgeRecord> {
        self.adjacent_edges(vertex, label, false)
    }

    /// Visible vertices carrying the given label, in deterministic order.
    ///
    /// This is a scan, not an index lookup; it backs enumeration operations
    /// only.
    pub fn vertices_with_label(&self, label: &str) -> Vec<VertexId> {
        let mut result: Vec<VertexId> = {
            let store = self.substrate.store.read();
            store
                .vertices
                .values()
                .filter(|record| record.label == label)
                .filter(|record| !self.removed_vertices.contains(&record.id))
                .map(|record| record.id)
                .collect()
        };
        result.extend(
            self.added_vertices
                .values()
                .filter(|record| record.label == label)
                .map(|record| record.id),
        );
        result.sort();
        result
    }

    /// Visible vertices carrying `(key, value)`, observing the session's own
    /// writes. Order is deterministic (ascending raw id).
    pub fn vertices_by_property(&self, key: &str, value: &PropertyValue) -> Vec<VertexId> {
        let mut result: Vec<VertexId> = Vec::new();
        {
            let store = self.substrate.store.read();
            for id in store.vertices_with(key, value) {
                if self.removed_vertices.contains(&id) {
                    continue;
                }
                // the session may have overwritten the indexed value
                if let Some(overlay) = self.vertex_writes.get(&(id, key.to_string())) {
                    if overlay != value {
                        continue;
                    }
                }
                result.push(id);
            }
        }
        for ((id, written_key), written_value) in &self.vertex_writes {
            if written_key == key && written_value == value && !result.contains(id) {
                result.push(*id);
            }
        }
        for record in self.added_vertices.values() {
            if record.properties.get(key) == Some(value) {
                result.push(record.id);
            }
        }
        result.sort();
        result.dedup();
        result
    }

    fn adjacent_edges(
        &self,
        vertex: VertexId,
        label: Option<&str>,
        outgoing: bool,
    ) -> Vec<EdgeRecord> {
        let mut result: Vec<EdgeRecord> = Vec::new();
        if !self.removed_vertices.contains(&vertex) {
            let store = self.substrate.store.read();
            let index = if outgoing { &store.out_edges } else { &store.in_edges };
            for edge_id in index.get(&vertex).into_iter().flatten() {
                if self.removed_edges.contains(edge_id) {
                    continue;
                }
                let Some(record) = store.edges.get(edge_id) else {
                    continue;
                };
                if self.removed_vertices.contains(&record.from)
                    || self.removed_vertices.contains(&record.to)
                {
                    continue;
                }
                if label.map(|l| l == record.label).unwrap_or(true) {
                    result.push(self.overlay_edge(record.clone()));
                }
            }
        }
        for record in self.added_edges.values() {
            let endpoint = if outgoing { record.from } else { record.to };
            if endpoint == vertex && label.map(|l| l == record.label).unwrap_or(true) {
                result.push(record.clone());
            }
        }
        result.sort_by_key(|record| record.id);
        result
    }

    fn incident_edges(&self, vertex: VertexId) -> Vec<EdgeRecord> {
        let mut edges = self.out_edges(vertex, None);
        edges.extend(self.in_edges(vertex, None));
        edges
    }

    fn overlay_edge(&self, mut record: EdgeRecord) -> EdgeRecord {
        for ((edge_id, key), value) in &self.edge_writes {
            if *edge_id == record.id {
                record.properties.insert(key.clone(), value.clone());
            }
        }
        record
    }

    // =========================================================================
    // Commit / rollback
    // =========================================================================

    /// Validate guards and atomically apply buffered work.
    ///
    /// # Errors
    ///
    /// A failed guard returns a conflict `SubstrateFailure` and leaves both
    /// the committed state and the session buffers untouched, so the caller
    /// can roll back.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_active()?;
        let mut store = self.substrate.store.write();

        self.check_guards(&store)?;

        if self.clear_all {
            *store = GraphStore::default();
        }
        for edge_id in &self.removed_edges {
            store.remove_edge(*edge_id);
        }
        for vertex_id in &self.removed_vertices {
            store.remove_vertex(*vertex_id);
        }
        for ((vertex, key), value) in self.vertex_writes.drain() {
            store.set_vertex_property(vertex, key, value);
        }
        for (_, record) in self.added_vertices.drain() {
            store.insert_vertex(record);
        }
        for (_, record) in self.added_edges.drain() {
            // endpoint may have been removed by a concurrent session
            if store.vertices.contains_key(&record.from)
                && store.vertices.contains_key(&record.to)
            {
                store.insert_edge(record);
            }
        }
        for ((edge, key), value) in self.edge_writes.drain() {
            if let Some(record) = store.edges.get_mut(&edge) {
                record.properties.insert(key, value);
            }
        }

        self.status = SessionStatus::Committed;
        Ok(())
    }

    fn check_guards(&self, store: &GraphStore) -> Result<()> {
        for guard in &self.guards {
            match guard {
                CommitGuard::PropertyEquals {
                    vertex,
                    key,
                    expected,
                } => {
                    let current = store
                        .vertices
                        .get(vertex)
                        .and_then(|record| record.properties.get(key).cloned());
                    if &current != expected {
                        return Err(GraphError::substrate_conflict(format!(
                            "property [{}] on vertex {} changed concurrently",
                            key, vertex
                        )));
                    }
                }
                CommitGuard::UniqueProperty { key, value } => {
                    if !store.vertices_with(key, value).is_empty() {
                        return Err(GraphError::substrate_conflict(format!(
                            "property [{}] = [{}] is not unique",
                            key, value
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Discard all buffered work.
    pub fn rollback(&mut self) {
        if self.status == SessionStatus::Active {
            self.added_vertices.clear();
            self.added_edges.clear();
            self.vertex_writes.clear();
            self.edge_writes.clear();
            self.removed_vertices.clear();
            self.removed_edges.clear();
            self.guards.clear();
            self.clear_all = false;
            self.status = SessionStatus::RolledBack;
        }
    }
}

impl Drop for GraphSession {
    fn drop(&mut self) {
        // scoped acquire: an unreleased session never publishes
        self.rollback();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn substrate() -> Substrate {
        Substrate::new()
    }

    #[test]
    fn reads_observe_own_writes_before_commit() {
        let sub = substrate();
        let mut session = sub.session();
        let v = session.add_vertex("ENTITY");
        session
            .set_vertex_property(v, "K", PropertyValue::from("x"))
            .unwrap();
        assert_eq!(
            session.vertex_property(v, "K"),
            Some(PropertyValue::from("x"))
        );
        assert_eq!(sub.vertex_count(), 0);

        session.commit().unwrap();
        assert_eq!(sub.vertex_count(), 1);
    }

    #[test]
    fn rollback_discards_buffered_work() {
        let sub = substrate();
        let mut session = sub.session();
        session.add_vertex("ENTITY");
        session.rollback();
        assert_eq!(sub.vertex_count(), 0);
        assert!(session.commit().is_err());
    }

    #[test]
    fn drop_without_commit_rolls_back() {
        let sub = substrate();
        {
            let mut session = sub.session();
            session.add_vertex("ENTITY");
        }
        assert_eq!(sub.vertex_count(), 0);
    }

    #[test]
    fn vertices_by_property_merges_committed_and_buffered() {
        let sub = substrate();
        let mut first = sub.session();
        let a = first.add_vertex("ENTITY");
        first
            .set_vertex_property(a, "K", PropertyValue::from("x"))
            .unwrap();
        first.commit().unwrap();

        let mut second = sub.session();
        let b = second.add_vertex("ENTITY");
        second
            .set_vertex_property(b, "K", PropertyValue::from("x"))
            .unwrap();
        let found = second.vertices_by_property("K", &PropertyValue::from("x"));
        assert_eq!(found, vec![a, b]);

        // overwriting the committed value hides it from the lookup
        second
            .set_vertex_property(a, "K", PropertyValue::from("y"))
            .unwrap();
        let found = second.vertices_by_property("K", &PropertyValue::from("x"));
        assert_eq!(found, vec![b]);
    }

    #[test]
    fn unique_property_guard_detects_races() {
        let sub = substrate();

        let mut winner = sub.session();
        let v = winner.add_vertex("ENTITY_TYPE");
        winner
            .set_vertex_property(v, "TYPE_LABEL", PropertyValue::from("person"))
            .unwrap();
        winner.guard(CommitGuard::UniqueProperty {
            key: "TYPE_LABEL".to_string(),
            value: PropertyValue::from("person"),
        });

        let mut loser = sub.session();
        let w = loser.add_vertex("ENTITY_TYPE");
        loser
            .set_vertex_property(w, "TYPE_LABEL", PropertyValue::from("person"))
            .unwrap();
        loser.guard(CommitGuard::UniqueProperty {
            key: "TYPE_LABEL".to_string(),
            value: PropertyValue::from("person"),
        });

        winner.commit().unwrap();
        let err = loser.commit().unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(sub.vertex_count(), 1);
    }

    #[test]
    fn property_equals_guard_detects_counter_races() {
        let sub = substrate();
        let mut setup = sub.session();
        let meta = setup.add_vertex("TYPE");
        setup
            .set_vertex_property(meta, "INSTANCE_COUNT", PropertyValue::from(8i64))
            .unwrap();
        setup.commit().unwrap();

        let mut first = sub.session();
        first.guard(CommitGuard::PropertyEquals {
            vertex: meta,
            key: "INSTANCE_COUNT".to_string(),
            expected: Some(PropertyValue::from(8i64)),
        });
        first
            .set_vertex_property(meta, "INSTANCE_COUNT", PropertyValue::from(9i64))
            .unwrap();

        let mut second = sub.session();
        second.guard(CommitGuard::PropertyEquals {
            vertex: meta,
            key: "INSTANCE_COUNT".to_string(),
            expected: Some(PropertyValue::from(8i64)),
        });
        second
            .set_vertex_property(meta, "INSTANCE_COUNT", PropertyValue::from(9i64))
            .unwrap();

        first.commit().unwrap();
        assert!(second.commit().unwrap_err().is_retryable());
    }

    #[test]
    fn removing_a_vertex_hides_its_edges() {
        let sub = substrate();
        let mut setup = sub.session();
        let a = setup.add_vertex("ENTITY");
        let b = setup.add_vertex("ENTITY");
        setup.add_edge(a, b, "ISA").unwrap();
        setup.commit().unwrap();

        let mut session = sub.session();
        session.remove_vertex(a).unwrap();
        assert!(session.out_edges(a, None).is_empty());
        assert!(session.in_edges(b, Some("ISA")).is_empty());
        session.commit().unwrap();
        assert_eq!(sub.edge_count(), 0);
        assert_eq!(sub.vertex_count(), 1);
    }

    #[test]
    fn clear_wipes_the_store() {
        let sub = substrate();
        let mut setup = sub.session();
        let a = setup.add_vertex("ENTITY");
        let b = setup.add_vertex("ENTITY");
        setup.add_edge(a, b, "ISA").unwrap();
        setup.commit().unwrap();

        let mut session = sub.session();
        session.clear().unwrap();
        session.commit().unwrap();
        assert_eq!(sub.vertex_count(), 0);
        assert_eq!(sub.edge_count(), 0);
    }
}

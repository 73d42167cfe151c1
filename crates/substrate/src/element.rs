//! Element store adapter
//!
//! The thin facade the engine talks to. It speaks the schema vocabulary
//! (base kinds, edge labels, reserved property names) instead of raw
//! strings, stamps every created vertex with its raw id under the `ID`
//! property, and rejects mutating calls when the owning transaction is
//! read-only.

use trellis_core::{
    BaseKind, ConceptId, EdgeLabel, EdgeProp, GraphError, KeyspaceName, PropertyValue, Result,
    VertexProp,
};

use crate::graph::{EdgeId, EdgeRecord, VertexId};
use crate::session::{CommitGuard, GraphSession};

/// Read-only-aware facade over a substrate session.
#[derive(Debug)]
pub struct ElementStore {
    session: GraphSession,
    keyspace: KeyspaceName,
    read_only: bool,
}

impl ElementStore {
    /// Wrap a session for the given keyspace.
    pub fn new(session: GraphSession, keyspace: KeyspaceName, read_only: bool) -> Self {
        ElementStore {
            session,
            keyspace,
            read_only,
        }
    }

    /// The keyspace this store belongs to.
    pub fn keyspace(&self) -> &KeyspaceName {
        &self.keyspace
    }

    /// Whether mutating calls are rejected.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn check_mutation(&self) -> Result<()> {
        if self.read_only {
            return Err(GraphError::read_only(self.keyspace.clone()));
        }
        Ok(())
    }

    // =========================================================================
    // Construction
    // =========================================================================

    /// Add a vertex of the given base kind.
    ///
    /// The vertex immediately receives a string `ID` property equal to its
    /// raw substrate id; some substrates expose ids only post-flush, and the
    /// concept id must be stable before that.
    pub fn add_vertex(&mut self, kind: BaseKind) -> Result<VertexId> {
        self.check_mutation()?;
        let id = self.session.add_vertex(kind.as_str());
        self.session.set_vertex_property(
            id,
            VertexProp::Id.as_str(),
            PropertyValue::Str(id.to_string()),
        )?;
        Ok(id)
    }

    /// Add a labelled edge.
    pub fn add_edge(&mut self, from: VertexId, to: VertexId, label: EdgeLabel) -> Result<EdgeId> {
        self.check_mutation()?;
        self.session.add_edge(from, to, label.as_str())
    }

    /// Set a reserved property on a vertex.
    pub fn set_property(
        &mut self,
        vertex: VertexId,
        prop: VertexProp,
        value: PropertyValue,
    ) -> Result<()> {
        self.check_mutation()?;
        self.session
            .set_vertex_property(vertex, prop.as_str(), value)
    }

    /// Set a reserved property on an edge.
    pub fn set_edge_property(
        &mut self,
        edge: EdgeId,
        prop: EdgeProp,
        value: PropertyValue,
    ) -> Result<()> {
        self.check_mutation()?;
        self.session.set_edge_property(edge, prop.as_str(), value)
    }

    /// Remove a vertex and its incident edges.
    pub fn remove_vertex(&mut self, vertex: VertexId) -> Result<()> {
        self.check_mutation()?;
        self.session.remove_vertex(vertex)
    }

    /// Remove an edge.
    pub fn remove_edge(&mut self, edge: EdgeId) -> Result<()> {
        self.check_mutation()?;
        self.session.remove_edge(edge)
    }

    /// Drop every vertex and edge at commit time.
    pub fn clear(&mut self) -> Result<()> {
        self.check_mutation()?;
        self.session.clear()
    }

    /// Record a commit guard on the underlying session.
    pub fn guard(&mut self, guard: CommitGuard) -> Result<()> {
        self.check_mutation()?;
        self.session.guard(guard);
        Ok(())
    }

    // =========================================================================
    // Traversal
    // =========================================================================

    /// The base kind of a vertex.
    ///
    /// # Errors
    ///
    /// A missing vertex or an unknown label is a corrupt-graph failure.
    pub fn base_kind(&self, vertex: VertexId) -> Result<BaseKind> {
        let label = self
            .session
            .vertex_label(vertex)
            .ok_or_else(|| GraphError::corrupt(format!("no such vertex: {}", vertex)))?;
        BaseKind::parse(&label).ok_or_else(|| {
            GraphError::corrupt(format!("vertex {} has unknown base kind [{}]", vertex, label))
        })
    }

    /// Whether a vertex is visible.
    pub fn vertex_exists(&self, vertex: VertexId) -> bool {
        self.session.vertex_exists(vertex)
    }

    /// A reserved property of a vertex.
    pub fn property(&self, vertex: VertexId, prop: VertexProp) -> Option<PropertyValue> {
        self.session.vertex_property(vertex, prop.as_str())
    }

    /// A reserved property of an edge.
    pub fn edge_property(&self, edge: &EdgeRecord, prop: EdgeProp) -> Option<PropertyValue> {
        edge.properties.get(prop.as_str()).cloned()
    }

    /// Vertices carrying `(prop, value)`, in deterministic order.
    pub fn vertices_by_property(&self, prop: VertexProp, value: &PropertyValue) -> Vec<VertexId> {
        self.session.vertices_by_property(prop.as_str(), value)
    }

    /// All vertices of the given base kind, in deterministic order. Backs
    /// enumeration operations; not an index lookup.
    pub fn vertices_of_kind(&self, kind: BaseKind) -> Vec<VertexId> {
        self.session.vertices_with_label(kind.as_str())
    }

    /// Resolve a concept id against raw vertex ids, bypassing the `ID`
    /// property index. Used when indices cannot be relied on.
    pub fn vertex_by_raw_id(&self, id: &ConceptId) -> Option<VertexId> {
        let vertex = VertexId::parse(id.as_str())?;
        self.session.vertex_exists(vertex).then_some(vertex)
    }

    /// Outgoing edges with the given label.
    pub fn out_edges(&self, vertex: VertexId, label: EdgeLabel) -> Vec<EdgeRecord> {
        self.session.out_edges(vertex, Some(label.as_str()))
    }

    /// Incoming edges with the given label.
    pub fn in_edges(&self, vertex: VertexId, label: EdgeLabel) -> Vec<EdgeRecord> {
        self.session.in_edges(vertex, Some(label.as_str()))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Commit the underlying session.
    pub fn commit(&mut self) -> Result<()> {
        self.session.commit()
    }

    /// Roll back the underlying session.
    pub fn rollback(&mut self) {
        self.session.rollback();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Substrate;

    fn store(read_only: bool) -> (Substrate, ElementStore) {
        let substrate = Substrate::new();
        let session = substrate.session();
        let store = ElementStore::new(session, KeyspaceName::new("test"), read_only);
        (substrate, store)
    }

    #[test]
    fn created_vertices_are_stamped_with_their_raw_id() {
        let (_substrate, mut store) = store(false);
        let v = store.add_vertex(BaseKind::Entity).unwrap();
        assert_eq!(
            store.property(v, VertexProp::Id),
            Some(PropertyValue::Str(v.to_string()))
        );
        assert_eq!(store.base_kind(v).unwrap(), BaseKind::Entity);
    }

    #[test]
    fn read_only_store_rejects_every_mutation() {
        let (_substrate, mut store) = store(true);
        assert!(matches!(
            store.add_vertex(BaseKind::Entity),
            Err(GraphError::ReadOnly { .. })
        ));
        let (_s2, mut writable) = self::store(false);
        let v = writable.add_vertex(BaseKind::Entity).unwrap();
        drop(writable);
        assert!(matches!(
            store.set_property(v, VertexProp::IsAbstract, PropertyValue::from(true)),
            Err(GraphError::ReadOnly { .. })
        ));
        assert!(matches!(store.clear(), Err(GraphError::ReadOnly { .. })));
    }

    #[test]
    fn raw_id_lookup_bypasses_the_id_property() {
        let (substrate, mut store) = store(false);
        let v = store.add_vertex(BaseKind::Resource).unwrap();
        // overwrite the ID property with garbage; raw lookup still works
        store
            .set_property(v, VertexProp::Id, PropertyValue::from("corrupted"))
            .unwrap();
        store.commit().unwrap();

        let session = substrate.session();
        let store = ElementStore::new(session, KeyspaceName::new("test"), true);
        let id = ConceptId::new(v.to_string());
        assert_eq!(store.vertex_by_raw_id(&id), Some(v));
        assert_eq!(store.vertex_by_raw_id(&ConceptId::new("999")), None);
    }

    #[test]
    fn unknown_base_kind_is_corrupt() {
        let substrate = Substrate::new();
        let mut session = substrate.session();
        let v = session.add_vertex("MYSTERY");
        session.commit().unwrap();

        let store = ElementStore::new(substrate.session(), KeyspaceName::new("test"), true);
        let err = store.base_kind(v).unwrap_err();
        assert!(err.to_string().contains("corrupt graph"));
    }
}

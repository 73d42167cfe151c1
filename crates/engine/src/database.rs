//! Keyspace handle
//!
//! A `Keyspace` is an isolated namespace of types and instances. Opening one
//! bootstraps the meta ontology if the substrate is empty, seeds the shared
//! ontology cache, and wires the commit-log sink. The handle is cheap to
//! clone; concurrent sessions open independent transactions against the same
//! keyspace value — there is no ambient, thread-bound transaction.

use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use trellis_core::schema::MetaSchema;
use trellis_core::{
    BaseKind, EdgeLabel, GraphError, KeyspaceName, PropertyValue, Result, TrellisConfig, TxKind,
    VertexProp,
};
use trellis_substrate::{ElementStore, Substrate, VertexId};

use crate::commit_log::{CommitLogSink, NullSink};
use crate::concept::build_type;
use crate::ontology::OntologyCache;
use crate::transaction::Transaction;

const MAX_WRITE_RETRIES: u32 = 3;

#[derive(Debug)]
struct KeyspaceInner {
    name: KeyspaceName,
    substrate: Substrate,
    cache: OntologyCache,
    config: TrellisConfig,
    sink: Arc<dyn CommitLogSink>,
    // refreshed by clear(), which re-bootstraps onto a fresh vertex
    meta_vertex: RwLock<VertexId>,
}

/// An isolated namespace of types and instances; roughly one database.
#[derive(Debug, Clone)]
pub struct Keyspace {
    inner: Arc<KeyspaceInner>,
}

impl Keyspace {
    /// Open a keyspace with the no-op sink.
    pub fn open(name: KeyspaceName, config: TrellisConfig) -> Result<Keyspace> {
        Self::build(name, config, Arc::new(NullSink))
    }

    /// Open a keyspace with an explicit commit-log sink.
    pub fn open_with_sink(
        name: KeyspaceName,
        config: TrellisConfig,
        sink: Arc<dyn CommitLogSink>,
    ) -> Result<Keyspace> {
        Self::build(name, config, sink)
    }

    fn build(
        name: KeyspaceName,
        config: TrellisConfig,
        sink: Arc<dyn CommitLogSink>,
    ) -> Result<Keyspace> {
        let substrate = Substrate::new();
        let meta_vertex = bootstrap_meta_ontology(&substrate, &name)?;
        // each transaction picks the expiry matching its own kind
        let cache = OntologyCache::new(config.cache_timeout(false), config.cache_timeout(true));
        let keyspace = Keyspace {
            inner: Arc::new(KeyspaceInner {
                name,
                substrate,
                cache,
                config,
                sink,
                meta_vertex: RwLock::new(meta_vertex),
            }),
        };
        keyspace.seed_cache()?;
        Ok(keyspace)
    }

    /// The keyspace name.
    pub fn name(&self) -> &KeyspaceName {
        &self.inner.name
    }

    /// The configuration this keyspace was opened with.
    pub fn config(&self) -> &TrellisConfig {
        &self.inner.config
    }

    /// Open a transaction of the given kind.
    pub fn transaction(&self, kind: TxKind) -> Result<Transaction> {
        Transaction::open(self.clone(), kind)
    }

    /// Run a closure inside a WRITE transaction, committing on success.
    ///
    /// Commit-time substrate conflicts (concurrent first-creation of a type
    /// label, counter races) are retried with a small jittered backoff
    /// instead of surfacing; any other error propagates immediately.
    pub fn retry_write<T>(
        &self,
        mut f: impl FnMut(&mut Transaction) -> Result<T>,
    ) -> Result<T> {
        let mut attempt = 0;
        loop {
            let mut tx = self.transaction(TxKind::Write)?;
            let result = f(&mut tx).and_then(|value| tx.commit().map(|_| value));
            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < MAX_WRITE_RETRIES => {
                    attempt += 1;
                    let backoff = self.retry_jitter(attempt);
                    warn!(
                        keyspace = %self.inner.name,
                        attempt,
                        "substrate conflict, retrying after {:?}: {}",
                        backoff,
                        e
                    );
                    std::thread::sleep(backoff);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drop every vertex and edge, then bootstrap a fresh meta ontology.
    pub fn clear(&self) -> Result<()> {
        debug!(keyspace = %self.inner.name, "clearing keyspace");
        let mut session = self.inner.substrate.session();
        session.clear()?;
        session.commit()?;
        self.inner.cache.clear();
        let meta = bootstrap_meta_ontology(&self.inner.substrate, &self.inner.name)?;
        *self.inner.meta_vertex.write() = meta;
        self.seed_cache()
    }

    pub(crate) fn substrate(&self) -> &Substrate {
        &self.inner.substrate
    }

    pub(crate) fn cache(&self) -> &OntologyCache {
        &self.inner.cache
    }

    pub(crate) fn sink(&self) -> &dyn CommitLogSink {
        self.inner.sink.as_ref()
    }

    pub(crate) fn meta_vertex(&self) -> VertexId {
        *self.inner.meta_vertex.read()
    }

    fn seed_cache(&self) -> Result<()> {
        let store = ElementStore::new(
            self.inner.substrate.session(),
            self.inner.name.clone(),
            true,
        );
        let mut metas = Vec::with_capacity(MetaSchema::ALL.len());
        for meta in MetaSchema::ALL {
            let label = PropertyValue::Str(meta.label().as_str().to_string());
            let vertex = store
                .vertices_by_property(VertexProp::TypeLabel, &label)
                .into_iter()
                .next()
                .ok_or_else(|| {
                    GraphError::corrupt(format!("meta type [{}] is missing", meta.label()))
                })?;
            metas.push(build_type(&store, vertex)?);
        }
        self.inner.cache.promote(metas);
        Ok(())
    }

    fn retry_jitter(&self, attempt: u32) -> Duration {
        // deterministic jitter: no RNG dependency, still spreads contenders
        let mut hasher = DefaultHasher::new();
        self.inner.name.hash(&mut hasher);
        attempt.hash(&mut hasher);
        Duration::from_millis(1 + hasher.finish() % 4)
    }
}

/// Create a shard vertex for a type and mark it as the type's current shard.
pub(crate) fn create_shard_vertex(
    store: &mut ElementStore,
    type_vertex: VertexId,
    kind: BaseKind,
) -> Result<VertexId> {
    let shard = store.add_vertex(kind)?;
    store.set_property(shard, VertexProp::IsShard, PropertyValue::Bool(true))?;
    store.add_edge(shard, type_vertex, EdgeLabel::Shard)?;
    store.set_property(
        type_vertex,
        VertexProp::CurrentShard,
        PropertyValue::Str(shard.to_string()),
    )?;
    Ok(shard)
}

/// Bootstrap the eight meta-schema vertices if the substrate is empty.
///
/// Returns the meta root vertex. Idempotent: a populated substrate is left
/// untouched.
fn bootstrap_meta_ontology(substrate: &Substrate, name: &KeyspaceName) -> Result<VertexId> {
    let mut store = ElementStore::new(substrate.session(), name.clone(), false);

    let concept_label = PropertyValue::Str(MetaSchema::Concept.label().as_str().to_string());
    if let Some(existing) = store
        .vertices_by_property(VertexProp::TypeLabel, &concept_label)
        .into_iter()
        .next()
    {
        store.rollback();
        return Ok(existing);
    }

    debug!(keyspace = %name, "bootstrapping meta ontology");
    let mut vertices = Vec::with_capacity(MetaSchema::ALL.len());
    for meta in MetaSchema::ALL {
        let vertex = store.add_vertex(meta.base_kind())?;
        store.set_property(
            vertex,
            VertexProp::TypeLabel,
            PropertyValue::Str(meta.label().as_str().to_string()),
        )?;
        store.set_property(
            vertex,
            VertexProp::TypeId,
            PropertyValue::Long(meta.type_id().as_u32() as i64),
        )?;
        vertices.push((meta, vertex));
    }

    for (meta, vertex) in &vertices {
        // the five kind roots cannot have direct instances
        if !matches!(meta, MetaSchema::Concept | MetaSchema::InferenceRule | MetaSchema::ConstraintRule)
        {
            store.set_property(*vertex, VertexProp::IsAbstract, PropertyValue::Bool(true))?;
        }
        if let Some(parent) = meta.supertype() {
            let parent_vertex = vertices
                .iter()
                .find(|(m, _)| *m == parent)
                .map(|(_, v)| *v)
                .ok_or_else(|| GraphError::corrupt("meta supertype missing during bootstrap"))?;
            store.add_edge(*vertex, parent_vertex, EdgeLabel::Sub)?;
        }
    }

    // only the rule subclasses hold instances at the meta level
    for meta in [MetaSchema::InferenceRule, MetaSchema::ConstraintRule] {
        let vertex = vertices
            .iter()
            .find(|(m, _)| *m == meta)
            .map(|(_, v)| *v)
            .ok_or_else(|| GraphError::corrupt("meta rule type missing during bootstrap"))?;
        create_shard_vertex(&mut store, vertex, meta.base_kind())?;
    }

    store.commit()?;
    vertices
        .iter()
        .find(|(m, _)| *m == MetaSchema::Concept)
        .map(|(_, v)| *v)
        .ok_or_else(|| GraphError::corrupt("meta root missing after bootstrap"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::TypeLabel;

    fn keyspace() -> Keyspace {
        Keyspace::open(KeyspaceName::new("test"), TrellisConfig::default()).unwrap()
    }

    #[test]
    fn bootstrap_creates_the_meta_ontology_once() {
        let ks = keyspace();
        // 8 meta vertices + 2 meta shards
        assert_eq!(ks.substrate().vertex_count(), 10);

        // reopening logic is idempotent
        bootstrap_meta_ontology(ks.substrate(), ks.name()).unwrap();
        assert_eq!(ks.substrate().vertex_count(), 10);
    }

    #[test]
    fn cache_is_seeded_with_the_meta_types() {
        let ks = keyspace();
        let concept = ks.cache().get(&TypeLabel::new("concept"), false).unwrap();
        assert_eq!(concept.type_id(), MetaSchema::Concept.type_id());
        assert!(ks.cache().get(&TypeLabel::new("rule-type"), false).is_some());
        assert_eq!(ks.cache().len(), 8);
    }

    #[test]
    fn clear_resets_to_a_fresh_meta_ontology() {
        let ks = keyspace();
        let mut tx = ks.transaction(TxKind::Write).unwrap();
        tx.put_entity_type("person").unwrap();
        tx.commit().unwrap();
        assert!(ks.substrate().vertex_count() > 10);

        ks.clear().unwrap();
        assert_eq!(ks.substrate().vertex_count(), 10);
        assert_eq!(ks.cache().len(), 8);
    }

    #[test]
    fn retry_write_gives_up_on_non_retryable_errors() {
        let ks = keyspace();
        let result: Result<()> =
            ks.retry_write(|_| Err(GraphError::substrate("permanent failure")));
        assert!(result.is_err());
    }
}

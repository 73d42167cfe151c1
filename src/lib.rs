//! # TrellisDB
//!
//! The transactional core of a semantic graph database: a typed knowledge
//! model — entities, relations with named roles, resources and rules —
//! enforced on top of a generic property-graph substrate.
//!
//! # Quick Start
//!
//! ```
//! use trellisdb::{DataValue, Datatype, Keyspace, KeyspaceName, TrellisConfig, TxKind};
//!
//! fn main() -> trellisdb::Result<()> {
//!     let ks = Keyspace::open(KeyspaceName::new("demo"), TrellisConfig::default())?;
//!
//!     let mut tx = ks.transaction(TxKind::Write)?;
//!     let person = tx.put_entity_type("person")?;
//!     let name = tx.put_resource_type("name", Datatype::String)?;
//!
//!     let alice = tx.add_entity(&person)?;
//!     let alice_name = tx.add_resource(&name, DataValue::from("alice"))?;
//!     tx.attach_resource(&alice, &alice_name)?;
//!     tx.commit()?;
//!
//!     let mut tx = ks.transaction(TxKind::Read)?;
//!     let found = tx.get_resources_by_value(&DataValue::from("alice"))?;
//!     assert_eq!(found.len(), 1);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! A [`Keyspace`] is an isolated namespace of types and instances. Opening
//! one bootstraps the meta ontology (eight reserved types with stable ids)
//! and seeds a process-wide, write-expiring ontology cache shared by every
//! transaction.
//!
//! A [`Transaction`] is an explicit value — there is no ambient,
//! thread-bound transaction. Mutations are buffered in a substrate session
//! and validated at commit; the commit returns a [`CommitLog`] payload
//! naming duplicate candidates (castings, resources) for the asynchronous
//! [`Reconciler`] to merge.
//!
//! Internal crates (`trellis-core`, `trellis-substrate`, `trellis-engine`)
//! are re-exported through this facade; only this surface is stable.

pub use trellis_engine::*;

//! Core types for trellis
//!
//! This crate defines the foundational vocabulary used throughout the system:
//! - Schema: base kinds, edge labels, reserved property names, meta-schema table
//! - Ids: TypeId, TypeLabel, ConceptId, KeyspaceName, TxKind
//! - Datatype: the closed resource datatype set and its value representation
//! - PropertyValue: the small value enum stored on vertices and edges
//! - GraphError: the closed error set for the transaction engine
//! - TrellisConfig: configuration loaded from `trellis.toml`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod datatype;
pub mod error;
pub mod ids;
pub mod schema;
pub mod value;

pub use config::{TrellisConfig, CONFIG_FILE_NAME, IN_MEMORY};
pub use datatype::{DataValue, Datatype};
pub use error::{GraphError, Result};
pub use ids::{ConceptId, KeyspaceName, TxKind, TypeId, TypeLabel};
pub use schema::{BaseKind, EdgeLabel, EdgeProp, MetaSchema, VertexProp};
pub use value::PropertyValue;

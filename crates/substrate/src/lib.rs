//! Property-graph substrate for trellis
//!
//! The engine sits on a generic property graph that provides vertices, edges,
//! string-keyed properties, iteration by property value, and per-session
//! transactional commit/rollback with last-writer-wins on non-unique
//! properties. This crate defines:
//!
//! - `Substrate`: the shared in-memory reference graph
//! - `GraphSession`: a per-transaction buffered view with read-your-writes,
//!   atomic commit and rollback-on-drop
//! - `ElementStore`: the thin, read-only-aware facade the engine talks to,
//!   speaking the schema vocabulary from `trellis-core`
//!
//! A vendor substrate (an external storage engine) would replace `Substrate`
//! and `GraphSession`; `ElementStore` is the seam the engine depends on.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod element;
pub mod graph;
pub mod session;

pub use element::ElementStore;
pub use graph::{EdgeId, EdgeRecord, Substrate, VertexId, VertexRecord};
pub use session::{CommitGuard, GraphSession, SessionStatus};

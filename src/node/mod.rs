//! Node table - RDF terms and their 64-bit ids.
//!
//! - [`NodeId`] - pointer ids into the node log, inline ids for small literals
//! - [`Term`] - RDF terms and their canonical byte encoding
//! - [`NodeLog`] - append-only, checksummed term storage
//! - [`NodeTable`] - term ↔ id dictionary with a hash index and caches

pub mod inline;
mod node_id;
mod node_log;
mod node_table;
mod term;

pub use node_id::NodeId;
pub use node_log::NodeLog;
pub(crate) use node_table::NODE_INDEX_RECORD;
pub use node_table::{NodeTable, NodeView, NodeWrite};
pub use term::{xsd, Literal, Term};

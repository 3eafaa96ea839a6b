//! Copy-on-write B+Tree of fixed-width records.
//!
//! ```text
//!            root (version 2)            root (version 1)
//!                  │                            │
//!          ┌───────┴───────┐            ┌───────┴───────┐
//!          ▼               ▼            ▼               ▼
//!     leaf (new copy)   leaf A ◄──── shared ────     leaf B
//! ```
//!
//! A write transaction copies each page it touches once, into a block
//! stamped with its version; later writes in the same transaction update
//! the copy in place. Old pages stay untouched until no snapshot can reach
//! them, so any committed root can be read concurrently with the writer.
//!
//! - [`RecordFactory`] / [`Record`] - record shape and values
//! - [`BPlusTree`] - lookups, inserts, deletes and range scans
//! - [`WriteContext`] - per-transaction root, generation and block lists
//! - [`RangeIter`] - lazy, pin-free range iteration
//! - [`TreeCheck`] - result of structural validation

mod check;
mod iter;
mod node;
mod record;
mod tree;

pub use check::TreeCheck;
pub use iter::RangeIter;
pub use node::NodeLayout;
pub use record::{Record, RecordFactory};
pub use tree::{BPlusTree, WriteContext};

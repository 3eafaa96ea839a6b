//! tdb-storage - a transactional, disk-backed triple/quad store.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            Store                                │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │          Transaction Layer (transaction/)               │   │
//! │  │   Coordinator (1 writer, N readers) + Journal + Recovery │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                 ↓                             ↓                 │
//! │  ┌──────────────────────────┐  ┌──────────────────────────┐   │
//! │  │   Tuple Tables (tuple/)  │  │   Node Table (node/)     │   │
//! │  │ SPO POS OSP | GSPO ...   │  │ term ⇄ NodeId, caches,   │   │
//! │  │                          │  │ inline ids, node log     │   │
//! │  └──────────────────────────┘  └──────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │        Index Layer (index/)  copy-on-write B+Tree        │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │   Block Cache (buffer/)  BlockManager + LRU + Stats      │   │
//! │  │   free list, retired blocks reclaimed by version         │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │     Storage Layer (storage/)                             │   │
//! │  │     Channel + BlockFile + Page + metadata                │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (BlockId, Error, config)
//! - [`storage`] - Channels, block files, page formats, metadata
//! - [`buffer`] - Block caching, allocation and reclamation
//! - [`index`] - The B+Tree
//! - [`node`] - Terms, NodeIds and the node table
//! - [`tuple`] - Triple and quad tables
//! - [`transaction`] - Coordinator, journal, recovery, transactions
//! - [`store`] - The store handle
//!
//! # Quick Start
//! ```no_run
//! use tdb_storage::{Store, StoreParams, Term, TxnType};
//!
//! let store = Store::open("my_database", StoreParams::default()).unwrap();
//!
//! let mut txn = store.begin(TxnType::Write).unwrap();
//! let s = txn.id_for_node(&Term::iri("http://example.org/s")).unwrap();
//! let p = txn.id_for_node(&Term::iri("http://example.org/p")).unwrap();
//! let o = txn.id_for_node(&Term::literal("o")).unwrap();
//! txn.add_triple(s, p, o).unwrap();
//! txn.commit().unwrap();
//!
//! store.close().unwrap();
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod node;
pub mod storage;
pub mod store;
pub mod transaction;
pub mod tuple;

// Re-export commonly used items at crate root for convenience
pub use common::{BlockId, Error, Result, StoreParams, Version};

pub use node::{xsd, Literal, NodeId, Term};
pub use store::{CompactStats, ExclusiveGuard, Store, WritersBlocked};
pub use transaction::{Transaction, TxnMode, TxnState, TxnStats, TxnType};
pub use tuple::{Tuple, TupleIter};

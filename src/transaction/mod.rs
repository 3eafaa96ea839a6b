//! Transactions: the coordinator, the journal, recovery and the
//! transaction handle.
//!
//! - [`Coordinator`] - single writer, registered snapshots, counters
//! - [`Journal`] - write-ahead redo journal
//! - [`Transaction`] - the handle callers read and write through

pub mod coordinator;
pub mod journal;
pub(crate) mod recovery;
pub(crate) mod txn;

pub use coordinator::{Coordinator, Snapshot, TxnStats};
pub use journal::{CommitGroup, Journal, JournalEntry};
pub use txn::{Transaction, TxnMode, TxnState, TxnType};
pub(crate) use txn::WriteSet;

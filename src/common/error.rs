//! Error types for tdb-storage.

use thiserror::Error;

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors surfaced by the storage engine.
///
/// Bookkeeping problems that can be resolved locally (a frame pinned while
/// being chosen for eviction, two threads loading the same block) never
/// reach this type.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A block or log entry failed its checksum or structural checks.
    ///
    /// Fatal to the transaction that read it; the process keeps running.
    #[error("corrupt block {block} in {component}: {reason}")]
    CorruptBlock {
        component: String,
        block: u64,
        reason: String,
    },

    /// The backing storage cannot hold another block.
    #[error("out of space in {0}")]
    OutOfSpace(String),

    /// A promotion found that another writer committed first.
    #[error("concurrent modification: data version {current} is newer than snapshot {snapshot}")]
    ConcurrentModification { snapshot: u64, current: u64 },

    /// A NodeId with no entry in the node table.
    #[error("unknown node id {0:#018x}")]
    UnknownId(u64),

    /// The journal could not be replayed; the store will not open.
    #[error("journal replay failed: {0}")]
    JournalReplay(String),

    /// All frames of a block cache are pinned.
    #[error("no free frames available in block cache for {0}")]
    NoFreeFrames(String),

    /// Invalid store parameters or layout.
    #[error("configuration error: {0}")]
    Config(String),

    /// A transaction was used in a way its state or mode does not allow.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// A commit failed after its commit point; reopen the store to recover.
    #[error("store failed and must be reopened: {0}")]
    StoreFailed(String),
}

impl Error {
    pub(crate) fn corrupt(component: &str, block: u64, reason: impl Into<String>) -> Self {
        Error::CorruptBlock {
            component: component.to_string(),
            block,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::UnknownId(42);
        assert_eq!(format!("{}", err), "unknown node id 0x000000000000002a");

        let err = Error::corrupt("SPO", 7, "bad checksum");
        assert_eq!(format!("{}", err), "corrupt block 7 in SPO: bad checksum");

        let err = Error::ConcurrentModification {
            snapshot: 3,
            current: 4,
        };
        assert!(format!("{}", err).contains("snapshot 3"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();

        match err {
            Error::Io(_) => {} // Success
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_io_error_has_source() {
        use std::error::Error as _;

        let err: Error = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert!(err.source().is_some());
        assert!(Error::OutOfSpace("mem".into()).source().is_none());
    }
}

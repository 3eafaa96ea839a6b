//! Guards for exclusive mode and for blocking writers.

use std::fmt;

use crate::common::{Error, Result};
use crate::store::compact::{self, CompactStats};
use crate::store::Store;
use crate::transaction::{Transaction, TxnType};

/// Exclusive mode: no other transaction runs until this is dropped.
///
/// Created by [`Store::exclusive`] or [`Store::try_exclusive`].
pub struct ExclusiveGuard<'a> {
    store: &'a Store,
}

impl<'a> ExclusiveGuard<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Begin a transaction inside exclusive mode. A writer still waits for
    /// the writer lock if writers are blocked.
    pub fn begin(&self, kind: TxnType) -> Result<Transaction> {
        let inner = self.store.inner();
        inner.check_open()?;
        inner.coordinator.admit_within_exclusive();
        if let Err(e) = inner.admit_admitted(kind, true) {
            inner.coordinator.depart();
            return Err(e);
        }
        Ok(Transaction::begin(inner.clone(), kind))
    }

    /// Rebuild every index into packed files and switch the store to them.
    ///
    /// # Errors
    /// - `Error::Config` for a memory store
    /// - `Error::Transaction` if a transaction begun through this guard is
    ///   still running, or the store is closed
    /// - `Error::StoreFailed` if switching to the new files fails; the
    ///   compaction finishes when the store is reopened
    pub fn compact(&self) -> Result<CompactStats> {
        let inner = self.store.inner();
        inner.check_open()?;
        let Some(dir) = self.store.location() else {
            return Err(Error::Config(
                "compaction does not apply to a memory store".into(),
            ));
        };
        let running = inner.coordinator.admitted();
        if running > 0 {
            return Err(Error::Transaction(format!(
                "{} transaction(s) begun in exclusive mode still running",
                running
            )));
        }

        inner.coordinator.acquire_writer();
        let result = inner
            .check_open()
            .and_then(|()| compact::compact(inner, dir));
        inner.coordinator.release_writer();
        result
    }
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        self.store.inner().coordinator.finish_exclusive();
    }
}

impl fmt::Debug for ExclusiveGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusiveGuard")
            .field("version", &self.store.version())
            .finish()
    }
}

/// Holds the writer lock: readers run, writers wait until this is dropped.
///
/// Created by [`Store::block_writers`] or [`Store::try_block_writers`].
pub struct WritersBlocked<'a> {
    store: &'a Store,
}

impl<'a> WritersBlocked<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Self { store }
    }
}

impl Drop for WritersBlocked<'_> {
    fn drop(&mut self) {
        self.store.inner().coordinator.release_writer();
    }
}

impl fmt::Debug for WritersBlocked<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WritersBlocked").finish_non_exhaustive()
    }
}

//! The transaction handle.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::common::{Error, Result, Version};
use crate::node::{NodeId, NodeWrite, Term};
use crate::store::{StoreInner, Tables};
use crate::transaction::coordinator::Snapshot;
use crate::transaction::journal::JournalEntry;
use crate::tuple::{Tuple, TupleIter, TupleWrite};

/// What a transaction is begun as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnType {
    /// Reads one snapshot. [`Transaction::promote`] succeeds only if no
    /// write has committed since the transaction began.
    Read,
    /// The single writer.
    Write,
    /// Reads one snapshot; promotion waits for the writer lock and moves
    /// to the latest committed version.
    ReadCommittedPromote,
}

/// What a transaction can currently do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnMode {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Committing,
    Committed,
    Aborting,
    Aborted,
    Ended,
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxnState::Active => "active",
            TxnState::Committing => "committing",
            TxnState::Committed => "committed",
            TxnState::Aborting => "aborting",
            TxnState::Aborted => "aborted",
            TxnState::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// Pending changes of a write transaction.
pub(crate) struct WriteSet {
    pub(crate) version: Version,
    pub(crate) nodes: NodeWrite,
    pub(crate) triples: TupleWrite,
    pub(crate) quads: TupleWrite,
    /// Tuple changes, in order, for the journal.
    pub(crate) changes: Vec<JournalEntry>,
}

impl WriteSet {
    /// Journal entries describing this transaction: node allocations first,
    /// then tuple changes.
    pub(crate) fn journal_entries(&self) -> Vec<JournalEntry> {
        let mut entries: Vec<JournalEntry> = self
            .nodes
            .created()
            .iter()
            .map(|(id, term)| JournalEntry::NodeAlloc {
                id: *id,
                term: term.encode(),
            })
            .collect();
        entries.extend(self.changes.iter().cloned());
        entries
    }
}

/// A transaction on a [`Store`](crate::store::Store).
///
/// Dropping a transaction ends it; an uncommitted write is aborted.
///
/// # Example
/// ```
/// use tdb_storage::{Store, StoreParams, Term, TxnType};
///
/// let store = Store::memory(StoreParams::default()).unwrap();
///
/// let mut txn = store.begin(TxnType::Write).unwrap();
/// let s = txn.id_for_node(&Term::iri("http://example.org/alice")).unwrap();
/// let p = txn.id_for_node(&Term::iri("http://xmlns.com/foaf/0.1/name")).unwrap();
/// let o = txn.id_for_node(&Term::literal("Alice")).unwrap();
/// txn.add_triple(s, p, o).unwrap();
/// txn.commit().unwrap();
///
/// let txn = store.begin(TxnType::Read).unwrap();
/// let found: Vec<_> = txn.find_triples(Some(s), None, None).unwrap().collect();
/// assert_eq!(found.len(), 1);
/// ```
pub struct Transaction {
    store: Arc<StoreInner>,
    /// Tables at begin; compaction never replaces them under a transaction.
    tables: Arc<Tables>,
    kind: TxnType,
    state: TxnState,
    snapshot: Arc<Snapshot>,
    /// Set while in write mode.
    write: Option<WriteSet>,
    /// Still holds a registered snapshot.
    registered: bool,
    /// Held the writer lock at some point.
    writer: bool,
}

impl Transaction {
    /// Begin a transaction the store has admitted; a writer already holds
    /// the writer lock.
    pub(crate) fn begin(store: Arc<StoreInner>, kind: TxnType) -> Self {
        let tables = store.tables();
        let coordinator = &store.coordinator;
        let snapshot = coordinator.register_current();
        let write = match kind {
            TxnType::Write => Some(store.begin_write(&snapshot)),
            _ => None,
        };
        coordinator.record_begin(write.is_some());
        debug!(?kind, version = snapshot.version, "begin transaction");
        Self {
            store,
            tables,
            kind,
            state: TxnState::Active,
            snapshot,
            writer: write.is_some(),
            write,
            registered: true,
        }
    }

    pub fn kind(&self) -> TxnType {
        self.kind
    }

    pub fn mode(&self) -> TxnMode {
        if self.write.is_some() {
            TxnMode::Write
        } else {
            TxnMode::Read
        }
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    /// Version of the snapshot this transaction reads.
    pub fn version(&self) -> Version {
        self.snapshot.version
    }

    pub fn is_write(&self) -> bool {
        self.write.is_some()
    }

    // ========================================================================
    // Promotion
    // ========================================================================

    /// Switch to write mode.
    ///
    /// Waits for the writer lock. A [`TxnType::Read`] transaction then fails
    /// if any write committed after it began; a
    /// [`TxnType::ReadCommittedPromote`] one moves to the latest version.
    ///
    /// # Errors
    /// - `Error::ConcurrentModification` when a `Read` transaction is stale
    /// - `Error::Transaction` if the transaction is no longer active
    pub fn promote(&mut self) -> Result<()> {
        self.check_active()?;
        if self.write.is_some() {
            return Ok(());
        }
        self.store.check_open()?;
        let coordinator = &self.store.coordinator;
        coordinator.acquire_writer();
        self.store.recheck_open_as_writer()?;

        let current = coordinator.current();
        if current.version != self.snapshot.version {
            if self.kind == TxnType::Read {
                coordinator.release_writer();
                return Err(Error::ConcurrentModification {
                    snapshot: self.snapshot.version,
                    current: current.version,
                });
            }
            let old = self.snapshot.version;
            self.snapshot = coordinator.register_current();
            coordinator.unregister(old);
        }

        self.write = Some(self.store.begin_write(&self.snapshot));
        self.writer = true;
        coordinator.record_promote();
        debug!(version = self.snapshot.version, "promoted to write");
        Ok(())
    }

    // ========================================================================
    // Nodes
    // ========================================================================

    /// NodeId for `term`, allocating one if needed.
    ///
    /// # Errors
    /// `Error::Transaction` in a read transaction.
    pub fn id_for_node(&mut self, term: &Term) -> Result<NodeId> {
        self.check_active()?;
        let tables = self.tables.clone();
        let write = self.write_set()?;
        tables.nodes.id_for_node(&mut write.nodes, term)
    }

    /// NodeId for `term` if it has one; never allocates.
    pub fn get_node_id(&self, term: &Term) -> Result<Option<NodeId>> {
        self.check_active()?;
        match &self.write {
            Some(write) => self.tables.nodes.get_node_id_for_write(&write.nodes, term),
            None => self.tables.nodes.get_node_id(&self.snapshot.node_view(), term),
        }
    }

    /// The term of `id`.
    ///
    /// # Errors
    /// `Error::UnknownId` if `id` is a sentinel or not in this snapshot.
    pub fn node_for_id(&self, id: NodeId) -> Result<Term> {
        self.check_active()?;
        match &self.write {
            Some(write) => self.tables.nodes.node_for_id_for_write(&write.nodes, id),
            None => self.tables.nodes.node_for_id(&self.snapshot.node_view(), id),
        }
    }

    // ========================================================================
    // Tuples
    // ========================================================================

    /// Add a triple. False if it was already present.
    pub fn add_triple(&mut self, s: NodeId, p: NodeId, o: NodeId) -> Result<bool> {
        self.change(Tuple::triple(s, p, o), true)
    }

    /// Delete a triple. False if it was absent.
    pub fn delete_triple(&mut self, s: NodeId, p: NodeId, o: NodeId) -> Result<bool> {
        self.change(Tuple::triple(s, p, o), false)
    }

    /// Add a quad. False if it was already present.
    pub fn add_quad(&mut self, g: NodeId, s: NodeId, p: NodeId, o: NodeId) -> Result<bool> {
        self.change(Tuple::quad(g, s, p, o), true)
    }

    /// Delete a quad. False if it was absent.
    pub fn delete_quad(&mut self, g: NodeId, s: NodeId, p: NodeId, o: NodeId) -> Result<bool> {
        self.change(Tuple::quad(g, s, p, o), false)
    }

    /// Apply a journaled tuple change; triples and quads are told apart by
    /// arity.
    pub(crate) fn change(&mut self, tuple: Tuple, add: bool) -> Result<bool> {
        self.check_active()?;
        if tuple.as_slice().iter().any(|id| id.is_sentinel()) {
            return Err(Error::Transaction(format!(
                "tuple {:?} contains a sentinel id",
                tuple
            )));
        }
        let tables = self.tables.clone();
        let write = self.write_set()?;
        let (table, tables_write) = match tuple.arity() {
            3 => (&tables.triples, &mut write.triples),
            _ => (&tables.quads, &mut write.quads),
        };
        let changed = if add {
            table.add(tables_write, &tuple)?
        } else {
            table.delete(tables_write, &tuple)?
        };
        if changed {
            write.changes.push(if add {
                JournalEntry::TupleAdd(tuple)
            } else {
                JournalEntry::TupleDelete(tuple)
            });
        }
        Ok(changed)
    }

    /// Triples matching a pattern; `None` matches anything. Sorted by the
    /// index the pattern selects.
    pub fn find_triples(
        &self,
        s: Option<NodeId>,
        p: Option<NodeId>,
        o: Option<NodeId>,
    ) -> Result<TupleIter<'_>> {
        self.check_active()?;
        let roots = match &self.write {
            Some(write) => write.triples.roots(),
            None => self.snapshot.triple_roots.clone(),
        };
        self.tables.triples.find(&roots, &[s, p, o])
    }

    /// Quads matching a pattern; `None` matches anything.
    pub fn find_quads(
        &self,
        g: Option<NodeId>,
        s: Option<NodeId>,
        p: Option<NodeId>,
        o: Option<NodeId>,
    ) -> Result<TupleIter<'_>> {
        self.check_active()?;
        let roots = match &self.write {
            Some(write) => write.quads.roots(),
            None => self.snapshot.quad_roots.clone(),
        };
        self.tables.quads.find(&roots, &[g, s, p, o])
    }

    /// Convenience: add a triple of terms, allocating their ids.
    pub fn add_triple_terms(&mut self, s: &Term, p: &Term, o: &Term) -> Result<bool> {
        let (s, p, o) = (self.id_for_node(s)?, self.id_for_node(p)?, self.id_for_node(o)?);
        self.add_triple(s, p, o)
    }

    // ========================================================================
    // Completion
    // ========================================================================

    /// Make the transaction's changes durable and visible. A read
    /// transaction just ends.
    ///
    /// # Errors
    /// - any error before the journal is synced aborts the transaction
    /// - `Error::StoreFailed` if a later step fails; the commit is in the
    ///   journal and is recovered on reopen
    pub fn commit(&mut self) -> Result<()> {
        self.check_active()?;
        let Some(write) = self.write.take() else {
            self.state = TxnState::Committed;
            self.finish();
            return Ok(());
        };

        self.state = TxnState::Committing;
        let result = self.store.commit_write(write);
        self.state = match result {
            Ok(_) => TxnState::Committed,
            Err(_) => TxnState::Aborted,
        };
        self.store.coordinator.release_writer();
        self.finish();
        result.map(|snapshot| {
            debug!(version = snapshot.version, "committed");
        })
    }

    /// Discard the transaction's changes.
    pub fn abort(&mut self) -> Result<()> {
        self.check_active()?;
        self.state = TxnState::Aborting;
        let result = match self.write.take() {
            Some(write) => {
                let result = self.store.abort_write(write);
                self.store.coordinator.release_writer();
                debug!(version = self.snapshot.version, "aborted");
                result
            }
            None => Ok(()),
        };
        self.state = TxnState::Aborted;
        self.finish();
        result
    }

    /// Release the transaction's snapshot. An active writer is aborted.
    pub fn end(&mut self) -> Result<()> {
        let result = match self.state {
            TxnState::Active if self.write.is_some() => self.abort(),
            _ => Ok(()),
        };
        self.finish();
        self.state = TxnState::Ended;
        result
    }

    /// Unregister the snapshot, once, let the store reclaim blocks, then
    /// leave the admission gate.
    fn finish(&mut self) {
        if !self.registered {
            return;
        }
        self.registered = false;
        let coordinator = &self.store.coordinator;
        coordinator.unregister(self.snapshot.version);
        coordinator.record_end(!self.writer);
        self.store.reclaim();
        coordinator.depart();
    }

    fn check_active(&self) -> Result<()> {
        if self.state != TxnState::Active {
            return Err(Error::Transaction(format!("transaction is {}", self.state)));
        }
        Ok(())
    }

    fn write_set(&mut self) -> Result<&mut WriteSet> {
        self.write
            .as_mut()
            .ok_or_else(|| Error::Transaction("write in a read transaction".into()))
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if let Err(e) = self.end() {
            warn!(error = %e, "error ending dropped transaction");
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("kind", &self.kind)
            .field("mode", &self.mode())
            .field("state", &self.state)
            .field("version", &self.snapshot.version)
            .finish()
    }
}

//! The store handle and its commit pipeline.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::buffer::BlockManager;
use crate::common::config::{
    INDEX_EXT, JOURNAL_FILE, META_FILE, NODE_DATA_FILE, NODE_INDEX_FILE, PARAMS_FILE,
};
use crate::common::{BlockId, Error, Result, StoreParams, Version};
use crate::index::bplustree::TreeCheck;
use crate::index::{BPlusTree, RecordFactory};
use crate::node::{NodeLog, NodeTable, NODE_INDEX_RECORD};
use crate::storage::{BlockFile, Channel, FileChannel, IndexMeta, MemChannel, MetaStore, StoreMetadata};
use crate::store::compact::{self, CompactStats};
use crate::store::exclusive::{ExclusiveGuard, WritersBlocked};
use crate::transaction::coordinator::{Coordinator, Snapshot, TxnStats};
use crate::transaction::journal::Journal;
use crate::transaction::recovery;
use crate::transaction::{Transaction, TxnType, WriteSet};
use crate::tuple::{ColumnMap, TupleIndex, TupleTable};

/// Column names of the triple and quad tables.
const TRIPLE_COLUMNS: &str = "SPO";
const QUAD_COLUMNS: &str = "GSPO";

// ============================================================================
// Tables
// ============================================================================

/// Every persistent structure of a store.
///
/// Trees are numbered node index first, then the triple indexes, then the
/// quad indexes; metadata lists them in that order.
pub(crate) struct Tables {
    pub(crate) nodes: NodeTable,
    pub(crate) triples: TupleTable,
    pub(crate) quads: TupleTable,
    pub(crate) journal: Journal,
    pub(crate) meta: MetaStore,
}

impl Tables {
    pub(crate) fn trees(&self) -> impl Iterator<Item = &BPlusTree> {
        std::iter::once(self.nodes.index())
            .chain(self.triples.indexes().iter().map(|i| i.tree()))
            .chain(self.quads.indexes().iter().map(|i| i.tree()))
    }

    pub(crate) fn tree_count(&self) -> usize {
        1 + self.triples.indexes().len() + self.quads.indexes().len()
    }

    /// Snapshot described by durable metadata.
    pub(crate) fn snapshot_of(&self, meta: &StoreMetadata) -> Result<Snapshot> {
        if meta.indexes.len() != self.tree_count() {
            return Err(Error::Config(format!(
                "metadata lists {} indexes, the store has {}",
                meta.indexes.len(),
                self.tree_count()
            )));
        }
        let roots: Vec<BlockId> = meta.indexes.iter().map(|i| i.root).collect();
        let triples = self.triples.indexes().len();
        Ok(Snapshot {
            version: meta.version,
            node_root: roots[0],
            node_log_len: meta.node_log_len,
            triple_roots: roots[1..1 + triples].to_vec(),
            quad_roots: roots[1 + triples..].to_vec(),
        })
    }

    /// Write empty roots for a new store and persist version 0.
    fn bootstrap(&self) -> Result<Snapshot> {
        let mut roots = Vec::with_capacity(self.tree_count());
        for tree in self.trees() {
            roots.push(tree.create_root(0)?);
        }
        self.nodes.sync()?;
        self.triples.sync()?;
        self.quads.sync()?;

        let meta = StoreMetadata {
            version: 0,
            node_log_len: self.nodes.log().len(),
            indexes: self
                .trees()
                .zip(&roots)
                .map(|(tree, &root)| {
                    let (block_limit, free) = tree.blocks().allocation_state();
                    IndexMeta {
                        root,
                        block_limit,
                        free,
                    }
                })
                .collect(),
        };
        self.meta.store(&meta)?;
        self.snapshot_of(&meta)
    }

    pub(crate) fn begin_write(&self, snapshot: &Snapshot, version: Version) -> WriteSet {
        WriteSet {
            version,
            nodes: self.nodes.begin_write(&snapshot.node_view(), version),
            triples: self.triples.begin_write(&snapshot.triple_roots, version),
            quads: self.quads.begin_write(&snapshot.quad_roots, version),
            changes: Vec::new(),
        }
    }

    pub(crate) fn abort_write(&self, write: WriteSet) -> Result<()> {
        self.triples.abort(write.triples)?;
        self.quads.abort(write.quads)?;
        self.nodes.abort(write.nodes)
    }

    /// Make a journaled write durable in the data files, then visible to
    /// the tables. Returns the new snapshot; nothing is published.
    pub(crate) fn apply_durable(&self, write: WriteSet) -> Result<Snapshot> {
        self.nodes.sync()?;
        self.triples.sync()?;
        self.quads.sync()?;

        let mut indexes = Vec::with_capacity(self.tree_count());
        let mut roots = vec![write.nodes.root()];
        let mut superseded: Vec<&[BlockId]> = vec![write.nodes.retired()];
        roots.extend(write.triples.roots());
        roots.extend(write.quads.roots());
        superseded.extend((0..self.triples.indexes().len()).map(|i| write.triples.retired(i)));
        superseded.extend((0..self.quads.indexes().len()).map(|i| write.quads.retired(i)));
        for ((tree, root), retired) in self.trees().zip(roots).zip(superseded) {
            let (block_limit, free) = tree.blocks().durable_allocation(retired);
            indexes.push(IndexMeta {
                root,
                block_limit,
                free,
            });
        }
        let meta = StoreMetadata {
            version: write.version,
            node_log_len: self.nodes.log().len(),
            indexes,
        };
        self.meta.store(&meta)?;

        let node_root = self.nodes.complete(write.nodes);
        let triple_roots = self.triples.complete(write.triples);
        let quad_roots = self.quads.complete(write.quads);
        Ok(Snapshot {
            version: meta.version,
            node_root,
            node_log_len: meta.node_log_len,
            triple_roots,
            quad_roots,
        })
    }

    /// Return retired blocks no snapshot at or after `oldest` can see.
    pub(crate) fn reclaim(&self, oldest: Option<Version>) -> usize {
        self.trees().map(|tree| tree.blocks().reclaim(oldest)).sum()
    }
}

// ============================================================================
// StoreInner
// ============================================================================

/// State shared by a [`Store`] and its transactions.
pub(crate) struct StoreInner {
    params: StoreParams,
    location: Option<PathBuf>,
    /// Replaced only by compaction, while no transaction runs.
    tables: RwLock<Arc<Tables>>,
    pub(crate) coordinator: Coordinator,
    closed: AtomicBool,
}

impl StoreInner {
    pub(crate) fn tables(&self) -> Arc<Tables> {
        self.tables.read().clone()
    }

    pub(crate) fn params(&self) -> &StoreParams {
        &self.params
    }

    /// Swap in rebuilt tables and the snapshot describing them.
    pub(crate) fn replace_tables(&self, tables: Tables, snapshot: Snapshot) {
        *self.tables.write() = Arc::new(tables);
        self.coordinator.publish(snapshot);
    }

    /// Let a transaction of `kind` start: pass the admission gate and, for
    /// a writer, take the writer lock. With `wait` false, `Ok(false)`
    /// replaces any wait.
    pub(crate) fn admit(&self, kind: TxnType, wait: bool) -> Result<bool> {
        self.check_open()?;
        let coordinator = &self.coordinator;
        if wait {
            coordinator.admit();
        } else if !coordinator.try_admit() {
            return Ok(false);
        }
        match self.admit_admitted(kind, wait) {
            Ok(true) => Ok(true),
            refused => {
                coordinator.depart();
                refused
            }
        }
    }

    /// The writer lock part of [`StoreInner::admit`], for a transaction
    /// already through the gate.
    pub(crate) fn admit_admitted(&self, kind: TxnType, wait: bool) -> Result<bool> {
        if kind != TxnType::Write {
            self.check_open()?;
            return Ok(true);
        }
        if wait {
            self.coordinator.acquire_writer();
        } else if !self.coordinator.try_acquire_writer() {
            return Ok(false);
        }
        self.recheck_open_as_writer()?;
        Ok(true)
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Transaction("store is closed".into()));
        }
        self.coordinator.check_failed()
    }

    /// The store may have closed or failed while the caller waited for the
    /// writer lock; give the lock back if so.
    pub(crate) fn recheck_open_as_writer(&self) -> Result<()> {
        if let Err(e) = self.check_open() {
            self.coordinator.release_writer();
            return Err(e);
        }
        Ok(())
    }

    /// Write state at the version after `snapshot`.
    pub(crate) fn begin_write(&self, snapshot: &Snapshot) -> WriteSet {
        self.tables().begin_write(snapshot, snapshot.version + 1)
    }

    /// Commit a write set: journal it, apply it, publish it.
    ///
    /// The synced journal record is the commit point. A failure before it
    /// aborts the write; a failure after it fails the store, and reopening
    /// replays the journal.
    pub(crate) fn commit_write(&self, write: WriteSet) -> Result<Arc<Snapshot>> {
        if let Err(e) = self.check_open() {
            self.abort_write(write)?;
            return Err(e);
        }

        let tables = self.tables();
        let version = write.version;
        let entries = write.journal_entries();
        if let Err(e) = tables.journal.write_commit(&entries, version) {
            warn!(version, error = %e, "journal write failed, aborting");
            self.abort_write(write)?;
            return Err(e);
        }

        let snapshot = match tables.apply_durable(write) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let reason = format!("commit of version {} failed after journaling: {}", version, e);
                self.coordinator.fail(reason.clone());
                return Err(Error::StoreFailed(reason));
            }
        };
        if let Err(e) = tables.journal.truncate() {
            // The metadata already covers this commit; replay skips it.
            warn!(version, error = %e, "could not truncate journal");
        }

        debug!(version, entries = entries.len(), "commit durable");
        Ok(self.coordinator.publish(snapshot))
    }

    pub(crate) fn abort_write(&self, write: WriteSet) -> Result<()> {
        self.tables().abort_write(write)
    }

    /// Free blocks retired before the oldest registered snapshot.
    pub(crate) fn reclaim(&self) {
        let tables = self.tables();
        let freed = self
            .coordinator
            .with_oldest_active(|oldest| tables.reclaim(oldest));
        if freed > 0 {
            debug!(freed, "reclaimed blocks");
        }
    }
}

// ============================================================================
// Store
// ============================================================================

/// A triple/quad store.
///
/// # Example
/// ```
/// use tdb_storage::{Store, StoreParams, Term, TxnType};
/// use tempfile::tempdir;
///
/// let dir = tempdir().unwrap();
/// let alice = Term::iri("http://example.org/alice");
/// {
///     let store = Store::open(dir.path(), StoreParams::default()).unwrap();
///     let mut txn = store.begin(TxnType::Write).unwrap();
///     txn.add_triple_terms(&alice, &Term::iri("http://example.org/age"), &Term::typed_literal("42", tdb_storage::xsd::INTEGER)).unwrap();
///     txn.commit().unwrap();
///     store.close().unwrap();
/// }
///
/// let store = Store::open(dir.path(), StoreParams::default()).unwrap();
/// let txn = store.begin(TxnType::Read).unwrap();
/// let s = txn.get_node_id(&alice).unwrap().unwrap();
/// assert_eq!(txn.find_triples(Some(s), None, None).unwrap().count(), 1);
/// ```
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Open the store in `dir`, creating it if needed, and recover any
    /// journaled commits.
    ///
    /// The block size and index layouts of an existing store come from its
    /// `params.json`; differing values in `params` are ignored with a
    /// warning.
    ///
    /// # Errors
    /// - `Error::Config` for invalid parameters
    /// - `Error::JournalReplay` if the journal cannot be replayed
    /// - `Error::Io` / `Error::CorruptBlock` from reading the files
    pub fn open<P: AsRef<Path>>(dir: P, params: StoreParams) -> Result<Self> {
        let dir = dir.as_ref();
        params.validate()?;
        fs::create_dir_all(dir)?;
        compact::finish_pending(dir)?;
        let params = Self::load_params(dir, params)?;
        info!(location = %dir.display(), "opening store");

        let tables = Self::file_tables(dir, &params)?;
        Self::start(params, Some(dir.to_path_buf()), tables)
    }

    /// Tables over the files in `dir`.
    pub(crate) fn file_tables(dir: &Path, params: &StoreParams) -> Result<Tables> {
        let block_file = |name: &str| -> Result<BlockFile> {
            BlockFile::open(dir.join(name), params.block_size)
        };
        let channel = |name: &str| -> Result<Box<dyn Channel>> {
            Ok(Box::new(FileChannel::open(dir.join(name))?))
        };
        Self::build_tables(
            params,
            &block_file,
            channel(NODE_DATA_FILE)?,
            channel(JOURNAL_FILE)?,
            MetaStore::File(dir.join(META_FILE)),
        )
    }

    /// A store held entirely in memory.
    pub fn memory(params: StoreParams) -> Result<Self> {
        params.validate()?;
        let block_file = |name: &str| -> Result<BlockFile> {
            Ok(BlockFile::memory(name, params.block_size))
        };
        let tables = Self::build_tables(
            &params,
            &block_file,
            Box::new(MemChannel::new(NODE_DATA_FILE)),
            Box::new(MemChannel::new(JOURNAL_FILE)),
            MetaStore::memory(),
        )?;
        Self::start(params, None, tables)
    }

    /// Static parameters: written on creation, read back afterwards.
    fn load_params(dir: &Path, params: StoreParams) -> Result<StoreParams> {
        let path = dir.join(PARAMS_FILE);
        if !path.exists() {
            let json = serde_json::to_string_pretty(&params)
                .map_err(|e| Error::Config(format!("cannot encode parameters: {}", e)))?;
            fs::write(&path, json)?;
            return Ok(params);
        }
        let json = fs::read_to_string(&path)?;
        let stored: StoreParams = serde_json::from_str(&json)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        stored.validate()?;
        if !params.same_layout(&stored) {
            warn!(
                block_size = stored.block_size,
                triple_indexes = ?stored.triple_indexes,
                quad_indexes = ?stored.quad_indexes,
                "ignoring layout parameters that differ from the existing store"
            );
        }
        Ok(params.with_layout_of(&stored))
    }

    fn build_tables(
        params: &StoreParams,
        block_file: &dyn Fn(&str) -> Result<BlockFile>,
        node_log: Box<dyn Channel>,
        journal: Box<dyn Channel>,
        meta: MetaStore,
    ) -> Result<Tables> {
        let tree = |name: &str, factory: RecordFactory| -> Result<BPlusTree> {
            let blocks = BlockManager::new(block_file(name)?, params.block_cache_frames, params.max_blocks);
            BPlusTree::new(blocks, factory)
        };
        let table = |columns: &str, orders: &[String]| -> Result<TupleTable> {
            let factory = TupleIndex::record_factory(columns.len());
            let indexes = orders
                .iter()
                .map(|order| -> Result<TupleIndex> {
                    let map = ColumnMap::new(columns, order)?;
                    let index_tree = tree(&format!("{}.{}", order, INDEX_EXT), factory)?;
                    Ok(TupleIndex::new(map, index_tree))
                })
                .collect::<Result<Vec<_>>>()?;
            TupleTable::new(columns.len(), indexes)
        };

        Ok(Tables {
            nodes: NodeTable::new(
                NodeLog::new(node_log)?,
                tree(NODE_INDEX_FILE, NODE_INDEX_RECORD)?,
                params,
            )?,
            triples: table(TRIPLE_COLUMNS, &params.triple_indexes)?,
            quads: table(QUAD_COLUMNS, &params.quad_indexes)?,
            journal: Journal::new(journal)?,
            meta,
        })
    }

    fn start(params: StoreParams, location: Option<PathBuf>, tables: Tables) -> Result<Self> {
        let snapshot = match tables.meta.load()? {
            None => {
                info!("creating new store");
                tables.bootstrap()?
            }
            Some(meta) => recovery::recover(&tables, &meta)?,
        };
        info!(version = snapshot.version, "store open");

        Ok(Self {
            inner: Arc::new(StoreInner {
                params,
                location,
                tables: RwLock::new(Arc::new(tables)),
                coordinator: Coordinator::new(snapshot),
                closed: AtomicBool::new(false),
            }),
        })
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begin a transaction. A [`TxnType::Write`] waits for the current
    /// writer to finish; readers wait only while exclusive mode is on.
    ///
    /// # Errors
    /// `Error::Transaction` if the store is closed, `Error::StoreFailed`
    /// after a failed commit.
    pub fn begin(&self, kind: TxnType) -> Result<Transaction> {
        self.inner.admit(kind, true)?;
        Ok(Transaction::begin(self.inner.clone(), kind))
    }

    /// Like [`Store::begin`], but `None` instead of waiting for a writer or
    /// for exclusive mode to end.
    pub fn try_begin(&self, kind: TxnType) -> Result<Option<Transaction>> {
        if !self.inner.admit(kind, false)? {
            return Ok(None);
        }
        Ok(Some(Transaction::begin(self.inner.clone(), kind)))
    }

    /// Run `f` in a write transaction, committing if it returns `Ok` and
    /// aborting otherwise.
    pub fn write<T>(&self, f: impl FnOnce(&mut Transaction) -> Result<T>) -> Result<T> {
        let mut txn = self.begin(TxnType::Write)?;
        match f(&mut txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                txn.abort()?;
                Err(e)
            }
        }
    }

    /// Run `f` in a read transaction.
    pub fn read<T>(&self, f: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        let mut txn = self.begin(TxnType::Read)?;
        let value = f(&txn)?;
        txn.end()?;
        Ok(value)
    }

    // ========================================================================
    // Lifecycle and info
    // ========================================================================

    /// Wait for the writer, flush everything and refuse new transactions.
    /// Transactions already running may finish reading.
    pub fn close(&self) -> Result<()> {
        let coordinator = &self.inner.coordinator;
        coordinator.acquire_writer();
        let already = self.inner.closed.swap(true, Ordering::AcqRel);
        let result = if already {
            Ok(())
        } else {
            self.sync()
        };
        coordinator.release_writer();
        if !already {
            info!(version = self.version(), "store closed");
        }
        result
    }

    fn sync(&self) -> Result<()> {
        let tables = self.inner.tables();
        tables.nodes.sync()?;
        tables.triples.sync()?;
        tables.quads.sync()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Latest committed version.
    pub fn version(&self) -> Version {
        self.inner.coordinator.current().version
    }

    pub fn stats(&self) -> TxnStats {
        self.inner.coordinator.stats()
    }

    /// Database directory; `None` for a memory store.
    pub fn location(&self) -> Option<&Path> {
        self.inner.location.as_deref()
    }

    pub fn params(&self) -> &StoreParams {
        &self.inner.params
    }

    /// Number of blocks retired and not yet reclaimed, over all indexes.
    pub fn retired_blocks(&self) -> usize {
        self.inner
            .tables()
            .trees()
            .map(|tree| tree.blocks().retired_count())
            .sum()
    }

    /// Check the structure of every index at the latest version.
    ///
    /// # Errors
    /// `Error::CorruptBlock` naming the first violation found.
    pub fn verify(&self) -> Result<Vec<(String, TreeCheck)>> {
        let coordinator = &self.inner.coordinator;
        coordinator.admit();
        let snapshot = coordinator.register_current();
        let tables = self.inner.tables();
        let roots = std::iter::once(snapshot.node_root)
            .chain(snapshot.triple_roots.iter().copied())
            .chain(snapshot.quad_roots.iter().copied());
        let result = tables
            .trees()
            .zip(roots)
            .map(|(tree, root)| -> Result<(String, TreeCheck)> {
                Ok((tree.blocks().name().to_string(), tree.check(root)?))
            })
            .collect::<Result<Vec<_>>>();
        coordinator.unregister(snapshot.version);
        coordinator.depart();
        result
    }

    // ========================================================================
    // Exclusive mode and compaction
    // ========================================================================

    /// Wait for every running transaction to finish and hold off new ones
    /// until the guard is dropped. Only the guard can begin transactions.
    ///
    /// Must not be called while the calling thread holds a transaction or
    /// has writers blocked, or it never returns.
    pub fn exclusive(&self) -> ExclusiveGuard<'_> {
        self.inner.coordinator.start_exclusive();
        ExclusiveGuard::new(self)
    }

    /// [`Store::exclusive`] if no transaction is running; never waits.
    pub fn try_exclusive(&self) -> Option<ExclusiveGuard<'_>> {
        self.inner
            .coordinator
            .try_exclusive()
            .then(|| ExclusiveGuard::new(self))
    }

    /// Hold the writer lock without a transaction: readers carry on, new
    /// writers wait until the guard is dropped.
    pub fn block_writers(&self) -> WritersBlocked<'_> {
        self.inner.coordinator.acquire_writer();
        WritersBlocked::new(self)
    }

    /// [`Store::block_writers`] if there is no writer; never waits.
    pub fn try_block_writers(&self) -> Option<WritersBlocked<'_>> {
        self.inner
            .coordinator
            .try_acquire_writer()
            .then(|| WritersBlocked::new(self))
    }

    /// Rebuild every index into fresh, fully packed files and switch to
    /// them; free blocks are dropped. Waits for running transactions.
    ///
    /// # Errors
    /// See [`ExclusiveGuard::compact`].
    pub fn compact(&self) -> Result<CompactStats> {
        self.exclusive().compact()
    }

    pub(crate) fn inner(&self) -> &Arc<StoreInner> {
        &self.inner
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("location", &self.inner.location)
            .field("version", &self.version())
            .field("closed", &self.is_closed())
            .finish()
    }
}

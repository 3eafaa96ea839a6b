//! Compaction: rebuild every index at the latest version into packed files
//! and switch the store over to them.
//!
//! The new index files and their metadata are written to [`COMPACT_DIR`].
//! Once they are synced, the [`COMPACT_MARKER`] file commits the
//! compaction: the files are renamed over the live ones (metadata last)
//! and the directory is removed. Opening a store finishes a marked
//! compaction and discards an unmarked one. The node log and the journal
//! are not rewritten.

use std::fs::{self, File};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::buffer::BlockManager;
use crate::common::config::{COMPACT_DIR, COMPACT_MARKER, META_FILE};
use crate::common::{BlockId, Error, Result, Version};
use crate::index::BPlusTree;
use crate::storage::{BlockFile, IndexMeta, MetaStore, StoreMetadata};
use crate::store::{Store, StoreInner};
use crate::transaction::recovery;

/// Outcome of a compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactStats {
    /// Version the indexes were rebuilt at.
    pub version: Version,
    /// Blocks in all index files before.
    pub blocks_before: u64,
    /// Blocks in all index files after.
    pub blocks_after: u64,
}

/// Compact the store in `dir`. The caller holds exclusive mode and the
/// writer lock.
pub(crate) fn compact(inner: &StoreInner, dir: &Path) -> Result<CompactStats> {
    let tmp = dir.join(COMPACT_DIR);
    if tmp.exists() {
        fs::remove_dir_all(&tmp)?;
    }
    fs::create_dir(&tmp)?;

    let stats = match build(inner, &tmp) {
        Ok(stats) => stats,
        Err(e) => {
            warn!(error = %e, "compaction abandoned");
            if let Err(cleanup) = fs::remove_dir_all(&tmp) {
                warn!(error = %cleanup, "could not remove compaction directory");
            }
            return Err(e);
        }
    };

    if let Err(e) = switch(inner, dir) {
        let reason = format!("compaction to version {} did not finish: {}", stats.version, e);
        inner.coordinator.fail(reason.clone());
        return Err(Error::StoreFailed(reason));
    }
    info!(
        version = stats.version,
        blocks_before = stats.blocks_before,
        blocks_after = stats.blocks_after,
        "compaction complete"
    );
    Ok(stats)
}

/// Write the packed indexes, their metadata and the marker into `tmp`.
fn build(inner: &StoreInner, tmp: &Path) -> Result<CompactStats> {
    let tables = inner.tables();
    let snapshot = inner.coordinator.current();
    let params = inner.params();
    let roots = std::iter::once(snapshot.node_root)
        .chain(snapshot.triple_roots.iter().copied())
        .chain(snapshot.quad_roots.iter().copied());

    let mut blocks_before = 0u64;
    let mut blocks_after = 0u64;
    let mut indexes = Vec::with_capacity(tables.tree_count());
    for (tree, root) in tables.trees().zip(roots) {
        let name = tree.blocks().name();
        let blocks = BlockManager::new(
            BlockFile::open(tmp.join(name), params.block_size)?,
            params.block_cache_frames,
            params.max_blocks,
        );
        let packed = BPlusTree::new(blocks, *tree.factory())?;
        let new_root: BlockId = packed.build(tree.iter(root), snapshot.version)?;
        packed.blocks().sync()?;

        let (before, _) = tree.blocks().allocation_state();
        let (block_limit, free) = packed.blocks().allocation_state();
        debug!(file = name, before, after = block_limit, "index rebuilt");
        blocks_before += u64::from(before);
        blocks_after += u64::from(block_limit);
        indexes.push(IndexMeta {
            root: new_root,
            block_limit,
            free,
        });
    }

    MetaStore::File(tmp.join(META_FILE)).store(&StoreMetadata {
        version: snapshot.version,
        node_log_len: snapshot.node_log_len,
        indexes,
    })?;
    File::create(tmp.join(COMPACT_MARKER))?.sync_all()?;
    sync_dir(tmp)?;

    Ok(CompactStats {
        version: snapshot.version,
        blocks_before,
        blocks_after,
    })
}

/// Move the compacted files into place and reopen the tables over them.
fn switch(inner: &StoreInner, dir: &Path) -> Result<()> {
    finish_pending(dir)?;
    let tables = Store::file_tables(dir, inner.params())?;
    let meta = tables
        .meta
        .load()?
        .ok_or_else(|| Error::Config("compacted store has no metadata".into()))?;
    let snapshot = recovery::recover(&tables, &meta)?;
    inner.replace_tables(tables, snapshot);
    Ok(())
}

/// Finish a compaction interrupted after its marker was written, or
/// discard one interrupted before.
pub(crate) fn finish_pending(dir: &Path) -> Result<()> {
    let tmp = dir.join(COMPACT_DIR);
    if !tmp.is_dir() {
        return Ok(());
    }
    if !tmp.join(COMPACT_MARKER).exists() {
        info!(location = %dir.display(), "discarding incomplete compaction");
        fs::remove_dir_all(&tmp)?;
        return Ok(());
    }

    let mut names = Vec::new();
    for entry in fs::read_dir(&tmp)? {
        let name = entry?.file_name();
        if name != COMPACT_MARKER && name != META_FILE {
            names.push(name);
        }
    }
    // Metadata last: it names roots only the new files contain.
    if tmp.join(META_FILE).exists() {
        names.push(META_FILE.into());
    }
    for name in &names {
        fs::rename(tmp.join(name), dir.join(name))?;
    }
    sync_dir(dir)?;
    fs::remove_dir_all(&tmp)?;
    info!(location = %dir.display(), files = names.len(), "compacted files in place");
    Ok(())
}

fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    File::open(dir)?.sync_all()?;
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::StoreParams;
    use crate::node::NodeId;
    use crate::transaction::TxnType;
    use crate::tuple::Tuple;
    use tempfile::tempdir;

    fn create_test_params() -> StoreParams {
        StoreParams::builder()
            .block_size(512)
            .block_cache_frames(32)
            .build()
            .unwrap()
    }

    fn id(n: u64) -> NodeId {
        NodeId::from_offset(n)
    }

    fn fill_and_thin(store: &Store) {
        store
            .write(|txn| {
                for i in 0..600 {
                    txn.add_triple(id(i), id(i % 11), id(i % 17))?;
                }
                Ok(())
            })
            .unwrap();
        store
            .write(|txn| {
                for i in 0..580 {
                    txn.delete_triple(id(i), id(i % 11), id(i % 17))?;
                }
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_compact_shrinks_and_keeps_data() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), create_test_params()).unwrap();
        fill_and_thin(&store);
        let version = store.version();

        let stats = store.compact().unwrap();
        assert_eq!(stats.version, version);
        assert!(stats.blocks_after < stats.blocks_before);
        assert!(!dir.path().join(COMPACT_DIR).exists());
        assert_eq!(store.version(), version);
        for (_, check) in store.verify().unwrap() {
            assert!(check.leaves >= 1);
        }

        let txn = store.begin(TxnType::Read).unwrap();
        let left: Vec<Tuple> = txn
            .find_triples(None, None, None)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(left.len(), 20);
        assert!(left.contains(&Tuple::triple(id(590), id(590 % 11), id(590 % 17))));
        drop(txn);

        // Writes continue on the compacted files.
        store.write(|txn| txn.add_triple(id(1), id(1), id(1))).unwrap();
        store.close().unwrap();
        drop(store);

        let store = Store::open(dir.path(), create_test_params()).unwrap();
        assert_eq!(store.version(), version + 1);
        let txn = store.begin(TxnType::Read).unwrap();
        assert_eq!(txn.find_triples(None, None, None).unwrap().count(), 21);
    }

    #[test]
    fn test_memory_store_refuses_compaction() {
        let store = Store::memory(create_test_params()).unwrap();
        assert!(matches!(store.compact(), Err(Error::Config(_))));
        // The guard was dropped, transactions start again.
        assert!(store.try_begin(TxnType::Read).unwrap().is_some());
    }

    #[test]
    fn test_compact_refused_while_guard_transaction_runs() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), create_test_params()).unwrap();
        let guard = store.exclusive();
        let txn = guard.begin(TxnType::Read).unwrap();
        assert!(matches!(guard.compact(), Err(Error::Transaction(_))));
        drop(txn);
        assert!(guard.compact().is_ok());
    }

    #[test]
    fn test_marked_compaction_finished_at_open() {
        let dir = tempdir().unwrap();
        {
            let store = Store::open(dir.path(), create_test_params()).unwrap();
            fill_and_thin(&store);
            let guard = store.exclusive();
            store.inner().coordinator.acquire_writer();
            let tmp = dir.path().join(COMPACT_DIR);
            fs::create_dir(&tmp).unwrap();
            build(store.inner(), &tmp).unwrap();
            store.inner().coordinator.release_writer();
            drop(guard);
            // Crash before the files are moved.
        }
        assert!(dir.path().join(COMPACT_DIR).join(COMPACT_MARKER).exists());

        let store = Store::open(dir.path(), create_test_params()).unwrap();
        assert!(!dir.path().join(COMPACT_DIR).exists());
        let txn = store.begin(TxnType::Read).unwrap();
        assert_eq!(txn.find_triples(None, None, None).unwrap().count(), 20);
    }

    #[test]
    fn test_unmarked_compaction_discarded_at_open() {
        let dir = tempdir().unwrap();
        {
            let store = Store::open(dir.path(), create_test_params()).unwrap();
            store.write(|txn| txn.add_triple(id(1), id(2), id(3))).unwrap();
            store.close().unwrap();
        }
        let tmp = dir.path().join(COMPACT_DIR);
        fs::create_dir(&tmp).unwrap();
        fs::write(tmp.join("SPO.idx"), b"half written").unwrap();

        let store = Store::open(dir.path(), create_test_params()).unwrap();
        assert!(!tmp.exists());
        let txn = store.begin(TxnType::Read).unwrap();
        assert_eq!(txn.find_triples(None, None, None).unwrap().count(), 1);
    }
}

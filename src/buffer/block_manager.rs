//! Block Manager - block caching, allocation and reclamation.
//!
//! The [`BlockManager`] provides:
//! - Block caching between a [`BlockFile`] and memory
//! - Pin-based reference counting
//! - Dirty block write-back, with checksums stamped on the way out
//! - Block allocation from a free list, and generation-based reclamation
//!   of blocks superseded by copy-on-write

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::Ordering;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::buffer::replacer::LruReplacer;
use crate::buffer::{CacheStats, Frame, PageReadGuard, PageWriteGuard};
use crate::common::{BlockId, Error, FrameId, Result, Version};
use crate::storage::page::{Page, PageType};
use crate::storage::BlockFile;

/// Block allocation state.
struct Allocator {
    /// One past the highest block id handed out.
    limit: u32,
    /// Blocks available for reuse (LIFO).
    free: Vec<BlockId>,
    /// Allocated blocks whose content has never been loaded; a cache miss
    /// on one of these yields a zeroed page instead of a read.
    fresh: HashSet<BlockId>,
    /// Blocks superseded by the commit of a version, awaiting reclamation.
    retired: BTreeMap<Version, Vec<BlockId>>,
}

/// Manages a pool of frames caching the blocks of one file.
///
/// # Architecture
/// ```text
/// ┌─────────────────────────────────────────────────────────────┐
/// │                       BlockManager                          │
/// │  ┌──────────────┐  ┌───────────────────────────────────┐   │
/// │  │ page_table   │  │        frames: Vec<Frame>         │   │
/// │  │BlockId → Fid │─▶│  [Frame0] [Frame1] [Frame2] ...   │   │
/// │  └──────────────┘  └───────────────────────────────────┘   │
/// │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
/// │  │ free_frames  │  │   replacer   │  │  allocator   │      │
/// │  │ Vec<FrameId> │  │ LruReplacer  │  │ limit, free  │      │
/// │  └──────────────┘  └──────────────┘  └──────────────┘      │
/// │                    ┌──────────────┐                         │
/// │                    │  BlockFile   │                         │
/// │                    └──────────────┘                         │
/// └─────────────────────────────────────────────────────────────┘
/// ```
///
/// # Thread Safety
/// - `page_table`: `RwLock`. Cache hits pin under the read lock; eviction
///   re-checks the pin count under the write lock, so a frame pinned after
///   the replacer chose it is never torn away.
/// - `free_frames`, `replacer`, `allocator`: `Mutex`
/// - `frames`: No lock, fixed size, each Frame has internal locks
/// - `file`: the channel serializes its own I/O
/// - `stats`: atomic counters
///
/// Lock order is `page_table` before `replacer`; `allocator` is never held
/// while taking another lock.
///
/// # Usage
/// ```ignore
/// let manager = BlockManager::new(BlockFile::memory("SPO.idx", 4096), 64, None);
///
/// let mut guard = manager.new_block()?;
/// guard.as_mut_slice()[100] = 0xAB;
/// let id = guard.block_id();
/// drop(guard); // marked dirty, unpinned
///
/// let guard = manager.get(id)?;
/// ```
pub struct BlockManager {
    frames: Vec<Frame>,
    page_table: RwLock<HashMap<BlockId, FrameId>>,
    free_frames: Mutex<Vec<FrameId>>,
    replacer: Mutex<LruReplacer>,
    allocator: Mutex<Allocator>,
    file: BlockFile,
    stats: CacheStats,
    pool_size: usize,
    max_blocks: u32,
}

impl BlockManager {
    /// Create a block manager over `file` with `pool_size` frames.
    ///
    /// Allocation starts at block 0; call [`BlockManager::restore`] to
    /// resume from persisted state.
    ///
    /// # Panics
    /// Panics if `pool_size` is 0.
    pub fn new(file: BlockFile, pool_size: usize, max_blocks: Option<u32>) -> Self {
        assert!(pool_size > 0, "pool_size must be > 0");

        let frames: Vec<Frame> = (0..pool_size)
            .map(|_| Frame::new(file.block_size()))
            .collect();
        let free_frames: Vec<FrameId> = (0..pool_size).map(FrameId::new).collect();

        Self {
            frames,
            page_table: RwLock::new(HashMap::new()),
            free_frames: Mutex::new(free_frames),
            replacer: Mutex::new(LruReplacer::new()),
            allocator: Mutex::new(Allocator {
                limit: 0,
                free: Vec::new(),
                fresh: HashSet::new(),
                retired: BTreeMap::new(),
            }),
            file,
            stats: CacheStats::new(),
            pool_size,
            // Ids stop below u32::MAX, which is BlockId::INVALID
            max_blocks: max_blocks.unwrap_or(u32::MAX),
        }
    }

    // ========================================================================
    // Public API: Access blocks
    // ========================================================================

    /// Get a block for reading (shared access).
    ///
    /// # Errors
    /// - `Error::CorruptBlock` if the block fails its checksum or type check
    /// - `Error::NoFreeFrames` if all frames are pinned
    pub fn get(&self, block_id: BlockId) -> Result<PageReadGuard<'_>> {
        let frame_id = self.fetch_internal(block_id)?;
        let lock = self.frames[frame_id.0].page();

        Ok(PageReadGuard::new(self, frame_id, block_id, lock))
    }

    /// Get a block for update (exclusive access).
    ///
    /// The block is marked dirty when the guard drops.
    ///
    /// # Errors
    /// Same as [`BlockManager::get`].
    pub fn get_for_update(&self, block_id: BlockId) -> Result<PageWriteGuard<'_>> {
        let frame_id = self.fetch_internal(block_id)?;
        let lock = self.frames[frame_id.0].page_mut();

        Ok(PageWriteGuard::new(self, frame_id, block_id, lock))
    }

    // ========================================================================
    // Public API: Allocate and free blocks
    // ========================================================================

    /// Allocate a block id, reusing a free block if there is one.
    ///
    /// # Errors
    /// `Error::OutOfSpace` once the block id space (or the configured
    /// maximum) is exhausted.
    pub fn allocate(&self) -> Result<BlockId> {
        let mut alloc = self.allocator.lock();
        let block_id = match alloc.free.pop() {
            Some(id) => id,
            None => {
                if alloc.limit >= self.max_blocks {
                    return Err(Error::OutOfSpace(format!(
                        "{}: block limit {} reached",
                        self.file.name(),
                        self.max_blocks
                    )));
                }
                let id = BlockId::new(alloc.limit);
                alloc.limit += 1;
                id
            }
        };
        alloc.fresh.insert(block_id);
        Ok(block_id)
    }

    /// Allocate a block and return it zeroed, pinned for update.
    pub fn new_block(&self) -> Result<PageWriteGuard<'_>> {
        let block_id = self.allocate()?;
        match self.get_for_update(block_id) {
            Ok(guard) => Ok(guard),
            Err(err) => {
                let mut alloc = self.allocator.lock();
                alloc.fresh.remove(&block_id);
                alloc.free.push(block_id);
                Err(err)
            }
        }
    }

    /// Return a block for immediate reuse, dropping any cached copy.
    ///
    /// # Errors
    /// `Error::Transaction` if the block is still pinned.
    pub fn free(&self, block_id: BlockId) -> Result<()> {
        if !self.discard(block_id) {
            return Err(Error::Transaction(format!(
                "{} of {} freed while pinned",
                block_id,
                self.file.name()
            )));
        }
        let mut alloc = self.allocator.lock();
        alloc.fresh.remove(&block_id);
        alloc.free.push(block_id);
        Ok(())
    }

    /// Record blocks superseded by the commit of `version`.
    ///
    /// Snapshots older than `version` may still read them.
    pub fn retire(&self, version: Version, blocks: Vec<BlockId>) {
        if blocks.is_empty() {
            return;
        }
        self.allocator
            .lock()
            .retired
            .entry(version)
            .or_default()
            .extend(blocks);
    }

    /// Move retired blocks no active snapshot can see onto the free list.
    ///
    /// `oldest_active` is the version of the oldest snapshot still in use,
    /// `None` if there is none. Returns the number of blocks reclaimed.
    pub fn reclaim(&self, oldest_active: Option<Version>) -> usize {
        let ready: Vec<BlockId> = {
            let mut alloc = self.allocator.lock();
            let kept = match oldest_active {
                Some(oldest) => alloc.retired.split_off(&(oldest + 1)),
                None => BTreeMap::new(),
            };
            let ready = std::mem::replace(&mut alloc.retired, kept);
            ready.into_values().flatten().collect()
        };
        if ready.is_empty() {
            return 0;
        }

        for &block_id in &ready {
            // Nothing can reach these blocks any more, so nothing pins them.
            self.discard(block_id);
        }
        let count = ready.len();
        self.allocator.lock().free.extend(ready);
        self.stats
            .blocks_reclaimed
            .fetch_add(count as u64, Ordering::Relaxed);
        trace!(file = self.file.name(), count, "reclaimed blocks");
        count
    }

    /// Reset allocation to persisted state. Retired blocks are forgotten.
    pub fn restore(&self, limit: u32, free: Vec<BlockId>) {
        let mut alloc = self.allocator.lock();
        alloc.limit = limit;
        alloc.free = free;
        alloc.fresh.clear();
        alloc.retired.clear();
    }

    /// Current block limit and free list, for persisting.
    pub fn allocation_state(&self) -> (u32, Vec<BlockId>) {
        let alloc = self.allocator.lock();
        (alloc.limit, alloc.free.clone())
    }

    /// Block limit and free list to persist with a commit. No snapshot
    /// survives a restart, so retired blocks, and `superseded` (blocks the
    /// commit is about to retire), are persisted as free.
    pub fn durable_allocation(&self, superseded: &[BlockId]) -> (u32, Vec<BlockId>) {
        let alloc = self.allocator.lock();
        let mut free = alloc.free.clone();
        free.extend(alloc.retired.values().flatten().copied());
        free.extend_from_slice(superseded);
        (alloc.limit, free)
    }

    /// Number of blocks awaiting reclamation.
    pub fn retired_count(&self) -> usize {
        self.allocator.lock().retired.values().map(Vec::len).sum()
    }

    // ========================================================================
    // Public API: Flush
    // ========================================================================

    /// Write a block back if it is cached and dirty.
    pub fn flush_block(&self, block_id: BlockId) -> Result<()> {
        let frame_id = match self.page_table.read().get(&block_id) {
            Some(&fid) => fid,
            None => return Ok(()),
        };
        self.flush_frame(frame_id, block_id)
    }

    /// Write back every dirty block.
    pub fn flush_all(&self) -> Result<()> {
        let blocks: Vec<(BlockId, FrameId)> = {
            let pt = self.page_table.read();
            pt.iter().map(|(&bid, &fid)| (bid, fid)).collect()
        };

        for (block_id, frame_id) in blocks {
            self.flush_frame(frame_id, block_id)?;
        }
        Ok(())
    }

    /// Force all dirty blocks to durable storage.
    pub fn sync(&self) -> Result<()> {
        self.flush_all()?;
        self.file.sync()?;
        debug!(file = self.file.name(), "synced");
        Ok(())
    }

    // ========================================================================
    // Public API: Stats and info
    // ========================================================================

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn block_size(&self) -> usize {
        self.file.block_size()
    }

    pub fn name(&self) -> &str {
        self.file.name()
    }

    pub fn free_frame_count(&self) -> usize {
        self.free_frames.lock().len()
    }

    /// Number of blocks currently cached.
    pub fn cached_count(&self) -> usize {
        self.page_table.read().len()
    }

    // ========================================================================
    // Internal: Called by guards on drop
    // ========================================================================

    pub(crate) fn unpin_internal(&self, frame_id: FrameId, is_dirty: bool) {
        let frame = &self.frames[frame_id.0];

        if is_dirty {
            frame.mark_dirty();
        }

        if frame.unpin() == 0 {
            self.replacer.lock().set_evictable(frame_id, true);
        }
    }

    // ========================================================================
    // Internal: Core fetch logic
    // ========================================================================

    fn fetch_internal(&self, block_id: BlockId) -> Result<FrameId> {
        {
            let pt = self.page_table.read();
            if let Some(&frame_id) = pt.get(&block_id) {
                self.handle_cache_hit(frame_id);
                return Ok(frame_id);
            }
        }

        self.handle_cache_miss(block_id)
    }

    /// Pin the frame and update the replacer. Callers hold a page table lock.
    fn handle_cache_hit(&self, frame_id: FrameId) {
        self.frames[frame_id.0].pin();

        {
            let mut replacer = self.replacer.lock();
            replacer.record_access(frame_id);
            replacer.set_evictable(frame_id, false);
        }

        self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn handle_cache_miss(&self, block_id: BlockId) -> Result<FrameId> {
        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);

        let (fresh, limit) = {
            let mut alloc = self.allocator.lock();
            (alloc.fresh.remove(&block_id), alloc.limit)
        };
        let loaded = if fresh {
            None
        } else if block_id.0 >= limit {
            return Err(Error::corrupt(
                self.file.name(),
                block_id.0 as u64,
                format!("block beyond allocation limit {}", limit),
            ));
        } else {
            Some(self.read_verified(block_id)?)
        };

        let frame_id = match self.get_free_frame() {
            Ok(fid) => fid,
            Err(err) => {
                if fresh {
                    self.allocator.lock().fresh.insert(block_id);
                }
                return Err(err);
            }
        };
        let frame = &self.frames[frame_id.0];
        {
            let mut page = frame.page_mut();
            match &loaded {
                Some(data) => page.copy_from(data),
                None => page.reset(),
            }
        }

        let mut pt = self.page_table.write();
        if let Some(&existing) = pt.get(&block_id) {
            // Another thread loaded the same block meanwhile.
            self.handle_cache_hit(existing);
            drop(pt);
            self.free_frames.lock().push(frame_id);
            return Ok(existing);
        }

        frame.set_block_id(Some(block_id));
        if fresh {
            frame.mark_dirty();
        }
        frame.pin();
        pt.insert(block_id, frame_id);
        {
            let mut replacer = self.replacer.lock();
            replacer.record_access(frame_id);
            replacer.set_evictable(frame_id, false);
        }

        Ok(frame_id)
    }

    fn read_verified(&self, block_id: BlockId) -> Result<Page> {
        let page = self.file.read_block(block_id)?;
        self.stats.blocks_read.fetch_add(1, Ordering::Relaxed);

        if !page.verify_checksum() {
            return Err(Error::corrupt(
                self.file.name(),
                block_id.0 as u64,
                "checksum mismatch",
            ));
        }
        if page.header().page_type == PageType::Invalid {
            return Err(Error::corrupt(
                self.file.name(),
                block_id.0 as u64,
                "invalid page type",
            ));
        }
        Ok(page)
    }

    // ========================================================================
    // Internal: Frame allocation and eviction
    // ========================================================================

    fn get_free_frame(&self) -> Result<FrameId> {
        if let Some(frame_id) = self.free_frames.lock().pop() {
            return Ok(frame_id);
        }
        self.evict_frame()
    }

    fn evict_frame(&self) -> Result<FrameId> {
        loop {
            let frame_id = self
                .replacer
                .lock()
                .evict()
                .ok_or_else(|| Error::NoFreeFrames(self.file.name().to_string()))?;
            let frame = &self.frames[frame_id.0];

            let mut pt = self.page_table.write();
            if frame.is_pinned() {
                // Pinned by a hit after the replacer chose it; that hit
                // re-registered the frame with the replacer.
                continue;
            }

            if let Some(old) = frame.block_id() {
                if let Err(err) = self.flush_frame(frame_id, old) {
                    let mut replacer = self.replacer.lock();
                    replacer.record_access(frame_id);
                    replacer.set_evictable(frame_id, true);
                    return Err(err);
                }
                pt.remove(&old);
                trace!(file = self.file.name(), block = old.0, "evicted");
            }
            drop(pt);

            frame.clear();
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            return Ok(frame_id);
        }
    }

    /// Drop a cached block without writing it. Returns false if pinned.
    fn discard(&self, block_id: BlockId) -> bool {
        let frame_id = {
            let mut pt = self.page_table.write();
            let Some(&frame_id) = pt.get(&block_id) else {
                return true;
            };
            if self.frames[frame_id.0].is_pinned() {
                return false;
            }
            pt.remove(&block_id);
            self.frames[frame_id.0].clear();
            self.replacer.lock().remove(frame_id);
            frame_id
        };
        self.free_frames.lock().push(frame_id);
        true
    }

    /// Write a frame back if dirty, stamping the page checksum.
    fn flush_frame(&self, frame_id: FrameId, block_id: BlockId) -> Result<()> {
        let frame = &self.frames[frame_id.0];
        if !frame.is_dirty() {
            return Ok(());
        }

        let mut page = frame.page_mut();
        // The frame may have been evicted and reused since the caller
        // looked it up.
        if frame.block_id() != Some(block_id) || !frame.is_dirty() {
            return Ok(());
        }
        page.update_checksum();
        self.file.write_block(block_id, &page)?;
        frame.clear_dirty();
        drop(page);

        self.stats.blocks_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::PageHeader;
    use tempfile::tempdir;

    const BS: usize = 512;

    /// Helper to create a manager over an in-memory block file.
    fn create_test_manager(pool_size: usize) -> BlockManager {
        BlockManager::new(BlockFile::memory("test.idx", BS), pool_size, None)
    }

    /// Allocate a block holding a valid leaf header and `marker` at byte 100.
    fn new_leaf(manager: &BlockManager, marker: u8) -> BlockId {
        let mut guard = manager.new_block().unwrap();
        guard.set_header(&PageHeader::new(PageType::BTreeLeaf, 1));
        guard.as_mut_slice()[100] = marker;
        guard.block_id()
    }

    #[test]
    fn test_new_block() {
        let manager = create_test_manager(10);

        let guard = manager.new_block().unwrap();
        assert_eq!(guard.block_id(), BlockId::new(0));
        assert!(guard.as_slice().iter().all(|&b| b == 0));
        drop(guard);

        let guard = manager.new_block().unwrap();
        assert_eq!(guard.block_id(), BlockId::new(1));
    }

    #[test]
    fn test_get_and_update() {
        let manager = create_test_manager(10);
        let id = new_leaf(&manager, 0xAB);

        assert_eq!(manager.get(id).unwrap().as_slice()[100], 0xAB);

        {
            let mut guard = manager.get_for_update(id).unwrap();
            guard.as_mut_slice()[100] = 0xCD;
        }
        assert_eq!(manager.get(id).unwrap().as_slice()[100], 0xCD);
    }

    #[test]
    fn test_cache_hit() {
        let manager = create_test_manager(10);
        let id = new_leaf(&manager, 1);

        manager.get(id).unwrap().release();
        manager.get(id).unwrap().release();

        assert!(manager.stats().snapshot().cache_hits >= 2);
    }

    #[test]
    fn test_eviction() {
        let manager = create_test_manager(3);
        for i in 0..3 {
            new_leaf(&manager, i);
        }
        assert_eq!(manager.free_frame_count(), 0);

        let id = new_leaf(&manager, 3);
        assert_eq!(id, BlockId::new(3));
        assert_eq!(manager.stats().snapshot().evictions, 1);
    }

    #[test]
    fn test_dirty_block_flushed_on_eviction() {
        let manager = create_test_manager(1);

        let first = new_leaf(&manager, 0x42);
        // Evicts the first block, which must be written back first
        new_leaf(&manager, 0x43);

        let guard = manager.get(first).unwrap();
        assert_eq!(guard.as_slice()[100], 0x42);
        assert!(guard.verify_checksum());
    }

    #[test]
    fn test_lru_keeps_hot_block() {
        let manager = create_test_manager(2);
        let hot = new_leaf(&manager, 1);
        new_leaf(&manager, 2);

        manager.get(hot).unwrap().release();
        new_leaf(&manager, 3);

        // The hot block survived; the cold one was evicted.
        let before = manager.stats().snapshot().cache_misses;
        manager.get(hot).unwrap().release();
        assert_eq!(manager.stats().snapshot().cache_misses, before);
    }

    #[test]
    fn test_no_free_frames() {
        let manager = create_test_manager(2);

        let _guard1 = manager.new_block().unwrap();
        let _guard2 = manager.new_block().unwrap();

        let result = manager.new_block();
        assert!(matches!(result, Err(Error::NoFreeFrames(_))));

        // The id handed out for the failed call is reusable
        drop(_guard1);
        assert_eq!(manager.new_block().unwrap().block_id(), BlockId::new(2));
    }

    #[test]
    fn test_pin_count_tracking() {
        let manager = create_test_manager(10);
        let id = new_leaf(&manager, 1);

        let guard = manager.get(id).unwrap();
        let frame = &manager.frames[guard.frame_id().0];
        assert_eq!(frame.pin_count(), 1);
        assert!(!frame.is_evictable());

        guard.release();
        assert_eq!(frame.pin_count(), 0);
        assert!(frame.is_evictable());
    }

    #[test]
    fn test_free_reuses_block() {
        let manager = create_test_manager(10);
        let a = new_leaf(&manager, 1);
        let _b = new_leaf(&manager, 2);

        manager.free(a).unwrap();
        assert_eq!(manager.cached_count(), 1);

        let guard = manager.new_block().unwrap();
        assert_eq!(guard.block_id(), a);
        // Reused blocks come back zeroed, not with stale content
        assert_eq!(guard.as_slice()[100], 0);
    }

    #[test]
    fn test_free_pinned_fails() {
        let manager = create_test_manager(10);
        let guard = manager.new_block().unwrap();
        assert!(manager.free(guard.block_id()).is_err());
    }

    #[test]
    fn test_retire_and_reclaim() {
        let manager = create_test_manager(10);
        let a = new_leaf(&manager, 1);
        let b = new_leaf(&manager, 2);
        let c = new_leaf(&manager, 3);

        manager.retire(2, vec![a]);
        manager.retire(3, vec![b, c]);
        assert_eq!(manager.retired_count(), 3);

        // A reader on version 1 can still see everything
        assert_eq!(manager.reclaim(Some(1)), 0);
        // A reader on version 2 no longer needs blocks retired at 2
        assert_eq!(manager.reclaim(Some(2)), 1);
        assert_eq!(manager.allocation_state().1, vec![a]);
        // After a restart the retired blocks are free as well
        let d = BlockId(9);
        assert_eq!(manager.durable_allocation(&[d]), (3, vec![a, b, c, d]));
        // No readers
        assert_eq!(manager.reclaim(None), 2);
        assert_eq!(manager.retired_count(), 0);
        assert_eq!(manager.stats().snapshot().blocks_reclaimed, 3);
    }

    #[test]
    fn test_out_of_space() {
        let manager = BlockManager::new(BlockFile::memory("tiny", BS), 8, Some(2));
        manager.allocate().unwrap();
        manager.allocate().unwrap();
        assert!(matches!(manager.allocate(), Err(Error::OutOfSpace(_))));
    }

    #[test]
    fn test_corrupt_block_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.idx");

        let id = {
            let manager = BlockManager::new(BlockFile::open(&path, BS).unwrap(), 4, None);
            let id = new_leaf(&manager, 9);
            manager.sync().unwrap();
            id
        };

        // Flip a byte behind the manager's back
        {
            let file = BlockFile::open(&path, BS).unwrap();
            let mut page = file.read_block(id).unwrap();
            page.as_mut_slice()[200] ^= 0xFF;
            file.write_block(id, &page).unwrap();
        }

        let manager = BlockManager::new(BlockFile::open(&path, BS).unwrap(), 4, None);
        manager.restore(1, vec![]);
        let result = manager.get(id);
        assert!(matches!(result, Err(Error::CorruptBlock { block: 0, .. })));
    }

    #[test]
    fn test_persistence_with_restore() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("p.idx");

        let state = {
            let manager = BlockManager::new(BlockFile::open(&path, BS).unwrap(), 4, None);
            for i in 0..10 {
                new_leaf(&manager, i);
            }
            manager.free(BlockId::new(4)).unwrap();
            manager.sync().unwrap();
            manager.allocation_state()
        };
        assert_eq!(state, (10, vec![BlockId::new(4)]));

        let manager = BlockManager::new(BlockFile::open(&path, BS).unwrap(), 4, None);
        manager.restore(state.0, state.1);
        assert_eq!(manager.get(BlockId::new(7)).unwrap().as_slice()[100], 7);
        assert_eq!(manager.allocate().unwrap(), BlockId::new(4));
        assert_eq!(manager.allocate().unwrap(), BlockId::new(10));
    }

    #[test]
    fn test_read_beyond_limit_is_corrupt() {
        let manager = create_test_manager(4);
        assert!(matches!(
            manager.get(BlockId::new(5)),
            Err(Error::CorruptBlock { .. })
        ));
    }

    #[test]
    fn test_concurrent_reads() {
        use std::sync::Arc;
        use std::thread;

        let manager = Arc::new(create_test_manager(12));
        let ids: Vec<BlockId> = (0..16).map(|i| new_leaf(&manager, i)).collect();
        manager.flush_all().unwrap();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let manager = Arc::clone(&manager);
                let ids = ids.clone();
                thread::spawn(move || {
                    for round in 0..50 {
                        let i = (t * 7 + round) % ids.len();
                        let guard = manager.get(ids[i]).unwrap();
                        assert_eq!(guard.as_slice()[100], i as u8);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}

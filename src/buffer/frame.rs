//! Cache slots of a [`BlockManager`](crate::buffer::BlockManager).

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::BlockId;
use crate::storage::page::Page;

/// One cached block of an index file.
///
/// Readers of any snapshot share a frame. Only the writer that allocated a
/// block writes to it, so a dirty frame always holds a block of the
/// version being committed; it reaches disk at the latest when that commit
/// syncs the file.
pub struct Frame {
    page: RwLock<Page>,
    block_id: Mutex<Option<BlockId>>,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
}

impl Frame {
    /// Create a new empty frame holding a zeroed page of `block_size` bytes.
    pub fn new(block_size: usize) -> Self {
        Self {
            page: RwLock::new(Page::new(block_size)),
            block_id: Mutex::new(None),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }

    // ========================================================================
    // Contents
    // ========================================================================

    #[inline]
    pub fn page(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    #[inline]
    pub fn page_mut(&self) -> RwLockWriteGuard<'_, Page> {
        self.page.write()
    }

    // ========================================================================
    // Which block
    // ========================================================================

    #[inline]
    pub fn block_id(&self) -> Option<BlockId> {
        *self.block_id.lock()
    }

    #[inline]
    pub fn set_block_id(&self, block_id: Option<BlockId>) {
        *self.block_id.lock() = block_id;
    }

    // ========================================================================
    // Pins
    // ========================================================================

    /// One more guard or iterator step holds the block. Returns the pins.
    #[inline]
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns the pins left.
    ///
    /// # Panics
    /// If the frame is not pinned.
    #[inline]
    pub fn unpin(&self) -> u32 {
        let old = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        assert!(old > 0, "pin count underflow");
        old - 1
    }

    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    // ========================================================================
    // Write-back
    // ========================================================================

    #[inline]
    pub fn mark_dirty(&self) {
        self.is_dirty.store(true, Ordering::Release);
    }

    #[inline]
    pub fn clear_dirty(&self) {
        self.is_dirty.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.block_id().is_none()
    }

    /// Loaded and unpinned.
    #[inline]
    pub fn is_evictable(&self) -> bool {
        self.block_id().is_some() && !self.is_pinned()
    }

    /// Forget the loaded block without touching the page bytes.
    pub fn clear(&self) {
        self.set_block_id(None);
        self.clear_dirty();
    }
}

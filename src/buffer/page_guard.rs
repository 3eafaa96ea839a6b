//! Pinned access to cached blocks.
//!
//! A B+Tree node is read through a [`PageReadGuard`] and written, by the
//! writer that owns its generation, through a [`PageWriteGuard`]. The
//! frame stays pinned, and cannot be evicted, until the guard goes.

use std::ops::{Deref, DerefMut};

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use super::block_manager::BlockManager;
use crate::common::{BlockId, FrameId};
use crate::storage::page::Page;

/// Shared access to a block, from [`BlockManager::get`].
pub struct PageReadGuard<'a> {
    manager: &'a BlockManager,
    frame_id: FrameId,
    block_id: BlockId,
    lock: RwLockReadGuard<'a, Page>,
}

impl<'a> PageReadGuard<'a> {
    pub(crate) fn new(
        manager: &'a BlockManager,
        frame_id: FrameId,
        block_id: BlockId,
        lock: RwLockReadGuard<'a, Page>,
    ) -> Self {
        Self {
            manager,
            frame_id,
            block_id,
            lock,
        }
    }

    #[inline]
    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Unpin now rather than at the end of the scope.
    pub fn release(self) {}
}

impl Deref for PageReadGuard<'_> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        &self.lock
    }
}

impl Drop for PageReadGuard<'_> {
    fn drop(&mut self) {
        self.manager.unpin_internal(self.frame_id, false);
    }
}

/// Sole access to a block, from [`BlockManager::get_for_update`] or
/// [`BlockManager::new_block`]. Dropping it marks the frame dirty.
pub struct PageWriteGuard<'a> {
    manager: &'a BlockManager,
    frame_id: FrameId,
    block_id: BlockId,
    lock: RwLockWriteGuard<'a, Page>,
}

impl<'a> PageWriteGuard<'a> {
    pub(crate) fn new(
        manager: &'a BlockManager,
        frame_id: FrameId,
        block_id: BlockId,
        lock: RwLockWriteGuard<'a, Page>,
    ) -> Self {
        Self {
            manager,
            frame_id,
            block_id,
            lock,
        }
    }

    #[inline]
    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Unpin now rather than at the end of the scope.
    pub fn release(self) {}
}

impl Deref for PageWriteGuard<'_> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        &self.lock
    }
}

impl DerefMut for PageWriteGuard<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Page {
        &mut self.lock
    }
}

impl Drop for PageWriteGuard<'_> {
    fn drop(&mut self) {
        self.manager.unpin_internal(self.frame_id, true);
    }
}

//! LRU (Least Recently Used) replacement policy.

use std::collections::{BTreeMap, HashMap};

use crate::common::FrameId;

/// Evicts the evictable frame whose last access is oldest.
///
/// Every access stamps the frame with a logical clock. Evictable frames are
/// kept in a `BTreeMap` ordered by that stamp, so eviction is `O(log n)`.
/// Pinned frames are absent from the map and are never chosen.
pub struct LruReplacer {
    /// Logical clock, bumped on every access.
    clock: u64,

    /// Last access stamp of every tracked frame.
    stamps: HashMap<FrameId, u64>,

    /// Evictable frames keyed by last access (first = least recent).
    evictable: BTreeMap<u64, FrameId>,
}

impl LruReplacer {
    pub fn new() -> Self {
        Self {
            clock: 0,
            stamps: HashMap::new(),
            evictable: BTreeMap::new(),
        }
    }

    /// Record that a frame was accessed.
    pub fn record_access(&mut self, frame_id: FrameId) {
        self.clock += 1;
        let stamp = self.clock;
        if let Some(old) = self.stamps.insert(frame_id, stamp) {
            if self.evictable.remove(&old).is_some() {
                self.evictable.insert(stamp, frame_id);
            }
        }
    }

    /// Mark a frame as evictable (pin count dropped to 0) or not.
    pub fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        let Some(&stamp) = self.stamps.get(&frame_id) else {
            return;
        };
        if evictable {
            self.evictable.insert(stamp, frame_id);
        } else {
            self.evictable.remove(&stamp);
        }
    }

    /// Select a victim frame for eviction.
    ///
    /// Returns the least recently used evictable frame, or None if all
    /// frames are pinned.
    pub fn evict(&mut self) -> Option<FrameId> {
        let (_, frame_id) = self.evictable.pop_first()?;
        self.stamps.remove(&frame_id);
        Some(frame_id)
    }

    /// Stop tracking a frame entirely.
    pub fn remove(&mut self, frame_id: FrameId) {
        if let Some(stamp) = self.stamps.remove(&frame_id) {
            self.evictable.remove(&stamp);
        }
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.evictable.len()
    }
}

impl Default for LruReplacer {
    fn default() -> Self {
        Self::new()
    }
}

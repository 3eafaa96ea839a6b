//! Block File - fixed-size block I/O over a [`Channel`].
//!
//! The [`BlockFile`] handles all direct block operations:
//! - Reading and writing blocks
//! - Reporting how many blocks the channel holds
//! - Forcing blocks to durable storage

use std::path::Path;

use crate::common::{BlockId, Error, Result};
use crate::storage::channel::{Channel, FileChannel, MemChannel};
use crate::storage::page::Page;

/// Fixed-size block access to a single channel.
///
/// # Layout
/// Blocks are laid out sequentially:
/// ```text
/// ┌─────────┬─────────┬─────────┬─────────┬─────────┐
/// │ Block 0 │ Block 1 │ Block 2 │  ...    │ Block N │
/// └─────────┴─────────┴─────────┴─────────┴─────────┘
/// Offset:  0       bs       2×bs     ...     N×bs
/// ```
///
/// Block N is located at offset `N × block_size`.
///
/// # Durability
/// Writes are not synced individually. [`BlockFile::sync`] is the
/// durability point and is called once per commit.
pub struct BlockFile {
    channel: Box<dyn Channel>,
    block_size: usize,
}

impl BlockFile {
    pub fn new(channel: Box<dyn Channel>, block_size: usize) -> Self {
        Self {
            channel,
            block_size,
        }
    }

    /// Open (or create) a block file on disk.
    pub fn open<P: AsRef<Path>>(path: P, block_size: usize) -> Result<Self> {
        Ok(Self::new(Box::new(FileChannel::open(path)?), block_size))
    }

    /// Create an in-memory block file.
    pub fn memory(name: &str, block_size: usize) -> Self {
        Self::new(Box::new(MemChannel::new(name)), block_size)
    }

    /// Read a block.
    ///
    /// # Errors
    /// Returns `Error::CorruptBlock` if the block lies beyond the end of the
    /// channel; an index never points at a block that was not written.
    pub fn read_block(&self, id: BlockId) -> Result<Page> {
        let offset = self.offset(id);
        if offset + self.block_size as u64 > self.channel.len()? {
            return Err(Error::corrupt(
                self.channel.name(),
                id.0 as u64,
                "block beyond end of file",
            ));
        }
        let mut page = Page::new(self.block_size);
        self.channel.read_at(page.as_mut_slice(), offset)?;
        Ok(page)
    }

    /// Write a block, extending the channel if it is past the end.
    pub fn write_block(&self, id: BlockId, page: &Page) -> Result<()> {
        debug_assert_eq!(page.size(), self.block_size);
        self.channel.write_at(page.as_slice(), self.offset(id))
    }

    /// Number of whole blocks in the channel.
    pub fn block_count(&self) -> Result<u32> {
        Ok((self.channel.len()? / self.block_size as u64) as u32)
    }

    pub fn sync(&self) -> Result<()> {
        self.channel.sync()
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn name(&self) -> &str {
        self.channel.name()
    }

    #[inline]
    fn offset(&self, id: BlockId) -> u64 {
        id.0 as u64 * self.block_size as u64
    }
}

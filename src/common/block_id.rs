//! Block identifier type.

use std::fmt;

/// Identifies a block within one block file.
///
/// Using `u32` allows for 4 billion blocks per index file. Blocks are
/// referenced by number everywhere, never by pointer, so B+Tree pages
/// carry no back-references to the tree that owns them.
///
/// # Example
/// ```
/// use tdb_storage::BlockId;
///
/// let block_id = BlockId::new(42);
/// assert!(block_id.is_valid());
/// assert_eq!(block_id.0, 42);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    /// Invalid/sentinel block ID.
    ///
    /// Used to represent "no block" or uninitialized state.
    pub const INVALID: BlockId = BlockId(u32::MAX);

    /// Create a new BlockId.
    #[inline]
    pub fn new(id: u32) -> Self {
        BlockId(id)
    }

    /// Check if this block ID is valid (not the sentinel value).
    #[inline]
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "Block(INVALID)")
        } else {
            write!(f, "Block({})", self.0)
        }
    }
}

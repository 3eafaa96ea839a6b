//! Block cache management.
//!
//! Every block file is fronted by a [`BlockManager`]: a fixed pool of
//! frames, each holding one block, plus block allocation and reclamation.
//!
//! # Components
//! - [`BlockManager`] - The block cache and allocator
//! - [`Frame`] - A slot in the cache holding a page + metadata
//! - [`PageReadGuard`] / [`PageWriteGuard`] - RAII guards for block access
//! - [`CacheStats`] - Performance statistics
//! - [`replacer`] - Eviction policy

mod block_manager;
mod frame;
mod page_guard;
pub mod replacer;
mod stats;

pub use block_manager::BlockManager;
pub use frame::Frame;
pub use page_guard::{PageReadGuard, PageWriteGuard};
pub use stats::{CacheStats, StatsSnapshot};

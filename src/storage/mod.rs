//! Storage layer - channels, block files, page formats and metadata.
//!
//! This module handles persistent storage:
//! - [`Channel`] - positioned byte I/O on a file or in memory
//! - [`BlockFile`] - fixed-size block I/O
//! - [`page`] - page types and layouts
//! - [`metadata`] - the durable store root

mod block_file;
mod channel;
pub mod metadata;
pub mod page;

pub use block_file::BlockFile;
pub use channel::{Channel, FileChannel, MemChannel};
pub use metadata::{IndexMeta, MetaStore, StoreMetadata};

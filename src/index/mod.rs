//! Index structures.

pub mod bplustree;

pub use bplustree::{BPlusTree, RangeIter, Record, RecordFactory, WriteContext};

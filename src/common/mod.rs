//! Common types and utilities shared across tdb-storage.
//!
//! This module contains fundamental primitives used throughout the codebase:
//! - Configuration constants and [`StoreParams`]
//! - Error types
//! - Identifiers (BlockId, FrameId)

mod block_id;
pub mod config;
pub mod error;
mod frame_id;

pub use block_id::BlockId;
pub use config::{StoreParams, StoreParamsBuilder};
pub use error::{Error, Result};
pub use frame_id::FrameId;

/// A committed data version. Version `n` is the state after the `n`-th
/// write commit; page generations use the same numbering.
pub type Version = u64;

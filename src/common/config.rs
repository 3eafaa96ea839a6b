//! Configuration constants and store parameters.
//!
//! Parameters come in two groups:
//! - **static**: block size and index layouts. Fixed when a database is
//!   created, persisted in `params.json`, immutable thereafter.
//! - **dynamic**: cache sizes and limits. Taken from the caller at every open.

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};

/// Default block size in bytes (8KB).
pub const DEFAULT_BLOCK_SIZE: usize = 8192;

/// Smallest block size that still leaves room for a few quad records per page.
pub const MIN_BLOCK_SIZE: usize = 256;

/// Largest block size; entry counts are stored as `u16`.
pub const MAX_BLOCK_SIZE: usize = 65536;

/// Default number of frames in each index file's block cache.
pub const DEFAULT_BLOCK_CACHE_FRAMES: usize = 256;

/// Default size of the term → NodeId cache.
pub const DEFAULT_NODE_TO_ID_CACHE_SIZE: usize = 200_000;

/// Default size of the NodeId → term cache.
pub const DEFAULT_ID_TO_NODE_CACHE_SIZE: usize = 750_000;

/// Default size of the "known absent" term cache.
pub const DEFAULT_NODE_MISS_CACHE_SIZE: usize = 1_000;

/// Default triple index orders; the first is the primary.
pub const DEFAULT_TRIPLE_INDEXES: [&str; 3] = ["SPO", "POS", "OSP"];

/// Default quad index orders; the first is the primary.
pub const DEFAULT_QUAD_INDEXES: [&str; 6] = ["GSPO", "GPOS", "GOSP", "SPOG", "POSG", "OSPG"];

/// File holding the static parameters.
pub const PARAMS_FILE: &str = "params.json";
/// Node log file.
pub const NODE_DATA_FILE: &str = "nodes.dat";
/// Node hash index file.
pub const NODE_INDEX_FILE: &str = "nodes.idn";
/// Journal file.
pub const JOURNAL_FILE: &str = "journal.jrnl";
/// Metadata file.
pub const META_FILE: &str = "tdb.meta";
/// Extension of tuple index files.
pub const INDEX_EXT: &str = "idx";
/// Directory compacted indexes are built in before they replace the live
/// ones.
pub const COMPACT_DIR: &str = "compact.tmp";
/// Present in [`COMPACT_DIR`] once the compacted files are complete.
pub const COMPACT_MARKER: &str = "COMPLETE";

/// Parameters of a store.
///
/// # Example
/// ```
/// use tdb_storage::StoreParams;
///
/// let params = StoreParams::builder()
///     .block_size(4096)
///     .block_cache_frames(64)
///     .build()
///     .unwrap();
/// assert_eq!(params.block_size, 4096);
/// assert_eq!(params.triple_indexes[0], "SPO");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreParams {
    /// Block size in bytes (static).
    pub block_size: usize,
    /// Triple index orders over "SPO" (static).
    pub triple_indexes: Vec<String>,
    /// Quad index orders over "GSPO" (static).
    pub quad_indexes: Vec<String>,

    /// Frames per block cache.
    #[serde(skip, default = "default_block_cache_frames")]
    pub block_cache_frames: usize,
    /// Term → NodeId cache entries (0 disables).
    #[serde(skip, default = "default_node_to_id_cache_size")]
    pub node_to_id_cache_size: usize,
    /// NodeId → term cache entries (0 disables).
    #[serde(skip, default = "default_id_to_node_cache_size")]
    pub id_to_node_cache_size: usize,
    /// Absent-term cache entries (0 disables).
    #[serde(skip, default = "default_node_miss_cache_size")]
    pub node_miss_cache_size: usize,
    /// Upper bound on blocks per index file; `None` means the id space.
    #[serde(skip)]
    pub max_blocks: Option<u32>,
}

fn default_block_cache_frames() -> usize {
    DEFAULT_BLOCK_CACHE_FRAMES
}

fn default_node_to_id_cache_size() -> usize {
    DEFAULT_NODE_TO_ID_CACHE_SIZE
}

fn default_id_to_node_cache_size() -> usize {
    DEFAULT_ID_TO_NODE_CACHE_SIZE
}

fn default_node_miss_cache_size() -> usize {
    DEFAULT_NODE_MISS_CACHE_SIZE
}

impl Default for StoreParams {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            triple_indexes: DEFAULT_TRIPLE_INDEXES.iter().map(|s| s.to_string()).collect(),
            quad_indexes: DEFAULT_QUAD_INDEXES.iter().map(|s| s.to_string()).collect(),
            block_cache_frames: DEFAULT_BLOCK_CACHE_FRAMES,
            node_to_id_cache_size: DEFAULT_NODE_TO_ID_CACHE_SIZE,
            id_to_node_cache_size: DEFAULT_ID_TO_NODE_CACHE_SIZE,
            node_miss_cache_size: DEFAULT_NODE_MISS_CACHE_SIZE,
            max_blocks: None,
        }
    }
}

impl StoreParams {
    /// Start building parameters from the defaults.
    pub fn builder() -> StoreParamsBuilder {
        StoreParamsBuilder {
            params: StoreParams::default(),
        }
    }

    /// Check that the parameters describe a usable store.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&self.block_size) {
            return Err(Error::Config(format!(
                "block size {} outside [{}, {}]",
                self.block_size, MIN_BLOCK_SIZE, MAX_BLOCK_SIZE
            )));
        }
        if self.block_cache_frames < 8 {
            return Err(Error::Config(format!(
                "block cache needs at least 8 frames, got {}",
                self.block_cache_frames
            )));
        }
        validate_orders("SPO", &self.triple_indexes)?;
        validate_orders("GSPO", &self.quad_indexes)?;
        Ok(())
    }

    /// Same static layout as `other`?
    pub fn same_layout(&self, other: &StoreParams) -> bool {
        self.block_size == other.block_size
            && self.triple_indexes == other.triple_indexes
            && self.quad_indexes == other.quad_indexes
    }

    /// Take the static part from `stored` and the dynamic part from `self`.
    pub fn with_layout_of(&self, stored: &StoreParams) -> StoreParams {
        StoreParams {
            block_size: stored.block_size,
            triple_indexes: stored.triple_indexes.clone(),
            quad_indexes: stored.quad_indexes.clone(),
            ..self.clone()
        }
    }
}

fn validate_orders(primary: &str, orders: &[String]) -> Result<()> {
    if orders.is_empty() {
        return Err(Error::Config(format!("no indexes for {}", primary)));
    }
    for (i, order) in orders.iter().enumerate() {
        let mut a: Vec<char> = order.chars().collect();
        let mut b: Vec<char> = primary.chars().collect();
        a.sort_unstable();
        b.sort_unstable();
        if a != b {
            return Err(Error::Config(format!(
                "index order {:?} is not a permutation of {:?}",
                order, primary
            )));
        }
        if orders[..i].contains(order) {
            return Err(Error::Config(format!("duplicate index order {:?}", order)));
        }
    }
    Ok(())
}

/// Builder for [`StoreParams`].
#[derive(Debug, Clone)]
pub struct StoreParamsBuilder {
    params: StoreParams,
}

impl StoreParamsBuilder {
    pub fn block_size(mut self, size: usize) -> Self {
        self.params.block_size = size;
        self
    }

    pub fn triple_indexes(mut self, orders: &[&str]) -> Self {
        self.params.triple_indexes = orders.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn quad_indexes(mut self, orders: &[&str]) -> Self {
        self.params.quad_indexes = orders.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn block_cache_frames(mut self, frames: usize) -> Self {
        self.params.block_cache_frames = frames;
        self
    }

    pub fn node_to_id_cache_size(mut self, size: usize) -> Self {
        self.params.node_to_id_cache_size = size;
        self
    }

    pub fn id_to_node_cache_size(mut self, size: usize) -> Self {
        self.params.id_to_node_cache_size = size;
        self
    }

    pub fn node_miss_cache_size(mut self, size: usize) -> Self {
        self.params.node_miss_cache_size = size;
        self
    }

    pub fn max_blocks(mut self, max: u32) -> Self {
        self.params.max_blocks = Some(max);
        self
    }

    /// Validate and return the parameters.
    pub fn build(self) -> Result<StoreParams> {
        self.params.validate()?;
        Ok(self.params)
    }
}

//! Store metadata: the durable root of everything else.
//!
//! One record names the last durable version, the node log length, and for
//! every B+Tree file its root block, block limit and free list. A commit is
//! not on disk until its metadata is; the journal covers the gap.
//!
//! # Format
//! ```text
//! magic "TDBM" | format u32 | version u64 | node_log_len u64 | n u32
//! n × ( root u32 | block_limit u32 | free_count u32 | free ids u32... )
//! crc32 u32 over everything before it
//! ```
//! All integers are little-endian.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use bytes::{Buf, BufMut, BytesMut};
use parking_lot::Mutex;

use crate::common::{BlockId, Error, Result, Version};

const MAGIC: &[u8; 4] = b"TDBM";
const FORMAT: u32 = 1;

/// Per-tree persistent state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMeta {
    pub root: BlockId,
    /// One past the highest block id ever allocated.
    pub block_limit: u32,
    /// Blocks available for reuse.
    pub free: Vec<BlockId>,
}

/// Durable metadata for a whole store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreMetadata {
    pub version: Version,
    pub node_log_len: u64,
    pub indexes: Vec<IndexMeta>,
}

impl StoreMetadata {
    pub fn encode(&self) -> Vec<u8> {
        let free_total: usize = self.indexes.iter().map(|i| i.free.len()).sum();
        let mut buf = BytesMut::with_capacity(32 + self.indexes.len() * 12 + free_total * 4);

        buf.put_slice(MAGIC);
        buf.put_u32_le(FORMAT);
        buf.put_u64_le(self.version);
        buf.put_u64_le(self.node_log_len);
        buf.put_u32_le(self.indexes.len() as u32);
        for index in &self.indexes {
            buf.put_u32_le(index.root.0);
            buf.put_u32_le(index.block_limit);
            buf.put_u32_le(index.free.len() as u32);
            for id in &index.free {
                buf.put_u32_le(id.0);
            }
        }
        let checksum = crc32fast::hash(&buf);
        buf.put_u32_le(checksum);
        buf.to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 32 {
            return Err(corrupt("metadata too short"));
        }
        let (body, mut tail) = bytes.split_at(bytes.len() - 4);
        let stored = tail.get_u32_le();
        let computed = crc32fast::hash(body);
        if stored != computed {
            return Err(corrupt(format!(
                "checksum mismatch: stored={:#010x}, computed={:#010x}",
                stored, computed
            )));
        }

        let mut data = body;
        if &data[..4] != MAGIC {
            return Err(corrupt("bad magic"));
        }
        data.advance(4);
        let format = data.get_u32_le();
        if format != FORMAT {
            return Err(corrupt(format!("unsupported format {}", format)));
        }
        let version = data.get_u64_le();
        let node_log_len = data.get_u64_le();
        let count = data.get_u32_le() as usize;

        let mut indexes = Vec::with_capacity(count);
        for _ in 0..count {
            if data.remaining() < 12 {
                return Err(corrupt("truncated index entry"));
            }
            let root = BlockId(data.get_u32_le());
            let block_limit = data.get_u32_le();
            let free_count = data.get_u32_le() as usize;
            if data.remaining() < free_count * 4 {
                return Err(corrupt("truncated free list"));
            }
            let free = (0..free_count).map(|_| BlockId(data.get_u32_le())).collect();
            indexes.push(IndexMeta {
                root,
                block_limit,
                free,
            });
        }
        if data.has_remaining() {
            return Err(corrupt("trailing bytes"));
        }

        Ok(Self {
            version,
            node_log_len,
            indexes,
        })
    }
}

fn corrupt(reason: impl Into<String>) -> Error {
    Error::corrupt("metadata", 0, reason)
}

/// Where metadata lives.
pub enum MetaStore {
    /// A file replaced atomically (write temp, fsync, rename).
    File(PathBuf),
    Memory(Mutex<Option<Vec<u8>>>),
}

impl MetaStore {
    pub fn memory() -> Self {
        MetaStore::Memory(Mutex::new(None))
    }

    /// Read the metadata, `None` for a store that was never committed.
    pub fn load(&self) -> Result<Option<StoreMetadata>> {
        match self {
            MetaStore::File(path) => {
                if !path.exists() {
                    return Ok(None);
                }
                let bytes = fs::read(path)?;
                StoreMetadata::decode(&bytes).map(Some)
            }
            MetaStore::Memory(slot) => match slot.lock().as_deref() {
                Some(bytes) => StoreMetadata::decode(bytes).map(Some),
                None => Ok(None),
            },
        }
    }

    /// Durably replace the metadata.
    pub fn store(&self, meta: &StoreMetadata) -> Result<()> {
        let bytes = meta.encode();
        match self {
            MetaStore::File(path) => {
                let tmp = path.with_extension("tmp");
                {
                    let mut file = OpenOptions::new()
                        .write(true)
                        .create(true)
                        .truncate(true)
                        .open(&tmp)?;
                    file.write_all(&bytes)?;
                    file.sync_all()?;
                }
                fs::rename(&tmp, path)?;
                // Persist the rename itself.
                #[cfg(unix)]
                if let Some(dir) = path.parent() {
                    File::open(dir)?.sync_all()?;
                }
                Ok(())
            }
            MetaStore::Memory(slot) => {
                *slot.lock() = Some(bytes);
                Ok(())
            }
        }
    }
}

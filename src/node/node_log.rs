//! Append-only log of encoded terms.
//!
//! ```text
//! offset ─▶ ┌──────────┬────────────┬──────────────────┐
//!           │ len u32  │ crc32 u32  │ term bytes (len) │
//!           └──────────┴────────────┴──────────────────┘
//! ```
//! A pointer NodeId is the offset of its entry. Entries past the durable
//! length belong to the active writer until it commits.

use parking_lot::Mutex;

use crate::common::{Error, Result};
use crate::storage::Channel;

const ENTRY_HEADER: u64 = 8;

pub struct NodeLog {
    channel: Box<dyn Channel>,
    /// Current end, including uncommitted appends.
    end: Mutex<u64>,
}

impl NodeLog {
    /// # Errors
    /// I/O errors from reading the channel length.
    pub fn new(channel: Box<dyn Channel>) -> Result<Self> {
        let end = channel.len()?;
        Ok(Self {
            channel,
            end: Mutex::new(end),
        })
    }

    /// Append an entry; returns its offset.
    pub fn append(&self, bytes: &[u8]) -> Result<u64> {
        let mut end = self.end.lock();
        let offset = *end;
        let mut entry = Vec::with_capacity(ENTRY_HEADER as usize + bytes.len());
        entry.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        entry.extend_from_slice(&crc32fast::hash(bytes).to_le_bytes());
        entry.extend_from_slice(bytes);
        self.channel.write_at(&entry, offset)?;
        *end = offset + entry.len() as u64;
        Ok(offset)
    }

    /// Read the entry at `offset`. `limit` is the log length visible to the
    /// caller; entries that do not end within it are unknown.
    pub fn read(&self, offset: u64, limit: u64) -> Result<Vec<u8>> {
        if offset + ENTRY_HEADER > limit {
            return Err(Error::UnknownId(offset));
        }
        let mut header = [0u8; ENTRY_HEADER as usize];
        self.channel.read_at(&mut header, offset)?;
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as u64;
        let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if offset + ENTRY_HEADER + len > limit {
            return Err(Error::corrupt(
                self.channel.name(),
                offset,
                format!("entry of {} bytes runs past the log end {}", len, limit),
            ));
        }

        let mut bytes = vec![0u8; len as usize];
        self.channel.read_at(&mut bytes, offset + ENTRY_HEADER)?;
        let computed = crc32fast::hash(&bytes);
        if computed != crc {
            return Err(Error::corrupt(
                self.channel.name(),
                offset,
                format!("checksum mismatch: stored={:#010x}, computed={:#010x}", crc, computed),
            ));
        }
        Ok(bytes)
    }

    /// Length including uncommitted appends.
    pub fn len(&self) -> u64 {
        *self.end.lock()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything from `len` on.
    pub fn truncate(&self, len: u64) -> Result<()> {
        let mut end = self.end.lock();
        self.channel.truncate(len)?;
        *end = len;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.channel.sync()
    }

    pub fn name(&self) -> &str {
        self.channel.name()
    }
}

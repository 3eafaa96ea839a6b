//! Write-ahead redo journal.
//!
//! # Entry format
//! ```text
//! ┌─────────────┬─────────┬───────────────────┬───────────┐
//! │ len u32     │ type u8 │ payload (len)     │ crc32 u32 │
//! └─────────────┴─────────┴───────────────────┴───────────┘
//! ```
//! The crc covers the type byte and the payload. A commit writes all of its
//! entries followed by a `Commit` marker, then syncs; that sync is the
//! commit point. The journal is truncated once the commit is reflected in
//! the metadata.

use bytes::{Buf, BufMut, BytesMut};
use parking_lot::Mutex;
use tracing::warn;

use crate::common::{Error, Result, Version};
use crate::node::NodeId;
use crate::storage::Channel;
use crate::tuple::{Tuple, MAX_ARITY};

const TYPE_NODE_ALLOC: u8 = 1;
const TYPE_TUPLE_ADD: u8 = 2;
const TYPE_TUPLE_DELETE: u8 = 3;
const TYPE_COMMIT: u8 = 4;

const ENTRY_OVERHEAD: usize = 4 + 1 + 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    /// A term appended to the node log at the offset of `id`.
    NodeAlloc { id: NodeId, term: Vec<u8> },
    TupleAdd(Tuple),
    TupleDelete(Tuple),
    Commit { version: Version },
}

impl JournalEntry {
    fn encode(&self, buf: &mut BytesMut) {
        let mut payload = BytesMut::new();
        let kind = match self {
            JournalEntry::NodeAlloc { id, term } => {
                payload.put_u64_le(id.0);
                payload.put_slice(term);
                TYPE_NODE_ALLOC
            }
            JournalEntry::TupleAdd(tuple) | JournalEntry::TupleDelete(tuple) => {
                payload.put_u8(tuple.arity() as u8);
                for id in tuple.as_slice() {
                    payload.put_u64_le(id.0);
                }
                if matches!(self, JournalEntry::TupleAdd(_)) {
                    TYPE_TUPLE_ADD
                } else {
                    TYPE_TUPLE_DELETE
                }
            }
            JournalEntry::Commit { version } => {
                payload.put_u64_le(*version);
                TYPE_COMMIT
            }
        };

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&[kind]);
        hasher.update(&payload);
        buf.put_u32_le(payload.len() as u32);
        buf.put_u8(kind);
        buf.put_slice(&payload);
        buf.put_u32_le(hasher.finalize());
    }

    fn decode(kind: u8, mut payload: &[u8]) -> Option<Self> {
        let entry = match kind {
            TYPE_NODE_ALLOC if payload.len() >= 8 => {
                let id = NodeId(payload.get_u64_le());
                JournalEntry::NodeAlloc {
                    id,
                    term: payload.to_vec(),
                }
            }
            TYPE_TUPLE_ADD | TYPE_TUPLE_DELETE if !payload.is_empty() => {
                let arity = payload.get_u8() as usize;
                if arity == 0 || arity > MAX_ARITY || payload.len() != arity * 8 {
                    return None;
                }
                let ids: Vec<NodeId> = (0..arity).map(|_| NodeId(payload.get_u64_le())).collect();
                let tuple = Tuple::new(&ids);
                if kind == TYPE_TUPLE_ADD {
                    JournalEntry::TupleAdd(tuple)
                } else {
                    JournalEntry::TupleDelete(tuple)
                }
            }
            TYPE_COMMIT if payload.len() == 8 => JournalEntry::Commit {
                version: payload.get_u64_le(),
            },
            _ => return None,
        };
        Some(entry)
    }
}

/// The entries of one committed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitGroup {
    pub version: Version,
    pub entries: Vec<JournalEntry>,
}

pub struct Journal {
    channel: Box<dyn Channel>,
    /// Serializes appends; holds the write position.
    end: Mutex<u64>,
}

impl Journal {
    pub fn new(channel: Box<dyn Channel>) -> Result<Self> {
        let end = channel.len()?;
        Ok(Self {
            channel,
            end: Mutex::new(end),
        })
    }

    /// Append `entries` and a commit marker for `version`, then sync.
    pub fn write_commit(&self, entries: &[JournalEntry], version: Version) -> Result<()> {
        let mut buf = BytesMut::new();
        for entry in entries {
            entry.encode(&mut buf);
        }
        JournalEntry::Commit { version }.encode(&mut buf);

        let mut end = self.end.lock();
        self.channel.write_at(&buf, *end)?;
        self.channel.sync()?;
        *end += buf.len() as u64;
        Ok(())
    }

    /// Read every intact entry. An incomplete entry at the end (a torn
    /// write) is dropped with a warning.
    ///
    /// # Errors
    /// `Error::JournalReplay` if a complete entry fails its checksum or
    /// cannot be decoded.
    pub fn read_all(&self) -> Result<Vec<JournalEntry>> {
        let len = self.channel.len()? as usize;
        let mut data = vec![0u8; len];
        self.channel.read_at(&mut data, 0)?;

        let mut entries = Vec::new();
        let mut pos = 0;
        while pos < len {
            let rest = &data[pos..];
            if rest.len() < ENTRY_OVERHEAD {
                warn!(journal = self.channel.name(), offset = pos, "discarding torn journal tail");
                break;
            }
            let payload_len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
            let total = ENTRY_OVERHEAD + payload_len;
            if rest.len() < total {
                warn!(journal = self.channel.name(), offset = pos, "discarding torn journal tail");
                break;
            }

            let kind = rest[4];
            let payload = &rest[5..5 + payload_len];
            let crc_at = 5 + payload_len;
            let stored = u32::from_le_bytes([
                rest[crc_at],
                rest[crc_at + 1],
                rest[crc_at + 2],
                rest[crc_at + 3],
            ]);
            let computed = crc32fast::hash(&rest[4..crc_at]);
            if stored != computed {
                return Err(Error::JournalReplay(format!(
                    "checksum mismatch at offset {}: stored={:#010x}, computed={:#010x}",
                    pos, stored, computed
                )));
            }
            let entry = JournalEntry::decode(kind, payload).ok_or_else(|| {
                Error::JournalReplay(format!("malformed entry of type {} at offset {}", kind, pos))
            })?;
            entries.push(entry);
            pos += total;
        }
        Ok(entries)
    }

    /// Entries grouped by commit. Entries after the last commit marker
    /// belong to a commit that never happened and are dropped.
    pub fn read_commits(&self) -> Result<Vec<CommitGroup>> {
        let mut groups = Vec::new();
        let mut current = Vec::new();
        for entry in self.read_all()? {
            match entry {
                JournalEntry::Commit { version } => groups.push(CommitGroup {
                    version,
                    entries: std::mem::take(&mut current),
                }),
                other => current.push(other),
            }
        }
        if !current.is_empty() {
            warn!(
                journal = self.channel.name(),
                entries = current.len(),
                "discarding uncommitted journal entries"
            );
        }
        Ok(groups)
    }

    /// Empty the journal.
    pub fn truncate(&self) -> Result<()> {
        let mut end = self.end.lock();
        self.channel.truncate(0)?;
        self.channel.sync()?;
        *end = 0;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        *self.end.lock() == 0
    }
}

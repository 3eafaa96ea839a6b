//! B+Tree node layout.
//!
//! # Leaf page
//! ```text
//! ┌────────────┬──────────┬──────────┬─────┬────────────┬──────────┐
//! │ PageHeader │ record 0 │ record 1 │ ... │ record n-1 │  unused  │
//! └────────────┴──────────┴──────────┴─────┴────────────┴──────────┘
//! ```
//!
//! # Branch page
//! ```text
//! ┌────────────┬──────────────────────────┬──────────────────────────────┐
//! │ PageHeader │ key 0 .. key max_keys-1  │ child 0 .. child max_keys    │
//! └────────────┴──────────────────────────┴──────────────────────────────┘
//! ```
//! Child pointers are u32 little-endian and sit at a fixed offset after the
//! key area, so a branch with `n` keys uses `n + 1` of them. Child `i` holds
//! keys `k` with `key[i-1] <= k < key[i]`.
//!
//! The header's `count` is the number of records (leaf) or keys (branch).
//! Reads search the page bytes directly; writes decode into a [`Node`],
//! edit it and encode it back.

use crate::common::{BlockId, Error, Result, Version};
use crate::index::bplustree::record::RecordFactory;
use crate::storage::page::{Page, PageHeader, PageType};

/// Smallest capacity accepted for either node kind.
const MIN_CAPACITY: usize = 4;

/// Node capacities for one record shape and block size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLayout {
    pub key_len: usize,
    pub record_len: usize,
    pub max_records: usize,
    pub min_records: usize,
    pub max_keys: usize,
    pub min_keys: usize,
    children_offset: usize,
}

impl NodeLayout {
    pub fn new(factory: &RecordFactory, block_size: usize) -> Result<Self> {
        let key_len = factory.key_len();
        let record_len = factory.record_len();
        let body = block_size.saturating_sub(PageHeader::SIZE);

        let max_records = (body / record_len).min(u16::MAX as usize);
        let max_keys = (body.saturating_sub(4) / (key_len + 4)).min(u16::MAX as usize);
        if max_records < MIN_CAPACITY || max_keys < MIN_CAPACITY {
            return Err(Error::Config(format!(
                "block size {} too small for {}-byte records",
                block_size, record_len
            )));
        }

        Ok(Self {
            key_len,
            record_len,
            max_records,
            min_records: max_records / 2,
            max_keys,
            min_keys: max_keys / 2,
            children_offset: PageHeader::SIZE + max_keys * key_len,
        })
    }

    // ========================================================================
    // Direct page access (read path)
    // ========================================================================

    #[inline]
    pub fn record<'p>(&self, page: &'p Page, i: usize) -> &'p [u8] {
        let start = PageHeader::SIZE + i * self.record_len;
        &page.as_slice()[start..start + self.record_len]
    }

    #[inline]
    pub fn key<'p>(&self, page: &'p Page, i: usize) -> &'p [u8] {
        let start = PageHeader::SIZE + i * self.key_len;
        &page.as_slice()[start..start + self.key_len]
    }

    #[inline]
    pub fn child(&self, page: &Page, i: usize) -> BlockId {
        let start = self.children_offset + i * 4;
        let data = page.as_slice();
        BlockId(u32::from_le_bytes([
            data[start],
            data[start + 1],
            data[start + 2],
            data[start + 3],
        ]))
    }

    /// Index of the first record whose key is `>= key`.
    pub fn leaf_lower_bound(&self, page: &Page, count: usize, key: &[u8]) -> usize {
        partition_point(count, |i| &self.record(page, i)[..self.key_len] < key)
    }

    /// Index of the child whose range contains `key`.
    pub fn branch_route(&self, page: &Page, count: usize, key: &[u8]) -> usize {
        partition_point(count, |i| self.key(page, i) <= key)
    }

    /// Read and sanity-check the header of a tree page.
    pub fn header(&self, page: &Page, block: BlockId) -> Result<PageHeader> {
        let header = page.header();
        let max = match header.page_type {
            PageType::BTreeLeaf => self.max_records,
            PageType::BTreeBranch => self.max_keys,
            PageType::Invalid => {
                return Err(Error::corrupt("bplustree", block.0 as u64, "not a tree page"))
            }
        };
        if header.count as usize > max {
            return Err(Error::corrupt(
                "bplustree",
                block.0 as u64,
                format!("entry count {} exceeds capacity {}", header.count, max),
            ));
        }
        Ok(header)
    }

    // ========================================================================
    // Decode / encode (write path)
    // ========================================================================

    pub fn decode(&self, page: &Page, block: BlockId) -> Result<Node> {
        let header = self.header(page, block)?;
        let count = header.count as usize;
        let data = page.as_slice();

        match header.page_type {
            PageType::BTreeLeaf => {
                let end = PageHeader::SIZE + count * self.record_len;
                Ok(Node::Leaf(Entries::from_slice(
                    self.record_len,
                    &data[PageHeader::SIZE..end],
                )))
            }
            _ => {
                let end = PageHeader::SIZE + count * self.key_len;
                let keys = Entries::from_slice(self.key_len, &data[PageHeader::SIZE..end]);
                let children: Vec<BlockId> = (0..=count).map(|i| self.child(page, i)).collect();
                if children.iter().any(|c| !c.is_valid()) {
                    return Err(Error::corrupt(
                        "bplustree",
                        block.0 as u64,
                        "invalid child pointer",
                    ));
                }
                Ok(Node::Branch(Branch { keys, children }))
            }
        }
    }

    pub fn encode(&self, node: &Node, generation: Version, page: &mut Page) {
        page.reset();
        let (page_type, count) = match node {
            Node::Leaf(records) => (PageType::BTreeLeaf, records.len()),
            Node::Branch(branch) => (PageType::BTreeBranch, branch.keys.len()),
        };
        debug_assert!(match node {
            Node::Leaf(_) => count <= self.max_records,
            Node::Branch(_) => count <= self.max_keys,
        });

        let mut header = PageHeader::new(page_type, generation);
        header.count = count as u16;
        page.set_header(&header);

        let data = page.as_mut_slice();
        match node {
            Node::Leaf(records) => {
                let bytes = records.as_bytes();
                data[PageHeader::SIZE..PageHeader::SIZE + bytes.len()].copy_from_slice(bytes);
            }
            Node::Branch(branch) => {
                let bytes = branch.keys.as_bytes();
                data[PageHeader::SIZE..PageHeader::SIZE + bytes.len()].copy_from_slice(bytes);
                for (i, child) in branch.children.iter().enumerate() {
                    let start = self.children_offset + i * 4;
                    data[start..start + 4].copy_from_slice(&child.0.to_le_bytes());
                }
            }
        }
    }

    /// Below minimum fill for a non-root node?
    pub fn underflows(&self, node: &Node) -> bool {
        match node {
            Node::Leaf(records) => records.len() < self.min_records,
            Node::Branch(branch) => branch.keys.len() < self.min_keys,
        }
    }

    /// Can give one entry to a sibling and stay at minimum fill?
    pub fn can_lend(&self, node: &Node) -> bool {
        match node {
            Node::Leaf(records) => records.len() > self.min_records,
            Node::Branch(branch) => branch.keys.len() > self.min_keys,
        }
    }
}

/// First index in `0..len` for which `pred` is false; `pred` must be
/// true for a prefix of the range.
fn partition_point(len: usize, pred: impl Fn(usize) -> bool) -> usize {
    let (mut lo, mut hi) = (0, len);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if pred(mid) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

// ============================================================================
// Decoded nodes
// ============================================================================

/// A packed run of equal-width entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entries {
    width: usize,
    data: Vec<u8>,
}

impl Entries {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            data: Vec::new(),
        }
    }

    fn from_slice(width: usize, bytes: &[u8]) -> Self {
        Self {
            width,
            data: bytes.to_vec(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() / self.width
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn get(&self, i: usize) -> &[u8] {
        &self.data[i * self.width..(i + 1) * self.width]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn insert(&mut self, i: usize, entry: &[u8]) {
        debug_assert_eq!(entry.len(), self.width);
        let at = i * self.width;
        self.data.splice(at..at, entry.iter().copied());
    }

    pub fn push(&mut self, entry: &[u8]) {
        debug_assert_eq!(entry.len(), self.width);
        self.data.extend_from_slice(entry);
    }

    pub fn set(&mut self, i: usize, entry: &[u8]) {
        debug_assert_eq!(entry.len(), self.width);
        self.data[i * self.width..(i + 1) * self.width].copy_from_slice(entry);
    }

    pub fn remove(&mut self, i: usize) -> Vec<u8> {
        let at = i * self.width;
        self.data.drain(at..at + self.width).collect()
    }

    pub fn pop(&mut self) -> Option<Vec<u8>> {
        if self.is_empty() {
            return None;
        }
        let at = self.data.len() - self.width;
        Some(self.data.split_off(at))
    }

    /// Entries `[at, len)` move to the returned value.
    pub fn split_off(&mut self, at: usize) -> Entries {
        Entries {
            width: self.width,
            data: self.data.split_off(at * self.width),
        }
    }

    pub fn append(&mut self, other: &mut Entries) {
        debug_assert_eq!(self.width, other.width);
        self.data.append(&mut other.data);
    }

    /// Binary search on the first `key_len` bytes of each entry.
    pub fn search(&self, key: &[u8]) -> std::result::Result<usize, usize> {
        let key_len = key.len();
        let (mut lo, mut hi) = (0, self.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.get(mid)[..key_len].cmp(key) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(mid),
            }
        }
        Err(lo)
    }

    /// Index of the child covering `key` when these are branch separators.
    pub fn route(&self, key: &[u8]) -> usize {
        partition_point(self.len(), |i| self.get(i) <= key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    pub keys: Entries,
    pub children: Vec<BlockId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Leaf(Entries),
    Branch(Branch),
}

//! Lazy range iteration.
//!
//! The iterator copies one leaf at a time and keeps the path of branch
//! children still to visit, so it holds no page pins between calls. It is
//! only valid while the root it was created for stays reachable, which the
//! snapshot that supplied the root guarantees.

use crate::common::{BlockId, Result};
use crate::index::bplustree::record::Record;
use crate::index::bplustree::tree::{too_deep, BPlusTree, MAX_DEPTH};
use crate::storage::page::PageType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unstarted,
    Running,
    Done,
}

/// Records with `low <= key < high` in key order; `high = None` means no
/// upper bound.
#[derive(Clone)]
pub struct RangeIter<'a> {
    tree: &'a BPlusTree,
    root: BlockId,
    low: Vec<u8>,
    high: Option<Vec<u8>>,
    /// Per branch level: its children and the next one to visit.
    stack: Vec<(Vec<BlockId>, usize)>,
    leaf: Vec<Vec<u8>>,
    pos: usize,
    state: State,
}

impl<'a> RangeIter<'a> {
    pub(crate) fn new(
        tree: &'a BPlusTree,
        root: BlockId,
        low: Vec<u8>,
        high: Option<Vec<u8>>,
    ) -> Self {
        Self {
            tree,
            root,
            low,
            high,
            stack: Vec::new(),
            leaf: Vec::new(),
            pos: 0,
            state: State::Unstarted,
        }
    }

    /// Start over from the lower bound.
    pub fn restart(&mut self) {
        self.stack.clear();
        self.leaf.clear();
        self.pos = 0;
        self.state = State::Unstarted;
    }

    /// Descend from `block` to a leaf, following `low` if `seek` is set and
    /// the leftmost child otherwise.
    fn descend(&mut self, mut block: BlockId, seek: bool) -> Result<()> {
        let tree = self.tree;
        let layout = *tree.layout();
        while self.stack.len() < MAX_DEPTH {
            let page = tree.blocks().get(block)?;
            let header = layout.header(&page, block)?;
            let count = header.count as usize;

            if header.page_type == PageType::BTreeLeaf {
                let start = if seek {
                    layout.leaf_lower_bound(&page, count, pad(&self.low, layout.key_len).as_slice())
                } else {
                    0
                };
                self.leaf = (start..count)
                    .map(|i| layout.record(&page, i).to_vec())
                    .collect();
                self.pos = 0;
                return Ok(());
            }

            let idx = if seek {
                layout.branch_route(&page, count, pad(&self.low, layout.key_len).as_slice())
            } else {
                0
            };
            let children: Vec<BlockId> = (0..=count).map(|i| layout.child(&page, i)).collect();
            block = children[idx];
            self.stack.push((children, idx + 1));
        }
        Err(too_deep(self.root))
    }

    /// Move to the next leaf; false at the end of the tree.
    fn next_leaf(&mut self) -> Result<bool> {
        while let Some((children, next)) = self.stack.last_mut() {
            if *next < children.len() {
                let block = children[*next];
                *next += 1;
                self.descend(block, false)?;
                return Ok(true);
            }
            self.stack.pop();
        }
        Ok(false)
    }

    fn advance(&mut self) -> Result<Option<Record>> {
        let key_len = self.tree.layout().key_len;
        if self.state == State::Unstarted {
            self.state = State::Running;
            self.descend(self.root, true)?;
        }
        loop {
            if let Some(bytes) = self.leaf.get(self.pos) {
                if let Some(high) = &self.high {
                    if bytes[..key_len] >= high[..] {
                        return Ok(None);
                    }
                }
                self.pos += 1;
                return Ok(Some(Record::from_bytes(bytes.clone(), key_len)));
            }
            if !self.next_leaf()? {
                return Ok(None);
            }
        }
    }
}

impl Iterator for RangeIter<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state == State::Done {
            return None;
        }
        match self.advance() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.state = State::Done;
                None
            }
            Err(e) => {
                self.state = State::Done;
                Some(Err(e))
            }
        }
    }
}

/// Extend a prefix with zero bytes to a full key; it sorts no later than
/// any key it prefixes.
fn pad(prefix: &[u8], key_len: usize) -> Vec<u8> {
    let mut key = prefix[..prefix.len().min(key_len)].to_vec();
    key.resize(key_len, 0);
    key
}

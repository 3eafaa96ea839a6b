//! Copy-on-write B+Tree over a [`BlockManager`].
//!
//! The tree never stores its root: every read takes the root of the
//! snapshot it reads, and every write goes through a [`WriteContext`] that
//! carries the transaction's root and generation. Pages of an older
//! generation are never modified; they are copied to a fresh block and the
//! old block is retired, so readers on older roots are unaffected.

use tracing::trace;

use crate::buffer::BlockManager;
use crate::common::{BlockId, Error, Result, Version};
use crate::index::bplustree::iter::RangeIter;
use crate::index::bplustree::node::{Branch, Entries, Node, NodeLayout};
use crate::index::bplustree::record::{Record, RecordFactory};
use crate::storage::page::PageType;

/// Deeper than any real tree; a longer descent means a pointer cycle.
pub(crate) const MAX_DEPTH: usize = 64;

/// Write state of one tree within one write transaction.
#[derive(Debug, Clone)]
pub struct WriteContext {
    pub(crate) root: BlockId,
    pub(crate) generation: Version,
    pub(crate) allocated: Vec<BlockId>,
    pub(crate) retired: Vec<BlockId>,
}

impl WriteContext {
    pub fn new(root: BlockId, generation: Version) -> Self {
        Self {
            root,
            generation,
            allocated: Vec::new(),
            retired: Vec::new(),
        }
    }

    #[inline]
    pub fn root(&self) -> BlockId {
        self.root
    }

    #[inline]
    pub fn generation(&self) -> Version {
        self.generation
    }

    /// Blocks allocated by this transaction and still in use.
    pub fn allocated(&self) -> &[BlockId] {
        &self.allocated
    }

    /// Committed blocks this transaction replaced.
    pub fn retired(&self) -> &[BlockId] {
        &self.retired
    }
}

/// Where a decoded node came from.
#[derive(Debug, Clone, Copy)]
struct Stored {
    block: BlockId,
    generation: Version,
}

enum InsertOutcome {
    Unchanged,
    Written(BlockId),
    Split {
        left: BlockId,
        separator: Vec<u8>,
        right: BlockId,
    },
}

enum DeleteOutcome {
    Unchanged,
    Written { block: BlockId, underflow: bool },
}

/// A B+Tree of fixed-width records with unique keys.
pub struct BPlusTree {
    blocks: BlockManager,
    factory: RecordFactory,
    layout: NodeLayout,
}

impl BPlusTree {
    /// # Errors
    /// `Error::Config` if a block cannot hold at least four entries.
    pub fn new(blocks: BlockManager, factory: RecordFactory) -> Result<Self> {
        let layout = NodeLayout::new(&factory, blocks.block_size())?;
        Ok(Self {
            blocks,
            factory,
            layout,
        })
    }

    pub fn blocks(&self) -> &BlockManager {
        &self.blocks
    }

    pub fn factory(&self) -> &RecordFactory {
        &self.factory
    }

    pub fn layout(&self) -> &NodeLayout {
        &self.layout
    }

    /// Write an empty root leaf at `generation`.
    pub fn create_root(&self, generation: Version) -> Result<BlockId> {
        let mut guard = self.blocks.new_block()?;
        self.layout
            .encode(&Node::Leaf(Entries::new(self.layout.record_len)), generation, &mut guard);
        Ok(guard.block_id())
    }

    /// Build a tree bottom-up from records in ascending key order, filling
    /// every node except where the last two of a level share entries to
    /// keep minimum fill. Pages carry `generation`. Returns the root.
    ///
    /// # Errors
    /// `Error::CorruptBlock` if the records are not strictly ascending.
    pub fn build<I>(&self, records: I, generation: Version) -> Result<BlockId>
    where
        I: IntoIterator<Item = Result<Record>>,
    {
        let mut ctx = WriteContext::new(BlockId::INVALID, generation);
        let layout = self.layout;
        // (first key, block) of each node of the level being built
        let mut level: Vec<(Vec<u8>, BlockId)> = Vec::new();
        let mut held: Option<Entries> = None;
        let mut current = Entries::new(layout.record_len);

        for record in records {
            let record = record?;
            if let Some(last) = current.len().checked_sub(1).map(|i| current.get(i)) {
                if &last[..layout.key_len] >= record.key() {
                    return Err(Error::corrupt(
                        self.blocks.name(),
                        0,
                        "records to build from are not in ascending order",
                    ));
                }
            }
            if current.len() == layout.max_records {
                if let Some(full) = held.take() {
                    level.push(self.build_node(&mut ctx, Node::Leaf(full))?);
                }
                held = Some(std::mem::replace(&mut current, Entries::new(layout.record_len)));
            }
            current.push(record.as_bytes());
        }
        if let Some(mut full) = held {
            if current.len() < layout.min_records {
                let mut tail = full.split_off(full.len() - (layout.min_records - current.len()));
                tail.append(&mut current);
                current = tail;
            }
            level.push(self.build_node(&mut ctx, Node::Leaf(full))?);
        }
        level.push(self.build_node(&mut ctx, Node::Leaf(current))?);

        let fanout = layout.max_keys + 1;
        let min_children = layout.min_keys + 1;
        while level.len() > 1 {
            let mut sizes = vec![fanout; level.len() / fanout];
            if level.len() % fanout != 0 {
                sizes.push(level.len() % fanout);
            }
            if let [.., prev, last] = sizes.as_mut_slice() {
                if *last < min_children {
                    let moved = min_children - *last;
                    *prev -= moved;
                    *last += moved;
                }
            }

            let mut children = level.into_iter();
            let mut parents = Vec::with_capacity(sizes.len());
            for size in sizes {
                let group: Vec<(Vec<u8>, BlockId)> = children.by_ref().take(size).collect();
                let mut keys = Entries::new(layout.key_len);
                for (first, _) in &group[1..] {
                    keys.push(&first[..layout.key_len]);
                }
                let first = group[0].0.clone();
                let branch = Branch {
                    keys,
                    children: group.into_iter().map(|(_, block)| block).collect(),
                };
                let (_, block) = self.build_node(&mut ctx, Node::Branch(branch))?;
                parents.push((first, block));
            }
            level = parents;
        }

        trace!(file = self.blocks.name(), blocks = ctx.allocated.len(), "built tree");
        Ok(level[0].1)
    }

    fn build_node(&self, ctx: &mut WriteContext, node: Node) -> Result<(Vec<u8>, BlockId)> {
        let first = match &node {
            Node::Leaf(records) if !records.is_empty() => records.get(0).to_vec(),
            _ => Vec::new(),
        };
        Ok((first, self.alloc_node(ctx, &node)?))
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Point lookup by key.
    pub fn get(&self, root: BlockId, key: &[u8]) -> Result<Option<Record>> {
        debug_assert_eq!(key.len(), self.layout.key_len);
        let mut block = root;
        for _ in 0..MAX_DEPTH {
            let page = self.blocks.get(block)?;
            let header = self.layout.header(&page, block)?;
            let count = header.count as usize;
            if header.page_type == PageType::BTreeLeaf {
                let i = self.layout.leaf_lower_bound(&page, count, key);
                if i < count {
                    let record = self.layout.record(&page, i);
                    if &record[..self.layout.key_len] == key {
                        return Ok(Some(Record::from_bytes(record.to_vec(), self.layout.key_len)));
                    }
                }
                return Ok(None);
            }
            block = self.layout.child(&page, self.layout.branch_route(&page, count, key));
        }
        Err(too_deep(root))
    }

    pub fn contains(&self, root: BlockId, key: &[u8]) -> Result<bool> {
        Ok(self.get(root, key)?.is_some())
    }

    /// All records whose key starts with `prefix`, in key order.
    ///
    /// The iterator is lazy: nothing is read until the first `next`.
    pub fn find(&self, root: BlockId, prefix: &[u8]) -> RangeIter<'_> {
        RangeIter::new(self, root, prefix.to_vec(), successor(prefix))
    }

    /// Records with `low <= key < high`.
    pub fn range(&self, root: BlockId, low: &[u8], high: &[u8]) -> RangeIter<'_> {
        RangeIter::new(self, root, low.to_vec(), Some(high.to_vec()))
    }

    /// Every record, in key order.
    pub fn iter(&self, root: BlockId) -> RangeIter<'_> {
        RangeIter::new(self, root, Vec::new(), None)
    }

    /// Smallest record.
    pub fn min(&self, root: BlockId) -> Result<Option<Record>> {
        self.edge(root, false)
    }

    /// Largest record.
    pub fn max(&self, root: BlockId) -> Result<Option<Record>> {
        self.edge(root, true)
    }

    fn edge(&self, root: BlockId, last: bool) -> Result<Option<Record>> {
        let mut block = root;
        for _ in 0..MAX_DEPTH {
            let page = self.blocks.get(block)?;
            let header = self.layout.header(&page, block)?;
            let count = header.count as usize;
            if header.page_type == PageType::BTreeLeaf {
                if count == 0 {
                    return Ok(None);
                }
                let i = if last { count - 1 } else { 0 };
                let record = self.layout.record(&page, i).to_vec();
                return Ok(Some(Record::from_bytes(record, self.layout.key_len)));
            }
            block = self.layout.child(&page, if last { count } else { 0 });
        }
        Err(too_deep(root))
    }

    /// Number of records.
    pub fn count(&self, root: BlockId) -> Result<u64> {
        self.count_rec(root, 0)
    }

    fn count_rec(&self, block: BlockId, depth: usize) -> Result<u64> {
        if depth >= MAX_DEPTH {
            return Err(too_deep(block));
        }
        let children = {
            let page = self.blocks.get(block)?;
            let header = self.layout.header(&page, block)?;
            if header.page_type == PageType::BTreeLeaf {
                return Ok(header.count as u64);
            }
            (0..=header.count as usize)
                .map(|i| self.layout.child(&page, i))
                .collect::<Vec<_>>()
        };
        let mut total = 0;
        for child in children {
            total += self.count_rec(child, depth + 1)?;
        }
        Ok(total)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Insert a record. Returns false, changing nothing, if its key exists.
    ///
    /// # Panics
    /// Panics if `record` is not exactly one record long.
    pub fn insert(&self, ctx: &mut WriteContext, record: &[u8]) -> Result<bool> {
        assert_eq!(record.len(), self.layout.record_len, "record length");
        match self.insert_rec(ctx, ctx.root, record, 0)? {
            InsertOutcome::Unchanged => Ok(false),
            InsertOutcome::Written(block) => {
                ctx.root = block;
                Ok(true)
            }
            InsertOutcome::Split {
                left,
                separator,
                right,
            } => {
                let mut keys = Entries::new(self.layout.key_len);
                keys.push(&separator);
                let root = Node::Branch(Branch {
                    keys,
                    children: vec![left, right],
                });
                ctx.root = self.alloc_node(ctx, &root)?;
                trace!(file = self.blocks.name(), root = ctx.root.0, "root split");
                Ok(true)
            }
        }
    }

    /// Delete the record with the key of `record` (a key alone will do).
    /// Returns false if there is none.
    pub fn delete(&self, ctx: &mut WriteContext, record: &[u8]) -> Result<bool> {
        let key = &record[..self.layout.key_len];
        match self.delete_rec(ctx, ctx.root, key, 0)? {
            DeleteOutcome::Unchanged => Ok(false),
            DeleteOutcome::Written { block, .. } => {
                ctx.root = block;
                // A branch root left with a single child gives way to it.
                loop {
                    let (stored, node) = self.load(ctx.root)?;
                    match node {
                        Node::Branch(branch) if branch.keys.is_empty() => {
                            self.drop_node(ctx, stored)?;
                            ctx.root = branch.children[0];
                            trace!(file = self.blocks.name(), root = ctx.root.0, "root shrink");
                        }
                        _ => break,
                    }
                }
                Ok(true)
            }
        }
    }

    /// Release every block the transaction allocated.
    pub fn abort(&self, ctx: WriteContext) -> Result<()> {
        for block in ctx.allocated {
            self.blocks.free(block)?;
        }
        Ok(())
    }

    /// Hand the replaced blocks to the block manager for reclamation once
    /// the transaction's version is durable. Returns the new root.
    pub fn commit(&self, ctx: WriteContext) -> BlockId {
        self.blocks.retire(ctx.generation, ctx.retired);
        ctx.root
    }

    fn insert_rec(
        &self,
        ctx: &mut WriteContext,
        block: BlockId,
        record: &[u8],
        depth: usize,
    ) -> Result<InsertOutcome> {
        if depth >= MAX_DEPTH {
            return Err(too_deep(block));
        }
        let (stored, node) = self.load(block)?;
        let key = &record[..self.layout.key_len];

        match node {
            Node::Leaf(mut records) => {
                let pos = match records.search(key) {
                    Ok(_) => return Ok(InsertOutcome::Unchanged),
                    Err(pos) => pos,
                };
                records.insert(pos, record);
                if records.len() <= self.layout.max_records {
                    let block = self.store(ctx, stored, &Node::Leaf(records))?;
                    return Ok(InsertOutcome::Written(block));
                }

                let right = records.split_off(records.len() / 2);
                let separator = right.get(0)[..self.layout.key_len].to_vec();
                let right = self.alloc_node(ctx, &Node::Leaf(right))?;
                let left = self.store(ctx, stored, &Node::Leaf(records))?;
                trace!(file = self.blocks.name(), left = left.0, right = right.0, "leaf split");
                Ok(InsertOutcome::Split {
                    left,
                    separator,
                    right,
                })
            }
            Node::Branch(mut branch) => {
                let idx = branch.keys.route(key);
                match self.insert_rec(ctx, branch.children[idx], record, depth + 1)? {
                    InsertOutcome::Unchanged => Ok(InsertOutcome::Unchanged),
                    InsertOutcome::Written(child) => {
                        if child == branch.children[idx] {
                            return Ok(InsertOutcome::Written(stored.block));
                        }
                        branch.children[idx] = child;
                        let block = self.store(ctx, stored, &Node::Branch(branch))?;
                        Ok(InsertOutcome::Written(block))
                    }
                    InsertOutcome::Split {
                        left,
                        separator,
                        right,
                    } => {
                        branch.children[idx] = left;
                        branch.keys.insert(idx, &separator);
                        branch.children.insert(idx + 1, right);
                        if branch.keys.len() <= self.layout.max_keys {
                            let block = self.store(ctx, stored, &Node::Branch(branch))?;
                            return Ok(InsertOutcome::Written(block));
                        }

                        // Middle key moves up; the halves keep the rest.
                        let mid = branch.keys.len() / 2;
                        let mut right_keys = branch.keys.split_off(mid);
                        let separator = right_keys.remove(0);
                        let right_children = branch.children.split_off(mid + 1);
                        let right = self.alloc_node(
                            ctx,
                            &Node::Branch(Branch {
                                keys: right_keys,
                                children: right_children,
                            }),
                        )?;
                        let left = self.store(ctx, stored, &Node::Branch(branch))?;
                        trace!(file = self.blocks.name(), left = left.0, right = right.0, "branch split");
                        Ok(InsertOutcome::Split {
                            left,
                            separator,
                            right,
                        })
                    }
                }
            }
        }
    }

    fn delete_rec(
        &self,
        ctx: &mut WriteContext,
        block: BlockId,
        key: &[u8],
        depth: usize,
    ) -> Result<DeleteOutcome> {
        if depth >= MAX_DEPTH {
            return Err(too_deep(block));
        }
        let (stored, node) = self.load(block)?;

        match node {
            Node::Leaf(mut records) => {
                let Ok(pos) = records.search(key) else {
                    return Ok(DeleteOutcome::Unchanged);
                };
                records.remove(pos);
                let underflow = records.len() < self.layout.min_records;
                let block = self.store(ctx, stored, &Node::Leaf(records))?;
                Ok(DeleteOutcome::Written { block, underflow })
            }
            Node::Branch(mut branch) => {
                let idx = branch.keys.route(key);
                match self.delete_rec(ctx, branch.children[idx], key, depth + 1)? {
                    DeleteOutcome::Unchanged => Ok(DeleteOutcome::Unchanged),
                    DeleteOutcome::Written {
                        block: child,
                        underflow,
                    } => {
                        if !underflow && child == branch.children[idx] {
                            return Ok(DeleteOutcome::Written {
                                block: stored.block,
                                underflow: false,
                            });
                        }
                        branch.children[idx] = child;
                        if underflow {
                            self.rebalance(ctx, &mut branch, idx, stored.block)?;
                        }
                        let underflow = branch.keys.len() < self.layout.min_keys;
                        let block = self.store(ctx, stored, &Node::Branch(branch))?;
                        Ok(DeleteOutcome::Written { block, underflow })
                    }
                }
            }
        }
    }

    /// Restore minimum fill of `parent.children[idx]`: borrow from a
    /// sibling that can spare an entry, otherwise merge with one.
    fn rebalance(
        &self,
        ctx: &mut WriteContext,
        parent: &mut Branch,
        idx: usize,
        parent_block: BlockId,
    ) -> Result<()> {
        let (child_stored, mut child) = self.load(parent.children[idx])?;

        let mut left = match idx {
            0 => None,
            _ => Some(self.load(parent.children[idx - 1])?),
        };
        if let Some((left_stored, left_node)) = left.as_mut() {
            if self.layout.can_lend(left_node) {
                let separator = shift_right(left_node, &mut child, parent.keys.get(idx - 1))
                    .ok_or_else(|| mixed_kinds(parent_block))?;
                parent.keys.set(idx - 1, &separator[..self.layout.key_len]);
                parent.children[idx - 1] = self.store(ctx, *left_stored, left_node)?;
                parent.children[idx] = self.store(ctx, child_stored, &child)?;
                trace!(file = self.blocks.name(), "borrowed from left sibling");
                return Ok(());
            }
        }

        let mut right = if idx + 1 < parent.children.len() {
            Some(self.load(parent.children[idx + 1])?)
        } else {
            None
        };
        if let Some((right_stored, right_node)) = right.as_mut() {
            if self.layout.can_lend(right_node) {
                let separator = shift_left(&mut child, right_node, parent.keys.get(idx))
                    .ok_or_else(|| mixed_kinds(parent_block))?;
                parent.keys.set(idx, &separator[..self.layout.key_len]);
                parent.children[idx] = self.store(ctx, child_stored, &child)?;
                parent.children[idx + 1] = self.store(ctx, *right_stored, right_node)?;
                trace!(file = self.blocks.name(), "borrowed from right sibling");
                return Ok(());
            }
        }

        match (left, right) {
            (Some((left_stored, mut left_node)), _) => {
                let separator = parent.keys.remove(idx - 1);
                merge(&mut left_node, child, &separator).ok_or_else(|| mixed_kinds(parent_block))?;
                parent.children.remove(idx);
                parent.children[idx - 1] = self.store(ctx, left_stored, &left_node)?;
                self.drop_node(ctx, child_stored)?;
            }
            (None, Some((right_stored, right_node))) => {
                let separator = parent.keys.remove(idx);
                merge(&mut child, right_node, &separator).ok_or_else(|| mixed_kinds(parent_block))?;
                parent.children.remove(idx + 1);
                parent.children[idx] = self.store(ctx, child_stored, &child)?;
                self.drop_node(ctx, right_stored)?;
            }
            (None, None) => {
                return Err(Error::corrupt(
                    "bplustree",
                    parent_block.0 as u64,
                    "branch with a single child",
                ))
            }
        }
        trace!(file = self.blocks.name(), "merged siblings");
        Ok(())
    }

    // ========================================================================
    // Node I/O
    // ========================================================================

    pub(crate) fn load_node(&self, block: BlockId) -> Result<(Node, Version)> {
        let (stored, node) = self.load(block)?;
        Ok((node, stored.generation))
    }

    fn load(&self, block: BlockId) -> Result<(Stored, Node)> {
        let page = self.blocks.get(block)?;
        let node = self.layout.decode(&page, block)?;
        Ok((
            Stored {
                block,
                generation: page.header().generation,
            },
            node,
        ))
    }

    /// Write `node` back, in place if the transaction owns the block,
    /// otherwise to a fresh block, retiring the old one.
    fn store(&self, ctx: &mut WriteContext, stored: Stored, node: &Node) -> Result<BlockId> {
        if stored.generation == ctx.generation {
            let mut guard = self.blocks.get_for_update(stored.block)?;
            self.layout.encode(node, ctx.generation, &mut guard);
            return Ok(stored.block);
        }
        let block = self.alloc_node(ctx, node)?;
        ctx.retired.push(stored.block);
        Ok(block)
    }

    fn alloc_node(&self, ctx: &mut WriteContext, node: &Node) -> Result<BlockId> {
        let mut guard = self.blocks.new_block()?;
        self.layout.encode(node, ctx.generation, &mut guard);
        let block = guard.block_id();
        ctx.allocated.push(block);
        Ok(block)
    }

    /// A node merged away: free it now if this transaction made it,
    /// otherwise retire it.
    fn drop_node(&self, ctx: &mut WriteContext, stored: Stored) -> Result<()> {
        if stored.generation == ctx.generation {
            self.blocks.free(stored.block)?;
            ctx.allocated.retain(|&b| b != stored.block);
        } else {
            ctx.retired.push(stored.block);
        }
        Ok(())
    }
}

/// Move the last entry of `left` to the front of `right`. Returns the new
/// separator between them.
fn shift_right(left: &mut Node, right: &mut Node, separator: &[u8]) -> Option<Vec<u8>> {
    match (left, right) {
        (Node::Leaf(left), Node::Leaf(right)) => {
            let record = left.pop()?;
            right.insert(0, &record);
            Some(record)
        }
        (Node::Branch(left), Node::Branch(right)) => {
            let key = left.keys.pop()?;
            let child = left.children.pop()?;
            right.keys.insert(0, separator);
            right.children.insert(0, child);
            Some(key)
        }
        _ => None,
    }
}

/// Move the first entry of `right` to the end of `left`. Returns the new
/// separator between them.
fn shift_left(left: &mut Node, right: &mut Node, separator: &[u8]) -> Option<Vec<u8>> {
    match (left, right) {
        (Node::Leaf(left), Node::Leaf(right)) => {
            left.push(&right.remove(0));
            Some(right.get(0).to_vec())
        }
        (Node::Branch(left), Node::Branch(right)) => {
            left.keys.push(separator);
            left.children.push(right.children.remove(0));
            Some(right.keys.remove(0))
        }
        _ => None,
    }
}

/// Append `right` to `left`; for branches the separator comes down between.
fn merge(left: &mut Node, right: Node, separator: &[u8]) -> Option<()> {
    match (left, right) {
        (Node::Leaf(left), Node::Leaf(mut right)) => {
            left.append(&mut right);
            Some(())
        }
        (Node::Branch(left), Node::Branch(mut right)) => {
            left.keys.push(separator);
            left.keys.append(&mut right.keys);
            left.children.append(&mut right.children);
            Some(())
        }
        _ => None,
    }
}

/// Smallest byte string greater than every string starting with `prefix`;
/// `None` when there is none.
pub(crate) fn successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut bound = prefix.to_vec();
    while let Some(last) = bound.pop() {
        if last < u8::MAX {
            bound.push(last + 1);
            return Some(bound);
        }
    }
    None
}

fn mixed_kinds(block: BlockId) -> Error {
    Error::corrupt("bplustree", block.0 as u64, "siblings of different kinds")
}

pub(crate) fn too_deep(block: BlockId) -> Error {
    Error::corrupt("bplustree", block.0 as u64, "tree deeper than any valid tree")
}

//! One permutation index of a tuple table.

use crate::common::{BlockId, Result};
use crate::index::{BPlusTree, RangeIter, RecordFactory, WriteContext};
use crate::node::NodeId;
use crate::tuple::column_map::ColumnMap;
use crate::tuple::tuple::{bound, Tuple, MAX_ARITY};

/// A B+Tree of key-only records holding tuples in one column order.
pub struct TupleIndex {
    map: ColumnMap,
    tree: BPlusTree,
}

impl TupleIndex {
    pub fn new(map: ColumnMap, tree: BPlusTree) -> Self {
        debug_assert_eq!(tree.factory().key_len(), map.arity() * NodeId::SIZE);
        Self { map, tree }
    }

    /// Record shape for an index of `arity` columns.
    pub fn record_factory(arity: usize) -> RecordFactory {
        RecordFactory::new(arity * NodeId::SIZE, 0)
    }

    pub fn name(&self) -> &str {
        self.map.name()
    }

    pub fn column_map(&self) -> &ColumnMap {
        &self.map
    }

    pub fn tree(&self) -> &BPlusTree {
        &self.tree
    }

    /// Insert a primary-order tuple. False if it was already present.
    pub fn add(&self, ctx: &mut WriteContext, tuple: &Tuple) -> Result<bool> {
        self.tree.insert(ctx, &self.map.key(tuple))
    }

    /// Remove a primary-order tuple. False if it was absent.
    pub fn delete(&self, ctx: &mut WriteContext, tuple: &Tuple) -> Result<bool> {
        self.tree.delete(ctx, &self.map.key(tuple))
    }

    /// Leading index slots bound by a primary-order pattern.
    pub fn bound_prefix(&self, pattern: &[Option<NodeId>]) -> usize {
        self.map
            .map_pattern(pattern)
            .iter()
            .take_while(|slot| bound(**slot).is_some())
            .count()
    }

    /// Tuples matching `pattern`, found by a prefix scan over its leading
    /// bound slots.
    pub fn find(&self, root: BlockId, pattern: &[Option<NodeId>]) -> TupleIter<'_> {
        let prefix: Vec<u8> = self
            .map
            .map_pattern(pattern)
            .iter()
            .map_while(|slot| bound(*slot))
            .flat_map(|id| id.to_bytes())
            .collect();

        let mut slots = [None; MAX_ARITY];
        slots[..pattern.len()].copy_from_slice(pattern);
        TupleIter {
            inner: self.tree.find(root, &prefix),
            map: &self.map,
            pattern: slots,
            arity: pattern.len(),
        }
    }

    /// Number of tuples.
    pub fn count(&self, root: BlockId) -> Result<u64> {
        self.tree.count(root)
    }
}

/// Tuples from one index, in that index's key order, converted back to the
/// primary column order.
#[derive(Clone)]
pub struct TupleIter<'a> {
    inner: RangeIter<'a>,
    map: &'a ColumnMap,
    pattern: [Option<NodeId>; MAX_ARITY],
    arity: usize,
}

impl Iterator for TupleIter<'_> {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let record = match self.inner.next()? {
                Ok(record) => record,
                Err(e) => return Some(Err(e)),
            };
            let tuple = self.map.tuple_of_key(record.key());
            if tuple.matches(&self.pattern[..self.arity]) {
                return Some(Ok(tuple));
            }
        }
    }
}

//! A set of permutation indexes kept in step.

use crate::common::{BlockId, Error, Result, Version};
use crate::index::WriteContext;
use crate::node::NodeId;
use crate::tuple::tuple::Tuple;
use crate::tuple::tuple_index::{TupleIndex, TupleIter};

/// A triple or quad table. The first index is the primary: it alone
/// decides whether a tuple is present, and the others follow it.
pub struct TupleTable {
    arity: usize,
    indexes: Vec<TupleIndex>,
}

/// Tuple table state of one write transaction: one context per index.
pub struct TupleWrite {
    contexts: Vec<WriteContext>,
    changed: bool,
}

impl TupleWrite {
    pub fn roots(&self) -> Vec<BlockId> {
        self.contexts.iter().map(|c| c.root()).collect()
    }

    /// Committed blocks of index `i` this transaction replaced.
    pub fn retired(&self, i: usize) -> &[BlockId] {
        self.contexts[i].retired()
    }

    /// Did any add or delete change the table?
    pub fn is_changed(&self) -> bool {
        self.changed
    }
}

impl TupleTable {
    /// # Errors
    /// `Error::Config` if there are no indexes or their arities differ.
    pub fn new(arity: usize, indexes: Vec<TupleIndex>) -> Result<Self> {
        if indexes.is_empty() {
            return Err(Error::Config("tuple table without indexes".into()));
        }
        if let Some(index) = indexes.iter().find(|i| i.column_map().arity() != arity) {
            return Err(Error::Config(format!(
                "index {} does not have arity {}",
                index.name(),
                arity
            )));
        }
        Ok(Self { arity, indexes })
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn indexes(&self) -> &[TupleIndex] {
        &self.indexes
    }

    pub fn begin_write(&self, roots: &[BlockId], version: Version) -> TupleWrite {
        debug_assert_eq!(roots.len(), self.indexes.len());
        TupleWrite {
            contexts: roots.iter().map(|&r| WriteContext::new(r, version)).collect(),
            changed: false,
        }
    }

    /// Add a tuple to every index. False if it was already present.
    pub fn add(&self, write: &mut TupleWrite, tuple: &Tuple) -> Result<bool> {
        self.check_arity(tuple)?;
        let (primary, rest) = write.contexts.split_at_mut(1);
        if !self.indexes[0].add(&mut primary[0], tuple)? {
            return Ok(false);
        }
        for (index, ctx) in self.indexes[1..].iter().zip(rest) {
            index.add(ctx, tuple)?;
        }
        write.changed = true;
        Ok(true)
    }

    /// Delete a tuple from every index. False if it was absent.
    pub fn delete(&self, write: &mut TupleWrite, tuple: &Tuple) -> Result<bool> {
        self.check_arity(tuple)?;
        let (primary, rest) = write.contexts.split_at_mut(1);
        if !self.indexes[0].delete(&mut primary[0], tuple)? {
            return Ok(false);
        }
        for (index, ctx) in self.indexes[1..].iter().zip(rest) {
            index.delete(ctx, tuple)?;
        }
        write.changed = true;
        Ok(true)
    }

    /// Index best suited to `pattern`: most bound leading slots, the
    /// earlier index on a tie.
    pub fn choose_index(&self, pattern: &[Option<NodeId>]) -> usize {
        let mut best = 0;
        let mut best_prefix = self.indexes[0].bound_prefix(pattern);
        for (i, index) in self.indexes.iter().enumerate().skip(1) {
            let prefix = index.bound_prefix(pattern);
            if prefix > best_prefix {
                best = i;
                best_prefix = prefix;
            }
        }
        best
    }

    /// Tuples matching `pattern` (one slot per column, `None` = any) in
    /// the snapshot with index roots `roots`.
    ///
    /// # Errors
    /// `Error::Transaction` if the pattern has the wrong arity.
    pub fn find(&self, roots: &[BlockId], pattern: &[Option<NodeId>]) -> Result<TupleIter<'_>> {
        if pattern.len() != self.arity {
            return Err(Error::Transaction(format!(
                "pattern of arity {} for a table of arity {}",
                pattern.len(),
                self.arity
            )));
        }
        let i = self.choose_index(pattern);
        Ok(self.indexes[i].find(roots[i], pattern))
    }

    /// Number of tuples, counted on the primary index.
    pub fn count(&self, roots: &[BlockId]) -> Result<u64> {
        self.indexes[0].count(roots[0])
    }

    pub fn abort(&self, write: TupleWrite) -> Result<()> {
        for (index, ctx) in self.indexes.iter().zip(write.contexts) {
            index.tree().abort(ctx)?;
        }
        Ok(())
    }

    /// Make a durable commit visible; returns the new roots.
    pub fn complete(&self, write: TupleWrite) -> Vec<BlockId> {
        self.indexes
            .iter()
            .zip(write.contexts)
            .map(|(index, ctx)| index.tree().commit(ctx))
            .collect()
    }

    pub fn sync(&self) -> Result<()> {
        for index in &self.indexes {
            index.tree().blocks().sync()?;
        }
        Ok(())
    }

    fn check_arity(&self, tuple: &Tuple) -> Result<()> {
        if tuple.arity() != self.arity {
            return Err(Error::Transaction(format!(
                "tuple of arity {} for a table of arity {}",
                tuple.arity(),
                self.arity
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BlockManager;
    use crate::index::BPlusTree;
    use crate::storage::BlockFile;
    use crate::tuple::ColumnMap;

    fn id(n: u64) -> NodeId {
        NodeId::from_offset(n)
    }

    fn create_test_table(primary: &str, orders: &[&str]) -> (TupleTable, Vec<BlockId>) {
        let arity = primary.len();
        let mut roots = Vec::new();
        let indexes = orders
            .iter()
            .map(|order| {
                let blocks = BlockManager::new(BlockFile::memory(&format!("{}.idx", order), 512), 32, None);
                let tree = BPlusTree::new(blocks, TupleIndex::record_factory(arity)).unwrap();
                roots.push(tree.create_root(0).unwrap());
                TupleIndex::new(ColumnMap::new(primary, order).unwrap(), tree)
            })
            .collect();
        (TupleTable::new(arity, indexes).unwrap(), roots)
    }

    #[test]
    fn test_indexes_stay_in_step() {
        let (table, roots) = create_test_table("SPO", &["SPO", "POS", "OSP"]);
        let mut write = table.begin_write(&roots, 1);
        for n in 0..50 {
            assert!(table.add(&mut write, &Tuple::triple(id(n % 7), id(n % 3), id(n))).unwrap());
        }
        assert!(!table.add(&mut write, &Tuple::triple(id(0), id(0), id(0))).unwrap());
        assert!(table.delete(&mut write, &Tuple::triple(id(1), id(1), id(1))).unwrap());
        assert!(!table.delete(&mut write, &Tuple::triple(id(1), id(1), id(1))).unwrap());

        let roots = write.roots();
        for (index, root) in table.indexes().iter().zip(&roots) {
            assert_eq!(index.count(*root).unwrap(), 49);
        }
    }

    #[test]
    fn test_choose_index() {
        let (table, _) = create_test_table("SPO", &["SPO", "POS", "OSP"]);
        let x = Some(id(1));
        assert_eq!(table.choose_index(&[x, None, None]), 0);
        assert_eq!(table.choose_index(&[None, x, None]), 1);
        assert_eq!(table.choose_index(&[None, None, x]), 2);
        assert_eq!(table.choose_index(&[x, None, x]), 2);
        assert_eq!(table.choose_index(&[None, x, x]), 1);
        assert_eq!(table.choose_index(&[None, None, None]), 0);
        assert_eq!(table.choose_index(&[x, x, x]), 0);
    }

    #[test]
    fn test_find_quads() {
        let (table, roots) = create_test_table("GSPO", &["GSPO", "GPOS", "SPOG"]);
        let mut write = table.begin_write(&roots, 1);
        for g in 0..3 {
            for s in 0..4 {
                table.add(&mut write, &Tuple::quad(id(g), id(10 + s), id(20), id(30 + s))).unwrap();
            }
        }
        let roots = write.roots();

        let in_graph: Vec<Tuple> = table
            .find(&roots, &[Some(id(1)), None, None, None])
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(in_graph.len(), 4);

        let by_subject: Vec<Tuple> = table
            .find(&roots, &[None, Some(id(12)), None, None])
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(by_subject.len(), 3);
        assert!(by_subject.iter().all(|q| q.get(3) == id(32)));

        assert!(table.find(&roots, &[None, None, None]).is_err());
    }

    #[test]
    fn test_abort_leaves_roots() {
        let (table, roots) = create_test_table("SPO", &["SPO", "OSP"]);
        let mut write = table.begin_write(&roots, 1);
        table.add(&mut write, &Tuple::triple(id(1), id(2), id(3))).unwrap();
        assert!(write.is_changed());
        table.abort(write).unwrap();
        assert_eq!(table.count(&roots).unwrap(), 0);
    }
}

//! Structural validation of a tree.

use crate::common::{BlockId, Error, Result};
use crate::index::bplustree::node::Node;
use crate::index::bplustree::tree::{too_deep, BPlusTree, MAX_DEPTH};

/// Shape of a tree that passed [`BPlusTree::check`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeCheck {
    /// Levels, counting the leaves; a lone root leaf has depth 1.
    pub depth: usize,
    pub leaves: usize,
    pub branches: usize,
    pub records: u64,
}

impl BPlusTree {
    /// Walk the whole tree under `root` and verify:
    /// - keys strictly increase within and across nodes
    /// - every key lies within the bounds its parent gives it
    /// - all leaves are at the same depth
    /// - non-root nodes are at least half full
    /// - a branch root has at least one key
    ///
    /// # Errors
    /// `Error::CorruptBlock` naming the first offending block.
    pub fn check(&self, root: BlockId) -> Result<TreeCheck> {
        let mut result = TreeCheck::default();
        let mut leaf_depth = None;
        self.check_node(root, None, None, 1, true, &mut leaf_depth, &mut result)?;
        result.depth = leaf_depth.unwrap_or(1);
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn check_node(
        &self,
        block: BlockId,
        low: Option<&[u8]>,
        high: Option<&[u8]>,
        depth: usize,
        is_root: bool,
        leaf_depth: &mut Option<usize>,
        result: &mut TreeCheck,
    ) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(too_deep(block));
        }
        let fail = |reason: String| Error::corrupt("bplustree", block.0 as u64, reason);
        let layout = self.layout();
        let key_len = layout.key_len;
        let (node, _) = self.load_node(block)?;

        let keys: Vec<&[u8]> = match &node {
            Node::Leaf(records) => (0..records.len()).map(|i| &records.get(i)[..key_len]).collect(),
            Node::Branch(branch) => (0..branch.keys.len()).map(|i| branch.keys.get(i)).collect(),
        };
        if keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(fail("keys out of order".into()));
        }
        if let (Some(low), Some(first)) = (low, keys.first()) {
            if *first < low {
                return Err(fail("key below parent bound".into()));
            }
        }
        if let (Some(high), Some(last)) = (high, keys.last()) {
            if *last >= high {
                return Err(fail("key above parent bound".into()));
            }
        }
        if !is_root && layout.underflows(&node) {
            return Err(fail(format!("underfull node with {} entries", keys.len())));
        }

        match &node {
            Node::Leaf(records) => {
                match *leaf_depth {
                    None => *leaf_depth = Some(depth),
                    Some(d) if d != depth => {
                        return Err(fail(format!("leaf at depth {}, expected {}", depth, d)))
                    }
                    _ => {}
                }
                result.leaves += 1;
                result.records += records.len() as u64;
            }
            Node::Branch(branch) => {
                if branch.keys.is_empty() {
                    return Err(fail("branch without keys".into()));
                }
                if branch.children.len() != branch.keys.len() + 1 {
                    return Err(fail("child count does not match key count".into()));
                }
                result.branches += 1;
                for (i, &child) in branch.children.iter().enumerate() {
                    let child_low = if i == 0 { low } else { Some(keys[i - 1]) };
                    let child_high = if i == keys.len() { high } else { Some(keys[i]) };
                    self.check_node(child, child_low, child_high, depth + 1, false, leaf_depth, result)?;
                }
            }
        }
        Ok(())
    }
}

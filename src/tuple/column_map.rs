//! Column permutations between a table's order and an index's order.

use crate::common::{Error, Result};
use crate::node::NodeId;
use crate::tuple::tuple::Tuple;

/// Maps tuples between the primary column order (e.g. `SPO`) and the
/// order of one index (e.g. `POS`).
///
/// # Example
/// ```
/// use tdb_storage::tuple::ColumnMap;
///
/// let map = ColumnMap::new("SPO", "POS").unwrap();
/// // Index slot 0 holds primary column 1 (P), and so on.
/// assert_eq!(map.fetch_slot(0), 1);
/// assert_eq!(map.fetch_slot(2), 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    name: String,
    /// `index[i] = primary[to_primary[i]]`
    to_primary: Vec<usize>,
}

impl ColumnMap {
    /// # Errors
    /// `Error::Config` if `order` is not a permutation of `primary`.
    pub fn new(primary: &str, order: &str) -> Result<Self> {
        if primary.len() != order.len() {
            return Err(Error::Config(format!(
                "index order {:?} does not match {:?}",
                order, primary
            )));
        }
        let to_primary = order
            .chars()
            .map(|c| {
                primary.chars().position(|p| p == c).ok_or_else(|| {
                    Error::Config(format!("column {:?} of {:?} not in {:?}", c, order, primary))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            name: order.to_string(),
            to_primary,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.to_primary.len()
    }

    /// Primary column stored at index slot `i`.
    pub fn fetch_slot(&self, i: usize) -> usize {
        self.to_primary[i]
    }

    /// Primary order → index order.
    pub fn map(&self, tuple: &Tuple) -> Tuple {
        let ids: Vec<NodeId> = self.to_primary.iter().map(|&c| tuple.get(c)).collect();
        Tuple::new(&ids)
    }

    /// Index order → primary order.
    pub fn unmap(&self, tuple: &Tuple) -> Tuple {
        let mut ids = vec![NodeId::UNDEFINED; self.arity()];
        for (i, &c) in self.to_primary.iter().enumerate() {
            ids[c] = tuple.get(i);
        }
        Tuple::new(&ids)
    }

    /// Pattern slots in index order.
    pub fn map_pattern(&self, pattern: &[Option<NodeId>]) -> Vec<Option<NodeId>> {
        self.to_primary.iter().map(|&c| pattern[c]).collect()
    }

    /// Index key of a primary-order tuple.
    pub fn key(&self, tuple: &Tuple) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.arity() * NodeId::SIZE);
        for &c in &self.to_primary {
            key.extend_from_slice(&tuple.get(c).to_bytes());
        }
        key
    }

    /// Primary-order tuple of an index key.
    pub fn tuple_of_key(&self, key: &[u8]) -> Tuple {
        let mut ids = vec![NodeId::UNDEFINED; self.arity()];
        for (i, &c) in self.to_primary.iter().enumerate() {
            ids[c] = NodeId::from_bytes(&key[i * NodeId::SIZE..]);
        }
        Tuple::new(&ids)
    }
}

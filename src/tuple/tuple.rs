//! Fixed-arity tuples of NodeIds.

use std::fmt;

use crate::node::NodeId;

/// Largest supported arity (quads).
pub const MAX_ARITY: usize = 4;

/// A triple or quad of NodeIds, in the table's column order (`SPO` or
/// `GSPO`).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tuple {
    ids: [NodeId; MAX_ARITY],
    len: u8,
}

impl Tuple {
    /// # Panics
    /// Panics if `ids` is empty or longer than [`MAX_ARITY`].
    pub fn new(ids: &[NodeId]) -> Self {
        assert!(!ids.is_empty() && ids.len() <= MAX_ARITY, "tuple arity {}", ids.len());
        let mut slots = [NodeId::UNDEFINED; MAX_ARITY];
        slots[..ids.len()].copy_from_slice(ids);
        Self {
            ids: slots,
            len: ids.len() as u8,
        }
    }

    pub fn triple(s: NodeId, p: NodeId, o: NodeId) -> Self {
        Self::new(&[s, p, o])
    }

    pub fn quad(g: NodeId, s: NodeId, p: NodeId, o: NodeId) -> Self {
        Self::new(&[g, s, p, o])
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn get(&self, i: usize) -> NodeId {
        self.as_slice()[i]
    }

    #[inline]
    pub fn as_slice(&self) -> &[NodeId] {
        &self.ids[..self.len as usize]
    }

    /// Does this tuple match a pattern of the same arity? `None` slots and
    /// [`NodeId::UNDEFINED`] match anything.
    pub fn matches(&self, pattern: &[Option<NodeId>]) -> bool {
        pattern.len() == self.arity()
            && pattern
                .iter()
                .zip(self.as_slice())
                .all(|(p, id)| bound(*p).map_or(true, |p| p == *id))
    }
}

/// The id of a pattern slot, if it is bound.
#[inline]
pub(crate) fn bound(slot: Option<NodeId>) -> Option<NodeId> {
    slot.filter(|id| *id != NodeId::UNDEFINED)
}

impl fmt::Debug for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

//! NodeId - the 64-bit identifier of an RDF term.
//!
//! ```text
//!  63  62        56 55                                              0
//! ┌───┬────────────┬─────────────────────────────────────────────────┐
//! │ 0 │            offset of the term in the node log (63 bits)     │  pointer
//! ├───┼────────────┼─────────────────────────────────────────────────┤
//! │ 1 │ type (7)   │ value (56)                                      │  inline
//! └───┴────────────┴─────────────────────────────────────────────────┘
//! ```

use std::fmt;

/// Identifier of an RDF term in a store.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u64);

const INLINE_BIT: u64 = 1 << 63;
const VALUE_BITS: u32 = 56;
const VALUE_MASK: u64 = (1 << VALUE_BITS) - 1;

/// Inline type reserved for the sentinels.
const SENTINEL_TYPE: u8 = 0x7F;

impl NodeId {
    /// "Any" / not yet known.
    pub const UNDEFINED: NodeId = NodeId(u64::MAX);
    /// A term known to have no id.
    pub const DOES_NOT_EXIST: NodeId = NodeId(u64::MAX - 1);

    /// Width of an encoded id.
    pub const SIZE: usize = 8;

    /// Pointer id for a node log offset.
    #[inline]
    pub fn from_offset(offset: u64) -> Self {
        debug_assert!(offset & INLINE_BIT == 0);
        NodeId(offset)
    }

    /// Inline id from a type tag and a 56-bit value.
    #[inline]
    pub(crate) fn inline(kind: u8, value: u64) -> Self {
        debug_assert!(kind < SENTINEL_TYPE);
        NodeId(INLINE_BIT | ((kind as u64) << VALUE_BITS) | (value & VALUE_MASK))
    }

    #[inline]
    pub fn is_inline(self) -> bool {
        self.0 & INLINE_BIT != 0 && !self.is_sentinel()
    }

    #[inline]
    pub fn is_pointer(self) -> bool {
        self.0 & INLINE_BIT == 0
    }

    #[inline]
    pub fn is_sentinel(self) -> bool {
        self == Self::UNDEFINED || self == Self::DOES_NOT_EXIST
    }

    /// Node log offset of a pointer id.
    #[inline]
    pub fn offset(self) -> Option<u64> {
        self.is_pointer().then_some(self.0)
    }

    #[inline]
    pub(crate) fn inline_type(self) -> u8 {
        ((self.0 >> VALUE_BITS) & 0x7F) as u8
    }

    #[inline]
    pub(crate) fn inline_value(self) -> u64 {
        self.0 & VALUE_MASK
    }

    /// Big-endian bytes; index keys compare in id order.
    #[inline]
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[..8]);
        NodeId(u64::from_be_bytes(buf))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::UNDEFINED => write!(f, "NodeId(undefined)"),
            Self::DOES_NOT_EXIST => write!(f, "NodeId(does-not-exist)"),
            id if id.is_inline() => {
                write!(f, "NodeId(inline {}:{:#x})", id.inline_type(), id.inline_value())
            }
            id => write!(f, "NodeId(@{})", id.0),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

//! Tuple tables - triples and quads stored in several column orders.
//!
//! ```text
//!            add (s,p,o)
//!                │
//!     ┌──────────┼──────────┐
//!     ▼          ▼          ▼
//!   SPO.idx    POS.idx    OSP.idx      one B+Tree per order
//!  (primary)
//! ```

mod column_map;
#[allow(clippy::module_inception)]
mod tuple;
mod tuple_index;
mod tuple_table;

pub use column_map::ColumnMap;
pub use tuple::{Tuple, MAX_ARITY};
pub use tuple_index::{TupleIndex, TupleIter};
pub use tuple_table::{TupleTable, TupleWrite};

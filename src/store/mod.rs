//! The store: one handle owning every table, the journal and the
//! transaction coordinator.

mod compact;
mod exclusive;
#[allow(clippy::module_inception)]
mod store;

pub use compact::CompactStats;
pub use exclusive::{ExclusiveGuard, WritersBlocked};
pub use store::Store;
pub(crate) use store::{StoreInner, Tables};

//! Eviction policy implementations (replacers).
//!
//! - [`LruReplacer`] - least recently used, used by every block cache

mod lru;

pub use self::lru::LruReplacer;

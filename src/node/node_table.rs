//! Node table: the two-way dictionary between terms and NodeIds.
//!
//! ```text
//!   term ──hash──▶ nodes.idn (B+Tree: hash[16] → NodeId[8])
//!                                     │
//!   NodeId (pointer) = offset ────────┴──▶ nodes.dat (node log)
//! ```
//!
//! Reads go through a [`NodeView`]: the index root and node log length of a
//! snapshot. Writes go through a [`NodeWrite`], which appends to the log and
//! inserts into a copy-on-write index; its new entries reach the shared
//! caches only once the transaction has committed.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::common::{BlockId, Error, Result, StoreParams, Version};
use crate::index::{BPlusTree, RecordFactory, WriteContext};
use crate::node::inline;
use crate::node::node_id::NodeId;
use crate::node::node_log::NodeLog;
use crate::node::term::Term;

/// Record shape of the node index.
pub(crate) const NODE_INDEX_RECORD: RecordFactory = RecordFactory::new(16, NodeId::SIZE);

/// The node table as of one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeView {
    pub root: BlockId,
    pub log_len: u64,
    pub version: Version,
}

/// Node table state of one write transaction.
pub struct NodeWrite {
    ctx: WriteContext,
    /// Committed log length when the transaction started.
    base_len: u64,
    pending: HashMap<Term, NodeId>,
    created: Vec<(NodeId, Term)>,
}

impl NodeWrite {
    /// Index root including this transaction's inserts.
    pub fn root(&self) -> BlockId {
        self.ctx.root()
    }

    /// Committed index blocks this transaction replaced.
    pub fn retired(&self) -> &[BlockId] {
        self.ctx.retired()
    }

    /// Terms allocated by this transaction, in allocation order.
    pub fn created(&self) -> &[(NodeId, Term)] {
        &self.created
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
    }
}

/// Shared lookup caches.
struct Caches {
    node_to_id: Option<LruCache<Term, NodeId>>,
    id_to_node: Option<LruCache<NodeId, Term>>,
    /// Term → highest version at which it was seen to be absent.
    misses: Option<LruCache<Term, Version>>,
}

fn cache<K: std::hash::Hash + Eq, V>(size: usize) -> Option<LruCache<K, V>> {
    NonZeroUsize::new(size).map(LruCache::new)
}

pub struct NodeTable {
    log: NodeLog,
    index: BPlusTree,
    caches: Mutex<Caches>,
}

impl NodeTable {
    /// # Errors
    /// `Error::Config` if the index block size cannot hold node records.
    pub fn new(log: NodeLog, index: BPlusTree, params: &StoreParams) -> Result<Self> {
        if *index.factory() != NODE_INDEX_RECORD {
            return Err(Error::Config("node index has the wrong record shape".into()));
        }
        Ok(Self {
            log,
            index,
            caches: Mutex::new(Caches {
                node_to_id: cache(params.node_to_id_cache_size),
                id_to_node: cache(params.id_to_node_cache_size),
                misses: cache(params.node_miss_cache_size),
            }),
        })
    }

    pub fn log(&self) -> &NodeLog {
        &self.log
    }

    pub fn index(&self) -> &BPlusTree {
        &self.index
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// NodeId of `term` in `view`, without allocating.
    pub fn get_node_id(&self, view: &NodeView, term: &Term) -> Result<Option<NodeId>> {
        if let Some(id) = inline::encode(term) {
            return Ok(Some(id));
        }
        {
            let mut caches = self.caches.lock();
            if let Some(&id) = caches.node_to_id.as_mut().and_then(|c| c.get(term)) {
                // Committed after this snapshot?
                return Ok(id.offset().filter(|&o| o < view.log_len).map(|_| id));
            }
            if let Some(&absent_at) = caches.misses.as_mut().and_then(|c| c.get(term)) {
                if absent_at >= view.version {
                    return Ok(None);
                }
            }
        }

        match self.lookup(view.root, term)? {
            Some(id) => {
                let mut caches = self.caches.lock();
                if let Some(c) = caches.node_to_id.as_mut() {
                    c.put(term.clone(), id);
                }
                if let Some(c) = caches.id_to_node.as_mut() {
                    c.put(id, term.clone());
                }
                Ok(Some(id))
            }
            None => {
                let mut caches = self.caches.lock();
                if let Some(c) = caches.misses.as_mut() {
                    let seen = c.get(term).copied().unwrap_or(0);
                    c.put(term.clone(), seen.max(view.version));
                }
                Ok(None)
            }
        }
    }

    /// Term of `id` in `view`.
    ///
    /// # Errors
    /// `Error::UnknownId` for sentinels, ids this snapshot does not have and
    /// offsets that are not the start of an allocated entry.
    pub fn node_for_id(&self, view: &NodeView, id: NodeId) -> Result<Term> {
        self.node_for_id_within(view.root, view.log_len, id)
    }

    /// An entry counts only if it decodes and the hash index maps its term
    /// back to `id`; anything else is an offset that was never allocated.
    fn node_for_id_within(&self, root: BlockId, log_len: u64, id: NodeId) -> Result<Term> {
        if id.is_inline() {
            return inline::decode(id).ok_or(Error::UnknownId(id.0));
        }
        let offset = match id.offset() {
            Some(offset) if offset < log_len => offset,
            _ => return Err(Error::UnknownId(id.0)),
        };
        if let Some(term) = self
            .caches
            .lock()
            .id_to_node
            .as_mut()
            .and_then(|c| c.get(&id).cloned())
        {
            return Ok(term);
        }

        let term = match self.log.read(offset, log_len).and_then(|bytes| Term::decode(&bytes)) {
            Ok(term) => term,
            Err(Error::CorruptBlock { reason, .. }) => {
                debug!(id = %id, reason = %reason, "no node entry at offset");
                return Err(Error::UnknownId(id.0));
            }
            Err(e) => return Err(e),
        };
        if self.lookup(root, &term)? != Some(id) {
            debug!(id = %id, "offset is inside another node entry");
            return Err(Error::UnknownId(id.0));
        }
        if let Some(c) = self.caches.lock().id_to_node.as_mut() {
            c.put(id, term.clone());
        }
        Ok(term)
    }

    fn lookup(&self, root: BlockId, term: &Term) -> Result<Option<NodeId>> {
        Ok(self
            .index
            .get(root, &term.hash())?
            .map(|record| NodeId::from_bytes(record.value())))
    }

    // ========================================================================
    // Writes
    // ========================================================================

    pub fn begin_write(&self, view: &NodeView, version: Version) -> NodeWrite {
        NodeWrite {
            ctx: WriteContext::new(view.root, version),
            base_len: view.log_len,
            pending: HashMap::new(),
            created: Vec::new(),
        }
    }

    /// NodeId of `term`, allocating one if the term is new.
    pub fn id_for_node(&self, write: &mut NodeWrite, term: &Term) -> Result<NodeId> {
        if let Some(id) = self.get_node_id_for_write(write, term)? {
            return Ok(id);
        }
        self.allocate(write, term)
    }

    /// Index and append a term not yet in the table.
    fn allocate(&self, write: &mut NodeWrite, term: &Term) -> Result<NodeId> {
        // Only the writer appends, so the next entry starts at the log end.
        let id = NodeId::from_offset(self.log.len());
        let record = NODE_INDEX_RECORD.create(&term.hash(), &id.to_bytes());
        if !self.index.insert(&mut write.ctx, record.as_bytes())? {
            warn!(term = %term, "node hash already indexed for another term");
            return Err(Error::corrupt(
                self.index.blocks().name(),
                id.0,
                format!("hash of {} collides with an indexed term", term),
            ));
        }
        let offset = self.log.append(&term.encode())?;
        debug_assert_eq!(NodeId::from_offset(offset), id);
        write.pending.insert(term.clone(), id);
        write.created.push((id, term.clone()));
        trace!(id = %id, "allocated node");
        Ok(id)
    }

    /// Like [`NodeTable::get_node_id`], seeing the transaction's own terms.
    pub fn get_node_id_for_write(&self, write: &NodeWrite, term: &Term) -> Result<Option<NodeId>> {
        if let Some(id) = inline::encode(term) {
            return Ok(Some(id));
        }
        if let Some(&id) = write.pending.get(term) {
            return Ok(Some(id));
        }
        if let Some(&id) = self
            .caches
            .lock()
            .node_to_id
            .as_mut()
            .and_then(|c| c.get(term))
        {
            // The writer always sees the latest commit.
            return Ok(Some(id));
        }
        self.lookup(write.ctx.root(), term)
    }

    /// Like [`NodeTable::node_for_id`], seeing the transaction's own terms.
    pub fn node_for_id_for_write(&self, write: &NodeWrite, id: NodeId) -> Result<Term> {
        self.node_for_id_within(write.ctx.root(), self.log.len(), id)
    }

    /// Discard the transaction: free its index blocks and cut the log back.
    pub fn abort(&self, write: NodeWrite) -> Result<()> {
        let base_len = write.base_len;
        self.index.abort(write.ctx)?;
        self.log.truncate(base_len)
    }

    /// Make a durable commit visible: retire replaced index blocks and
    /// publish the new terms to the caches. Returns the new root.
    pub fn complete(&self, write: NodeWrite) -> BlockId {
        let root = self.index.commit(write.ctx);
        let mut caches = self.caches.lock();
        for (id, term) in write.created {
            if let Some(c) = caches.misses.as_mut() {
                c.pop(&term);
            }
            if let Some(c) = caches.id_to_node.as_mut() {
                c.put(id, term.clone());
            }
            if let Some(c) = caches.node_to_id.as_mut() {
                c.put(term, id);
            }
        }
        root
    }

    /// Force the log and the index blocks to disk.
    pub fn sync(&self) -> Result<()> {
        self.log.sync()?;
        self.index.blocks().sync()
    }

    /// Drop every cached entry; used after recovery rewinds the log.
    pub fn clear_caches(&self) {
        let mut caches = self.caches.lock();
        if let Some(c) = caches.node_to_id.as_mut() {
            c.clear();
        }
        if let Some(c) = caches.id_to_node.as_mut() {
            c.clear();
        }
        if let Some(c) = caches.misses.as_mut() {
            c.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BlockManager;
    use crate::node::term::xsd;
    use crate::storage::{BlockFile, MemChannel};

    fn create_test_table(params: &StoreParams) -> (NodeTable, NodeView) {
        let log = NodeLog::new(Box::new(MemChannel::new("nodes.dat"))).unwrap();
        let blocks = BlockManager::new(BlockFile::memory("nodes.idn", 512), 32, None);
        let index = BPlusTree::new(blocks, NODE_INDEX_RECORD).unwrap();
        let root = index.create_root(0).unwrap();
        let table = NodeTable::new(log, index, params).unwrap();
        (
            table,
            NodeView {
                root,
                log_len: 0,
                version: 0,
            },
        )
    }

    /// Commit `write` and return the view of the next version.
    fn commit(table: &NodeTable, write: NodeWrite, version: Version) -> NodeView {
        let root = table.complete(write);
        NodeView {
            root,
            log_len: table.log().len(),
            version,
        }
    }

    #[test]
    fn test_allocate_once() {
        let (table, view) = create_test_table(&StoreParams::default());
        let mut write = table.begin_write(&view, 1);

        let a = table.id_for_node(&mut write, &Term::iri("http://a/")).unwrap();
        let b = table.id_for_node(&mut write, &Term::literal("b")).unwrap();
        let again = table.id_for_node(&mut write, &Term::iri("http://a/")).unwrap();
        assert_eq!(a, again);
        assert_ne!(a, b);
        assert!(a.is_pointer());
        assert_eq!(write.created().len(), 2);

        let view = commit(&table, write, 1);
        assert_eq!(table.node_for_id(&view, b).unwrap(), Term::literal("b"));
        assert_eq!(table.get_node_id(&view, &Term::iri("http://a/")).unwrap(), Some(a));
    }

    #[test]
    fn test_inline_terms_never_allocate() {
        let (table, view) = create_test_table(&StoreParams::default());
        let mut write = table.begin_write(&view, 1);
        let five = Term::typed_literal("5", xsd::INTEGER);

        let id = table.id_for_node(&mut write, &five).unwrap();
        assert!(id.is_inline());
        assert!(write.is_empty());
        assert_eq!(table.log().len(), 0);
        assert_eq!(table.node_for_id(&view, id).unwrap(), five);
    }

    #[test]
    fn test_uncommitted_terms_invisible() {
        let (table, view) = create_test_table(&StoreParams::default());
        let mut write = table.begin_write(&view, 1);
        let term = Term::blank("b0");
        let id = table.id_for_node(&mut write, &term).unwrap();

        assert_eq!(table.get_node_id(&view, &term).unwrap(), None);
        assert!(matches!(table.node_for_id(&view, id), Err(Error::UnknownId(_))));
        assert_eq!(table.node_for_id_for_write(&write, id).unwrap(), term);

        // The miss recorded at version 0 does not hide the term at version 1
        let next = commit(&table, write, 1);
        assert_eq!(table.get_node_id(&next, &term).unwrap(), Some(id));
        assert_eq!(table.get_node_id(&view, &term).unwrap(), None);
    }

    #[test]
    fn test_abort_rewinds() {
        let (table, view) = create_test_table(&StoreParams::default());
        let mut write = table.begin_write(&view, 1);
        let id = table.id_for_node(&mut write, &Term::iri("http://gone/")).unwrap();
        table.abort(write).unwrap();

        assert_eq!(table.log().len(), 0);
        let mut write = table.begin_write(&view, 2);
        assert_eq!(table.get_node_id_for_write(&write, &Term::iri("http://gone/")).unwrap(), None);
        let other = table.id_for_node(&mut write, &Term::iri("http://other/")).unwrap();
        assert_eq!(other, id);
    }

    #[test]
    fn test_sentinels_unknown() {
        let (table, view) = create_test_table(&StoreParams::default());
        for id in [NodeId::UNDEFINED, NodeId::DOES_NOT_EXIST, NodeId::from_offset(0)] {
            assert!(matches!(table.node_for_id(&view, id), Err(Error::UnknownId(_))));
        }
    }

    #[test]
    fn test_id_inside_entry_is_unknown() {
        let (table, view) = create_test_table(&StoreParams::default());
        let mut write = table.begin_write(&view, 1);
        let first = table.id_for_node(&mut write, &Term::iri("http://example.org/a")).unwrap();
        let second = table.id_for_node(&mut write, &Term::literal("b")).unwrap();
        let view = commit(&table, write, 1);

        let end = table.log().len();
        let inner: Vec<u64> = (1..end).filter(|&o| o != second.offset().unwrap()).collect();
        for offset in inner {
            let id = NodeId::from_offset(offset);
            assert!(
                matches!(table.node_for_id(&view, id), Err(Error::UnknownId(_))),
                "offset {}",
                offset
            );
        }
        assert_eq!(table.node_for_id(&view, first).unwrap(), Term::iri("http://example.org/a"));
        assert_eq!(table.node_for_id(&view, second).unwrap(), Term::literal("b"));
    }

    #[test]
    fn test_hash_already_indexed_is_refused() {
        let (table, view) = create_test_table(&StoreParams::default());
        let mut write = table.begin_write(&view, 1);
        let term = Term::iri("http://example.org/taken");
        let squatter = NODE_INDEX_RECORD.create(&term.hash(), &NodeId::from_offset(99).to_bytes());
        table.index().insert(&mut write.ctx, squatter.as_bytes()).unwrap();

        assert!(matches!(
            table.allocate(&mut write, &term),
            Err(Error::CorruptBlock { .. })
        ));
        assert_eq!(table.log().len(), 0);
        assert!(write.created().is_empty());
    }

    #[test]
    fn test_without_caches() {
        let params = StoreParams::builder()
            .node_to_id_cache_size(0)
            .id_to_node_cache_size(0)
            .node_miss_cache_size(0)
            .build()
            .unwrap();
        let (table, view) = create_test_table(&params);
        let mut write = table.begin_write(&view, 1);
        let ids: Vec<NodeId> = (0..200)
            .map(|i| table.id_for_node(&mut write, &Term::iri(format!("http://x/{}", i))).unwrap())
            .collect();
        let view = commit(&table, write, 1);

        for (i, id) in ids.iter().enumerate() {
            let term = Term::iri(format!("http://x/{}", i));
            assert_eq!(table.node_for_id(&view, *id).unwrap(), term);
            assert_eq!(table.get_node_id(&view, &term).unwrap(), Some(*id));
        }
        table.index().check(view.root).unwrap();
    }
}

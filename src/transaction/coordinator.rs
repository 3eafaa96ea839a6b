//! Transaction coordinator: the writer lock, snapshots and counters.
//!
//! ```text
//!   begin(Read) ──▶ register(latest) ──────────────────────────▶ end
//!   begin(Write) ─▶ acquire writer ─▶ register(latest) ─▶ commit ─▶ publish(v+1)
//!                        ▲                                          │
//!                        └──────────── release writer ◀─────────────┘
//! ```
//!
//! Registering a snapshot, publishing a new one and reclaiming against the
//! oldest registered version all hold the `active` lock, so no snapshot can
//! be registered between computing the oldest version and freeing the
//! blocks retired before it.
//!
//! Exclusive mode shuts the gate every transaction passes through at
//! begin: new transactions wait, and the exclusive holder waits until the
//! running ones have finished.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::common::{BlockId, Error, Result, Version};
use crate::node::NodeView;

/// The committed state a transaction reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub version: Version,
    pub node_root: BlockId,
    pub node_log_len: u64,
    pub triple_roots: Vec<BlockId>,
    pub quad_roots: Vec<BlockId>,
}

impl Snapshot {
    pub fn node_view(&self) -> NodeView {
        NodeView {
            root: self.node_root,
            log_len: self.node_log_len,
            version: self.version,
        }
    }
}

/// Transaction counters.
#[derive(Debug, Default)]
pub struct TxnCounters {
    begun: AtomicU64,
    begun_read: AtomicU64,
    begun_write: AtomicU64,
    finished: AtomicU64,
    active_readers: AtomicU64,
    active_writers: AtomicU64,
}

/// Point-in-time copy of [`TxnCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxnStats {
    pub begun: u64,
    pub begun_read: u64,
    pub begun_write: u64,
    pub finished: u64,
    pub active_readers: u64,
    pub active_writers: u64,
}

impl fmt::Display for TxnStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transactions: {} begun ({} read, {} write), {} finished, {} readers and {} writers active",
            self.begun,
            self.begun_read,
            self.begun_write,
            self.finished,
            self.active_readers,
            self.active_writers
        )
    }
}

impl TxnCounters {
    pub fn snapshot(&self) -> TxnStats {
        TxnStats {
            begun: self.begun.load(Ordering::Relaxed),
            begun_read: self.begun_read.load(Ordering::Relaxed),
            begun_write: self.begun_write.load(Ordering::Relaxed),
            finished: self.finished.load(Ordering::Relaxed),
            active_readers: self.active_readers.load(Ordering::Relaxed),
            active_writers: self.active_writers.load(Ordering::Relaxed),
        }
    }
}

/// Transactions admitted, and whether exclusive mode holds the gate.
#[derive(Debug, Default)]
struct Gate {
    exclusive: bool,
    admitted: usize,
}

pub struct Coordinator {
    /// True while a write transaction exists or writers are blocked.
    writer: Mutex<bool>,
    writer_released: Condvar,
    current: RwLock<Arc<Snapshot>>,
    /// Registered snapshot versions and how many transactions hold each.
    active: Mutex<BTreeMap<Version, usize>>,
    gate: Mutex<Gate>,
    gate_changed: Condvar,
    failed: Mutex<Option<String>>,
    counters: TxnCounters,
}

impl Coordinator {
    pub fn new(initial: Snapshot) -> Self {
        Self {
            writer: Mutex::new(false),
            writer_released: Condvar::new(),
            current: RwLock::new(Arc::new(initial)),
            active: Mutex::new(BTreeMap::new()),
            gate: Mutex::new(Gate::default()),
            gate_changed: Condvar::new(),
            failed: Mutex::new(None),
            counters: TxnCounters::default(),
        }
    }

    // ========================================================================
    // Writer lock
    // ========================================================================

    /// Become the writer, waiting for the current one to finish.
    pub fn acquire_writer(&self) {
        let mut busy = self.writer.lock();
        while *busy {
            self.writer_released.wait(&mut busy);
        }
        *busy = true;
    }

    /// Become the writer if there is none; never waits.
    pub fn try_acquire_writer(&self) -> bool {
        let mut busy = self.writer.lock();
        if *busy {
            return false;
        }
        *busy = true;
        true
    }

    pub fn release_writer(&self) {
        let mut busy = self.writer.lock();
        debug_assert!(*busy, "writer released twice");
        *busy = false;
        self.writer_released.notify_one();
    }

    pub fn has_writer(&self) -> bool {
        *self.writer.lock()
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// The latest committed snapshot, without registering it.
    pub fn current(&self) -> Arc<Snapshot> {
        self.current.read().clone()
    }

    /// Take the latest snapshot and register it as in use.
    pub fn register_current(&self) -> Arc<Snapshot> {
        let mut active = self.active.lock();
        let snapshot = self.current.read().clone();
        *active.entry(snapshot.version).or_insert(0) += 1;
        snapshot
    }

    pub fn unregister(&self, version: Version) {
        let mut active = self.active.lock();
        if let Some(count) = active.get_mut(&version) {
            *count -= 1;
            if *count == 0 {
                active.remove(&version);
            }
        }
    }

    /// Oldest registered version; `None` when nothing is registered.
    ///
    /// The answer may be stale as soon as it is returned; reclaim through
    /// [`Coordinator::with_oldest_active`].
    pub fn oldest_active(&self) -> Option<Version> {
        self.active.lock().keys().next().copied()
    }

    /// Run `f` with the oldest registered version while no snapshot can be
    /// registered or published.
    pub fn with_oldest_active<R>(&self, f: impl FnOnce(Option<Version>) -> R) -> R {
        let active = self.active.lock();
        f(active.keys().next().copied())
    }

    /// Make `snapshot` the latest committed state.
    pub fn publish(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let _active = self.active.lock();
        let snapshot = Arc::new(snapshot);
        *self.current.write() = snapshot.clone();
        snapshot
    }

    // ========================================================================
    // Admission and exclusive mode
    // ========================================================================

    /// Admit a transaction, waiting while exclusive mode is on.
    pub fn admit(&self) {
        let mut gate = self.gate.lock();
        while gate.exclusive {
            self.gate_changed.wait(&mut gate);
        }
        gate.admitted += 1;
    }

    /// Admit a transaction unless exclusive mode is on; never waits.
    pub fn try_admit(&self) -> bool {
        let mut gate = self.gate.lock();
        if gate.exclusive {
            return false;
        }
        gate.admitted += 1;
        true
    }

    /// Admit a transaction begun by the holder of exclusive mode.
    pub fn admit_within_exclusive(&self) {
        let mut gate = self.gate.lock();
        debug_assert!(gate.exclusive, "not in exclusive mode");
        gate.admitted += 1;
    }

    /// An admitted transaction has finished.
    pub fn depart(&self) {
        let mut gate = self.gate.lock();
        debug_assert!(gate.admitted > 0, "departure without admission");
        gate.admitted = gate.admitted.saturating_sub(1);
        if gate.admitted == 0 {
            self.gate_changed.notify_all();
        }
    }

    /// Number of admitted transactions still running.
    pub fn admitted(&self) -> usize {
        self.gate.lock().admitted
    }

    /// Close the gate and wait for every admitted transaction to finish.
    ///
    /// The caller must not hold a transaction, or this never returns.
    pub fn start_exclusive(&self) {
        let mut gate = self.gate.lock();
        while gate.exclusive {
            self.gate_changed.wait(&mut gate);
        }
        gate.exclusive = true;
        while gate.admitted > 0 {
            self.gate_changed.wait(&mut gate);
        }
    }

    /// Enter exclusive mode only if nothing is running; never waits.
    pub fn try_exclusive(&self) -> bool {
        let mut gate = self.gate.lock();
        if gate.exclusive || gate.admitted > 0 {
            return false;
        }
        gate.exclusive = true;
        true
    }

    pub fn finish_exclusive(&self) {
        let mut gate = self.gate.lock();
        debug_assert!(gate.exclusive, "exclusive mode finished twice");
        gate.exclusive = false;
        self.gate_changed.notify_all();
    }

    pub fn is_exclusive(&self) -> bool {
        self.gate.lock().exclusive
    }

    // ========================================================================
    // Failure and counters
    // ========================================================================

    /// Refuse all further transactions until the store is reopened.
    pub fn fail(&self, reason: impl Into<String>) {
        let mut failed = self.failed.lock();
        if failed.is_none() {
            *failed = Some(reason.into());
        }
    }

    pub fn check_failed(&self) -> Result<()> {
        match self.failed.lock().as_ref() {
            Some(reason) => Err(Error::StoreFailed(reason.clone())),
            None => Ok(()),
        }
    }

    pub(crate) fn record_begin(&self, write: bool) {
        self.counters.begun.fetch_add(1, Ordering::Relaxed);
        if write {
            self.counters.begun_write.fetch_add(1, Ordering::Relaxed);
            self.counters.active_writers.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.begun_read.fetch_add(1, Ordering::Relaxed);
            self.counters.active_readers.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A read transaction became a writer.
    pub(crate) fn record_promote(&self) {
        self.counters.active_readers.fetch_sub(1, Ordering::Relaxed);
        self.counters.active_writers.fetch_add(1, Ordering::Relaxed);
    }

    /// A transaction ended; `was_reader` if it ended in read mode.
    pub(crate) fn record_end(&self, was_reader: bool) {
        self.counters.finished.fetch_add(1, Ordering::Relaxed);
        if was_reader {
            self.counters.active_readers.fetch_sub(1, Ordering::Relaxed);
        } else {
            self.counters.active_writers.fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> TxnStats {
        self.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    fn snapshot(version: Version) -> Snapshot {
        Snapshot {
            version,
            node_root: BlockId(0),
            node_log_len: 0,
            triple_roots: vec![BlockId(0)],
            quad_roots: vec![BlockId(0)],
        }
    }

    #[test]
    fn test_register_and_oldest() {
        let coordinator = Coordinator::new(snapshot(0));
        assert_eq!(coordinator.oldest_active(), None);

        let a = coordinator.register_current();
        coordinator.publish(snapshot(1));
        let b = coordinator.register_current();
        let c = coordinator.register_current();
        assert_eq!((a.version, b.version, c.version), (0, 1, 1));
        assert_eq!(coordinator.oldest_active(), Some(0));

        coordinator.unregister(0);
        assert_eq!(coordinator.oldest_active(), Some(1));
        coordinator.unregister(1);
        assert_eq!(coordinator.oldest_active(), Some(1));
        coordinator.unregister(1);
        assert_eq!(coordinator.oldest_active(), None);
    }

    #[test]
    fn test_single_writer() {
        let coordinator = Arc::new(Coordinator::new(snapshot(0)));
        coordinator.acquire_writer();
        assert!(!coordinator.try_acquire_writer());

        let entered = Arc::new(AtomicBool::new(false));
        let handle = {
            let coordinator = coordinator.clone();
            let entered = entered.clone();
            thread::spawn(move || {
                coordinator.acquire_writer();
                entered.store(true, Ordering::SeqCst);
                coordinator.release_writer();
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!entered.load(Ordering::SeqCst));
        coordinator.release_writer();
        handle.join().unwrap();
        assert!(entered.load(Ordering::SeqCst));
        assert!(!coordinator.has_writer());
    }

    #[test]
    fn test_failure_sticks() {
        let coordinator = Coordinator::new(snapshot(0));
        assert!(coordinator.check_failed().is_ok());
        coordinator.fail("disk gone");
        coordinator.fail("second reason");
        match coordinator.check_failed() {
            Err(Error::StoreFailed(reason)) => assert_eq!(reason, "disk gone"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_counters() {
        let coordinator = Coordinator::new(snapshot(0));
        coordinator.record_begin(false);
        coordinator.record_begin(false);
        coordinator.acquire_writer();
        coordinator.record_begin(true);
        coordinator.record_end(true);

        let stats = coordinator.stats();
        assert_eq!(stats.begun, 3);
        assert_eq!(stats.begun_read, 2);
        assert_eq!(stats.begun_write, 1);
        assert_eq!(stats.finished, 1);
        assert_eq!(stats.active_readers, 1);
        assert_eq!(stats.active_writers, 1);

        coordinator.record_promote();
        coordinator.record_end(false);
        coordinator.record_end(false);
        let stats = coordinator.stats();
        assert_eq!((stats.active_readers, stats.active_writers), (0, 0));
    }

    #[test]
    fn test_blocked_writers_are_not_counted() {
        let coordinator = Coordinator::new(snapshot(0));
        coordinator.acquire_writer();
        assert!(coordinator.has_writer());
        assert_eq!(coordinator.stats().active_writers, 0);
        coordinator.release_writer();
    }

    #[test]
    fn test_no_registration_while_reclaiming() {
        let coordinator = Arc::new(Coordinator::new(snapshot(1)));
        let registered = Arc::new(AtomicBool::new(false));

        let seen = coordinator.with_oldest_active(|oldest| {
            let handle = {
                let coordinator = coordinator.clone();
                let registered = registered.clone();
                thread::spawn(move || {
                    let snapshot = coordinator.register_current();
                    registered.store(true, Ordering::SeqCst);
                    snapshot.version
                })
            };
            thread::sleep(Duration::from_millis(50));
            // The reader waits until reclaiming is done
            assert!(!registered.load(Ordering::SeqCst));
            (oldest, handle)
        });
        assert_eq!(seen.0, None);
        assert_eq!(seen.1.join().unwrap(), 1);
        assert_eq!(coordinator.oldest_active(), Some(1));
    }

    #[test]
    fn test_exclusive_waits_for_running_transactions() {
        let coordinator = Arc::new(Coordinator::new(snapshot(0)));
        coordinator.admit();
        assert!(!coordinator.try_exclusive());

        let exclusive = Arc::new(AtomicBool::new(false));
        let handle = {
            let coordinator = coordinator.clone();
            let exclusive = exclusive.clone();
            thread::spawn(move || {
                coordinator.start_exclusive();
                exclusive.store(true, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(50));
                coordinator.finish_exclusive();
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!exclusive.load(Ordering::SeqCst));
        // The gate is already shut to newcomers
        assert!(coordinator.is_exclusive());
        assert!(!coordinator.try_admit());

        coordinator.depart();
        // Blocks until exclusive mode is over
        coordinator.admit();
        assert!(exclusive.load(Ordering::SeqCst));
        assert!(!coordinator.is_exclusive());
        handle.join().unwrap();
        coordinator.depart();
        assert_eq!(coordinator.admitted(), 0);
    }

    #[test]
    fn test_try_exclusive_when_idle() {
        let coordinator = Coordinator::new(snapshot(0));
        assert!(coordinator.try_exclusive());
        assert!(!coordinator.try_exclusive());
        assert!(!coordinator.try_admit());
        coordinator.finish_exclusive();
        assert!(coordinator.try_admit());
        coordinator.depart();
    }
}

//! End-to-end tests of the store: durability, isolation and the writer
//! discipline.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tdb_storage::{xsd, Error, NodeId, Store, StoreParams, Term, Tuple, TxnMode, TxnState, TxnType};
use tempfile::tempdir;

fn create_test_params() -> StoreParams {
    StoreParams::builder()
        .block_size(1024)
        .block_cache_frames(64)
        .build()
        .unwrap()
}

fn iri(n: usize) -> Term {
    Term::iri(format!("http://example.org/r{}", n))
}

/// Add a triple of IRIs and return its ids.
fn add(store: &Store, s: usize, p: usize, o: usize) -> (NodeId, NodeId, NodeId) {
    store
        .write(|txn| {
            let ids = (
                txn.id_for_node(&iri(s))?,
                txn.id_for_node(&iri(p))?,
                txn.id_for_node(&iri(o))?,
            );
            txn.add_triple(ids.0, ids.1, ids.2)?;
            Ok(ids)
        })
        .unwrap()
}

fn all_triples(store: &Store) -> Vec<Tuple> {
    store
        .read(|txn| txn.find_triples(None, None, None)?.collect())
        .unwrap()
}

// ============================================================================
// Durability
// ============================================================================

#[test]
fn test_ten_thousand_triples_survive_reopen() {
    let dir = tempdir().unwrap();
    let mut rng = StdRng::seed_from_u64(0x7db2);

    let expected: BTreeSet<(NodeId, NodeId, NodeId)> = {
        let store = Store::open(dir.path(), StoreParams::default()).unwrap();
        let expected = store
            .write(|txn| {
                let mut expected = BTreeSet::new();
                while expected.len() < 10_000 {
                    let s = txn.id_for_node(&iri(rng.gen_range(0..100)))?;
                    let p = txn.id_for_node(&iri(1000 + rng.gen_range(0..20)))?;
                    let o = txn.id_for_node(&iri(2000 + rng.gen_range(0..2000)))?;
                    let added = txn.add_triple(s, p, o)?;
                    assert_eq!(added, expected.insert((s, p, o)));
                }
                Ok(expected)
            })
            .unwrap();
        store.close().unwrap();
        expected
    };

    let store = Store::open(dir.path(), StoreParams::default()).unwrap();
    let txn = store.begin(TxnType::Read).unwrap();
    let s = txn.get_node_id(&iri(42)).unwrap().unwrap();

    let found: Vec<Tuple> = txn
        .find_triples(Some(s), None, None)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    let want: Vec<Tuple> = expected
        .iter()
        .filter(|t| t.0 == s)
        .map(|&(s, p, o)| Tuple::triple(s, p, o))
        .collect();
    assert!(!want.is_empty());
    assert_eq!(found, want);

    // Predicate-object order within the subject.
    for pair in found.windows(2) {
        assert!((pair[0].get(1), pair[0].get(2)) < (pair[1].get(1), pair[1].get(2)));
    }
    assert_eq!(txn.find_triples(None, None, None).unwrap().count(), 10_000);
    drop(txn);

    for (name, check) in store.verify().unwrap() {
        if name.ends_with(".idx") && name.len() == 7 {
            assert_eq!(check.records, 10_000, "{}", name);
        }
    }
}

#[test]
fn test_committed_state_survives_unclean_shutdown() {
    let dir = tempdir().unwrap();
    let params = create_test_params();
    {
        let store = Store::open(dir.path(), params.clone()).unwrap();
        add(&store, 1, 2, 3);
        add(&store, 4, 5, 6);
        // No close: the store is simply dropped.
    }

    let store = Store::open(dir.path(), params).unwrap();
    assert_eq!(store.version(), 2);
    assert_eq!(all_triples(&store).len(), 2);
    store
        .read(|txn| {
            assert!(txn.get_node_id(&iri(5))?.is_some());
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_uncommitted_work_leaves_prior_state() {
    let dir = tempdir().unwrap();
    let params = create_test_params();
    {
        let store = Store::open(dir.path(), params.clone()).unwrap();
        add(&store, 1, 2, 3);

        let mut txn = store.begin(TxnType::Write).unwrap();
        for i in 0..500 {
            let id = txn.id_for_node(&iri(10_000 + i)).unwrap();
            txn.add_triple(id, id, id).unwrap();
        }
        // The process dies mid-transaction: nothing is aborted.
        std::mem::forget(txn);
    }

    let store = Store::open(dir.path(), params).unwrap();
    assert_eq!(store.version(), 1);
    assert_eq!(all_triples(&store).len(), 1);
    store
        .read(|txn| {
            assert_eq!(txn.get_node_id(&iri(10_000))?, None);
            Ok(())
        })
        .unwrap();

    // The store keeps working after recovery.
    add(&store, 7, 8, 9);
    assert_eq!(all_triples(&store).len(), 2);
    store.verify().unwrap();
}

#[test]
fn test_deletes_survive_reopen() {
    let dir = tempdir().unwrap();
    let params = create_test_params();
    {
        let store = Store::open(dir.path(), params.clone()).unwrap();
        let (s, p, o) = add(&store, 1, 2, 3);
        add(&store, 1, 2, 4);
        store
            .write(|txn| {
                assert!(txn.delete_triple(s, p, o)?);
                assert!(!txn.delete_triple(s, p, o)?);
                Ok(())
            })
            .unwrap();
        store.close().unwrap();
    }

    let store = Store::open(dir.path(), params).unwrap();
    let triples = all_triples(&store);
    assert_eq!(triples.len(), 1);
    store
        .read(|txn| {
            assert_eq!(txn.node_for_id(triples[0].get(2))?, iri(4));
            Ok(())
        })
        .unwrap();
}

// ============================================================================
// Isolation and the writer
// ============================================================================

#[test]
fn test_snapshot_isolation() {
    let store = Store::memory(create_test_params()).unwrap();
    add(&store, 1, 2, 3);

    let reader = store.begin(TxnType::Read).unwrap();
    let (s, _, _) = add(&store, 4, 5, 6);

    assert_eq!(reader.version(), 1);
    assert_eq!(reader.find_triples(None, None, None).unwrap().count(), 1);
    // The new term is not visible to the old snapshot either.
    assert_eq!(reader.get_node_id(&iri(4)).unwrap(), None);
    assert!(matches!(reader.node_for_id(s), Err(Error::UnknownId(_))));

    let fresh = store.begin(TxnType::Read).unwrap();
    assert_eq!(fresh.version(), 2);
    assert_eq!(fresh.find_triples(None, None, None).unwrap().count(), 2);
    assert_eq!(fresh.node_for_id(s).unwrap(), iri(4));
}

#[test]
fn test_writer_sees_own_changes() {
    let store = Store::memory(create_test_params()).unwrap();
    let mut txn = store.begin(TxnType::Write).unwrap();
    let t = Term::literal("hello");
    let id = txn.id_for_node(&t).unwrap();
    assert_eq!(txn.get_node_id(&t).unwrap(), Some(id));
    assert_eq!(txn.node_for_id(id).unwrap(), t);
    txn.add_triple(id, id, id).unwrap();
    assert_eq!(txn.find_triples(Some(id), None, None).unwrap().count(), 1);

    // Others see none of it until commit.
    let reader = store.begin(TxnType::Read).unwrap();
    assert_eq!(reader.get_node_id(&t).unwrap(), None);
    txn.commit().unwrap();
    assert_eq!(reader.get_node_id(&t).unwrap(), None);
    assert_eq!(store.begin(TxnType::Read).unwrap().get_node_id(&t).unwrap(), Some(id));
}

#[test]
fn test_single_writer() {
    let store = Arc::new(Store::memory(create_test_params()).unwrap());
    let mut first = store.begin(TxnType::Write).unwrap();
    assert!(store.try_begin(TxnType::Write).unwrap().is_none());
    assert!(store.try_begin(TxnType::Read).unwrap().is_some());

    let entered = Arc::new(AtomicBool::new(false));
    let handle = {
        let store = Arc::clone(&store);
        let entered = Arc::clone(&entered);
        thread::spawn(move || {
            let mut second = store.begin(TxnType::Write).unwrap();
            entered.store(true, Ordering::SeqCst);
            assert_eq!(second.version(), 1);
            second.commit().unwrap();
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!entered.load(Ordering::SeqCst));
    let id = first.id_for_node(&iri(1)).unwrap();
    first.add_triple(id, id, id).unwrap();
    first.commit().unwrap();

    handle.join().unwrap();
    assert!(entered.load(Ordering::SeqCst));
    assert_eq!(store.version(), 2);
}

#[test]
fn test_readers_run_alongside_writer() {
    let store = Arc::new(Store::memory(create_test_params()).unwrap());
    add(&store, 0, 0, 0);

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for i in 1..50 {
                add(&store, i, i, i);
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..50 {
                    let txn = store.begin(TxnType::Read).unwrap();
                    // A snapshot at version v holds exactly v triples.
                    let count = txn.find_triples(None, None, None).unwrap().count() as u64;
                    assert_eq!(count, txn.version());
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(all_triples(&store).len(), 50);
    assert_eq!(store.retired_blocks(), 0);
}

// ============================================================================
// Promotion
// ============================================================================

#[test]
fn test_promotion_conflict() {
    let store = Store::memory(create_test_params()).unwrap();
    let mut reader = store.begin(TxnType::Read).unwrap();
    add(&store, 1, 2, 3);

    match reader.promote() {
        Err(Error::ConcurrentModification { snapshot, current }) => {
            assert_eq!((snapshot, current), (0, 1));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(reader.mode(), TxnMode::Read);
    // The writer lock was given back.
    assert!(store.try_begin(TxnType::Write).unwrap().is_some());
}

#[test]
fn test_promotion_without_conflict() {
    let store = Store::memory(create_test_params()).unwrap();
    add(&store, 1, 2, 3);

    let mut txn = store.begin(TxnType::Read).unwrap();
    assert!(txn.id_for_node(&iri(9)).is_err());
    txn.promote().unwrap();
    assert_eq!(txn.mode(), TxnMode::Write);
    let id = txn.id_for_node(&iri(9)).unwrap();
    txn.add_triple(id, id, id).unwrap();
    txn.commit().unwrap();
    assert_eq!(store.version(), 2);
    assert_eq!(all_triples(&store).len(), 2);
}

#[test]
fn test_read_committed_promote_moves_forward() {
    let store = Store::memory(create_test_params()).unwrap();
    let mut txn = store.begin(TxnType::ReadCommittedPromote).unwrap();
    add(&store, 1, 2, 3);
    assert_eq!(txn.find_triples(None, None, None).unwrap().count(), 0);

    txn.promote().unwrap();
    assert_eq!(txn.version(), 1);
    assert_eq!(txn.find_triples(None, None, None).unwrap().count(), 1);
    let s = txn.get_node_id(&iri(1)).unwrap().unwrap();
    let p = txn.get_node_id(&iri(2)).unwrap().unwrap();
    let o = txn.get_node_id(&iri(3)).unwrap().unwrap();
    assert!(txn.delete_triple(s, p, o).unwrap());
    txn.commit().unwrap();
    assert!(all_triples(&store).is_empty());
}

// ============================================================================
// Nodes, quads and misuse
// ============================================================================

#[test]
fn test_node_round_trip() {
    let dir = tempdir().unwrap();
    let terms = vec![
        Term::iri("http://example.org/a"),
        Term::blank("b0"),
        Term::literal("plain"),
        Term::literal(""),
        Term::lang_literal("chat", "fr"),
        Term::typed_literal("42", xsd::INTEGER),
        Term::typed_literal("-0.25", xsd::DECIMAL),
        Term::typed_literal("2024-02-29", xsd::DATE),
        Term::typed_literal("false", xsd::BOOLEAN),
        Term::typed_literal("007", xsd::INTEGER),
        Term::typed_literal("x", "http://example.org/dt"),
    ];

    let ids = {
        let store = Store::open(dir.path(), create_test_params()).unwrap();
        let ids = store
            .write(|txn| {
                let mut ids = Vec::new();
                for term in &terms {
                    let id = txn.id_for_node(term)?;
                    assert_eq!(txn.id_for_node(term)?, id);
                    assert_eq!(&txn.node_for_id(id)?, term);
                    ids.push(id);
                }
                Ok(ids)
            })
            .unwrap();
        store.close().unwrap();
        ids
    };
    assert!(ids[5].is_inline());
    assert!(ids[9].is_pointer());

    let store = Store::open(dir.path(), create_test_params()).unwrap();
    store
        .read(|txn| {
            for (term, &id) in terms.iter().zip(&ids) {
                assert_eq!(&txn.node_for_id(id)?, term);
                assert_eq!(txn.get_node_id(term)?, Some(id));
            }
            assert!(matches!(txn.node_for_id(NodeId::UNDEFINED), Err(Error::UnknownId(_))));
            assert!(matches!(
                txn.node_for_id(NodeId::from_offset(1 << 40)),
                Err(Error::UnknownId(_))
            ));
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_quads_by_graph() {
    let store = Store::memory(create_test_params()).unwrap();
    let g1 = NodeId::from_offset(8);
    let g2 = NodeId::from_offset(16);
    store
        .write(|txn| {
            for i in 0..30u64 {
                let g = if i % 3 == 0 { g2 } else { g1 };
                let n = NodeId::from_offset(100 + i);
                txn.add_quad(g, n, n, n)?;
            }
            Ok(())
        })
        .unwrap();

    store
        .read(|txn| {
            assert_eq!(txn.find_quads(Some(g2), None, None, None)?.count(), 10);
            assert_eq!(txn.find_quads(Some(g1), None, None, None)?.count(), 20);
            let n = NodeId::from_offset(103);
            let hits: Vec<Tuple> = txn.find_quads(None, Some(n), None, None)?.collect::<Result<_, _>>()?;
            assert_eq!(hits, vec![Tuple::quad(g2, n, n, n)]);
            assert_eq!(txn.find_triples(None, None, None)?.count(), 0);
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_transaction_misuse() {
    let store = Store::memory(create_test_params()).unwrap();
    let id = NodeId::from_offset(0);

    let mut reader = store.begin(TxnType::Read).unwrap();
    assert!(matches!(reader.add_triple(id, id, id), Err(Error::Transaction(_))));
    reader.end().unwrap();
    assert_eq!(reader.state(), TxnState::Ended);
    assert!(matches!(reader.find_triples(None, None, None), Err(Error::Transaction(_))));

    let mut writer = store.begin(TxnType::Write).unwrap();
    assert!(matches!(
        writer.add_triple(NodeId::UNDEFINED, id, id),
        Err(Error::Transaction(_))
    ));
    writer.commit().unwrap();
    assert_eq!(writer.state(), TxnState::Committed);
    assert!(matches!(writer.commit(), Err(Error::Transaction(_))));
    assert!(matches!(writer.add_triple(id, id, id), Err(Error::Transaction(_))));
}

#[test]
fn test_dropped_writer_aborts() {
    let store = Store::memory(create_test_params()).unwrap();
    {
        let mut txn = store.begin(TxnType::Write).unwrap();
        let id = txn.id_for_node(&iri(1)).unwrap();
        txn.add_triple(id, id, id).unwrap();
    }
    assert_eq!(store.version(), 0);
    assert!(all_triples(&store).is_empty());
    let stats = store.stats();
    assert_eq!(stats.active_writers, 0);
    assert_eq!(stats.begun_write, 1);
}

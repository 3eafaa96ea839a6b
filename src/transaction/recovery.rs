//! Crash recovery: bring the data files up to the last journaled commit.
//!
//! 1. Reset every block allocator to its durable state.
//! 2. Cut the node log back to its durable length.
//! 3. Replay each journaled commit newer than the metadata, in order,
//!    through an ordinary write set, and make it durable.
//! 4. Truncate the journal.
//!
//! Replay is idempotent: node allocation repeats the same appends at the
//! same offsets, tuple adds and deletes are set operations, and a commit
//! already covered by the metadata is skipped.

use tracing::{debug, info};

use crate::common::{Error, Result};
use crate::node::Term;
use crate::storage::StoreMetadata;
use crate::store::Tables;
use crate::transaction::coordinator::Snapshot;
use crate::transaction::journal::{CommitGroup, JournalEntry};
use crate::transaction::txn::WriteSet;

/// Recover from `meta`; returns the latest committed snapshot.
///
/// # Errors
/// - `Error::JournalReplay` if the journal is damaged or does not match
///   the data files
/// - `Error::Config` if the metadata does not fit the store layout
pub(crate) fn recover(tables: &Tables, meta: &StoreMetadata) -> Result<Snapshot> {
    info!(version = meta.version, "recovering store");
    let mut snapshot = tables.snapshot_of(meta)?;

    for (tree, index) in tables.trees().zip(&meta.indexes) {
        tree.blocks().restore(index.block_limit, index.free.clone());
    }

    let log = tables.nodes.log();
    if log.len() < meta.node_log_len {
        return Err(Error::corrupt(
            log.name(),
            log.len(),
            format!("node log shorter than its durable length {}", meta.node_log_len),
        ));
    }
    log.truncate(meta.node_log_len)?;

    let mut replayed = 0;
    for group in tables.journal.read_commits()? {
        if group.version <= snapshot.version {
            debug!(version = group.version, "journaled commit already durable");
            continue;
        }
        if group.version != snapshot.version + 1 {
            return Err(Error::JournalReplay(format!(
                "commit {} follows durable version {}",
                group.version, snapshot.version
            )));
        }
        let write = replay(tables, &snapshot, &group)?;
        snapshot = tables.apply_durable(write)?;
        // Nothing can be reading older versions yet.
        tables.reclaim(None);
        replayed += 1;
    }

    if !tables.journal.is_empty() {
        tables.journal.truncate()?;
    }
    tables.nodes.clear_caches();
    info!(version = snapshot.version, replayed, "recovery complete");
    Ok(snapshot)
}

/// Apply one journaled commit on top of `snapshot`.
fn replay(tables: &Tables, snapshot: &Snapshot, group: &CommitGroup) -> Result<WriteSet> {
    let mut write = tables.begin_write(snapshot, group.version);
    match apply_entries(tables, &mut write, group) {
        Ok(()) => Ok(write),
        Err(e) => {
            tables.abort_write(write)?;
            Err(e)
        }
    }
}

fn apply_entries(tables: &Tables, write: &mut WriteSet, group: &CommitGroup) -> Result<()> {
    for entry in &group.entries {
        match entry {
            JournalEntry::NodeAlloc { id, term } => {
                let term = Term::decode(term).map_err(|e| {
                    Error::JournalReplay(format!("node {} in commit {}: {}", id, group.version, e))
                })?;
                let got = tables.nodes.id_for_node(&mut write.nodes, &term)?;
                if got != *id {
                    return Err(Error::JournalReplay(format!(
                        "commit {} allocated {} for {}, replay gave {}",
                        group.version, id, term, got
                    )));
                }
            }
            JournalEntry::TupleAdd(tuple) | JournalEntry::TupleDelete(tuple) => {
                let add = matches!(entry, JournalEntry::TupleAdd(_));
                let (table, tuple_write) = match tuple.arity() {
                    3 => (&tables.triples, &mut write.triples),
                    4 => (&tables.quads, &mut write.quads),
                    arity => {
                        return Err(Error::JournalReplay(format!(
                            "commit {} holds a tuple of arity {}",
                            group.version, arity
                        )))
                    }
                };
                if add {
                    table.add(tuple_write, tuple)?;
                } else {
                    table.delete(tuple_write, tuple)?;
                }
                write.changes.push(entry.clone());
            }
            JournalEntry::Commit { .. } => {}
        }
    }
    Ok(())
}

//! The TicToc commit protocol and its read/write paths.
//!
//! Commit timestamps are assigned lazily: each tuple carries a (wts, rts)
//! window in its timestamp word, reads record the window they observed, and
//! validation extends windows instead of locking readers out.

use crate::{
    backend::{KvBackend, LookupResult},
    rw_set::{Message, RwSet},
    timestamp::Timestamp,
    Database, Error, Result,
};
use std::time::Duration;

// Sleep between lock-set retry attempts (the "no-wait" optimization; 1 us is
// the value mentioned in the TicToc paper). A tunable, not a correctness
// constant.
const LOCK_RETRY_BACKOFF: Duration = Duration::from_micros(1);

fn bind_slot<B: KvBackend>(db: &Database<B>, rw: &mut RwSet, i: usize) {
    if rw.entries[i].slot.is_none() {
        let slot = db.tscache.insert_and_get(&rw.entries[i].key);
        rw.entries[i].slot = Some(slot);
    }
}

/// Transactionally consistent point lookup.
///
/// Backend errors surface to the caller; the transaction stays usable.
pub(crate) fn lookup<B: KvBackend>(
    db: &Database<B>,
    rw: &mut RwSet,
    key: &[u8],
    result: &mut LookupResult,
) -> Result<()> {
    let i = rw.get_or_create(db.data_config.as_ref(), key, true);
    bind_slot(db, rw, i);

    let entry = &rw.entries[i];
    let word = rw.word(i);
    // The double read is the consistent read primitive: retry until the word
    // is stable and unlocked.
    let v1 = loop {
        let v1 = word.load();
        match &entry.msg {
            // Read-your-own-write: materialize from the pending message.
            Some(Message::Insert(value)) => result.set(value),
            Some(Message::Update(delta)) => {
                db.backend.lookup(&entry.key, result)?;
                let merged = match result.value() {
                    Some(base) => db.data_config.merge_value(&entry.key, base, delta),
                    None => db.data_config.update_base(&entry.key, delta),
                };
                result.set(&merged);
            }
            Some(Message::Delete) => result.reset(),
            None => db.backend.lookup(&entry.key, result)?,
        }
        let v2 = word.load();
        if v1 == v2 && !v1.locked {
            break v1;
        }
    };

    let entry = &mut rw.entries[i];
    entry.wts = v1.wts;
    entry.rts = v1.rts();
    Ok(())
}

/// Buffers a write in the transaction's RW-set.
pub(crate) fn local_write<B: KvBackend>(
    db: &Database<B>,
    rw: &mut RwSet,
    key: &[u8],
    msg: Message,
) {
    let i = rw.get_or_create(db.data_config.as_ref(), key, false);

    // Updates and deletes carry a read dependency on the tuple's current
    // timestamp window. The snapshot is taken only when this entry binds the
    // slot: a window recorded by an earlier read of the same key must
    // survive, or commit-time validation could miss an intervening writer.
    if matches!(msg, Message::Update(_) | Message::Delete) && rw.entries[i].slot.is_none() {
        bind_slot(db, rw, i);
        let v = rw.word(i).load();
        let entry = &mut rw.entries[i];
        entry.wts = v.wts;
        entry.rts = v.rts();
    }

    rw.entries[i].set_msg(db.data_config.as_ref(), msg);
}

/// Runs the commit protocol to completion and tears the transaction down.
///
/// Returns the transaction's commit timestamp, or
/// [`Error::TransactionAborted`] after rolling back.
pub(crate) fn commit<B: KvBackend>(db: &Database<B>, rw: &mut RwSet) -> Result<Timestamp> {
    let cfg = db.data_config.as_ref();

    // Phase 0: partition the RW-set and seed the commit timestamp from the
    // read set. An entry can be both a reader and a writer.
    let mut commit_ts: Timestamp = 0;
    let mut read_set = Vec::new();
    let mut write_set = Vec::new();
    for (i, entry) in rw.entries.iter().enumerate() {
        if entry.is_write() {
            write_set.push(i);
        }
        if entry.is_read {
            read_set.push(i);
            let wts = if db.silo_compatibility {
                entry.wts + 1
            } else {
                entry.wts
            };
            commit_ts = commit_ts.max(wts);
        }
    }

    // Phase 1: global key order makes concurrent committers deadlock-free.
    write_set.sort_unstable_by(|&a, &b| cfg.compare(&rw.entries[a].key, &rw.entries[b].key));

    // Phase 2: lock the write set in order. Any failed attempt releases
    // everything and retries from the start (no-wait).
    'lock: loop {
        for (n, &w) in write_set.iter().enumerate() {
            bind_slot(db, rw, w);
            if !rw.word(w).try_lock() {
                for &held in &write_set[..n] {
                    rw.word(held).unlock();
                }
                std::thread::sleep(LOCK_RETRY_BACKOFF);
                continue 'lock;
            }
        }
        break;
    }

    // Phase 3: the commit timestamp must strictly post-date every reader of
    // a key being written.
    for &w in &write_set {
        commit_ts = commit_ts.max(rw.word(w).load().rts() + 1);
    }

    // Phase 4: validate the read set, extending rts windows where possible.
    let mut is_abort = false;
    'validate: for &r in &read_set {
        let entry = &rw.entries[r];
        if entry.rts >= commit_ts {
            continue;
        }
        let word = rw.word(r);
        loop {
            let v1 = word.load();
            if v1.wts != entry.wts {
                // The tuple was overwritten since we read it.
                is_abort = true;
                break 'validate;
            }
            if v1.rts() > commit_ts {
                break;
            }
            if v1.locked && !entry.is_write() {
                // Another committer is installing a version that will cover
                // our commit timestamp. A lock we hold ourselves is not a
                // conflict.
                is_abort = true;
                break 'validate;
            }
            if word.compare_exchange(v1, v1.extend_to(commit_ts)) {
                break;
            }
            // Raced with a concurrent extension or unlock; re-snapshot.
        }
    }

    // Phase 5: apply or roll back.
    if is_abort {
        log::trace!("commit aborted at ts {commit_ts}");
        for &w in &write_set {
            rw.word(w).unlock();
        }
    } else {
        for &w in &write_set {
            let entry = &rw.entries[w];
            let status = match entry.msg.as_ref().expect("write-set entry without a message") {
                Message::Insert(value) => db.backend.insert(&entry.key, value),
                Message::Update(delta) => db.backend.update(&entry.key, delta),
                Message::Delete => db.backend.delete(&entry.key),
            };
            // Locks are held and commit_ts is fixed; a failure here cannot
            // be rolled back.
            if let Err(err) = status {
                panic!("backend write failed during commit: {err}");
            }
            rw.word(w).publish(commit_ts);
        }
    }

    // Phase 6
    teardown(db, rw);

    if is_abort {
        Err(Error::TransactionAborted)
    } else {
        Ok(commit_ts)
    }
}

/// Discards all buffered state and releases every slot reference.
pub(crate) fn abort<B: KvBackend>(db: &Database<B>, rw: &mut RwSet) {
    teardown(db, rw);
}

fn teardown<B: KvBackend>(db: &Database<B>, rw: &mut RwSet) {
    for entry in rw.drain() {
        if let Some(slot) = entry.slot {
            db.tscache.release(&entry.key, slot);
        }
    }
}

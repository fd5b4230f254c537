use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::{
    sync::{Arc, Barrier},
    thread,
};
use tictoc_kv::{DataConfig, Database, Error, MemoryBackend, Options, Worker};

type Db = Database<MemoryBackend>;

/// Little-endian u64 counters: updates are deltas that add up.
struct CounterConfig;

impl DataConfig for CounterConfig {
    fn merge_value(&self, _key: &[u8], value: &[u8], update: &[u8]) -> Vec<u8> {
        let sum = u64::from_le_bytes(value.try_into().unwrap())
            + u64::from_le_bytes(update.try_into().unwrap());
        sum.to_le_bytes().to_vec()
    }

    fn merge_updates(&self, key: &[u8], earlier: &[u8], later: &[u8]) -> Vec<u8> {
        self.merge_value(key, earlier, later)
    }
}

fn read_counter(worker: &mut Worker<'_, MemoryBackend>, key: &[u8]) -> u64 {
    let mut txn = worker.transaction();
    let value = txn
        .get(key)
        .unwrap()
        .map_or(0, |v| u64::from_le_bytes(v.as_slice().try_into().unwrap()));
    txn.commit().unwrap();
    value
}

/// Retries `body` until it commits; returns the number of aborts.
fn with_retry(mut body: impl FnMut() -> tictoc_kv::Result<u64>) -> u64 {
    let mut aborts = 0;
    loop {
        match body() {
            Ok(_) => return aborts,
            Err(Error::TransactionAborted) => aborts += 1,
            Err(err) => panic!("unexpected error: {err:?}"),
        }
    }
}

// Two threads blindly incrementing one key: deltas merge in the backend, so
// every increment lands exactly once.
#[test]
fn blind_increments_all_apply() {
    const THREADS: u64 = 2;
    const INCREMENTS: u64 = 1000;

    let db = Arc::new(
        Options::new()
            .data_config(Arc::new(CounterConfig))
            .create::<MemoryBackend>(())
            .unwrap(),
    );

    let threads: Vec<_> = (0..THREADS)
        .map(|_| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                let mut worker = db.worker();
                for _ in 0..INCREMENTS {
                    with_retry(|| {
                        let mut txn = worker.transaction();
                        txn.update(b"counter", 1u64.to_le_bytes()).unwrap();
                        txn.commit()
                    });
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    let mut worker = db.worker();
    assert_eq!(read_counter(&mut worker, b"counter"), THREADS * INCREMENTS);
}

// Read-modify-write increments with full-value inserts: conflicts must abort
// and the retries must converge to the exact total.
#[test]
fn read_modify_write_counters_sum() {
    const THREADS: u64 = 4;
    const TXNS: u64 = 200;
    const KEYS: u64 = 8;

    let db = Arc::new(Db::create(()).unwrap());

    let threads: Vec<_> = (0..THREADS)
        .map(|tid| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                let mut worker = db.worker();
                for i in 0..TXNS {
                    let key = ((tid + i) % KEYS).to_le_bytes();
                    with_retry(|| {
                        let mut txn = worker.transaction();
                        let current = txn
                            .get(key)?
                            .map_or(0, |v| u64::from_le_bytes(v.as_slice().try_into().unwrap()));
                        txn.insert(key, (current + 1).to_le_bytes())?;
                        txn.commit()
                    });
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    let mut worker = db.worker();
    let total: u64 = (0..KEYS)
        .map(|k| read_counter(&mut worker, &k.to_le_bytes()))
        .sum();
    assert_eq!(total, THREADS * TXNS);
}

#[test]
fn read_only_workload_never_aborts() {
    const THREADS: u64 = 4;
    const TXNS: u64 = 200;
    const KEYS: u64 = 16;

    let db = Arc::new(Db::create(()).unwrap());
    {
        let mut worker = db.worker();
        let mut txn = worker.transaction();
        for k in 0..KEYS {
            txn.insert(k.to_le_bytes(), k.to_le_bytes()).unwrap();
        }
        txn.commit().unwrap();
    }

    let barrier = Arc::new(Barrier::new(THREADS as usize));
    let threads: Vec<_> = (0..THREADS)
        .map(|tid| {
            let db = Arc::clone(&db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut worker = db.worker();
                barrier.wait();
                for i in 0..TXNS {
                    let mut txn = worker.transaction();
                    for j in 0..3 {
                        let key = ((tid + i + j) % KEYS).to_le_bytes();
                        assert_eq!(txn.get(key).unwrap(), Some(key.to_vec()));
                    }
                    // Against a steady-state store, reads always validate.
                    txn.commit().unwrap();
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }
}

// Randomized mixed workload: every successful increment is tallied locally,
// and the store must agree with the tally afterwards.
#[test]
fn randomized_increments_agree_with_tally() {
    const THREADS: u64 = 4;
    const TXNS: u64 = 300;
    const KEYS: u64 = 16;

    let db = Arc::new(
        Options::new()
            .data_config(Arc::new(CounterConfig))
            .create::<MemoryBackend>(())
            .unwrap(),
    );

    let threads: Vec<_> = (0..THREADS)
        .map(|tid| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                let mut rng = SmallRng::seed_from_u64(0x5eed ^ tid);
                let mut tally = vec![0u64; KEYS as usize];
                let mut worker = db.worker();
                for _ in 0..TXNS {
                    let k = rng.gen_range(0..KEYS);
                    let key = k.to_le_bytes();
                    if rng.gen_bool(0.5) {
                        // Blind delta.
                        with_retry(|| {
                            let mut txn = worker.transaction();
                            txn.update(key, 1u64.to_le_bytes())?;
                            txn.commit()
                        });
                    } else {
                        // Read-modify-write through the merge path.
                        with_retry(|| {
                            let mut txn = worker.transaction();
                            let _ = txn.get(key)?;
                            txn.update(key, 1u64.to_le_bytes())?;
                            txn.commit()
                        });
                    }
                    tally[k as usize] += 1;
                }
                tally
            })
        })
        .collect();

    let mut expected = vec![0u64; KEYS as usize];
    for thread in threads {
        for (k, count) in thread.join().unwrap().into_iter().enumerate() {
            expected[k] += count;
        }
    }

    let mut worker = db.worker();
    for k in 0..KEYS {
        assert_eq!(
            read_counter(&mut worker, &k.to_le_bytes()),
            expected[k as usize],
            "key {k}"
        );
    }
}

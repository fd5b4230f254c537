use std::sync::Arc;
use tictoc_kv::{DataConfig, Error, MemoryBackend, Options};

/// Values are little-endian u64 counters; updates are deltas that add up.
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

fn main() -> tictoc_kv::Result<()> {
    let db = Options::new()
        .data_config(Arc::new(CounterConfig))
        .create::<MemoryBackend>(())?;

    // You need a worker to execute transactions. Workers register the
    // current thread with the backend; spawn one per thread and reuse it.
    let mut worker = db.worker();

    let mut txn = worker.transaction();
    assert!(txn.get(b"hits")?.is_none());
    txn.insert(b"hits", 0u64.to_le_bytes())?;
    txn.commit()?;

    // Updates are deltas merged by the data config, and a transaction sees
    // its own buffered writes.
    let mut txn = worker.transaction();
    txn.update(b"hits", 5u64.to_le_bytes())?;
    txn.update(b"hits", 2u64.to_le_bytes())?;
    assert_eq!(txn.get(b"hits")?, Some(7u64.to_le_bytes().to_vec()));
    txn.commit()?;

    // Aborting (explicitly or by dropping) rolls back all buffered changes.
    let mut txn = worker.transaction();
    txn.insert(b"hits", 999u64.to_le_bytes())?;
    txn.abort();

    // Commits can fail with TransactionAborted when a conflicting
    // transaction wins; retry from the beginning when that happens.
    let total = loop {
        let mut txn = worker.transaction();
        let total = txn.get(b"hits")?.unwrap();
        match txn.commit() {
            Ok(_) => break total,
            Err(Error::TransactionAborted) => continue,
            Err(err) => return Err(err),
        }
    };
    assert_eq!(total, 7u64.to_le_bytes().to_vec());

    println!("hits = {}", u64::from_le_bytes(total.try_into().unwrap()));
    Ok(())
}

use crate::{
    backend::{KvBackend, LookupResult},
    rw_set::Message,
    tictoc,
    timestamp::Timestamp,
    Result, Worker,
};

/// An in-progress transaction.
///
/// Reads are transactionally consistent; writes are buffered locally and
/// applied atomically by [`commit`]. A transaction that is dropped without
/// being committed is aborted.
///
/// [`commit`]: #method.commit
pub struct Transaction<'db, 'worker, B: KvBackend> {
    worker: &'worker mut Worker<'db, B>,
    is_active: bool,
}

impl<'db, 'worker, B: KvBackend> Transaction<'db, 'worker, B> {
    pub(crate) fn new(worker: &'worker mut Worker<'db, B>) -> Self {
        Self {
            worker,
            is_active: true,
        }
    }

    /// Point lookup into a reusable result buffer.
    ///
    /// A lookup after a buffered write of the same key observes the pending
    /// write. A backend error is returned to the caller without aborting
    /// the transaction; the caller decides whether to proceed.
    pub fn lookup<K: AsRef<[u8]>>(&mut self, key: K, result: &mut LookupResult) -> Result<()> {
        tictoc::lookup(
            self.worker.db,
            &mut self.worker.rw_set,
            key.as_ref(),
            result,
        )
    }

    /// Returns the value for `key`, or `None` if the key does not exist.
    pub fn get<K: AsRef<[u8]>>(&mut self, key: K) -> Result<Option<Vec<u8>>> {
        let mut result = LookupResult::new();
        self.lookup(key, &mut result)?;
        Ok(result.value().map(<[u8]>::to_vec))
    }

    /// Buffers an insert. An existing value is overwritten at commit.
    pub fn insert<K, V>(&mut self, key: K, value: V) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.local_write(key.as_ref(), Message::Insert(value.as_ref().into()))
    }

    /// Buffers an update message, merged with earlier buffered messages per
    /// the data config.
    pub fn update<K, D>(&mut self, key: K, delta: D) -> Result<()>
    where
        K: AsRef<[u8]>,
        D: AsRef<[u8]>,
    {
        self.local_write(key.as_ref(), Message::Update(delta.as_ref().into()))
    }

    /// Buffers a delete.
    pub fn delete<K: AsRef<[u8]>>(&mut self, key: K) -> Result<()> {
        self.local_write(key.as_ref(), Message::Delete)
    }

    fn local_write(&mut self, key: &[u8], msg: Message) -> Result<()> {
        tictoc::local_write(self.worker.db, &mut self.worker.rw_set, key, msg);
        Ok(())
    }

    /// Commits the transaction, returning its commit timestamp.
    ///
    /// On [`Error::TransactionAborted`] every buffered write has been
    /// discarded and the transaction may be retried from the beginning.
    ///
    /// [`Error::TransactionAborted`]: crate::Error#variant.TransactionAborted
    pub fn commit(mut self) -> Result<Timestamp> {
        self.is_active = false;
        tictoc::commit(self.worker.db, &mut self.worker.rw_set)
    }

    /// Aborts the transaction, discarding all buffered changes.
    pub fn abort(mut self) {
        self.is_active = false;
        tictoc::abort(self.worker.db, &mut self.worker.rw_set);
    }
}

impl<B: KvBackend> Drop for Transaction<'_, '_, B> {
    fn drop(&mut self) {
        if self.is_active {
            tictoc::abort(self.worker.db, &mut self.worker.rw_set);
        }
    }
}

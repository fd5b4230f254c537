//! Serializable multi-key transactions over an ordered key-value store,
//! using TicToc optimistic concurrency control.

mod rw_set;
mod shared;
mod tictoc;
mod timestamp;
mod transaction;
mod tscache;

pub mod backend;
pub mod data_config;

pub use backend::{KvBackend, LookupResult, MemoryBackend};
pub use data_config::{DataConfig, DefaultDataConfig};
pub use timestamp::Timestamp;
pub use transaction::Transaction;
pub use tscache::SlotRetention;

use crossbeam_utils::atomic::AtomicCell;
use rw_set::RwSet;
use std::sync::Arc;
use tscache::TimestampCache;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The commit found a conflicting transaction. All buffered changes
    /// were rolled back; the transaction may be retried.
    #[error("transaction aborted due to a conflicting transaction")]
    TransactionAborted,

    /// The backend rejected its configuration.
    #[error("configuration rejected: {0}")]
    Config(String),

    /// An error reported by the underlying key-value store.
    #[error("backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Transaction isolation level.
///
/// Only serializable isolation is implemented; the variant set leaves room
/// for weaker levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum IsolationLevel {
    #[default]
    Serializable,
}

const DEFAULT_TSCACHE_LOG_SLOTS: u32 = 29;

/// Builder for a [`Database`].
pub struct Options {
    tscache_log_slots: u32,
    slot_retention: SlotRetention,
    silo_compatibility: bool,
    data_config: Arc<dyn DataConfig>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            tscache_log_slots: DEFAULT_TSCACHE_LOG_SLOTS,
            slot_retention: SlotRetention::default(),
            silo_compatibility: false,
            data_config: Arc::new(DefaultDataConfig),
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Default::default()
    }

    /// log2 of the timestamp cache's slot array.
    pub fn tscache_log_slots(mut self, log_slots: u32) -> Self {
        self.tscache_log_slots = log_slots;
        self
    }

    /// Whether timestamp slots are reclaimed when unreferenced or retained
    /// for the lifetime of the store.
    pub fn slot_retention(mut self, retention: SlotRetention) -> Self {
        self.slot_retention = retention;
        self
    }

    /// Derive commit timestamps the way Silo does (`max reader wts + 1`).
    pub fn silo_compatibility(mut self, enabled: bool) -> Self {
        self.silo_compatibility = enabled;
        self
    }

    /// Key ordering and merge functions shared by the transactional layer
    /// and the backend.
    pub fn data_config(mut self, data_config: Arc<dyn DataConfig>) -> Self {
        self.data_config = data_config;
        self
    }

    /// Creates a new store.
    pub fn create<B: KvBackend>(self, config: B::Config) -> Result<Database<B>> {
        let backend = B::create(config, self.data_config.clone())?;
        Ok(self.build(backend))
    }

    /// Opens an existing store.
    pub fn open<B: KvBackend>(self, config: B::Config) -> Result<Database<B>> {
        let backend = B::open(config, self.data_config.clone())?;
        Ok(self.build(backend))
    }

    fn build<B: KvBackend>(self, backend: B) -> Database<B> {
        log::debug!(
            "opening transactional store: tscache_log_slots={} retention={:?}",
            self.tscache_log_slots,
            self.slot_retention
        );
        Database {
            backend,
            tscache: TimestampCache::new(self.tscache_log_slots, self.slot_retention),
            data_config: self.data_config,
            isolation: AtomicCell::new(IsolationLevel::Serializable),
            silo_compatibility: self.silo_compatibility,
        }
    }
}

/// A transactional layer over a [`KvBackend`].
///
/// Closing is dropping: the timestamp cache and the backend are released
/// when the last reference goes away.
pub struct Database<B: KvBackend> {
    pub(crate) backend: B,
    pub(crate) tscache: TimestampCache,
    pub(crate) data_config: Arc<dyn DataConfig>,
    isolation: AtomicCell<IsolationLevel>,
    pub(crate) silo_compatibility: bool,
}

impl<B: KvBackend> Database<B> {
    /// Creates a new store with default options.
    pub fn create(config: B::Config) -> Result<Self> {
        Options::new().create(config)
    }

    /// Opens an existing store with default options.
    pub fn open(config: B::Config) -> Result<Self> {
        Options::new().open(config)
    }

    pub fn options() -> Options {
        Options::new()
    }

    /// Spawns a [`Worker`], which can be used to perform transactions.
    ///
    /// Spawning registers the current thread with the backend; dropping the
    /// worker deregisters it. Spawn one worker per thread and reuse it for
    /// multiple transactions.
    pub fn worker(&self) -> Worker<'_, B> {
        self.backend.register_thread();
        Worker {
            db: self,
            rw_set: RwSet::new(),
        }
    }

    pub fn set_isolation_level(&self, level: IsolationLevel) {
        self.isolation.store(level);
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation.load()
    }
}

/// A per-thread handle for running transactions.
pub struct Worker<'db, B: KvBackend> {
    pub(crate) db: &'db Database<B>,
    // Reused across transactions so its buffers are reallocated rarely.
    pub(crate) rw_set: RwSet,
}

impl<'db, B: KvBackend> Worker<'db, B> {
    /// Begins a new transaction.
    ///
    /// A worker runs one transaction at a time.
    pub fn transaction<'worker>(&'worker mut self) -> Transaction<'db, 'worker, B> {
        debug_assert!(self.rw_set.is_empty());
        Transaction::new(self)
    }
}

impl<B: KvBackend> Drop for Worker<'_, B> {
    fn drop(&mut self) {
        self.db.backend.deregister_thread();
    }
}

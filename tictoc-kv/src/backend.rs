use crate::{data_config::DataConfig, Result};
use parking_lot::RwLock;
use std::{collections::BTreeMap, sync::Arc};

/// Reusable buffer for point lookups.
#[derive(Debug, Default)]
pub struct LookupResult {
    found: bool,
    value: Vec<u8>,
}

impl LookupResult {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn is_found(&self) -> bool {
        self.found
    }

    /// The value found by the last lookup, if any.
    pub fn value(&self) -> Option<&[u8]> {
        self.found.then_some(self.value.as_slice())
    }

    /// Stores a value, reusing the buffer's capacity.
    pub fn set(&mut self, value: &[u8]) {
        self.found = true;
        self.value.clear();
        self.value.extend_from_slice(value);
    }

    /// Marks the result as not-found, keeping the buffer's capacity.
    pub fn reset(&mut self) {
        self.found = false;
        self.value.clear();
    }
}

/// Contract over the underlying ordered key-value store.
///
/// The store provides point-lookup consistency only (latest committed value
/// wins); all transactional guarantees live above it. Threads must be
/// registered before issuing operations and deregistered on exit, which is
/// handled by [`Worker`].
///
/// [`Worker`]: crate::Worker
pub trait KvBackend: Send + Sync + Sized + 'static {
    type Config;

    fn create(config: Self::Config, data_config: Arc<dyn DataConfig>) -> Result<Self>;
    fn open(config: Self::Config, data_config: Arc<dyn DataConfig>) -> Result<Self>;

    /// Binds the current thread to the store's per-thread state.
    fn register_thread(&self);
    fn deregister_thread(&self);

    fn insert(&self, key: &[u8], value: &[u8]) -> Result<()>;
    /// Applies a delta message with upsert semantics.
    fn update(&self, key: &[u8], delta: &[u8]) -> Result<()>;
    fn delete(&self, key: &[u8]) -> Result<()>;
    fn lookup(&self, key: &[u8], result: &mut LookupResult) -> Result<()>;
}

/// Reference in-memory backend: an ordered map applying the data config's
/// upsert merge on update. Keys are ordered bytewise.
pub struct MemoryBackend {
    map: RwLock<BTreeMap<Box<[u8]>, Box<[u8]>>>,
    data_config: Arc<dyn DataConfig>,
}

impl KvBackend for MemoryBackend {
    type Config = ();

    fn create(_config: (), data_config: Arc<dyn DataConfig>) -> Result<Self> {
        Ok(Self {
            map: RwLock::new(BTreeMap::new()),
            data_config,
        })
    }

    fn open(config: (), data_config: Arc<dyn DataConfig>) -> Result<Self> {
        // Nothing persists, so opening is the same as creating.
        Self::create(config, data_config)
    }

    fn register_thread(&self) {}

    fn deregister_thread(&self) {}

    fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.map.write().insert(key.into(), value.into());
        Ok(())
    }

    fn update(&self, key: &[u8], delta: &[u8]) -> Result<()> {
        let mut map = self.map.write();
        let merged = match map.get(key) {
            Some(value) => self.data_config.merge_value(key, value, delta),
            None => self.data_config.update_base(key, delta),
        };
        map.insert(key.into(), merged.into());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        // Blind delete: removing a missing key succeeds.
        self.map.write().remove(key);
        Ok(())
    }

    fn lookup(&self, key: &[u8], result: &mut LookupResult) -> Result<()> {
        match self.map.read().get(key) {
            Some(value) => result.set(value),
            None => result.reset(),
        }
        Ok(())
    }
}

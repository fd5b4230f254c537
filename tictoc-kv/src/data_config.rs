use std::cmp::Ordering;

/// Key ordering and merge capabilities, supplied when the store is opened.
///
/// Update messages are deltas: the store combines them with existing values
/// (and with each other) through this trait, both inside a transaction's
/// write buffer and in the backend.
pub trait DataConfig: Send + Sync {
    /// Total order on user keys. Defaults to bytewise order.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    /// Applies an update message to an existing full value.
    fn merge_value(&self, key: &[u8], value: &[u8], update: &[u8]) -> Vec<u8>;

    /// Combines two update messages into a single one with the same effect.
    fn merge_updates(&self, key: &[u8], earlier: &[u8], later: &[u8]) -> Vec<u8>;

    /// Applies an update message where no value exists.
    fn update_base(&self, _key: &[u8], update: &[u8]) -> Vec<u8> {
        update.to_vec()
    }
}

/// Bytewise key order, last-write-wins updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultDataConfig;

impl DataConfig for DefaultDataConfig {
    fn merge_value(&self, _key: &[u8], _value: &[u8], update: &[u8]) -> Vec<u8> {
        update.to_vec()
    }

    fn merge_updates(&self, _key: &[u8], _earlier: &[u8], later: &[u8]) -> Vec<u8> {
        later.to_vec()
    }
}

use crate::{
    data_config::DataConfig,
    shared::Shared,
    timestamp::{Timestamp, TimestampWord},
    tscache::TsSlot,
};
use std::cmp::Ordering;

/// The most distinct keys a single transaction may touch.
pub(crate) const RW_SET_SIZE_LIMIT: usize = 64;

/// A buffered write, applied to the backend at commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Message {
    Insert(Box<[u8]>),
    Update(Box<[u8]>),
    Delete,
}

impl Message {
    /// INSERT and DELETE override earlier buffered messages without merging.
    pub(crate) fn is_definitive(&self) -> bool {
        matches!(self, Self::Insert(_) | Self::Delete)
    }
}

/// One key's worth of per-transaction state.
pub(crate) struct RwEntry {
    pub(crate) key: Box<[u8]>,
    pub(crate) msg: Option<Message>,
    pub(crate) wts: Timestamp,
    pub(crate) rts: Timestamp,
    pub(crate) slot: Option<Shared<TsSlot>>,
    pub(crate) is_read: bool,
}

impl RwEntry {
    fn new(key: &[u8], is_read: bool) -> Self {
        Self {
            key: key.into(),
            msg: None,
            wts: 0,
            rts: 0,
            slot: None,
            is_read,
        }
    }

    pub(crate) fn is_write(&self) -> bool {
        self.msg.is_some()
    }

    /// Folds an incoming message into the buffered one.
    ///
    /// A definitive message replaces whatever is buffered; an update merges
    /// into a pending insert or update through the data config. Merging an
    /// update into a pending delete is an invariant violation.
    pub(crate) fn set_msg(&mut self, cfg: &dyn DataConfig, msg: Message) {
        let merged = match (self.msg.take(), msg) {
            (None, msg) => msg,
            (Some(_), msg @ (Message::Insert(_) | Message::Delete)) => msg,
            (Some(Message::Insert(value)), Message::Update(delta)) => {
                Message::Insert(cfg.merge_value(&self.key, &value, &delta).into())
            }
            (Some(Message::Update(earlier)), Message::Update(later)) => {
                Message::Update(cfg.merge_updates(&self.key, &earlier, &later).into())
            }
            (Some(Message::Delete), Message::Update(_)) => {
                panic!("update merged into a pending delete")
            }
        };
        self.msg = Some(merged);
    }
}

/// The ordered list of [`RwEntry`]s of one in-progress transaction.
///
/// Private to the owning thread; at most one entry exists per distinct key.
#[derive(Default)]
pub(crate) struct RwSet {
    pub(crate) entries: Vec<RwEntry>,
}

impl RwSet {
    pub(crate) fn new() -> Self {
        Default::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the index of the entry for `key`, appending a fresh one if
    /// absent. Sets are typically tiny, so a linear scan beats a map.
    pub(crate) fn get_or_create(
        &mut self,
        cfg: &dyn DataConfig,
        key: &[u8],
        is_read: bool,
    ) -> usize {
        if let Some(i) = self
            .entries
            .iter()
            .position(|entry| cfg.compare(&entry.key, key) == Ordering::Equal)
        {
            self.entries[i].is_read |= is_read;
            return i;
        }
        assert!(
            self.entries.len() < RW_SET_SIZE_LIMIT,
            "transaction touched more than {RW_SET_SIZE_LIMIT} distinct keys"
        );
        self.entries.push(RwEntry::new(key, is_read));
        self.entries.len() - 1
    }

    /// The timestamp word of a bound entry.
    pub(crate) fn word(&self, i: usize) -> &TimestampWord {
        let slot = self.entries[i]
            .slot
            .expect("entry is not bound to a timestamp slot");
        unsafe { &slot.as_ref().word }
    }

    pub(crate) fn drain(&mut self) -> std::vec::Drain<'_, RwEntry> {
        self.entries.drain(..)
    }
}

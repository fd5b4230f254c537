use crate::{shared::Shared, timestamp::TimestampWord};
use scc::{hash_index::Entry, HashIndex};
use std::sync::atomic::{AtomicU64, Ordering::SeqCst};

// The index grows on demand, so the configured slot count only seeds the
// initial allocation.
const MAX_INITIAL_LOG_SLOTS: u32 = 16;

/// Retention policy for timestamp slots, fixed when the store is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotRetention {
    /// A slot is reclaimed as soon as no live transaction references it.
    #[default]
    Ephemeral,
    /// Keys are never removed once inserted.
    RetainAll,
}

/// One cache slot: the timestamp word for a user key, plus the number of
/// live transactions referencing it.
pub(crate) struct TsSlot {
    pub(crate) word: TimestampWord,
    refs: AtomicU64,
}

/// Concurrent map from user key to a stable [`TimestampWord`] address.
///
/// While any transaction holds a reference to a slot, the address of its
/// word does not move and its contents change only by CAS.
pub(crate) struct TimestampCache {
    slots: HashIndex<Box<[u8]>, Shared<TsSlot>>,
    retention: SlotRetention,
}

impl TimestampCache {
    pub(crate) fn new(log_slots: u32, retention: SlotRetention) -> Self {
        let capacity = 1usize << log_slots.min(MAX_INITIAL_LOG_SLOTS);
        Self {
            slots: HashIndex::with_capacity(capacity),
            retention,
        }
    }

    /// Inserts the slot for `key` if absent and returns a stable pointer to
    /// it. Concurrent calls for the same key yield the same slot.
    ///
    /// In ephemeral mode the slot's reference count is incremented; the
    /// pointer stays valid until the matching [`release`].
    ///
    /// [`release`]: #method.release
    pub(crate) fn insert_and_get(&self, key: &[u8]) -> Shared<TsSlot> {
        match self.slots.entry(key.into()) {
            Entry::Occupied(entry) => {
                let slot = *entry.get();
                // The entry guard holds the bucket lock, so the increment
                // cannot race with reclamation.
                if self.retention == SlotRetention::Ephemeral {
                    unsafe { slot.as_ref() }.refs.fetch_add(1, SeqCst);
                }
                slot
            }
            Entry::Vacant(entry) => {
                let initial_refs = match self.retention {
                    SlotRetention::Ephemeral => 1,
                    SlotRetention::RetainAll => 0,
                };
                let slot = Shared::new(TsSlot {
                    word: TimestampWord::new(),
                    refs: AtomicU64::new(initial_refs),
                });
                entry.insert_entry(slot);
                slot
            }
        }
    }

    /// Releases a reference taken by [`insert_and_get`], reclaiming the slot
    /// once the last reference is gone. A no-op in retain-all mode.
    ///
    /// [`insert_and_get`]: #method.insert_and_get
    pub(crate) fn release(&self, key: &[u8], slot: Shared<TsSlot>) {
        if self.retention == SlotRetention::RetainAll {
            return;
        }
        let prev = unsafe { slot.as_ref() }.refs.fetch_sub(1, SeqCst);
        debug_assert!(prev > 0);
        if prev > 1 {
            return;
        }
        // The count may be raised again by a concurrent insert_and_get
        // before we get here, and the key may even have been reclaimed and
        // re-inserted as a different slot. The predicate re-checks both
        // under the bucket lock.
        let removed = self
            .slots
            .remove_if(key, |s| {
                s.ptr_eq(slot) && unsafe { s.as_ref() }.refs.load(SeqCst) == 0
            });
        if removed {
            // No entry in the index and no live reference: we are the only
            // holder left.
            let _ = unsafe { slot.into_box() };
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &[u8]) -> bool {
        self.slots.contains(key)
    }

    #[cfg(test)]
    pub(crate) fn word_of(&self, key: &[u8]) -> Option<crate::timestamp::TimestampSet> {
        self.slots
            .peek_with(key, |_, slot| unsafe { slot.as_ref() }.word.load())
    }

    #[cfg(test)]
    pub(crate) fn refcount_of(&self, key: &[u8]) -> Option<u64> {
        self.slots
            .peek_with(key, |_, slot| unsafe { slot.as_ref() }.refs.load(SeqCst))
    }
}

impl Drop for TimestampCache {
    fn drop(&mut self) {
        log::debug!("timestamp cache closing with {} resident slots", self.len());
        let guard = scc::ebr::Guard::new();
        for (_, slot) in self.slots.iter(&guard) {
            // SAFETY: Since we have &mut self, no worker or transaction is
            //         alive, so no one is holding slot pointers now.
            let _ = unsafe { slot.into_box() };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{SlotRetention, TimestampCache};
    use std::sync::Arc;

    #[test]
    fn same_key_same_slot() {
        let cache = TimestampCache::new(4, SlotRetention::Ephemeral);
        let a = cache.insert_and_get(b"k");
        let b = cache.insert_and_get(b"k");
        assert!(a.ptr_eq(b));
        assert_eq!(cache.refcount_of(b"k"), Some(2));
        cache.release(b"k", a);
        cache.release(b"k", b);
    }

    #[test]
    fn ephemeral_reclaims_at_zero() {
        let cache = TimestampCache::new(4, SlotRetention::Ephemeral);
        let slot = cache.insert_and_get(b"k");
        assert!(cache.contains(b"k"));
        cache.release(b"k", slot);
        assert!(!cache.contains(b"k"));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn retain_all_keeps_slots() {
        let cache = TimestampCache::new(4, SlotRetention::RetainAll);
        let slot = cache.insert_and_get(b"k");
        assert_eq!(cache.refcount_of(b"k"), Some(0));
        cache.release(b"k", slot);
        assert!(cache.contains(b"k"));
        let again = cache.insert_and_get(b"k");
        assert!(slot.ptr_eq(again));
    }

    #[test]
    fn reclaimed_key_gets_fresh_slot() {
        let cache = TimestampCache::new(4, SlotRetention::Ephemeral);
        let first = cache.insert_and_get(b"k");
        cache.release(b"k", first);
        let second = cache.insert_and_get(b"k");
        assert!(!first.ptr_eq(second));
        cache.release(b"k", second);
    }

    #[test]
    fn concurrent_inserts_agree_on_one_slot() {
        let cache = Arc::new(TimestampCache::new(4, SlotRetention::Ephemeral));
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    let mut slots = Vec::new();
                    for _ in 0..1000 {
                        slots.push(cache.insert_and_get(b"hot"));
                    }
                    for slot in slots.windows(2) {
                        assert!(slot[0].ptr_eq(slot[1]));
                    }
                    for slot in slots {
                        cache.release(b"hot", slot);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(cache.len(), 0);
    }
}

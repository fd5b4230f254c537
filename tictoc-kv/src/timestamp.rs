use std::sync::atomic::{AtomicU64, Ordering::SeqCst};

// Word format:
// bit [0]      - lock bit (exclusive write lock)
// bits[1..16]  - delta (rts = wts + delta)
// bits[16..64] - wts (write timestamp of the last committer)

const LOCK_BIT: u64 = 0x1;
const DELTA_SHIFT: u32 = 1;
const WTS_SHIFT: u32 = 16;

pub(crate) const DELTA_MAX: u64 = 0x7fff;
pub(crate) const WTS_MAX: u64 = (1 << 48) - 1;

/// A logical timestamp. Only the low 48 bits fit in a [`TimestampWord`].
pub type Timestamp = u64;

/// Unpacked view of one [`TimestampWord`] state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimestampSet {
    pub wts: Timestamp,
    pub delta: u64,
    pub locked: bool,
}

impl TimestampSet {
    fn from_raw(raw: u64) -> Self {
        Self {
            wts: raw >> WTS_SHIFT,
            delta: (raw >> DELTA_SHIFT) & DELTA_MAX,
            locked: raw & LOCK_BIT != 0,
        }
    }

    fn to_raw(self) -> u64 {
        debug_assert!(self.wts <= WTS_MAX);
        debug_assert!(self.delta <= DELTA_MAX);
        (self.wts << WTS_SHIFT) | (self.delta << DELTA_SHIFT) | self.locked as u64
    }

    /// The largest timestamp at which this version is known readable.
    pub fn rts(self) -> Timestamp {
        self.wts + self.delta
    }

    pub fn with_locked(self) -> Self {
        Self {
            locked: true,
            ..self
        }
    }

    pub fn without_locked(self) -> Self {
        Self {
            locked: false,
            ..self
        }
    }

    /// Raises rts to `commit_ts`.
    ///
    /// wts moves only by multiples of 2^15, so its low 15 bits are preserved
    /// and the new delta always fits in the 15-bit field.
    pub fn extend_to(self, commit_ts: Timestamp) -> Self {
        debug_assert!(commit_ts >= self.wts);
        let delta = commit_ts - self.wts;
        let shift = delta & !DELTA_MAX;
        Self {
            wts: self.wts + shift,
            delta: delta & DELTA_MAX,
            locked: self.locked,
        }
    }

    /// The word installed after a committed write: a fresh version at
    /// `commit_ts`, unlocked.
    pub fn committed(commit_ts: Timestamp) -> Self {
        Self {
            wts: commit_ts,
            delta: 0,
            locked: false,
        }
    }
}

/// Per-tuple timestamp state packed into a single naturally-aligned 64-bit
/// cell, updated only through compare-and-swap.
pub(crate) struct TimestampWord(AtomicU64);

impl TimestampWord {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn load(&self) -> TimestampSet {
        TimestampSet::from_raw(self.0.load(SeqCst))
    }

    /// Succeeds iff the full 64-bit word still equals `expected`.
    pub fn compare_exchange(&self, expected: TimestampSet, new: TimestampSet) -> bool {
        self.0
            .compare_exchange(expected.to_raw(), new.to_raw(), SeqCst, SeqCst)
            .is_ok()
    }

    /// A single lock attempt. Does not spin.
    pub fn try_lock(&self) -> bool {
        let v1 = self.load();
        if v1.locked {
            return false;
        }
        self.compare_exchange(v1, v1.with_locked())
    }

    /// Clears the lock bit, preserving wts and delta.
    ///
    /// Loops because readers may concurrently extend delta.
    pub fn unlock(&self) {
        loop {
            let v1 = self.load();
            debug_assert!(v1.locked);
            if self.compare_exchange(v1, v1.without_locked()) {
                break;
            }
        }
    }

    /// Installs the committed version and releases the lock in one
    /// transition.
    pub fn publish(&self, commit_ts: Timestamp) {
        debug_assert!(commit_ts <= WTS_MAX);
        let v2 = TimestampSet::committed(commit_ts);
        loop {
            let v1 = self.load();
            debug_assert!(v1.locked);
            if self.compare_exchange(v1, v2) {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{TimestampSet, TimestampWord, DELTA_MAX};

    #[test]
    fn pack_unpack() {
        let word = TimestampWord::new();
        let v = word.load();
        assert_eq!(v.wts, 0);
        assert_eq!(v.delta, 0);
        assert!(!v.locked);
        assert_eq!(v.rts(), 0);

        let new = TimestampSet {
            wts: 42,
            delta: 7,
            locked: false,
        };
        assert!(word.compare_exchange(v, new));
        let v = word.load();
        assert_eq!(v.wts, 42);
        assert_eq!(v.delta, 7);
        assert_eq!(v.rts(), 49);
    }

    #[test]
    fn lock_unlock() {
        let word = TimestampWord::new();
        assert!(word.try_lock());
        assert!(word.load().locked);
        assert!(!word.try_lock());
        word.unlock();
        assert!(!word.load().locked);
        assert!(word.try_lock());
    }

    #[test]
    fn publish_resets_delta() {
        let word = TimestampWord::new();
        let v1 = word.load();
        assert!(word.compare_exchange(
            v1,
            TimestampSet {
                wts: 5,
                delta: 3,
                locked: false,
            }
        ));
        assert!(word.try_lock());
        word.publish(100);
        let v = word.load();
        assert_eq!(v.wts, 100);
        assert_eq!(v.delta, 0);
        assert!(!v.locked);
    }

    #[test]
    fn extend_within_delta_range() {
        let v = TimestampSet {
            wts: 100,
            delta: 0,
            locked: false,
        };
        let extended = v.extend_to(100 + DELTA_MAX);
        assert_eq!(extended.wts, 100);
        assert_eq!(extended.delta, DELTA_MAX);
        assert_eq!(extended.rts(), 100 + DELTA_MAX);
    }

    #[test]
    fn extend_shifts_wts_on_delta_overflow() {
        let v = TimestampSet {
            wts: 100,
            delta: 5,
            locked: false,
        };
        let commit_ts = 100 + DELTA_MAX + 17;
        let extended = v.extend_to(commit_ts);
        // wts moves by a multiple of 2^15; its low 15 bits survive.
        assert_eq!(extended.wts & DELTA_MAX, 100);
        assert_eq!(extended.wts, 100 + (DELTA_MAX + 1));
        assert_eq!(extended.rts(), commit_ts);
        assert!(extended.delta <= DELTA_MAX);
    }

    #[test]
    fn extend_preserves_lock_bit() {
        let v = TimestampSet {
            wts: 1,
            delta: 0,
            locked: true,
        };
        assert!(v.extend_to(10).locked);
    }
}

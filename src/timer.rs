/*! Deadline lists.

Every subsystem with lifetimes (routers, addresses, prefixes, duplicate address
detection, router solicitation, ARP requests, DHCP leases) keeps its own
[TimerList]. Entries are kept sorted by deadline, so expiry only ever looks at
the head and [poll_at](struct.TimerList.html#method.poll_at) is the deadline of
the first entry.

A `TimerList` does not run anything on its own. The owner calls
`pop_expired(now)` from its `poll` method and performs the expiry action for each
returned key.
*/

use heapless::Vec;

use crate::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerListFull;

impl core::fmt::Display for TimerListFull {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Timer list full")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for TimerListFull {}

/// A bounded list of keys, each armed with an absolute deadline.
#[derive(Debug, Clone)]
pub struct TimerList<K, const N: usize> {
    entries: Vec<(Instant, K), N>,
}

impl<K: Copy + PartialEq, const N: usize> Default for TimerList<K, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy + PartialEq, const N: usize> TimerList<K, N> {
    /// Create an empty list.
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Arm `key` to fire at `deadline`.
    ///
    /// An already armed key is re-armed with the new deadline. Keys with equal
    /// deadlines fire in the order they were armed.
    pub fn arm(&mut self, key: K, deadline: Instant) -> Result<(), TimerListFull> {
        self.cancel(key);

        let pos = self
            .entries
            .iter()
            .position(|(at, _)| *at > deadline)
            .unwrap_or(self.entries.len());
        self.entries
            .insert(pos, (deadline, key))
            .map_err(|_| TimerListFull)
    }

    /// Disarm `key`. Returns whether it was armed.
    pub fn cancel(&mut self, key: K) -> bool {
        match self.entries.iter().position(|(_, k)| *k == key) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// The deadline `key` is armed with, if any.
    pub fn deadline(&self, key: K) -> Option<Instant> {
        self.entries
            .iter()
            .find(|(_, k)| *k == key)
            .map(|(at, _)| *at)
    }

    pub fn is_armed(&self, key: K) -> bool {
        self.entries.iter().any(|(_, k)| *k == key)
    }

    /// The nearest deadline, or `None` if nothing is armed.
    pub fn poll_at(&self) -> Option<Instant> {
        self.entries.first().map(|(at, _)| *at)
    }

    /// Remove and return the earliest key whose deadline is not after `now`.
    pub fn pop_expired(&mut self, now: Instant) -> Option<K> {
        match self.entries.first() {
            Some((at, key)) if *at <= now => {
                let key = *key;
                self.entries.remove(0);
                Some(key)
            }
            _ => None,
        }
    }

    /// Remove every key whose deadline is not after `now`, in deadline order.
    pub fn expire(&mut self, now: Instant) -> Vec<K, N> {
        let mut expired = Vec::new();
        while let Some(key) = self.pop_expired(now) {
            // Both vectors have capacity N, so this cannot overflow.
            let _ = expired.push(key);
        }
        expired
    }

    /// Keep only the keys for which `f` returns `true`.
    pub fn retain<F: FnMut(&K) -> bool>(&mut self, mut f: F) {
        self.entries.retain(|(_, key)| f(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, Instant)> + '_ {
        self.entries.iter().map(|(at, key)| (*key, *at))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::*;

    fn ms(millis: i64) -> Instant {
        Instant::from_millis(millis)
    }

    #[rstest]
    fn test_poll_at_is_nearest() {
        let mut timers: TimerList<u8, 4> = TimerList::new();
        assert_eq!(timers.poll_at(), None);

        timers.arm(1, ms(300)).unwrap();
        timers.arm(2, ms(100)).unwrap();
        timers.arm(3, ms(200)).unwrap();
        assert_eq!(timers.poll_at(), Some(ms(100)));

        timers.cancel(2);
        assert_eq!(timers.poll_at(), Some(ms(200)));
    }

    #[rstest]
    fn test_expire_in_deadline_order() {
        let mut timers: TimerList<u8, 4> = TimerList::new();
        timers.arm(1, ms(300)).unwrap();
        timers.arm(2, ms(100)).unwrap();
        timers.arm(3, ms(200)).unwrap();
        timers.arm(4, ms(500)).unwrap();

        assert_eq!(&timers.expire(ms(300))[..], &[2, 3, 1]);
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.poll_at(), Some(ms(500)));
        assert!(timers.expire(ms(499)).is_empty());
    }

    #[rstest]
    fn test_equal_deadlines_keep_arming_order() {
        let mut timers: TimerList<u8, 4> = TimerList::new();
        timers.arm(7, ms(100)).unwrap();
        timers.arm(3, ms(100)).unwrap();
        timers.arm(5, ms(100)).unwrap();

        assert_eq!(&timers.expire(ms(100))[..], &[7, 3, 5]);
    }

    #[rstest]
    fn test_rearm_replaces() {
        let mut timers: TimerList<u8, 2> = TimerList::new();
        timers.arm(1, ms(100)).unwrap();
        timers.arm(1, ms(900)).unwrap();

        assert_eq!(timers.len(), 1);
        assert_eq!(timers.deadline(1), Some(ms(900)));
        assert_eq!(timers.pop_expired(ms(100)), None);
    }

    #[rstest]
    fn test_full() {
        let mut timers: TimerList<u8, 2> = TimerList::new();
        timers.arm(1, ms(100)).unwrap();
        timers.arm(2, ms(100)).unwrap();
        assert_eq!(timers.arm(3, ms(50)), Err(TimerListFull));
        // Re-arming an existing key never needs a new slot.
        assert_eq!(timers.arm(2, ms(50)), Ok(()));
        assert_eq!(timers.poll_at(), Some(ms(50)));
    }

    #[rstest]
    fn test_cancel_and_retain() {
        let mut timers: TimerList<u8, 4> = TimerList::new();
        for key in 0..4 {
            timers.arm(key, ms(key as i64 * 10)).unwrap();
        }
        assert!(timers.cancel(0));
        assert!(!timers.cancel(0));
        assert!(!timers.is_armed(0));

        timers.retain(|key| key % 2 == 1);
        assert_eq!(timers.iter().map(|(k, _)| k).collect::<std::vec::Vec<_>>(), [1, 3]);

        timers.clear();
        assert!(timers.is_empty());
        assert_eq!(timers.poll_at(), None);
    }
}

//! Cooldown tracker: per-fetcher retry count plus a cached
//! earliest-wakeup hint the scheduler consults before re-polling a
//! fetcher.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::scheduler::FetcherId;

/// `{ retry-count, cooldown-wakeup-time }`. `cooldown_wakeup_time` is an
/// absolute wall-clock millisecond value; `0` means "not in cooldown".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CooldownItem {
    pub retry_count: u32,
    pub cooldown_wakeup_time: u64,
}

/// Maps fetcher identity to its [`CooldownItem`]. Shared across every
/// fetcher registered with a scheduler; all three operations are
/// idempotent/monotone with respect to concurrent callers.
#[derive(Default)]
pub struct CooldownTracker {
    items: Mutex<HashMap<FetcherId, CooldownItem>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent; returns the item, creating it with zeros if absent.
    pub fn make(&self, fetcher: FetcherId) -> CooldownItem {
        let mut items = self.items.lock().unwrap();
        *items.entry(fetcher).or_insert_with(CooldownItem::default)
    }

    /// Drops the entry entirely, resetting both fields for any future
    /// `make()`.
    pub fn remove(&self, fetcher: FetcherId) {
        self.items.lock().unwrap().remove(&fetcher);
    }

    /// Records a hint so the scheduler can skip polling `fetcher` until
    /// `time`. If `force` is false and an earlier wake is already
    /// cached, the earlier one is kept — the hint should reflect the
    /// soonest time any caller expects work, not the most recent call.
    pub fn set_cached_wakeup(&self, time: u64, fetcher: FetcherId, force: bool) -> u64 {
        let mut items = self.items.lock().unwrap();
        let item = items.entry(fetcher).or_insert_with(CooldownItem::default);
        let keep_earlier = !force && item.cooldown_wakeup_time != 0 && item.cooldown_wakeup_time < time;
        if !keep_earlier {
            item.cooldown_wakeup_time = time;
        }
        item.cooldown_wakeup_time
    }

    /// Raises `cooldown_wakeup_time` to at least `at_least`, never
    /// lowering it. Used by `choose_key`'s "recently failed" branch,
    /// which must never move the wakeup earlier than what's cached.
    pub fn raise_wakeup(&self, fetcher: FetcherId, at_least: u64) -> u64 {
        let mut items = self.items.lock().unwrap();
        let item = items.entry(fetcher).or_insert_with(CooldownItem::default);
        item.cooldown_wakeup_time = item.cooldown_wakeup_time.max(at_least);
        item.cooldown_wakeup_time
    }

    /// Increments and returns the new retry count for `fetcher`.
    pub fn increment_retry(&self, fetcher: FetcherId) -> u32 {
        let mut items = self.items.lock().unwrap();
        let item = items.entry(fetcher).or_insert_with(CooldownItem::default);
        item.retry_count += 1;
        item.retry_count
    }

    pub fn wakeup_time(&self, fetcher: FetcherId) -> u64 {
        self.items
            .lock()
            .unwrap()
            .get(&fetcher)
            .map(|item| item.cooldown_wakeup_time)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_is_idempotent_and_zeroed() {
        let tracker = CooldownTracker::new();
        let fetcher = FetcherId(1);
        assert_eq!(tracker.make(fetcher), CooldownItem::default());
        tracker.increment_retry(fetcher);
        assert_eq!(tracker.make(fetcher).retry_count, 1);
    }

    #[test]
    fn remove_resets_the_item() {
        let tracker = CooldownTracker::new();
        let fetcher = FetcherId(2);
        tracker.increment_retry(fetcher);
        tracker.remove(fetcher);
        assert_eq!(tracker.make(fetcher), CooldownItem::default());
    }

    #[test]
    fn set_cached_wakeup_keeps_the_earlier_hint_unless_forced() {
        let tracker = CooldownTracker::new();
        let fetcher = FetcherId(3);
        tracker.set_cached_wakeup(1_000, fetcher, false);
        assert_eq!(tracker.set_cached_wakeup(2_000, fetcher, false), 1_000);
        assert_eq!(tracker.set_cached_wakeup(2_000, fetcher, true), 2_000);
    }

    #[test]
    fn raise_wakeup_never_moves_it_earlier() {
        let tracker = CooldownTracker::new();
        let fetcher = FetcherId(4);
        tracker.raise_wakeup(fetcher, 5_000);
        assert_eq!(tracker.raise_wakeup(fetcher, 1_000), 5_000);
        assert_eq!(tracker.raise_wakeup(fetcher, 9_000), 9_000);
    }
}

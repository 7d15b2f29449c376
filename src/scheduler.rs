//! The scheduler collaborator. Its queue data structure and selection
//! policy are out of scope for this crate; only the interface the fetch
//! layer drives is defined here.

use crate::key::NodeKey;

/// A view the scheduler hands out so a fetcher can check whether some
/// other in-flight fetcher already owns a node key, and whether that key
/// was recently failed.
pub trait FetchingKeys: Send + Sync {
    /// True if `owner` (identified by its fetcher id) is already chasing
    /// `key`, or if *anyone* is and `owner` is `None`.
    fn has_key(&self, key: NodeKey, owner: FetcherId) -> bool;

    /// Earliest wall-clock millisecond timestamp at which `key` should be
    /// considered no longer "recently failed", or `None` if it isn't.
    fn check_recently_failed(&self, key: NodeKey, now_ms: u64) -> Option<u64>;
}

/// Stable identity of a single-key fetcher, used for scheduler
/// registration and cooldown-tracker lookups. Fetchers never alias: two
/// distinct fetcher instances never compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetcherId(pub u64);

/// The scheduler a [`crate::fetch::single_key::SingleKeyFetcher`] registers
/// with and is driven by.
pub trait Scheduler: Send + Sync {
    /// Register `fetcher` against `keys`. `persistent` mirrors a
    /// persistent-request flag the real scheduler uses for restart
    /// durability; `blocks` hints at the batch size; `reschedule`, if
    /// true, asks the scheduler to re-poll immediately rather than wait
    /// for the next tick.
    fn register(
        &self,
        fetcher: FetcherId,
        keys: &[NodeKey],
        persistent: bool,
        blocks: usize,
        reschedule: bool,
    );

    /// Remove `fetcher` from all pending-key tracking. `complete` marks
    /// whether this is a normal completion (vs. a cancellation), which
    /// the real scheduler uses to decide whether to emit completion
    /// events.
    fn remove_pending_keys(&self, fetcher: FetcherId, complete: bool);

    /// A read-only view of in-flight keys, used by [`FetcherId`]-scoped
    /// cooldown checks.
    fn fetching_keys(&self) -> std::sync::Arc<dyn FetchingKeys>;
}

//! Fetch context collaborator: read-only tuning the single-key fetcher
//! consults, plus the decode/verify hook whose cryptography lives in the
//! environment.

use std::time::Duration;

use crate::block::Block;
use crate::key::Key;

/// Supplied to a [`crate::fetch::single_key::SingleKeyFetcher`] at
/// construction and re-read on [`FetchContext`] changes.
pub trait FetchContext: Send + Sync {
    /// Number of retries after which a fetcher still in bounded-retry
    /// mode starts deferring to the cooldown tracker instead of
    /// re-polling immediately.
    fn cooldown_tries(&self) -> u32;

    /// Wall-clock duration a fetcher waits once it enters cooldown.
    fn cooldown_time(&self) -> Duration;

    /// Current wall-clock time in milliseconds, read once per
    /// `choose_key`/`retry` step so successive reads inside one call are
    /// consistent.
    fn now_ms(&self) -> u64;

    /// Verify and decode a block fetched under `key`. Decode/verify
    /// failures are terminal for the current attempt; this crate treats
    /// the cryptographic detail as opaque.
    fn verify_and_decode(&self, key: &Key, raw: &Block) -> Result<Block, String>;
}

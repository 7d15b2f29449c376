//! Single-key fetcher: drives one key through scheduler
//! registration, cooldown, and success/failure.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::block::Block;
use crate::error::FetchError;
use crate::fetch::context::FetchContext;
use crate::fetch::cooldown::CooldownTracker;
use crate::key::Key;
use crate::scheduler::{FetcherId, FetchingKeys, Scheduler};

/// Fixed threshold above which an already-bounded fetcher still defers
/// to cooldown rather than surfacing `RECENTLY_FAILED` immediately.
pub const COOLDOWN_RETRIES: u32 = 3;

/// Bounded tuning for one fetcher. `max_retries = None` means unbounded.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub max_retries: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self { max_retries: None }
    }
}

/// Subclass hooks a [`SingleKeyFetcher`] dispatches to once an attempt
/// reaches a terminal outcome.
pub trait FetcherCallbacks: Send + Sync {
    /// A block was fetched and successfully decoded.
    fn on_success(&self, block: Block, from_store: bool);
    /// Terminal failure for this attempt — decode error, `RECENTLY_FAILED`,
    /// or a failure `retry()` decided not to ride out.
    fn on_failure(&self, err: FetchError);
    /// `retry()` just scheduled a finite cooldown wakeup.
    fn on_enter_finite_cooldown(&self);
}

/// One outstanding retrieval of a single content-hash-keyed block.
pub struct SingleKeyFetcher {
    id: FetcherId,
    key: Mutex<Option<Key>>,
    ctx: Arc<dyn FetchContext>,
    scheduler: Arc<dyn Scheduler>,
    cooldown: Arc<CooldownTracker>,
    callbacks: Arc<dyn FetcherCallbacks>,
    config: Config,
    retry_count: AtomicU32,
    cancelled: AtomicBool,
    finished: AtomicBool,
    cached_cooldown_tries: AtomicU32,
    cached_cooldown_time_ms: AtomicU64,
}

impl SingleKeyFetcher {
    pub fn new(
        id: FetcherId,
        key: Option<Key>,
        ctx: Arc<dyn FetchContext>,
        scheduler: Arc<dyn Scheduler>,
        cooldown: Arc<CooldownTracker>,
        callbacks: Arc<dyn FetcherCallbacks>,
        config: Config,
    ) -> Self {
        Self {
            id,
            key: Mutex::new(key),
            ctx,
            scheduler,
            cooldown,
            callbacks,
            config,
            retry_count: AtomicU32::new(0),
            cancelled: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            cached_cooldown_tries: AtomicU32::new(0),
            cached_cooldown_time_ms: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> FetcherId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Register with the scheduler. Fails only if no key has been set —
    /// calling `schedule` before the key is known is a programming error.
    pub fn schedule(&self) -> Result<(), FetchError> {
        let key = self.key.lock().unwrap().clone().ok_or(FetchError::NoKey)?;
        self.cooldown.make(self.id);
        self.scheduler.register(self.id, &[key.node_key()], false, 1, false);
        Ok(())
    }

    /// Scheduler hook: returns `Some(())` (a "ready to send" sentinel)
    /// if this fetcher should be dispatched now, else `None`.
    pub fn choose_key(&self, already_fetching: &dyn FetchingKeys) -> Option<()> {
        let key = self.key.lock().unwrap().clone()?;
        let node_key = key.node_key();

        if already_fetching.has_key(node_key, self.id) {
            return None;
        }

        let now = self.ctx.now_ms();
        match already_fetching.check_recently_failed(node_key, now) {
            Some(l) if l > now => {
                let budget_covers_cooldown = self
                    .config
                    .max_retries
                    .map_or(true, |m| m >= COOLDOWN_RETRIES);
                if budget_covers_cooldown {
                    self.cooldown.raise_wakeup(self.id, l);
                    None
                } else {
                    log::debug!(target: "fetch", "key {node_key} recently failed, surfacing");
                    self.callbacks.on_failure(FetchError::RecentlyFailed(key));
                    None
                }
            }
            _ => Some(()),
        }
    }

    /// Called after a failure this fetcher considers retriable. Returns
    /// whether it will retry.
    pub fn retry(&self) -> bool {
        if self.cancelled.load(Ordering::SeqCst) || self.finished.load(Ordering::SeqCst) {
            return false;
        }

        let unbounded = self.config.max_retries.is_none();
        let counter = if unbounded {
            self.cooldown.increment_retry(self.id)
        } else {
            self.retry_count.fetch_add(1, Ordering::SeqCst) + 1
        };

        if let Some(max) = self.config.max_retries {
            if counter > max {
                self.scheduler.remove_pending_keys(self.id, false);
                return false;
            }
        }

        self.refresh_cached_cooldown_if_unset();
        let cached_tries = self.cached_cooldown_tries.load(Ordering::SeqCst);

        if cached_tries == 0 || counter % cached_tries == 0 {
            let now = self.ctx.now_ms();
            if self.cooldown.wakeup_time(self.id) > now {
                log::debug!(target: "fetch", "fetcher {:?} already in future cooldown", self.id);
            } else {
                let cooldown_time_ms = self.cached_cooldown_time_ms.load(Ordering::SeqCst);
                let wake = now + cooldown_time_ms;
                self.cooldown.set_cached_wakeup(wake, self.id, true);
                self.callbacks.on_enter_finite_cooldown();
            }
        } else {
            self.cooldown.set_cached_wakeup(0, self.id, true);
        }

        true
    }

    /// Delivered by the key-listener path. Guarded against double
    /// delivery; a mismatched key is logged and dropped, but still
    /// unregisters from the scheduler since `finished` is now set.
    pub fn on_got_key(&self, key: Key, block: Block) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        let expected = self.key.lock().unwrap().clone();
        if expected.as_ref() != Some(&key) {
            log::warn!(target: "fetch", "delivered key did not match fetcher's key, dropping");
            self.scheduler.remove_pending_keys(self.id, true);
            return;
        }
        self.scheduler.remove_pending_keys(self.id, true);
        self.on_success(key, block, false);
    }

    /// Attempt to verify/decode; dispatches the subclass success or
    /// decode-error hook.
    pub fn on_success(&self, key: Key, low_level_block: Block, from_store: bool) {
        match self.ctx.verify_and_decode(&key, &low_level_block) {
            Ok(block) => self.callbacks.on_success(block, from_store),
            Err(err) => self.callbacks.on_failure(FetchError::DecodeError(err)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.scheduler.remove_pending_keys(self.id, false);
        self.cooldown.remove(self.id);
    }

    /// `-1` if cancelled or finished; `0` if the tracker wake has
    /// passed and the key is not in flight elsewhere; `i64::MAX` if the
    /// key is currently being fetched by someone else; otherwise the
    /// tracker wake.
    pub fn get_cooldown_time(&self, now_ms: u64, in_flight_elsewhere: bool) -> i64 {
        if self.cancelled.load(Ordering::SeqCst) || self.finished.load(Ordering::SeqCst) {
            return -1;
        }
        if in_flight_elsewhere {
            return i64::MAX;
        }
        let wake = self.cooldown.wakeup_time(self.id);
        if wake <= now_ms {
            0
        } else {
            wake as i64
        }
    }

    pub fn on_changed_fetch_context(&self) {
        self.cached_cooldown_tries
            .store(self.ctx.cooldown_tries(), Ordering::SeqCst);
        self.cached_cooldown_time_ms
            .store(self.ctx.cooldown_time().as_millis() as u64, Ordering::SeqCst);
    }

    fn refresh_cached_cooldown_if_unset(&self) {
        if self.cached_cooldown_tries.load(Ordering::SeqCst) == 0 {
            self.cached_cooldown_tries
                .store(self.ctx.cooldown_tries(), Ordering::SeqCst);
        }
        if self.cached_cooldown_time_ms.load(Ordering::SeqCst) == 0 {
            self.cached_cooldown_time_ms
                .store(self.ctx.cooldown_time().as_millis() as u64, Ordering::SeqCst);
        }
    }
}

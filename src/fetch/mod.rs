//! Client-initiating-side fetch machinery: the cooldown tracker
//! and the single-key fetcher built on top of it.

pub mod context;
pub mod cooldown;
pub mod single_key;

pub use context::FetchContext;
pub use cooldown::{CooldownItem, CooldownTracker};
pub use single_key::{Config, FetcherCallbacks, SingleKeyFetcher, COOLDOWN_RETRIES};

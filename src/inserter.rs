//! Single-file inserter collaborator. Only the interface to the
//! core matters here — the actual block-splitting and network insert
//! logic lives in the environment.

use crate::error::InserterError;
use crate::key::Key;

/// Opaque identity of a running child inserter's current internal state.
/// Used only for equality checks in `on_transition`: transitions must be
/// reflected synchronously in the parent's `current-state` field, which
/// in practice means comparing this id against the id the parent last
/// stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChildStateId(pub u64);

/// Callbacks a [`SingleFileInserter`] invokes on its parent. Any of these
/// may fire before `start()` returns, and callbacks from sibling
/// inserters may interleave.
pub trait InserterCallbacks: Send + Sync {
    /// A routing URI has been assigned.
    fn on_encode(&self, key: Key, state: ChildStateId);
    /// The data was small enough that metadata was produced directly
    /// instead of a URI.
    fn on_metadata(&self, metadata: Vec<u8>, state: ChildStateId);
    fn on_success(&self, state: ChildStateId);
    fn on_failure(&self, err: InserterError, state: ChildStateId);
    /// The identity of the current child state changed from `old` to
    /// `new`.
    fn on_transition(&self, old: ChildStateId, new: ChildStateId);
    /// The finite set of output blocks for this leaf is now known.
    fn on_block_set_finished(&self, state: ChildStateId);

    fn add_block(&self);
    fn add_blocks(&self, n: u32);
    fn completed_block(&self, from_cache: bool);
    fn failed_block(&self);
    fn fatally_failed_block(&self);
    fn add_must_succeed_blocks(&self, n: u32);
}

/// Turns one data bucket into one inserted block.
pub trait SingleFileInserter: Send + Sync {
    fn current_state(&self) -> ChildStateId;

    /// Begin the insert. May invoke any of [`InserterCallbacks`]'s
    /// methods on the parent before returning.
    fn start(&self) -> Result<(), InserterError>;
}

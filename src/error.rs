use thiserror::Error;

use crate::key::Key;

/// Errors surfaced at the outer client boundary by the manifest putter.
/// Every variant is terminal: `fail(err)` always calls `cancel_and_finish`
/// before invoking the client callback.
#[derive(Debug, Error)]
pub enum InsertError {
    /// The caller asked for an explicit default document that isn't in
    /// the tree.
    #[error("default document {name:?} not found in manifest")]
    InvalidUri { name: String },

    /// The bucket factory failed to materialize the serialized manifest.
    #[error("failed to write manifest bytes to bucket: {0}")]
    BucketError(#[from] std::io::Error),

    /// A protocol invariant was violated (e.g. `on_metadata` called on
    /// the manifest inserter itself, or a transition reported for a
    /// state that isn't current).
    #[error("internal error: {0}")]
    InternalError(String),

    /// A child leaf inserter failed; the error is passed through
    /// unmodified.
    #[error(transparent)]
    Child(#[from] InserterError),

    /// The manifest tree had a name collision between an intermediate
    /// path component and a leaf file.
    #[error("path component {0:?} collides with a leaf of the same name")]
    PathCollision(String),
}

/// Opaque terminal failure reported by a [`crate::inserter::SingleFileInserter`].
#[derive(Debug, Error)]
#[error("insert failed: {0}")]
pub struct InserterError(pub String);

/// Errors observable from the single-key fetcher.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The node recently failed to serve this key and the retry budget
    /// didn't allow riding out the cooldown silently.
    #[error("key {0:?} was recently failed and retry budget is exhausted")]
    RecentlyFailed(Key),

    /// Block verification or decoding failed; terminal for this attempt.
    #[error("block decode/verify failed: {0}")]
    DecodeError(String),

    /// A scheduler- or transport-level failure that `retry()` should
    /// evaluate against the retry budget.
    #[error("transport failure: {0}")]
    Transport(String),

    /// `schedule()` was called on a fetcher with no key — a programming
    /// error.
    #[error("fetcher has no key to schedule")]
    NoKey,
}

/// Errors observable from the request handler state machine.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// An unrecognized sender status was observed; the handler still
    /// transitions to `FINISHED` via the `_finally` path.
    #[error("internal error: unexpected sender status {0:?}")]
    UnexpectedStatus(crate::sender::SenderStatus),

    #[error("failed to send reply on peer transport: {0}")]
    Transport(String),

    #[error(transparent)]
    Transmit(#[from] std::io::Error),
}

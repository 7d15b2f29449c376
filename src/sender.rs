//! The downstream `RequestSender` collaborator and the terminal/
//! non-terminal statuses it reports.

use crate::block::Block;

/// Status reported by a [`RequestSender`] as it progresses. This is a
/// wire-compatibility surface: the request handler's `waitForFirstReply`
/// table is keyed directly on these variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderStatus {
    NotFinished,
    DataNotFound,
    GeneratedRejectedOverload,
    TimedOut,
    InternalError,
    RouteNotFound { hops_left: u8 },
    Success,
    VerifyFailure,
    TransferFailed,
}

/// Bitmask of sub-signals a sender can report alongside (or ahead of) a
/// terminal [`SenderStatus`], consumed by the `waitForFirstReply` table.
pub mod wait_mask {
    pub const REJECTED_OVERLOAD: u32 = 1 << 0;
    pub const TRANSFERRING_DATA: u32 = 1 << 1;
}

/// A handle to an in-progress downstream fetch. The handler subscribes to
/// status changes; it never polls.
pub trait RequestSender: Send + Sync {
    /// Current status and wait-mask, read once per notification.
    fn status(&self) -> (SenderStatus, u32);

    /// True if this is an SSK fetch (changes which wire message /
    /// accounting bucket applies on success).
    fn is_ssk(&self) -> bool;

    /// Header bytes available once the sender begins transferring data
    /// (valid once the `TRANSFERRING_DATA` wait-mask bit is set).
    fn headers(&self) -> Vec<u8>;

    /// Register `on_change` to be invoked (possibly from another thread)
    /// whenever `status()` changes. Only one subscriber is ever active at
    /// a time; re-subscribing after a status change is how the handler
    /// implements its "wait for next change" steps.
    fn subscribe(&self, on_change: Box<dyn FnOnce(u32) + Send>);

    /// Pull the block out of a sender that has reached `Success`. Only
    /// valid to call once, after `status()` reports `Success`.
    fn take_block(&self) -> Option<Block>;
}

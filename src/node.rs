//! The node collaborator: everything the request handler needs from the
//! node beyond local-store lookup and the peer transport, namely
//! request-sender construction, the transferring-UID bookkeeping, and
//! node-stats accounting.

use std::sync::Arc;

use crate::block::Block;
use crate::key::Key;
use crate::sender::RequestSender;

/// Either a local-store hit, a downstream sender to wait on, or nothing
/// (out of HTL / no peer to ask).
pub enum RequestOutcome {
    Local(Block),
    Sender(Arc<dyn RequestSender>),
    OutOfHtl,
}

/// The node a [`crate::request::handler::RequestHandler`] is running
/// against.
pub trait Node: Send + Sync {
    /// Either returns a local block, a downstream sender, or signals out
    /// of HTL. `local_only` and `can_write` mirror the real node's
    /// request-sender construction flags; `offer_replies` enables
    /// opportunistic push-on-miss.
    #[allow(clippy::too_many_arguments)]
    fn make_request_sender(
        &self,
        key: &Key,
        htl: u8,
        uid: u64,
        source: PeerId,
        closest_location: f64,
        reset_closest_loc: bool,
        local_only: bool,
        can_write: bool,
        offer_replies: bool,
    ) -> RequestOutcome;

    fn add_transferring_request_handler(&self, uid: u64);
    fn remove_transferring_request_handler(&self, uid: u64);

    /// `insert` distinguishes an insert-side UID from a request-side one;
    /// both must be unlocked exactly once over a UID's lifecycle.
    fn unlock_uid(&self, uid: u64, is_ssk: bool, insert: bool);

    fn sent_payload(&self, bytes: u64);

    /// Byte-accounting sinks, split by key kind and whether the bytes
    /// flowed through a successful local transfer or a remote one.
    fn record_chk_bytes(&self, sent: u64, received: u64, successful: bool);
    fn record_ssk_bytes(&self, sent: u64, received: u64, successful: bool);
}

/// Opaque peer identity; routing and transport framing are out of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub u64);

//! The request handler state machine. Answers one incoming request
//! with a local hit, a downstream sender, or an error reply, then rides
//! that sender's status changes through to a single wire-exhaustive
//! terminal reply.

use std::sync::{Arc, Mutex};

use log::{debug, trace, warn};

use crate::block::Block;
use crate::error::HandlerError;
use crate::key::Key;
use crate::node::{Node, PeerId, RequestOutcome};
use crate::request::message::Message;
use crate::request::reactor::{Io, Reactor};
use crate::sender::{wait_mask, RequestSender, SenderStatus};

/// One-way state progression: `Initialize` only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Initialize,
    WaitForFirstReply,
    Finished,
}

struct Inner {
    current_state: State,
    htl: u8,
    wait_status: u32,
    sender: Option<Arc<dyn RequestSender>>,
    is_ssk: bool,
    /// Doubles as "a CHK transfer has been started" (checked by the
    /// `Success` branch) and as the one-shot re-subscribe guard for
    /// `VerifyFailure`/`TransferFailed` — the two uses never conflict
    /// because both describe the same fact: has this sender already
    /// been given a chance to finish streaming.
    should_have_started_transfer: bool,
    /// Set whenever the handler manufactures its own `REJECTED-OVERLOAD`
    /// (or equivalent) rather than relaying a downstream reply; gates
    /// whether `_finally` reports byte accounting.
    locally_generated_failure: bool,
}

#[derive(Default)]
struct ByteCounts {
    sent: u64,
    received: u64,
}

/// Answers a single incoming request of key `key`, uid `uid`, from `source`.
pub struct RequestHandler {
    uid: u64,
    source: PeerId,
    key: Key,
    closest_location: f64,
    reset_closest_loc: bool,
    needs_pub_key: bool,
    node: Arc<dyn Node>,
    inner: Mutex<Inner>,
    byte_counts: Mutex<ByteCounts>,
    reactor: Mutex<Reactor>,
}

impl RequestHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        uid: u64,
        source: PeerId,
        key: Key,
        htl: u8,
        closest_location: f64,
        reset_closest_loc: bool,
        needs_pub_key: bool,
        node: Arc<dyn Node>,
    ) -> Arc<Self> {
        Arc::new(Self {
            uid,
            source,
            key,
            closest_location,
            reset_closest_loc,
            needs_pub_key,
            node,
            inner: Mutex::new(Inner {
                current_state: State::Initialize,
                htl,
                wait_status: 0,
                sender: None,
                is_ssk: false,
                should_have_started_transfer: false,
                locally_generated_failure: false,
            }),
            byte_counts: Mutex::new(ByteCounts::default()),
            reactor: Mutex::new(Reactor::new()),
        })
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn current_state(&self) -> State {
        self.inner.lock().unwrap().current_state
    }

    pub fn is_finished(&self) -> bool {
        self.current_state() == State::Finished
    }

    /// Drain every effect queued since the last drain. The driving loop
    /// calls this after `run()` and after every `on_status_change`.
    pub fn drain_io(&self) -> Vec<Io> {
        let mut reactor = self.reactor.lock().unwrap();
        let mut out = Vec::new();
        while let Some(io) = reactor.next() {
            out.push(io);
        }
        out
    }

    /// Reported by the block transmitter (out of scope here) as a CHK
    /// payload streams out; accumulated for the eventual node-stats report.
    pub fn sent_bytes(&self, n: u64) {
        self.byte_counts.lock().unwrap().sent += n;
    }

    pub fn received_bytes(&self, n: u64) {
        self.byte_counts.lock().unwrap().received += n;
    }

    pub fn sent_payload(&self, n: u64) {
        self.node.sent_payload(n);
    }

    /// Step 1-7: decrement HTL, send `ACCEPTED`, dispatch on what the
    /// node hands back.
    pub fn run(self: &Arc<Self>) -> Result<(), HandlerError> {
        let htl = {
            let mut inner = self.inner.lock().unwrap();
            inner.htl = decrement_htl(inner.htl);
            inner.htl
        };

        self.send(Message::Accepted { uid: self.uid });

        let outcome = self.node.make_request_sender(
            &self.key,
            htl,
            self.uid,
            self.source,
            self.closest_location,
            self.reset_closest_loc,
            false,
            true,
            true,
        );

        match outcome {
            RequestOutcome::Local(block) => self.handle_local_hit(block),
            RequestOutcome::Sender(sender) => self.handle_sender(sender),
            RequestOutcome::OutOfHtl => {
                debug!(target: "handler", "uid {} out of htl, no sender", self.uid);
                self.send(Message::DataNotFound { uid: self.uid });
                self.finish();
            }
        }

        Ok(())
    }

    fn handle_local_hit(&self, block: Block) {
        if block.key.is_ssk() {
            self.send(Message::SskDataFound {
                uid: self.uid,
                headers: block.header.clone(),
                data: block.payload.clone(),
            });
            if self.needs_pub_key {
                if let Some(pub_key) = &block.pub_key {
                    self.send(Message::SskPubKey {
                        uid: self.uid,
                        pub_key_bytes: pub_key.as_bytes().to_vec(),
                    });
                }
            }
            self.node
                .record_ssk_bytes(block.len() as u64, 0, true);
        } else {
            self.send(Message::ChkDataFound {
                uid: self.uid,
                headers: block.header.clone(),
            });
            self.reactor.lock().unwrap().start_transfer(self.uid);
            self.node
                .record_chk_bytes(block.len() as u64, 0, true);
        }
        self.finish();
    }

    fn handle_sender(self: &Arc<Self>, sender: Arc<dyn RequestSender>) {
        self.node.add_transferring_request_handler(self.uid);
        {
            let mut inner = self.inner.lock().unwrap();
            inner.current_state = State::WaitForFirstReply;
            inner.is_ssk = sender.is_ssk();
            inner.sender = Some(sender);
        }
        self.resubscribe();
    }

    fn resubscribe(self: &Arc<Self>) {
        let sender = self.inner.lock().unwrap().sender.clone();
        let Some(sender) = sender else {
            return;
        };
        let weak = Arc::downgrade(self);
        sender.subscribe(Box::new(move |mask| {
            if let Some(handler) = weak.upgrade() {
                handler.on_status_change(mask);
            }
        }));
    }

    /// The single entry point back into `waitForFirstReply`: reads the
    /// sender's current status, dispatches the table, and either
    /// re-subscribes for the next change or finishes.
    pub fn on_status_change(self: &Arc<Self>, mask: u32) {
        let (sender, already_finished) = {
            let inner = self.inner.lock().unwrap();
            (inner.sender.clone(), inner.current_state == State::Finished)
        };
        if already_finished {
            return;
        }
        let Some(sender) = sender else {
            return;
        };
        let (status, _) = sender.status();
        {
            let mut inner = self.inner.lock().unwrap();
            inner.wait_status = mask;
        }

        trace!(target: "handler", "uid {} status change: mask={:#x} status={:?}", self.uid, mask, status);

        if self.wait_for_first_reply(mask, status) {
            self.resubscribe();
        } else {
            self.finish();
        }
    }

    /// Returns `true` if the handler should keep waiting for another
    /// status change, `false` if it has produced its terminal reply.
    fn wait_for_first_reply(&self, mask: u32, status: SenderStatus) -> bool {
        if mask & wait_mask::REJECTED_OVERLOAD != 0 {
            self.send(Message::RejectedOverload {
                uid: self.uid,
                local: false,
            });
            // Falls through: a downstream overload notice can arrive
            // alongside any status, terminal or not.
        }

        if mask & wait_mask::TRANSFERRING_DATA != 0 {
            self.begin_chk_transfer();
            return true;
        }

        match status {
            SenderStatus::NotFinished => true,
            SenderStatus::DataNotFound => {
                self.send(Message::DataNotFound { uid: self.uid });
                false
            }
            SenderStatus::GeneratedRejectedOverload
            | SenderStatus::TimedOut
            | SenderStatus::InternalError => {
                self.mark_locally_generated_failure();
                self.send(Message::RejectedOverload {
                    uid: self.uid,
                    local: true,
                });
                false
            }
            SenderStatus::RouteNotFound { hops_left } => {
                self.send(Message::RouteNotFound {
                    uid: self.uid,
                    hops_left,
                });
                false
            }
            SenderStatus::Success => {
                let is_ssk = self.inner.lock().unwrap().is_ssk;
                if is_ssk {
                    self.complete_ssk_success();
                } else {
                    let started = self.inner.lock().unwrap().should_have_started_transfer;
                    if !started {
                        warn!(target: "handler", "uid {} reported chk success with no transfer ever started", self.uid);
                    }
                }
                false
            }
            SenderStatus::VerifyFailure => self.handle_one_shot_failure(false),
            SenderStatus::TransferFailed => self.handle_one_shot_failure(true),
        }
    }

    fn begin_chk_transfer(&self) {
        let headers = {
            let inner = self.inner.lock().unwrap();
            inner
                .sender
                .as_ref()
                .map(|sender| sender.headers())
                .unwrap_or_default()
        };
        {
            let mut inner = self.inner.lock().unwrap();
            inner.should_have_started_transfer = true;
        }
        self.send(Message::ChkDataFound {
            uid: self.uid,
            headers,
        });
        self.reactor.lock().unwrap().start_transfer(self.uid);
    }

    fn complete_ssk_success(&self) {
        let sender = self.inner.lock().unwrap().sender.clone();
        let Some(sender) = sender else {
            warn!(target: "handler", "uid {} ssk success with no sender recorded", self.uid);
            return;
        };
        let Some(block) = sender.take_block() else {
            warn!(target: "handler", "uid {} ssk sender reported success with no block", self.uid);
            return;
        };
        self.send(Message::SskDataFound {
            uid: self.uid,
            headers: block.header.clone(),
            data: block.payload.clone(),
        });
        if self.needs_pub_key {
            if let Some(pub_key) = &block.pub_key {
                self.send(Message::SskPubKey {
                    uid: self.uid,
                    pub_key_bytes: pub_key.as_bytes().to_vec(),
                });
            }
        }
        self.byte_counts.lock().unwrap().received += block.len() as u64;
    }

    /// `VerifyFailure`/`TransferFailed` share one one-shot guard: the
    /// first report re-subscribes once in case the sender still manages
    /// to finish; a repeat report is terminal.
    fn handle_one_shot_failure(&self, silent: bool) -> bool {
        let already_seen = {
            let mut inner = self.inner.lock().unwrap();
            let seen = inner.should_have_started_transfer;
            inner.should_have_started_transfer = true;
            seen
        };
        if !already_seen {
            return true;
        }
        if silent {
            debug!(target: "handler", "uid {} transfer failed, no reply sent", self.uid);
        } else {
            self.mark_locally_generated_failure();
            self.send(Message::RejectedOverload {
                uid: self.uid,
                local: true,
            });
        }
        false
    }

    fn mark_locally_generated_failure(&self) {
        self.inner.lock().unwrap().locally_generated_failure = true;
    }

    fn send(&self, message: Message) {
        self.reactor.lock().unwrap().send(message);
    }

    /// Transition to `FINISHED`, release the uid, and report accumulated
    /// bytes once, idempotently.
    fn finish(&self) {
        let (sender_exists, is_ssk, locally_generated) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.current_state == State::Finished {
                return;
            }
            inner.current_state = State::Finished;
            (
                inner.sender.is_some(),
                inner.is_ssk,
                inner.locally_generated_failure,
            )
        };

        self.node.remove_transferring_request_handler(self.uid);
        self.node.unlock_uid(self.uid, self.key.is_ssk(), false);

        if sender_exists && !locally_generated {
            let (sent, received) = {
                let counts = self.byte_counts.lock().unwrap();
                (counts.sent, counts.received)
            };
            if is_ssk {
                self.node.record_ssk_bytes(sent, received, true);
            } else {
                self.node.record_chk_bytes(sent, received, true);
            }
        }
    }
}

fn decrement_htl(htl: u8) -> u8 {
    htl.saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::NodeKey;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeNode {
        outcome: Mutex<Option<RequestOutcome>>,
        unlocked: AtomicU32,
        chk_bytes: Mutex<Vec<(u64, u64, bool)>>,
        ssk_bytes: Mutex<Vec<(u64, u64, bool)>>,
    }

    impl FakeNode {
        fn with(outcome: RequestOutcome) -> Arc<Self> {
            Arc::new(Self {
                outcome: Mutex::new(Some(outcome)),
                unlocked: AtomicU32::new(0),
                chk_bytes: Mutex::new(Vec::new()),
                ssk_bytes: Mutex::new(Vec::new()),
            })
        }
    }

    impl Node for FakeNode {
        fn make_request_sender(
            &self,
            _key: &Key,
            _htl: u8,
            _uid: u64,
            _source: PeerId,
            _closest_location: f64,
            _reset_closest_loc: bool,
            _local_only: bool,
            _can_write: bool,
            _offer_replies: bool,
        ) -> RequestOutcome {
            self.outcome.lock().unwrap().take().unwrap()
        }

        fn add_transferring_request_handler(&self, _uid: u64) {}
        fn remove_transferring_request_handler(&self, _uid: u64) {}

        fn unlock_uid(&self, _uid: u64, _is_ssk: bool, _insert: bool) {
            self.unlocked.fetch_add(1, Ordering::SeqCst);
        }

        fn sent_payload(&self, _bytes: u64) {}

        fn record_chk_bytes(&self, sent: u64, received: u64, successful: bool) {
            self.chk_bytes.lock().unwrap().push((sent, received, successful));
        }

        fn record_ssk_bytes(&self, sent: u64, received: u64, successful: bool) {
            self.ssk_bytes.lock().unwrap().push((sent, received, successful));
        }
    }

    struct FakeSender {
        status: Mutex<(SenderStatus, u32)>,
        is_ssk: bool,
        headers: Vec<u8>,
        block: Mutex<Option<Block>>,
    }

    impl RequestSender for FakeSender {
        fn status(&self) -> (SenderStatus, u32) {
            *self.status.lock().unwrap()
        }

        fn is_ssk(&self) -> bool {
            self.is_ssk
        }

        fn headers(&self) -> Vec<u8> {
            self.headers.clone()
        }

        fn subscribe(&self, _on_change: Box<dyn FnOnce(u32) + Send>) {}

        fn take_block(&self) -> Option<Block> {
            self.block.lock().unwrap().take()
        }
    }

    fn chk_key() -> Key {
        Key::Chk {
            node_key: NodeKey::new([1; 32]),
        }
    }

    #[test]
    fn local_chk_hit_sends_data_found_and_finishes_without_reporting_bytes_twice() {
        let block = Block::chk(chk_key(), vec![1, 2], vec![3, 4, 5]);
        let node = FakeNode::with(RequestOutcome::Local(block));
        let handler = RequestHandler::new(1, PeerId(9), chk_key(), 5, 0.5, false, false, node.clone());

        handler.run().unwrap();

        assert!(handler.is_finished());
        let io = handler.drain_io();
        assert_eq!(io[0], Io::Send(Message::Accepted { uid: 1 }));
        assert!(io.contains(&Io::Send(Message::ChkDataFound {
            uid: 1,
            headers: vec![1, 2],
        })));
        assert!(io.contains(&Io::StartTransfer { uid: 1 }));
        assert_eq!(node.chk_bytes.lock().unwrap().len(), 1);
        assert_eq!(node.unlocked.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn out_of_htl_sends_data_not_found() {
        let node = FakeNode::with(RequestOutcome::OutOfHtl);
        let handler = RequestHandler::new(2, PeerId(9), chk_key(), 1, 0.5, false, false, node);

        handler.run().unwrap();

        assert!(handler.is_finished());
        let io = handler.drain_io();
        assert!(io.contains(&Io::Send(Message::DataNotFound { uid: 2 })));
    }

    #[test]
    fn not_finished_status_resubscribes_without_finishing() {
        let sender: Arc<dyn RequestSender> = Arc::new(FakeSender {
            status: Mutex::new((SenderStatus::NotFinished, 0)),
            is_ssk: false,
            headers: Vec::new(),
            block: Mutex::new(None),
        });
        let node = FakeNode::with(RequestOutcome::Sender(sender.clone()));
        let handler = RequestHandler::new(3, PeerId(9), chk_key(), 5, 0.5, false, false, node);

        handler.run().unwrap();
        assert_eq!(handler.current_state(), State::WaitForFirstReply);

        handler.on_status_change(0);
        assert_eq!(handler.current_state(), State::WaitForFirstReply);
    }

    #[test]
    fn transfer_failed_requires_two_reports_before_finishing_and_sends_no_reply() {
        let sender: Arc<dyn RequestSender> = Arc::new(FakeSender {
            status: Mutex::new((SenderStatus::TransferFailed, 0)),
            is_ssk: false,
            headers: Vec::new(),
            block: Mutex::new(None),
        });
        let node = FakeNode::with(RequestOutcome::Sender(sender.clone()));
        let handler = RequestHandler::new(4, PeerId(9), chk_key(), 5, 0.5, false, false, node);

        handler.run().unwrap();
        handler.on_status_change(0);
        assert!(!handler.is_finished());

        handler.on_status_change(0);
        assert!(handler.is_finished());
        assert!(!handler
            .drain_io()
            .iter()
            .any(|io| matches!(io, Io::Send(Message::RejectedOverload { .. }))));
    }

    #[test]
    fn generated_rejected_overload_is_locally_generated_and_skips_byte_report() {
        let sender: Arc<dyn RequestSender> = Arc::new(FakeSender {
            status: Mutex::new((SenderStatus::GeneratedRejectedOverload, 0)),
            is_ssk: false,
            headers: Vec::new(),
            block: Mutex::new(None),
        });
        let node = FakeNode::with(RequestOutcome::Sender(sender.clone()));
        let handler = RequestHandler::new(5, PeerId(9), chk_key(), 5, 0.5, false, false, node.clone());

        handler.run().unwrap();
        handler.on_status_change(0);

        assert!(handler.is_finished());
        assert!(node.chk_bytes.lock().unwrap().is_empty());
        let io = handler.drain_io();
        assert!(io.contains(&Io::Send(Message::RejectedOverload { uid: 5, local: true })));
    }
}

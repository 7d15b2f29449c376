//! Effect queue the request handler emits into instead of calling the
//! peer transport or block transmitter synchronously in-line. Modeled
//! on a reactor `Io`/drain pattern: the handler pushes intents, the
//! driving loop pulls and executes them, which keeps the handler
//! testable without a real transport.

use std::collections::VecDeque;

use crate::request::message::Message;

/// Output of a request handler state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Io {
    /// Send `message` to the peer that issued the request.
    Send(Message),
    /// Begin streaming `uid`'s payload over the block transmitter.
    StartTransfer { uid: u64 },
}

/// Queue of pending [`Io`] effects for one request handler.
#[derive(Debug, Default)]
pub struct Reactor {
    io: VecDeque<Io>,
}

impl Reactor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&mut self, message: Message) {
        self.io.push_back(Io::Send(message));
    }

    pub fn start_transfer(&mut self, uid: u64) {
        self.io.push_back(Io::StartTransfer { uid });
    }

    #[cfg(test)]
    pub(crate) fn drain(&mut self) -> Vec<Io> {
        self.io.drain(..).collect()
    }
}

impl Iterator for Reactor {
    type Item = Io;

    fn next(&mut self) -> Option<Self::Item> {
        self.io.pop_front()
    }
}

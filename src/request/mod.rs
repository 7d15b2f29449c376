//! Answering an incoming request for a key.

pub mod handler;
pub mod message;
pub mod reactor;

pub use handler::{RequestHandler, State};
pub use message::Message;
pub use reactor::{Io, Reactor};

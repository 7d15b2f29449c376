//! Manifest insert orchestration: the directory tree shape, the
//! per-leaf handler, and the putter that drives them all.

pub mod put_handler;
pub mod putter;
pub mod tree;

pub use put_handler::{HandlerKey, PutHandler};
pub use putter::{InserterFactory, ManifestPutter};
pub use tree::{flatten, unflatten, ManifestElement, ManifestNode};

//! Outer client callback collaborator.

use crate::error::InsertError;
use crate::key::Uri;

/// Invoked by a [`crate::manifest::putter::ManifestPutter`] as the
/// terminal outcome of an insert. Exactly one of `on_success` /
/// `on_failure` is ever invoked, and at most once. `on_generated_uri`
/// fires exactly once, before `on_success`.
pub trait ClientCallback: Send + Sync {
    fn on_success(&self);
    fn on_failure(&self, err: InsertError);
    fn on_generated_uri(&self, uri: Uri);
}

//! Put handler: wraps one manifest leaf, either an active insert
//! or a static redirect placeholder.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::bucket::Bucket;
use crate::error::{InserterError, InsertError};
use crate::inserter::{ChildStateId, InserterCallbacks, SingleFileInserter};
use crate::key::{Key, Uri};
use crate::manifest::putter::Shared;

/// Stable slab key identifying a handler within its owning putter's
/// arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerKey(pub usize);

enum Kind {
    Active {
        inserter: Mutex<Option<Arc<dyn SingleFileInserter>>>,
        current_state: Mutex<Option<ChildStateId>>,
    },
    Static,
}

/// Owned exclusively by its [`crate::manifest::putter::ManifestPutter`].
pub struct PutHandler {
    pub name: String,
    pub mime: Option<String>,
    kind: Kind,
    metadata: Mutex<Option<Vec<u8>>>,
    finished: AtomicBool,
    cancelled: AtomicBool,
    parent: Weak<Shared>,
    key: HandlerKey,
}

fn simple_redirect_bytes(target: &Uri) -> Vec<u8> {
    #[derive(serde::Serialize)]
    struct SimpleRedirect<'a> {
        kind: &'a str,
        target: &'a str,
    }
    serde_json::to_vec(&SimpleRedirect {
        kind: "SIMPLE_REDIRECT",
        target: target.as_str(),
    })
    .expect("redirect metadata always serializes")
}

impl PutHandler {
    /// Static redirect constructor: metadata is known and serialized
    /// immediately, there is no inserter to run.
    pub(crate) fn new_static(
        name: String,
        target: Uri,
        mime: Option<String>,
        parent: Weak<Shared>,
        key: HandlerKey,
    ) -> Arc<Self> {
        let bytes = simple_redirect_bytes(&target);
        Arc::new(Self {
            name,
            mime,
            kind: Kind::Static,
            metadata: Mutex::new(Some(bytes)),
            finished: AtomicBool::new(true),
            cancelled: AtomicBool::new(false),
            parent,
            key,
        })
    }

    /// Active constructor: builds an insert pointing at an empty CHK
    /// target, and asks `factory` to create the child inserter,
    /// stored as `current_state`. Fails iff the factory fails.
    pub(crate) fn new_active(
        name: String,
        data: Arc<dyn Bucket>,
        mime: Option<String>,
        parent: Weak<Shared>,
        key: HandlerKey,
        factory: &dyn super::putter::InserterFactory,
    ) -> Result<Arc<Self>, InserterError> {
        let handler = Arc::new(Self {
            name,
            mime,
            kind: Kind::Active {
                inserter: Mutex::new(None),
                current_state: Mutex::new(None),
            },
            metadata: Mutex::new(None),
            finished: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            parent,
            key,
        });

        let callbacks: Arc<dyn InserterCallbacks> = handler.clone();
        let inserter = factory.new_inserter(data, handler.mime.clone(), None, callbacks)?;

        if let Kind::Active {
            inserter: slot,
            current_state,
        } = &handler.kind
        {
            *current_state.lock().unwrap() = Some(inserter.current_state());
            *slot.lock().unwrap() = Some(inserter);
        }

        Ok(handler)
    }

    pub fn key(&self) -> HandlerKey {
        self.key
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn metadata_bytes(&self) -> Option<Vec<u8>> {
        self.metadata.lock().unwrap().clone()
    }

    /// Mark this handler cancelled. In-flight child operations are not
    /// preempted; this only ensures future callbacks from the child
    /// inserter are no-ops.
    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Start the child inserter, if this is an active leaf. No-op for a
    /// static redirect, which has nothing to run.
    pub(crate) fn start(&self) -> Result<(), InserterError> {
        if let Kind::Active { inserter, .. } = &self.kind {
            let inserter = inserter.lock().unwrap().clone();
            if let Some(inserter) = inserter {
                inserter.start()?;
            }
        }
        Ok(())
    }

    fn parent(&self) -> Option<Arc<Shared>> {
        self.parent.upgrade()
    }

    fn assign_metadata(&self, bytes: Vec<u8>) {
        {
            let mut slot = self.metadata.lock().unwrap();
            if slot.is_some() {
                log::warn!(target: "manifest", "put handler {:?} tried to reassign metadata, dropping", self.name);
                return;
            }
            *slot = Some(bytes);
        }
        self.finished.store(true, Ordering::SeqCst);

        if let Some(parent) = self.parent() {
            parent.on_handler_metadata_ready(self.key);
        }
    }
}

impl InserterCallbacks for PutHandler {
    fn on_encode(&self, key: Key, state: ChildStateId) {
        if self.cancelled.load(Ordering::SeqCst) {
            return;
        }
        let already_has_metadata = self.metadata.lock().unwrap().is_some();
        if already_has_metadata {
            return;
        }
        // The data was small enough to be inlined as metadata instead of
        // requiring a real insert; synthesize the redirect and feed it
        // back through the same path `on_metadata` uses.
        let uri = Uri::from_key(&key);
        let bytes = simple_redirect_bytes(&uri);
        self.assign_metadata(bytes);
    }

    fn on_metadata(&self, metadata: Vec<u8>, state: ChildStateId) {
        let _ = state;
        if self.cancelled.load(Ordering::SeqCst) {
            return;
        }
        self.assign_metadata(metadata);
    }

    fn on_success(&self, _state: ChildStateId) {
        if self.cancelled.load(Ordering::SeqCst) {
            return;
        }
        if let Some(parent) = self.parent() {
            parent.on_handler_succeeded(self.key);
        }
    }

    fn on_failure(&self, err: InserterError, _state: ChildStateId) {
        if self.cancelled.load(Ordering::SeqCst) {
            return;
        }
        if let Some(parent) = self.parent() {
            parent.fail(InsertError::Child(err));
        }
    }

    fn on_transition(&self, old: ChildStateId, new: ChildStateId) {
        if let Kind::Active { current_state, .. } = &self.kind {
            let mut slot = current_state.lock().unwrap();
            if *slot == Some(old) {
                *slot = Some(new);
            } else {
                log::warn!(
                    target: "manifest",
                    "put handler {:?} saw transition from unexpected state {:?} (current {:?})",
                    self.name, old, *slot,
                );
            }
        }
    }

    fn on_block_set_finished(&self, _state: ChildStateId) {
        if self.cancelled.load(Ordering::SeqCst) {
            return;
        }
        if let Some(parent) = self.parent() {
            parent.on_handler_block_set_finished(self.key);
        }
    }

    fn add_block(&self) {
        if let Some(parent) = self.parent() {
            parent.events().add_block();
        }
    }

    fn add_blocks(&self, n: u32) {
        if let Some(parent) = self.parent() {
            parent.events().add_blocks(n);
        }
    }

    fn completed_block(&self, from_cache: bool) {
        if let Some(parent) = self.parent() {
            parent.events().completed_block(from_cache);
        }
    }

    fn failed_block(&self) {
        if let Some(parent) = self.parent() {
            parent.events().failed_block();
        }
    }

    fn fatally_failed_block(&self) {
        if let Some(parent) = self.parent() {
            parent.events().fatally_failed_block();
        }
    }

    fn add_must_succeed_blocks(&self, n: u32) {
        if let Some(parent) = self.parent() {
            parent.events().add_must_succeed_blocks(n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::MemoryBucket;
    use crate::key::NodeKey;
    use crate::manifest::putter::InserterFactory;

    struct NullInserter;

    impl SingleFileInserter for NullInserter {
        fn current_state(&self) -> ChildStateId {
            ChildStateId(0)
        }

        fn start(&self) -> Result<(), InserterError> {
            Ok(())
        }
    }

    struct NullFactory;

    impl InserterFactory for NullFactory {
        fn new_inserter(
            &self,
            _data: Arc<dyn Bucket>,
            _mime: Option<String>,
            _target: Option<Uri>,
            _callbacks: Arc<dyn InserterCallbacks>,
        ) -> Result<Arc<dyn SingleFileInserter>, InserterError> {
            Ok(Arc::new(NullInserter))
        }
    }

    fn active_handler() -> Arc<PutHandler> {
        PutHandler::new_active(
            "a.html".to_string(),
            Arc::new(MemoryBucket::new(b"x".to_vec())),
            None,
            Weak::new(),
            HandlerKey(0),
            &NullFactory,
        )
        .unwrap()
    }

    #[test]
    fn static_redirect_is_finished_immediately_with_redirect_metadata() {
        let handler = PutHandler::new_static(
            "link".to_string(),
            Uri::new("FOO://bar"),
            None,
            Weak::new(),
            HandlerKey(0),
        );

        assert!(handler.is_finished());
        let bytes = handler.metadata_bytes().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["kind"], "SIMPLE_REDIRECT");
        assert_eq!(value["target"], "FOO://bar");
    }

    #[test]
    fn active_handler_starts_with_no_metadata_until_encoded() {
        let handler = active_handler();
        assert!(!handler.is_finished());
        assert!(handler.metadata_bytes().is_none());
    }

    #[test]
    fn on_encode_synthesizes_metadata_and_does_not_reassign() {
        let handler = active_handler();

        let key = Key::Chk { node_key: NodeKey::new([3; 32]) };
        handler.on_encode(key, ChildStateId(0));
        assert!(handler.is_finished());
        let first = handler.metadata_bytes().unwrap();

        // A second report for the same leaf must not replace the
        // already-assigned metadata.
        let other_key = Key::Chk { node_key: NodeKey::new([9; 32]) };
        handler.on_encode(other_key, ChildStateId(0));
        assert_eq!(handler.metadata_bytes().unwrap(), first);
    }

    #[test]
    fn on_metadata_does_not_reassign_once_set() {
        let handler = active_handler();
        handler.on_metadata(b"first".to_vec(), ChildStateId(0));
        handler.on_metadata(b"second".to_vec(), ChildStateId(0));
        assert_eq!(handler.metadata_bytes().unwrap(), b"first".to_vec());
    }

    #[test]
    fn cancelled_handler_ignores_further_callbacks() {
        let handler = active_handler();
        handler.cancel();
        handler.on_metadata(b"late".to_vec(), ChildStateId(0));
        assert!(handler.metadata_bytes().is_none());
    }
}

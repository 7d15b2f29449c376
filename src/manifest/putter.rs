//! Manifest putter: walks the directory tree, runs all leaf puts
//! in parallel, assembles and inserts the manifest.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::bucket::{Bucket, BucketFactory};
use crate::client::ClientCallback;
use crate::error::{InserterError, InsertError};
use crate::event::EventProducer;
use crate::inserter::{ChildStateId, InserterCallbacks, SingleFileInserter};
use crate::key::{Key, Uri};
use crate::manifest::put_handler::{HandlerKey, PutHandler};
use crate::manifest::tree::{ManifestElement, ManifestNode};

/// Creates the inserter collaborator for one leaf (or for the manifest
/// itself). `target` is `None` for a fresh CHK-only insert (every leaf), or
/// `Some(uri)` when the caller supplied a target URI for the manifest's
/// own insert.
pub trait InserterFactory: Send + Sync {
    fn new_inserter(
        &self,
        data: Arc<dyn Bucket>,
        mime: Option<String>,
        target: Option<Uri>,
        callbacks: Arc<dyn InserterCallbacks>,
    ) -> Result<Arc<dyn SingleFileInserter>, InserterError>;
}

/// Parallel tree of handlers mirroring the input [`ManifestNode`] tree,
/// with leaves referring to handlers by their stable arena key.
enum HandlerNode {
    Leaf(HandlerKey),
    Subtree(BTreeMap<String, HandlerNode>),
}

struct State {
    handlers: slab::Slab<Arc<PutHandler>>,
    handler_tree: HandlerNode,
    running_put_handlers: HashSet<HandlerKey>,
    waiting_for_metadata: HashSet<HandlerKey>,
    waiting_for_block_sets: HashSet<HandlerKey>,
    inserted_all_files: bool,
    inserted_manifest: bool,
    metadata_block_set_finalized: bool,
    metadata_complete_triggered: bool,
    finished: bool,
    cancelled: bool,
    final_uri: Option<Uri>,
    total_size: u64,
    number_of_files: u64,
    current_metadata_inserter: Option<Arc<dyn SingleFileInserter>>,
    current_metadata_inserter_state: Option<ChildStateId>,
}

/// Shared, reference-counted innards a [`PutHandler`] holds a [`Weak`]
/// pointer to: the arena owns every child handler, and each child holds
/// only a weak back-reference to break the cycle.
pub(crate) struct Shared {
    state: Mutex<State>,
    client: Arc<dyn ClientCallback>,
    bucket_factory: Arc<dyn BucketFactory>,
    inserter_factory: Arc<dyn InserterFactory>,
    events: Arc<dyn EventProducer>,
    default_name: Option<String>,
    target_uri: Option<Uri>,
    /// Guards exactly-one invocation of the client's `on_success` /
    /// `on_failure`.
    reported: AtomicBool,
}

/// Drives a manifest insert end to end: leaf puts in parallel, then the
/// manifest itself once every leaf has metadata.
pub struct ManifestPutter {
    shared: Arc<Shared>,
}

impl ManifestPutter {
    /// Builds the parallel tree of handlers from `tree`. If any child
    /// handler's construction fails, the (partially built) putter is
    /// cancelled and the error is propagated.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tree: ManifestNode,
        default_name: Option<String>,
        target_uri: Option<Uri>,
        client: Arc<dyn ClientCallback>,
        bucket_factory: Arc<dyn BucketFactory>,
        inserter_factory: Arc<dyn InserterFactory>,
        events: Arc<dyn EventProducer>,
    ) -> Result<Self, InsertError> {
        let total_size = tree.total_size();
        let number_of_files = tree.file_count() as u64;

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                handlers: slab::Slab::new(),
                handler_tree: HandlerNode::Subtree(BTreeMap::new()),
                running_put_handlers: HashSet::new(),
                waiting_for_metadata: HashSet::new(),
                waiting_for_block_sets: HashSet::new(),
                inserted_all_files: false,
                inserted_manifest: false,
                metadata_block_set_finalized: false,
                metadata_complete_triggered: false,
                finished: false,
                cancelled: false,
                final_uri: None,
                total_size,
                number_of_files,
                current_metadata_inserter: None,
                current_metadata_inserter_state: None,
            }),
            client,
            bucket_factory,
            inserter_factory,
            events,
            default_name,
            target_uri,
            reported: AtomicBool::new(false),
        });

        let built = {
            let mut state = shared.state.lock().unwrap();
            build_node(&shared, &mut state, &tree)
        };

        let handler_tree = match built {
            Ok(node) => node,
            Err(err) => {
                shared.cancel_and_finish();
                return Err(err.into());
            }
        };

        {
            let mut state = shared.state.lock().unwrap();
            state.handler_tree = handler_tree;
            if state.running_put_handlers.is_empty() {
                state.inserted_all_files = true;
            }
        }

        Ok(Self { shared })
    }

    /// Starts every active leaf's inserter. On any failure, cancels and
    /// rethrows.
    pub fn start(&self) -> Result<(), InsertError> {
        let snapshot: Vec<Arc<PutHandler>> = {
            let state = self.shared.state.lock().unwrap();
            state
                .running_put_handlers
                .iter()
                .filter_map(|k| state.handlers.get(k.0).cloned())
                .collect()
        };

        for handler in &snapshot {
            if let Err(err) = handler.start() {
                self.shared.cancel_and_finish();
                return Err(err.into());
            }
        }

        self.shared.maybe_got_all_metadata();

        Ok(())
    }

    /// Cancel every running leaf. Safe to call more than once.
    pub fn cancel(&self) {
        self.shared.cancel_and_finish();
    }

    pub fn final_uri(&self) -> Option<Uri> {
        self.shared.state.lock().unwrap().final_uri.clone()
    }

    pub fn total_size(&self) -> u64 {
        self.shared.state.lock().unwrap().total_size
    }

    pub fn number_of_files(&self) -> u64 {
        self.shared.state.lock().unwrap().number_of_files
    }
}

fn build_node(
    shared: &Arc<Shared>,
    state: &mut State,
    node: &ManifestNode,
) -> Result<HandlerNode, InserterError> {
    match node {
        ManifestNode::Leaf(element) => {
            let key = build_leaf(shared, state, element)?;
            Ok(HandlerNode::Leaf(key))
        }
        ManifestNode::Subtree(children) => {
            let mut out = BTreeMap::new();
            for (name, child) in children {
                out.insert(name.clone(), build_node(shared, state, child)?);
            }
            Ok(HandlerNode::Subtree(out))
        }
    }
}

fn build_leaf(
    shared: &Arc<Shared>,
    state: &mut State,
    element: &ManifestElement,
) -> Result<HandlerKey, InserterError> {
    let entry = state.handlers.vacant_entry();
    let key = HandlerKey(entry.key());
    let weak: Weak<Shared> = Arc::downgrade(shared);

    let handler = if let Some(target) = &element.target {
        PutHandler::new_static(element.name.clone(), target.clone(), element.mime.clone(), weak, key)
    } else {
        let data = element
            .data
            .clone()
            .expect("manifest element has either a target or data bucket");
        let handler = PutHandler::new_active(
            element.name.clone(),
            data,
            element.mime.clone(),
            weak,
            key,
            shared.inserter_factory.as_ref(),
        )?;
        state.running_put_handlers.insert(key);
        state.waiting_for_metadata.insert(key);
        state.waiting_for_block_sets.insert(key);
        handler
    };

    entry.insert(handler);
    Ok(key)
}

impl Shared {
    fn events(&self) -> &Arc<dyn EventProducer> {
        &self.events
    }

    fn is_done(&self, state: &State) -> bool {
        state.finished || state.cancelled
    }

    pub(crate) fn on_handler_succeeded(&self, key: HandlerKey) {
        let became_empty = {
            let mut state = self.state.lock().unwrap();
            if self.is_done(&state) {
                return;
            }
            state.running_put_handlers.remove(&key);
            state.running_put_handlers.is_empty() && !state.inserted_all_files
        };
        if became_empty {
            {
                let mut state = self.state.lock().unwrap();
                state.inserted_all_files = true;
            }
            log::debug!(target: "manifest", "all leaf inserts finished");
            self.maybe_complete();
        }
    }

    pub(crate) fn on_handler_metadata_ready(self: &Arc<Self>, key: HandlerKey) {
        {
            let mut state = self.state.lock().unwrap();
            if self.is_done(&state) {
                return;
            }
            state.waiting_for_metadata.remove(&key);
        }
        self.maybe_got_all_metadata();
    }

    pub(crate) fn on_handler_block_set_finished(&self, key: HandlerKey) {
        let all_final = {
            let mut state = self.state.lock().unwrap();
            if self.is_done(&state) {
                return;
            }
            state.waiting_for_block_sets.remove(&key);
            state.waiting_for_block_sets.is_empty() && state.metadata_block_set_finalized
        };
        if all_final {
            log::trace!(target: "manifest", "all block sets finalized");
            self.events().emit(crate::event::SplitfileProgressEvent {
                block_set_finalized: true,
                ..Default::default()
            });
        }
    }

    fn maybe_got_all_metadata(self: &Arc<Self>) {
        let should_run = {
            let mut state = self.state.lock().unwrap();
            if self.is_done(&state) {
                return;
            }
            if state.metadata_complete_triggered || !state.waiting_for_metadata.is_empty() {
                false
            } else {
                state.metadata_complete_triggered = true;
                true
            }
        };
        if should_run {
            if let Err(err) = self.got_all_metadata() {
                self.fail(err);
            }
        }
    }

    fn got_all_metadata(self: &Arc<Self>) -> Result<(), InsertError> {
        let default_name = self.default_name.clone();

        let (entries, default_bytes) = {
            let state = self.state.lock().unwrap();
            let entries = build_entries(&state.handler_tree, &state.handlers)?;
            let default_bytes = match &default_name {
                Some(name) => Some(
                    lookup_leaf_metadata(&state.handler_tree, name, &state.handlers)
                        .ok_or_else(|| InsertError::InvalidUri { name: name.clone() })?,
                ),
                None => DEFAULT_CANDIDATES
                    .iter()
                    .find_map(|candidate| lookup_leaf_metadata(&state.handler_tree, candidate, &state.handlers)),
            };
            (entries, default_bytes)
        };

        let mut entries = entries;
        if let Some(bytes) = default_bytes {
            entries.insert(String::new(), ManifestEntry::Metadata(bytes));
        }

        let manifest = ManifestEntry::Subtree(entries);
        let serialized = serde_json::to_vec(&manifest)
            .map_err(|e| InsertError::InternalError(format!("manifest serialization failed: {e}")))?;
        let bucket = self
            .bucket_factory
            .make_immutable_bucket(serialized)
            .map_err(InsertError::BucketError)?;

        let callbacks: Arc<dyn InserterCallbacks> = ManifestCallbacks::new(Arc::downgrade(self));
        let inserter = self
            .inserter_factory
            .new_inserter(bucket, None, self.target_uri.clone(), callbacks)
            .map_err(InsertError::Child)?;

        {
            let mut state = self.state.lock().unwrap();
            state.current_metadata_inserter_state = Some(inserter.current_state());
            state.current_metadata_inserter = Some(inserter.clone());
        }

        inserter.start().map_err(InsertError::Child)
    }

    pub(crate) fn fail(&self, err: InsertError) {
        self.cancel_and_finish();
        if self
            .reported
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            log::warn!(target: "manifest", "insert failed: {err}");
            self.client.on_failure(err);
        }
    }

    fn maybe_complete(&self) {
        let ready = {
            let mut state = self.state.lock().unwrap();
            if state.finished {
                false
            } else if state.inserted_all_files && state.inserted_manifest {
                state.finished = true;
                true
            } else {
                false
            }
        };
        if ready
            && self
                .reported
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            log::debug!(target: "manifest", "insert completed successfully");
            self.client.on_success();
        }
    }

    /// Idempotent: sets `finished`, snapshots running handlers under
    /// lock, cancels each outside the lock.
    pub(crate) fn cancel_and_finish(&self) {
        let snapshot = {
            let mut state = self.state.lock().unwrap();
            if state.finished {
                return;
            }
            state.finished = true;
            state.cancelled = true;
            state
                .running_put_handlers
                .iter()
                .filter_map(|k| state.handlers.get(k.0).cloned())
                .collect::<Vec<_>>()
        };
        for handler in snapshot {
            handler.cancel();
        }
    }

    fn on_manifest_encode(&self, key: Key, state_id: ChildStateId) {
        let _ = state_id;
        let uri = Uri::from_key(&key);
        {
            let mut state = self.state.lock().unwrap();
            state.final_uri = Some(uri.clone());
        }
        log::debug!(target: "manifest", "manifest inserted at {uri}");
        self.client.on_generated_uri(uri);
    }

    fn on_manifest_success(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.inserted_manifest = true;
        }
        self.maybe_complete();
    }

    fn on_manifest_failure(&self, err: InserterError) {
        self.fail(InsertError::Child(err));
    }

    fn on_manifest_transition(&self, old: ChildStateId, new: ChildStateId) {
        let mut state = self.state.lock().unwrap();
        if state.current_metadata_inserter_state == Some(old) {
            state.current_metadata_inserter_state = Some(new);
        } else {
            log::warn!(target: "manifest", "manifest inserter transition from unexpected state");
        }
    }

    fn on_manifest_metadata(&self) {
        // The manifest inserter is expected to always report a URI,
        // never inline metadata. If it does, that's an invariant
        // violation.
        self.fail(InsertError::InternalError(
            "manifest inserter reported inline metadata".to_string(),
        ));
    }

    fn on_manifest_block_set_finished(&self) {
        let all_final = {
            let mut state = self.state.lock().unwrap();
            state.metadata_block_set_finalized = true;
            state.waiting_for_block_sets.is_empty() && state.metadata_block_set_finalized
        };
        if all_final {
            self.events().emit(crate::event::SplitfileProgressEvent {
                block_set_finalized: true,
                ..Default::default()
            });
        }
    }
}

const DEFAULT_CANDIDATES: [&str; 4] = ["index.html", "index.htm", "default.html", "default.htm"];

#[derive(serde::Serialize)]
#[serde(untagged)]
enum ManifestEntry {
    Metadata(Vec<u8>),
    Subtree(BTreeMap<String, ManifestEntry>),
}

/// Pure recursive mapping of `HandlerNode` into `name -> ManifestEntry`,
/// reading each handler's metadata bytes. Every handler's metadata must
/// already be assigned by this point; a missing one is an
/// internal-error invariant violation.
fn build_entries(
    node: &HandlerNode,
    handlers: &slab::Slab<Arc<PutHandler>>,
) -> Result<BTreeMap<String, ManifestEntry>, InsertError> {
    match node {
        HandlerNode::Leaf(_) => unreachable!("build_entries is only called at subtree level"),
        HandlerNode::Subtree(children) => {
            let mut out = BTreeMap::new();
            for (name, child) in children {
                let entry = match child {
                    HandlerNode::Leaf(key) => {
                        let handler = handlers
                            .get(key.0)
                            .expect("handler referenced by handler tree must exist");
                        let bytes = handler.metadata_bytes().ok_or_else(|| {
                            InsertError::InternalError(format!(
                                "handler {:?} has no metadata at gotAllMetadata time",
                                handler.name
                            ))
                        })?;
                        ManifestEntry::Metadata(bytes)
                    }
                    HandlerNode::Subtree(_) => ManifestEntry::Subtree(build_entries(child, handlers)?),
                };
                out.insert(name.clone(), entry);
            }
            Ok(out)
        }
    }
}

/// Looks up a single top-level default-document candidate by name.
/// Default documents are only ever looked for at the root.
fn lookup_leaf_metadata(
    node: &HandlerNode,
    name: &str,
    handlers: &slab::Slab<Arc<PutHandler>>,
) -> Option<Vec<u8>> {
    match node {
        HandlerNode::Leaf(_) => None,
        HandlerNode::Subtree(children) => match children.get(name)? {
            HandlerNode::Leaf(key) => handlers.get(key.0).and_then(|h| h.metadata_bytes()),
            HandlerNode::Subtree(_) => None,
        },
    }
}

/// Callback sink for the manifest's own inserter, separate from
/// `PutHandler` since the manifest's own terminal callbacks behave
/// differently (e.g. `on_metadata` is an invariant violation here, not
/// the "inline small data" path).
struct ManifestCallbacks {
    shared: Weak<Shared>,
}

impl ManifestCallbacks {
    fn new(shared: Weak<Shared>) -> Arc<Self> {
        Arc::new(Self { shared })
    }
}

impl InserterCallbacks for ManifestCallbacks {
    fn on_encode(&self, key: Key, state: ChildStateId) {
        if let Some(shared) = self.shared.upgrade() {
            shared.on_manifest_encode(key, state);
        }
    }

    fn on_metadata(&self, _metadata: Vec<u8>, _state: ChildStateId) {
        if let Some(shared) = self.shared.upgrade() {
            shared.on_manifest_metadata();
        }
    }

    fn on_success(&self, _state: ChildStateId) {
        if let Some(shared) = self.shared.upgrade() {
            shared.on_manifest_success();
        }
    }

    fn on_failure(&self, err: InserterError, _state: ChildStateId) {
        if let Some(shared) = self.shared.upgrade() {
            shared.on_manifest_failure(err);
        }
    }

    fn on_transition(&self, old: ChildStateId, new: ChildStateId) {
        if let Some(shared) = self.shared.upgrade() {
            shared.on_manifest_transition(old, new);
        }
    }

    fn on_block_set_finished(&self, _state: ChildStateId) {
        if let Some(shared) = self.shared.upgrade() {
            shared.on_manifest_block_set_finished();
        }
    }

    fn add_block(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.events().add_block();
        }
    }

    fn add_blocks(&self, n: u32) {
        if let Some(shared) = self.shared.upgrade() {
            shared.events().add_blocks(n);
        }
    }

    fn completed_block(&self, from_cache: bool) {
        if let Some(shared) = self.shared.upgrade() {
            shared.events().completed_block(from_cache);
        }
    }

    fn failed_block(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.events().failed_block();
        }
    }

    fn fatally_failed_block(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.events().fatally_failed_block();
        }
    }

    fn add_must_succeed_blocks(&self, n: u32) {
        if let Some(shared) = self.shared.upgrade() {
            shared.events().add_must_succeed_blocks(n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::{MemoryBucket, MemoryBucketFactory};
    use crate::key::NodeKey;
    use std::sync::atomic::AtomicU64;

    /// An inserter that behaves like a real CHK insert: it reports a
    /// freshly minted key via `on_encode`, then succeeds, all
    /// synchronously from `start()`. Every call gets a distinct node
    /// key so leaves and the manifest itself never collide.
    struct ScriptedInserter {
        state: ChildStateId,
        callbacks: Arc<dyn InserterCallbacks>,
        key: Key,
    }

    impl SingleFileInserter for ScriptedInserter {
        fn current_state(&self) -> ChildStateId {
            self.state
        }

        fn start(&self) -> Result<(), InserterError> {
            self.callbacks.on_encode(self.key.clone(), self.state);
            self.callbacks.on_success(self.state);
            Ok(())
        }
    }

    #[derive(Default)]
    struct ScriptedFactory {
        next: AtomicU64,
    }

    impl InserterFactory for ScriptedFactory {
        fn new_inserter(
            &self,
            _data: Arc<dyn Bucket>,
            _mime: Option<String>,
            _target: Option<Uri>,
            callbacks: Arc<dyn InserterCallbacks>,
        ) -> Result<Arc<dyn SingleFileInserter>, InserterError> {
            let id = self.next.fetch_add(1, Ordering::SeqCst);
            let mut bytes = [0u8; 32];
            bytes[..8].copy_from_slice(&id.to_be_bytes());
            let key = Key::Chk {
                node_key: NodeKey::new(bytes),
            };
            Ok(Arc::new(ScriptedInserter {
                state: ChildStateId(id),
                callbacks,
                key,
            }))
        }
    }

    #[derive(Default)]
    struct FakeClient {
        succeeded: AtomicBool,
        failed: Mutex<Option<InsertError>>,
        generated_uri: Mutex<Option<Uri>>,
    }

    impl ClientCallback for FakeClient {
        fn on_success(&self) {
            self.succeeded.store(true, Ordering::SeqCst);
        }

        fn on_failure(&self, err: InsertError) {
            *self.failed.lock().unwrap() = Some(err);
        }

        fn on_generated_uri(&self, uri: Uri) {
            *self.generated_uri.lock().unwrap() = Some(uri);
        }
    }

    #[derive(Default)]
    struct NoopEvents;

    impl EventProducer for NoopEvents {
        fn add_block(&self) {}
        fn add_blocks(&self, _n: u32) {}
        fn completed_block(&self, _from_cache: bool) {}
        fn failed_block(&self) {}
        fn fatally_failed_block(&self) {}
        fn add_must_succeed_blocks(&self, _n: u32) {}
        fn emit(&self, _event: crate::event::SplitfileProgressEvent) {}
    }

    /// A bucket factory that remembers the bytes of the last bucket it
    /// made, so a test can inspect the serialized manifest the putter
    /// handed to its final inserter.
    #[derive(Default)]
    struct CapturingBucketFactory {
        last: Mutex<Option<Vec<u8>>>,
    }

    impl BucketFactory for CapturingBucketFactory {
        fn make_immutable_bucket(&self, bytes: Vec<u8>) -> std::io::Result<Arc<dyn Bucket>> {
            *self.last.lock().unwrap() = Some(bytes.clone());
            Ok(Arc::new(MemoryBucket::new(bytes)))
        }
    }

    fn leaf(name: &str, contents: &[u8]) -> (String, ManifestNode) {
        (
            name.to_string(),
            ManifestNode::Leaf(ManifestElement::data(name, Arc::new(MemoryBucket::new(contents.to_vec())), None)),
        )
    }

    fn two_file_tree() -> ManifestNode {
        let mut root = BTreeMap::new();
        let (name, node) = leaf("a.html", b"x");
        root.insert(name, node);
        let (name, node) = leaf("index.html", b"root");
        root.insert(name, node);
        ManifestNode::Subtree(root)
    }

    #[test]
    fn empty_default_fallback_maps_index_html_to_default_key() {
        let client = Arc::new(FakeClient::default());
        let buckets = Arc::new(CapturingBucketFactory::default());
        let putter = ManifestPutter::new(
            two_file_tree(),
            None,
            None,
            client.clone(),
            buckets.clone(),
            Arc::new(ScriptedFactory::default()),
            Arc::new(NoopEvents),
        )
        .unwrap();

        assert_eq!(putter.number_of_files(), 2);
        putter.start().unwrap();

        assert!(client.succeeded.load(Ordering::SeqCst));
        assert!(client.failed.lock().unwrap().is_none());
        assert!(client.generated_uri.lock().unwrap().is_some());
        assert!(putter.final_uri().is_some());

        let manifest_bytes = buckets.last.lock().unwrap().clone().unwrap();
        let manifest: serde_json::Value = serde_json::from_slice(&manifest_bytes).unwrap();
        assert_eq!(manifest[""], manifest["index.html"]);
        assert_ne!(manifest[""], manifest["a.html"]);
    }

    #[test]
    fn missing_explicit_default_fails_without_inserting_manifest() {
        let client = Arc::new(FakeClient::default());
        let factory = Arc::new(ScriptedFactory::default());
        let putter = ManifestPutter::new(
            two_file_tree(),
            Some("missing.html".to_string()),
            None,
            client.clone(),
            Arc::new(MemoryBucketFactory),
            factory.clone(),
            Arc::new(NoopEvents),
        )
        .unwrap();

        putter.start().unwrap();

        assert!(!client.succeeded.load(Ordering::SeqCst));
        assert!(matches!(
            client.failed.lock().unwrap().as_ref(),
            Some(InsertError::InvalidUri { name }) if name == "missing.html"
        ));
        assert!(putter.final_uri().is_none());
        // Only the two leaves ever got an inserter; the manifest's own
        // insert never started.
        assert_eq!(factory.next.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn static_redirect_passthrough_has_no_running_handlers() {
        let client = Arc::new(FakeClient::default());
        let buckets = Arc::new(CapturingBucketFactory::default());
        let factory = Arc::new(ScriptedFactory::default());

        let mut root = BTreeMap::new();
        root.insert(
            "link".to_string(),
            ManifestNode::Leaf(ManifestElement::redirect("link", Uri::new("FOO://bar"), None)),
        );
        let tree = ManifestNode::Subtree(root);

        let putter = ManifestPutter::new(
            tree,
            None,
            None,
            client.clone(),
            buckets.clone(),
            factory.clone(),
            Arc::new(NoopEvents),
        )
        .unwrap();

        assert_eq!(putter.number_of_files(), 0);
        assert!(putter.shared.state.lock().unwrap().running_put_handlers.is_empty());

        putter.start().unwrap();

        assert!(client.succeeded.load(Ordering::SeqCst));
        assert!(putter.final_uri().is_some());
        // Only the manifest's own insert ever ran an inserter.
        assert_eq!(factory.next.load(Ordering::SeqCst), 1);

        let manifest_bytes = buckets.last.lock().unwrap().clone().unwrap();
        let manifest: serde_json::Value = serde_json::from_slice(&manifest_bytes).unwrap();
        // Metadata entries are carried as opaque byte blobs (themselves
        // serialized JSON) inside the outer manifest, so the "link"
        // entry round-trips as an array of byte values first.
        let link_bytes: Vec<u8> = manifest["link"]
            .as_array()
            .unwrap()
            .iter()
            .map(|b| b.as_u64().unwrap() as u8)
            .collect();
        let redirect: serde_json::Value = serde_json::from_slice(&link_bytes).unwrap();
        assert_eq!(redirect["kind"], "SIMPLE_REDIRECT");
        assert_eq!(redirect["target"], "FOO://bar");
    }
}

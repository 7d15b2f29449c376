//! Event producer collaborator. The bus implementation itself is out of
//! scope; this crate only defines the event payload it emits progress
//! updates through.

/// Progress snapshot for a splitfile-style insert, consumed by the
/// environment's event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SplitfileProgressEvent {
    pub total: u32,
    pub successful: u32,
    pub failed: u32,
    pub fatally_failed: u32,
    pub min_success: u32,
    pub block_set_finalized: bool,
}

/// Sink the manifest putter and its put handlers forward block-count
/// hooks into, so progress accounting stays centralized.
pub trait EventProducer: Send + Sync {
    fn add_block(&self);
    fn add_blocks(&self, n: u32);
    fn completed_block(&self, from_cache: bool);
    fn failed_block(&self);
    fn fatally_failed_block(&self);
    fn add_must_succeed_blocks(&self, n: u32);
    fn emit(&self, event: SplitfileProgressEvent);
}

//! Bucket storage collaborator. On-disk bucket implementation is
//! explicitly out of scope; only the factory interface the manifest
//! putter drives is defined here.

use std::io;
use std::sync::Arc;

/// An immutable, already-filled data bucket. Owned by the caller that
/// created it until an inserter takes a reference; the inserter releases
/// it on completion.
pub trait Bucket: Send + Sync {
    fn size(&self) -> u64;
    fn as_bytes(&self) -> &[u8];
}

/// Produces immutable buckets from raw bytes, e.g. for serializing the
/// redirection manifest before it's handed to the final inserter.
pub trait BucketFactory: Send + Sync {
    fn make_immutable_bucket(&self, bytes: Vec<u8>) -> io::Result<Arc<dyn Bucket>>;
}

/// A simple in-memory bucket, useful for tests and as a minimal real
/// implementation when no on-disk store is wired in.
#[derive(Debug, Clone)]
pub struct MemoryBucket(Vec<u8>);

impl MemoryBucket {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Bucket for MemoryBucket {
    fn size(&self) -> u64 {
        self.0.len() as u64
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Factory pairing with [`MemoryBucket`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryBucketFactory;

impl BucketFactory for MemoryBucketFactory {
    fn make_immutable_bucket(&self, bytes: Vec<u8>) -> io::Result<Arc<dyn Bucket>> {
        Ok(Arc::new(MemoryBucket::new(bytes)))
    }
}

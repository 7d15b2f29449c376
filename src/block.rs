use crate::key::{Key, PublicKey};

/// `{ key, raw-header bytes, raw-payload bytes }`. Constructed either
/// from the local store or reassembled from partial-receive state; this
/// crate only deals with the already-assembled form.
#[derive(Debug, Clone)]
pub struct Block {
    pub key: Key,
    pub header: Vec<u8>,
    pub payload: Vec<u8>,
    /// Only present for SSK blocks.
    pub pub_key: Option<PublicKey>,
}

impl Block {
    pub fn chk(key: Key, header: Vec<u8>, payload: Vec<u8>) -> Self {
        debug_assert!(!key.is_ssk());
        Self {
            key,
            header,
            payload,
            pub_key: None,
        }
    }

    pub fn ssk(key: Key, header: Vec<u8>, payload: Vec<u8>, pub_key: PublicKey) -> Self {
        debug_assert!(key.is_ssk());
        Self {
            key,
            header,
            payload,
            pub_key: Some(pub_key),
        }
    }

    pub fn len(&self) -> usize {
        self.header.len() + self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.header.is_empty() && self.payload.is_empty()
    }
}

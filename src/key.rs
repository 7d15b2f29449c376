use std::fmt;

/// Opaque routing-visible hash carried by every [`Key`].
///
/// This is the value the scheduler and cooldown tracker index on; it is
/// deliberately smaller than a full [`Key`] so that lookups don't need to
/// carry an SSK's public key around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey([u8; 32]);

impl NodeKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..")
    }
}

/// A public key associated with a signed-subspace key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Identifier for a content-addressed block. Immutable once constructed.
///
/// Either a content-hash key (`Chk`) or a signed-subspace key (`Ssk`). Both
/// carry a [`NodeKey`]; the `Ssk` variant additionally carries the public
/// key of the subspace it lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Chk { node_key: NodeKey },
    Ssk { node_key: NodeKey, pub_key: PublicKey },
}

impl Key {
    pub fn node_key(&self) -> NodeKey {
        match self {
            Key::Chk { node_key } | Key::Ssk { node_key, .. } => *node_key,
        }
    }

    pub fn is_ssk(&self) -> bool {
        matches!(self, Key::Ssk { .. })
    }

    pub fn pub_key(&self) -> Option<&PublicKey> {
        match self {
            Key::Chk { .. } => None,
            Key::Ssk { pub_key, .. } => Some(pub_key),
        }
    }
}

/// Printable content-address string produced by inserting a block.
///
/// Constant once emitted: a `Uri` is never mutated after an insert reports
/// it back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Uri(String);

impl Uri {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn from_key(key: &Key) -> Self {
        // Real URIs are derived by the environment's URI module (out of
        // scope here); format a stable placeholder from the node key so
        // the rest of the subsystem has something to thread.
        Self(format!("CHK@{}", key.node_key()))
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_key_shared_between_chk_and_ssk() {
        let nk = NodeKey::new([7; 32]);
        let chk = Key::Chk { node_key: nk };
        let ssk = Key::Ssk {
            node_key: nk,
            pub_key: PublicKey::new(vec![1, 2, 3]),
        };
        assert_eq!(chk.node_key(), ssk.node_key());
        assert!(!chk.is_ssk());
        assert!(ssk.is_ssk());
        assert!(chk.pub_key().is_none());
        assert!(ssk.pub_key().is_some());
    }
}

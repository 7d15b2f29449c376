//! Manifest tree and element types, plus the `flatten`/`unflatten`
//! conversions between the tree shape and a flat list of `/`-joined
//! paths.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::bucket::Bucket;
use crate::error::InsertError;
use crate::key::Uri;

/// `{ name, optional target-URI, optional data-bucket, optional
/// explicit-mime, size }`. Exactly one of `target` or `data` is set.
/// `name` never contains `/`.
#[derive(Clone)]
pub struct ManifestElement {
    pub name: String,
    pub target: Option<Uri>,
    pub data: Option<Arc<dyn Bucket>>,
    pub mime: Option<String>,
}

impl ManifestElement {
    pub fn redirect(name: impl Into<String>, target: Uri, mime: Option<String>) -> Self {
        let name = name.into();
        debug_assert!(!name.contains('/'));
        Self {
            name,
            target: Some(target),
            data: None,
            mime,
        }
    }

    pub fn data(name: impl Into<String>, data: Arc<dyn Bucket>, mime: Option<String>) -> Self {
        let name = name.into();
        debug_assert!(!name.contains('/'));
        Self {
            name,
            target: None,
            data: Some(data),
            mime,
        }
    }

    pub fn is_static_redirect(&self) -> bool {
        self.target.is_some()
    }

    pub fn size(&self) -> u64 {
        self.data.as_deref().map(Bucket::size).unwrap_or(0)
    }
}

/// Mapping from path segment to either a nested manifest tree or a leaf
/// element. Nesting is acyclic (it's an owned recursive structure, so it
/// can't contain a cycle). No key here is ever empty — the synthetic
/// default entry inserted once all metadata is gathered only ever
/// applies to the *handler* tree built from this input tree, not this
/// tree itself.
pub enum ManifestNode {
    Leaf(ManifestElement),
    Subtree(BTreeMap<String, ManifestNode>),
}

impl ManifestNode {
    /// Sum of `data.size()` over every leaf.
    pub fn total_size(&self) -> u64 {
        match self {
            ManifestNode::Leaf(e) => e.size(),
            ManifestNode::Subtree(children) => children.values().map(ManifestNode::total_size).sum(),
        }
    }

    pub fn file_count(&self) -> usize {
        match self {
            ManifestNode::Leaf(e) if !e.is_static_redirect() => 1,
            ManifestNode::Leaf(_) => 0,
            ManifestNode::Subtree(children) => children.values().map(ManifestNode::file_count).sum(),
        }
    }
}

/// `flatten(tree)`: recursive shape conversion into a list of elements
/// with `/`-joined paths.
pub fn flatten(tree: &ManifestNode) -> Vec<ManifestElement> {
    let mut out = Vec::new();
    flatten_into("", tree, &mut out);
    out
}

fn flatten_into(prefix: &str, tree: &ManifestNode, out: &mut Vec<ManifestElement>) {
    match tree {
        ManifestNode::Leaf(e) => {
            let mut e = e.clone();
            e.name = prefix.to_string();
            out.push(e);
        }
        ManifestNode::Subtree(children) => {
            for (name, child) in children {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}/{name}")
                };
                flatten_into(&path, child, out);
            }
        }
    }
}

/// `unflatten(list)`: rebuild a tree from `/`-joined element paths. Each
/// element's name is split on `/`; an intermediate path component that
/// collides with an existing leaf (or vice versa) produces
/// [`InsertError::PathCollision`].
pub fn unflatten(elements: Vec<ManifestElement>) -> Result<ManifestNode, InsertError> {
    let mut root: BTreeMap<String, ManifestNode> = BTreeMap::new();

    for mut element in elements {
        let path = std::mem::take(&mut element.name);
        let segments: Vec<&str> = path.split('/').collect();
        insert_at(&mut root, &segments, element)?;
    }

    Ok(ManifestNode::Subtree(root))
}

fn insert_at(
    level: &mut BTreeMap<String, ManifestNode>,
    segments: &[&str],
    mut element: ManifestElement,
) -> Result<(), InsertError> {
    let (head, rest) = segments
        .split_first()
        .expect("path always has at least one segment");

    if rest.is_empty() {
        element.name = (*head).to_string();
        match level.get(*head) {
            Some(ManifestNode::Subtree(_)) => {
                return Err(InsertError::PathCollision((*head).to_string()))
            }
            _ => {
                level.insert((*head).to_string(), ManifestNode::Leaf(element));
            }
        }
        return Ok(());
    }

    match level
        .entry((*head).to_string())
        .or_insert_with(|| ManifestNode::Subtree(BTreeMap::new()))
    {
        ManifestNode::Leaf(_) => Err(InsertError::PathCollision((*head).to_string())),
        ManifestNode::Subtree(children) => insert_at(children, rest, element),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::MemoryBucket;

    fn leaf(name: &str, bytes: &[u8]) -> ManifestElement {
        ManifestElement::data(name, Arc::new(MemoryBucket::new(bytes.to_vec())), None)
    }

    #[test]
    fn flatten_unflatten_round_trip() {
        let mut root = BTreeMap::new();
        root.insert("a.html".to_string(), ManifestNode::Leaf(leaf("a.html", b"x")));
        let mut sub = BTreeMap::new();
        sub.insert("b.html".to_string(), ManifestNode::Leaf(leaf("b.html", b"y")));
        root.insert("dir".to_string(), ManifestNode::Subtree(sub));
        let tree = ManifestNode::Subtree(root);

        let flat = flatten(&tree);
        let mut names: Vec<_> = flat.iter().map(|e| e.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["a.html".to_string(), "dir/b.html".to_string()]);

        let rebuilt = unflatten(flat).unwrap();
        assert_eq!(rebuilt.total_size(), tree.total_size());
        assert_eq!(rebuilt.file_count(), tree.file_count());
    }

    #[test]
    fn unflatten_rejects_path_collision() {
        let elements = vec![leaf("a", b"1"), leaf("a/b", b"2")];
        let err = unflatten(elements).unwrap_err();
        assert!(matches!(err, InsertError::PathCollision(n) if n == "a"));
    }

    #[test]
    fn total_size_sums_data_buckets_only() {
        let mut root = BTreeMap::new();
        root.insert(
            "link".to_string(),
            ManifestNode::Leaf(ManifestElement::redirect("link", Uri::new("FOO://bar"), None)),
        );
        root.insert("f".to_string(), ManifestNode::Leaf(leaf("f", b"12345")));
        let tree = ManifestNode::Subtree(root);
        assert_eq!(tree.total_size(), 5);
        assert_eq!(tree.file_count(), 1);
    }
}

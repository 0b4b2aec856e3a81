use std::collections::HashMap;

use ncsync_core::FileMetadata;

/// One node in a `FileTree`: the metadata plus a link to its parent's path.
/// Parents are represented as a key into the tree's map, not an owning
/// back-pointer, since the tree is read-only after construction (spec.md §9).
#[derive(Debug, Clone)]
pub struct FileNode {
    pub metadata: FileMetadata,
    pub parent: Option<String>,
}

/// A snapshot of one side (local or remote) of a sync run: a map from
/// normalized path to node, built once and never mutated afterward.
///
/// Invariant (spec.md §3): every non-root path has its parent directory also
/// present in the map. Both builders in this crate (`local`, `remote`)
/// uphold it by construction — a directory is always inserted before its
/// children are discovered.
#[derive(Debug, Clone, Default)]
pub struct FileTree {
    nodes: HashMap<String, FileNode>,
}

impl FileTree {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            String::new(),
            FileNode {
                metadata: FileMetadata::root(),
                parent: None,
            },
        );
        FileTree { nodes }
    }

    pub fn insert(&mut self, metadata: FileMetadata, parent: Option<String>) {
        let path = metadata.path.clone();
        self.nodes.insert(path, FileNode { metadata, parent });
    }

    pub fn get(&self, path: &str) -> Option<&FileMetadata> {
        self.nodes.get(path).map(|n| &n.metadata)
    }

    pub fn parent_of(&self, path: &str) -> Option<&str> {
        self.nodes.get(path).and_then(|n| n.parent.as_deref())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    /// Non-root entries only; the root ("") is always implicitly present and
    /// never itself a change candidate.
    pub fn entries(&self) -> impl Iterator<Item = &FileMetadata> {
        self.nodes.values().map(|n| &n.metadata).filter(|m| !m.path.is_empty())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Verifies the "parent directory also present" invariant; used by
    /// tests and as a cheap sanity check after construction.
    pub fn check_invariant(&self) -> Result<(), String> {
        for (path, node) in &self.nodes {
            if path.is_empty() {
                continue;
            }
            match &node.parent {
                Some(parent) if self.nodes.contains_key(parent) => {}
                Some(parent) => return Err(format!("{path}: parent {parent} missing from tree")),
                None => return Err(format!("{path}: missing parent link")),
            }
        }
        Ok(())
    }
}

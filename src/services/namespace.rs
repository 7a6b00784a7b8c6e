//! Projection of delimited object keys into a navigable tree.
//!
//! The store has no directories; `a/b/c` merely implies that `a` and `a/b`
//! exist. `NamespaceTree` materializes those implied nodes as virtual nodes
//! and attaches real objects where a key matches exactly. Updates are
//! additive: removing objects requires a rebuild.

use crate::models::{DELIMITER, entry::RemoteEntry, tree::TreeNode};
use std::collections::btree_map::Entry;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamespaceTree {
    root: TreeNode,
}

impl NamespaceTree {
    /// Build a tree labelled `root_label` from a flat listing.
    pub fn build<I>(root_label: &str, entries: I) -> Self
    where
        I: IntoIterator<Item = RemoteEntry>,
    {
        let mut tree = Self {
            root: TreeNode::root(root_label),
        };
        tree.merge(entries);
        tree
    }

    /// Add `entries` to the tree. Merging entries that are already present
    /// changes nothing; a virtual node gains a backing entry once one shows up.
    pub fn merge<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = RemoteEntry>,
    {
        let mut merged = 0usize;
        for entry in entries.into_iter().filter(|e| e.exists) {
            self.insert(entry);
            merged += 1;
        }
        debug!(
            "merged {} entries, tree now has {} nodes",
            merged,
            self.root.descendant_count()
        );
    }

    fn insert(&mut self, entry: RemoteEntry) {
        let segments: Vec<&str> = entry
            .key
            .split(DELIMITER)
            .filter(|s| !s.is_empty())
            .collect();
        if segments.is_empty() {
            return;
        }
        let full_key = segments.join(&DELIMITER.to_string());

        let mut node = &mut self.root;
        let mut prefix = String::new();
        for (depth, segment) in segments.iter().enumerate() {
            if depth > 0 {
                prefix.push(DELIMITER);
            }
            prefix.push_str(segment);
            node = match node.children.entry(prefix.clone()) {
                Entry::Occupied(slot) => slot.into_mut(),
                Entry::Vacant(slot) => {
                    slot.insert(TreeNode::virtual_node(prefix.clone(), segment.to_string()))
                }
            };
        }
        debug_assert_eq!(node.key, full_key);
        node.backing_entry = Some(entry);
    }

    pub fn root(&self) -> &TreeNode {
        &self.root
    }

    /// Children of `node`, ordered by full key.
    pub fn children<'n>(&self, node: &'n TreeNode) -> impl Iterator<Item = &'n TreeNode> {
        node.children.values()
    }

    pub fn is_leaf(&self, node: &TreeNode) -> bool {
        node.is_leaf()
    }

    /// Node for a full key; trailing delimiters are ignored.
    pub fn find(&self, key: &str) -> Option<&TreeNode> {
        let mut node = &self.root;
        let mut prefix = String::new();
        for segment in key.split(DELIMITER).filter(|s| !s.is_empty()) {
            if !prefix.is_empty() {
                prefix.push(DELIMITER);
            }
            prefix.push_str(segment);
            node = node.children.get(&prefix)?;
        }
        Some(node)
    }

    /// Total number of nodes, root excluded.
    pub fn len(&self) -> usize {
        self.root.descendant_count()
    }

    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }

    /// Depth-first walk yielding `(depth, node)`, root first at depth 0.
    pub fn walk(&self) -> Vec<(usize, &TreeNode)> {
        fn visit<'n>(node: &'n TreeNode, depth: usize, out: &mut Vec<(usize, &'n TreeNode)>) {
            out.push((depth, node));
            for child in node.children.values() {
                visit(child, depth + 1, out);
            }
        }
        let mut out = Vec::new();
        visit(&self.root, 0, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DIRECTORY_CONTENT_TYPE;

    fn object(key: &str) -> RemoteEntry {
        RemoteEntry::new(key, 1, "text/plain", "etag")
    }

    fn marker(key: &str) -> RemoteEntry {
        RemoteEntry::new(key, 0, DIRECTORY_CONTENT_TYPE, "d41d8cd98f00b204e9800998ecf8427e")
    }

    fn child_keys<'t>(tree: &'t NamespaceTree, node: &'t TreeNode) -> Vec<&'t str> {
        tree.children(node).map(|c| c.key.as_str()).collect()
    }

    #[test]
    fn virtual_directories_are_implied_by_keys() {
        let tree = NamespaceTree::build(
            "box",
            [object("a/b/d"), object("a/e"), object("a/b/c")],
        );
        let root = tree.root();
        assert!(root.is_root);
        assert_eq!(root.display_name, "box");
        assert_eq!(child_keys(&tree, root), ["a"]);

        let a = tree.find("a").unwrap();
        assert!(a.is_virtual());
        assert_eq!(child_keys(&tree, a), ["a/b", "a/e"]);

        let b = tree.find("a/b").unwrap();
        assert!(b.is_virtual());
        assert_eq!(b.display_name, "b");
        assert_eq!(child_keys(&tree, b), ["a/b/c", "a/b/d"]);

        let c = tree.find("a/b/c").unwrap();
        assert!(!c.is_virtual());
        assert!(tree.is_leaf(c));
        assert!(!tree.is_leaf(b));
        assert_eq!(tree.len(), 5);
    }

    #[test]
    fn markers_back_directories_and_are_not_leaves() {
        let tree = NamespaceTree::build("box", [marker("a/"), object("a/x"), marker("empty")]);
        let a = tree.find("a").unwrap();
        assert!(!a.is_virtual());
        assert!(a.is_directory_marker());

        let empty = tree.find("empty").unwrap();
        assert!(empty.children.is_empty());
        assert!(!tree.is_leaf(empty));
    }

    #[test]
    fn merge_is_idempotent_and_additive() {
        let entries = vec![object("a/b/c"), object("a/b/d"), object("a/e")];
        let once = NamespaceTree::build("box", entries.clone());
        let mut twice = once.clone();
        twice.merge(entries.clone());
        twice.merge(entries);
        assert_eq!(once, twice);

        twice.merge([marker("a"), object("z")]);
        assert!(!twice.find("a").unwrap().is_virtual());
        assert_eq!(twice.find("a").unwrap().children.len(), 2);
        assert_eq!(child_keys(&twice, twice.root()), ["a", "z"]);
        assert!(twice.root().is_root);
    }

    #[test]
    fn missing_entries_and_empty_keys_are_ignored() {
        let tree = NamespaceTree::build("box", [RemoteEntry::missing("gone/x"), object("///")]);
        assert!(tree.is_empty());
        assert!(tree.find("gone").is_none());
        assert!(tree.find("").unwrap().is_root);
    }

    #[test]
    fn walk_is_depth_first_in_key_order() {
        let tree = NamespaceTree::build("box", [object("b"), object("a/c")]);
        let order: Vec<(usize, &str)> = tree
            .walk()
            .into_iter()
            .map(|(depth, node)| (depth, node.display_name.as_str()))
            .collect();
        assert_eq!(order, [(0, "box"), (1, "a"), (2, "c"), (1, "b")]);
    }
}

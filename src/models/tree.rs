//! Nodes of the hierarchical view over a flat key namespace.

use super::entry::RemoteEntry;
use serde::Serialize;
use std::collections::BTreeMap;

/// One node of a projected tree.
///
/// Children are keyed, and therefore ordered, by their full key. A node with
/// no backing entry is virtual: it exists only because a real key passes
/// through its path.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct TreeNode {
    /// Full key; empty for the root.
    pub key: String,

    /// Last key segment, or the root label.
    pub display_name: String,

    pub is_root: bool,

    /// Object stored at exactly this key, if any.
    pub backing_entry: Option<RemoteEntry>,

    pub children: BTreeMap<String, TreeNode>,
}

impl TreeNode {
    pub(crate) fn root(label: impl Into<String>) -> Self {
        Self {
            key: String::new(),
            display_name: label.into(),
            is_root: true,
            backing_entry: None,
            children: BTreeMap::new(),
        }
    }

    pub(crate) fn virtual_node(key: String, display_name: String) -> Self {
        Self {
            key,
            display_name,
            is_root: false,
            backing_entry: None,
            children: BTreeMap::new(),
        }
    }

    pub fn is_virtual(&self) -> bool {
        self.backing_entry.is_none()
    }

    pub fn is_directory_marker(&self) -> bool {
        self.backing_entry
            .as_ref()
            .is_some_and(|entry| entry.is_directory_marker)
    }

    /// A childless node is a leaf unless it is backed by a directory marker
    /// (an empty directory can still be expanded).
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
            && self
                .backing_entry
                .as_ref()
                .is_none_or(|entry| !entry.is_directory_marker)
    }

    /// Number of nodes below this one.
    pub fn descendant_count(&self) -> usize {
        self.children
            .values()
            .map(|child| 1 + child.descendant_count())
            .sum()
    }
}

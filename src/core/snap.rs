//! Snap bookkeeping: remembers where auto-detached children used to live so
//! a later restore can reattach them at the exact child slot they came from.

use std::collections::HashMap;

use crate::core::forest::NodeId;

/// Original parent and child-slot of a detached node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapInfo {
    pub parent: NodeId,
    pub index: usize,
}

/// Records detach events (child → original parent + original child index).
/// Entries persist until the child is reattached (restore) or the user
/// manually re-links it (clear).
#[derive(Debug, Default)]
pub struct SnapRegistry {
    by_child: HashMap<NodeId, SnapInfo>,
    per_tree: HashMap<String, Vec<NodeId>>,
}

impl SnapRegistry {
    pub fn record(&mut self, tree_key: &str, child: NodeId, parent: NodeId, index: usize) {
        self.by_child.insert(child, SnapInfo { parent, index });
        let list = self.per_tree.entry(tree_key.to_string()).or_default();
        if !list.contains(&child) {
            list.push(child);
        }
    }

    pub fn get(&self, child: NodeId) -> Option<SnapInfo> {
        self.by_child.get(&child).copied()
    }

    /// Remove the record for a single child (used when the user manually
    /// re-links the node, making the old slot irrelevant).
    pub fn clear(&mut self, tree_key: &str, child: NodeId) {
        self.by_child.remove(&child);
        if let Some(list) = self.per_tree.get_mut(tree_key) {
            list.retain(|c| *c != child);
            if list.is_empty() {
                self.per_tree.remove(tree_key);
            }
        }
    }

    /// Drop every record for a tree (restore-from-source path).
    pub fn clear_tree(&mut self, tree_key: &str) {
        if let Some(list) = self.per_tree.remove(tree_key) {
            for child in list {
                self.by_child.remove(&child);
            }
        }
    }

    pub fn has_snaps(&self, tree_key: &str) -> bool {
        self.per_tree
            .get(tree_key)
            .map(|l| !l.is_empty())
            .unwrap_or(false)
    }

    /// Snapshot of the recorded children for a tree, oldest first.
    pub fn children_for(&self, tree_key: &str) -> Vec<NodeId> {
        self.per_tree.get(tree_key).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_get() {
        let mut reg = SnapRegistry::default();
        reg.record("foo", 7, 3, 1);
        assert_eq!(reg.get(7), Some(SnapInfo { parent: 3, index: 1 }));
        assert!(reg.has_snaps("foo"));
        assert!(!reg.has_snaps("bar"));
    }

    #[test]
    fn record_twice_keeps_single_entry() {
        let mut reg = SnapRegistry::default();
        reg.record("foo", 7, 3, 1);
        reg.record("foo", 7, 4, 0);
        assert_eq!(reg.children_for("foo"), vec![7]);
        // Latest record wins.
        assert_eq!(reg.get(7), Some(SnapInfo { parent: 4, index: 0 }));
    }

    #[test]
    fn clear_removes_child_and_empty_tree_list() {
        let mut reg = SnapRegistry::default();
        reg.record("foo", 7, 3, 1);
        reg.clear("foo", 7);
        assert!(reg.get(7).is_none());
        assert!(!reg.has_snaps("foo"));
    }

    #[test]
    fn clear_tree_drops_all_entries() {
        let mut reg = SnapRegistry::default();
        reg.record("foo", 7, 3, 0);
        reg.record("foo", 8, 3, 1);
        reg.record("bar", 9, 2, 0);
        reg.clear_tree("foo");
        assert!(reg.get(7).is_none());
        assert!(reg.get(8).is_none());
        assert_eq!(reg.get(9), Some(SnapInfo { parent: 2, index: 0 }));
        assert!(reg.has_snaps("bar"));
    }
}

//! Unlock-tree data model: flat records in, per-tree node graphs out.
//!
//! The forest owns every tree parsed from a file, remembers the records it
//! was loaded from (for per-tree restore), and tracks which node ids existed
//! at load time so runtime edits can be detected.

use std::collections::{HashMap, HashSet};

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::layout;
use crate::core::snap::{SnapInfo, SnapRegistry};

pub type NodeId = u64;

/// Sentinel parent id meaning "root / no parent".
pub const NO_NODE: NodeId = 0;

/// 32-bit FNV-1a, the id scheme used by the catalog files.
pub fn fnv1a32(data: &str) -> u32 {
    const OFFSET_BASIS: u32 = 0x811C_9DC5;
    const PRIME: u32 = 0x0100_0193;
    data.bytes()
        .fold(OFFSET_BASIS, |h, b| (h ^ u32::from(b)).wrapping_mul(PRIME))
}

/// One flat entry in the catalog file. Every field is optional on disk;
/// missing fields fall back to the type default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    #[serde(default)]
    pub ap: bool,
    #[serde(default)]
    pub cst: i32,
    #[serde(default)]
    pub ctyp: String,
    #[serde(default)]
    pub dep: NodeId,
    #[serde(default)]
    pub id: NodeId,
    #[serde(default)]
    pub nm: String,
    #[serde(default)]
    pub spirit: String,
    #[serde(default)]
    pub typ: String,
}

#[derive(Debug, Clone)]
pub struct TreeNode {
    pub id: NodeId,
    pub parent: NodeId,
    pub name: String,
    /// Name as loaded (or first given); rejected renames fall back to it.
    pub original_name: String,
    pub tree_key: String,
    pub kind: String,
    pub cost_kind: String,
    pub cost: i32,
    pub premium: bool,
    pub runtime_created: bool,
    pub x: f32,
    pub y: f32,
    pub children: Vec<NodeId>,
}

impl TreeNode {
    pub fn from_record(rec: &NodeRecord) -> Self {
        Self {
            id: rec.id,
            parent: rec.dep,
            name: rec.nm.clone(),
            original_name: rec.nm.clone(),
            tree_key: rec.spirit.clone(),
            kind: rec.typ.clone(),
            cost_kind: rec.ctyp.clone(),
            cost: rec.cst,
            premium: rec.ap,
            runtime_created: false,
            x: 0.0,
            y: 0.0,
            children: Vec::new(),
        }
    }

    pub fn to_record(&self) -> NodeRecord {
        NodeRecord {
            ap: self.premium,
            cst: self.cost,
            ctyp: self.cost_kind.clone(),
            dep: self.parent,
            id: self.id,
            nm: self.name.clone(),
            spirit: self.tree_key.clone(),
            typ: self.kind.clone(),
        }
    }

    pub fn pos(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }

    pub fn set_pos(&mut self, pos: Vec2) {
        self.x = pos.x;
        self.y = pos.y;
    }
}

#[derive(Debug, Clone, Default)]
pub struct UnlockTree {
    pub key: String,
    pub nodes: Vec<TreeNode>,
    pub root_id: NodeId,
    pub min_x: f32,
    pub max_x: f32,
    pub min_y: f32,
    pub max_y: f32,
}

impl UnlockTree {
    pub fn node(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut TreeNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }

    /// Rebuild children lists and the root id from parent pointers.
    /// The first node with no parent (or whose parent is missing) wins root.
    pub fn rebuild(&mut self) {
        let ids: HashSet<NodeId> = self.nodes.iter().map(|n| n.id).collect();
        for node in &mut self.nodes {
            node.children.clear();
        }
        self.root_id = NO_NODE;
        let links: Vec<(NodeId, NodeId)> = self
            .nodes
            .iter()
            .map(|n| (n.id, n.parent))
            .collect();
        for (id, parent) in links {
            if parent == NO_NODE || !ids.contains(&parent) {
                if self.root_id == NO_NODE {
                    self.root_id = id;
                }
            } else if let Some(p) = self.node_mut(parent) {
                p.children.push(id);
            }
        }
    }

    /// Ids of `root` and everything reachable below it. Safe against
    /// malformed child cycles via the visited set.
    pub fn subtree_ids(&self, root: NodeId) -> HashSet<NodeId> {
        let mut out = HashSet::new();
        let mut stack = vec![root];
        while let Some(cur) = stack.pop() {
            if !out.insert(cur) {
                continue;
            }
            if let Some(node) = self.node(cur) {
                stack.extend(node.children.iter().copied());
            }
        }
        out
    }

    /// Depth of every node under `root`, breadth-first. Root is depth 0.
    pub fn subtree_depths(&self, root: NodeId) -> HashMap<NodeId, usize> {
        let mut depths = HashMap::new();
        let mut queue = std::collections::VecDeque::new();
        depths.insert(root, 0usize);
        queue.push_back(root);
        while let Some(cur) = queue.pop_front() {
            let d = depths[&cur];
            if let Some(node) = self.node(cur) {
                for &c in &node.children {
                    if !depths.contains_key(&c) {
                        depths.insert(c, d + 1);
                        queue.push_back(c);
                    }
                }
            }
        }
        depths
    }

    /// Ids whose parent pointer is missing or self-referential (roots and
    /// detached floaters), in node order.
    pub fn root_ids(&self) -> Vec<NodeId> {
        let ids: HashSet<NodeId> = self.nodes.iter().map(|n| n.id).collect();
        self.nodes
            .iter()
            .filter(|n| n.parent == NO_NODE || !ids.contains(&n.parent))
            .map(|n| n.id)
            .collect()
    }

    pub fn recompute_bounds(&mut self) {
        if self.nodes.is_empty() {
            self.min_x = 0.0;
            self.max_x = 0.0;
            self.min_y = 0.0;
            self.max_y = 0.0;
            return;
        }
        self.min_x = f32::MAX;
        self.max_x = f32::MIN;
        self.min_y = f32::MAX;
        self.max_y = f32::MIN;
        let coords: Vec<(f32, f32)> = self.nodes.iter().map(|n| (n.x, n.y)).collect();
        for (x, y) in coords {
            self.min_x = self.min_x.min(x);
            self.max_x = self.max_x.max(x);
            self.min_y = self.min_y.min(y);
            self.max_y = self.max_y.max(y);
        }
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(
            (self.min_x + self.max_x) * 0.5,
            (self.min_y + self.max_y) * 0.5,
        )
    }
}

/// Outcome of applying an attribute patch to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Patch applied; `id` is the node's id afterwards (renames and explicit
    /// id edits can change it).
    Applied { id: NodeId },
    /// The new name collides with another node in the tree; the patch is
    /// dropped and the node's name falls back to its load-time name.
    DuplicateName,
    NodeNotFound,
}

/// Partial attribute update for a node. `None` fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct NodePatch {
    pub name: Option<String>,
    pub kind: Option<String>,
    pub cost_kind: Option<String>,
    pub cost: Option<i32>,
    pub premium: Option<bool>,
    pub parent: Option<NodeId>,
    pub id: Option<NodeId>,
}

#[derive(Debug, Clone, Copy, Default)]
struct CachedChecks {
    reshape_dirty: bool,
    reshape: bool,
    restore_dirty: bool,
    restore: bool,
}

impl CachedChecks {
    fn dirty() -> Self {
        Self {
            reshape_dirty: true,
            restore_dirty: true,
            ..Default::default()
        }
    }
}

/// All trees loaded from the current file, plus restore bookkeeping.
#[derive(Resource, Default)]
pub struct TreeForest {
    trees: HashMap<String, UnlockTree>,
    primary: Vec<String>,
    guides: Vec<String>,
    /// Node ids present at load time, per tree. Extra or missing ids mean a
    /// tree has drifted from its source and can be restored.
    original_ids: HashMap<String, HashSet<NodeId>>,
    /// Records exactly as loaded, in file order. Restore rebuilds from these.
    source: Vec<NodeRecord>,
    checks: HashMap<String, CachedChecks>,
    pub snaps: SnapRegistry,
    loaded: bool,
}

impl TreeForest {
    /// Replace all trees with the given records. Records with an empty
    /// `spirit` are skipped. Tree order follows first appearance in the file.
    pub fn load(&mut self, records: Vec<NodeRecord>, guide_prefixes: &[String]) {
        self.trees.clear();
        self.primary.clear();
        self.guides.clear();
        self.original_ids.clear();
        self.checks.clear();
        self.snaps = SnapRegistry::default();

        let mut order: Vec<String> = Vec::new();
        for rec in &records {
            if rec.spirit.is_empty() {
                continue;
            }
            if !self.trees.contains_key(&rec.spirit) {
                order.push(rec.spirit.clone());
                self.trees.insert(
                    rec.spirit.clone(),
                    UnlockTree {
                        key: rec.spirit.clone(),
                        ..Default::default()
                    },
                );
            }
            if let Some(tree) = self.trees.get_mut(&rec.spirit) {
                if tree.contains(rec.id) {
                    warn!("[LOAD] duplicate node id {} in tree '{}'", rec.id, rec.spirit);
                }
                tree.nodes.push(TreeNode::from_record(rec));
            }
        }

        for key in &order {
            if let Some(tree) = self.trees.get_mut(key) {
                tree.rebuild();
                layout::layout_tree(tree);
                self.original_ids
                    .insert(key.clone(), tree.nodes.iter().map(|n| n.id).collect());
            }
            self.checks.insert(key.clone(), CachedChecks::dirty());
            let is_guide = guide_prefixes.iter().any(|p| key.starts_with(p.as_str()));
            if is_guide {
                self.guides.push(key.clone());
            } else {
                self.primary.push(key.clone());
            }
        }

        self.source = records;
        self.loaded = true;
        info!(
            "[LOAD] {} trees ({} primary, {} guides)",
            self.trees.len(),
            self.primary.len(),
            self.guides.len()
        );
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn primary_keys(&self) -> &[String] {
        &self.primary
    }

    pub fn guide_keys(&self) -> &[String] {
        &self.guides
    }

    pub fn is_guide(&self, key: &str) -> bool {
        self.guides.iter().any(|k| k == key)
    }

    pub fn tree(&self, key: &str) -> Option<&UnlockTree> {
        self.trees.get(key)
    }

    pub fn tree_mut(&mut self, key: &str) -> Option<&mut UnlockTree> {
        self.trees.get_mut(key)
    }

    pub fn node(&self, key: &str, id: NodeId) -> Option<&TreeNode> {
        self.trees.get(key).and_then(|t| t.node(id))
    }

    /// Flatten every tree back to records, preserving tree order and node
    /// order within each tree.
    pub fn to_records(&self) -> Vec<NodeRecord> {
        let mut out = Vec::new();
        for key in self.primary.iter().chain(self.guides.iter()) {
            if let Some(tree) = self.trees.get(key) {
                out.extend(tree.nodes.iter().map(TreeNode::to_record));
            }
        }
        out
    }

    pub fn tree_records(&self, key: &str) -> Vec<NodeRecord> {
        self.trees
            .get(key)
            .map(|t| t.nodes.iter().map(TreeNode::to_record).collect())
            .unwrap_or_default()
    }

    /// A tree is "travelling" when it has no premium nodes, carries an
    /// emote-upgrade entry, and has at least one non-root node whose kind is
    /// not a seasonal heart. Guides are never classified.
    pub fn is_travelling(&self, key: &str) -> bool {
        if self.is_guide(key) {
            return false;
        }
        let Some(tree) = self.trees.get(key) else {
            return false;
        };
        let any_premium = tree.nodes.iter().any(|n| n.premium);
        if any_premium {
            return false;
        }
        let has_emote_upgrade = tree
            .nodes
            .iter()
            .any(|n| n.name.to_lowercase().contains("emote_upgrade"));
        if !has_emote_upgrade {
            return false;
        }
        tree.nodes
            .iter()
            .any(|n| n.parent != NO_NODE && n.kind.to_lowercase() != "seasonal heart")
    }

    pub fn mark_dirty(&mut self, key: &str) {
        self.checks.insert(key.to_string(), CachedChecks::dirty());
    }

    fn mark_all_dirty(&mut self) {
        for checks in self.checks.values_mut() {
            *checks = CachedChecks::dirty();
        }
    }

    /// Create a node at the given base position, detached and runtime-made.
    /// The name is uniquified with a numeric suffix and the id derived from
    /// the name; returns `None` when the tree does not exist.
    pub fn create_node(&mut self, key: &str, pos: Vec2) -> Option<NodeId> {
        let tree = self.trees.get_mut(key)?;
        let mut name = String::from("new_node");
        let mut suffix = 1u32;
        while tree.nodes.iter().any(|n| n.name == name) {
            name = format!("new_node_{suffix}");
            suffix += 1;
        }
        let id = NodeId::from(fnv1a32(&name));
        let node = TreeNode {
            id,
            parent: NO_NODE,
            original_name: name.clone(),
            name,
            tree_key: key.to_string(),
            kind: String::from("outfit"),
            cost_kind: String::from("candle"),
            cost: 1,
            premium: false,
            runtime_created: true,
            x: pos.x,
            y: pos.y,
            children: Vec::new(),
        };
        tree.nodes.push(node);
        tree.rebuild();
        tree.recompute_bounds();
        self.mark_dirty(key);
        Some(id)
    }

    /// Remove a node. Its children are cut loose (parent cleared) rather
    /// than deleted; returns the former child ids so callers can mark them
    /// free-floating.
    pub fn delete_node(&mut self, key: &str, id: NodeId) -> Option<Vec<NodeId>> {
        let tree = self.trees.get_mut(key)?;
        if !tree.contains(id) {
            return None;
        }
        let orphans: Vec<NodeId> = tree
            .node(id)
            .map(|n| n.children.clone())
            .unwrap_or_default();
        for &c in &orphans {
            if let Some(child) = tree.node_mut(c) {
                child.parent = NO_NODE;
            }
        }
        tree.nodes.retain(|n| n.id != id);
        tree.rebuild();
        tree.recompute_bounds();
        self.snaps.clear(key, id);
        self.mark_dirty(key);
        Some(orphans)
    }

    /// True when attaching `child` under `new_parent` would create a cycle
    /// (including `child == new_parent`).
    pub fn would_cycle(&self, key: &str, child: NodeId, new_parent: NodeId) -> bool {
        if new_parent == NO_NODE {
            return false;
        }
        if child == new_parent {
            return true;
        }
        let Some(tree) = self.trees.get(key) else {
            return false;
        };
        let mut cur = new_parent;
        let mut seen = HashSet::new();
        while cur != NO_NODE && seen.insert(cur) {
            if cur == child {
                return true;
            }
            cur = tree.node(cur).map(|n| n.parent).unwrap_or(NO_NODE);
        }
        false
    }

    /// Reattach `child` under `new_parent` (append as last child).
    /// Rejected if it would create a cycle. Clears any snap record for the
    /// child since its old slot no longer applies.
    pub fn reparent(&mut self, key: &str, child: NodeId, new_parent: NodeId) -> bool {
        if self.would_cycle(key, child, new_parent) {
            warn!(
                "[EDIT] rejected reparent of {child} under {new_parent}: would form a cycle"
            );
            return false;
        }
        let Some(tree) = self.trees.get_mut(key) else {
            return false;
        };
        if !tree.contains(child) || (new_parent != NO_NODE && !tree.contains(new_parent)) {
            return false;
        }
        if let Some(node) = tree.node_mut(child) {
            node.parent = new_parent;
        }
        tree.rebuild();
        self.snaps.clear(key, child);
        self.mark_dirty(key);
        true
    }

    /// Rewrite a node id everywhere it appears (node itself plus every
    /// child's parent pointer). Fails when the target id is already taken.
    pub fn change_node_id(&mut self, key: &str, old: NodeId, new: NodeId) -> bool {
        if old == new {
            return true;
        }
        let Some(tree) = self.trees.get_mut(key) else {
            return false;
        };
        if !tree.contains(old) || tree.contains(new) {
            return false;
        }
        for node in &mut tree.nodes {
            if node.id == old {
                node.id = new;
            }
            if node.parent == old {
                node.parent = new;
            }
        }
        tree.rebuild();
        if let Some(info) = self.snaps.get(old) {
            self.snaps.clear(key, old);
            self.snaps.record(key, new, info.parent, info.index);
        }
        self.mark_dirty(key);
        true
    }

    /// Recompute a node's id from the FNV-1a hash of its current name.
    pub fn refresh_node_id(&mut self, key: &str, id: NodeId) -> Option<NodeId> {
        let name = self.trees.get(key)?.node(id)?.name.clone();
        let new = NodeId::from(fnv1a32(&name));
        if new == id {
            return Some(id);
        }
        if self.change_node_id(key, id, new) {
            Some(new)
        } else {
            None
        }
    }

    pub fn is_duplicate_name(&self, key: &str, name: &str, exclude: NodeId) -> bool {
        self.trees
            .get(key)
            .map(|t| t.nodes.iter().any(|n| n.id != exclude && n.name == name))
            .unwrap_or(false)
    }

    /// Ids that share a name with another node in the tree.
    pub fn duplicate_name_ids(&self, key: &str) -> HashSet<NodeId> {
        let mut out = HashSet::new();
        let Some(tree) = self.trees.get(key) else {
            return out;
        };
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for node in &tree.nodes {
            *counts.entry(node.name.as_str()).or_default() += 1;
        }
        for node in &tree.nodes {
            if counts.get(node.name.as_str()).copied().unwrap_or(0) > 1 {
                out.insert(node.id);
            }
        }
        out
    }

    /// Apply a partial attribute update. Renames that collide with another
    /// node reject the whole patch and revert the name to its load-time
    /// value; parent changes go through the cycle check and are dropped
    /// from the patch when they fail.
    pub fn apply_patch(&mut self, key: &str, id: NodeId, patch: &NodePatch) -> ApplyOutcome {
        if self.node(key, id).is_none() {
            return ApplyOutcome::NodeNotFound;
        }
        if let Some(name) = &patch.name {
            if self.is_duplicate_name(key, name, id) {
                // Rejected rename falls back to the load-time name.
                if let Some(tree) = self.trees.get_mut(key) {
                    if let Some(node) = tree.node_mut(id) {
                        node.name = node.original_name.clone();
                    }
                }
                return ApplyOutcome::DuplicateName;
            }
        }

        let mut current = id;
        if let Some(new_parent) = patch.parent {
            // A failed cycle check skips the parent edit but keeps the rest.
            self.reparent(key, current, new_parent);
        }
        if let Some(new_id) = patch.id {
            if self.change_node_id(key, current, new_id) {
                current = new_id;
            }
        }
        if let Some(tree) = self.trees.get_mut(key) {
            if let Some(node) = tree.node_mut(current) {
                if let Some(name) = &patch.name {
                    node.name = name.clone();
                }
                if let Some(kind) = &patch.kind {
                    node.kind = kind.clone();
                }
                if let Some(cost_kind) = &patch.cost_kind {
                    node.cost_kind = cost_kind.clone();
                }
                if let Some(cost) = patch.cost {
                    node.cost = cost;
                }
                if let Some(premium) = patch.premium {
                    node.premium = premium;
                }
            }
            tree.rebuild();
        }
        self.mark_dirty(key);
        ApplyOutcome::Applied { id: current }
    }

    pub fn move_node_base(&mut self, key: &str, id: NodeId, delta: Vec2) -> bool {
        let Some(tree) = self.trees.get_mut(key) else {
            return false;
        };
        let Some(node) = tree.node_mut(id) else {
            return false;
        };
        node.x += delta.x;
        node.y += delta.y;
        tree.recompute_bounds();
        self.mark_dirty(key);
        true
    }

    /// Shift a node and everything below it. Returns the moved ids.
    pub fn move_subtree_base(
        &mut self,
        key: &str,
        root: NodeId,
        delta: Vec2,
    ) -> Option<HashSet<NodeId>> {
        let tree = self.trees.get_mut(key)?;
        if !tree.contains(root) {
            return None;
        }
        let ids = tree.subtree_ids(root);
        for node in &mut tree.nodes {
            if ids.contains(&node.id) {
                node.x += delta.x;
                node.y += delta.y;
            }
        }
        tree.recompute_bounds();
        self.mark_dirty(key);
        Some(ids)
    }

    /// Shift every node in the tree, connected or not.
    pub fn move_tree_base(&mut self, key: &str, delta: Vec2) -> bool {
        let Some(tree) = self.trees.get_mut(key) else {
            return false;
        };
        for node in &mut tree.nodes {
            node.x += delta.x;
            node.y += delta.y;
        }
        tree.recompute_bounds();
        self.mark_dirty(key);
        true
    }

    /// Move a child to a new slot among its siblings.
    pub fn reorder_child(&mut self, key: &str, parent: NodeId, child: NodeId, slot: usize) -> bool {
        let Some(tree) = self.trees.get_mut(key) else {
            return false;
        };
        let Some(p) = tree.node_mut(parent) else {
            return false;
        };
        let Some(from) = p.children.iter().position(|c| *c == child) else {
            return false;
        };
        p.children.remove(from);
        let slot = slot.min(p.children.len());
        p.children.insert(slot, child);
        self.mark_dirty(key);
        true
    }

    /// Swap the slots of two children of the same parent.
    pub fn swap_children(&mut self, key: &str, parent: NodeId, a: NodeId, b: NodeId) -> bool {
        let Some(tree) = self.trees.get_mut(key) else {
            return false;
        };
        let Some(p) = tree.node_mut(parent) else {
            return false;
        };
        let (Some(i), Some(j)) = (
            p.children.iter().position(|c| *c == a),
            p.children.iter().position(|c| *c == b),
        ) else {
            return false;
        };
        p.children.swap(i, j);
        self.mark_dirty(key);
        true
    }

    pub fn child_index(&self, key: &str, parent: NodeId, child: NodeId) -> Option<usize> {
        self.node(key, parent)?
            .children
            .iter()
            .position(|c| *c == child)
    }

    /// Remember the slot `child` is about to lose (called just before an
    /// auto-detach clears the parent pointer).
    pub fn record_snap(&mut self, key: &str, child: NodeId, parent: NodeId) {
        let index = self.child_index(key, parent, child).unwrap_or(0);
        self.snaps.record(key, child, parent, index);
    }

    /// Reattach every snapped child of a tree at its recorded slot, clamped
    /// to the current child count. Returns the reattached ids.
    pub fn restore_snaps(&mut self, key: &str) -> Vec<NodeId> {
        let pending: Vec<(NodeId, SnapInfo)> = self
            .snaps
            .children_for(key)
            .into_iter()
            .filter_map(|c| self.snaps.get(c).map(|info| (c, info)))
            .collect();
        let mut restored = Vec::new();
        for (child, info) in pending {
            let Some(tree) = self.trees.get_mut(key) else {
                break;
            };
            if !tree.contains(child) || !tree.contains(info.parent) {
                self.snaps.clear(key, child);
                continue;
            }
            if let Some(node) = tree.node_mut(child) {
                node.parent = info.parent;
            }
            tree.rebuild();
            // rebuild() appended the child; move it back to its old slot.
            self.reorder_child(key, info.parent, child, info.index);
            self.snaps.clear(key, child);
            restored.push(child);
        }
        if !restored.is_empty() {
            self.mark_dirty(key);
        }
        restored
    }

    /// True when re-running layout from current root positions would move
    /// anything, or when snapped children are waiting to be reattached.
    pub fn needs_reshape(&mut self, key: &str) -> bool {
        if let Some(c) = self.checks.get(key) {
            if !c.reshape_dirty {
                return c.reshape;
            }
        }
        let result = self.snaps.has_snaps(key)
            || self
                .trees
                .get(key)
                .map(layout::is_misshapen)
                .unwrap_or(false);
        let entry = self.checks.entry(key.to_string()).or_default();
        entry.reshape = result;
        entry.reshape_dirty = false;
        result
    }

    /// True when the tree's node-id set differs from what was loaded, or any
    /// node was created at runtime.
    pub fn needs_restore(&mut self, key: &str) -> bool {
        if let Some(c) = self.checks.get(key) {
            if !c.restore_dirty {
                return c.restore;
            }
        }
        let result = match (self.trees.get(key), self.original_ids.get(key)) {
            (Some(tree), Some(orig)) => {
                tree.nodes.iter().any(|n| n.runtime_created)
                    || tree.nodes.len() != orig.len()
                    || tree.nodes.iter().any(|n| !orig.contains(&n.id))
            }
            _ => false,
        };
        let entry = self.checks.entry(key.to_string()).or_default();
        entry.restore = result;
        entry.restore_dirty = false;
        result
    }

    /// Rebuild one tree from the records it was loaded from, discarding all
    /// runtime edits. Returns the ids that existed before the restore but
    /// not after (used to play removal effects).
    pub fn restore_tree(&mut self, key: &str) -> Option<Vec<NodeId>> {
        if !self.trees.contains_key(key) {
            return None;
        }
        let records: Vec<NodeRecord> = self
            .source
            .iter()
            .filter(|r| r.spirit == key)
            .cloned()
            .collect();
        let before: HashSet<NodeId> = self
            .trees
            .get(key)
            .map(|t| t.nodes.iter().map(|n| n.id).collect())
            .unwrap_or_default();
        let tree = self.trees.get_mut(key)?;
        tree.nodes = records.iter().map(TreeNode::from_record).collect();
        tree.rebuild();
        layout::layout_tree(tree);
        let after: HashSet<NodeId> = tree.nodes.iter().map(|n| n.id).collect();
        self.snaps.clear_tree(key);
        self.mark_dirty(key);
        info!("[RESTORE] tree '{key}' rebuilt from source ({} nodes)", after.len());
        Some(before.difference(&after).copied().collect())
    }

    /// Relayout the subtree under `root` and report how far each descendant
    /// moved (old minus new position). The root itself does not move.
    pub fn layout_subtree_collect_shifts(
        &mut self,
        key: &str,
        root: NodeId,
    ) -> Option<HashMap<NodeId, Vec2>> {
        let tree = self.trees.get_mut(key)?;
        if !tree.contains(root) {
            return None;
        }
        let shifts = layout::layout_subtree_collect_shifts(tree, root);
        self.mark_dirty(key);
        Some(shifts)
    }

    /// Relayout every connected component from its current root position.
    pub fn reshape_collect_shifts(&mut self, key: &str) -> Option<HashMap<NodeId, Vec2>> {
        let tree = self.trees.get_mut(key)?;
        let mut shifts = HashMap::new();
        for root in tree.root_ids() {
            shifts.extend(layout::layout_subtree_collect_shifts(tree, root));
        }
        tree.recompute_bounds();
        self.mark_dirty(key);
        Some(shifts)
    }

    /// Re-slot the direct children of `parent`, dragging each child's
    /// descendants along rigidly. Returns (id, old − new) per moved node.
    pub fn reposition_children(&mut self, key: &str, parent: NodeId) -> Vec<(NodeId, Vec2)> {
        let Some(tree) = self.trees.get_mut(key) else {
            return Vec::new();
        };
        let out = layout::reposition_children(tree, parent);
        if !out.is_empty() {
            self.mark_dirty(key);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: NodeId, dep: NodeId, nm: &str, spirit: &str) -> NodeRecord {
        NodeRecord {
            id,
            dep,
            nm: nm.to_string(),
            spirit: spirit.to_string(),
            typ: String::from("outfit"),
            ctyp: String::from("candle"),
            cst: 1,
            ap: false,
        }
    }

    fn sample_forest() -> TreeForest {
        let mut forest = TreeForest::default();
        forest.load(
            vec![
                rec(1, 0, "root", "alpha"),
                rec(2, 1, "left", "alpha"),
                rec(3, 1, "mid", "alpha"),
                rec(4, 1, "right", "alpha"),
                rec(5, 2, "leaf", "alpha"),
                rec(10, 0, "groot", "tgc_guide"),
            ],
            &[String::from("quest"), String::from("tgc_")],
        );
        forest
    }

    #[test]
    fn fnv1a32_known_values() {
        assert_eq!(fnv1a32(""), 0x811C_9DC5);
        assert_eq!(fnv1a32("a"), 0xE40C_292C);
        assert_eq!(fnv1a32("foobar"), 0xBF9C_F968);
    }

    #[test]
    fn load_groups_and_classifies() {
        let mut forest = sample_forest();
        assert!(forest.is_loaded());
        assert_eq!(forest.primary_keys(), &[String::from("alpha")]);
        assert_eq!(forest.guide_keys(), &[String::from("tgc_guide")]);
        assert!(forest.is_guide("tgc_guide"));
        let tree = forest.tree("alpha").unwrap();
        assert_eq!(tree.root_id, 1);
        assert_eq!(tree.node(1).unwrap().children, vec![2, 3, 4]);
        assert!(!forest.needs_restore("alpha"));
        assert!(!forest.needs_reshape("alpha"));
    }

    #[test]
    fn load_lays_three_children_north_of_the_root() {
        let mut forest = sample_forest();
        let root = forest.node("alpha", 1).unwrap().pos();
        assert_eq!(
            forest.node("alpha", 2).unwrap().pos(),
            root + Vec2::new(-120.0, 75.0)
        );
        assert_eq!(
            forest.node("alpha", 3).unwrap().pos(),
            root + Vec2::new(0.0, 100.0)
        );
        assert_eq!(
            forest.node("alpha", 4).unwrap().pos(),
            root + Vec2::new(120.0, 75.0)
        );
        assert!(!forest.needs_reshape("alpha"));
    }

    #[test]
    fn load_skips_empty_tree_key() {
        let mut forest = TreeForest::default();
        forest.load(vec![rec(1, 0, "root", "alpha"), rec(2, 0, "stray", "")], &[]);
        assert_eq!(forest.primary_keys().len(), 1);
    }

    #[test]
    fn roundtrip_preserves_records() {
        let forest = sample_forest();
        let records = forest.to_records();
        assert_eq!(records.len(), 6);
        assert_eq!(records[0].nm, "root");
        assert_eq!(records[5].spirit, "tgc_guide");
    }

    #[test]
    fn create_node_uniquifies_name_and_hashes_id() {
        let mut forest = sample_forest();
        let a = forest.create_node("alpha", Vec2::new(10.0, 20.0)).unwrap();
        let b = forest.create_node("alpha", Vec2::ZERO).unwrap();
        assert_eq!(a, NodeId::from(fnv1a32("new_node")));
        assert_eq!(b, NodeId::from(fnv1a32("new_node_1")));
        let node = forest.node("alpha", a).unwrap();
        assert_eq!(node.kind, "outfit");
        assert_eq!(node.cost_kind, "candle");
        assert_eq!(node.cost, 1);
        assert_eq!(node.parent, NO_NODE);
        assert!(node.runtime_created);
        assert!(forest.needs_restore("alpha"));
    }

    #[test]
    fn delete_node_orphans_children() {
        let mut forest = sample_forest();
        let orphans = forest.delete_node("alpha", 2).unwrap();
        assert_eq!(orphans, vec![5]);
        assert!(forest.node("alpha", 2).is_none());
        assert_eq!(forest.node("alpha", 5).unwrap().parent, NO_NODE);
        assert!(forest.needs_restore("alpha"));
    }

    #[test]
    fn delete_leaves_siblings_where_they_were() {
        let mut forest = sample_forest();
        let mid = forest.node("alpha", 3).unwrap().pos();
        let right = forest.node("alpha", 4).unwrap().pos();
        forest.delete_node("alpha", 2);
        // No automatic reshape on delete; remaining nodes hold position.
        assert_eq!(forest.node("alpha", 3).unwrap().pos(), mid);
        assert_eq!(forest.node("alpha", 4).unwrap().pos(), right);
        assert_eq!(forest.node("alpha", 1).unwrap().children, vec![3, 4]);
    }

    #[test]
    fn reparent_rejects_cycles() {
        let mut forest = sample_forest();
        // 5 is a descendant of 2: attaching 2 under 5 would form a cycle.
        assert!(!forest.reparent("alpha", 2, 5));
        assert!(!forest.reparent("alpha", 2, 2));
        assert_eq!(forest.node("alpha", 2).unwrap().parent, 1);
        // Valid move works and appends.
        assert!(forest.reparent("alpha", 5, 3));
        assert_eq!(forest.node("alpha", 3).unwrap().children, vec![5]);
    }

    #[test]
    fn change_node_id_rewrites_parent_pointers() {
        let mut forest = sample_forest();
        assert!(forest.change_node_id("alpha", 2, 99));
        assert!(forest.node("alpha", 2).is_none());
        assert_eq!(forest.node("alpha", 5).unwrap().parent, 99);
        // Collision with an existing id is rejected.
        assert!(!forest.change_node_id("alpha", 99, 3));
        assert!(forest.needs_restore("alpha"));
    }

    #[test]
    fn refresh_node_id_uses_name_hash() {
        let mut forest = sample_forest();
        let new = forest.refresh_node_id("alpha", 5).unwrap();
        assert_eq!(new, NodeId::from(fnv1a32("leaf")));
        assert_eq!(forest.node("alpha", new).unwrap().name, "leaf");
    }

    #[test]
    fn apply_patch_rejects_duplicate_name_without_side_effects() {
        let mut forest = sample_forest();
        let patch = NodePatch {
            name: Some(String::from("mid")),
            cost: Some(9),
            ..Default::default()
        };
        assert_eq!(forest.apply_patch("alpha", 2, &patch), ApplyOutcome::DuplicateName);
        assert_eq!(forest.node("alpha", 2).unwrap().name, "left");
        assert_eq!(forest.node("alpha", 2).unwrap().cost, 1);
    }

    #[test]
    fn rejected_rename_reverts_to_load_time_name() {
        let mut forest = sample_forest();
        let rename = NodePatch {
            name: Some(String::from("lefty")),
            ..Default::default()
        };
        assert_eq!(forest.apply_patch("alpha", 2, &rename), ApplyOutcome::Applied { id: 2 });
        assert_eq!(forest.node("alpha", 2).unwrap().name, "lefty");

        // A second rename that collides drops back to the name from load,
        // not the intermediate one.
        let collide = NodePatch {
            name: Some(String::from("mid")),
            ..Default::default()
        };
        assert_eq!(forest.apply_patch("alpha", 2, &collide), ApplyOutcome::DuplicateName);
        assert_eq!(forest.node("alpha", 2).unwrap().name, "left");
    }

    #[test]
    fn apply_patch_updates_fields() {
        let mut forest = sample_forest();
        let patch = NodePatch {
            name: Some(String::from("renamed")),
            kind: Some(String::from("hair")),
            cost: Some(5),
            premium: Some(true),
            parent: Some(3),
            ..Default::default()
        };
        let out = forest.apply_patch("alpha", 5, &patch);
        assert_eq!(out, ApplyOutcome::Applied { id: 5 });
        let node = forest.node("alpha", 5).unwrap();
        assert_eq!(node.name, "renamed");
        assert_eq!(node.kind, "hair");
        assert_eq!(node.cost, 5);
        assert!(node.premium);
        assert_eq!(node.parent, 3);
    }

    #[test]
    fn duplicate_name_ids_flags_all_holders() {
        let mut forest = sample_forest();
        forest
            .tree_mut("alpha")
            .unwrap()
            .node_mut(4)
            .unwrap()
            .name = String::from("left");
        let dups = forest.duplicate_name_ids("alpha");
        assert!(dups.contains(&2));
        assert!(dups.contains(&4));
        assert_eq!(dups.len(), 2);
    }

    #[test]
    fn subtree_moves_shift_descendants_only() {
        let mut forest = sample_forest();
        let before_root = forest.node("alpha", 1).unwrap().pos();
        let before_leaf = forest.node("alpha", 5).unwrap().pos();
        let moved = forest
            .move_subtree_base("alpha", 2, Vec2::new(10.0, -5.0))
            .unwrap();
        assert_eq!(moved, HashSet::from([2, 5]));
        assert_eq!(forest.node("alpha", 1).unwrap().pos(), before_root);
        assert_eq!(
            forest.node("alpha", 5).unwrap().pos(),
            before_leaf + Vec2::new(10.0, -5.0)
        );
    }

    #[test]
    fn detach_relayout_resettles_old_parent_subtree() {
        let mut forest = sample_forest();
        // Give node 2 a second child so losing one changes the slot shapes.
        assert!(forest.reparent("alpha", 4, 2));
        forest.reshape_collect_shifts("alpha");
        // Stretch-snap style detach of node 4.
        forest.record_snap("alpha", 4, 2);
        forest.tree_mut("alpha").unwrap().node_mut(4).unwrap().parent = NO_NODE;
        forest.tree_mut("alpha").unwrap().rebuild();
        forest.mark_dirty("alpha");

        let shifts = forest.layout_subtree_collect_shifts("alpha", 2).unwrap();
        // Node 5 slides from its two-child slot to the lone north slot.
        assert!(shifts.contains_key(&5));
        let parent = forest.node("alpha", 2).unwrap().pos();
        assert_eq!(
            forest.node("alpha", 5).unwrap().pos(),
            parent + Vec2::new(0.0, 100.0)
        );
        // Nothing outside node 2's closure moves.
        assert!(!shifts.contains_key(&1));
        assert!(!shifts.contains_key(&3));
        assert!(!shifts.contains_key(&2));
    }

    #[test]
    fn snap_restore_reattaches_at_recorded_slot() {
        let mut forest = sample_forest();
        // Detach the middle child the way a stretch-snap does.
        forest.record_snap("alpha", 3, 1);
        forest.tree_mut("alpha").unwrap().node_mut(3).unwrap().parent = NO_NODE;
        forest.tree_mut("alpha").unwrap().rebuild();
        forest.mark_dirty("alpha");
        assert_eq!(forest.node("alpha", 1).unwrap().children, vec![2, 4]);
        assert!(forest.needs_reshape("alpha"));

        let restored = forest.restore_snaps("alpha");
        assert_eq!(restored, vec![3]);
        assert_eq!(forest.node("alpha", 1).unwrap().children, vec![2, 3, 4]);
        assert!(!forest.snaps.has_snaps("alpha"));
    }

    #[test]
    fn snap_restore_clamps_stale_index() {
        let mut forest = sample_forest();
        forest.record_snap("alpha", 4, 1);
        forest.tree_mut("alpha").unwrap().node_mut(4).unwrap().parent = NO_NODE;
        forest.tree_mut("alpha").unwrap().rebuild();
        // Shrink the sibling list so the recorded index (2) is out of range.
        forest.delete_node("alpha", 2);
        forest.delete_node("alpha", 3);
        let restored = forest.restore_snaps("alpha");
        assert_eq!(restored, vec![4]);
        assert_eq!(forest.node("alpha", 1).unwrap().children, vec![4]);
    }

    #[test]
    fn restore_tree_discards_runtime_edits() {
        let mut forest = sample_forest();
        let created = forest.create_node("alpha", Vec2::ZERO).unwrap();
        forest.delete_node("alpha", 4);
        assert!(forest.needs_restore("alpha"));
        let removed = forest.restore_tree("alpha").unwrap();
        assert_eq!(removed, vec![created]);
        assert!(forest.node("alpha", 4).is_some());
        assert!(!forest.needs_restore("alpha"));
    }

    #[test]
    fn travelling_predicate() {
        let mut forest = TreeForest::default();
        forest.load(
            vec![
                rec(1, 0, "root", "trav"),
                rec(2, 1, "emote_upgrade_1", "trav"),
                rec(3, 0, "root", "plain"),
                rec(4, 3, "cape", "plain"),
                rec(5, 0, "root", "tgc_trav"),
                rec(6, 5, "emote_upgrade_1", "tgc_trav"),
            ],
            &[String::from("tgc_")],
        );
        assert!(forest.is_travelling("trav"));
        assert!(!forest.is_travelling("plain"));
        // Guides never count, even when the rules would otherwise match.
        assert!(!forest.is_travelling("tgc_trav"));
        // A premium node disqualifies the tree.
        forest
            .tree_mut("trav")
            .unwrap()
            .node_mut(2)
            .unwrap()
            .premium = true;
        assert!(!forest.is_travelling("trav"));
    }

    #[test]
    fn record_defaults_fill_missing_fields() {
        let json = r#"{"id": 42, "nm": "thing", "spirit": "s"}"#;
        let rec: NodeRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.id, 42);
        assert_eq!(rec.dep, 0);
        assert_eq!(rec.cst, 0);
        assert!(!rec.ap);
        assert!(rec.typ.is_empty());
    }
}

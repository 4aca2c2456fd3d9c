//! Deterministic tree layout.
//!
//! Children sit one row north of their parent in fixed slots derived only
//! from the parent position, the child count, and the child index. Running
//! layout twice from the same root positions is a no-op, which is what lets
//! the reshape check compare a scratch relayout against the live positions.

use std::collections::{HashMap, HashSet};

use bevy::prelude::*;

use crate::core::forest::{NodeId, UnlockTree};

/// Vertical gap between a parent and its child row (children sit above).
pub const Y_SPACING: f32 = 100.0;
/// Horizontal gap between sibling slots.
pub const X_SPACING: f32 = 120.0;
/// Off-center children sit this much lower than the row (diagonal look).
pub const DIAGONAL_OFFSET: f32 = -25.0;

/// Positions that would move less than this are considered unmoved.
pub const RESHAPE_EPSILON: f32 = 0.1;

/// Slot position for child `index` of `count` children under a parent at
/// `parent_pos`.
///
/// One child goes straight north. Two take the NW and N slots, three the
/// NW, N and NE slots. Four or more spread evenly around the center, and
/// every non-center child dips by the diagonal offset.
pub fn child_slot(parent_pos: Vec2, count: usize, index: usize) -> Vec2 {
    let north = parent_pos.y + Y_SPACING;
    match count {
        0 => parent_pos,
        1 => Vec2::new(parent_pos.x, north),
        2 => {
            // NW then N, mirroring the three-slot shape minus the NE arm.
            let slots = [
                Vec2::new(parent_pos.x - X_SPACING, north + DIAGONAL_OFFSET),
                Vec2::new(parent_pos.x, north),
            ];
            slots[index.min(1)]
        }
        3 => {
            let slots = [
                Vec2::new(parent_pos.x - X_SPACING, north + DIAGONAL_OFFSET),
                Vec2::new(parent_pos.x, north),
                Vec2::new(parent_pos.x + X_SPACING, north + DIAGONAL_OFFSET),
            ];
            slots[index.min(2)]
        }
        _ => {
            let center = (count as f32 - 1.0) * 0.5;
            let offset = index as f32 - center;
            let x = parent_pos.x + offset * X_SPACING;
            let y = if offset.abs() > 0.01 {
                north + DIAGONAL_OFFSET
            } else {
                north
            };
            Vec2::new(x, y)
        }
    }
}

/// Place every descendant of `root` at its slot, keeping `root` where it is.
pub fn layout_subtree(tree: &mut UnlockTree, root: NodeId) {
    let mut stack = vec![root];
    let mut seen = HashSet::new();
    while let Some(cur) = stack.pop() {
        if !seen.insert(cur) {
            continue;
        }
        let Some(node) = tree.node(cur) else {
            continue;
        };
        let base = node.pos();
        let children = node.children.clone();
        let count = children.len();
        for (i, &cid) in children.iter().enumerate() {
            let slot = child_slot(base, count, i);
            if let Some(child) = tree.node_mut(cid) {
                child.set_pos(slot);
            }
            stack.push(cid);
        }
    }
}

/// Full layout: every connected component is laid out from its root's
/// current position, then bounds are refreshed.
pub fn layout_tree(tree: &mut UnlockTree) {
    for root in tree.root_ids() {
        layout_subtree(tree, root);
    }
    tree.recompute_bounds();
}

/// Relayout the subtree under `root` and return old − new per moved
/// descendant. The root's own position is the anchor and never moves.
pub fn layout_subtree_collect_shifts(
    tree: &mut UnlockTree,
    root: NodeId,
) -> HashMap<NodeId, Vec2> {
    let ids = tree.subtree_ids(root);
    let old: HashMap<NodeId, Vec2> = ids
        .iter()
        .filter_map(|&id| tree.node(id).map(|n| (id, n.pos())))
        .collect();
    layout_subtree(tree, root);
    tree.recompute_bounds();
    let mut shifts = HashMap::new();
    for (&id, &was) in &old {
        if id == root {
            continue;
        }
        if let Some(node) = tree.node(id) {
            let shift = was - node.pos();
            if shift.length_squared() > 0.0 {
                shifts.insert(id, shift);
            }
        }
    }
    shifts
}

/// Whether re-running layout from current root positions would move any
/// node by more than the epsilon. Works on a scratch clone.
pub fn is_misshapen(tree: &UnlockTree) -> bool {
    let mut scratch = tree.clone();
    for root in scratch.root_ids() {
        layout_subtree(&mut scratch, root);
    }
    for node in &tree.nodes {
        if let Some(laid) = scratch.node(node.id) {
            if (node.x - laid.x).abs() > RESHAPE_EPSILON
                || (node.y - laid.y).abs() > RESHAPE_EPSILON
            {
                return true;
            }
        }
    }
    false
}

/// Re-slot only the direct children of `parent`, shifting each child's
/// descendants rigidly by the same delta. Returns (id, old − new) for every
/// node that moved; shifts below ~a hundredth of a unit are skipped.
pub fn reposition_children(tree: &mut UnlockTree, parent: NodeId) -> Vec<(NodeId, Vec2)> {
    let Some(p) = tree.node(parent) else {
        return Vec::new();
    };
    let base = p.pos();
    let children = p.children.clone();
    let count = children.len();
    let mut moved = Vec::new();
    for (i, &cid) in children.iter().enumerate() {
        let slot = child_slot(base, count, i);
        let Some(child) = tree.node(cid) else {
            continue;
        };
        let delta = slot - child.pos();
        if delta.x.abs() < 0.01 && delta.y.abs() < 0.01 {
            continue;
        }
        let ids = tree.subtree_ids(cid);
        for node in &mut tree.nodes {
            if ids.contains(&node.id) {
                node.x += delta.x;
                node.y += delta.y;
                moved.push((node.id, -delta));
            }
        }
    }
    if !moved.is_empty() {
        tree.recompute_bounds();
    }
    moved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::forest::TreeNode;

    fn node(id: NodeId, parent: NodeId) -> TreeNode {
        TreeNode {
            id,
            parent,
            name: format!("n{id}"),
            original_name: format!("n{id}"),
            tree_key: String::from("t"),
            kind: String::from("outfit"),
            cost_kind: String::from("candle"),
            cost: 1,
            premium: false,
            runtime_created: false,
            x: 0.0,
            y: 0.0,
            children: Vec::new(),
        }
    }

    fn tree_with(nodes: Vec<TreeNode>) -> UnlockTree {
        let mut tree = UnlockTree {
            key: String::from("t"),
            nodes,
            ..Default::default()
        };
        tree.rebuild();
        tree
    }

    #[test]
    fn single_child_goes_straight_north() {
        let p = Vec2::new(50.0, 200.0);
        assert_eq!(child_slot(p, 1, 0), Vec2::new(50.0, 300.0));
    }

    #[test]
    fn two_children_take_nw_and_n() {
        let p = Vec2::ZERO;
        assert_eq!(child_slot(p, 2, 0), Vec2::new(-120.0, 75.0));
        assert_eq!(child_slot(p, 2, 1), Vec2::new(0.0, 100.0));
    }

    #[test]
    fn three_children_take_nw_n_ne() {
        let p = Vec2::ZERO;
        assert_eq!(child_slot(p, 3, 0), Vec2::new(-120.0, 75.0));
        assert_eq!(child_slot(p, 3, 1), Vec2::new(0.0, 100.0));
        assert_eq!(child_slot(p, 3, 2), Vec2::new(120.0, 75.0));
    }

    #[test]
    fn four_children_spread_with_diagonal_dip() {
        let p = Vec2::ZERO;
        // Center sits at index 1.5 so every child is off-center.
        assert_eq!(child_slot(p, 4, 0), Vec2::new(-180.0, 75.0));
        assert_eq!(child_slot(p, 4, 1), Vec2::new(-60.0, 75.0));
        assert_eq!(child_slot(p, 4, 2), Vec2::new(60.0, 75.0));
        assert_eq!(child_slot(p, 4, 3), Vec2::new(180.0, 75.0));
    }

    #[test]
    fn five_children_keep_center_on_axis() {
        let p = Vec2::ZERO;
        assert_eq!(child_slot(p, 5, 2), Vec2::new(0.0, 100.0));
        assert_eq!(child_slot(p, 5, 0), Vec2::new(-240.0, 75.0));
        assert_eq!(child_slot(p, 5, 4), Vec2::new(240.0, 75.0));
    }

    #[test]
    fn child_row_sits_above_the_parent() {
        let mut tree = tree_with(vec![node(1, 0), node(2, 1), node(3, 1), node(4, 1)]);
        if let Some(root) = tree.node_mut(1) {
            root.set_pos(Vec2::new(10.0, 40.0));
        }
        layout_tree(&mut tree);
        let root_y = tree.node(1).unwrap().y;
        for id in [2, 3, 4] {
            let child = tree.node(id).unwrap();
            assert!(
                child.y > root_y,
                "child {id} must land north of the root"
            );
        }
        assert_eq!(tree.node(3).unwrap().y, root_y + Y_SPACING);
    }

    #[test]
    fn layout_is_idempotent() {
        let mut tree = tree_with(vec![
            node(1, 0),
            node(2, 1),
            node(3, 1),
            node(4, 2),
            node(5, 2),
        ]);
        layout_tree(&mut tree);
        let snapshot: Vec<Vec2> = tree.nodes.iter().map(|n| n.pos()).collect();
        layout_tree(&mut tree);
        let again: Vec<Vec2> = tree.nodes.iter().map(|n| n.pos()).collect();
        assert_eq!(snapshot, again);
        assert!(!is_misshapen(&tree));
    }

    #[test]
    fn layout_anchors_at_root_position() {
        let mut tree = tree_with(vec![node(1, 0), node(2, 1)]);
        if let Some(root) = tree.node_mut(1) {
            root.set_pos(Vec2::new(300.0, 400.0));
        }
        layout_tree(&mut tree);
        assert_eq!(tree.node(2).unwrap().pos(), Vec2::new(300.0, 500.0));
    }

    #[test]
    fn misshapen_after_moving_a_child() {
        let mut tree = tree_with(vec![node(1, 0), node(2, 1), node(3, 1)]);
        layout_tree(&mut tree);
        assert!(!is_misshapen(&tree));
        if let Some(n) = tree.node_mut(2) {
            n.x += 5.0;
        }
        assert!(is_misshapen(&tree));
        // Sub-epsilon drift does not count.
        let mut tree2 = tree_with(vec![node(1, 0), node(2, 1)]);
        layout_tree(&mut tree2);
        if let Some(n) = tree2.node_mut(2) {
            n.x += 0.05;
        }
        assert!(!is_misshapen(&tree2));
    }

    #[test]
    fn collect_shifts_reports_old_minus_new() {
        let mut tree = tree_with(vec![node(1, 0), node(2, 1)]);
        layout_tree(&mut tree);
        if let Some(n) = tree.node_mut(2) {
            n.set_pos(Vec2::new(30.0, 80.0));
        }
        let shifts = layout_subtree_collect_shifts(&mut tree, 1);
        // Child snapped back to (0, 100); shift is where it was minus that.
        assert_eq!(shifts.get(&2), Some(&Vec2::new(30.0, -20.0)));
        assert_eq!(tree.node(2).unwrap().pos(), Vec2::new(0.0, 100.0));
        assert!(shifts.get(&1).is_none());
    }

    #[test]
    fn reposition_children_moves_descendants_rigidly() {
        let mut tree = tree_with(vec![node(1, 0), node(2, 1), node(3, 1), node(4, 2)]);
        layout_tree(&mut tree);
        let grandchild_rel = tree.node(4).unwrap().pos() - tree.node(2).unwrap().pos();
        // Dropping a sibling changes slots from 2-wide to 1-wide.
        tree.nodes.retain(|n| n.id != 3);
        tree.rebuild();
        let moved = reposition_children(&mut tree, 1);
        assert!(moved.iter().any(|(id, _)| *id == 2));
        assert!(moved.iter().any(|(id, _)| *id == 4));
        assert_eq!(tree.node(2).unwrap().pos(), Vec2::new(0.0, 100.0));
        assert_eq!(
            tree.node(4).unwrap().pos() - tree.node(2).unwrap().pos(),
            grandchild_rel
        );
    }

    #[test]
    fn layout_survives_parent_cycles() {
        // Malformed data: 2 and 3 point at each other. The visited set
        // keeps layout from spinning forever.
        let mut tree = tree_with(vec![node(1, 0), node(2, 3), node(3, 2)]);
        layout_tree(&mut tree);
        assert!(tree.nodes.len() == 3);
    }
}

//! Mouse interaction: picking, the four drag variants, box selection, and
//! the click-driven edit modes (create / link / reorder).

use bevy::prelude::*;
use bevy::window::PrimaryWindow;

use crate::core::forest::{NodeId, TreeForest, UnlockTree, NO_NODE};
use crate::core::helpers::NODE_RADIUS;
use crate::core::physics::Physics;
use crate::core::resources::{
    ActiveTree, DragMode, DragState, HighlightState, LinkSource, ReorderState, SelectionState,
    StatusMessage,
};
use crate::core::state::EditorMode;
use crate::render::nodes::MainCamera;

/// A parent with this many direct children (or more) is flagged crowded.
pub const OFFENDING_CHILDREN: usize = 4;

/// Cursor must travel this far from the press point before a box select arms.
const BOX_SELECT_ARM_DIST: f32 = 8.0;

pub fn cursor_world_pos(
    window_q: &Query<&Window, With<PrimaryWindow>>,
    camera_q: &Query<(&Camera, &GlobalTransform), With<MainCamera>>,
) -> Option<Vec2> {
    let window = window_q.single().ok()?;
    let cursor = window.cursor_position()?;
    let (camera, cam_transform) = camera_q.single().ok()?;
    camera.viewport_to_world_2d(cam_transform, cursor).ok()
}

/// Nearest node whose visible position is within the hit radius.
pub fn node_at_pos(tree: &UnlockTree, physics: &Physics, pos: Vec2) -> Option<NodeId> {
    let mut best: Option<(NodeId, f32)> = None;
    for node in &tree.nodes {
        let d = (physics.visible_pos(node) - pos).length();
        if d <= NODE_RADIUS && best.map(|(_, bd)| d < bd).unwrap_or(true) {
            best = Some((node.id, d));
        }
    }
    best.map(|(id, _)| id)
}

/// Recompute the crowded flag for one parent after its child list changed.
pub fn update_offending(
    forest: &TreeForest,
    highlight: &mut HighlightState,
    key: &str,
    parent: NodeId,
) {
    let count = forest
        .node(key, parent)
        .map(|n| n.children.len())
        .unwrap_or(0);
    if count >= OFFENDING_CHILDREN {
        let last = forest
            .node(key, parent)
            .and_then(|n| n.children.last().copied())
            .unwrap_or(NO_NODE);
        highlight.offending.insert(parent, last);
    } else {
        highlight.offending.remove(&parent);
    }
}

/// Left-button press in browse mode: pick a node and start the right drag
/// variant, toggle with shift, or anchor a box select on empty canvas.
pub fn mouse_press_system(
    mouse_buttons: Res<ButtonInput<MouseButton>>,
    keys: Res<ButtonInput<KeyCode>>,
    window_q: Query<&Window, With<PrimaryWindow>>,
    camera_q: Query<(&Camera, &GlobalTransform), With<MainCamera>>,
    forest: Res<TreeForest>,
    active: Res<ActiveTree>,
    mut physics: ResMut<Physics>,
    mut selection: ResMut<SelectionState>,
    mut drag: ResMut<DragState>,
    mut status: ResMut<StatusMessage>,
) {
    if !mouse_buttons.just_pressed(MouseButton::Left) {
        return;
    }
    // Space+click: pan mode, don't select or drag
    if keys.pressed(KeyCode::Space) {
        return;
    }
    let Some(pos) = cursor_world_pos(&window_q, &camera_q) else {
        return;
    };
    let Some(tree) = active.key().and_then(|k| forest.tree(k)) else {
        return;
    };
    let shift = crate::core::helpers::shift_pressed(&keys);

    let Some(hit) = node_at_pos(tree, &physics, pos) else {
        if !shift {
            selection.clear();
        }
        drag.0 = DragMode::BoxSelect {
            anchor: pos,
            armed: false,
        };
        return;
    };

    if shift {
        selection.toggle(hit);
        return;
    }
    if !selection.allowed(hit) {
        status.error("That node can't be picked right now");
        return;
    }

    let Some(node) = tree.node(hit) else {
        return;
    };
    let group = selection.selected.len() > 1 && selection.is_selected(hit);
    if !group {
        selection.select_only(hit);
    } else {
        selection.primary = hit;
    }

    if group {
        physics.start_group_drag(&selection.selected);
        let grab = physics.visible_pos(node) - pos;
        physics.set_dragged(Some(hit));
        drag.0 = DragMode::FreeNode { id: hit, grab };
    } else if physics.is_free_floating(hit) || (node.parent == NO_NODE && node.children.is_empty())
    {
        // Loose nodes drag through their physics offset.
        physics.thaw(hit);
        let grab = physics.visible_pos(node) - pos;
        physics.set_dragged(Some(hit));
        drag.0 = DragMode::FreeNode { id: hit, grab };
    } else if node.parent == NO_NODE {
        let grab = node.pos() - pos;
        physics.set_dragged(Some(hit));
        drag.0 = DragMode::Tree { id: hit, grab };
    } else {
        let grab = node.pos() - pos;
        physics.set_dragged(Some(hit));
        drag.0 = DragMode::Subtree { id: hit, grab };
    }
}

/// Per-frame drag continuation while the left button is held.
pub fn drag_update_system(
    mouse_buttons: Res<ButtonInput<MouseButton>>,
    window_q: Query<&Window, With<PrimaryWindow>>,
    camera_q: Query<(&Camera, &GlobalTransform), With<MainCamera>>,
    mut forest: ResMut<TreeForest>,
    active: Res<ActiveTree>,
    mut physics: ResMut<Physics>,
    selection: Res<SelectionState>,
    mut drag: ResMut<DragState>,
) {
    if !mouse_buttons.pressed(MouseButton::Left) {
        return;
    }
    let Some(pos) = cursor_world_pos(&window_q, &camera_q) else {
        return;
    };
    let Some(key) = active.key().map(str::to_owned) else {
        return;
    };

    match drag.0 {
        DragMode::Idle => {}
        DragMode::FreeNode { id, grab } => {
            let Some(base) = forest.node(&key, id).map(|n| n.pos()) else {
                return;
            };
            let offset = pos + grab - base;
            if physics.group_drag_active() {
                // The whole selection rides the same offset, staying rigid.
                for &sid in &selection.selected {
                    physics.set_offset(sid, offset);
                }
            } else {
                physics.set_offset(id, offset);
            }
        }
        DragMode::Subtree { id, grab } => {
            let Some(base) = forest.node(&key, id).map(|n| n.pos()) else {
                return;
            };
            let delta = pos + grab - base;
            if delta.length_squared() > 0.0 {
                if forest.move_subtree_base(&key, id, delta).is_some() {
                    apply_drag_wake(&forest, &mut physics, &key, id, delta);
                }
            }
        }
        DragMode::Tree { id, grab } => {
            let Some(base) = forest.node(&key, id).map(|n| n.pos()) else {
                return;
            };
            let delta = pos + grab - base;
            if delta.length_squared() > 0.0 && forest.move_tree_base(&key, delta) {
                apply_drag_wake(&forest, &mut physics, &key, id, delta);
            }
        }
        DragMode::BoxSelect { anchor, ref mut armed } => {
            if !*armed && (pos - anchor).length() > BOX_SELECT_ARM_DIST {
                *armed = true;
            }
        }
    }
}

/// Depth-scaled lag behind a base drag: deeper descendants hang back more
/// and their springs reel them in, giving the branch a wake.
fn apply_drag_wake(
    forest: &TreeForest,
    physics: &mut Physics,
    key: &str,
    root: NodeId,
    delta: Vec2,
) {
    let Some(tree) = forest.tree(key) else {
        return;
    };
    let depths = tree.subtree_depths(root);
    let max_depth = depths.values().copied().max().unwrap_or(0);
    for (&id, &depth) in &depths {
        if id == root || depth == 0 {
            continue;
        }
        let factor = depth as f32 / (max_depth as f32 + 1.0);
        physics.thaw(id);
        physics.apply_base_shift(id, factor * delta);
    }
}

/// Left-button release: commit free-node drags into base positions, finish
/// box selects, and relax everything else.
pub fn mouse_release_system(
    mouse_buttons: Res<ButtonInput<MouseButton>>,
    window_q: Query<&Window, With<PrimaryWindow>>,
    camera_q: Query<(&Camera, &GlobalTransform), With<MainCamera>>,
    mut forest: ResMut<TreeForest>,
    active: Res<ActiveTree>,
    mut physics: ResMut<Physics>,
    mut selection: ResMut<SelectionState>,
    mut drag: ResMut<DragState>,
) {
    if !mouse_buttons.just_released(MouseButton::Left) {
        return;
    }
    let mode = std::mem::take(&mut drag.0);
    physics.set_dragged(None);
    let Some(key) = active.key().map(str::to_owned) else {
        physics.end_group_drag();
        return;
    };

    match mode {
        DragMode::Idle => {}
        DragMode::FreeNode { id, .. } => {
            if physics.group_drag_active() {
                let delta = physics.offset_of(id);
                let members: Vec<NodeId> = selection.selected.iter().copied().collect();
                let mut parents = std::collections::HashSet::new();
                for sid in members {
                    forest.move_node_base(&key, sid, delta);
                    physics.clear_offset(sid);
                    if let Some(p) = forest.node(&key, sid).map(|n| n.parent) {
                        if p != NO_NODE {
                            parents.insert(p);
                        }
                    }
                }
                physics.end_group_drag();
                for p in parents {
                    if let Some(shifts) = forest.layout_subtree_collect_shifts(&key, p) {
                        physics.absorb_layout_shifts(shifts);
                    }
                }
            } else {
                let delta = physics.offset_of(id);
                forest.move_node_base(&key, id, delta);
                physics.clear_offset(id);
                // Descendants re-slot under the node's new resting place.
                if let Some(shifts) = forest.layout_subtree_collect_shifts(&key, id) {
                    physics.absorb_layout_shifts(shifts);
                }
            }
        }
        DragMode::Subtree { .. } | DragMode::Tree { .. } => {}
        DragMode::BoxSelect { anchor, armed } => {
            if !armed {
                return;
            }
            let Some(pos) = cursor_world_pos(&window_q, &camera_q) else {
                return;
            };
            let min = anchor.min(pos);
            let max = anchor.max(pos);
            let Some(tree) = forest.tree(&key) else {
                return;
            };
            for node in &tree.nodes {
                let p = physics.visible_pos(node);
                if p.x >= min.x && p.x <= max.x && p.y >= min.y && p.y <= max.y {
                    if selection.allowed(node.id) {
                        selection.selected.insert(node.id);
                        selection.primary = node.id;
                    }
                }
            }
        }
    }
}

/// Advance the spring/collision simulation for the shown tree.
pub fn physics_step_system(
    time: Res<Time>,
    forest: Res<TreeForest>,
    active: Res<ActiveTree>,
    mut physics: ResMut<Physics>,
) {
    let empty = UnlockTree::default();
    let tree = active.key().and_then(|k| forest.tree(k)).unwrap_or(&empty);
    physics.update(time.delta_secs(), tree);
}

/// Consume snap events raised by the physics step: the over-stretched child
/// detaches, remembers its slot, and the remaining siblings re-slot.
pub fn snap_drain_system(
    mut forest: ResMut<TreeForest>,
    active: Res<ActiveTree>,
    mut physics: ResMut<Physics>,
    mut highlight: ResMut<HighlightState>,
    mut status: ResMut<StatusMessage>,
) {
    let events = physics.pop_pending_snaps();
    if events.is_empty() {
        return;
    }
    let Some(key) = active.key().map(str::to_owned) else {
        return;
    };
    for ev in events {
        let still_linked = forest
            .node(&key, ev.child)
            .map(|n| n.parent == ev.parent)
            .unwrap_or(false);
        if !still_linked {
            continue;
        }
        let name = forest
            .node(&key, ev.child)
            .map(|n| n.name.clone())
            .unwrap_or_default();
        forest.record_snap(&key, ev.child, ev.parent);
        if let Some(tree) = forest.tree_mut(&key) {
            if let Some(node) = tree.node_mut(ev.child) {
                node.parent = NO_NODE;
            }
            tree.rebuild();
        }
        forest.mark_dirty(&key);
        physics.set_free_floating(ev.child);
        physics.thaw(ev.child);
        // The old parent's whole subtree re-settles around the gap.
        if let Some(shifts) = forest.layout_subtree_collect_shifts(&key, ev.parent) {
            physics.absorb_layout_shifts(shifts);
        }
        update_offending(&forest, &mut highlight, &key, ev.parent);
        physics.suppress_collisions(1.0);
        status.set(format!("'{name}' snapped off"));
        info!("[SNAP] {} detached from {}", ev.child, ev.parent);
    }
}

/// Keep the red-pulse set and the duplicate-name banner current.
pub fn duplicate_watch_system(
    forest: Res<TreeForest>,
    active: Res<ActiveTree>,
    mut highlight: ResMut<HighlightState>,
    mut status: ResMut<StatusMessage>,
) {
    let Some(key) = active.key() else {
        return;
    };
    let dups = forest.duplicate_name_ids(key);
    highlight.red_pulse.clear();
    highlight.red_pulse.extend(dups.iter().copied());
    let HighlightState {
        red_pulse,
        offending,
        ..
    } = &mut *highlight;
    for (&parent, &child) in offending.iter() {
        red_pulse.insert(parent);
        red_pulse.insert(child);
    }
    if dups.is_empty() {
        status.clear_sticky();
    } else if !status.timer.is_infinite() {
        status.sticky_error("Node with same name found.");
    }
}

/// Create mode: next canvas click spawns a detached node there.
pub fn create_mode_click_system(
    mouse_buttons: Res<ButtonInput<MouseButton>>,
    window_q: Query<&Window, With<PrimaryWindow>>,
    camera_q: Query<(&Camera, &GlobalTransform), With<MainCamera>>,
    mut forest: ResMut<TreeForest>,
    active: Res<ActiveTree>,
    mut physics: ResMut<Physics>,
    mut selection: ResMut<SelectionState>,
    mut status: ResMut<StatusMessage>,
    mut next_mode: ResMut<NextState<EditorMode>>,
) {
    if !mouse_buttons.just_pressed(MouseButton::Left) {
        return;
    }
    let Some(pos) = cursor_world_pos(&window_q, &camera_q) else {
        return;
    };
    let Some(key) = active.key().map(str::to_owned) else {
        status.error("Open a tree before creating nodes");
        next_mode.set(EditorMode::Browse);
        return;
    };
    match forest.create_node(&key, pos) {
        Some(id) => {
            physics.set_free_floating(id);
            selection.select_only(id);
            status.set("Node created. Drag it near a parent and link it.");
            info!("[EDIT] created node {id} in '{key}'");
        }
        None => status.error("Could not create a node here"),
    }
    next_mode.set(EditorMode::Browse);
}

/// Link mode: the pending source becomes a child of the clicked node.
pub fn link_mode_click_system(
    mouse_buttons: Res<ButtonInput<MouseButton>>,
    window_q: Query<&Window, With<PrimaryWindow>>,
    camera_q: Query<(&Camera, &GlobalTransform), With<MainCamera>>,
    mut forest: ResMut<TreeForest>,
    active: Res<ActiveTree>,
    mut physics: ResMut<Physics>,
    mut highlight: ResMut<HighlightState>,
    link_source: Res<LinkSource>,
    mut status: ResMut<StatusMessage>,
    mut next_mode: ResMut<NextState<EditorMode>>,
) {
    if !mouse_buttons.just_pressed(MouseButton::Left) {
        return;
    }
    let Some(pos) = cursor_world_pos(&window_q, &camera_q) else {
        return;
    };
    let Some(key) = active.key().map(str::to_owned) else {
        next_mode.set(EditorMode::Browse);
        return;
    };
    let Some(target) = forest
        .tree(&key)
        .and_then(|t| node_at_pos(t, &physics, pos))
    else {
        status.set("Pick a node to be the parent (Esc to cancel)");
        return;
    };
    let source = link_source.0;
    if source == target {
        status.error("A node can't be its own parent");
        return;
    }
    if !forest.reparent(&key, source, target) {
        status.error("That link would make a loop");
        next_mode.set(EditorMode::Browse);
        return;
    }
    physics.clear_free_floating(source);
    physics.thaw(source);
    let shifts = forest.reposition_children(&key, target);
    physics.absorb_layout_shifts(shifts);
    update_offending(&forest, &mut highlight, &key, target);
    physics.suppress_collisions(2.0);
    let count = forest
        .node(&key, target)
        .map(|n| n.children.len())
        .unwrap_or(0);
    if count >= OFFENDING_CHILDREN {
        status.error(format!("Linked, but that parent now has {count} children"));
    } else {
        status.set("Linked");
    }
    info!("[EDIT] linked {source} under {target}");
    next_mode.set(EditorMode::Browse);
}

/// Reorder mode: first click picks one child, second click swaps slots.
pub fn reorder_mode_click_system(
    mouse_buttons: Res<ButtonInput<MouseButton>>,
    window_q: Query<&Window, With<PrimaryWindow>>,
    camera_q: Query<(&Camera, &GlobalTransform), With<MainCamera>>,
    mut forest: ResMut<TreeForest>,
    active: Res<ActiveTree>,
    mut physics: ResMut<Physics>,
    mut highlight: ResMut<HighlightState>,
    mut selection: ResMut<SelectionState>,
    mut reorder: ResMut<ReorderState>,
    mut status: ResMut<StatusMessage>,
    mut next_mode: ResMut<NextState<EditorMode>>,
) {
    if !mouse_buttons.just_pressed(MouseButton::Left) {
        return;
    }
    let Some(pos) = cursor_world_pos(&window_q, &camera_q) else {
        return;
    };
    let Some(key) = active.key().map(str::to_owned) else {
        next_mode.set(EditorMode::Browse);
        return;
    };
    let Some(hit) = forest
        .tree(&key)
        .and_then(|t| node_at_pos(t, &physics, pos))
    else {
        return;
    };
    if !highlight.pick_targets.contains(&hit) {
        status.error("Pick one of the highlighted siblings");
        return;
    }
    if reorder.picked == NO_NODE {
        reorder.picked = hit;
        status.set("Now pick the sibling to swap with");
        return;
    }
    if reorder.picked != hit {
        forest.swap_children(&key, reorder.parent, reorder.picked, hit);
        let shifts = forest.reposition_children(&key, reorder.parent);
        physics.absorb_layout_shifts(shifts);
        physics.suppress_collisions(2.0);
        status.set("Siblings swapped");
        info!("[EDIT] swapped children {} and {} under {}", reorder.picked, hit, reorder.parent);
    }
    *reorder = ReorderState::default();
    selection.restrict.clear();
    highlight.pick_targets.clear();
    next_mode.set(EditorMode::Browse);
}

/// Escape cancels any modal mode; in browse it just drops the selection.
pub fn cancel_mode_system(
    keys: Res<ButtonInput<KeyCode>>,
    mode: Res<State<EditorMode>>,
    mut selection: ResMut<SelectionState>,
    mut highlight: ResMut<HighlightState>,
    mut reorder: ResMut<ReorderState>,
    mut status: ResMut<StatusMessage>,
    mut next_mode: ResMut<NextState<EditorMode>>,
) {
    if !keys.just_pressed(KeyCode::Escape) {
        return;
    }
    match mode.get() {
        EditorMode::Browse => selection.clear(),
        _ => {
            *reorder = ReorderState::default();
            selection.restrict.clear();
            highlight.pick_targets.clear();
            status.set("Cancelled");
            next_mode.set(EditorMode::Browse);
        }
    }
}

/// Keyboard entry points for the edit modes, mirroring the toolbar buttons.
pub fn mode_shortcut_system(
    keys: Res<ButtonInput<KeyCode>>,
    forest: Res<TreeForest>,
    active: Res<ActiveTree>,
    mut selection: ResMut<SelectionState>,
    mut highlight: ResMut<HighlightState>,
    mut link_source: ResMut<LinkSource>,
    mut reorder: ResMut<ReorderState>,
    mut delete_target: ResMut<crate::core::resources::DeleteTarget>,
    mut status: ResMut<StatusMessage>,
    mode: Res<State<EditorMode>>,
    mut next_mode: ResMut<NextState<EditorMode>>,
) {
    if *mode.get() != EditorMode::Browse {
        return;
    }
    let Some(key) = active.key() else {
        return;
    };
    if keys.just_pressed(KeyCode::KeyN) {
        status.set("Click the canvas to place the new node");
        next_mode.set(EditorMode::Create);
        return;
    }
    if keys.just_pressed(KeyCode::KeyL) && selection.primary != NO_NODE {
        link_source.0 = selection.primary;
        status.set("Click the node that should become the parent");
        next_mode.set(EditorMode::Link);
        return;
    }
    if keys.just_pressed(KeyCode::KeyR) && selection.primary != NO_NODE {
        let children: Vec<NodeId> = forest
            .node(key, selection.primary)
            .map(|n| n.children.clone())
            .unwrap_or_default();
        if children.len() < 2 {
            status.error("Select a parent with at least two children to reorder");
            return;
        }
        reorder.parent = selection.primary;
        reorder.picked = NO_NODE;
        selection.restrict = children.iter().copied().collect();
        highlight.pick_targets = children.into_iter().collect();
        status.set("Pick a child to move");
        next_mode.set(EditorMode::Reorder);
        return;
    }
    if (keys.just_pressed(KeyCode::Delete) || keys.just_pressed(KeyCode::Backspace))
        && selection.primary != NO_NODE
    {
        delete_target.0 = selection.primary;
        next_mode.set(EditorMode::DeleteConfirm);
    }
}

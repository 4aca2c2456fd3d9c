//! Gizmo drawing: edges with tension coloring, selection rings, highlight
//! rings, the box-select rubber band, and the delete effect.

use bevy::prelude::*;

use crate::core::forest::{fnv1a32, TreeForest, NO_NODE};
use crate::core::helpers::NODE_RADIUS;
use crate::core::physics::{Physics, STRETCH_DISTANCE};
use crate::core::resources::{ActiveTree, DragMode, DragState, HighlightState, SelectionState};

const EDGE_SLACK_COLOR: Color = Color::srgb(0.35, 0.42, 0.55);
const EDGE_TENSE_COLOR: Color = Color::srgb(0.95, 0.55, 0.15);
const SELECTED_RING: Color = Color::srgb(0.25, 0.85, 0.45);
const STALE_ID_RING: Color = Color::srgb(0.9, 0.3, 0.3);
const PICK_RING: Color = Color::srgb(0.95, 0.85, 0.3);
const OFFENDING_RING: Color = Color::srgb(0.95, 0.3, 0.3);
const BOX_COLOR: Color = Color::srgb(0.4, 0.7, 0.95);
const ROOT_RING: Color = Color::srgb(0.75, 0.72, 0.55);
const PREMIUM_STAR: Color = Color::srgb(0.95, 0.82, 0.3);

fn mix(a: Color, b: Color, t: f32) -> Color {
    let a = a.to_srgba();
    let b = b.to_srgba();
    Color::srgb(
        a.red + (b.red - a.red) * t,
        a.green + (b.green - a.green) * t,
        a.blue + (b.blue - a.blue) * t,
    )
}

/// Parent→child lines at visible positions. Color shifts toward orange as
/// the edge stretches toward the snap threshold.
pub fn draw_edges_system(
    mut gizmos: Gizmos,
    forest: Res<TreeForest>,
    active: Res<ActiveTree>,
    physics: Res<Physics>,
) {
    let Some(tree) = active.key().and_then(|k| forest.tree(k)) else {
        return;
    };
    for node in &tree.nodes {
        if node.parent == NO_NODE {
            continue;
        }
        let Some(parent) = tree.node(node.parent) else {
            continue;
        };
        let from = physics.visible_pos(parent);
        let to = physics.visible_pos(node);
        let tension = (physics.edge_extension(tree, node.id) / STRETCH_DISTANCE).clamp(0.0, 1.0);
        let color = mix(EDGE_SLACK_COLOR, EDGE_TENSE_COLOR, tension);
        gizmos.line_2d(from, to, color);
        // Short arrowhead at the child end.
        let dir = (to - from).normalize_or_zero();
        if dir != Vec2::ZERO {
            let tip = to - dir * NODE_RADIUS;
            let left = Vec2::new(-dir.y, dir.x);
            gizmos.line_2d(tip, tip - dir * 10.0 + left * 6.0, color);
            gizmos.line_2d(tip, tip - dir * 10.0 - left * 6.0, color);
        }
    }
}

/// Rings and badges over node sprites.
pub fn draw_selection_system(
    mut gizmos: Gizmos,
    forest: Res<TreeForest>,
    active: Res<ActiveTree>,
    physics: Res<Physics>,
    selection: Res<SelectionState>,
    highlight: Res<HighlightState>,
    time: Res<Time>,
) {
    let Some(tree) = active.key().and_then(|k| forest.tree(k)) else {
        return;
    };
    for node in &tree.nodes {
        let pos = physics.visible_pos(node);
        if node.id == tree.root_id {
            gizmos.circle_2d(
                Isometry2d::from_translation(pos),
                NODE_RADIUS + 8.0,
                ROOT_RING,
            );
        }
        if node.premium {
            // Small diamond badge at the top-right corner.
            let c = pos + Vec2::splat(NODE_RADIUS * 0.9);
            gizmos.line_2d(c + Vec2::new(-5.0, 0.0), c + Vec2::new(0.0, 5.0), PREMIUM_STAR);
            gizmos.line_2d(c + Vec2::new(0.0, 5.0), c + Vec2::new(5.0, 0.0), PREMIUM_STAR);
            gizmos.line_2d(c + Vec2::new(5.0, 0.0), c + Vec2::new(0.0, -5.0), PREMIUM_STAR);
            gizmos.line_2d(c + Vec2::new(0.0, -5.0), c + Vec2::new(-5.0, 0.0), PREMIUM_STAR);
        }
        if selection.is_selected(node.id) {
            // Nodes whose id no longer matches their name hash get a red
            // ring so stale ids are visible while editing.
            let ring = if u64::from(fnv1a32(&node.name)) == node.id {
                SELECTED_RING
            } else {
                STALE_ID_RING
            };
            gizmos.circle_2d(Isometry2d::from_translation(pos), NODE_RADIUS + 4.0, ring);
        }
        if highlight.pick_targets.contains(&node.id) {
            gizmos.circle_2d(Isometry2d::from_translation(pos), NODE_RADIUS + 6.0, PICK_RING);
        }
    }
    // Pulsing ring around crowded parents and their newest child.
    let pulse = NODE_RADIUS + 6.0 + ((time.elapsed_secs() * 5.0).sin() * 3.0);
    for (&parent, &child) in &highlight.offending {
        for id in [parent, child] {
            if let Some(node) = tree.node(id) {
                gizmos.circle_2d(
                    Isometry2d::from_translation(physics.visible_pos(node)),
                    pulse,
                    OFFENDING_RING,
                );
            }
        }
    }
}

/// Rubber-band rectangle while a box select is armed.
pub fn draw_box_select_system(
    mut gizmos: Gizmos,
    drag: Res<DragState>,
    window_q: Query<&Window, With<bevy::window::PrimaryWindow>>,
    camera_q: Query<(&Camera, &GlobalTransform), With<crate::render::nodes::MainCamera>>,
) {
    let DragMode::BoxSelect { anchor, armed: true } = drag.0 else {
        return;
    };
    let Some(pos) = crate::input::selection::cursor_world_pos(&window_q, &camera_q) else {
        return;
    };
    let center = (anchor + pos) * 0.5;
    let size = (pos - anchor).abs();
    gizmos.rect_2d(Isometry2d::from_translation(center), size, BOX_COLOR);
}

/// Two tumbling halves with fading alpha where a node was deleted.
pub fn draw_delete_fx_system(mut gizmos: Gizmos, physics: Res<Physics>) {
    for fx in physics.fx() {
        let alpha = fx.alpha();
        let color = fx.color.with_alpha(alpha);
        let half_size = Vec2::new(NODE_RADIUS * 1.2, NODE_RADIUS * 0.55);
        for half in &fx.halves {
            gizmos.rect_2d(
                Isometry2d::new(half.pos, Rot2::radians(half.rot)),
                half_size,
                color,
            );
        }
    }
}

/// Ghost line from the pending link source to the cursor while linking.
pub fn draw_link_preview_system(
    mut gizmos: Gizmos,
    forest: Res<TreeForest>,
    active: Res<ActiveTree>,
    physics: Res<Physics>,
    link_source: Res<crate::core::resources::LinkSource>,
    mode: Res<State<crate::core::state::EditorMode>>,
    window_q: Query<&Window, With<bevy::window::PrimaryWindow>>,
    camera_q: Query<(&Camera, &GlobalTransform), With<crate::render::nodes::MainCamera>>,
) {
    if *mode.get() != crate::core::state::EditorMode::Link {
        return;
    }
    let Some(tree) = active.key().and_then(|k| forest.tree(k)) else {
        return;
    };
    let Some(node) = tree.node(link_source.0) else {
        return;
    };
    let Some(pos) = crate::input::selection::cursor_world_pos(&window_q, &camera_q) else {
        return;
    };
    gizmos.line_2d(physics.visible_pos(node), pos, PICK_RING);
}

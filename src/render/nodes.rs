//! Node entity sync: one sprite plus a label per node of the shown tree.
//!
//! The tree model owns positions; these systems mirror it into ECS entities
//! every frame (spawn missing, despawn stale, retranslate the rest).

use bevy::prelude::*;
use std::collections::{HashMap, HashSet};

use crate::core::config::TrellisConfig;
use crate::core::forest::{NodeId, TreeForest};
use crate::core::helpers::{kind_color, NODE_RADIUS};
use crate::core::physics::Physics;
use crate::core::resources::{ActiveTree, HighlightState};

#[derive(Component)]
pub struct MainCamera;

/// Canvas sprite mirroring one tree node.
#[derive(Component)]
pub struct NodeSprite {
    pub id: NodeId,
    /// Name currently shown in the child label; compared to detect renames.
    pub shown_name: String,
}

#[derive(Component)]
pub struct NodeLabel;

const LABEL_COLOR: Color = Color::srgb(0.85, 0.87, 0.92);
const FROZEN_TINT: Color = Color::srgb(0.62, 0.78, 0.95);
const PULSE_RED: Color = Color::srgb(0.95, 0.25, 0.25);

fn mix(a: Color, b: Color, t: f32) -> Color {
    let a = a.to_srgba();
    let b = b.to_srgba();
    Color::srgb(
        a.red + (b.red - a.red) * t,
        a.green + (b.green - a.green) * t,
        a.blue + (b.blue - a.blue) * t,
    )
}

/// Spawn, despawn, and retranslate node sprites to match the active tree.
pub fn sync_node_sprites_system(
    mut commands: Commands,
    forest: Res<TreeForest>,
    active: Res<ActiveTree>,
    physics: Res<Physics>,
    highlight: Res<HighlightState>,
    config: Res<TrellisConfig>,
    time: Res<Time>,
    mut sprites: Query<(Entity, &NodeSprite, &mut Transform, &mut Sprite)>,
) {
    let tree = active.key().and_then(|k| forest.tree(k));
    let live_ids: HashSet<NodeId> = tree
        .map(|t| t.nodes.iter().map(|n| n.id).collect())
        .unwrap_or_default();

    let mut seen = HashSet::new();
    for (entity, marker, mut transform, mut sprite) in &mut sprites {
        if !live_ids.contains(&marker.id) {
            commands.entity(entity).despawn();
            continue;
        }
        seen.insert(marker.id);
        let Some(node) = tree.and_then(|t| t.node(marker.id)) else {
            continue;
        };
        let pos = physics.visible_pos(node);
        transform.translation.x = pos.x;
        transform.translation.y = pos.y;
        sprite.color = node_fill(node.kind.as_str(), marker.id, &physics, &highlight, &config, &time);
    }

    let Some(tree) = tree else {
        return;
    };
    for node in &tree.nodes {
        if seen.contains(&node.id) {
            continue;
        }
        let pos = physics.visible_pos(node);
        let color = kind_color(&node.kind, config.node_color());
        commands
            .spawn((
                Sprite::from_color(color, Vec2::splat(NODE_RADIUS * 2.0)),
                Transform::from_xyz(pos.x, pos.y, 0.0),
                Visibility::default(),
                NodeSprite {
                    id: node.id,
                    shown_name: node.name.clone(),
                },
            ))
            .with_children(|parent| {
                parent.spawn((
                    Text2d::new(node.name.clone()),
                    TextFont {
                        font_size: config.label_font_size,
                        ..default()
                    },
                    TextColor(LABEL_COLOR),
                    Transform::from_xyz(0.0, -(NODE_RADIUS + 14.0), 1.0),
                    NodeLabel,
                ));
            });
    }
}

fn node_fill(
    kind: &str,
    id: NodeId,
    physics: &Physics,
    highlight: &HighlightState,
    config: &TrellisConfig,
    time: &Time,
) -> Color {
    let mut color = kind_color(kind, config.node_color());
    if physics.is_frozen(id) {
        color = mix(color, FROZEN_TINT, 0.5);
    }
    if highlight.red_pulse.contains(&id) {
        let t = (time.elapsed_secs() * 6.0).sin() * 0.5 + 0.5;
        color = mix(color, PULSE_RED, 0.35 + 0.45 * t);
    }
    color
}

/// When a node is renamed, push the new string into the child label.
pub fn sync_node_labels_system(
    forest: Res<TreeForest>,
    active: Res<ActiveTree>,
    mut sprites: Query<(&mut NodeSprite, &Children)>,
    mut labels: Query<&mut Text2d, With<NodeLabel>>,
) {
    let Some(tree) = active.key().and_then(|k| forest.tree(k)) else {
        return;
    };
    let names: HashMap<NodeId, &str> = tree
        .nodes
        .iter()
        .map(|n| (n.id, n.name.as_str()))
        .collect();
    for (mut marker, children) in &mut sprites {
        let Some(&name) = names.get(&marker.id) else {
            continue;
        };
        if marker.shown_name == name {
            continue;
        }
        marker.shown_name = name.to_string();
        for child in children {
            if let Ok(mut text2d) = labels.get_mut(*child) {
                text2d.clear();
                text2d.push_str(name);
            }
        }
    }
}

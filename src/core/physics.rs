//! Spring/damper physics layered on top of the base layout.
//!
//! Base positions belong to the model; physics only tracks a per-node
//! *offset* from the base plus a velocity. Springs pull the offset back to
//! zero, overlapping nodes shove each other apart, and an edge stretched
//! far enough for long enough raises a snap event for the interaction layer
//! to consume.

use std::collections::{HashMap, HashSet};

use bevy::prelude::*;

use crate::core::forest::{NodeId, UnlockTree, NO_NODE};

pub const SPRING_STIFFNESS: f32 = 15.0;
pub const SPRING_DAMPING: f32 = 6.0;
/// Below both thresholds a node settles and its spring state is dropped.
pub const VELOCITY_THRESHOLD: f32 = 0.1;
pub const OFFSET_THRESHOLD: f32 = 0.5;

pub const COLLISION_RADIUS: f32 = 30.0;
pub const COLLISION_STRENGTH: f32 = 150.0;
/// A node in contact and slower than `FREEZE_VELOCITY` for this long locks up.
pub const FREEZE_TIME: f32 = 0.5;
pub const FREEZE_VELOCITY: f32 = 0.4;

/// Edge extension (visible length minus base length) that arms a snap.
pub const STRETCH_DISTANCE: f32 = 120.0;
/// How long the extension must be held before the snap fires.
pub const STRETCH_HOLD: f32 = 0.35;

/// Simulation steps never exceed this, so window-drag hitches cannot
/// launch nodes across the canvas.
pub const MAX_STEP: f32 = 0.1;

/// Velocity kick applied alongside a base shift, opposing the shift.
const BASE_SHIFT_KICK: f32 = 8.0;

const FX_LIFETIME: f32 = 0.6;

/// An edge held over-stretched long enough; parent/child of the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapEvent {
    pub parent: NodeId,
    pub child: NodeId,
}

/// One half of a deleted node, tumbling away.
#[derive(Debug, Clone, Copy)]
pub struct FxHalf {
    pub pos: Vec2,
    pub vel: Vec2,
    pub rot: f32,
    pub spin: f32,
}

/// Short-lived split-in-two animation played where a node was deleted.
#[derive(Debug, Clone)]
pub struct DeleteFx {
    pub halves: [FxHalf; 2],
    pub color: Color,
    pub age: f32,
}

impl DeleteFx {
    pub fn alpha(&self) -> f32 {
        (1.0 - self.age / FX_LIFETIME).clamp(0.0, 1.0)
    }
}

#[derive(Resource, Default)]
pub struct Physics {
    offsets: HashMap<NodeId, Vec2>,
    velocities: HashMap<NodeId, Vec2>,
    /// Detached nodes that should hold their offset instead of springing home.
    free_floating: HashSet<NodeId>,
    frozen: HashSet<NodeId>,
    contact_time: HashMap<NodeId, f32>,
    dragged: Option<NodeId>,
    suppress_timer: f32,
    stretch_time: HashMap<(NodeId, NodeId), f32>,
    stretch_fired: HashSet<(NodeId, NodeId)>,
    pending_snaps: Vec<SnapEvent>,
    fx: Vec<DeleteFx>,
    /// Saved (free_floating, frozen) flags per node while a group drag runs.
    group_saved: Option<HashMap<NodeId, (bool, bool)>>,
}

impl Physics {
    pub fn offset_of(&self, id: NodeId) -> Vec2 {
        self.offsets.get(&id).copied().unwrap_or(Vec2::ZERO)
    }

    /// Visible position: base plus physics offset.
    pub fn visible_pos(&self, node: &crate::core::forest::TreeNode) -> Vec2 {
        node.pos() + self.offset_of(node.id)
    }

    pub fn set_offset(&mut self, id: NodeId, offset: Vec2) {
        self.offsets.insert(id, offset);
        self.velocities.insert(id, Vec2::ZERO);
    }

    pub fn clear_offset(&mut self, id: NodeId) {
        self.offsets.remove(&id);
        self.velocities.remove(&id);
        self.contact_time.remove(&id);
    }

    pub fn reset(&mut self) {
        *self = Self {
            fx: std::mem::take(&mut self.fx),
            ..Default::default()
        };
    }

    /// Move the visible point with a base shift: the base moved by `delta`,
    /// so the offset absorbs `-delta` and the spring gets a kick to swing
    /// the node back toward its new base.
    pub fn apply_base_shift(&mut self, id: NodeId, delta: Vec2) {
        if delta == Vec2::ZERO {
            return;
        }
        *self.offsets.entry(id).or_insert(Vec2::ZERO) -= delta;
        *self.velocities.entry(id).or_insert(Vec2::ZERO) += -delta * BASE_SHIFT_KICK;
    }

    /// Absorb a batch of layout shifts (`id` → old − new position): each
    /// node's base moved by the negated shift, so the visible point stays
    /// put and the spring swings it to the new slot. Thaws as it goes so
    /// frozen nodes follow the new layout.
    pub fn absorb_layout_shifts(&mut self, shifts: impl IntoIterator<Item = (NodeId, Vec2)>) {
        for (id, shift) in shifts {
            self.thaw(id);
            self.apply_base_shift(id, -shift);
        }
    }

    pub fn set_free_floating(&mut self, id: NodeId) {
        self.free_floating.insert(id);
    }

    pub fn clear_free_floating(&mut self, id: NodeId) {
        self.free_floating.remove(&id);
    }

    pub fn is_free_floating(&self, id: NodeId) -> bool {
        self.free_floating.contains(&id)
    }

    pub fn freeze(&mut self, id: NodeId) {
        self.frozen.insert(id);
        self.velocities.insert(id, Vec2::ZERO);
    }

    pub fn thaw(&mut self, id: NodeId) {
        self.frozen.remove(&id);
        self.contact_time.remove(&id);
    }

    pub fn is_frozen(&self, id: NodeId) -> bool {
        self.frozen.contains(&id)
    }

    pub fn set_dragged(&mut self, id: Option<NodeId>) {
        self.dragged = id;
    }

    pub fn dragged(&self) -> Option<NodeId> {
        self.dragged
    }

    /// Pause collision forces for `secs` so a fresh layout change can settle
    /// without the shove fighting it.
    pub fn suppress_collisions(&mut self, secs: f32) {
        self.suppress_timer = self.suppress_timer.max(secs);
    }

    pub fn collisions_suppressed(&self) -> bool {
        self.suppress_timer > 0.0
    }

    /// Mark a multi-selection as one rigid unit for the duration of a drag,
    /// remembering each node's flags for `end_group_drag`.
    pub fn start_group_drag(&mut self, ids: &HashSet<NodeId>) {
        let mut saved = HashMap::new();
        for &id in ids {
            saved.insert(id, (self.free_floating.contains(&id), self.frozen.contains(&id)));
            self.free_floating.insert(id);
            self.frozen.insert(id);
            self.velocities.insert(id, Vec2::ZERO);
        }
        self.group_saved = Some(saved);
    }

    /// Restore the flags captured by `start_group_drag`.
    pub fn end_group_drag(&mut self) {
        if let Some(saved) = self.group_saved.take() {
            for (id, (was_free, was_frozen)) in saved {
                if !was_free {
                    self.free_floating.remove(&id);
                }
                if !was_frozen {
                    self.frozen.remove(&id);
                }
            }
        }
    }

    pub fn group_drag_active(&self) -> bool {
        self.group_saved.is_some()
    }

    pub fn start_delete_fx(&mut self, pos: Vec2, color: Color) {
        self.fx.push(DeleteFx {
            halves: [
                FxHalf {
                    pos,
                    vel: Vec2::new(-45.0, 30.0),
                    rot: 0.0,
                    spin: -3.5,
                },
                FxHalf {
                    pos,
                    vel: Vec2::new(45.0, 18.0),
                    rot: 0.0,
                    spin: 2.8,
                },
            ],
            color,
            age: 0.0,
        });
    }

    pub fn fx(&self) -> &[DeleteFx] {
        &self.fx
    }

    /// Drain snap events raised since the last call.
    pub fn pop_pending_snaps(&mut self) -> Vec<SnapEvent> {
        std::mem::take(&mut self.pending_snaps)
    }

    /// Advance one frame. `tree` provides base positions and edges; pass the
    /// currently shown tree.
    pub fn update(&mut self, dt: f32, tree: &UnlockTree) {
        let dt = dt.min(MAX_STEP);
        if dt <= 0.0 {
            return;
        }
        if self.suppress_timer > 0.0 {
            self.suppress_timer = (self.suppress_timer - dt).max(0.0);
        }
        self.step_fx(dt);

        let in_contact = if self.suppress_timer <= 0.0 {
            self.step_collisions(dt, tree)
        } else {
            HashSet::new()
        };
        self.step_freeze(dt, &in_contact);
        self.step_springs(dt);
        self.step_stretch(dt, tree);
    }

    fn step_fx(&mut self, dt: f32) {
        for fx in &mut self.fx {
            fx.age += dt;
            for half in &mut fx.halves {
                half.pos += half.vel * dt;
                half.vel.y -= 60.0 * dt;
                half.rot += half.spin * dt;
            }
        }
        self.fx.retain(|fx| fx.age < FX_LIFETIME);
    }

    /// Pairwise shove between overlapping visible nodes. Returns the ids
    /// that were in contact this frame.
    fn step_collisions(&mut self, dt: f32, tree: &UnlockTree) -> HashSet<NodeId> {
        let mut in_contact = HashSet::new();
        let positions: Vec<(NodeId, Vec2)> = tree
            .nodes
            .iter()
            .map(|n| (n.id, n.pos() + self.offset_of(n.id)))
            .collect();
        let min_dist = COLLISION_RADIUS * 2.0;
        for i in 0..positions.len() {
            for j in (i + 1)..positions.len() {
                let (a, pa) = positions[i];
                let (b, pb) = positions[j];
                let mut diff = pb - pa;
                let mut dist = diff.length();
                if dist >= min_dist {
                    continue;
                }
                if dist <= 0.001 {
                    // Exactly stacked nodes still need a direction to part in.
                    diff = Vec2::X;
                    dist = 0.001;
                }
                in_contact.insert(a);
                in_contact.insert(b);
                let overlap = min_dist - dist;
                let push = overlap * COLLISION_STRENGTH * dt;
                let dir = diff / dist;
                let targets = [(a, -dir), (b, dir)];
                for (id, d) in targets {
                    if self.frozen.contains(&id) || self.dragged == Some(id) {
                        continue;
                    }
                    *self.offsets.entry(id).or_insert(Vec2::ZERO) += d * push * 0.5;
                    *self.velocities.entry(id).or_insert(Vec2::ZERO) += d * push * 2.0;
                }
            }
        }
        in_contact
    }

    fn step_freeze(&mut self, dt: f32, in_contact: &HashSet<NodeId>) {
        // A frozen node stays locked only while something still overlaps it.
        // Nodes pinned by a group drag keep their flags until release.
        let thawed: Vec<NodeId> = self
            .frozen
            .iter()
            .copied()
            .filter(|id| !in_contact.contains(id))
            .filter(|id| {
                self.group_saved
                    .as_ref()
                    .is_none_or(|saved| !saved.contains_key(id))
            })
            .collect();
        for id in thawed {
            self.thaw(id);
        }
        let ids: Vec<NodeId> = self.offsets.keys().copied().collect();
        for id in ids {
            if self.frozen.contains(&id) || self.dragged == Some(id) {
                continue;
            }
            let speed = self
                .velocities
                .get(&id)
                .map(|v| v.length())
                .unwrap_or(0.0);
            if in_contact.contains(&id) && speed < FREEZE_VELOCITY {
                let t = self.contact_time.entry(id).or_insert(0.0);
                *t += dt;
                if *t >= FREEZE_TIME {
                    self.freeze(id);
                }
            } else {
                self.contact_time.remove(&id);
            }
        }
    }

    fn step_springs(&mut self, dt: f32) {
        let ids: Vec<NodeId> = self.offsets.keys().copied().collect();
        let mut settled = Vec::new();
        for id in ids {
            if self.frozen.contains(&id)
                || self.free_floating.contains(&id)
                || self.dragged == Some(id)
            {
                continue;
            }
            let offset = self.offset_of(id);
            let vel = self.velocities.entry(id).or_insert(Vec2::ZERO);
            *vel += (-offset * SPRING_STIFFNESS - *vel * SPRING_DAMPING) * dt;
            let vel = *vel;
            let offset = offset + vel * dt;
            self.offsets.insert(id, offset);
            if vel.length() < VELOCITY_THRESHOLD && offset.length() < OFFSET_THRESHOLD {
                settled.push(id);
            }
        }
        for id in settled {
            self.clear_offset(id);
        }
    }

    /// Track per-edge over-extension and raise a snap once it has been held
    /// long enough. Fired edges stay latched until they relax.
    fn step_stretch(&mut self, dt: f32, tree: &UnlockTree) {
        let mut live_edges = HashSet::new();
        for node in &tree.nodes {
            if node.parent == NO_NODE {
                continue;
            }
            let Some(parent) = tree.node(node.parent) else {
                continue;
            };
            let key = (parent.id, node.id);
            live_edges.insert(key);
            let base_len = (node.pos() - parent.pos()).length();
            let vis_len = (self.visible_pos(node) - self.visible_pos(parent)).length();
            let extension = vis_len - base_len;
            if extension > STRETCH_DISTANCE {
                if self.stretch_fired.contains(&key) {
                    continue;
                }
                let t = self.stretch_time.entry(key).or_insert(0.0);
                *t += dt;
                if *t >= STRETCH_HOLD {
                    self.stretch_fired.insert(key);
                    self.stretch_time.remove(&key);
                    self.pending_snaps.push(SnapEvent {
                        parent: parent.id,
                        child: node.id,
                    });
                }
            } else {
                self.stretch_time.remove(&key);
                self.stretch_fired.remove(&key);
            }
        }
        self.stretch_time.retain(|k, _| live_edges.contains(k));
        self.stretch_fired.retain(|k| live_edges.contains(k));
    }

    /// Current extension of the edge into `node`, for rendering tension.
    pub fn edge_extension(&self, tree: &UnlockTree, child: NodeId) -> f32 {
        let Some(node) = tree.node(child) else {
            return 0.0;
        };
        let Some(parent) = tree.node(node.parent) else {
            return 0.0;
        };
        let base_len = (node.pos() - parent.pos()).length();
        let vis_len = (self.visible_pos(node) - self.visible_pos(parent)).length();
        (vis_len - base_len).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::forest::{TreeNode, UnlockTree};

    const DT: f32 = 1.0 / 60.0;

    fn node_at(id: NodeId, parent: NodeId, x: f32, y: f32) -> TreeNode {
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
            x,
            y,
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
    fn spring_converges_and_drops_state() {
        let tree = tree_with(vec![node_at(1, 0, 0.0, 0.0)]);
        let mut phys = Physics::default();
        phys.set_offset(1, Vec2::new(100.0, 40.0));
        for _ in 0..600 {
            phys.update(DT, &tree);
        }
        assert_eq!(phys.offset_of(1), Vec2::ZERO);
    }

    #[test]
    fn free_floating_holds_offset() {
        let tree = tree_with(vec![node_at(1, 0, 0.0, 0.0)]);
        let mut phys = Physics::default();
        phys.set_offset(1, Vec2::new(100.0, 0.0));
        phys.set_free_floating(1);
        for _ in 0..120 {
            phys.update(DT, &tree);
        }
        assert_eq!(phys.offset_of(1), Vec2::new(100.0, 0.0));
    }

    #[test]
    fn base_shift_keeps_visible_position() {
        let mut phys = Physics::default();
        phys.set_offset(7, Vec2::new(10.0, 0.0));
        let delta = Vec2::new(25.0, -15.0);
        phys.apply_base_shift(7, delta);
        // Base moved by delta, offset absorbed -delta: visible point unchanged.
        assert_eq!(phys.offset_of(7), Vec2::new(10.0, 0.0) - delta);
    }

    #[test]
    fn overlapping_nodes_separate_or_freeze() {
        let mut tree = tree_with(vec![node_at(1, 0, 0.0, 0.0), node_at(2, 0, 1.0, 0.0)]);
        tree.recompute_bounds();
        let mut phys = Physics::default();
        let initial = 1.0;
        phys.update(DT, &tree);
        let d1 = (tree.nodes[1].pos() + phys.offset_of(2)
            - tree.nodes[0].pos()
            - phys.offset_of(1))
        .length();
        assert!(d1 > initial, "first step must push the pair apart");
        let mut reached = false;
        for _ in 0..600 {
            phys.update(DT, &tree);
            let d = (tree.nodes[1].pos() + phys.offset_of(2)
                - tree.nodes[0].pos()
                - phys.offset_of(1))
            .length();
            if d >= COLLISION_RADIUS * 2.0 {
                reached = true;
                break;
            }
        }
        assert!(
            reached || phys.is_frozen(1) || phys.is_frozen(2),
            "pair must separate fully or lock up"
        );
    }

    #[test]
    fn exactly_stacked_nodes_still_separate() {
        let tree = tree_with(vec![node_at(1, 0, 50.0, 50.0), node_at(2, 0, 50.0, 50.0)]);
        let mut phys = Physics::default();
        phys.update(DT, &tree);
        assert!(phys.offset_of(1) != phys.offset_of(2));
    }

    #[test]
    fn suppression_pauses_collisions() {
        let tree = tree_with(vec![node_at(1, 0, 0.0, 0.0), node_at(2, 0, 1.0, 0.0)]);
        let mut phys = Physics::default();
        phys.suppress_collisions(1.0);
        phys.update(DT, &tree);
        assert_eq!(phys.offset_of(1), Vec2::ZERO);
        assert_eq!(phys.offset_of(2), Vec2::ZERO);
        // Timer runs out and the shove resumes.
        for _ in 0..70 {
            phys.update(DT, &tree);
        }
        assert!(!phys.collisions_suppressed());
        assert!(phys.offset_of(1) != Vec2::ZERO);
    }

    #[test]
    fn dragged_node_ignores_spring_and_shove() {
        let tree = tree_with(vec![node_at(1, 0, 0.0, 0.0), node_at(2, 0, 1.0, 0.0)]);
        let mut phys = Physics::default();
        phys.set_dragged(Some(1));
        phys.set_offset(1, Vec2::new(40.0, 0.0));
        for _ in 0..60 {
            phys.update(DT, &tree);
        }
        assert_eq!(phys.offset_of(1), Vec2::new(40.0, 0.0));
    }

    #[test]
    fn held_stretch_fires_snap_once() {
        // Child base 100 above parent, visible point pulled 200 further.
        let tree = tree_with(vec![node_at(1, 0, 0.0, 0.0), node_at(2, 1, 0.0, 100.0)]);
        let mut phys = Physics::default();
        phys.set_free_floating(2);
        phys.set_offset(2, Vec2::new(0.0, 200.0));
        let mut events = Vec::new();
        for _ in 0..30 {
            phys.update(DT, &tree);
            events.extend(phys.pop_pending_snaps());
        }
        assert_eq!(events, vec![SnapEvent { parent: 1, child: 2 }]);
        // Latched: holding the stretch does not refire.
        for _ in 0..30 {
            phys.update(DT, &tree);
        }
        assert!(phys.pop_pending_snaps().is_empty());
    }

    #[test]
    fn brief_stretch_does_not_fire() {
        let tree = tree_with(vec![node_at(1, 0, 0.0, 0.0), node_at(2, 1, 0.0, 100.0)]);
        let mut phys = Physics::default();
        phys.set_free_floating(2);
        phys.set_offset(2, Vec2::new(0.0, 200.0));
        for _ in 0..10 {
            phys.update(DT, &tree);
        }
        phys.set_offset(2, Vec2::ZERO);
        phys.update(DT, &tree);
        phys.set_offset(2, Vec2::new(0.0, 200.0));
        for _ in 0..10 {
            phys.update(DT, &tree);
        }
        assert!(phys.pop_pending_snaps().is_empty());
    }

    #[test]
    fn frozen_node_thaws_once_clear_of_contact() {
        let tree = tree_with(vec![node_at(1, 0, 0.0, 0.0), node_at(2, 0, 500.0, 0.0)]);
        let mut phys = Physics::default();
        phys.freeze(1);
        phys.update(DT, &tree);
        assert!(!phys.is_frozen(1), "nothing overlaps node 1 any more");
    }

    #[test]
    fn frozen_node_stays_frozen_while_overlapped() {
        // Node 2 is frozen too, so the pair never separates.
        let tree = tree_with(vec![node_at(1, 0, 0.0, 0.0), node_at(2, 0, 1.0, 0.0)]);
        let mut phys = Physics::default();
        phys.freeze(1);
        phys.freeze(2);
        for _ in 0..60 {
            phys.update(DT, &tree);
        }
        assert!(phys.is_frozen(1) && phys.is_frozen(2));
    }

    #[test]
    fn group_drag_keeps_members_frozen_out_of_contact() {
        let tree = tree_with(vec![node_at(1, 0, 0.0, 0.0), node_at(2, 0, 500.0, 0.0)]);
        let mut phys = Physics::default();
        phys.start_group_drag(&HashSet::from([1, 2]));
        phys.update(DT, &tree);
        assert!(phys.is_frozen(1) && phys.is_frozen(2));
        phys.end_group_drag();
        phys.update(DT, &tree);
        assert!(!phys.is_frozen(1) && !phys.is_frozen(2));
    }

    #[test]
    fn group_drag_saves_and_restores_flags() {
        let mut phys = Physics::default();
        phys.set_free_floating(1);
        phys.freeze(3);
        let ids = HashSet::from([1, 2, 3]);
        phys.start_group_drag(&ids);
        assert!(phys.group_drag_active());
        assert!(phys.is_free_floating(2) && phys.is_frozen(2));
        phys.end_group_drag();
        assert!(phys.is_free_floating(1));
        assert!(!phys.is_free_floating(2));
        assert!(!phys.is_frozen(2));
        assert!(phys.is_frozen(3));
    }

    #[test]
    fn delete_fx_expires() {
        let tree = tree_with(vec![]);
        let mut phys = Physics::default();
        phys.start_delete_fx(Vec2::ZERO, Color::WHITE);
        assert_eq!(phys.fx().len(), 1);
        phys.update(DT, &tree);
        assert!(phys.fx()[0].alpha() < 1.0);
        for _ in 0..60 {
            phys.update(DT, &tree);
        }
        assert!(phys.fx().is_empty());
    }

    #[test]
    fn huge_dt_is_clamped() {
        let tree = tree_with(vec![node_at(1, 0, 0.0, 0.0)]);
        let mut phys = Physics::default();
        phys.set_offset(1, Vec2::new(100.0, 0.0));
        phys.update(10.0, &tree);
        // One clamped step cannot overshoot past the base.
        assert!(phys.offset_of(1).length() < 100.0);
        assert!(phys.offset_of(1).x > -100.0);
    }
}

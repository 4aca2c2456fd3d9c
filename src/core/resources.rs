//! Resources shared by the editor systems.

use bevy::prelude::*;
use std::collections::{HashMap, HashSet};

use crate::core::forest::{NodeId, NO_NODE};

/// Key of the tree currently shown on the canvas, if any.
#[derive(Resource, Default)]
pub struct ActiveTree(pub Option<String>);

impl ActiveTree {
    pub fn key(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

/// Transient status / error message displayed in the bottom bar.
/// `timer` counts down in seconds; the message is visible while `timer > 0`.
/// Sticky messages (duplicate-name errors) use an infinite timer and are
/// cleared explicitly.
#[derive(Resource)]
pub struct StatusMessage {
    pub text: String,
    pub timer: f32,
    pub error: bool,
    /// Seconds a non-sticky message stays up. Overridden from config at startup.
    pub default_duration: f32,
}

impl Default for StatusMessage {
    fn default() -> Self {
        Self {
            text: String::new(),
            timer: 0.0,
            error: false,
            default_duration: 4.0,
        }
    }
}

impl StatusMessage {
    pub fn set(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.timer = self.default_duration;
        self.error = false;
    }

    pub fn error(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.timer = self.default_duration;
        self.error = true;
    }

    /// An error that stays up until `clear_sticky` is called.
    pub fn sticky_error(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.timer = f32::INFINITY;
        self.error = true;
    }

    pub fn clear_sticky(&mut self) {
        if self.timer.is_infinite() {
            self.text.clear();
            self.timer = 0.0;
            self.error = false;
        }
    }

    pub fn visible(&self) -> bool {
        self.timer > 0.0 && !self.text.is_empty()
    }
}

/// Node selection for the active tree. `primary` drives the inspector;
/// `selected` is the full multi-selection. When `restrict` is non-empty only
/// those ids can be picked (reorder mode).
#[derive(Resource, Default)]
pub struct SelectionState {
    pub primary: NodeId,
    pub selected: HashSet<NodeId>,
    pub restrict: HashSet<NodeId>,
}

impl SelectionState {
    pub fn allowed(&self, id: NodeId) -> bool {
        self.restrict.is_empty() || self.restrict.contains(&id)
    }

    pub fn select_only(&mut self, id: NodeId) {
        self.primary = id;
        self.selected.clear();
        self.selected.insert(id);
    }

    pub fn toggle(&mut self, id: NodeId) {
        if !self.allowed(id) {
            return;
        }
        if self.selected.remove(&id) {
            if self.primary == id {
                self.primary = self.selected.iter().copied().next().unwrap_or(NO_NODE);
            }
        } else {
            self.selected.insert(id);
            self.primary = id;
        }
    }

    pub fn clear(&mut self) {
        self.primary = NO_NODE;
        self.selected.clear();
    }

    pub fn is_selected(&self, id: NodeId) -> bool {
        self.selected.contains(&id)
    }

    pub fn has_selection(&self) -> bool {
        !self.selected.is_empty()
    }
}

/// Highlight overlays for the active tree.
#[derive(Resource, Default)]
pub struct HighlightState {
    /// Nodes pulsing red (duplicate names, crowded-parent flags).
    pub red_pulse: HashSet<NodeId>,
    /// Parents with too many children, each with the child that tipped them.
    pub offending: HashMap<NodeId, NodeId>,
    /// Clickable candidates while reordering.
    pub pick_targets: HashSet<NodeId>,
}

impl HighlightState {
    pub fn clear(&mut self) {
        self.red_pulse.clear();
        self.offending.clear();
        self.pick_targets.clear();
    }
}

/// What the left mouse button is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum DragMode {
    #[default]
    Idle,
    /// Dragging a detached node's physics offset; `grab` is the cursor's
    /// offset from the node's visible position at press time.
    FreeNode { id: NodeId, grab: Vec2 },
    /// Dragging a base position with a falloff wake below it.
    Subtree { id: NodeId, grab: Vec2 },
    /// Dragging a root: the whole tree's bases move.
    Tree { id: NodeId, grab: Vec2 },
    /// Rubber-band selection; `armed` flips once the cursor travels far
    /// enough from the anchor to count as a drag.
    BoxSelect { anchor: Vec2, armed: bool },
}

#[derive(Resource, Default)]
pub struct DragState(pub DragMode);

/// Source node picked before entering link mode.
#[derive(Resource, Default)]
pub struct LinkSource(pub NodeId);

/// Node awaiting delete confirmation.
#[derive(Resource, Default)]
pub struct DeleteTarget(pub NodeId);

/// Reorder mode bookkeeping: whose children, and which child is picked up.
#[derive(Resource, Default)]
pub struct ReorderState {
    pub parent: NodeId,
    pub picked: NodeId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_adds_and_removes() {
        let mut sel = SelectionState::default();
        sel.toggle(5);
        assert!(sel.is_selected(5));
        assert_eq!(sel.primary, 5);
        sel.toggle(7);
        assert_eq!(sel.selected.len(), 2);
        sel.toggle(7);
        assert!(!sel.is_selected(7));
        assert_eq!(sel.primary, 5);
    }

    #[test]
    fn restrict_blocks_other_ids() {
        let mut sel = SelectionState::default();
        sel.restrict = HashSet::from([1, 2]);
        sel.toggle(9);
        assert!(!sel.has_selection());
        sel.toggle(2);
        assert!(sel.is_selected(2));
    }

    #[test]
    fn sticky_error_survives_and_clears() {
        let mut status = StatusMessage::default();
        status.sticky_error("duplicate");
        assert!(status.visible());
        status.clear_sticky();
        assert!(!status.visible());
        // Non-sticky messages are untouched by clear_sticky.
        status.set("hello");
        status.clear_sticky();
        assert!(status.visible());
    }
}

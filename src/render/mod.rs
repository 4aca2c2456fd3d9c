//! Canvas rendering: node sprites/labels and gizmo overlays.

pub mod edges;
pub mod nodes;

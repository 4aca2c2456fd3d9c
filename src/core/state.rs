//! Editor mode state machine.

use bevy::prelude::*;

#[derive(States, Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum EditorMode {
    #[default]
    Browse,
    /// Next canvas click spawns a detached node.
    Create,
    /// Next node click becomes the new parent of the pending source.
    Link,
    /// Clicks pick and swap direct children of one parent.
    Reorder,
    /// Modal confirmation before a node is removed.
    DeleteConfirm,
}

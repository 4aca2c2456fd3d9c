//! Input handling: mouse interaction, edit modes, and camera control.

pub mod camera;
pub mod selection;

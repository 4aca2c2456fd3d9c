//! Small shared helpers: node geometry, keyboard chords, kind palette.

use bevy::prelude::*;

/// Visual radius of a node on the canvas. Picking and collision both key
/// off this.
pub const NODE_RADIUS: f32 = 30.0;

pub fn shift_pressed(keys: &ButtonInput<KeyCode>) -> bool {
    keys.pressed(KeyCode::ShiftLeft) || keys.pressed(KeyCode::ShiftRight)
}

pub fn ctrl_or_cmd_pressed(keys: &ButtonInput<KeyCode>) -> bool {
    keys.pressed(KeyCode::ControlLeft)
        || keys.pressed(KeyCode::ControlRight)
        || keys.pressed(KeyCode::SuperLeft)
        || keys.pressed(KeyCode::SuperRight)
}

/// Fill color per node kind. Unknown kinds get the configured fallback.
pub fn kind_color(kind: &str, fallback: Color) -> Color {
    match kind.to_lowercase().as_str() {
        "outfit" => Color::srgb(0.55, 0.70, 0.95),
        "hair" => Color::srgb(0.80, 0.65, 0.45),
        "mask" => Color::srgb(0.70, 0.55, 0.85),
        "cape" => Color::srgb(0.90, 0.50, 0.50),
        "music" | "music_sheet" => Color::srgb(0.50, 0.80, 0.70),
        "emote" | "emote_upgrade" => Color::srgb(0.95, 0.80, 0.45),
        "stance" => Color::srgb(0.60, 0.85, 0.50),
        "call" => Color::srgb(0.45, 0.75, 0.85),
        "prop" => Color::srgb(0.75, 0.75, 0.55),
        "blessing" | "seasonal heart" => Color::srgb(0.85, 0.55, 0.75),
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_kinds_have_distinct_colors() {
        let fallback = Color::srgb(0.5, 0.5, 0.5);
        let outfit = kind_color("outfit", fallback);
        let cape = kind_color("Cape", fallback);
        assert_ne!(outfit.to_srgba(), cape.to_srgba());
        assert_ne!(outfit.to_srgba(), fallback.to_srgba());
    }

    #[test]
    fn unknown_kind_uses_fallback() {
        let fallback = Color::srgb(0.1, 0.2, 0.3);
        assert_eq!(kind_color("mystery", fallback).to_srgba(), fallback.to_srgba());
    }
}

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

/// Application configuration loaded from `~/.trellisrc`.
#[derive(Debug, Clone, Serialize, Deserialize, Resource)]
pub struct TrellisConfig {
    /// Background color of the canvas in hex format (e.g., "#1e1e2e").
    pub background_color: String,
    /// Fallback node fill color for kinds without a palette entry.
    pub node_color: String,
    /// Tree keys starting with any of these prefixes are listed as guides.
    #[serde(default = "default_guide_prefixes")]
    pub guide_prefixes: Vec<String>,
    #[serde(default = "default_status_message_duration")]
    pub status_message_duration: f32,
    #[serde(default = "default_zoom_step")]
    pub zoom_step: f32,
    #[serde(default = "default_label_font_size")]
    pub label_font_size: f32,
}

fn default_guide_prefixes() -> Vec<String> {
    vec!["quest".to_string(), "tgc_".to_string()]
}
fn default_status_message_duration() -> f32 { 4.0 }
fn default_zoom_step() -> f32 { 0.1 }
fn default_label_font_size() -> f32 { 13.0 }

impl Default for TrellisConfig {
    fn default() -> Self {
        Self {
            background_color: "#1e1e2e".to_string(), // Catppuccin Mocha Base
            node_color: "#313244".to_string(),       // Catppuccin Mocha Surface0
            guide_prefixes: default_guide_prefixes(),
            status_message_duration: default_status_message_duration(),
            zoom_step: default_zoom_step(),
            label_font_size: default_label_font_size(),
        }
    }
}

impl TrellisConfig {
    /// Parse the background hex string into a Bevy Color.
    pub fn bg_color(&self) -> Color {
        bevy::color::Srgba::hex(&self.background_color)
            .unwrap_or(bevy::color::Srgba::new(0.12, 0.12, 0.18, 1.0))
            .into()
    }

    /// Parse the fallback node hex string into a Bevy Color.
    pub fn node_color(&self) -> Color {
        bevy::color::Srgba::hex(&self.node_color)
            .unwrap_or(bevy::color::Srgba::new(0.38, 0.44, 0.52, 1.0))
            .into()
    }
}

/// Attempts to load the configuration from `~/.trellisrc`.
/// Falls back to default if the file is missing or invalid.
pub fn load_config() -> TrellisConfig {
    if let Ok(home) = env::var("HOME") {
        let path = PathBuf::from(home).join(".trellisrc");
        if let Ok(contents) = fs::read_to_string(path) {
            match toml::from_str(&contents) {
                Ok(config) => return config,
                Err(err) => {
                    eprintln!("Failed to parse ~/.trellisrc: {}", err);
                }
            }
        }
    }
    TrellisConfig::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_valid_colors() {
        let config = TrellisConfig::default();
        assert_eq!(config.background_color, "#1e1e2e");
        assert_eq!(config.node_color, "#313244");
        assert_eq!(config.guide_prefixes, vec!["quest", "tgc_"]);
    }

    #[test]
    fn bg_color_parses_hex() {
        let config = TrellisConfig {
            background_color: "#ff0000".to_string(),
            node_color: "#00ff00".to_string(),
            ..Default::default()
        };
        let bg = config.bg_color();
        let srgba = bg.to_srgba();
        assert!((srgba.red - 1.0).abs() < 0.01);
        assert!(srgba.green.abs() < 0.01);
        assert!(srgba.blue.abs() < 0.01);
    }

    #[test]
    fn invalid_hex_falls_back() {
        let config = TrellisConfig {
            background_color: "not_a_color".to_string(),
            node_color: "also_bad".to_string(),
            ..Default::default()
        };
        // Should not panic, should fall back to defaults
        let _bg = config.bg_color();
        let _nc = config.node_color();
    }

    #[test]
    fn toml_roundtrip() {
        let config = TrellisConfig {
            background_color: "#282a36".to_string(),
            node_color: "#44475a".to_string(),
            ..Default::default()
        };
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: TrellisConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.background_color, "#282a36");
        assert_eq!(parsed.node_color, "#44475a");
    }

    #[test]
    fn minimal_toml_uses_field_defaults() {
        let minimal = r##"
background_color = "#1e1e2e"
node_color = "#313244"
"##;
        let parsed: TrellisConfig = toml::from_str(minimal).unwrap();
        assert_eq!(parsed.guide_prefixes, vec!["quest", "tgc_"]);
        assert_eq!(parsed.status_message_duration, 4.0);
        assert_eq!(parsed.zoom_step, 0.1);
    }

    #[test]
    fn load_config_returns_default_when_no_file() {
        // load_config falls back to default when file doesn't exist
        // This test just asserts it doesn't panic
        let config = load_config();
        assert!(!config.background_color.is_empty());
        assert!(!config.node_color.is_empty());
    }
}

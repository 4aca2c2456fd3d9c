//! Save/load pipeline for flat unlock-tree catalog files (.json).

use bevy::prelude::*;
use std::path::{Path, PathBuf};

use crate::core::forest::{NodeRecord, TreeForest};

/// Default path for keyboard shortcut save/load when no file is open.
pub const WORKSPACE_PATH: &str = "unlock_trees.json";

const RECENT_FILE: &str = ".trellis_recent.json";
pub const MAX_RECENT: usize = 10;

/// Recent files list, persisted to .trellis_recent.json in the working dir.
#[derive(Resource, Default)]
pub struct RecentFiles(pub Vec<PathBuf>);

/// Load recent files from disk. Call on startup.
pub fn load_recent() -> Vec<PathBuf> {
    let path = std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(RECENT_FILE);
    let Ok(data) = std::fs::read_to_string(&path) else {
        return Vec::new();
    };
    serde_json::from_str(&data).unwrap_or_default()
}

/// Save recent files to disk.
pub fn save_recent(paths: &[PathBuf]) {
    let base = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let path = base.join(RECENT_FILE);
    if let Ok(file) = std::fs::File::create(&path) {
        let _ = serde_json::to_writer(file, paths);
    }
}

/// Add a path to recent, dedupe, trim to MAX_RECENT. Call after load/save.
pub fn add_to_recent(recent: &mut RecentFiles, path: PathBuf) {
    recent.0.retain(|p| p != &path);
    recent.0.insert(0, path);
    if recent.0.len() > MAX_RECENT {
        recent.0.truncate(MAX_RECENT);
    }
    save_recent(&recent.0);
}

/// Current file path for save. None = untitled.
#[derive(Resource, Default)]
pub struct CurrentFile(pub Option<PathBuf>);

/// Pending file dialog result from background thread. Check each frame.
/// Wrapped in Mutex because Receiver is Send but not Sync.
#[derive(Resource, Default)]
pub struct PendingFileDialog(
    pub std::sync::Mutex<Option<std::sync::mpsc::Receiver<FileDialogResult>>>,
);

/// Deferred load path. Set by egui/file-dialog; processed in Update to avoid B0001.
#[derive(Resource, Default)]
pub struct PendingLoad(pub Option<PathBuf>);

pub enum FileDialogResult {
    Open(PathBuf),
    SaveAs(PathBuf),
    /// Save only one tree's records, keyed by tree.
    SaveTreeAs(PathBuf, String),
}

/// Parse a flat record array from a catalog file.
pub fn load_records_from_path(path: &Path) -> Result<Vec<NodeRecord>, String> {
    let contents = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&contents).map_err(|e| e.to_string())
}

fn write_records(path: &Path, records: &[NodeRecord]) -> Result<(), String> {
    let json = serde_json::to_string_pretty(records).map_err(|e| e.to_string())?;
    std::fs::write(path, json).map_err(|e| e.to_string())?;
    Ok(())
}

/// Flatten the whole forest back to disk, preserving tree and node order.
pub fn save_forest_to_path(path: &Path, forest: &TreeForest) -> Result<(), String> {
    write_records(path, &forest.to_records())
}

/// Write just one tree's records.
pub fn save_tree_to_path(path: &Path, forest: &TreeForest, key: &str) -> Result<(), String> {
    let records = forest.tree_records(key);
    if records.is_empty() {
        return Err(format!("tree '{key}' has no nodes to save"));
    }
    write_records(path, &records)
}

/// Save on Ctrl+S (or Cmd+S). Uses current file, else the workspace default.
/// Menu bar Save As still opens a file dialog.
pub fn save_shortcut_system(
    keys: Res<ButtonInput<KeyCode>>,
    mut current_file: ResMut<CurrentFile>,
    mut recent: ResMut<RecentFiles>,
    forest: Res<TreeForest>,
    mut status: ResMut<crate::core::resources::StatusMessage>,
) {
    if !keys.just_pressed(KeyCode::KeyS) || !crate::core::helpers::ctrl_or_cmd_pressed(&keys) {
        return;
    }
    if !forest.is_loaded() {
        status.error("Nothing to save");
        return;
    }
    let path = current_file
        .0
        .clone()
        .unwrap_or_else(|| PathBuf::from(WORKSPACE_PATH));
    match save_forest_to_path(&path, &forest) {
        Ok(()) => {
            current_file.0 = Some(path.clone());
            add_to_recent(&mut recent, path.clone());
            status.set(format!("Saved {}", path.display()));
            info!("[SAVE] Saved to {}", path.display());
        }
        Err(e) => {
            status.error(format!("Save failed: {e}"));
            error!("[SAVE] Failed: {}", e);
        }
    }
}

/// Processes PendingLoad set by egui/file-dialog. Runs in Update so the
/// forest swap happens outside the egui pass.
pub fn process_pending_load_system(
    mut pending: ResMut<PendingLoad>,
    mut recent: ResMut<RecentFiles>,
    mut current_file: ResMut<CurrentFile>,
    mut forest: ResMut<TreeForest>,
    mut physics: ResMut<crate::core::physics::Physics>,
    mut selection: ResMut<crate::core::resources::SelectionState>,
    mut highlight: ResMut<crate::core::resources::HighlightState>,
    mut active: ResMut<crate::core::resources::ActiveTree>,
    mut status: ResMut<crate::core::resources::StatusMessage>,
    config: Res<crate::core::config::TrellisConfig>,
) {
    let Some(path) = pending.0.take() else {
        return;
    };
    match load_records_from_path(&path) {
        Ok(records) => {
            let count = records.len();
            forest.load(records, &config.guide_prefixes);
            physics.reset();
            selection.clear();
            selection.restrict.clear();
            highlight.clear();
            active.0 = forest.primary_keys().first().cloned().or_else(|| {
                forest.guide_keys().first().cloned()
            });
            current_file.0 = Some(path.clone());
            add_to_recent(&mut recent, path.clone());
            status.set(format!("Loaded {} ({count} records)", path.display()));
            info!("[LOAD] Loaded from {}", path.display());
        }
        Err(e) => {
            status.error(format!("Load failed: {e}"));
            error!("[LOAD] {}", e);
        }
    }
}

/// Load on Ctrl+O (or Cmd+O). Queues the workspace default file.
pub fn load_shortcut_system(
    keys: Res<ButtonInput<KeyCode>>,
    mut pending: ResMut<PendingLoad>,
) {
    if !keys.just_pressed(KeyCode::KeyO) || !crate::core::helpers::ctrl_or_cmd_pressed(&keys) {
        return;
    }
    let path = Path::new(WORKSPACE_PATH);
    if !path.exists() {
        warn!(
            "[LOAD] {} not found (save first with Ctrl+S / Cmd+S)",
            WORKSPACE_PATH
        );
        return;
    }
    pending.0 = Some(path.to_path_buf());
}

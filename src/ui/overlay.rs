//! Immediate-mode UI overlays via bevy_egui: top bar, tree list, node
//! inspector, bottom status bar, and the delete confirmation dialog.

use bevy::prelude::*;
use bevy_egui::{egui, EguiContexts};
use std::sync::mpsc;

use crate::core::config::TrellisConfig;
use crate::core::forest::{fnv1a32, ApplyOutcome, NodeId, NodePatch, TreeForest, NO_NODE};
use crate::core::physics::Physics;
use crate::core::resources::{
    ActiveTree, DeleteTarget, HighlightState, LinkSource, ReorderState, SelectionState,
    StatusMessage,
};
use crate::core::state::EditorMode;
use crate::input::selection::update_offending;
use crate::io::file_io::{
    add_to_recent, save_forest_to_path, save_tree_to_path, CurrentFile, FileDialogResult,
    PendingFileDialog, PendingLoad, RecentFiles,
};

/// Scratch buffers for the inspector text fields, reloaded whenever the
/// primary selection changes.
#[derive(Resource, Default)]
pub struct InspectorBuffers {
    pub for_node: NodeId,
    pub name: String,
    pub kind: String,
    pub cost_kind: String,
    pub cost: i32,
    pub premium: bool,
    pub parent_text: String,
    pub id_text: String,
}

fn spawn_open_dialog(pending_dialog: &PendingFileDialog) {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        if let Some(path) = rfd::FileDialog::new()
            .add_filter("json", &["json"])
            .pick_file()
        {
            let _ = tx.send(FileDialogResult::Open(path));
        }
    });
    if let Ok(mut guard) = pending_dialog.0.lock() {
        *guard = Some(rx);
    }
}

fn spawn_save_dialog(pending_dialog: &PendingFileDialog, tree_key: Option<String>) {
    let (tx, rx) = mpsc::channel();
    let file_name = tree_key
        .as_deref()
        .map(|k| format!("{k}.json"))
        .unwrap_or_else(|| "unlock_trees.json".to_string());
    std::thread::spawn(move || {
        if let Some(path) = rfd::FileDialog::new()
            .add_filter("json", &["json"])
            .set_file_name(file_name)
            .save_file()
        {
            let result = match tree_key {
                Some(key) => FileDialogResult::SaveTreeAs(path, key),
                None => FileDialogResult::SaveAs(path),
            };
            let _ = tx.send(result);
        }
    });
    if let Ok(mut guard) = pending_dialog.0.lock() {
        *guard = Some(rx);
    }
}

/// Top bar: File menu, tree actions, mode buttons.
pub fn ui_top_bar_system(
    mut contexts: EguiContexts,
    mode: Res<State<EditorMode>>,
    mut next_mode: ResMut<NextState<EditorMode>>,
    pending_dialog: Res<PendingFileDialog>,
    mut pending_load: ResMut<PendingLoad>,
    current_file: Res<CurrentFile>,
    mut recent: ResMut<RecentFiles>,
    mut forest: ResMut<TreeForest>,
    active: Res<ActiveTree>,
    mut physics: ResMut<Physics>,
    mut selection: ResMut<SelectionState>,
    mut highlight: ResMut<HighlightState>,
    mut link_source: ResMut<LinkSource>,
    mut reorder: ResMut<ReorderState>,
    mut delete_target: ResMut<DeleteTarget>,
    mut status: ResMut<StatusMessage>,
) {
    let Ok(ctx) = contexts.ctx_mut() else {
        return;
    };

    egui::TopBottomPanel::top("top_bar")
        .default_height(36.0)
        .show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.menu_button("File", |ui| {
                    if ui.button("Open...").clicked() {
                        spawn_open_dialog(&pending_dialog);
                        ui.close();
                    }
                    ui.menu_button("Open Recent", |ui| {
                        if recent.0.is_empty() {
                            ui.label("No recent files");
                        } else {
                            for path in recent.0.iter() {
                                let label = path
                                    .file_name()
                                    .and_then(|n| n.to_str())
                                    .unwrap_or(path.to_str().unwrap_or("?"));
                                if ui.button(label).clicked() {
                                    pending_load.0 = Some(path.clone());
                                    ui.close();
                                }
                            }
                        }
                    });
                    if ui.button("Save").clicked() {
                        match current_file.0.clone() {
                            Some(path) if forest.is_loaded() => {
                                match save_forest_to_path(&path, &forest) {
                                    Ok(()) => {
                                        add_to_recent(&mut recent, path.clone());
                                        status.set(format!("Saved {}", path.display()));
                                        info!("[SAVE] Saved to {}", path.display());
                                    }
                                    Err(e) => {
                                        status.error(format!("Save failed: {e}"));
                                        error!("[SAVE] {}", e);
                                    }
                                }
                            }
                            _ => spawn_save_dialog(&pending_dialog, None),
                        }
                        ui.close();
                    }
                    if ui.button("Save As...").clicked() {
                        spawn_save_dialog(&pending_dialog, None);
                        ui.close();
                    }
                    let can_save_tree = active.key().is_some();
                    if ui
                        .add_enabled(can_save_tree, egui::Button::new("Save This Tree As..."))
                        .clicked()
                    {
                        spawn_save_dialog(&pending_dialog, active.key().map(str::to_owned));
                        ui.close();
                    }
                });

                ui.separator();

                if let Some(key) = active.key().map(str::to_owned) {
                    let needs_reshape = forest.needs_reshape(&key);
                    if ui
                        .add_enabled(needs_reshape, egui::Button::new("Reshape"))
                        .clicked()
                    {
                        let restored = forest.restore_snaps(&key);
                        for id in &restored {
                            physics.clear_free_floating(*id);
                            physics.thaw(*id);
                        }
                        if let Some(shifts) = forest.reshape_collect_shifts(&key) {
                            physics.absorb_layout_shifts(shifts);
                        }
                        physics.suppress_collisions(1.0);
                        status.set("Reshaped");
                        info!("[RESHAPE] tree '{key}' ({} snaps restored)", restored.len());
                    }
                    let needs_restore = forest.needs_restore(&key);
                    if ui
                        .add_enabled(needs_restore, egui::Button::new("Restore"))
                        .clicked()
                    {
                        restore_active_tree(
                            &mut forest,
                            &mut physics,
                            &mut selection,
                            &mut highlight,
                            &mut status,
                            &key,
                        );
                    }

                    ui.separator();

                    if ui.button("New Node").clicked() {
                        status.set("Click the canvas to place the new node");
                        next_mode.set(EditorMode::Create);
                    }
                    let has_sel = selection.primary != NO_NODE;
                    if ui.add_enabled(has_sel, egui::Button::new("Link")).clicked() {
                        link_source.0 = selection.primary;
                        status.set("Click the node that should become the parent");
                        next_mode.set(EditorMode::Link);
                    }
                    if ui
                        .add_enabled(has_sel, egui::Button::new("Reorder"))
                        .clicked()
                    {
                        let children: Vec<NodeId> = forest
                            .node(&key, selection.primary)
                            .map(|n| n.children.clone())
                            .unwrap_or_default();
                        if children.len() < 2 {
                            status.error("Select a parent with at least two children to reorder");
                        } else {
                            reorder.parent = selection.primary;
                            reorder.picked = NO_NODE;
                            selection.restrict = children.iter().copied().collect();
                            highlight.pick_targets = children.into_iter().collect();
                            status.set("Pick a child to move");
                            next_mode.set(EditorMode::Reorder);
                        }
                    }
                    if ui
                        .add_enabled(has_sel, egui::Button::new("Delete"))
                        .clicked()
                    {
                        delete_target.0 = selection.primary;
                        next_mode.set(EditorMode::DeleteConfirm);
                    }
                }

                ui.separator();
                let mode_text = match mode.get() {
                    EditorMode::Browse => "BROWSE",
                    EditorMode::Create => "CREATE",
                    EditorMode::Link => "LINK",
                    EditorMode::Reorder => "REORDER",
                    EditorMode::DeleteConfirm => "DELETE?",
                };
                ui.label(egui::RichText::new(mode_text).strong());
                ui.add_space(8.0);
                let hint = match mode.get() {
                    EditorMode::Browse => {
                        "Drag nodes  Shift+click: multi-select  N/L/R: modes  Space+drag: pan"
                    }
                    EditorMode::Create => "Click the canvas to place the node  Esc: cancel",
                    EditorMode::Link => "Click the new parent  Esc: cancel",
                    EditorMode::Reorder => "Click two highlighted siblings to swap  Esc: cancel",
                    EditorMode::DeleteConfirm => "Confirm in the dialog",
                };
                ui.label(egui::RichText::new(hint).color(egui::Color32::GRAY));

                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    let name = current_file
                        .0
                        .as_ref()
                        .and_then(|p| p.file_name())
                        .and_then(|n| n.to_str())
                        .unwrap_or("untitled");
                    ui.label(egui::RichText::new(name).color(egui::Color32::DARK_GRAY));
                });
            });
        });
}

fn restore_active_tree(
    forest: &mut TreeForest,
    physics: &mut Physics,
    selection: &mut SelectionState,
    highlight: &mut HighlightState,
    status: &mut StatusMessage,
    key: &str,
) {
    // Capture visuals before the node list is replaced so the removal
    // effect plays where the nodes last stood.
    let last_seen: Vec<(NodeId, Vec2, String)> = forest
        .tree(key)
        .map(|t| {
            t.nodes
                .iter()
                .map(|n| (n.id, physics.visible_pos(n), n.kind.clone()))
                .collect()
        })
        .unwrap_or_default();
    let Some(removed) = forest.restore_tree(key) else {
        return;
    };
    for (id, pos, kind) in last_seen {
        if removed.contains(&id) {
            let color = crate::core::helpers::kind_color(&kind, Color::srgb(0.5, 0.5, 0.55));
            physics.start_delete_fx(pos, color);
        }
    }
    physics.reset();
    selection.clear();
    selection.restrict.clear();
    highlight.clear();
    status.set("Tree restored from file");
}

/// Left panel: primary trees and guides, with per-tree badges.
pub fn ui_tree_panel_system(
    mut contexts: EguiContexts,
    forest: Res<TreeForest>,
    mut active: ResMut<ActiveTree>,
    mut physics: ResMut<Physics>,
    mut selection: ResMut<SelectionState>,
    mut highlight: ResMut<HighlightState>,
    mut camera_q: Query<&mut Transform, With<crate::render::nodes::MainCamera>>,
) {
    let Ok(ctx) = contexts.ctx_mut() else {
        return;
    };
    if !forest.is_loaded() {
        return;
    }

    egui::SidePanel::left("tree_panel")
        .default_width(220.0)
        .show(ctx, |ui| {
            egui::ScrollArea::vertical().show(ui, |ui| {
                let mut clicked: Option<String> = None;
                ui.heading("Trees");
                for key in forest.primary_keys() {
                    tree_row(ui, &forest, &active, key, &mut clicked);
                }
                ui.add_space(8.0);
                ui.heading("Guides");
                for key in forest.guide_keys() {
                    tree_row(ui, &forest, &active, key, &mut clicked);
                }
                if let Some(key) = clicked {
                    let center = forest.tree(&key).map(|t| t.center()).unwrap_or(Vec2::ZERO);
                    active.0 = Some(key);
                    physics.reset();
                    selection.clear();
                    selection.restrict.clear();
                    highlight.clear();
                    crate::input::camera::focus_camera_on(&mut camera_q, center);
                }
            });
        });
}

fn tree_row(
    ui: &mut egui::Ui,
    forest: &TreeForest,
    active: &ActiveTree,
    key: &str,
    clicked: &mut Option<String>,
) {
    let count = forest.tree(key).map(|t| t.nodes.len()).unwrap_or(0);
    let is_active = active.key() == Some(key);
    let mut label = format!("{key}  ({count})");
    if forest.is_travelling(key) {
        label.push_str("  ✈");
    }
    if ui.selectable_label(is_active, label).clicked() {
        *clicked = Some(key.to_string());
    }
}

/// Right panel: attribute editor for the primary selected node.
pub fn ui_inspector_system(
    mut contexts: EguiContexts,
    mut forest: ResMut<TreeForest>,
    active: Res<ActiveTree>,
    mut physics: ResMut<Physics>,
    mut selection: ResMut<SelectionState>,
    mut highlight: ResMut<HighlightState>,
    mut buffers: ResMut<InspectorBuffers>,
    mut status: ResMut<StatusMessage>,
) {
    let Ok(ctx) = contexts.ctx_mut() else {
        return;
    };
    let Some(key) = active.key().map(str::to_owned) else {
        return;
    };
    let primary = selection.primary;
    if primary == NO_NODE {
        buffers.for_node = NO_NODE;
        return;
    }
    let Some(node) = forest.node(&key, primary) else {
        return;
    };
    if buffers.for_node != primary {
        buffers.for_node = primary;
        buffers.name = node.name.clone();
        buffers.kind = node.kind.clone();
        buffers.cost_kind = node.cost_kind.clone();
        buffers.cost = node.cost;
        buffers.premium = node.premium;
        buffers.parent_text = node.parent.to_string();
        buffers.id_text = node.id.to_string();
    }
    let old_parent = node.parent;

    egui::SidePanel::right("inspector")
        .default_width(240.0)
        .show(ctx, |ui| {
            ui.heading("Node");
            ui.label(
                egui::RichText::new(format!("id {primary}"))
                    .color(egui::Color32::GRAY)
                    .small(),
            );
            ui.add_space(4.0);
            egui::Grid::new("node_fields").num_columns(2).show(ui, |ui| {
                ui.label("Name");
                ui.text_edit_singleline(&mut buffers.name);
                ui.end_row();
                ui.label("Kind");
                ui.text_edit_singleline(&mut buffers.kind);
                ui.end_row();
                ui.label("Cost kind");
                ui.text_edit_singleline(&mut buffers.cost_kind);
                ui.end_row();
                ui.label("Cost");
                ui.add(egui::DragValue::new(&mut buffers.cost).range(0..=999));
                ui.end_row();
                ui.label("Premium");
                ui.checkbox(&mut buffers.premium, "");
                ui.end_row();
                ui.label("Parent id");
                ui.text_edit_singleline(&mut buffers.parent_text);
                ui.end_row();
                ui.label("Id");
                ui.text_edit_singleline(&mut buffers.id_text);
                ui.end_row();
            });
            ui.add_space(6.0);

            if ui.button("Apply").clicked() {
                let parent = buffers.parent_text.trim().parse::<NodeId>().ok();
                let id = buffers.id_text.trim().parse::<NodeId>().ok();
                if parent.is_none() && !buffers.parent_text.trim().is_empty() {
                    status.error("Parent id must be a number");
                    return;
                }
                let patch = NodePatch {
                    name: Some(buffers.name.clone()),
                    kind: Some(buffers.kind.clone()),
                    cost_kind: Some(buffers.cost_kind.clone()),
                    cost: Some(buffers.cost),
                    premium: Some(buffers.premium),
                    parent,
                    id,
                };
                match forest.apply_patch(&key, primary, &patch) {
                    ApplyOutcome::Applied { id: new_id } => {
                        selection.select_only(new_id);
                        buffers.for_node = NO_NODE;
                        let new_parent = forest
                            .node(&key, new_id)
                            .map(|n| n.parent)
                            .unwrap_or(NO_NODE);
                        for p in [old_parent, new_parent] {
                            if p != NO_NODE {
                                let shifts = forest.reposition_children(&key, p);
                                physics.absorb_layout_shifts(shifts);
                                update_offending(&forest, &mut highlight, &key, p);
                            }
                        }
                        if new_parent != NO_NODE && new_parent != old_parent {
                            physics.clear_free_floating(new_id);
                            physics.suppress_collisions(2.0);
                        }
                        status.set("Applied");
                    }
                    ApplyOutcome::DuplicateName => {
                        status.error("Name already used in this tree; reverted");
                        buffers.name = forest
                            .node(&key, primary)
                            .map(|n| n.name.clone())
                            .unwrap_or_default();
                    }
                    ApplyOutcome::NodeNotFound => status.error("Node vanished"),
                }
            }

            let hashed = NodeId::from(fnv1a32(&buffers.name));
            let id_matches = buffers
                .id_text
                .trim()
                .parse::<NodeId>()
                .map(|v| v == hashed)
                .unwrap_or(false);
            if !id_matches && ui.button("Set id from name hash").clicked() {
                if let Some(new_id) = forest.refresh_node_id(&key, primary) {
                    selection.select_only(new_id);
                    buffers.for_node = NO_NODE;
                    status.set(format!("Id rewritten to {new_id}"));
                } else {
                    status.error("That hash collides with another node");
                }
            }
        });
}

/// Bottom bar: status message plus forest counts.
pub fn ui_bottom_bar_system(
    mut contexts: EguiContexts,
    forest: Res<TreeForest>,
    active: Res<ActiveTree>,
    status: Res<StatusMessage>,
) {
    let Ok(ctx) = contexts.ctx_mut() else {
        return;
    };
    egui::TopBottomPanel::bottom("bottom_bar")
        .default_height(24.0)
        .show(ctx, |ui| {
            ui.horizontal(|ui| {
                if status.visible() {
                    let color = if status.error {
                        egui::Color32::from_rgb(230, 90, 90)
                    } else {
                        egui::Color32::from_rgb(140, 200, 140)
                    };
                    ui.label(egui::RichText::new(&status.text).color(color));
                }
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    if let Some(tree) = active.key().and_then(|k| forest.tree(k)) {
                        ui.label(
                            egui::RichText::new(format!(
                                "{}: {} nodes",
                                tree.key,
                                tree.nodes.len()
                            ))
                            .color(egui::Color32::GRAY),
                        );
                    }
                });
            });
        });
}

/// Modal confirmation before deleting a node.
pub fn ui_delete_confirm_system(
    mut contexts: EguiContexts,
    mode: Res<State<EditorMode>>,
    mut next_mode: ResMut<NextState<EditorMode>>,
    mut forest: ResMut<TreeForest>,
    active: Res<ActiveTree>,
    mut physics: ResMut<Physics>,
    mut selection: ResMut<SelectionState>,
    mut highlight: ResMut<HighlightState>,
    delete_target: Res<DeleteTarget>,
    config: Res<TrellisConfig>,
    mut status: ResMut<StatusMessage>,
) {
    if *mode.get() != EditorMode::DeleteConfirm {
        return;
    }
    let Ok(ctx) = contexts.ctx_mut() else {
        return;
    };
    let Some(key) = active.key().map(str::to_owned) else {
        next_mode.set(EditorMode::Browse);
        return;
    };
    let target = delete_target.0;
    let Some(node) = forest.node(&key, target) else {
        next_mode.set(EditorMode::Browse);
        return;
    };
    let name = node.name.clone();
    let pos = physics.visible_pos(node);
    let color = crate::core::helpers::kind_color(&node.kind, config.node_color());
    let old_parent = node.parent;
    let child_count = node.children.len();

    egui::Window::new("Delete node")
        .collapsible(false)
        .resizable(false)
        .anchor(egui::Align2::CENTER_CENTER, egui::Vec2::ZERO)
        .show(ctx, |ui| {
            if child_count > 0 {
                ui.label(format!(
                    "Delete '{name}'? Its {child_count} children will be cut loose."
                ));
            } else {
                ui.label(format!("Delete '{name}'?"));
            }
            ui.add_space(8.0);
            ui.horizontal(|ui| {
                if ui.button("Delete it").clicked() {
                    if let Some(orphans) = forest.delete_node(&key, target) {
                        for id in orphans {
                            physics.set_free_floating(id);
                            physics.thaw(id);
                        }
                        physics.clear_offset(target);
                        physics.clear_free_floating(target);
                        physics.start_delete_fx(pos, color);
                        selection.selected.remove(&target);
                        if selection.primary == target {
                            selection.primary = NO_NODE;
                        }
                        // Relationships only; layout stays untouched so the
                        // survivors hold their positions.
                        if old_parent != NO_NODE {
                            update_offending(&forest, &mut highlight, &key, old_parent);
                        }
                        status.set(format!("Deleted '{name}'"));
                        info!("[DELETE] removed node {target} from '{key}'");
                    }
                    next_mode.set(EditorMode::Browse);
                }
                if ui.button("Keep it").clicked() {
                    next_mode.set(EditorMode::Browse);
                }
            });
        });
}

/// Processes file dialog results from background thread.
/// Open defers to PendingLoad (processed in Update) to avoid B0001.
pub fn process_pending_file_dialog_system(
    pending_dialog: Res<PendingFileDialog>,
    mut pending_load: ResMut<PendingLoad>,
    mut current_file: ResMut<CurrentFile>,
    mut recent: ResMut<RecentFiles>,
    forest: Res<TreeForest>,
    mut status: ResMut<StatusMessage>,
) {
    let mut guard = match pending_dialog.0.try_lock() {
        Ok(g) => g,
        Err(_) => return,
    };
    let Some(rx) = guard.as_ref() else {
        return;
    };

    match rx.try_recv() {
        Ok(FileDialogResult::Open(path)) => {
            *guard = None;
            pending_load.0 = Some(path);
        }
        Ok(FileDialogResult::SaveAs(path)) => {
            *guard = None;
            drop(guard);
            match save_forest_to_path(&path, &forest) {
                Ok(()) => {
                    current_file.0 = Some(path.clone());
                    add_to_recent(&mut recent, path.clone());
                    status.set(format!("Saved {}", path.display()));
                    info!("[SAVE] Saved to {}", path.display());
                }
                Err(e) => {
                    status.error(format!("Save failed: {e}"));
                    error!("[SAVE] {}", e);
                }
            }
        }
        Ok(FileDialogResult::SaveTreeAs(path, key)) => {
            *guard = None;
            drop(guard);
            match save_tree_to_path(&path, &forest, &key) {
                Ok(()) => {
                    status.set(format!("Saved tree '{key}' to {}", path.display()));
                    info!("[SAVE] Saved tree '{}' to {}", key, path.display());
                }
                Err(e) => {
                    status.error(format!("Save failed: {e}"));
                    error!("[SAVE] {}", e);
                }
            }
        }
        Err(mpsc::TryRecvError::Empty) => {}
        Err(mpsc::TryRecvError::Disconnected) => {
            *guard = None;
        }
    }
}

/// Counts the status message down; sticky messages never expire here.
pub fn status_message_tick_system(time: Res<Time>, mut status: ResMut<StatusMessage>) {
    if status.timer > 0.0 && status.timer.is_finite() {
        status.timer -= time.delta_secs();
        if status.timer <= 0.0 {
            status.text.clear();
            status.error = false;
        }
    }
}

//! Trellis — interactive unlock-tree editor. Library for testing and reuse.

pub mod core;
pub mod input;
pub mod io;
pub mod render;
pub mod ui;

use bevy::prelude::*;
use bevy_egui::{
    input::{egui_wants_any_keyboard_input, egui_wants_any_pointer_input},
    EguiPlugin,
};

use core::resources::{
    ActiveTree, DeleteTarget, DragState, HighlightState, LinkSource, ReorderState, SelectionState,
    StatusMessage,
};
use core::state::EditorMode;

use input::camera::{
    camera_pan_keys_system, camera_pan_system, camera_zoom_keys_system, camera_zoom_system,
};
use input::selection::{
    cancel_mode_system, create_mode_click_system, drag_update_system, duplicate_watch_system,
    link_mode_click_system, mode_shortcut_system, mouse_press_system, mouse_release_system,
    physics_step_system, reorder_mode_click_system, snap_drain_system,
};

use io::file_io::{
    load_recent, load_shortcut_system, process_pending_load_system, save_shortcut_system,
    CurrentFile, PendingFileDialog, PendingLoad, RecentFiles,
};

use render::edges::{
    draw_box_select_system, draw_delete_fx_system, draw_edges_system, draw_link_preview_system,
    draw_selection_system,
};
use render::nodes::{sync_node_labels_system, sync_node_sprites_system, MainCamera};

use ui::overlay::{
    process_pending_file_dialog_system, status_message_tick_system, ui_bottom_bar_system,
    ui_delete_confirm_system, ui_inspector_system, ui_top_bar_system, ui_tree_panel_system,
    InspectorBuffers,
};

/// Build and run the Trellis app.
pub fn run() {
    let app_config = core::config::load_config();

    let mut app = App::new();
    app.add_plugins(DefaultPlugins.set(WindowPlugin {
        primary_window: Some(Window {
            title: "Trellis".to_string(),
            ..default()
        }),
        ..default()
    }))
    .insert_resource(ClearColor(app_config.bg_color()))
    .insert_resource(StatusMessage {
        default_duration: app_config.status_message_duration,
        ..Default::default()
    })
    .insert_resource(app_config)
    .add_plugins(EguiPlugin::default())
    .init_state::<EditorMode>()
    .init_resource::<core::forest::TreeForest>()
    .init_resource::<core::physics::Physics>()
    .init_resource::<ActiveTree>()
    .init_resource::<SelectionState>()
    .init_resource::<HighlightState>()
    .init_resource::<DragState>()
    .init_resource::<LinkSource>()
    .init_resource::<ReorderState>()
    .init_resource::<DeleteTarget>()
    .init_resource::<InspectorBuffers>()
    .init_resource::<CurrentFile>()
    .init_resource::<PendingFileDialog>()
    .init_resource::<PendingLoad>()
    .init_resource::<RecentFiles>();

    app.add_systems(
        Startup,
        (
            setup_canvas,
            setup_gizmo_line_width,
            |mut recent: ResMut<RecentFiles>, mut pending: ResMut<PendingLoad>| {
                recent.0 = load_recent();
                let workspace = std::path::PathBuf::from(io::file_io::WORKSPACE_PATH);
                if workspace.exists() {
                    pending.0 = Some(workspace);
                }
            },
        ),
    )
    .add_systems(
        Update,
        (
            camera_zoom_system.run_if(not(egui_wants_any_pointer_input)),
            camera_zoom_keys_system.run_if(not(egui_wants_any_keyboard_input)),
            camera_pan_system.run_if(not(egui_wants_any_pointer_input)),
            camera_pan_keys_system.run_if(not(egui_wants_any_keyboard_input)),
            save_shortcut_system.run_if(not(egui_wants_any_keyboard_input)),
            load_shortcut_system.run_if(not(egui_wants_any_keyboard_input)),
            process_pending_load_system,
            mouse_press_system
                .run_if(in_state(EditorMode::Browse))
                .run_if(not(egui_wants_any_pointer_input)),
            drag_update_system.run_if(in_state(EditorMode::Browse)),
            mouse_release_system.run_if(in_state(EditorMode::Browse)),
            create_mode_click_system
                .run_if(in_state(EditorMode::Create))
                .run_if(not(egui_wants_any_pointer_input)),
            link_mode_click_system
                .run_if(in_state(EditorMode::Link))
                .run_if(not(egui_wants_any_pointer_input)),
            reorder_mode_click_system
                .run_if(in_state(EditorMode::Reorder))
                .run_if(not(egui_wants_any_pointer_input)),
            cancel_mode_system,
            mode_shortcut_system
                .run_if(in_state(EditorMode::Browse))
                .run_if(not(egui_wants_any_keyboard_input)),
        ),
    )
    .add_systems(
        Update,
        (
            physics_step_system,
            snap_drain_system.after(physics_step_system),
            duplicate_watch_system,
            draw_edges_system,
            draw_selection_system,
            draw_box_select_system,
            draw_link_preview_system.run_if(in_state(EditorMode::Link)),
            draw_delete_fx_system,
            sync_node_sprites_system,
            sync_node_labels_system,
        ),
    )
    .add_systems(
        bevy_egui::EguiPrimaryContextPass,
        (
            ui_top_bar_system,
            ui_tree_panel_system,
            ui_inspector_system,
            ui_bottom_bar_system,
            ui_delete_confirm_system,
        ),
    )
    .add_systems(Update, process_pending_file_dialog_system)
    .add_systems(Update, status_message_tick_system)
    .run();
}

fn setup_gizmo_line_width(mut config_store: ResMut<GizmoConfigStore>) {
    let (config, _) = config_store.config_mut::<DefaultGizmoConfigGroup>();
    config.line.width = 4.0;
}

fn setup_canvas(mut commands: Commands) {
    commands.spawn((Camera2d, MainCamera));
}

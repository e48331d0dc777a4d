//! Host panel: a snapshot of the viewer state and the egui widgets that edit
//! it. Widgets never touch the viewer directly; they return [`UiAction`]s that
//! the app applies between frames.

use crate::render::wireframe::WireframeFrame;
use crate::render::TransformMode;
use crate::scene::registry::ModelSummary;
use crate::viewer::{Subscription, Viewer};
use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
pub enum UiAction {
    AddModel,
    Switch(usize),
    Remove(usize),
    SetVisibility(usize, bool),
    SetMode(TransformMode),
    ToggleGizmo,
    ResetCamera,
    SetScale(f32),
    SetRotationY(f32),
    SetPosition([f32; 3]),
    SetMarkerTexture(PathBuf),
}

pub struct UiState {
    models: Vec<ModelSummary>,
    active: Option<usize>,
    mode: TransformMode,
    gizmo_visible: bool,
    marker_mode: bool,
    status: String,
    dirty: Rc<Cell<bool>>,
    _subscription: Subscription,
}

impl UiState {
    /// Subscribes to `viewer` so any model change marks the snapshot stale.
    pub fn new(viewer: &Viewer) -> Self {
        let dirty = Rc::new(Cell::new(true));
        let subscription = {
            let dirty = Rc::clone(&dirty);
            viewer.subscribe(move |_| dirty.set(true))
        };
        let mut state = Self {
            models: Vec::new(),
            active: None,
            mode: viewer.transform_mode(),
            gizmo_visible: viewer.transform_controls_visible(),
            marker_mode: viewer.host().reference_plane().is_some(),
            status: String::new(),
            dirty,
            _subscription: subscription,
        };
        state.refresh_if_stale(viewer);
        state
    }

    pub fn is_stale(&self) -> bool {
        self.dirty.get()
    }

    /// Re-reads the model list only when an event arrived since the last read.
    /// Mode and gizmo visibility raise no events and are copied every call.
    pub fn refresh_if_stale(&mut self, viewer: &Viewer) -> bool {
        self.mode = viewer.transform_mode();
        self.gizmo_visible = viewer.transform_controls_visible();
        if !self.dirty.replace(false) {
            return false;
        }
        self.models = viewer.get_all_models();
        self.active = viewer.get_active_model_index();
        log::debug!("panel refreshed: {} model(s), active {:?}", self.models.len(), self.active);
        true
    }

    pub fn models(&self) -> &[ModelSummary] {
        &self.models
    }

    pub fn active(&self) -> Option<&ModelSummary> {
        self.models.get(self.active?)
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
    }

    pub fn show(&mut self, ctx: &egui::Context) -> Vec<UiAction> {
        let mut actions = Vec::new();
        egui::SidePanel::right("stageview_models")
            .resizable(false)
            .default_width(260.0)
            .show(ctx, |ui| {
                ui.heading("Models");
                if ui.button("Add model…").clicked() {
                    actions.push(UiAction::AddModel);
                }
                ui.separator();
                self.model_list(ui, &mut actions);
                ui.separator();
                self.transform_controls(ui, &mut actions);
                ui.separator();
                ui.horizontal(|ui| {
                    if ui.button("Reset camera").clicked() {
                        actions.push(UiAction::ResetCamera);
                    }
                    if self.marker_mode && ui.button("Marker texture…").clicked() {
                        if let Some(path) = rfd::FileDialog::new()
                            .add_filter("Image", &["png", "jpg", "jpeg"])
                            .pick_file()
                        {
                            actions.push(UiAction::SetMarkerTexture(path));
                        }
                    }
                });
                if !self.status.is_empty() {
                    ui.separator();
                    ui.small(&self.status);
                }
            });
        actions
    }

    fn model_list(&self, ui: &mut egui::Ui, actions: &mut Vec<UiAction>) {
        if self.models.is_empty() {
            ui.label("No models loaded");
            return;
        }
        for model in &self.models {
            ui.horizontal(|ui| {
                let mut visible = model.visible;
                if ui.checkbox(&mut visible, "").changed() {
                    actions.push(UiAction::SetVisibility(model.index, visible));
                }
                let label = format!("{} ({})", model.file_name, format_size(model.file_size));
                if ui.selectable_label(model.is_active, label).clicked() && !model.is_active {
                    actions.push(UiAction::Switch(model.index));
                }
                if ui.small_button("✕").clicked() {
                    actions.push(UiAction::Remove(model.index));
                }
            });
        }
    }

    fn transform_controls(&self, ui: &mut egui::Ui, actions: &mut Vec<UiAction>) {
        ui.horizontal(|ui| {
            for mode in TransformMode::ALL {
                if ui.selectable_label(self.mode == mode, mode.as_str()).clicked() {
                    actions.push(UiAction::SetMode(mode));
                }
            }
            let mut visible = self.gizmo_visible;
            if ui.checkbox(&mut visible, "gizmo").changed() {
                actions.push(UiAction::ToggleGizmo);
            }
        });

        let Some(active) = self.active() else {
            ui.label("Select a model to edit its transform");
            return;
        };
        let mut scale = active.scale[0];
        let mut rotation_y = active.rotation_deg[1];
        let mut position = active.position;
        egui::Grid::new("stageview_transform").num_columns(2).show(ui, |ui| {
            ui.label("Scale");
            if ui
                .add(egui::DragValue::new(&mut scale).speed(0.01).range(0.001..=1000.0))
                .changed()
            {
                actions.push(UiAction::SetScale(scale));
            }
            ui.end_row();

            ui.label("Rotation Y");
            if ui
                .add(egui::Slider::new(&mut rotation_y, -180.0..=180.0).suffix("°"))
                .changed()
            {
                actions.push(UiAction::SetRotationY(rotation_y));
            }
            ui.end_row();

            ui.label("Position");
            let mut changed = false;
            ui.horizontal(|ui| {
                for value in &mut position {
                    changed |= ui.add(egui::DragValue::new(value).speed(0.01)).changed();
                }
            });
            if changed {
                actions.push(UiAction::SetPosition(position));
            }
            ui.end_row();
        });
    }
}

/// Applies one panel action. Returns a status line for actions that can fail.
pub fn apply_action(viewer: &mut Viewer, action: UiAction) -> Option<String> {
    match action {
        // The app opens the dialog; nothing to apply here.
        UiAction::AddModel => None,
        UiAction::Switch(index) => {
            viewer.switch_to_model(index);
            None
        }
        UiAction::Remove(index) => {
            let name = viewer
                .get_all_models()
                .get(index)
                .map(|model| model.file_name.clone());
            match (viewer.remove_model(index), name) {
                (true, Some(name)) => Some(format!("Removed {}", name)),
                _ => None,
            }
        }
        UiAction::SetVisibility(index, visible) => {
            viewer.set_model_visibility(index, visible);
            None
        }
        UiAction::SetMode(mode) => {
            viewer.set_transform_mode(mode.as_str());
            None
        }
        UiAction::ToggleGizmo => {
            viewer.toggle_transform_controls();
            None
        }
        UiAction::ResetCamera => {
            viewer.reset_camera();
            None
        }
        UiAction::SetScale(scale) => {
            viewer.set_scale(scale);
            None
        }
        UiAction::SetRotationY(degrees) => {
            viewer.set_rotation_y(degrees);
            None
        }
        UiAction::SetPosition([x, y, z]) => {
            viewer.set_position(x, y, z);
            None
        }
        UiAction::SetMarkerTexture(path) => match viewer.set_marker_texture(&path) {
            Ok(()) => Some(format!("Marker texture: {}", path.display())),
            Err(err) => {
                log::warn!("{}", err);
                Some(format!("Marker texture failed: {}", err))
            }
        },
    }
}

/// Paints the last wireframe frame into the egui background layer.
pub fn paint_wireframe(ctx: &egui::Context, frame: &WireframeFrame) {
    let pixels_per_point = ctx.pixels_per_point();
    let painter = ctx.layer_painter(egui::LayerId::background());
    let to_pos = |p: glam::Vec2| egui::pos2(p.x / pixels_per_point, p.y / pixels_per_point);
    for segment in &frame.segments {
        let [r, g, b, a] = segment.color;
        painter.line_segment(
            [to_pos(segment.from), to_pos(segment.to)],
            egui::Stroke::new(1.0, egui::Color32::from_rgba_unmultiplied(r, g, b, a)),
        );
    }
}

fn format_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    let bytes = bytes as f64;
    if bytes < KIB {
        format!("{} B", bytes)
    } else if bytes < KIB * KIB {
        format!("{:.1} KiB", bytes / KIB)
    } else {
        format!("{:.1} MiB", bytes / (KIB * KIB))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::importer::MeshImporter;
    use crate::render::HeadlessRenderer;
    use crate::viewer::{ModelSource, ViewerOptions};

    fn viewer() -> Viewer {
        Viewer::new(
            "panel",
            ViewerOptions::default(),
            Box::new(HeadlessRenderer::default()),
            Box::new(MeshImporter::cube(1.0)),
        )
    }

    fn load(viewer: &mut Viewer, name: &str) {
        let source = ModelSource::Bytes {
            name: name.to_string(),
            bytes: vec![1, 2, 3],
        };
        pollster::block_on(viewer.load_new_model(source, None, None)).unwrap();
    }

    #[test]
    fn snapshot_refreshes_only_after_events() {
        let mut viewer = viewer();
        let mut ui = UiState::new(&viewer);
        assert!(!ui.is_stale());
        assert!(ui.models().is_empty());

        load(&mut viewer, "a.glb");
        assert!(ui.is_stale());
        assert!(ui.refresh_if_stale(&viewer));
        assert_eq!(ui.models().len(), 1);
        assert_eq!(ui.active().map(|m| m.file_name.as_str()), Some("a.glb"));
        assert!(!ui.refresh_if_stale(&viewer));
    }

    #[test]
    fn transform_actions_reach_the_active_model() {
        let mut viewer = viewer();
        let mut ui = UiState::new(&viewer);
        load(&mut viewer, "a.glb");

        apply_action(&mut viewer, UiAction::SetPosition([0.5, 0.0, -0.5]));
        apply_action(&mut viewer, UiAction::SetScale(0.0));
        ui.refresh_if_stale(&viewer);
        let active = ui.active().unwrap();
        assert_eq!(active.position, [0.5, 0.0, -0.5]);
        assert_eq!(active.scale, [2.0; 3]);
    }

    #[test]
    fn remove_action_reports_the_file_name() {
        let mut viewer = viewer();
        load(&mut viewer, "a.glb");
        assert_eq!(
            apply_action(&mut viewer, UiAction::Remove(0)).as_deref(),
            Some("Removed a.glb")
        );
        assert_eq!(apply_action(&mut viewer, UiAction::Remove(0)), None);
    }

    #[test]
    fn mode_and_gizmo_state_are_copied_every_refresh() {
        let mut viewer = viewer();
        let mut ui = UiState::new(&viewer);
        apply_action(&mut viewer, UiAction::SetMode(TransformMode::Rotate));
        ui.refresh_if_stale(&viewer);
        assert_eq!(ui.mode, TransformMode::Rotate);
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(12), "12 B");
        assert_eq!(format_size(2048), "2.0 KiB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MiB");
    }
}

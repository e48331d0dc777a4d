pub mod egui_host;
mod input;
mod timing;

use crate::render::egui_overlay::EguiOverlay;
use crate::render::wireframe::{SharedFrame, WireframeRenderer};
use crate::ui::{self, UiAction, UiState};
use crate::viewer::{
    create_viewer, ConfigError, ModelSource, PendingLoad, Viewer, ViewerOptions,
};
use egui_host::EguiHost;
use input::{InputAction, InputState, PointerAction};
use timing::FrameTiming;

use glam::Vec2;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowAttributes, WindowId};

const TITLE: &str = "stageview";
const INITIAL_SIZE: (u32, u32) = (1280, 720);
/// Pixel-delta scroll distance treated as one wheel line.
const PIXELS_PER_LINE: f32 = 40.0;

pub const USAGE: &str = "usage: stageview [--config <options.json>] [model.glb ...]";

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}\n{usage}", usage = USAGE)]
    Usage(String),
    #[error("failed to load options: {0}")]
    Config(#[from] ConfigError),
    #[error("event loop error: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),
}

/// Command line: an optional options file followed by models to preload.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LaunchArgs {
    pub config: Option<PathBuf>,
    pub models: Vec<PathBuf>,
}

impl LaunchArgs {
    /// Parses arguments without the program name.
    pub fn parse<I>(args: I) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Self::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    let path = args
                        .next()
                        .ok_or_else(|| AppError::Usage("--config needs a path".to_string()))?;
                    parsed.config = Some(PathBuf::from(path));
                }
                flag if flag.starts_with("--") => {
                    return Err(AppError::Usage(format!("unknown option {}", flag)));
                }
                _ => parsed.models.push(PathBuf::from(arg)),
            }
        }
        Ok(parsed)
    }
}

pub struct App {
    window: Option<Arc<Window>>,
    overlay: Option<EguiOverlay>,
    egui: Option<EguiHost>,
    viewer: Viewer,
    frame: SharedFrame,
    ui: UiState,
    input: InputState,
    timing: FrameTiming,
    preload: Vec<PathBuf>,
    loads: Vec<PendingLoad>,
    target_frame_duration: Duration,
    next_frame_time: Instant,
}

impl App {
    fn new(options: ViewerOptions, preload: Vec<PathBuf>) -> Self {
        let (renderer, frame) = WireframeRenderer::new(INITIAL_SIZE.0, INITIAL_SIZE.1);
        let viewer = create_viewer(TITLE, options, Box::new(renderer));
        let ui = UiState::new(&viewer);
        Self {
            window: None,
            overlay: None,
            egui: None,
            viewer,
            frame,
            ui,
            input: InputState::default(),
            timing: FrameTiming::new(TITLE, Instant::now()),
            preload,
            loads: Vec::new(),
            target_frame_duration: Duration::from_millis(16),
            next_frame_time: Instant::now(),
        }
    }

    fn init_graphics(&mut self, window: &Arc<Window>) -> bool {
        match EguiOverlay::new(Arc::clone(window)) {
            Ok(overlay) => self.overlay = Some(overlay),
            Err(err) => {
                log::error!("graphics initialization failed: {}", err);
                return false;
            }
        }
        self.egui = Some(EguiHost::new(window));
        self.handle_resize(window.inner_size());
        true
    }

    fn handle_resize(&mut self, size: PhysicalSize<u32>) {
        if let Some(overlay) = &mut self.overlay {
            overlay.resize(size.width, size.height);
        }
        self.viewer.resize(size.width, size.height);
    }

    fn update_target_frame_duration(&mut self, window: &Window) {
        let mut target = Duration::from_millis(16);
        if let Some(millihz) = window
            .current_monitor()
            .and_then(|monitor| monitor.refresh_rate_millihertz())
        {
            let hz = millihz as f32 / 1000.0;
            if hz > 1.0 {
                target = Duration::from_secs_f32(1.0 / hz);
            }
        }
        self.target_frame_duration = target;
        self.next_frame_time = Instant::now() + self.target_frame_duration;
    }

    // ---- loading ----------------------------------------------------------

    /// Starts a load; [`App::poll_loads`] finishes it once the import thread
    /// is done, so frames keep coming in the meantime.
    fn load(&mut self, source: ModelSource, label: &str, file_size: Option<u64>) {
        match self.viewer.start_load(source, None, file_size) {
            Ok(load) => {
                self.ui.set_status(format!("Loading {}…", label));
                self.loads.push(load);
            }
            Err(err) => {
                log::warn!("failed to load {}: {}", label, err);
                self.ui.set_status(format!("Failed to load {}: {}", label, err));
            }
        }
    }

    fn poll_loads(&mut self) {
        for mut load in std::mem::take(&mut self.loads) {
            let Some(result) = load.try_import() else {
                self.loads.push(load);
                continue;
            };
            let label = load
                .file_name()
                .map(str::to_string)
                .unwrap_or_else(|| load.origin().to_string());
            match self.viewer.finish_load(load, result) {
                Ok(index) => {
                    log::info!("loaded {} as model {}", label, index);
                    self.ui.set_status(format!("Loaded {}", label));
                }
                Err(err) => {
                    log::warn!("failed to load {}: {}", label, err);
                    self.ui.set_status(format!("Failed to load {}: {}", label, err));
                }
            }
        }
    }

    fn load_path(&mut self, path: &Path) {
        self.load(
            ModelSource::Url(path.to_string_lossy().into_owned()),
            &path.display().to_string(),
            None,
        );
    }

    /// Reads the file into memory and loads it as a temporary reference.
    fn load_file_bytes(&mut self, path: &Path) {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        match std::fs::read(path) {
            Ok(bytes) => {
                let size = bytes.len() as u64;
                self.load(ModelSource::Bytes { name: name.clone(), bytes }, &name, Some(size));
            }
            Err(err) => {
                log::warn!("failed to read {}: {}", path.display(), err);
                self.ui.set_status(format!("Failed to read {}: {}", name, err));
            }
        }
    }

    /// `.gltf` files may reference sibling buffers and images, so they load
    /// from disk; everything else goes through memory.
    fn open_file(&mut self, path: &Path) {
        let is_gltf = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("gltf"));
        if is_gltf {
            self.load_path(path);
        } else {
            self.load_file_bytes(path);
        }
    }

    fn open_model_dialog(&mut self) {
        let Some(path) = rfd::FileDialog::new()
            .add_filter("glTF", &["glb", "gltf"])
            .pick_file()
        else {
            return;
        };
        self.open_file(&path);
    }

    // ---- input ------------------------------------------------------------

    fn handle_key_action(&mut self, action: InputAction, event_loop: &ActiveEventLoop) {
        match action {
            InputAction::SetMode(mode) => {
                self.viewer.set_transform_mode(mode.as_str());
            }
            InputAction::ToggleGizmo => {
                let visible = self.viewer.toggle_transform_controls();
                log::debug!("transform controls {}", if visible { "shown" } else { "hidden" });
            }
            InputAction::ResetCamera => self.viewer.reset_camera(),
            InputAction::RemoveActive => {
                if let Some(index) = self.viewer.get_active_model_index() {
                    self.apply_ui_action(UiAction::Remove(index));
                }
            }
            InputAction::Exit => event_loop.exit(),
            InputAction::None => {}
        }
    }

    fn handle_pointer(&mut self, action: PointerAction) {
        let over_panel = self.egui.as_ref().is_some_and(EguiHost::wants_pointer);
        match action {
            PointerAction::Press(position) if !over_panel => {
                self.viewer.pointer_down(position);
            }
            PointerAction::Release(position) => {
                if let Some(outcome) = self.viewer.pointer_up(position) {
                    log::debug!("click resolved to {:?}", outcome);
                }
            }
            PointerAction::Press(_) | PointerAction::None => {}
        }
    }

    fn apply_ui_action(&mut self, action: UiAction) {
        if action == UiAction::AddModel {
            self.open_model_dialog();
            return;
        }
        if let Some(status) = ui::apply_action(&mut self.viewer, action) {
            self.ui.set_status(status);
        }
    }

    // ---- frame ------------------------------------------------------------

    fn redraw(&mut self) {
        let frame_start = Instant::now();
        let Some(window) = self.window.clone() else {
            return;
        };
        self.ui.refresh_if_stale(&self.viewer);
        if !self.viewer.render_frame() {
            return;
        }

        let mut actions = Vec::new();
        let output = {
            let (Some(egui), frame, ui) = (self.egui.as_mut(), self.frame.borrow(), &mut self.ui)
            else {
                return;
            };
            egui.run_ui(&window, |ctx| {
                ui::paint_wireframe(ctx, &frame);
                actions = ui.show(ctx);
            })
        };
        if let Some(overlay) = &mut self.overlay {
            if let Err(err) = overlay.render(&output, self.viewer.host().background_color()) {
                log::warn!("present failed: {}", err);
            }
        }
        for action in actions {
            self.apply_ui_action(action);
        }

        self.timing
            .set_render_ms(frame_start.elapsed().as_secs_f32() * 1000.0);
        self.timing
            .update(Some(&window), frame_start, self.viewer.model_count());
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let window_attrs = WindowAttributes::default()
            .with_title(TITLE)
            .with_inner_size(PhysicalSize::new(INITIAL_SIZE.0, INITIAL_SIZE.1))
            .with_resizable(true);
        let window = match event_loop.create_window(window_attrs) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                log::error!("failed to create window: {}", err);
                event_loop.exit();
                return;
            }
        };
        if !self.init_graphics(&window) {
            event_loop.exit();
            return;
        }
        self.update_target_frame_duration(&window);
        self.window = Some(window);

        for path in std::mem::take(&mut self.preload) {
            self.load_path(&path);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        let consumed = match (&mut self.egui, &self.window) {
            (Some(egui), Some(window)) => egui.on_window_event(window, &event),
            _ => false,
        };

        match event {
            WindowEvent::CloseRequested => {
                log::info!("close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Focused(false) => self.input.release_all(),
            WindowEvent::KeyboardInput { event, .. } => {
                let wants_keyboard = self.egui.as_ref().is_some_and(EguiHost::wants_keyboard);
                if event.state == ElementState::Pressed && !event.repeat && !wants_keyboard {
                    let action = input::action_for_key(event.physical_key);
                    self.handle_key_action(action, event_loop);
                }
            }
            WindowEvent::Resized(new_size) => {
                log::debug!("window resized to {}x{}", new_size.width, new_size.height);
                self.handle_resize(new_size);
                if let Some(window) = self.window.clone() {
                    self.update_target_frame_duration(&window);
                }
            }
            WindowEvent::Moved(_) => {
                if let Some(window) = self.window.clone() {
                    self.update_target_frame_duration(&window);
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                let position = Vec2::new(position.x as f32, position.y as f32);
                if let Some(delta) = self.input.cursor_moved(position) {
                    self.viewer.orbit(delta);
                }
                if self.input.left_down {
                    self.viewer.pointer_move(position);
                }
            }
            WindowEvent::CursorLeft { .. } => self.input.cursor_left(),
            WindowEvent::MouseInput { state, button, .. } => {
                let action = self.input.handle_button(button, state);
                self.handle_pointer(action);
            }
            WindowEvent::MouseWheel { delta, .. } if !consumed => {
                let lines = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / PIXELS_PER_LINE,
                };
                self.viewer.zoom(lines);
            }
            WindowEvent::DroppedFile(path) => self.open_file(&path),
            WindowEvent::RedrawRequested => self.redraw(),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        self.poll_loads();
        let now = Instant::now();
        if now >= self.next_frame_time {
            if let Some(window) = &self.window {
                window.request_redraw();
            }
            self.next_frame_time = now + self.target_frame_duration;
        }
        event_loop.set_control_flow(ControlFlow::WaitUntil(self.next_frame_time));
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if !self.loads.is_empty() {
            log::debug!("dropping {} unfinished load(s)", self.loads.len());
            self.loads.clear();
        }
        self.viewer.dispose();
    }
}

pub fn run(args: LaunchArgs) -> Result<(), AppError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let options = match &args.config {
        Some(path) => {
            log::info!("reading options from {}", path.display());
            ViewerOptions::from_json_file(path)?
        }
        None => ViewerOptions::default(),
    };
    let options = options
        .with_on_model_loaded(|size| log::info!("model ready, normalized size {:.3}", size));

    log::info!("{} starting", TITLE);
    log::info!("   W/E/R: move/rotate/scale, H: gizmo, F: frame, Del: remove, Esc: exit");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Wait);
    let mut app = App::new(options, args.models);
    event_loop.run_app(&mut app)?;

    log::info!("goodbye");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn config_flag_and_models_are_parsed() {
        let parsed = LaunchArgs::parse(args(&["--config", "opts.json", "a.glb", "b.gltf"])).unwrap();
        assert_eq!(parsed.config, Some(PathBuf::from("opts.json")));
        assert_eq!(
            parsed.models,
            vec![PathBuf::from("a.glb"), PathBuf::from("b.gltf")]
        );
    }

    #[test]
    fn missing_config_path_is_a_usage_error() {
        let err = LaunchArgs::parse(args(&["--config"])).unwrap_err();
        assert!(matches!(err, AppError::Usage(_)));
        assert!(err.to_string().contains(USAGE));
    }

    #[test]
    fn unknown_flags_are_rejected() {
        assert!(matches!(
            LaunchArgs::parse(args(&["--fullscreen"])),
            Err(AppError::Usage(_))
        ));
        assert_eq!(LaunchArgs::parse(Vec::new()).unwrap(), LaunchArgs::default());
    }
}

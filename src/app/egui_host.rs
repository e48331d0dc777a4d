use winit::event::WindowEvent;
use winit::window::Window;

/// Tessellated egui output for one frame, ready for the overlay presenter.
pub struct EguiFrameOutput {
    pub clipped_primitives: Vec<egui::ClippedPrimitive>,
    pub textures_delta: egui::TexturesDelta,
    pub pixels_per_point: f32,
}

/// egui context plus its winit integration. Also answers whether the panel
/// currently owns the pointer or keyboard, so the viewport can ignore input
/// aimed at widgets.
pub struct EguiHost {
    context: egui::Context,
    winit_state: egui_winit::State,
    wants_pointer: bool,
    wants_keyboard: bool,
}

impl EguiHost {
    pub fn new(window: &Window) -> Self {
        let context = egui::Context::default();
        context.set_visuals(egui::Visuals::dark());
        let winit_state = egui_winit::State::new(
            context.clone(),
            egui::ViewportId::ROOT,
            window,
            Some(window.scale_factor() as f32),
            None,
            None,
        );
        Self {
            context,
            winit_state,
            wants_pointer: false,
            wants_keyboard: false,
        }
    }

    /// Feeds a window event to egui. Returns whether egui consumed it.
    pub fn on_window_event(&mut self, window: &Window, event: &WindowEvent) -> bool {
        self.winit_state.on_window_event(window, event).consumed
    }

    /// True while the pointer is over a panel or dragging a widget.
    pub fn wants_pointer(&self) -> bool {
        self.wants_pointer || self.context.is_pointer_over_area()
    }

    pub fn wants_keyboard(&self) -> bool {
        self.wants_keyboard
    }

    pub fn run_ui<F>(&mut self, window: &Window, run_ui: F) -> EguiFrameOutput
    where
        F: FnMut(&egui::Context),
    {
        let raw_input = self.winit_state.take_egui_input(window);
        let full_output = self.context.run(raw_input, run_ui);
        self.winit_state
            .handle_platform_output(window, full_output.platform_output);
        self.wants_pointer = self.context.wants_pointer_input();
        self.wants_keyboard = self.context.wants_keyboard_input();

        let pixels_per_point = full_output.pixels_per_point;
        let clipped_primitives = self
            .context
            .tessellate(full_output.shapes, pixels_per_point);
        EguiFrameOutput {
            clipped_primitives,
            textures_delta: full_output.textures_delta,
            pixels_per_point,
        }
    }
}

use crate::render::TransformMode;
use glam::Vec2;
use winit::event::{ElementState, MouseButton};
use winit::keyboard::{KeyCode, PhysicalKey};

/// Keyboard commands the window forwards to the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputAction {
    None,
    SetMode(TransformMode),
    ToggleGizmo,
    ResetCamera,
    RemoveActive,
    Exit,
}

pub fn action_for_key(key: PhysicalKey) -> InputAction {
    match key {
        PhysicalKey::Code(KeyCode::KeyW) => InputAction::SetMode(TransformMode::Translate),
        PhysicalKey::Code(KeyCode::KeyE) => InputAction::SetMode(TransformMode::Rotate),
        PhysicalKey::Code(KeyCode::KeyR) => InputAction::SetMode(TransformMode::Scale),
        PhysicalKey::Code(KeyCode::KeyH) => InputAction::ToggleGizmo,
        PhysicalKey::Code(KeyCode::KeyF) => InputAction::ResetCamera,
        PhysicalKey::Code(KeyCode::Delete) => InputAction::RemoveActive,
        PhysicalKey::Code(KeyCode::Escape) => InputAction::Exit,
        _ => InputAction::None,
    }
}

/// What a mouse button event means for the viewer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerAction {
    None,
    Press(Vec2),
    Release(Vec2),
}

/// Cursor and button state in physical pixels.
#[derive(Default, Debug, Clone, Copy)]
pub struct InputState {
    pub cursor: Option<Vec2>,
    pub left_down: bool,
    pub right_down: bool,
}

impl InputState {
    /// Tracks the cursor. Returns the movement since the last position while
    /// the orbit button is held.
    pub fn cursor_moved(&mut self, position: Vec2) -> Option<Vec2> {
        let previous = self.cursor.replace(position);
        match previous {
            Some(previous) if self.right_down => Some(position - previous),
            _ => None,
        }
    }

    pub fn cursor_left(&mut self) {
        self.cursor = None;
    }

    pub fn handle_button(&mut self, button: MouseButton, state: ElementState) -> PointerAction {
        let pressed = state == ElementState::Pressed;
        match button {
            MouseButton::Left => {
                let was_down = std::mem::replace(&mut self.left_down, pressed);
                match (self.cursor, was_down, pressed) {
                    (Some(cursor), false, true) => PointerAction::Press(cursor),
                    (Some(cursor), true, false) => PointerAction::Release(cursor),
                    _ => PointerAction::None,
                }
            }
            MouseButton::Right => {
                self.right_down = pressed;
                PointerAction::None
            }
            _ => PointerAction::None,
        }
    }

    /// Drops held buttons, e.g. when the window loses focus mid-drag.
    pub fn release_all(&mut self) {
        self.left_down = false;
        self.right_down = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_keys_map_to_modes() {
        assert_eq!(
            action_for_key(PhysicalKey::Code(KeyCode::KeyE)),
            InputAction::SetMode(TransformMode::Rotate)
        );
        assert_eq!(action_for_key(PhysicalKey::Code(KeyCode::KeyQ)), InputAction::None);
        assert_eq!(action_for_key(PhysicalKey::Code(KeyCode::Escape)), InputAction::Exit);
    }

    #[test]
    fn orbit_delta_only_while_right_button_held() {
        let mut input = InputState::default();
        assert_eq!(input.cursor_moved(Vec2::new(10.0, 10.0)), None);
        input.handle_button(MouseButton::Right, ElementState::Pressed);
        assert_eq!(
            input.cursor_moved(Vec2::new(15.0, 8.0)),
            Some(Vec2::new(5.0, -2.0))
        );
        input.handle_button(MouseButton::Right, ElementState::Released);
        assert_eq!(input.cursor_moved(Vec2::new(20.0, 8.0)), None);
    }

    #[test]
    fn left_button_reports_press_and_release_once() {
        let mut input = InputState::default();
        assert_eq!(
            input.handle_button(MouseButton::Left, ElementState::Pressed),
            PointerAction::None
        );
        input.handle_button(MouseButton::Left, ElementState::Released);

        input.cursor_moved(Vec2::new(3.0, 4.0));
        assert_eq!(
            input.handle_button(MouseButton::Left, ElementState::Pressed),
            PointerAction::Press(Vec2::new(3.0, 4.0))
        );
        assert_eq!(
            input.handle_button(MouseButton::Left, ElementState::Pressed),
            PointerAction::None
        );
        assert_eq!(
            input.handle_button(MouseButton::Left, ElementState::Released),
            PointerAction::Release(Vec2::new(3.0, 4.0))
        );
    }
}

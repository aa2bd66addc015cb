//! Desktop preview host: a winit window rendering through wgpu.

mod wgpu_host;

pub use wgpu_host::WgpuHost;

use crate::overlay::{InputEvent, Key, Modifiers, PointerButton};
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};
use winit::keyboard::{Key as WinitKey, ModifiersState, NamedKey};

/// Lines scrolled per wheel notch, in pixels.
const LINE_HEIGHT: f32 = 24.0;

/// Collects window events between frames as canvas [`InputEvent`]s.
#[derive(Debug, Default)]
pub struct InputCollector {
    cursor: (f32, f32),
    modifiers: Modifiers,
    events: Vec<InputEvent>,
}

impl InputCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `event`. Returns the key when it was pressed, so the caller can
    /// react to shortcuts such as F1.
    pub fn handle(&mut self, event: &WindowEvent) -> Option<Key> {
        match event {
            WindowEvent::CursorMoved { position, .. } => {
                self.cursor = (position.x as f32, position.y as f32);
                self.events.push(InputEvent::PointerMoved {
                    x: self.cursor.0,
                    y: self.cursor.1,
                });
            }
            WindowEvent::CursorLeft { .. } => self.events.push(InputEvent::PointerLeft),
            WindowEvent::MouseInput { state, button, .. } => {
                let button = match button {
                    MouseButton::Left => PointerButton::Primary,
                    MouseButton::Right => PointerButton::Secondary,
                    MouseButton::Middle => PointerButton::Middle,
                    _ => return None,
                };
                self.events.push(InputEvent::PointerButton {
                    x: self.cursor.0,
                    y: self.cursor.1,
                    button,
                    pressed: *state == ElementState::Pressed,
                });
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let (dx, dy) = match delta {
                    MouseScrollDelta::LineDelta(x, y) => (x * LINE_HEIGHT, y * LINE_HEIGHT),
                    MouseScrollDelta::PixelDelta(p) => (p.x as f32, p.y as f32),
                };
                self.events.push(InputEvent::Scroll { dx, dy });
            }
            WindowEvent::ModifiersChanged(modifiers) => {
                self.modifiers = convert_modifiers(modifiers.state());
            }
            WindowEvent::KeyboardInput { event, .. } => {
                let pressed = event.state == ElementState::Pressed;
                let key = convert_key(&event.logical_key);
                if let Some(key) = key {
                    self.events.push(InputEvent::Key {
                        key,
                        pressed,
                        modifiers: self.modifiers,
                    });
                }
                if pressed && !self.modifiers.ctrl && !self.modifiers.command {
                    if let Some(text) = &event.text {
                        if !text.is_empty() {
                            self.events.push(InputEvent::Text(text.to_string()));
                        }
                    }
                }
                return key.filter(|_| pressed);
            }
            _ => {}
        }
        None
    }

    /// Hands over everything collected since the last call.
    pub fn drain(&mut self) -> Vec<InputEvent> {
        std::mem::take(&mut self.events)
    }
}

fn convert_modifiers(state: ModifiersState) -> Modifiers {
    Modifiers {
        shift: state.shift_key(),
        ctrl: state.control_key(),
        alt: state.alt_key(),
        command: if cfg!(target_os = "macos") {
            state.super_key()
        } else {
            state.control_key()
        },
    }
}

fn convert_key(key: &WinitKey) -> Option<Key> {
    match key {
        WinitKey::Named(named) => convert_named_key(*named),
        WinitKey::Character(text) => {
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphanumeric() => Some(Key::Char(c)),
                _ => None,
            }
        }
        _ => None,
    }
}

fn convert_named_key(key: NamedKey) -> Option<Key> {
    Some(match key {
        NamedKey::Enter => Key::Enter,
        NamedKey::Tab => Key::Tab,
        NamedKey::Backspace => Key::Backspace,
        NamedKey::Delete => Key::Delete,
        NamedKey::Escape => Key::Escape,
        NamedKey::ArrowLeft => Key::ArrowLeft,
        NamedKey::ArrowRight => Key::ArrowRight,
        NamedKey::ArrowUp => Key::ArrowUp,
        NamedKey::ArrowDown => Key::ArrowDown,
        NamedKey::Home => Key::Home,
        NamedKey::End => Key::End,
        NamedKey::PageUp => Key::PageUp,
        NamedKey::PageDown => Key::PageDown,
        NamedKey::F1 => Key::F1,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_conversion() {
        assert_eq!(convert_key(&WinitKey::Named(NamedKey::F1)), Some(Key::F1));
        assert_eq!(convert_key(&WinitKey::Named(NamedKey::CapsLock)), None);
        assert_eq!(convert_key(&WinitKey::Character("a".into())), Some(Key::Char('a')));
        assert_eq!(convert_key(&WinitKey::Character("ab".into())), None);
        assert_eq!(convert_key(&WinitKey::Character("-".into())), None);
    }

    #[test]
    fn test_modifier_conversion() {
        let m = convert_modifiers(ModifiersState::SHIFT | ModifiersState::CONTROL);
        assert!(m.shift && m.ctrl && !m.alt);
        assert_eq!(m.command, !cfg!(target_os = "macos"));
    }
}

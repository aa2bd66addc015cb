//! Host input forwarded to the overlay, and its conversion to egui input.

/// Pointer button reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    Primary,
    Secondary,
    Middle,
}

/// Keys the overlay reacts to. Printable text arrives as [`InputEvent::Text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    Tab,
    Backspace,
    Delete,
    Escape,
    ArrowLeft,
    ArrowRight,
    ArrowUp,
    ArrowDown,
    Home,
    End,
    PageUp,
    PageDown,
    F1,
    /// A letter or digit, for shortcuts such as Ctrl+A.
    Char(char),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
    /// Cmd on macOS, Ctrl elsewhere.
    pub command: bool,
}

/// One host input event. Positions are physical pixels with a top-left origin.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    PointerMoved { x: f32, y: f32 },
    PointerButton { x: f32, y: f32, button: PointerButton, pressed: bool },
    PointerLeft,
    Scroll { dx: f32, dy: f32 },
    Text(String),
    Key { key: Key, pressed: bool, modifiers: Modifiers },
}

impl Modifiers {
    fn to_egui(self) -> egui::Modifiers {
        egui::Modifiers {
            alt: self.alt,
            ctrl: self.ctrl,
            shift: self.shift,
            mac_cmd: false,
            command: self.command,
        }
    }
}

fn egui_key(key: Key) -> Option<egui::Key> {
    Some(match key {
        Key::Enter => egui::Key::Enter,
        Key::Tab => egui::Key::Tab,
        Key::Backspace => egui::Key::Backspace,
        Key::Delete => egui::Key::Delete,
        Key::Escape => egui::Key::Escape,
        Key::ArrowLeft => egui::Key::ArrowLeft,
        Key::ArrowRight => egui::Key::ArrowRight,
        Key::ArrowUp => egui::Key::ArrowUp,
        Key::ArrowDown => egui::Key::ArrowDown,
        Key::Home => egui::Key::Home,
        Key::End => egui::Key::End,
        Key::PageUp => egui::Key::PageUp,
        Key::PageDown => egui::Key::PageDown,
        Key::F1 => egui::Key::F1,
        Key::Char(c) => return egui::Key::from_name(&c.to_ascii_uppercase().to_string()),
    })
}

fn egui_button(button: PointerButton) -> egui::PointerButton {
    match button {
        PointerButton::Primary => egui::PointerButton::Primary,
        PointerButton::Secondary => egui::PointerButton::Secondary,
        PointerButton::Middle => egui::PointerButton::Middle,
    }
}

/// Builds one frame of egui input. Pixels map 1:1 to egui points.
pub fn to_raw_input(events: &[InputEvent], screen: (u32, u32), time: f64, dt: f32) -> egui::RawInput {
    let mut modifiers = egui::Modifiers::default();
    let mut converted = Vec::with_capacity(events.len());
    for event in events {
        match event {
            InputEvent::PointerMoved { x, y } => converted.push(egui::Event::PointerMoved(egui::pos2(*x, *y))),
            InputEvent::PointerButton { x, y, button, pressed } => converted.push(egui::Event::PointerButton {
                pos: egui::pos2(*x, *y),
                button: egui_button(*button),
                pressed: *pressed,
                modifiers,
            }),
            InputEvent::PointerLeft => converted.push(egui::Event::PointerGone),
            InputEvent::Scroll { dx, dy } => converted.push(egui::Event::MouseWheel {
                unit: egui::MouseWheelUnit::Point,
                delta: egui::vec2(*dx, *dy),
                modifiers,
            }),
            InputEvent::Text(text) => {
                if !text.is_empty() && !text.chars().any(char::is_control) {
                    converted.push(egui::Event::Text(text.clone()));
                }
            }
            InputEvent::Key {
                key,
                pressed,
                modifiers: mods,
            } => {
                modifiers = mods.to_egui();
                let Some(key) = egui_key(*key) else {
                    continue;
                };
                if *pressed && modifiers.command {
                    match key {
                        egui::Key::C => converted.push(egui::Event::Copy),
                        egui::Key::X => converted.push(egui::Event::Cut),
                        _ => {}
                    }
                }
                converted.push(egui::Event::Key {
                    key,
                    physical_key: None,
                    pressed: *pressed,
                    repeat: false,
                    modifiers,
                });
            }
        }
    }

    egui::RawInput {
        screen_rect: Some(egui::Rect::from_min_size(
            egui::Pos2::ZERO,
            egui::vec2(screen.0 as f32, screen.1 as f32),
        )),
        time: Some(time),
        predicted_dt: dt,
        modifiers,
        events: converted,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converts_pointer_and_text_events() {
        let events = [
            InputEvent::PointerMoved { x: 10.0, y: 20.0 },
            InputEvent::PointerButton {
                x: 10.0,
                y: 20.0,
                button: PointerButton::Primary,
                pressed: true,
            },
            InputEvent::Text("a".to_string()),
            InputEvent::Text("\u{8}".to_string()),
        ];
        let raw = to_raw_input(&events, (800, 600), 1.5, 0.016);
        assert_eq!(raw.events.len(), 3);
        assert!(matches!(raw.events[0], egui::Event::PointerMoved(p) if p == egui::pos2(10.0, 20.0)));
        assert_eq!(raw.screen_rect.map(|r| r.width()), Some(800.0));
        assert_eq!(raw.time, Some(1.5));
    }

    #[test]
    fn test_command_c_emits_copy() {
        let events = [InputEvent::Key {
            key: Key::Char('c'),
            pressed: true,
            modifiers: Modifiers {
                ctrl: true,
                command: true,
                ..Default::default()
            },
        }];
        let raw = to_raw_input(&events, (100, 100), 0.0, 0.0);
        assert!(matches!(raw.events[0], egui::Event::Copy));
        assert!(matches!(raw.events[1], egui::Event::Key { key: egui::Key::C, .. }));
        assert!(raw.modifiers.command);
    }
}

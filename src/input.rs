//! Keyboard input handling
//!
//! Maps winit key events onto the small set of keys the viewer reacts to.

use winit::event::{ElementState, KeyEvent};
use winit::keyboard::{Key as WinitKey, NamedKey};

/// Keys with a viewer binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    /// Recenter tracking
    R,
    /// Cycle the device perf HUD
    H,
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    /// Toggle the stats overlay
    Tilde,
    Escape,
}

impl Key {
    /// Key for a press event, `None` for releases and unbound keys.
    pub fn from_event(event: &KeyEvent) -> Option<Key> {
        if event.state != ElementState::Pressed || event.repeat {
            return None;
        }
        Self::from_logical(&event.logical_key)
    }

    pub fn from_logical(key: &WinitKey) -> Option<Key> {
        match key {
            WinitKey::Named(NamedKey::F1) => Some(Key::F1),
            WinitKey::Named(NamedKey::F2) => Some(Key::F2),
            WinitKey::Named(NamedKey::F3) => Some(Key::F3),
            WinitKey::Named(NamedKey::F4) => Some(Key::F4),
            WinitKey::Named(NamedKey::F5) => Some(Key::F5),
            WinitKey::Named(NamedKey::F6) => Some(Key::F6),
            WinitKey::Named(NamedKey::F7) => Some(Key::F7),
            WinitKey::Named(NamedKey::F8) => Some(Key::F8),
            WinitKey::Named(NamedKey::Escape) => Some(Key::Escape),
            WinitKey::Character(c) => match c.as_str() {
                "r" | "R" => Some(Key::R),
                "h" | "H" => Some(Key::H),
                "`" | "~" => Some(Key::Tilde),
                _ => None,
            },
            _ => None,
        }
    }
}

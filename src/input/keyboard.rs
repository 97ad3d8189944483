//! Keyboard state
//!
//! Keycodes arrive already decoded; no keymap is compiled here. The
//! keyboard only remembers which keys are down, the modifier masks and
//! which node holds focus.

use log::trace;

use crate::scene::NodeId;

/// Key repeat settings advertised to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeatInfo {
    /// Characters per second, 0 disables repeat
    pub rate: u32,
    /// Delay before repeating, in milliseconds
    pub delay: u32,
}

impl Default for RepeatInfo {
    fn default() -> Self {
        Self {
            rate: 25,
            delay: 600,
        }
    }
}

/// Modifier masks as sent in wl_keyboard.modifiers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifierState {
    pub depressed: u32,
    pub latched: u32,
    pub locked: u32,
    pub group: u32,
}

/// Keyboard of a seat
#[derive(Debug, Default)]
pub struct Keyboard {
    focus: Option<NodeId>,
    /// Held keys in press order
    held: Vec<u32>,
    modifiers: ModifierState,
    repeat: RepeatInfo,
}

/// Focus moved between nodes
#[derive(Debug)]
pub struct KeyboardFocusChange {
    pub old_focus: Option<NodeId>,
    pub new_focus: Option<NodeId>,
    /// Keys held at the moment of the change, for the enter event
    pub pressed_keys: Vec<u32>,
}

impl Keyboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn focus(&self) -> Option<NodeId> {
        self.focus
    }

    /// Move focus, returning what the old and new holders need to know
    pub fn set_focus(&mut self, node: Option<NodeId>) -> KeyboardFocusChange {
        KeyboardFocusChange {
            old_focus: std::mem::replace(&mut self.focus, node),
            new_focus: node,
            pressed_keys: self.held.clone(),
        }
    }

    /// Record a press; `false` for a key that is already down
    pub fn key_press(&mut self, keycode: u32) -> bool {
        if self.held.contains(&keycode) {
            return false;
        }
        trace!("Key {} down", keycode);
        self.held.push(keycode);
        true
    }

    /// Record a release; `false` for a key that was not down
    pub fn key_release(&mut self, keycode: u32) -> bool {
        let before = self.held.len();
        self.held.retain(|&held| held != keycode);
        let released = self.held.len() != before;
        if released {
            trace!("Key {} up", keycode);
        }
        released
    }

    pub fn pressed_keys(&self) -> &[u32] {
        &self.held
    }

    /// Replace the modifier masks, returning whether anything changed
    pub fn update_modifiers(&mut self, modifiers: ModifierState) -> bool {
        std::mem::replace(&mut self.modifiers, modifiers) != modifiers
    }

    pub fn modifiers(&self) -> ModifierState {
        self.modifiers
    }

    pub fn set_repeat(&mut self, repeat: RepeatInfo) {
        self.repeat = repeat;
    }

    pub fn repeat(&self) -> RepeatInfo {
        self.repeat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ArenaKey;

    #[test]
    fn test_press_and_release() {
        let mut keyboard = Keyboard::new();
        assert!(keyboard.key_press(30));
        assert!(!keyboard.key_press(30));
        assert!(keyboard.key_press(31));
        assert_eq!(keyboard.pressed_keys(), &[30, 31]);

        assert!(keyboard.key_release(30));
        assert!(!keyboard.key_release(30));
        assert_eq!(keyboard.pressed_keys(), &[31]);
    }

    #[test]
    fn test_focus_change_carries_pressed_keys() {
        let mut keyboard = Keyboard::new();
        keyboard.key_press(42);

        let first = NodeId::from_parts(1, 0);
        let second = NodeId::from_parts(2, 0);
        let change = keyboard.set_focus(Some(first));
        assert!(change.old_focus.is_none());
        assert_eq!(change.pressed_keys, vec![42]);

        let change = keyboard.set_focus(Some(second));
        assert_eq!(change.old_focus, Some(first));
        assert_eq!(keyboard.focus(), Some(second));
    }

    #[test]
    fn test_modifiers_report_changes() {
        let mut keyboard = Keyboard::new();
        let shift_caps = ModifierState {
            depressed: 1,
            locked: 2,
            ..ModifierState::default()
        };
        assert!(keyboard.update_modifiers(shift_caps));
        assert!(!keyboard.update_modifiers(shift_caps));
        assert_eq!(keyboard.modifiers().locked, 2);
    }

    #[test]
    fn test_repeat_defaults() {
        let mut keyboard = Keyboard::new();
        assert_eq!(keyboard.repeat(), RepeatInfo { rate: 25, delay: 600 });
        keyboard.set_repeat(RepeatInfo { rate: 0, delay: 0 });
        assert_eq!(keyboard.repeat().rate, 0);
    }
}

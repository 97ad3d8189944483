//! Pointer (mouse/trackpad) handling

use log::debug;

use crate::geometry::Point;
use crate::scene::NodeId;

/// Pointer state
#[derive(Debug)]
pub struct Pointer {
    /// Currently focused node
    focus: Option<NodeId>,
    /// Position in global layout coordinates
    position: Point,
    /// Currently pressed buttons
    pressed_buttons: Vec<u32>,
    /// Grab state
    grab: PointerGrab,
}

/// Pointer grab state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PointerGrab {
    #[default]
    NoGrab,
    /// Implicit grab started by a button press on `node`
    Grabbed { node: NodeId, serial: u32 },
}

impl PointerGrab {
    /// Node holding the grab
    pub fn node(&self) -> Option<NodeId> {
        match self {
            PointerGrab::NoGrab => None,
            PointerGrab::Grabbed { node, .. } => Some(*node),
        }
    }
}

impl Pointer {
    /// Create a new pointer
    pub fn new() -> Self {
        Self {
            focus: None,
            position: Point::default(),
            pressed_buttons: Vec::new(),
            grab: PointerGrab::NoGrab,
        }
    }

    /// Set pointer focus to a node
    pub fn set_focus(&mut self, node: Option<NodeId>) -> PointerFocusChange {
        let old_focus = self.focus;
        self.focus = node;

        PointerFocusChange {
            old_focus,
            new_focus: node,
        }
    }

    /// Get the currently focused node
    pub fn focus(&self) -> Option<NodeId> {
        self.focus
    }

    /// Update pointer position
    pub fn motion(&mut self, position: Point) {
        self.position = position;
    }

    /// Get current position
    pub fn position(&self) -> Point {
        self.position
    }

    /// Handle a button press
    pub fn button_press(&mut self, button: u32) -> bool {
        if !self.pressed_buttons.contains(&button) {
            self.pressed_buttons.push(button);
            debug!("Button pressed: {}", button);
            true
        } else {
            false
        }
    }

    /// Handle a button release
    pub fn button_release(&mut self, button: u32) -> bool {
        if let Some(idx) = self.pressed_buttons.iter().position(|&b| b == button) {
            self.pressed_buttons.remove(idx);
            debug!("Button released: {}", button);
            true
        } else {
            false
        }
    }

    /// Get currently pressed buttons
    pub fn pressed_buttons(&self) -> &[u32] {
        &self.pressed_buttons
    }

    /// Check if any button is pressed
    pub fn has_button_pressed(&self) -> bool {
        !self.pressed_buttons.is_empty()
    }

    /// Start a grab
    pub fn start_grab(&mut self, node: NodeId, serial: u32) {
        self.grab = PointerGrab::Grabbed { node, serial };
    }

    /// End the current grab
    pub fn end_grab(&mut self) {
        self.grab = PointerGrab::NoGrab;
    }

    /// Get the current grab
    pub fn grab(&self) -> PointerGrab {
        self.grab
    }
}

impl Default for Pointer {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a focus change operation
#[derive(Debug)]
pub struct PointerFocusChange {
    /// Previously focused node
    pub old_focus: Option<NodeId>,
    /// Newly focused node
    pub new_focus: Option<NodeId>,
}

impl PointerFocusChange {
    pub fn changed(&self) -> bool {
        self.old_focus != self.new_focus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ArenaKey;

    #[test]
    fn test_pointer_new() {
        let pointer = Pointer::new();
        assert!(pointer.focus().is_none());
        assert!(pointer.pressed_buttons().is_empty());
        assert_eq!(pointer.grab(), PointerGrab::NoGrab);
    }

    #[test]
    fn test_button_press_release() {
        let mut pointer = Pointer::new();

        // Press left button
        assert!(pointer.button_press(0x110));
        assert!(!pointer.button_press(0x110));
        assert!(pointer.has_button_pressed());

        assert!(pointer.button_release(0x110));
        assert!(!pointer.has_button_pressed());
        assert!(!pointer.button_release(0x110));
    }

    #[test]
    fn test_focus_change() {
        let mut pointer = Pointer::new();
        let node1 = NodeId::from_parts(1, 0);
        let node2 = NodeId::from_parts(2, 0);

        let change = pointer.set_focus(Some(node1));
        assert!(change.old_focus.is_none());
        assert!(change.changed());

        let change = pointer.set_focus(Some(node2));
        assert_eq!(change.old_focus, Some(node1));
        assert_eq!(change.new_focus, Some(node2));

        assert!(!pointer.set_focus(Some(node2)).changed());
    }

    #[test]
    fn test_grab() {
        let mut pointer = Pointer::new();
        let node = NodeId::from_parts(1, 0);

        pointer.start_grab(node, 7);
        assert_eq!(pointer.grab().node(), Some(node));

        pointer.end_grab();
        assert!(pointer.grab().node().is_none());
    }
}

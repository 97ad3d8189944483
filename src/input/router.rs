//! Input routing
//!
//! Decides which node receives each pointer and keyboard event. Pointer
//! focus follows the topmost node under the cursor unless an implicit
//! grab is active; keyboard focus only moves on explicit request.

use log::{debug, trace};

use super::keyboard::ModifierState;
use super::pointer::PointerGrab;
use super::seat::Seat;
use crate::geometry::Point;
use crate::scene::{NodeId, SceneGraph};

/// Pointer button state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonState {
    Released,
    Pressed,
}

/// Key state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Released,
    Pressed,
}

/// Scroll axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Vertical,
    Horizontal,
}

/// Which focus a notice refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusKind {
    Pointer,
    Keyboard,
}

/// Input event addressed to a node
#[derive(Debug, Clone, PartialEq)]
pub enum InputNotice {
    PointerEnter {
        node: NodeId,
        serial: u32,
        x: f64,
        y: f64,
    },
    PointerLeave {
        node: NodeId,
        serial: u32,
    },
    PointerMotion {
        node: NodeId,
        time: u32,
        x: f64,
        y: f64,
    },
    PointerButton {
        node: NodeId,
        serial: u32,
        time: u32,
        button: u32,
        state: ButtonState,
    },
    PointerAxis {
        node: NodeId,
        time: u32,
        axis: Axis,
        value: f64,
    },
    KeyboardEnter {
        node: NodeId,
        serial: u32,
        keys: Vec<u32>,
    },
    KeyboardLeave {
        node: NodeId,
        serial: u32,
    },
    Key {
        node: NodeId,
        serial: u32,
        time: u32,
        key: u32,
        state: KeyState,
    },
    Modifiers {
        node: NodeId,
        serial: u32,
        modifiers: ModifierState,
    },
    /// The focused or grabbed node went away
    FocusLost { node: NodeId, kind: FocusKind },
}

impl InputNotice {
    /// Node the notice is addressed to
    pub fn node(&self) -> NodeId {
        match self {
            InputNotice::PointerEnter { node, .. }
            | InputNotice::PointerLeave { node, .. }
            | InputNotice::PointerMotion { node, .. }
            | InputNotice::PointerButton { node, .. }
            | InputNotice::PointerAxis { node, .. }
            | InputNotice::KeyboardEnter { node, .. }
            | InputNotice::KeyboardLeave { node, .. }
            | InputNotice::Key { node, .. }
            | InputNotice::Modifiers { node, .. }
            | InputNotice::FocusLost { node, .. } => *node,
        }
    }
}

/// Seat state machine
#[derive(Debug)]
pub struct InputRouter {
    seat: Seat,
}

impl InputRouter {
    pub fn new(seat: Seat) -> Self {
        Self { seat }
    }

    pub fn seat(&self) -> &Seat {
        &self.seat
    }

    pub fn seat_mut(&mut self) -> &mut Seat {
        &mut self.seat
    }

    /// Allocate the next serial for this seat
    pub fn next_serial(&mut self) -> u32 {
        self.seat.next_serial()
    }

    pub fn grab(&self) -> PointerGrab {
        self.seat.pointer().grab()
    }

    /// Cursor position in global coordinates
    pub fn pointer_position(&self) -> Point {
        self.seat.pointer().position()
    }

    /// Move the cursor to an absolute global position
    pub fn pointer_motion(
        &mut self,
        scene: &SceneGraph,
        position: Point,
        time: u32,
    ) -> Vec<InputNotice> {
        self.seat.pointer_mut().motion(position);
        let mut notices = Vec::new();

        let target = match self.grab() {
            PointerGrab::Grabbed { node, .. } => Some(node),
            PointerGrab::NoGrab => {
                self.refocus(scene, &mut notices);
                self.seat.pointer().focus()
            }
        };

        if let Some(node) = target {
            if let Some(local) = local_point(scene, node, position) {
                notices.push(InputNotice::PointerMotion {
                    node,
                    time,
                    x: local.x,
                    y: local.y,
                });
            }
        }
        notices
    }

    pub fn pointer_button(
        &mut self,
        scene: &SceneGraph,
        button: u32,
        state: ButtonState,
        time: u32,
    ) -> Vec<InputNotice> {
        let mut notices = Vec::new();

        match state {
            ButtonState::Pressed => {
                if !self.seat.pointer_mut().button_press(button) {
                    return notices;
                }
                let target = match self.grab() {
                    PointerGrab::Grabbed { node, .. } => Some(node),
                    PointerGrab::NoGrab => {
                        self.refocus(scene, &mut notices);
                        self.seat.pointer().focus()
                    }
                };
                let Some(node) = target else {
                    trace!("Button {} pressed over nothing", button);
                    return notices;
                };
                let serial = self.next_serial();
                if self.grab() == PointerGrab::NoGrab {
                    debug!("Implicit grab on node {}", node);
                    self.seat.pointer_mut().start_grab(node, serial);
                }
                notices.push(InputNotice::PointerButton {
                    node,
                    serial,
                    time,
                    button,
                    state,
                });
            }
            ButtonState::Released => {
                if !self.seat.pointer_mut().button_release(button) {
                    return notices;
                }
                let target = self.grab().node().or(self.seat.pointer().focus());
                if let Some(node) = target {
                    let serial = self.next_serial();
                    notices.push(InputNotice::PointerButton {
                        node,
                        serial,
                        time,
                        button,
                        state,
                    });
                }
                if !self.seat.pointer().has_button_pressed() {
                    if self.grab() != PointerGrab::NoGrab {
                        debug!("Implicit grab released");
                        self.seat.pointer_mut().end_grab();
                    }
                    self.refocus(scene, &mut notices);
                }
            }
        }
        notices
    }

    /// Scroll, delivered to the grab or the pointer focus
    pub fn pointer_axis(&mut self, axis: Axis, value: f64, time: u32) -> Vec<InputNotice> {
        self.grab()
            .node()
            .or(self.seat.pointer().focus())
            .map(|node| InputNotice::PointerAxis {
                node,
                time,
                axis,
                value,
            })
            .into_iter()
            .collect()
    }

    pub fn key(&mut self, key: u32, state: KeyState, time: u32) -> Vec<InputNotice> {
        let changed = match state {
            KeyState::Pressed => self.seat.keyboard_mut().key_press(key),
            KeyState::Released => self.seat.keyboard_mut().key_release(key),
        };
        if !changed {
            return Vec::new();
        }
        let Some(node) = self.seat.keyboard_focus() else {
            return Vec::new();
        };
        let serial = self.next_serial();
        vec![InputNotice::Key {
            node,
            serial,
            time,
            key,
            state,
        }]
    }

    pub fn modifiers(&mut self, modifiers: ModifierState) -> Vec<InputNotice> {
        if !self.seat.keyboard_mut().update_modifiers(modifiers) {
            return Vec::new();
        }
        let Some(node) = self.seat.keyboard_focus() else {
            return Vec::new();
        };
        let serial = self.next_serial();
        vec![InputNotice::Modifiers {
            node,
            serial,
            modifiers,
        }]
    }

    /// Move keyboard focus; the caller guarantees `node` is live
    pub fn set_keyboard_focus(&mut self, node: Option<NodeId>) -> Vec<InputNotice> {
        let mut notices = Vec::new();
        if self.seat.keyboard_focus() == node {
            return notices;
        }

        let change = self.seat.keyboard_mut().set_focus(node);
        if let Some(old) = change.old_focus {
            let serial = self.next_serial();
            notices.push(InputNotice::KeyboardLeave { node: old, serial });
        }
        if let Some(new) = change.new_focus {
            let serial = self.next_serial();
            notices.push(InputNotice::KeyboardEnter {
                node: new,
                serial,
                keys: change.pressed_keys,
            });
            let serial = self.next_serial();
            notices.push(InputNotice::Modifiers {
                node: new,
                serial,
                modifiers: self.seat.keyboard().modifiers(),
            });
        }
        debug!("Keyboard focus {:?} -> {:?}", change.old_focus, node);
        notices
    }

    /// Forget a destroyed node
    pub fn node_destroyed(&mut self, node: NodeId) -> Vec<InputNotice> {
        let mut notices = Vec::new();

        let mut pointer_lost = false;
        if self.grab().node() == Some(node) {
            self.seat.pointer_mut().end_grab();
            pointer_lost = true;
        }
        if self.seat.pointer_focus() == Some(node) {
            self.seat.pointer_mut().set_focus(None);
            pointer_lost = true;
        }
        if pointer_lost {
            notices.push(InputNotice::FocusLost {
                node,
                kind: FocusKind::Pointer,
            });
        }

        if self.seat.keyboard_focus() == Some(node) {
            self.seat.keyboard_mut().set_focus(None);
            notices.push(InputNotice::FocusLost {
                node,
                kind: FocusKind::Keyboard,
            });
        }
        notices
    }

    /// Re-evaluate pointer focus at the cursor
    fn refocus(&mut self, scene: &SceneGraph, notices: &mut Vec<InputNotice>) {
        let position = self.seat.pointer().position();
        let hit = scene.node_at(position);
        let change = self.seat.pointer_mut().set_focus(hit.map(|(node, _)| node));
        if !change.changed() {
            return;
        }

        if let Some(old) = change.old_focus {
            let serial = self.next_serial();
            notices.push(InputNotice::PointerLeave { node: old, serial });
        }
        if let Some((node, local)) = hit {
            let serial = self.next_serial();
            notices.push(InputNotice::PointerEnter {
                node,
                serial,
                x: local.x,
                y: local.y,
            });
        }
    }
}

impl Default for InputRouter {
    fn default() -> Self {
        Self::new(Seat::new())
    }
}

fn local_point(scene: &SceneGraph, node: NodeId, position: Point) -> Option<Point> {
    scene
        .effective_transform(node)
        .ok()
        .map(|transform| transform.invert(position))
}

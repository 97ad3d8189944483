//! Delivery of compositor events to wayland clients

use log::{debug, trace, warn};
use wayland_server::protocol::{wl_keyboard, wl_output, wl_pointer, wl_surface::WlSurface};
use wayland_server::Resource;

use super::{OutputGlobal, ServerState, OUTPUT_VERSION};
use crate::compositor::CompositorEvent;
use crate::input::{Axis, ButtonState, InputNotice, KeyState};

/// Resources owned by the same client as `surface`
fn bound_to<'a, R: Resource>(
    resources: &'a [R],
    surface: &'a WlSurface,
) -> impl Iterator<Item = &'a R> + 'a {
    resources
        .iter()
        .filter(move |resource| resource.id().same_client_as(&surface.id()))
}

impl ServerState {
    pub(super) fn deliver(&mut self, event: CompositorEvent) {
        match event {
            CompositorEvent::FrameDone { callback, time, .. } => {
                if let Some(resource) = self.callbacks.remove(&callback) {
                    resource.done(time);
                }
            }
            CompositorEvent::BufferReleased { buffer, .. } => {
                if let Some(resource) = self.buffers.get(&buffer) {
                    trace!("Releasing buffer {}", buffer);
                    resource.release();
                }
            }
            CompositorEvent::BufferLost { node, buffer, .. } => {
                warn!("Node {} lost buffer {}", node, buffer);
                self.buffers.remove(&buffer);
            }
            CompositorEvent::CallbacksCancelled { callbacks, .. } => {
                for callback in callbacks {
                    self.callbacks.remove(&callback);
                }
            }
            CompositorEvent::Input(notice) => self.deliver_input(notice),
            CompositorEvent::OutputAdded(id) => {
                let global = self
                    .display
                    .create_global::<ServerState, wl_output::WlOutput, _>(OUTPUT_VERSION, id);
                debug!("Advertising wl_output for {}", id);
                self.outputs.insert(
                    id,
                    OutputGlobal {
                        global,
                        resources: Vec::new(),
                    },
                );
            }
            CompositorEvent::OutputRemoved(id) => {
                if let Some(output) = self.outputs.remove(&id) {
                    debug!("Withdrawing wl_output for {}", id);
                    self.display.remove_global::<ServerState>(output.global);
                }
            }
        }
    }

    fn deliver_input(&mut self, notice: InputNotice) {
        let Some(surface) = self.surfaces.get(&notice.node()) else {
            trace!("Input for node {} without a surface", notice.node());
            return;
        };

        match notice {
            InputNotice::PointerEnter { serial, x, y, .. } => {
                for pointer in bound_to(&self.pointers, surface) {
                    pointer.enter(serial, surface, x, y);
                    pointer_frame(pointer);
                }
            }
            InputNotice::PointerLeave { serial, .. } => {
                for pointer in bound_to(&self.pointers, surface) {
                    pointer.leave(serial, surface);
                    pointer_frame(pointer);
                }
            }
            InputNotice::PointerMotion { time, x, y, .. } => {
                for pointer in bound_to(&self.pointers, surface) {
                    pointer.motion(time, x, y);
                    pointer_frame(pointer);
                }
            }
            InputNotice::PointerButton {
                serial,
                time,
                button,
                state,
                ..
            } => {
                let state = match state {
                    ButtonState::Pressed => wl_pointer::ButtonState::Pressed,
                    ButtonState::Released => wl_pointer::ButtonState::Released,
                };
                for pointer in bound_to(&self.pointers, surface) {
                    pointer.button(serial, time, button, state);
                    pointer_frame(pointer);
                }
            }
            InputNotice::PointerAxis {
                time, axis, value, ..
            } => {
                let axis = match axis {
                    Axis::Vertical => wl_pointer::Axis::VerticalScroll,
                    Axis::Horizontal => wl_pointer::Axis::HorizontalScroll,
                };
                for pointer in bound_to(&self.pointers, surface) {
                    pointer.axis(time, axis, value);
                    pointer_frame(pointer);
                }
            }
            InputNotice::KeyboardEnter { serial, keys, .. } => {
                let keys: Vec<u8> = keys.iter().flat_map(|key| key.to_ne_bytes()).collect();
                for keyboard in bound_to(&self.keyboards, surface) {
                    keyboard.enter(serial, surface, keys.clone());
                }
            }
            InputNotice::KeyboardLeave { serial, .. } => {
                for keyboard in bound_to(&self.keyboards, surface) {
                    keyboard.leave(serial, surface);
                }
            }
            InputNotice::Key {
                serial,
                time,
                key,
                state,
                ..
            } => {
                let state = match state {
                    KeyState::Pressed => wl_keyboard::KeyState::Pressed,
                    KeyState::Released => wl_keyboard::KeyState::Released,
                };
                for keyboard in bound_to(&self.keyboards, surface) {
                    keyboard.key(serial, time, key, state);
                }
            }
            InputNotice::Modifiers {
                serial, modifiers, ..
            } => {
                for keyboard in bound_to(&self.keyboards, surface) {
                    keyboard.modifiers(
                        serial,
                        modifiers.depressed,
                        modifiers.latched,
                        modifiers.locked,
                        modifiers.group,
                    );
                }
            }
            InputNotice::FocusLost { node, kind } => {
                debug!("Node {} lost {:?} focus", node, kind);
            }
        }
    }
}

fn pointer_frame(pointer: &wl_pointer::WlPointer) {
    if pointer.version() >= 5 {
        pointer.frame();
    }
}

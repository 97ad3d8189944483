//! Input seat
//!
//! One seat groups the pointer and keyboard and hands out the serials
//! stamped on every event it emits.

use bitflags::bitflags;

use super::{Keyboard, Pointer};
use crate::scene::NodeId;

bitflags! {
    /// Seat capabilities, matching wl_seat::capability
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SeatCapabilities: u32 {
        const POINTER = 1;
        const KEYBOARD = 2;
        const TOUCH = 4;
    }
}

pub const DEFAULT_SEAT_NAME: &str = "seat0";

#[derive(Debug)]
pub struct Seat {
    name: String,
    capabilities: SeatCapabilities,
    keyboard: Keyboard,
    pointer: Pointer,
    /// Last serial handed out
    serial: u32,
}

impl Seat {
    /// Pointer and keyboard seat named `seat0`
    pub fn new() -> Self {
        Self::with_name(DEFAULT_SEAT_NAME.to_string())
    }

    pub fn with_name(name: String) -> Self {
        Self {
            name,
            capabilities: SeatCapabilities::POINTER | SeatCapabilities::KEYBOARD,
            keyboard: Keyboard::new(),
            pointer: Pointer::new(),
            serial: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> SeatCapabilities {
        self.capabilities
    }

    pub fn set_capabilities(&mut self, capabilities: SeatCapabilities) {
        self.capabilities = capabilities;
    }

    /// Allocate the next event serial; serials only grow, wrapping at u32
    pub fn next_serial(&mut self) -> u32 {
        self.serial = self.serial.wrapping_add(1);
        self.serial
    }

    pub fn keyboard(&self) -> &Keyboard {
        &self.keyboard
    }

    pub fn keyboard_mut(&mut self) -> &mut Keyboard {
        &mut self.keyboard
    }

    pub fn pointer(&self) -> &Pointer {
        &self.pointer
    }

    pub fn pointer_mut(&mut self) -> &mut Pointer {
        &mut self.pointer
    }

    pub fn keyboard_focus(&self) -> Option<NodeId> {
        self.keyboard.focus()
    }

    pub fn pointer_focus(&self) -> Option<NodeId> {
        self.pointer.focus()
    }
}

impl Default for Seat {
    fn default() -> Self {
        Self::new()
    }
}

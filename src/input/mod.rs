//! Input handling module
//!
//! This module provides keyboard, pointer, and seat management, and the
//! router deciding which node receives each event.

pub mod keyboard;
pub mod pointer;
pub mod router;
pub mod seat;

pub use keyboard::{Keyboard, KeyboardFocusChange, ModifierState, RepeatInfo};
pub use pointer::{Pointer, PointerGrab};
pub use router::{Axis, ButtonState, FocusKind, InputNotice, InputRouter, KeyState};
pub use seat::{Seat, SeatCapabilities};

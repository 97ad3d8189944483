//! Backend module
//!
//! Backends discover display devices and report hotplug changes:
//! - Headless backend with virtual outputs
//! - Event loop integration with calloop

pub mod event_loop;
pub mod headless;

pub use event_loop::EventLoop;
pub use headless::HeadlessBackend;

use crate::compositor::OutputDevice;

/// Device change reported by a backend
#[derive(Debug, Clone)]
pub enum BackendEvent {
    OutputAdded(OutputDevice),
    /// Output removed, by device name
    OutputRemoved(String),
}

/// Source of display devices
pub trait Backend {
    fn name(&self) -> &str;

    /// Devices present right now
    fn enumerate_outputs(&self) -> Vec<OutputDevice>;

    /// Hotplug notifications; can only be taken once
    fn take_hotplug(&mut self) -> Option<calloop::channel::Channel<BackendEvent>>;
}

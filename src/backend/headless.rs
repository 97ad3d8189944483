//! Headless backend
//!
//! Virtual outputs built from configured modes. Hotplug events can be
//! injected through [`HeadlessBackend::hotplug_sender`].

use calloop::channel::{self, Channel, Sender};
use log::info;

use super::{Backend, BackendEvent};
use crate::compositor::{OutputDevice, OutputMode};

pub struct HeadlessBackend {
    devices: Vec<OutputDevice>,
    sender: Sender<BackendEvent>,
    hotplug: Option<Channel<BackendEvent>>,
}

impl HeadlessBackend {
    /// One virtual output per mode, named `HEADLESS-1`, `HEADLESS-2`, ...
    pub fn new(modes: &[OutputMode]) -> Self {
        let devices: Vec<OutputDevice> = modes
            .iter()
            .enumerate()
            .map(|(index, mode)| virtual_device(index + 1, *mode))
            .collect();
        let (sender, hotplug) = channel::channel();

        info!("Headless backend with {} outputs", devices.len());
        Self {
            devices,
            sender,
            hotplug: Some(hotplug),
        }
    }

    /// Inject device changes
    pub fn hotplug_sender(&self) -> Sender<BackendEvent> {
        self.sender.clone()
    }
}

/// A virtual output device
pub fn virtual_device(index: usize, mode: OutputMode) -> OutputDevice {
    OutputDevice {
        name: format!("HEADLESS-{}", index),
        make: "Goose".to_string(),
        model: "Virtual Output".to_string(),
        serial: index.to_string(),
        scale: 1,
        modes: vec![OutputMode {
            preferred: true,
            ..mode
        }],
        ..Default::default()
    }
}

impl Backend for HeadlessBackend {
    fn name(&self) -> &str {
        "headless"
    }

    fn enumerate_outputs(&self) -> Vec<OutputDevice> {
        self.devices.clone()
    }

    fn take_hotplug(&mut self) -> Option<Channel<BackendEvent>> {
        self.hotplug.take()
    }
}

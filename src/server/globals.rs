//! Wayland global registry implementations
//!
//! Implements GlobalDispatch for advertising globals to clients.

use log::debug;
use wayland_server::backend::GlobalId;
use wayland_server::protocol::{
    wl_compositor, wl_data_device_manager, wl_output, wl_seat, wl_shm, wl_subcompositor,
};
use wayland_server::{Client, DataInit, DisplayHandle, GlobalDispatch, New, Resource};

use super::ServerState;
use crate::compositor::{Output, OutputId};
use crate::input::SeatCapabilities;

pub const COMPOSITOR_VERSION: u32 = 5;
pub const SUBCOMPOSITOR_VERSION: u32 = 1;
pub const DATA_DEVICE_MANAGER_VERSION: u32 = 3;
pub const SHM_VERSION: u32 = 1;
pub const SEAT_VERSION: u32 = 7;
pub const OUTPUT_VERSION: u32 = 4;

pub fn create_compositor_global(dh: &DisplayHandle) -> GlobalId {
    dh.create_global::<ServerState, wl_compositor::WlCompositor, _>(COMPOSITOR_VERSION, ())
}

pub fn create_subcompositor_global(dh: &DisplayHandle) -> GlobalId {
    dh.create_global::<ServerState, wl_subcompositor::WlSubcompositor, _>(
        SUBCOMPOSITOR_VERSION,
        (),
    )
}

pub fn create_data_device_manager_global(dh: &DisplayHandle) -> GlobalId {
    dh.create_global::<ServerState, wl_data_device_manager::WlDataDeviceManager, _>(
        DATA_DEVICE_MANAGER_VERSION,
        (),
    )
}

pub fn create_shm_global(dh: &DisplayHandle) -> GlobalId {
    dh.create_global::<ServerState, wl_shm::WlShm, _>(SHM_VERSION, ())
}

pub fn create_seat_global(dh: &DisplayHandle) -> GlobalId {
    dh.create_global::<ServerState, wl_seat::WlSeat, _>(SEAT_VERSION, ())
}

// ============================================================================
// wl_compositor global
// ============================================================================

impl GlobalDispatch<wl_compositor::WlCompositor, ()> for ServerState {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<wl_compositor::WlCompositor>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        debug!("Client bound wl_compositor");
        data_init.init(resource, ());
    }
}

// ============================================================================
// wl_subcompositor global
// ============================================================================

impl GlobalDispatch<wl_subcompositor::WlSubcompositor, ()> for ServerState {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<wl_subcompositor::WlSubcompositor>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        debug!("Client bound wl_subcompositor");
        data_init.init(resource, ());
    }
}

// ============================================================================
// wl_data_device_manager global
// ============================================================================

impl GlobalDispatch<wl_data_device_manager::WlDataDeviceManager, ()> for ServerState {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<wl_data_device_manager::WlDataDeviceManager>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        debug!("Client bound wl_data_device_manager");
        data_init.init(resource, ());
    }
}

// ============================================================================
// wl_shm global
// ============================================================================

impl GlobalDispatch<wl_shm::WlShm, ()> for ServerState {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<wl_shm::WlShm>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        debug!("Client bound wl_shm");
        let shm = data_init.init(resource, ());

        // Send supported formats
        shm.format(wl_shm::Format::Argb8888);
        shm.format(wl_shm::Format::Xrgb8888);
    }
}

// ============================================================================
// wl_seat global
// ============================================================================

/// Wire capabilities of a seat
pub fn wire_capabilities(capabilities: SeatCapabilities) -> wl_seat::Capability {
    let mut wire = wl_seat::Capability::empty();
    if capabilities.contains(SeatCapabilities::POINTER) {
        wire |= wl_seat::Capability::Pointer;
    }
    if capabilities.contains(SeatCapabilities::KEYBOARD) {
        wire |= wl_seat::Capability::Keyboard;
    }
    if capabilities.contains(SeatCapabilities::TOUCH) {
        wire |= wl_seat::Capability::Touch;
    }
    wire
}

impl GlobalDispatch<wl_seat::WlSeat, ()> for ServerState {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<wl_seat::WlSeat>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        debug!("Client bound wl_seat");

        let seat = data_init.init(resource, ());
        let core_seat = state.compositor.input().seat();
        seat.capabilities(wire_capabilities(core_seat.capabilities()));

        // Send name if version >= 2
        if seat.version() >= 2 {
            seat.name(core_seat.name().to_string());
        }
    }
}

// ============================================================================
// wl_output global
// ============================================================================

/// Describe an output to a freshly bound wl_output
pub fn send_output_info(resource: &wl_output::WlOutput, output: &Output) {
    let subpixel = wl_output::Subpixel::try_from(output.subpixel.to_wayland())
        .unwrap_or(wl_output::Subpixel::Unknown);
    let transform = wl_output::Transform::try_from(output.transform.to_wayland())
        .unwrap_or(wl_output::Transform::Normal);
    resource.geometry(
        output.x,
        output.y,
        output.physical_width,
        output.physical_height,
        subpixel,
        output.make.clone(),
        output.model.clone(),
        transform,
    );

    for (index, mode) in output.modes.iter().enumerate() {
        let mut flags = wl_output::Mode::empty();
        if index == output.current_mode {
            flags |= wl_output::Mode::Current;
        }
        if mode.preferred {
            flags |= wl_output::Mode::Preferred;
        }
        resource.mode(flags, mode.width, mode.height, mode.refresh as i32);
    }

    if resource.version() >= 2 {
        resource.scale(output.scale);
    }
    if resource.version() >= 4 {
        resource.name(output.name.clone());
        resource.description(format!("{} {}", output.make, output.model));
    }
    if resource.version() >= 2 {
        resource.done();
    }
}

impl GlobalDispatch<wl_output::WlOutput, OutputId> for ServerState {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<wl_output::WlOutput>,
        global_data: &OutputId,
        data_init: &mut DataInit<'_, Self>,
    ) {
        debug!("Client bound wl_output for {}", global_data);
        let output = data_init.init(resource, *global_data);

        if let Some(out) = state.compositor.outputs().get(*global_data) {
            send_output_info(&output, out);
        }
        if let Some(global) = state.outputs.get_mut(global_data) {
            global.resources.push(output);
        }
    }
}

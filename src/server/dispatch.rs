//! Wayland protocol dispatch implementations
//!
//! Implements the Dispatch trait for each Wayland protocol object.
//! Requests are parsed into compositor operations; failures the client
//! caused become protocol errors, everything else is logged.

use std::fs::File;
use std::os::unix::io::AsFd;
use std::sync::Mutex;

use log::{debug, warn};
use wayland_server::protocol::{
    wl_buffer, wl_callback, wl_compositor, wl_data_device, wl_data_device_manager,
    wl_data_source, wl_keyboard, wl_output, wl_pointer, wl_region, wl_seat, wl_shm, wl_shm_pool,
    wl_subcompositor, wl_subsurface, wl_surface, wl_touch,
};
use wayland_server::{Client, DataInit, Dispatch, DisplayHandle, Resource, WEnum};

use super::shm::{validate_buffer, ShmPoolData};
use super::{client_id, ServerState};
use crate::compositor::{BufferId, CompositorError, CompositorState, OutputId};
use crate::geometry::{Rect, Region};
use crate::scene::NodeId;

/// wl_surface user data
#[derive(Debug, Clone, Copy)]
pub struct SurfaceData {
    pub node: NodeId,
}

/// wl_subsurface user data
#[derive(Debug, Clone, Copy)]
pub struct SubsurfaceData {
    pub node: NodeId,
    pub parent: NodeId,
}

/// wl_buffer user data
#[derive(Debug, Clone, Copy)]
pub struct BufferData {
    pub id: BufferId,
}

/// wl_data_source user data
#[derive(Debug, Default)]
pub struct DataSourceData {
    pub mime_types: Mutex<Vec<String>>,
}

fn surface_node(surface: &wl_surface::WlSurface) -> Option<NodeId> {
    surface.data::<SurfaceData>().map(|data| data.node)
}

// ============================================================================
// wl_compositor
// ============================================================================

impl Dispatch<wl_compositor::WlCompositor, ()> for ServerState {
    fn request(
        state: &mut Self,
        client: &Client,
        _resource: &wl_compositor::WlCompositor,
        request: wl_compositor::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_compositor::Request::CreateSurface { id } => {
                let Some(owner) = client_id(client) else {
                    data_init.post_error(id, 0u32, "unknown client");
                    return;
                };
                match state
                    .compositor
                    .create_surface(owner, Some(state.client_layer))
                {
                    Ok(node) => {
                        debug!("Created wl_surface for node {}", node);
                        let surface = data_init.init(id, SurfaceData { node });
                        state.surfaces.insert(node, surface);
                    }
                    Err(e) => {
                        warn!("Failed to create surface: {}", e);
                        data_init.post_error(id, 0u32, e.to_string());
                    }
                }
            }
            wl_compositor::Request::CreateRegion { id } => {
                debug!("Created wl_region");
                data_init.init(id, Mutex::new(Region::new()));
            }
            _ => {}
        }
    }
}

// ============================================================================
// wl_surface
// ============================================================================

impl Dispatch<wl_surface::WlSurface, SurfaceData> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &wl_surface::WlSurface,
        request: wl_surface::Request,
        data: &SurfaceData,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        let node = data.node;
        let result = match request {
            wl_surface::Request::Attach { buffer, x, y } => {
                if (x, y) != (0, 0) {
                    debug!("Node {} attach offset ({}, {}) ignored", node, x, y);
                }
                let buffer = buffer.and_then(|b| b.data::<BufferData>().map(|data| data.id));
                state.compositor.attach(node, buffer)
            }
            wl_surface::Request::Damage {
                x,
                y,
                width,
                height,
            } => match clamp_damage(state, node, Rect::new(x, y, width, height)) {
                Some(rect) => state.compositor.damage_surface(node, rect),
                None => Ok(()),
            },
            wl_surface::Request::DamageBuffer {
                x,
                y,
                width,
                height,
            } => {
                let scale = state
                    .compositor
                    .scene()
                    .surface(node)
                    .map(|surface| surface.scale)
                    .unwrap_or(1);
                let rect = buffer_to_surface(Rect::new(x, y, width, height), scale);
                match clamp_damage(state, node, rect) {
                    Some(rect) => state.compositor.damage_surface(node, rect),
                    None => Ok(()),
                }
            }
            wl_surface::Request::Frame { callback } => {
                let id = state.next_callback_id();
                let callback = data_init.init(callback, ());
                state.callbacks.insert(id, callback);
                state.compositor.frame(node, id)
            }
            wl_surface::Request::SetOpaqueRegion { region: _ } => {
                debug!("Node {} set opaque region", node);
                Ok(())
            }
            wl_surface::Request::SetInputRegion { region } => {
                let region = region.and_then(|region| {
                    region
                        .data::<Mutex<Region>>()
                        .and_then(|data| data.lock().ok().map(|region| region.clone()))
                });
                state.compositor.set_input_region(node, region)
            }
            wl_surface::Request::Commit => state.compositor.commit_surface(node),
            wl_surface::Request::SetBufferTransform { transform } => {
                let transform = match transform {
                    WEnum::Value(v) => v as u32,
                    WEnum::Unknown(v) => v,
                };
                debug!("Node {} buffer transform {} ignored", node, transform);
                Ok(())
            }
            wl_surface::Request::SetBufferScale { scale } => {
                if scale < 1 {
                    resource.post_error(wl_surface::Error::InvalidScale, "scale must be positive");
                    return;
                }
                state.compositor.set_buffer_scale(node, scale)
            }
            wl_surface::Request::Offset { x, y } => {
                debug!("Node {} offset ({}, {}) ignored", node, x, y);
                Ok(())
            }
            _ => Ok(()),
        };

        if let Err(e) = result {
            warn!("Request on node {} failed: {}", node, e);
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        _resource: &wl_surface::WlSurface,
        data: &SurfaceData,
    ) {
        debug!("Surface for node {} destroyed", data.node);
        state.surfaces.remove(&data.node);
        if state.compositor.scene().is_alive(data.node) {
            if let Err(e) = state.compositor.destroy_node(data.node) {
                warn!("Failed to destroy node {}: {}", data.node, e);
            }
        }
    }
}

/// Buffer pixels to surface coordinates, rounded outward
fn buffer_to_surface(rect: Rect, scale: i32) -> Rect {
    let scale = scale.max(1) as i64;
    let x = (rect.x as i64).div_euclid(scale);
    let y = (rect.y as i64).div_euclid(scale);
    let right = (rect.right() as i64 + scale - 1).div_euclid(scale);
    let bottom = (rect.bottom() as i64 + scale - 1).div_euclid(scale);
    Rect::from_edges(x as i32, y as i32, right as i32, bottom as i32)
}

/// Client damage limited to the surface's current content
fn clamp_damage(state: &ServerState, node: NodeId, rect: Rect) -> Option<Rect> {
    let (width, height) = state
        .compositor
        .scene()
        .surface(node)
        .map(|surface| surface.size)
        .unwrap_or((0, 0));
    // Unmapped surfaces keep the damage until the commit sizes them
    if width <= 0 || height <= 0 {
        return Some(rect);
    }
    rect.intersection(&Rect::new(0, 0, width, height))
}

// ============================================================================
// wl_region
// ============================================================================

impl Dispatch<wl_region::WlRegion, Mutex<Region>> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_region::WlRegion,
        request: wl_region::Request,
        data: &Mutex<Region>,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let Ok(mut region) = data.lock() else {
            return;
        };
        match request {
            wl_region::Request::Add {
                x,
                y,
                width,
                height,
            } => region.add(Rect::new(x, y, width, height)),
            wl_region::Request::Subtract {
                x,
                y,
                width,
                height,
            } => region.subtract(Rect::new(x, y, width, height)),
            _ => {}
        }
    }
}

// ============================================================================
// wl_callback
// ============================================================================

impl Dispatch<wl_callback::WlCallback, ()> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_callback::WlCallback,
        _request: wl_callback::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        // wl_callback has no requests
    }
}

// ============================================================================
// wl_subcompositor / wl_subsurface
// ============================================================================

impl Dispatch<wl_subcompositor::WlSubcompositor, ()> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        _resource: &wl_subcompositor::WlSubcompositor,
        request: wl_subcompositor::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        if let wl_subcompositor::Request::GetSubsurface {
            id,
            surface,
            parent,
        } = request
        {
            let (Some(node), Some(parent)) = (surface_node(&surface), surface_node(&parent)) else {
                data_init.post_error(id, wl_subcompositor::Error::BadSurface, "unknown surface");
                return;
            };
            match state.compositor.make_subsurface(node, parent) {
                Ok(()) => {
                    debug!("Node {} is now a subsurface of {}", node, parent);
                    data_init.init(id, SubsurfaceData { node, parent });
                }
                Err(e) => {
                    data_init.post_error(id, wl_subcompositor::Error::BadSurface, e.to_string());
                }
            }
        }
    }
}

/// Stack a subsurface against a sibling; naming the parent places it
/// directly above or below the parent's own content
fn restack_subsurface(
    compositor: &mut CompositorState,
    data: &SubsurfaceData,
    sibling: NodeId,
    above: bool,
) -> Result<(), CompositorError> {
    match (sibling == data.parent, above) {
        (true, true) => compositor.place_above_parent(data.node),
        (true, false) => compositor.place_below_parent(data.node),
        (false, true) => compositor.place_above(data.node, sibling),
        (false, false) => compositor.place_below(data.node, sibling),
    }
}

impl Dispatch<wl_subsurface::WlSubsurface, SubsurfaceData> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &wl_subsurface::WlSubsurface,
        request: wl_subsurface::Request,
        data: &SubsurfaceData,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let node = data.node;
        let result = match request {
            wl_subsurface::Request::SetPosition { x, y } => {
                state.compositor.set_position(node, x as f64, y as f64)
            }
            wl_subsurface::Request::PlaceAbove { sibling } => match surface_node(&sibling) {
                Some(sibling) => restack_subsurface(&mut state.compositor, data, sibling, true),
                None => Ok(()),
            },
            wl_subsurface::Request::PlaceBelow { sibling } => match surface_node(&sibling) {
                Some(sibling) => restack_subsurface(&mut state.compositor, data, sibling, false),
                None => Ok(()),
            },
            wl_subsurface::Request::SetSync | wl_subsurface::Request::SetDesync => {
                debug!("Node {} commit mode change ignored", node);
                Ok(())
            }
            _ => Ok(()),
        };

        if let Err(e) = result {
            resource.post_error(wl_subsurface::Error::BadSurface, e.to_string());
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        _resource: &wl_subsurface::WlSubsurface,
        data: &SubsurfaceData,
    ) {
        // The wl_surface lives on but is no longer shown
        if state.compositor.scene().is_alive(data.node) {
            if let Err(e) = state.compositor.set_enabled(data.node, false) {
                warn!("Failed to hide node {}: {}", data.node, e);
            }
        }
    }
}

// ============================================================================
// wl_shm
// ============================================================================

impl Dispatch<wl_shm::WlShm, ()> for ServerState {
    fn request(
        _state: &mut Self,
        client: &Client,
        _resource: &wl_shm::WlShm,
        request: wl_shm::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        if let wl_shm::Request::CreatePool { id, fd, size } = request {
            debug!("Creating shm pool, size {}", size);
            let Some(owner) = client_id(client) else {
                data_init.post_error(id, wl_shm::Error::InvalidFd, "unknown client");
                return;
            };
            match ShmPoolData::new(owner, fd, size) {
                Ok(pool) => {
                    data_init.init(id, pool);
                }
                Err(e) => data_init.post_error(id, e.code(), e.to_string()),
            }
        }
    }
}

// ============================================================================
// wl_shm_pool
// ============================================================================

impl Dispatch<wl_shm_pool::WlShmPool, ShmPoolData> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &wl_shm_pool::WlShmPool,
        request: wl_shm_pool::Request,
        pool: &ShmPoolData,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_shm_pool::Request::CreateBuffer {
                id,
                offset,
                width,
                height,
                stride,
                format,
            } => {
                let format = match format {
                    WEnum::Value(v) => v as u32,
                    WEnum::Unknown(v) => v,
                };
                let format =
                    match validate_buffer(pool.size(), offset, width, height, stride, format) {
                        Ok(format) => format,
                        Err(e) => {
                            data_init.post_error(id, e.code(), e.to_string());
                            return;
                        }
                    };
                match state
                    .compositor
                    .create_buffer(pool.client, width, height, format)
                {
                    Ok(buffer_id) => {
                        let buffer = data_init.init(id, BufferData { id: buffer_id });
                        state.buffers.insert(buffer_id, buffer);
                    }
                    Err(e) => {
                        warn!("Failed to create buffer: {}", e);
                        data_init.post_error(id, wl_shm::Error::InvalidStride, e.to_string());
                    }
                }
            }
            wl_shm_pool::Request::Resize { size } => {
                if let Err(e) = pool.resize(size) {
                    resource.post_error(e.code(), e.to_string());
                }
            }
            _ => {}
        }
    }
}

// ============================================================================
// wl_buffer
// ============================================================================

impl Dispatch<wl_buffer::WlBuffer, BufferData> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_buffer::WlBuffer,
        _request: wl_buffer::Request,
        _data: &BufferData,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        // Destroy is handled in `destroyed`
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        _resource: &wl_buffer::WlBuffer,
        data: &BufferData,
    ) {
        state.buffers.remove(&data.id);
        if state.compositor.buffers().is_live(data.id) {
            if let Err(e) = state.compositor.release_buffer(data.id) {
                debug!("Releasing buffer {}: {}", data.id, e);
            }
        }
    }
}

// ============================================================================
// wl_seat
// ============================================================================

impl Dispatch<wl_seat::WlSeat, ()> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        _resource: &wl_seat::WlSeat,
        request: wl_seat::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_seat::Request::GetPointer { id } => {
                debug!("Creating pointer");
                let pointer = data_init.init(id, ());
                state.pointers.push(pointer);
            }
            wl_seat::Request::GetKeyboard { id } => {
                debug!("Creating keyboard");
                let keyboard = data_init.init(id, ());
                send_keymap(&keyboard);
                if keyboard.version() >= 4 {
                    let repeat = state.compositor.input().seat().keyboard().repeat();
                    keyboard.repeat_info(repeat.rate as i32, repeat.delay as i32);
                }
                state.keyboards.push(keyboard);
            }
            wl_seat::Request::GetTouch { id } => {
                debug!("Creating touch");
                data_init.init(id, ());
            }
            wl_seat::Request::Release => {
                debug!("Seat release");
            }
            _ => {}
        }
    }
}

/// Keys arrive already decoded, so clients get no keymap
fn send_keymap(keyboard: &wl_keyboard::WlKeyboard) {
    match File::open("/dev/null") {
        Ok(file) => keyboard.keymap(wl_keyboard::KeymapFormat::NoKeymap, file.as_fd(), 0),
        Err(e) => warn!("Failed to open keymap placeholder: {}", e),
    }
}

// ============================================================================
// wl_pointer / wl_keyboard / wl_touch
// ============================================================================

impl Dispatch<wl_pointer::WlPointer, ()> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_pointer::WlPointer,
        request: wl_pointer::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_pointer::Request::SetCursor {
                serial: _,
                surface: _,
                hotspot_x,
                hotspot_y,
            } => {
                debug!("Set cursor at ({}, {})", hotspot_x, hotspot_y);
            }
            wl_pointer::Request::Release => {
                debug!("Pointer release");
            }
            _ => {}
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        resource: &wl_pointer::WlPointer,
        _data: &(),
    ) {
        state.pointers.retain(|pointer| pointer.id() != resource.id());
    }
}

impl Dispatch<wl_keyboard::WlKeyboard, ()> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_keyboard::WlKeyboard,
        request: wl_keyboard::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        if let wl_keyboard::Request::Release = request {
            debug!("Keyboard release");
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        resource: &wl_keyboard::WlKeyboard,
        _data: &(),
    ) {
        state.keyboards.retain(|keyboard| keyboard.id() != resource.id());
    }
}

impl Dispatch<wl_touch::WlTouch, ()> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_touch::WlTouch,
        request: wl_touch::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        if let wl_touch::Request::Release = request {
            debug!("Touch release");
        }
    }
}

// ============================================================================
// wl_output
// ============================================================================

impl Dispatch<wl_output::WlOutput, OutputId> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_output::WlOutput,
        request: wl_output::Request,
        _data: &OutputId,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        if let wl_output::Request::Release = request {
            debug!("Output release");
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        resource: &wl_output::WlOutput,
        data: &OutputId,
    ) {
        if let Some(output) = state.outputs.get_mut(data) {
            output.resources.retain(|bound| bound.id() != resource.id());
        }
    }
}

// ============================================================================
// wl_data_device_manager / wl_data_source / wl_data_device
// ============================================================================

impl Dispatch<wl_data_device_manager::WlDataDeviceManager, ()> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_data_device_manager::WlDataDeviceManager,
        request: wl_data_device_manager::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_data_device_manager::Request::CreateDataSource { id } => {
                debug!("Creating data source");
                data_init.init(id, DataSourceData::default());
            }
            wl_data_device_manager::Request::GetDataDevice { id, seat: _ } => {
                debug!("Creating data device");
                data_init.init(id, ());
            }
            _ => {}
        }
    }
}

impl Dispatch<wl_data_source::WlDataSource, DataSourceData> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_data_source::WlDataSource,
        request: wl_data_source::Request,
        data: &DataSourceData,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_data_source::Request::Offer { mime_type } => {
                if let Ok(mut mime_types) = data.mime_types.lock() {
                    mime_types.push(mime_type);
                }
            }
            wl_data_source::Request::SetActions { dnd_actions } => {
                debug!("Data source actions {:?}", dnd_actions);
            }
            _ => {}
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        resource: &wl_data_source::WlDataSource,
        _data: &DataSourceData,
    ) {
        if state
            .selection
            .as_ref()
            .is_some_and(|selection| selection.id() == resource.id())
        {
            state.selection = None;
        }
    }
}

impl Dispatch<wl_data_device::WlDataDevice, ()> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        _resource: &wl_data_device::WlDataDevice,
        request: wl_data_device::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_data_device::Request::SetSelection { source, serial } => {
                debug!("Set selection (serial {})", serial);
                let previous = std::mem::replace(&mut state.selection, source);
                if let Some(previous) = previous {
                    let replaced = state
                        .selection
                        .as_ref()
                        .map_or(true, |current| current.id() != previous.id());
                    if replaced {
                        previous.cancelled();
                    }
                }
            }
            wl_data_device::Request::StartDrag { source, .. } => {
                debug!("Drag and drop is not supported");
                if let Some(source) = source {
                    source.cancelled();
                }
            }
            wl_data_device::Request::Release => {
                debug!("Data device release");
            }
            _ => {}
        }
    }
}

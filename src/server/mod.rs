//! Wayland server implementation
//!
//! This module sets up the Wayland display server, registers globals,
//! parses client requests into compositor operations and delivers
//! compositor events back to clients.

mod dispatch;
mod events;
mod globals;
pub mod shm;

use std::collections::HashMap;
use std::os::unix::io::AsFd;
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex};

use calloop::generic::Generic;
use calloop::{Interest, LoopHandle, Mode, PostAction, RegistrationToken};
use log::{debug, error, info, warn};
use wayland_server::backend::{ClientData, DisconnectReason, GlobalId};
use wayland_server::protocol::{
    wl_buffer::WlBuffer, wl_callback::WlCallback, wl_data_source::WlDataSource,
    wl_keyboard::WlKeyboard, wl_output::WlOutput, wl_pointer::WlPointer, wl_surface::WlSurface,
};
use wayland_server::{Client, Display, DisplayHandle, ListeningSocket, Resource};

use crate::compositor::{
    BufferId, CallbackId, ClientId, CompositorError, CompositorState, OutputId,
};
use crate::scene::NodeId;

pub use dispatch::{BufferData, SubsurfaceData, SurfaceData};
pub use globals::*;

/// The Wayland display before it starts listening
pub struct WaylandServer {
    /// The Wayland display
    display: Display<ServerState>,
}

/// A listening server
pub struct Listener {
    /// Socket name for WAYLAND_DISPLAY
    pub socket_name: String,
    /// Loop sources owned by the server
    pub tokens: Vec<RegistrationToken>,
}

impl WaylandServer {
    /// Create a new Wayland server
    pub fn new() -> anyhow::Result<Self> {
        info!("Creating Wayland display server");
        let display: Display<ServerState> = Display::new()?;
        Ok(Self { display })
    }

    /// Get a handle to the display for registering globals
    pub fn display_handle(&self) -> DisplayHandle {
        self.display.handle()
    }

    /// Bind the listening socket and insert the display into the loop
    ///
    /// Without a name the first free `wayland-N` socket is used.
    pub fn listen(
        mut self,
        name: Option<&str>,
        handle: &LoopHandle<'static, ServerState>,
    ) -> anyhow::Result<Listener> {
        let socket = match name {
            Some(name) => ListeningSocket::bind(name)?,
            None => ListeningSocket::bind_auto("wayland", 1..33)?,
        };
        let socket_name = socket
            .socket_name()
            .and_then(|n| n.to_str().map(String::from))
            .unwrap_or_else(|| "wayland-0".to_string());

        info!("Wayland socket: {}", socket_name);

        let mut tokens = Vec::with_capacity(2);

        // Client connections
        tokens.push(handle.insert_source(
            Generic::new(
                socket.as_fd().try_clone_to_owned()?,
                Interest::READ,
                Mode::Level,
            ),
            move |_, _, state: &mut ServerState| {
                while let Some(stream) = socket.accept()? {
                    state.accept(stream);
                }
                Ok(PostAction::Continue)
            },
        )?);

        // Client requests
        let source = Generic::new(
            self.display.backend().poll_fd().try_clone_to_owned()?,
            Interest::READ,
            Mode::Level,
        );
        let mut display = self.display;
        let token = handle.insert_source(source, move |_, _, state: &mut ServerState| {
            display.dispatch_clients(state)?;
            state.flush();
            Ok(PostAction::Continue)
        });
        match token {
            Ok(token) => tokens.push(token),
            Err(err) => {
                for token in tokens {
                    handle.remove(token);
                }
                return Err(err.into());
            }
        }

        Ok(Listener {
            socket_name,
            tokens,
        })
    }
}

/// Per-connection data
pub struct ClientState {
    pub id: ClientId,
    disconnected: Arc<Mutex<Vec<ClientId>>>,
}

impl ClientData for ClientState {
    fn disconnected(&self, _client_id: wayland_server::backend::ClientId, reason: DisconnectReason) {
        debug!("Client {:?} disconnected: {:?}", self.id, reason);
        if let Ok(mut gone) = self.disconnected.lock() {
            gone.push(self.id);
        }
    }
}

/// Compositor client behind a wayland client
pub(crate) fn client_id(client: &Client) -> Option<ClientId> {
    client.get_data::<ClientState>().map(|data| data.id)
}

/// wl_output global and the resources bound to it
struct OutputGlobal {
    global: GlobalId,
    resources: Vec<WlOutput>,
}

/// State passed to Wayland dispatch handlers
pub struct ServerState {
    /// Compositor core
    pub compositor: CompositorState,
    display: DisplayHandle,
    /// Parent layer of every client surface
    client_layer: NodeId,

    surfaces: HashMap<NodeId, WlSurface>,
    buffers: HashMap<BufferId, WlBuffer>,
    callbacks: HashMap<CallbackId, WlCallback>,
    next_callback: u64,
    pointers: Vec<WlPointer>,
    keyboards: Vec<WlKeyboard>,
    outputs: HashMap<OutputId, OutputGlobal>,
    selection: Option<WlDataSource>,

    disconnected: Arc<Mutex<Vec<ClientId>>>,
}

impl ServerState {
    /// Create a new server state
    pub fn new(mut compositor: CompositorState, display: DisplayHandle) -> Result<Self, CompositorError> {
        let client_layer = compositor.create_layer(None)?;
        Ok(Self {
            compositor,
            display,
            client_layer,
            surfaces: HashMap::new(),
            buffers: HashMap::new(),
            callbacks: HashMap::new(),
            next_callback: 1,
            pointers: Vec::new(),
            keyboards: Vec::new(),
            outputs: HashMap::new(),
            selection: None,
            disconnected: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn display_handle(&self) -> &DisplayHandle {
        &self.display
    }

    /// Layer holding client surfaces
    pub fn client_layer(&self) -> NodeId {
        self.client_layer
    }

    /// Wayland surface displaying a node
    pub fn surface_for(&self, node: NodeId) -> Option<&WlSurface> {
        self.surfaces.get(&node)
    }

    fn accept(&mut self, stream: UnixStream) {
        let id = self.compositor.add_client();
        let data = Arc::new(ClientState {
            id,
            disconnected: self.disconnected.clone(),
        });
        if let Err(e) = self.display.insert_client(stream, data) {
            error!("Failed to insert client: {}", e);
            if let Err(e) = self.compositor.remove_client(id) {
                warn!("Failed to drop rejected client {:?}: {}", id, e);
            }
        }
    }

    fn next_callback_id(&mut self) -> CallbackId {
        let id = CallbackId(self.next_callback);
        self.next_callback += 1;
        id
    }

    /// Clean up after disconnected clients and send pending events
    pub fn flush(&mut self) {
        let gone = match self.disconnected.lock() {
            Ok(mut gone) => std::mem::take(&mut *gone),
            Err(_) => Vec::new(),
        };
        for id in gone {
            if let Err(e) = self.compositor.remove_client(id) {
                debug!("Removing client {:?}: {}", id, e);
            }
        }

        for event in self.compositor.drain_events() {
            self.deliver(event);
        }
        self.prune();

        if let Err(e) = self.display.flush_clients() {
            warn!("Failed to flush clients: {}", e);
        }
    }

    /// Forget resources whose client or node went away
    fn prune(&mut self) {
        let scene = self.compositor.scene();
        self.surfaces.retain(|node, _| scene.is_alive(*node));
        let buffers = self.compositor.buffers();
        self.buffers.retain(|id, _| buffers.is_live(*id));
        self.callbacks.retain(|_, callback| callback.is_alive());
        self.pointers.retain(|pointer| pointer.is_alive());
        self.keyboards.retain(|keyboard| keyboard.is_alive());
        for output in self.outputs.values_mut() {
            output.resources.retain(|resource| resource.is_alive());
        }
    }
}

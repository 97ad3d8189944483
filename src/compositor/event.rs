//! Notifications produced by the core for the transport

use crate::compositor::buffer::BufferId;
use crate::compositor::output::OutputId;
use crate::compositor::surface::CallbackId;
use crate::compositor::ClientId;
use crate::input::InputNotice;
use crate::scene::NodeId;

/// Something clients need to hear about
#[derive(Debug, Clone, PartialEq)]
pub enum CompositorEvent {
    /// A frame callback fired; `time` is in milliseconds
    FrameDone {
        client: Option<ClientId>,
        callback: CallbackId,
        time: u32,
    },
    /// The scene no longer reads the buffer
    BufferReleased { client: ClientId, buffer: BufferId },
    /// A node referenced a buffer that is gone
    BufferLost {
        client: Option<ClientId>,
        node: NodeId,
        buffer: BufferId,
    },
    /// Frame callbacks of a destroyed node that will never fire
    CallbacksCancelled {
        client: Option<ClientId>,
        callbacks: Vec<CallbackId>,
    },
    Input(InputNotice),
    OutputAdded(OutputId),
    OutputRemoved(OutputId),
}

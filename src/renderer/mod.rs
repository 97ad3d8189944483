//! Rendering module
//!
//! The core hands each frame snapshot to a [`RenderBackend`], which turns
//! it into a [`ComposedFrame`] and presents it asynchronously. Completion
//! comes back as a [`PresentAck`](crate::compositor::frame::PresentAck)
//! on the owner thread.

pub mod headless;

pub use headless::HeadlessRenderer;

use crate::compositor::buffer::{BufferFormat, BufferId};
use crate::compositor::frame::FrameSnapshot;
use crate::compositor::output::OutputId;
use crate::geometry::Rect;
use crate::scene::NodeId;

/// Render backend errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("node {node} uses unsupported format {format:?}")]
    UnsupportedFormat { node: NodeId, format: BufferFormat },
    #[error("presentation worker is gone")]
    Disconnected,
    #[error("presentation failed: {0}")]
    Present(String),
}

/// One textured quad
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawOp {
    pub node: NodeId,
    pub buffer: BufferId,
    /// Source size in buffer pixels
    pub src: (i32, i32),
    /// Destination in output-local coordinates
    pub dst: Rect,
}

/// A frame ready for presentation
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedFrame {
    pub output: OutputId,
    pub seq: u64,
    /// Draws bottom first
    pub draws: Vec<DrawOp>,
    /// Output-local regions repainted
    pub damage: Vec<Rect>,
}

/// Backend turning snapshots into presented frames
///
/// `compose` may run concurrently for different outputs.
pub trait RenderBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Pixel formats the backend can sample from
    fn formats(&self) -> &[BufferFormat];

    /// Build a frame from a snapshot
    fn compose(&self, snapshot: &FrameSnapshot) -> Result<ComposedFrame, RenderError>;

    /// Queue a composed frame for presentation
    fn submit(&self, frame: ComposedFrame) -> Result<(), RenderError>;
}

/// Draw list for a snapshot, restricted to the damaged area
pub fn plan_draws(snapshot: &FrameSnapshot) -> Vec<DrawOp> {
    snapshot
        .items
        .iter()
        .filter(|item| {
            snapshot
                .damage
                .iter()
                .any(|damage| damage.intersects(&item.rect))
        })
        .map(|item| DrawOp {
            node: item.node,
            buffer: item.buffer,
            src: (item.width, item.height),
            dst: item.rect,
        })
        .collect()
}

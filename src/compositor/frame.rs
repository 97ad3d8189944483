//! Per-output frame pipeline
//!
//! Every output walks `Idle -> FrameRequested -> Composing -> Presenting
//! -> Idle`. The damage and frame callbacks consumed by a frame stay with
//! the pipeline until presentation succeeds, so a failed or abandoned
//! frame can give them back.

use crate::compositor::buffer::{BufferFormat, BufferId};
use crate::compositor::output::OutputId;
use crate::compositor::surface::CallbackId;
use crate::compositor::ClientId;
use crate::geometry::{Rect, Transform};
use crate::renderer::RenderError;
use crate::scene::NodeId;

/// Frame state of one output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameState {
    #[default]
    Idle,
    FrameRequested,
    Composing,
    Presenting,
}

/// One node as captured by a snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotItem {
    pub node: NodeId,
    pub owner: Option<ClientId>,
    pub buffer: BufferId,
    /// Buffer size in pixels
    pub width: i32,
    pub height: i32,
    pub format: BufferFormat,
    /// Output-local transform
    pub transform: Transform,
    pub z: i32,
    /// Output-local bounds
    pub rect: Rect,
}

/// Immutable view of what one output should show
///
/// The core only ever hands out shared references to a snapshot, so it
/// cannot change after being taken.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSnapshot {
    pub output: OutputId,
    /// Frame sequence number, per output
    pub seq: u64,
    /// Output-local bounds
    pub bounds: Rect,
    pub scale: i32,
    /// Items bottom first
    pub items: Vec<SnapshotItem>,
    /// Output-local damage covered by this frame
    pub damage: Vec<Rect>,
}

/// Presentation acknowledgment sent back by the render backend
#[derive(Debug, Clone)]
pub struct PresentAck {
    pub output: OutputId,
    pub seq: u64,
    pub result: Result<(), RenderError>,
}

/// A frame callback waiting for presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCallback {
    pub node: NodeId,
    pub client: Option<ClientId>,
    pub callback: CallbackId,
}

/// Damage and callbacks consumed by the frame in flight
#[derive(Debug, Default)]
pub struct InFlight {
    pub seq: u64,
    pub damage: Vec<Rect>,
    pub callbacks: Vec<PendingCallback>,
}

/// Frame state machine of one output
#[derive(Debug, Default)]
pub struct FramePipeline {
    state: FrameState,
    seq: u64,
    in_flight: Option<InFlight>,
}

impl FramePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Sequence number of the frame in flight
    pub fn in_flight_seq(&self) -> Option<u64> {
        self.in_flight.as_ref().map(|frame| frame.seq)
    }

    /// Idle -> FrameRequested
    pub fn request(&mut self) -> bool {
        if self.state != FrameState::Idle {
            return false;
        }
        self.state = FrameState::FrameRequested;
        true
    }

    /// FrameRequested -> Composing, returning the new frame's sequence
    pub fn begin_compose(&mut self, damage: Vec<Rect>, callbacks: Vec<PendingCallback>) -> u64 {
        self.seq += 1;
        self.state = FrameState::Composing;
        self.in_flight = Some(InFlight {
            seq: self.seq,
            damage,
            callbacks,
        });
        self.seq
    }

    /// Composing -> Presenting
    pub fn begin_present(&mut self, seq: u64) -> bool {
        if self.state != FrameState::Composing || self.in_flight_seq() != Some(seq) {
            return false;
        }
        self.state = FrameState::Presenting;
        true
    }

    /// Back to Idle once frame `seq` is done (presented or failed)
    ///
    /// Returns `None` for a frame that is no longer in flight.
    pub fn finish(&mut self, seq: u64) -> Option<InFlight> {
        if self.in_flight_seq() != Some(seq) {
            return None;
        }
        self.state = FrameState::Idle;
        self.in_flight.take()
    }

    /// Drop whatever is in flight; a later acknowledgment becomes a no-op
    pub fn abandon(&mut self) -> Option<InFlight> {
        self.state = FrameState::Idle;
        self.in_flight.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine() {
        let mut pipeline = FramePipeline::new();
        assert_eq!(pipeline.state(), FrameState::Idle);

        assert!(pipeline.request());
        assert!(!pipeline.request());
        assert_eq!(pipeline.state(), FrameState::FrameRequested);

        let seq = pipeline.begin_compose(vec![Rect::new(0, 0, 1, 1)], Vec::new());
        assert_eq!(pipeline.state(), FrameState::Composing);

        assert!(!pipeline.begin_present(seq + 1));
        assert!(pipeline.begin_present(seq));
        assert_eq!(pipeline.state(), FrameState::Presenting);

        let done = pipeline.finish(seq).unwrap();
        assert_eq!(done.damage.len(), 1);
        assert_eq!(pipeline.state(), FrameState::Idle);
        assert!(pipeline.finish(seq).is_none());
    }

    #[test]
    fn test_abandon_makes_ack_noop() {
        let mut pipeline = FramePipeline::new();
        pipeline.request();
        let seq = pipeline.begin_compose(Vec::new(), Vec::new());
        pipeline.begin_present(seq);

        assert!(pipeline.abandon().is_some());
        assert_eq!(pipeline.state(), FrameState::Idle);
        assert!(pipeline.finish(seq).is_none());
    }

    #[test]
    fn test_sequence_increases() {
        let mut pipeline = FramePipeline::new();
        pipeline.request();
        let first = pipeline.begin_compose(Vec::new(), Vec::new());
        pipeline.finish(first);
        pipeline.request();
        let second = pipeline.begin_compose(Vec::new(), Vec::new());
        assert!(second > first);
    }
}

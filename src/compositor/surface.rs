//! Surface state
//!
//! Surface and subsurface nodes carry double-buffered client state:
//! requests accumulate in the pending state and only `commit` makes them
//! current.

use crate::compositor::buffer::BufferId;
use crate::geometry::{Point, Rect, Region};

/// Identifier of a client frame callback, allocated by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(pub u64);

/// Pending buffer change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferChange {
    /// No attach request since last commit
    #[default]
    Keep,
    /// Attach a new buffer
    Attach(BufferId),
    /// Remove the current buffer
    Detach,
}

/// Pending state for a surface (not yet committed)
#[derive(Debug, Default)]
pub struct SurfacePendingState {
    /// Pending buffer attachment
    pub buffer: BufferChange,
    /// Accumulated damage in surface coordinates
    pub damage: Vec<Rect>,
    /// Buffer scale factor (0 = unchanged)
    pub scale: i32,
    /// Input region (`Some(None)` resets to the whole surface)
    pub input_region: Option<Option<Region>>,
    /// Frame callbacks to be queued
    pub frame_callbacks: Vec<CallbackId>,
}

/// What a commit changed
#[derive(Debug, Default)]
pub struct CommitOutcome {
    /// Buffer that the surface no longer displays
    pub replaced: Option<BufferId>,
    /// Buffer the surface started displaying
    pub attached: Option<BufferId>,
    /// The surface size changed (or content appeared/disappeared)
    pub resized: bool,
    /// Damage in surface coordinates
    pub damage: Vec<Rect>,
}

/// Client surface state
#[derive(Debug)]
pub struct Surface {
    /// Current buffer
    pub buffer: Option<BufferId>,
    /// Surface size in surface coordinates
    pub size: (i32, i32),
    /// Buffer scale factor (default 1)
    pub scale: i32,
    /// Input region; `None` accepts input everywhere
    pub input_region: Option<Region>,
    /// Pending state (not yet committed)
    pub pending: SurfacePendingState,
    /// Committed frame callbacks waiting for the next presented frame
    pub frame_callbacks: Vec<CallbackId>,
}

impl Surface {
    /// Create a new surface
    pub fn new() -> Self {
        Self {
            buffer: None,
            size: (0, 0),
            scale: 1,
            input_region: None,
            pending: SurfacePendingState::default(),
            frame_callbacks: Vec::new(),
        }
    }

    /// Attach a buffer to the pending state
    pub fn attach(&mut self, buffer: Option<BufferId>) {
        self.pending.buffer = match buffer {
            Some(id) => BufferChange::Attach(id),
            None => BufferChange::Detach,
        };
    }

    /// Add damage to the pending state
    pub fn damage(&mut self, rect: Rect) {
        if !rect.is_empty() {
            self.pending.damage.push(rect);
        }
    }

    /// Add a frame callback
    pub fn frame(&mut self, callback: CallbackId) {
        self.pending.frame_callbacks.push(callback);
    }

    /// Set the buffer scale
    pub fn set_scale(&mut self, scale: i32) {
        self.pending.scale = scale;
    }

    /// Set the input region
    pub fn set_input_region(&mut self, region: Option<Region>) {
        self.pending.input_region = Some(region);
    }

    /// Commit pending state to current state
    ///
    /// `buffer_size` reports the pixel size of the newly attached buffer.
    pub fn commit(&mut self, buffer_size: Option<(i32, i32)>) -> CommitOutcome {
        let mut outcome = CommitOutcome::default();
        let old_size = self.size;

        if self.pending.scale > 0 {
            self.scale = self.pending.scale;
            self.pending.scale = 0;
        }

        match std::mem::take(&mut self.pending.buffer) {
            BufferChange::Keep => {}
            BufferChange::Attach(id) => {
                if self.buffer != Some(id) {
                    outcome.replaced = self.buffer;
                    outcome.attached = Some(id);
                    self.buffer = Some(id);
                }
            }
            BufferChange::Detach => {
                outcome.replaced = self.buffer.take();
            }
        }

        self.size = match (self.buffer, buffer_size) {
            (None, _) => (0, 0),
            (Some(_), Some((width, height))) => (width / self.scale, height / self.scale),
            (Some(_), None) => self.size,
        };
        outcome.resized = self.size != old_size;

        if let Some(region) = self.pending.input_region.take() {
            self.input_region = region;
        }

        // Damage outside the committed content has nothing to redraw
        let bounds = Rect::new(0, 0, self.size.0, self.size.1);
        outcome.damage = self
            .pending
            .damage
            .drain(..)
            .filter_map(|rect| rect.intersection(&bounds))
            .collect();
        self.frame_callbacks.append(&mut self.pending.frame_callbacks);

        outcome
    }

    /// Check whether a surface-local point accepts input
    pub fn accepts_input(&self, x: f64, y: f64) -> bool {
        let (width, height) = self.size;
        let inside = x >= 0.0 && y >= 0.0 && x < width as f64 && y < height as f64;
        inside
            && self
                .input_region
                .as_ref()
                .map_or(true, |region| region.contains(Point::new(x, y)))
    }

    /// Take the committed frame callbacks
    pub fn take_frame_callbacks(&mut self) -> Vec<CallbackId> {
        std::mem::take(&mut self.frame_callbacks)
    }

    /// Drop every callback, committed first, then pending
    pub fn discard_callbacks(&mut self) -> Vec<CallbackId> {
        let mut callbacks = self.take_frame_callbacks();
        callbacks.append(&mut self.pending.frame_callbacks);
        callbacks
    }
}

impl Default for Surface {
    fn default() -> Self {
        Self::new()
    }
}

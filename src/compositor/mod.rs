//! Compositor core module
//!
//! This module contains the core compositor logic including:
//! - Global compositor state management
//! - Buffer lifetimes and surface commit state
//! - Output layout and damage tracking
//! - The per-output frame pipeline

pub mod buffer;
pub mod damage;
pub mod event;
pub mod frame;
pub mod output;
pub mod state;
pub mod surface;

pub use buffer::{Buffer, BufferFormat, BufferId, BufferStore};
pub use damage::DamageRegion;
pub use event::CompositorEvent;
pub use frame::{FramePipeline, FrameSnapshot, FrameState, PresentAck, SnapshotItem};
pub use output::{Output, OutputDevice, OutputId, OutputMode, OutputRegistry};
pub use state::{ClientId, CompositorError, CompositorState};
pub use surface::{CallbackId, Surface};

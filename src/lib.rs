//! Goose - a minimal Wayland compositor core
//!
//! Goose keeps a scene graph of layers, surfaces and subsurfaces, composes
//! it per output through a frame pipeline and routes seat input to the
//! surfaces under the pointer or holding keyboard focus.
//!
//! # Architecture
//!
//! - **Scene**: generational node arena with stable z ordering
//! - **Compositor Core**: buffers, surfaces, outputs, damage and frames
//! - **Input**: pointer grabs, keyboard focus and seat state
//! - **Renderer**: pluggable render backend, headless by default
//! - **Server**: wayland-server-rs protocol bridge
//! - **Startup**: staged bring-up on a calloop event loop
//!
//! # Example
//!
//! ```no_run
//! use goose::config::Config;
//! use goose::startup::Goose;
//!
//! let config = Config::from_env().unwrap();
//! let mut goose = Goose::start(&config).unwrap();
//! goose.run().unwrap();
//! ```

pub mod backend;
pub mod compositor;
pub mod config;
pub mod geometry;
pub mod input;
pub mod renderer;
pub mod resource;
pub mod scene;
pub mod server;
pub mod startup;

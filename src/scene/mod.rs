//! Scene graph module
//!
//! Layers and client surfaces arranged in a tree, with stacking order,
//! transforms and a lazy back-to-front traversal used for composition
//! and hit testing.

pub mod graph;
pub mod node;
pub mod traverse;

pub use graph::{DestroyedNode, SceneError, SceneGraph};
pub use node::{NodeContent, NodeId, NodeKind, SceneNode};
pub use traverse::{VisibleNode, VisibleNodes};

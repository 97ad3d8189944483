//! Back-to-front scene traversal

use crate::compositor::buffer::BufferId;
use crate::geometry::{Rect, Transform};
use crate::scene::graph::SceneGraph;
use crate::scene::node::{NodeId, NodeKind};

/// A displayable node as seen by one traversal
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibleNode {
    pub id: NodeId,
    /// Effective (global) transform
    pub transform: Transform,
    pub z: i32,
    /// Global bounds of the node's content
    pub rect: Rect,
    pub buffer: BufferId,
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Enter { id: NodeId, parent: Transform },
    Emit { id: NodeId, transform: Transform },
}

/// Lazy iterator over displayable nodes, bottom first
///
/// A clone resumes from the same position independently of the original.
#[derive(Debug, Clone)]
pub struct VisibleNodes<'a> {
    scene: &'a SceneGraph,
    clip: Option<Rect>,
    stack: Vec<Step>,
}

impl<'a> VisibleNodes<'a> {
    pub(crate) fn new(scene: &'a SceneGraph, clip: Option<Rect>) -> Self {
        let stack = scene
            .stacked_children(None)
            .into_iter()
            .rev()
            .map(|id| Step::Enter {
                id,
                parent: Transform::IDENTITY,
            })
            .collect();
        Self { scene, clip, stack }
    }

    fn enter(&mut self, id: NodeId, parent: Transform) {
        let scene = self.scene;
        let Some(node) = scene.get(id) else {
            return;
        };
        if !node.enabled {
            return;
        }

        let transform = parent.then(&node.transform);
        let children = scene.stacked_children(Some(id));
        let split = match node.kind() {
            NodeKind::Layer => 0,
            NodeKind::Surface | NodeKind::Subsurface => children
                .iter()
                .take_while(|child| scene.get(**child).is_some_and(|c| c.z < 0))
                .count(),
        };
        let (below, above) = children.split_at(split);

        for child in above.iter().rev() {
            self.stack.push(Step::Enter {
                id: *child,
                parent: transform,
            });
        }
        self.stack.push(Step::Emit { id, transform });
        for child in below.iter().rev() {
            self.stack.push(Step::Enter {
                id: *child,
                parent: transform,
            });
        }
    }

    fn emit(&self, id: NodeId, transform: Transform) -> Option<VisibleNode> {
        let node = self.scene.get(id)?;
        let buffer = node.buffer()?;
        let (width, height) = node.size();
        if width <= 0 || height <= 0 {
            return None;
        }
        let rect = transform.map_size(width, height);
        if let Some(clip) = &self.clip {
            if !rect.intersects(clip) {
                return None;
            }
        }
        Some(VisibleNode {
            id,
            transform,
            z: node.z,
            rect,
            buffer,
        })
    }
}

impl Iterator for VisibleNodes<'_> {
    type Item = VisibleNode;

    fn next(&mut self) -> Option<VisibleNode> {
        while let Some(step) = self.stack.pop() {
            match step {
                Step::Enter { id, parent } => self.enter(id, parent),
                Step::Emit { id, transform } => {
                    if let Some(visible) = self.emit(id, transform) {
                        return Some(visible);
                    }
                }
            }
        }
        None
    }
}

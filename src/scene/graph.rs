//! Scene graph
//!
//! Nodes live in a generational arena. Each node owns its children; the
//! parent link is a plain back-reference used for transform composition
//! and cycle checks.

use log::{debug, trace};

use crate::compositor::buffer::BufferId;
use crate::compositor::surface::{CallbackId, Surface};
use crate::compositor::ClientId;
use crate::geometry::{Point, Rect, Transform};
use crate::resource::{Arena, Lookup, ResourceError};
use crate::scene::node::{NodeContent, NodeId, NodeKind, SceneNode};
use crate::scene::traverse::VisibleNodes;

/// Scene graph errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SceneError {
    #[error("node {node} cannot be placed under its own descendant {parent}")]
    Cycle { node: NodeId, parent: NodeId },
    #[error("a {kind:?} node cannot be a child of {parent:?}")]
    InvalidParent {
        kind: NodeKind,
        parent: Option<NodeKind>,
    },
    #[error("node {0} already has a role")]
    RoleConflict(NodeId),
    #[error("nodes {0} and {1} are not siblings")]
    NotSiblings(NodeId, NodeId),
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

/// Record of a destroyed node
#[derive(Debug, Clone)]
pub struct DestroyedNode {
    pub id: NodeId,
    pub owner: Option<ClientId>,
    /// Buffer the node was displaying
    pub buffer: Option<BufferId>,
    /// Last global bounds of the node's content
    pub rect: Option<Rect>,
    /// Frame callbacks that will never fire
    pub callbacks: Vec<CallbackId>,
}

/// Tree of layers and client surfaces
#[derive(Debug, Default)]
pub struct SceneGraph {
    nodes: Arena<NodeId, SceneNode>,
    roots: Vec<NodeId>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a node under `parent` (or at the root level)
    pub fn create_node(
        &mut self,
        parent: Option<NodeId>,
        content: NodeContent,
        owner: Option<ClientId>,
    ) -> Result<NodeId, SceneError> {
        let kind = content.kind();
        let parent_kind = match parent {
            Some(parent) => Some(self.nodes.require(parent)?.kind()),
            None => None,
        };
        if !kind.accepts_parent(parent_kind) {
            return Err(SceneError::InvalidParent {
                kind,
                parent: parent_kind,
            });
        }

        let id = self.nodes.track(SceneNode::new(content, owner));
        self.link(id, parent);
        debug!("Created {:?} node {} under {:?}", kind, id, parent);
        Ok(id)
    }

    /// Liveness-checked read
    pub fn lookup(&self, id: NodeId) -> Lookup<'_, SceneNode> {
        self.nodes.lookup(id)
    }

    pub fn get(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(id)
    }

    pub fn is_alive(&self, id: NodeId) -> bool {
        self.nodes.is_live(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Root nodes in insertion order
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Surface state of a surface or subsurface node
    pub fn surface(&self, id: NodeId) -> Result<&Surface, SceneError> {
        let node = self.nodes.require(id)?;
        node.surface().ok_or(SceneError::InvalidParent {
            kind: node.kind(),
            parent: None,
        })
    }

    pub fn surface_mut(&mut self, id: NodeId) -> Result<&mut Surface, SceneError> {
        let node = self.nodes.require_mut(id)?;
        let kind = node.kind();
        node.surface_mut()
            .ok_or(SceneError::InvalidParent { kind, parent: None })
    }

    pub fn set_transform(&mut self, id: NodeId, transform: Transform) -> Result<(), SceneError> {
        self.nodes.require_mut(id)?.transform = transform;
        Ok(())
    }

    /// Move a node, keeping its scale
    pub fn set_position(&mut self, id: NodeId, x: f64, y: f64) -> Result<(), SceneError> {
        let node = self.nodes.require_mut(id)?;
        node.transform.x = x;
        node.transform.y = y;
        Ok(())
    }

    pub fn set_z(&mut self, id: NodeId, z: i32) -> Result<(), SceneError> {
        self.nodes.require_mut(id)?.z = z;
        Ok(())
    }

    pub fn set_enabled(&mut self, id: NodeId, enabled: bool) -> Result<(), SceneError> {
        self.nodes.require_mut(id)?.enabled = enabled;
        Ok(())
    }

    /// Move a node under a new parent
    ///
    /// The node lands on top of its new siblings of equal z. On failure the
    /// tree is left untouched.
    pub fn reparent(&mut self, id: NodeId, parent: Option<NodeId>) -> Result<(), SceneError> {
        let kind = self.nodes.require(id)?.kind();
        let parent_kind = match parent {
            Some(parent) => Some(self.nodes.require(parent)?.kind()),
            None => None,
        };

        if let Some(parent) = parent {
            if self.is_ancestor_or_self(id, parent) {
                return Err(SceneError::Cycle { node: id, parent });
            }
        }
        if !kind.accepts_parent(parent_kind) {
            return Err(SceneError::InvalidParent {
                kind,
                parent: parent_kind,
            });
        }

        self.unlink(id);
        self.link(id, parent);
        debug!("Reparented node {} under {:?}", id, parent);
        Ok(())
    }

    /// Give a surface the subsurface role under `parent`
    pub fn convert_to_subsurface(&mut self, id: NodeId, parent: NodeId) -> Result<(), SceneError> {
        let parent_kind = self.nodes.require(parent)?.kind();
        if !NodeKind::Subsurface.accepts_parent(Some(parent_kind)) {
            return Err(SceneError::InvalidParent {
                kind: NodeKind::Subsurface,
                parent: Some(parent_kind),
            });
        }
        if self.is_ancestor_or_self(id, parent) {
            return Err(SceneError::Cycle { node: id, parent });
        }

        let node = self.nodes.require_mut(id)?;
        let NodeContent::Surface(surface) = &mut node.content else {
            return Err(SceneError::RoleConflict(id));
        };
        node.content = NodeContent::Subsurface(std::mem::take(surface));

        self.unlink(id);
        self.link(id, Some(parent));
        Ok(())
    }

    /// Stack a node above all of its siblings
    pub fn raise_to_top(&mut self, id: NodeId) -> Result<(), SceneError> {
        let own = self.nodes.require(id)?.z;
        let z = self
            .sibling_z(id)?
            .into_iter()
            .fold(own, |acc, z| acc.max(z));
        self.nodes.require_mut(id)?.z = z;
        self.move_in_siblings(id, |siblings| siblings.len());
        Ok(())
    }

    /// Stack a node below all of its siblings
    pub fn lower_to_bottom(&mut self, id: NodeId) -> Result<(), SceneError> {
        let own = self.nodes.require(id)?.z;
        let z = self
            .sibling_z(id)?
            .into_iter()
            .fold(own, |acc, z| acc.min(z));
        self.nodes.require_mut(id)?.z = z;
        self.move_in_siblings(id, |_| 0);
        Ok(())
    }

    /// Stack a node directly above a sibling
    pub fn place_above(&mut self, id: NodeId, sibling: NodeId) -> Result<(), SceneError> {
        self.place_relative(id, sibling, 1)
    }

    /// Stack a node directly below a sibling
    pub fn place_below(&mut self, id: NodeId, sibling: NodeId) -> Result<(), SceneError> {
        self.place_relative(id, sibling, 0)
    }

    /// Stack a child directly above its parent's own content, below any
    /// sibling already placed above the parent
    pub fn place_above_parent(&mut self, id: NodeId) -> Result<(), SceneError> {
        self.require_child(id)?.z = 0;
        self.move_in_siblings(id, |_| 0);
        Ok(())
    }

    /// Stack a child directly below its parent's own content, above any
    /// sibling already placed below the parent
    pub fn place_below_parent(&mut self, id: NodeId) -> Result<(), SceneError> {
        self.require_child(id)?.z = -1;
        self.move_in_siblings(id, |siblings| siblings.len());
        Ok(())
    }

    /// Destroy a node and everything it owns
    ///
    /// Returns the destroyed nodes, parents before children.
    pub fn destroy(&mut self, id: NodeId) -> Result<Vec<DestroyedNode>, SceneError> {
        self.nodes.require(id)?;

        let order = self.subtree(id);
        let rects: Vec<Option<Rect>> = order.iter().map(|node| self.global_rect(*node)).collect();
        self.unlink(id);

        let mut destroyed = Vec::with_capacity(order.len());
        for (node_id, rect) in order.into_iter().zip(rects) {
            let mut node = self.nodes.release(node_id)?;
            let (buffer, callbacks) = match node.surface_mut() {
                Some(surface) => (surface.buffer, surface.discard_callbacks()),
                None => (None, Vec::new()),
            };
            trace!("Destroyed node {}", node_id);
            destroyed.push(DestroyedNode {
                id: node_id,
                owner: node.owner,
                buffer,
                rect,
                callbacks,
            });
        }
        debug!("Destroyed {} node(s) rooted at {}", destroyed.len(), id);
        Ok(destroyed)
    }

    /// A node and all of its descendants, parents first
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(current) {
                order.push(current);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        order
    }

    /// Ids of all live nodes owned by a client
    pub fn nodes_owned_by(&self, owner: ClientId) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(owner))
            .map(|(id, _)| id)
            .collect()
    }

    /// Composition of every ancestor transform with the node's own
    pub fn effective_transform(&self, id: NodeId) -> Result<Transform, SceneError> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.nodes.require(node_id)?;
            chain.push(node.transform);
            current = node.parent;
        }
        Ok(chain
            .iter()
            .rev()
            .fold(Transform::IDENTITY, |acc, t| acc.then(t)))
    }

    /// Global bounds of a node's content, `None` for empty content
    pub fn global_rect(&self, id: NodeId) -> Option<Rect> {
        let node = self.nodes.get(id)?;
        let (width, height) = node.size();
        if width <= 0 || height <= 0 {
            return None;
        }
        let transform = self.effective_transform(id).ok()?;
        Some(transform.map_size(width, height))
    }

    /// Lazy back-to-front traversal of displayable nodes, optionally
    /// clipped to a global rectangle
    pub fn visible_nodes_in(&self, clip: Option<Rect>) -> VisibleNodes<'_> {
        VisibleNodes::new(self, clip)
    }

    /// Topmost node accepting input at a global point, with the point in
    /// surface-local coordinates
    pub fn node_at(&self, point: Point) -> Option<(NodeId, Point)> {
        let clip = Rect::new(point.x.floor() as i32, point.y.floor() as i32, 1, 1);
        self.visible_nodes_in(Some(clip))
            .filter_map(|visible| {
                let local = visible.transform.invert(point);
                let surface = self.nodes.get(visible.id)?.surface()?;
                surface
                    .accepts_input(local.x, local.y)
                    .then_some((visible.id, local))
            })
            .last()
    }

    /// Children of a node (or the roots) in stacking order, bottom first
    pub(crate) fn stacked_children(&self, parent: Option<NodeId>) -> Vec<NodeId> {
        let ids: &[NodeId] = match parent {
            Some(parent) => match self.nodes.get(parent) {
                Some(node) => &node.children,
                None => return Vec::new(),
            },
            None => &self.roots,
        };
        let mut stacked: Vec<(i32, NodeId)> = ids
            .iter()
            .filter_map(|id| self.nodes.get(*id).map(|node| (node.z, *id)))
            .collect();
        stacked.sort_by_key(|(z, _)| *z);
        stacked.into_iter().map(|(_, id)| id).collect()
    }

    fn is_ancestor_or_self(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node_id) = current {
            if node_id == ancestor {
                return true;
            }
            current = self.nodes.get(node_id).and_then(|node| node.parent);
        }
        false
    }

    fn require_child(&mut self, id: NodeId) -> Result<&mut SceneNode, SceneError> {
        let node = self.nodes.require_mut(id)?;
        if node.parent.is_none() {
            return Err(SceneError::InvalidParent {
                kind: node.kind(),
                parent: None,
            });
        }
        Ok(node)
    }

    fn sibling_z(&self, id: NodeId) -> Result<Vec<i32>, SceneError> {
        let parent = self.nodes.require(id)?.parent;
        let all: &[NodeId] = match parent {
            Some(parent) => &self.nodes.require(parent)?.children,
            None => &self.roots,
        };
        Ok(all
            .iter()
            .filter(|sibling| **sibling != id)
            .filter_map(|sibling| self.nodes.get(*sibling))
            .map(|node| node.z)
            .collect())
    }

    fn place_relative(
        &mut self,
        id: NodeId,
        sibling: NodeId,
        offset: usize,
    ) -> Result<(), SceneError> {
        let parent = self.nodes.require(id)?.parent;
        let sibling_node = self.nodes.require(sibling)?;
        if id == sibling || sibling_node.parent != parent {
            return Err(SceneError::NotSiblings(id, sibling));
        }
        let z = sibling_node.z;
        self.nodes.require_mut(id)?.z = z;
        self.move_in_siblings(id, |siblings| {
            siblings
                .iter()
                .position(|other| *other == sibling)
                .map_or(siblings.len(), |index| index + offset)
        });
        Ok(())
    }

    /// Move `id` within its sibling list to the index chosen by `target`
    /// (computed with `id` already removed)
    fn move_in_siblings(&mut self, id: NodeId, target: impl FnOnce(&[NodeId]) -> usize) {
        let parent = self.nodes.get(id).and_then(|node| node.parent);
        let list = match parent {
            Some(parent) => match self.nodes.get_mut(parent) {
                Some(node) => &mut node.children,
                None => return,
            },
            None => &mut self.roots,
        };
        list.retain(|other| *other != id);
        let index = target(list.as_slice()).min(list.len());
        list.insert(index, id);
    }

    fn link(&mut self, id: NodeId, parent: Option<NodeId>) {
        let parent = parent.filter(|parent| self.nodes.is_live(*parent));
        match parent.and_then(|parent| self.nodes.get_mut(parent)) {
            Some(node) => node.children.push(id),
            None => self.roots.push(id),
        }
        if let Some(child) = self.nodes.get_mut(id) {
            child.parent = parent;
        }
    }

    fn unlink(&mut self, id: NodeId) {
        let parent = self.nodes.get_mut(id).and_then(|node| node.parent.take());
        match parent.and_then(|parent| self.nodes.get_mut(parent)) {
            Some(node) => node.children.retain(|child| *child != id),
            None => self.roots.retain(|root| *root != id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ArenaKey;

    fn surface_with_buffer(index: u32, width: i32, height: i32) -> NodeContent {
        let mut surface = Surface::new();
        surface.attach(Some(BufferId::from_parts(index, 0)));
        surface.commit(Some((width, height)));
        NodeContent::Surface(surface)
    }

    fn subsurface_with_buffer(index: u32, width: i32, height: i32) -> NodeContent {
        match surface_with_buffer(index, width, height) {
            NodeContent::Surface(surface) => NodeContent::Subsurface(surface),
            other => other,
        }
    }

    #[test]
    fn test_invalid_parent() {
        let mut scene = SceneGraph::new();
        let layer = scene.create_node(None, NodeContent::Layer, None).unwrap();
        let surface = scene
            .create_node(Some(layer), NodeContent::Surface(Surface::new()), None)
            .unwrap();

        assert!(matches!(
            scene.create_node(Some(surface), NodeContent::Layer, None),
            Err(SceneError::InvalidParent { .. })
        ));
        assert!(matches!(
            scene.create_node(None, NodeContent::Subsurface(Surface::new()), None),
            Err(SceneError::InvalidParent { .. })
        ));
    }

    #[test]
    fn test_stale_parent() {
        let mut scene = SceneGraph::new();
        let layer = scene.create_node(None, NodeContent::Layer, None).unwrap();
        scene.destroy(layer).unwrap();
        assert!(matches!(
            scene.create_node(Some(layer), NodeContent::Layer, None),
            Err(SceneError::Resource(ResourceError::Stale { .. }))
        ));
    }

    #[test]
    fn test_reparent_cycle() {
        let mut scene = SceneGraph::new();
        let a = scene.create_node(None, NodeContent::Layer, None).unwrap();
        let b = scene.create_node(Some(a), NodeContent::Layer, None).unwrap();
        let c = scene.create_node(Some(b), NodeContent::Layer, None).unwrap();

        assert_eq!(
            scene.reparent(a, Some(c)),
            Err(SceneError::Cycle { node: a, parent: c })
        );
        assert_eq!(
            scene.reparent(a, Some(a)),
            Err(SceneError::Cycle { node: a, parent: a })
        );
        // Tree unchanged
        assert_eq!(scene.get(c).unwrap().parent(), Some(b));
        assert_eq!(scene.roots(), &[a]);
    }

    #[test]
    fn test_reparent_stacks_on_top() {
        let mut scene = SceneGraph::new();
        let a = scene.create_node(None, NodeContent::Layer, None).unwrap();
        let b = scene.create_node(None, NodeContent::Layer, None).unwrap();
        let x = scene.create_node(Some(a), NodeContent::Layer, None).unwrap();
        let y = scene.create_node(Some(b), NodeContent::Layer, None).unwrap();

        scene.reparent(x, Some(b)).unwrap();
        assert_eq!(scene.get(b).unwrap().children(), &[y, x]);
        assert!(scene.get(a).unwrap().children().is_empty());
        assert_eq!(scene.get(x).unwrap().parent(), Some(b));
    }

    #[test]
    fn test_effective_transform() {
        let mut scene = SceneGraph::new();
        let layer = scene.create_node(None, NodeContent::Layer, None).unwrap();
        scene
            .set_transform(
                layer,
                Transform {
                    x: 100.0,
                    y: 50.0,
                    scale: 2.0,
                },
            )
            .unwrap();
        let surface = scene
            .create_node(Some(layer), surface_with_buffer(1, 10, 10), None)
            .unwrap();
        scene.set_position(surface, 5.0, 5.0).unwrap();

        let t = scene.effective_transform(surface).unwrap();
        assert_eq!((t.x, t.y, t.scale), (110.0, 60.0, 2.0));
        assert_eq!(scene.global_rect(surface), Some(Rect::new(110, 60, 20, 20)));
    }

    #[test]
    fn test_visible_order_z_then_insertion() {
        let mut scene = SceneGraph::new();
        let layer = scene.create_node(None, NodeContent::Layer, None).unwrap();
        let a = scene
            .create_node(Some(layer), surface_with_buffer(1, 10, 10), None)
            .unwrap();
        let b = scene
            .create_node(Some(layer), surface_with_buffer(2, 10, 10), None)
            .unwrap();
        let c = scene
            .create_node(Some(layer), surface_with_buffer(3, 10, 10), None)
            .unwrap();
        scene.set_z(a, 1).unwrap();

        let order: Vec<NodeId> = scene.visible_nodes_in(None).map(|v| v.id).collect();
        assert_eq!(order, vec![b, c, a]);

        // Restartable
        let again: Vec<NodeId> = scene.visible_nodes_in(None).map(|v| v.id).collect();
        assert_eq!(order, again);
    }

    #[test]
    fn test_negative_z_subsurface_below_parent() {
        let mut scene = SceneGraph::new();
        let parent = scene
            .create_node(None, surface_with_buffer(1, 100, 100), None)
            .unwrap();
        let above = scene
            .create_node(Some(parent), subsurface_with_buffer(2, 10, 10), None)
            .unwrap();
        let below = scene
            .create_node(Some(parent), subsurface_with_buffer(3, 10, 10), None)
            .unwrap();
        scene.set_z(below, -1).unwrap();

        let order: Vec<NodeId> = scene.visible_nodes_in(None).map(|v| v.id).collect();
        assert_eq!(order, vec![below, parent, above]);
    }

    #[test]
    fn test_place_relative_to_parent() {
        let mut scene = SceneGraph::new();
        let parent = scene
            .create_node(None, surface_with_buffer(1, 100, 100), None)
            .unwrap();
        let first = scene
            .create_node(Some(parent), subsurface_with_buffer(2, 10, 10), None)
            .unwrap();
        let second = scene
            .create_node(Some(parent), subsurface_with_buffer(3, 10, 10), None)
            .unwrap();
        let order = |scene: &SceneGraph| -> Vec<NodeId> {
            scene.visible_nodes_in(None).map(|v| v.id).collect()
        };
        assert_eq!(order(&scene), vec![parent, first, second]);

        // Directly above the parent, under siblings already above it
        scene.place_above_parent(second).unwrap();
        assert_eq!(order(&scene), vec![parent, second, first]);

        scene.place_below_parent(first).unwrap();
        assert_eq!(order(&scene), vec![first, parent, second]);

        // Directly below the parent, over siblings already below it
        scene.place_below_parent(second).unwrap();
        assert_eq!(order(&scene), vec![first, second, parent]);

        assert!(matches!(
            scene.place_above_parent(parent),
            Err(SceneError::InvalidParent { parent: None, .. })
        ));
    }

    #[test]
    fn test_disabled_subtree_hidden() {
        let mut scene = SceneGraph::new();
        let layer = scene.create_node(None, NodeContent::Layer, None).unwrap();
        let surface = scene
            .create_node(Some(layer), surface_with_buffer(1, 10, 10), None)
            .unwrap();
        scene.set_enabled(layer, false).unwrap();
        assert_eq!(scene.visible_nodes_in(None).count(), 0);
        scene.set_enabled(layer, true).unwrap();
        assert_eq!(
            scene.visible_nodes_in(None).map(|v| v.id).collect::<Vec<_>>(),
            vec![surface]
        );
    }

    #[test]
    fn test_visible_clipped() {
        let mut scene = SceneGraph::new();
        let layer = scene.create_node(None, NodeContent::Layer, None).unwrap();
        let left = scene
            .create_node(Some(layer), surface_with_buffer(1, 100, 100), None)
            .unwrap();
        let right = scene
            .create_node(Some(layer), surface_with_buffer(2, 100, 100), None)
            .unwrap();
        scene.set_position(right, 2000.0, 0.0).unwrap();

        let clip = Rect::new(0, 0, 1920, 1080);
        let ids: Vec<NodeId> = scene.visible_nodes_in(Some(clip)).map(|v| v.id).collect();
        assert_eq!(ids, vec![left]);
    }

    #[test]
    fn test_stacking_operations() {
        let mut scene = SceneGraph::new();
        let a = scene.create_node(None, NodeContent::Layer, None).unwrap();
        let b = scene.create_node(None, NodeContent::Layer, None).unwrap();
        let c = scene.create_node(None, NodeContent::Layer, None).unwrap();

        scene.raise_to_top(a).unwrap();
        assert_eq!(scene.stacked_children(None), vec![b, c, a]);

        scene.lower_to_bottom(a).unwrap();
        assert_eq!(scene.stacked_children(None), vec![a, b, c]);

        scene.place_above(a, b).unwrap();
        assert_eq!(scene.stacked_children(None), vec![b, a, c]);

        scene.place_below(c, b).unwrap();
        assert_eq!(scene.stacked_children(None), vec![c, b, a]);

        let child = scene.create_node(Some(a), NodeContent::Layer, None).unwrap();
        assert_eq!(
            scene.place_above(child, b),
            Err(SceneError::NotSiblings(child, b))
        );
    }

    #[test]
    fn test_place_adopts_sibling_z() {
        let mut scene = SceneGraph::new();
        let a = scene.create_node(None, NodeContent::Layer, None).unwrap();
        let b = scene.create_node(None, NodeContent::Layer, None).unwrap();
        scene.set_z(b, 5).unwrap();
        scene.place_above(a, b).unwrap();
        assert_eq!(scene.get(a).unwrap().z, 5);
        assert_eq!(scene.stacked_children(None), vec![b, a]);
    }

    #[test]
    fn test_destroy_recursive() {
        let mut scene = SceneGraph::new();
        let layer = scene.create_node(None, NodeContent::Layer, None).unwrap();
        let surface = scene
            .create_node(Some(layer), surface_with_buffer(1, 10, 10), Some(ClientId(1)))
            .unwrap();
        let sub = scene
            .create_node(Some(surface), subsurface_with_buffer(2, 5, 5), Some(ClientId(1)))
            .unwrap();

        let destroyed = scene.destroy(surface).unwrap();
        let ids: Vec<NodeId> = destroyed.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![surface, sub]);
        assert_eq!(destroyed[0].rect, Some(Rect::new(0, 0, 10, 10)));
        assert!(destroyed[1].buffer.is_some());

        assert!(!scene.is_alive(surface));
        assert!(!scene.is_alive(sub));
        assert!(scene.get(layer).unwrap().children().is_empty());
        assert!(matches!(
            scene.destroy(surface),
            Err(SceneError::Resource(ResourceError::Stale { .. }))
        ));
    }

    #[test]
    fn test_convert_to_subsurface() {
        let mut scene = SceneGraph::new();
        let layer = scene.create_node(None, NodeContent::Layer, None).unwrap();
        let parent = scene
            .create_node(Some(layer), NodeContent::Surface(Surface::new()), None)
            .unwrap();
        let child = scene
            .create_node(Some(layer), NodeContent::Surface(Surface::new()), None)
            .unwrap();

        scene.convert_to_subsurface(child, parent).unwrap();
        assert_eq!(scene.get(child).unwrap().kind(), NodeKind::Subsurface);
        assert_eq!(scene.get(child).unwrap().parent(), Some(parent));
        assert_eq!(
            scene.convert_to_subsurface(child, parent),
            Err(SceneError::RoleConflict(child))
        );
    }

    #[test]
    fn test_node_at() {
        let mut scene = SceneGraph::new();
        let layer = scene.create_node(None, NodeContent::Layer, None).unwrap();
        let bottom = scene
            .create_node(Some(layer), surface_with_buffer(1, 100, 100), None)
            .unwrap();
        let top = scene
            .create_node(Some(layer), surface_with_buffer(2, 50, 50), None)
            .unwrap();
        scene.set_position(top, 25.0, 25.0).unwrap();

        let (hit, local) = scene.node_at(Point::new(30.0, 30.0)).unwrap();
        assert_eq!(hit, top);
        assert_eq!(local, Point::new(5.0, 5.0));

        let (hit, _) = scene.node_at(Point::new(10.0, 10.0)).unwrap();
        assert_eq!(hit, bottom);

        assert!(scene.node_at(Point::new(500.0, 500.0)).is_none());
    }
}

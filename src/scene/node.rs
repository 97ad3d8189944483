//! Scene nodes

use crate::compositor::buffer::BufferId;
use crate::compositor::surface::Surface;
use crate::compositor::ClientId;
use crate::geometry::Transform;
use crate::resource::arena_key;

arena_key!(
    /// Handle to a node in the scene graph
    NodeId
);

/// Kind of a scene node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Grouping node without content
    Layer,
    /// Client surface
    Surface,
    /// Client surface positioned relative to a parent surface
    Subsurface,
}

impl NodeKind {
    /// Whether a node of this kind may sit under a parent of `parent` kind
    /// (`None` for the root level)
    pub fn accepts_parent(&self, parent: Option<NodeKind>) -> bool {
        match (self, parent) {
            (NodeKind::Layer | NodeKind::Surface, None | Some(NodeKind::Layer)) => true,
            (NodeKind::Subsurface, Some(NodeKind::Surface | NodeKind::Subsurface)) => true,
            _ => false,
        }
    }
}

/// Node payload
#[derive(Debug)]
pub enum NodeContent {
    Layer,
    Surface(Surface),
    Subsurface(Surface),
}

impl NodeContent {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeContent::Layer => NodeKind::Layer,
            NodeContent::Surface(_) => NodeKind::Surface,
            NodeContent::Subsurface(_) => NodeKind::Subsurface,
        }
    }
}

/// A node in the scene graph
#[derive(Debug)]
pub struct SceneNode {
    /// Node payload
    pub content: NodeContent,
    /// Client owning the node (client surfaces only)
    pub owner: Option<ClientId>,
    /// Transform relative to the parent
    pub transform: Transform,
    /// Stacking key among siblings
    pub z: i32,
    /// Disabled nodes hide their whole subtree
    pub enabled: bool,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

impl SceneNode {
    pub(crate) fn new(content: NodeContent, owner: Option<ClientId>) -> Self {
        Self {
            content,
            owner,
            transform: Transform::IDENTITY,
            z: 0,
            enabled: true,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.content.kind()
    }

    /// Parent node, `None` for roots
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in insertion order
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn surface(&self) -> Option<&Surface> {
        match &self.content {
            NodeContent::Surface(surface) | NodeContent::Subsurface(surface) => Some(surface),
            NodeContent::Layer => None,
        }
    }

    pub fn surface_mut(&mut self) -> Option<&mut Surface> {
        match &mut self.content {
            NodeContent::Surface(surface) | NodeContent::Subsurface(surface) => Some(surface),
            NodeContent::Layer => None,
        }
    }

    /// Buffer currently displayed by the node
    pub fn buffer(&self) -> Option<BufferId> {
        self.surface().and_then(|surface| surface.buffer)
    }

    /// Content size in node coordinates
    pub fn size(&self) -> (i32, i32) {
        self.surface().map(|surface| surface.size).unwrap_or((0, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_rules() {
        assert!(NodeKind::Layer.accepts_parent(None));
        assert!(NodeKind::Layer.accepts_parent(Some(NodeKind::Layer)));
        assert!(!NodeKind::Layer.accepts_parent(Some(NodeKind::Surface)));
        assert!(NodeKind::Surface.accepts_parent(Some(NodeKind::Layer)));
        assert!(!NodeKind::Subsurface.accepts_parent(None));
        assert!(NodeKind::Subsurface.accepts_parent(Some(NodeKind::Subsurface)));
    }

    #[test]
    fn test_layer_has_no_content() {
        let node = SceneNode::new(NodeContent::Layer, None);
        assert_eq!(node.kind(), NodeKind::Layer);
        assert!(node.buffer().is_none());
        assert_eq!(node.size(), (0, 0));
    }
}

//! Global compositor state
//!
//! This module contains the central compositor state that coordinates
//! the scene graph, buffers, outputs, input routing and the per-output
//! frame pipelines. Everything here runs on the owner thread; only
//! render composition fans out to scoped worker threads.

use std::collections::HashMap;
use std::time::Instant;

use log::{debug, info, trace, warn};

use crate::compositor::buffer::{BufferError, BufferFormat, BufferId, BufferRelease, BufferStore};
use crate::compositor::event::CompositorEvent;
use crate::compositor::frame::{
    FramePipeline, FrameSnapshot, FrameState, InFlight, PendingCallback, PresentAck, SnapshotItem,
};
use crate::compositor::output::{OutputDevice, OutputError, OutputId, OutputRegistry};
use crate::compositor::surface::{CallbackId, Surface};
use crate::geometry::{Point, Rect, Region, Transform};
use crate::input::{Axis, ButtonState, InputNotice, InputRouter, KeyState, ModifierState, Seat};
use crate::renderer::{ComposedFrame, RenderBackend, RenderError};
use crate::resource::{Lookup, ResourceError};
use crate::scene::{NodeContent, NodeId, SceneError, SceneGraph, VisibleNode, VisibleNodes};

/// Unique identifier for clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

/// Compositor core errors
#[derive(Debug, thiserror::Error)]
pub enum CompositorError {
    #[error(transparent)]
    Scene(#[from] SceneError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("output {output} is {state:?}, expected {expected:?}")]
    WrongFrameState {
        output: OutputId,
        state: FrameState,
        expected: FrameState,
    },
    #[error("unknown client {0:?}")]
    UnknownClient(ClientId),
}

/// Per-client data
#[derive(Debug)]
pub struct ClientData {
    pub id: ClientId,
    pub connected_at: Instant,
}

/// The global compositor state
pub struct CompositorState {
    scene: SceneGraph,
    outputs: OutputRegistry,
    buffers: BufferStore,
    input: InputRouter,
    pipelines: HashMap<OutputId, FramePipeline>,
    renderer: Box<dyn RenderBackend>,

    /// Connected clients
    clients: HashMap<ClientId, ClientData>,
    next_client: u64,

    /// Notifications waiting for the transport
    events: Vec<CompositorEvent>,
    started: Instant,
}

impl CompositorState {
    /// Create a new compositor state
    pub fn new(renderer: Box<dyn RenderBackend>, seat: Seat) -> Self {
        info!("Compositor core using {} renderer", renderer.name());
        Self {
            scene: SceneGraph::new(),
            outputs: OutputRegistry::new(),
            buffers: BufferStore::new(),
            input: InputRouter::new(seat),
            pipelines: HashMap::new(),
            renderer,
            clients: HashMap::new(),
            next_client: 1,
            events: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn scene(&self) -> &SceneGraph {
        &self.scene
    }

    pub fn outputs(&self) -> &OutputRegistry {
        &self.outputs
    }

    pub fn buffers(&self) -> &BufferStore {
        &self.buffers
    }

    pub fn input(&self) -> &InputRouter {
        &self.input
    }

    pub fn renderer(&self) -> &dyn RenderBackend {
        self.renderer.as_ref()
    }

    /// Milliseconds since the compositor started
    pub fn now_ms(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }

    /// Take all queued notifications
    pub fn drain_events(&mut self) -> Vec<CompositorEvent> {
        std::mem::take(&mut self.events)
    }

    // Clients

    /// Register a new client
    pub fn add_client(&mut self) -> ClientId {
        let id = ClientId(self.next_client);
        self.next_client += 1;
        self.clients.insert(
            id,
            ClientData {
                id,
                connected_at: Instant::now(),
            },
        );
        debug!("Client {:?} connected", id);
        id
    }

    /// Remove a client and clean up its resources
    ///
    /// Nodes owned by the client are destroyed and its buffers are
    /// destroyed outright, whatever still references them.
    pub fn remove_client(&mut self, id: ClientId) -> Result<(), CompositorError> {
        if self.clients.remove(&id).is_none() {
            return Err(CompositorError::UnknownClient(id));
        }

        let nodes = self.scene.nodes_owned_by(id);
        let node_count = nodes.len();
        for node in nodes {
            // Already gone when an ancestor was destroyed first
            if self.scene.is_alive(node) {
                self.destroy_node(node)?;
            }
        }
        let buffers = self.buffers.destroy_owned_by(id);
        info!(
            "Client {:?} disconnected ({} nodes, {} buffers)",
            id,
            node_count,
            buffers.len()
        );
        Ok(())
    }

    /// Get the number of connected clients
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    fn require_client(&self, id: ClientId) -> Result<(), CompositorError> {
        if self.clients.contains_key(&id) {
            Ok(())
        } else {
            Err(CompositorError::UnknownClient(id))
        }
    }

    // Scene

    pub fn create_layer(&mut self, parent: Option<NodeId>) -> Result<NodeId, CompositorError> {
        Ok(self.scene.create_node(parent, NodeContent::Layer, None)?)
    }

    pub fn create_surface(
        &mut self,
        client: ClientId,
        parent: Option<NodeId>,
    ) -> Result<NodeId, CompositorError> {
        self.require_client(client)?;
        let content = NodeContent::Surface(Surface::new());
        Ok(self.scene.create_node(parent, content, Some(client))?)
    }

    pub fn create_subsurface(
        &mut self,
        client: ClientId,
        parent: NodeId,
    ) -> Result<NodeId, CompositorError> {
        self.require_client(client)?;
        let content = NodeContent::Subsurface(Surface::new());
        Ok(self.scene.create_node(Some(parent), content, Some(client))?)
    }

    /// Turn an existing surface into a subsurface of `parent`
    pub fn make_subsurface(&mut self, node: NodeId, parent: NodeId) -> Result<(), CompositorError> {
        self.restack(node, |scene| scene.convert_to_subsurface(node, parent))
    }

    pub fn set_transform(&mut self, node: NodeId, transform: Transform) -> Result<(), CompositorError> {
        self.restack(node, |scene| scene.set_transform(node, transform))
    }

    pub fn set_position(&mut self, node: NodeId, x: f64, y: f64) -> Result<(), CompositorError> {
        self.restack(node, |scene| scene.set_position(node, x, y))
    }

    pub fn set_z(&mut self, node: NodeId, z: i32) -> Result<(), CompositorError> {
        self.restack(node, |scene| scene.set_z(node, z))
    }

    pub fn set_enabled(&mut self, node: NodeId, enabled: bool) -> Result<(), CompositorError> {
        self.restack(node, |scene| scene.set_enabled(node, enabled))
    }

    pub fn reparent(&mut self, node: NodeId, parent: Option<NodeId>) -> Result<(), CompositorError> {
        self.restack(node, |scene| scene.reparent(node, parent))
    }

    pub fn raise_to_top(&mut self, node: NodeId) -> Result<(), CompositorError> {
        self.restack(node, |scene| scene.raise_to_top(node))
    }

    pub fn lower_to_bottom(&mut self, node: NodeId) -> Result<(), CompositorError> {
        self.restack(node, |scene| scene.lower_to_bottom(node))
    }

    pub fn place_above_parent(&mut self, node: NodeId) -> Result<(), CompositorError> {
        self.restack(node, |scene| scene.place_above_parent(node))
    }

    pub fn place_below_parent(&mut self, node: NodeId) -> Result<(), CompositorError> {
        self.restack(node, |scene| scene.place_below_parent(node))
    }

    pub fn place_above(&mut self, node: NodeId, sibling: NodeId) -> Result<(), CompositorError> {
        self.restack(node, |scene| scene.place_above(node, sibling))
    }

    pub fn place_below(&mut self, node: NodeId, sibling: NodeId) -> Result<(), CompositorError> {
        self.restack(node, |scene| scene.place_below(node, sibling))
    }

    /// Destroy a node and its subtree
    pub fn destroy_node(&mut self, node: NodeId) -> Result<(), CompositorError> {
        for destroyed in self.scene.destroy(node)? {
            if let Some(rect) = destroyed.rect {
                self.outputs.add_damage(rect);
            }
            if let Some(buffer) = destroyed.buffer {
                self.release_scene_buffer(buffer);
            }
            if !destroyed.callbacks.is_empty() {
                self.events.push(CompositorEvent::CallbacksCancelled {
                    client: destroyed.owner,
                    callbacks: destroyed.callbacks,
                });
            }
            let notices = self.input.node_destroyed(destroyed.id);
            self.push_input(notices);
        }
        Ok(())
    }

    /// Visible nodes on an output, bottom first
    pub fn visible_nodes_for(&self, output: OutputId) -> Result<VisibleNodes<'_>, CompositorError> {
        let area = self.outputs.layout_box(output)?;
        Ok(self.scene.visible_nodes_in(Some(area)))
    }

    /// Topmost node accepting input at a global point
    pub fn node_at(&self, point: Point) -> Option<(NodeId, Point)> {
        self.scene.node_at(point)
    }

    // Surfaces

    pub fn attach(&mut self, node: NodeId, buffer: Option<BufferId>) -> Result<(), CompositorError> {
        if let Some(buffer) = buffer {
            if self.buffers.lookup(buffer).is_gone() {
                return Err(ResourceError::stale(buffer).into());
            }
        }
        self.scene.surface_mut(node)?.attach(buffer);
        Ok(())
    }

    /// Damage in surface-local coordinates
    pub fn damage_surface(&mut self, node: NodeId, rect: Rect) -> Result<(), CompositorError> {
        self.scene.surface_mut(node)?.damage(rect);
        Ok(())
    }

    pub fn frame(&mut self, node: NodeId, callback: CallbackId) -> Result<(), CompositorError> {
        self.scene.surface_mut(node)?.frame(callback);
        Ok(())
    }

    pub fn set_buffer_scale(&mut self, node: NodeId, scale: i32) -> Result<(), CompositorError> {
        self.scene.surface_mut(node)?.set_scale(scale);
        Ok(())
    }

    pub fn set_input_region(
        &mut self,
        node: NodeId,
        region: Option<Region>,
    ) -> Result<(), CompositorError> {
        self.scene.surface_mut(node)?.set_input_region(region);
        Ok(())
    }

    /// Apply a surface's pending state
    pub fn commit_surface(&mut self, node: NodeId) -> Result<(), CompositorError> {
        let before = self.scene.global_rect(node);

        let surface = self.scene.surface(node)?;
        let next_buffer = match surface.pending.buffer {
            crate::compositor::surface::BufferChange::Attach(id) => Some(id),
            crate::compositor::surface::BufferChange::Keep => surface.buffer,
            crate::compositor::surface::BufferChange::Detach => None,
        };
        let size = next_buffer.and_then(|id| {
            self.buffers
                .lookup(id)
                .live()
                .map(|buffer| (buffer.width, buffer.height))
        });

        let outcome = self.scene.surface_mut(node)?.commit(size);

        if let Some(attached) = outcome.attached {
            if let Err(err) = self.buffers.attach(attached) {
                warn!("Node {} committed buffer {}: {}", node, attached, err);
            }
        }
        if let Some(replaced) = outcome.replaced {
            self.release_scene_buffer(replaced);
        }

        let content_changed =
            outcome.resized || outcome.attached.is_some() || outcome.replaced.is_some();
        if content_changed {
            if let Some(rect) = before {
                self.outputs.add_damage(rect);
            }
            if let Some(rect) = self.scene.global_rect(node) {
                self.outputs.add_damage(rect);
            }
        }

        let transform = self.scene.effective_transform(node)?;
        for rect in &outcome.damage {
            self.outputs.add_damage(transform.map_rect(rect));
        }
        trace!(
            "Committed node {} ({} damage rects)",
            node,
            outcome.damage.len()
        );
        Ok(())
    }

    // Buffers

    pub fn create_buffer(
        &mut self,
        client: ClientId,
        width: i32,
        height: i32,
        format: BufferFormat,
    ) -> Result<BufferId, CompositorError> {
        self.require_client(client)?;
        Ok(self.buffers.create(client, width, height, format)?)
    }

    /// The client dropped its handle to a buffer
    pub fn release_buffer(&mut self, buffer: BufferId) -> Result<(), CompositorError> {
        self.buffers.release_client(buffer)?;
        Ok(())
    }

    /// Destroy a buffer regardless of who still displays it
    pub fn destroy_buffer(&mut self, buffer: BufferId) -> Result<(), CompositorError> {
        let shown: Vec<Rect> = self
            .scene
            .visible_nodes_in(None)
            .filter(|visible| visible.buffer == buffer)
            .map(|visible| visible.rect)
            .collect();
        self.buffers.destroy(buffer)?;
        // Outputs showing it must recompose to notice the loss
        for rect in shown {
            self.outputs.add_damage(rect);
        }
        Ok(())
    }

    fn release_scene_buffer(&mut self, buffer: BufferId) {
        match self.buffers.release_scene(buffer) {
            Ok(BufferRelease::Idle) => {
                if let Some(owner) = self.buffers.lookup(buffer).live().map(|b| b.owner) {
                    self.events.push(CompositorEvent::BufferReleased {
                        client: owner,
                        buffer,
                    });
                }
            }
            Ok(BufferRelease::Retained | BufferRelease::Destroyed) => {}
            Err(err) => debug!("Scene release of buffer {}: {}", buffer, err),
        }
    }

    // Outputs

    pub fn register_output(&mut self, device: OutputDevice) -> Result<OutputId, CompositorError> {
        let id = self.outputs.register(device)?;
        self.pipelines.insert(id, FramePipeline::new());
        self.events.push(CompositorEvent::OutputAdded(id));
        Ok(id)
    }

    /// Remove an output; its frame in flight is abandoned
    pub fn unregister_output(&mut self, id: OutputId) -> Result<(), CompositorError> {
        self.outputs.unregister(id)?;
        if let Some(mut pipeline) = self.pipelines.remove(&id) {
            if let Some(frame) = pipeline.abandon() {
                debug!("Abandoned frame {} on {}", frame.seq, id);
                self.requeue_callbacks(frame.callbacks);
            }
        }

        let position = self.input.pointer_position();
        if self.outputs.output_at(position).is_none() {
            if let Some(inside) = self.outputs.closest_point(position) {
                self.input.seat_mut().pointer_mut().motion(inside);
            }
        }

        self.events.push(CompositorEvent::OutputRemoved(id));
        Ok(())
    }

    pub fn set_output_position(&mut self, id: OutputId, x: i32, y: i32) -> Result<(), CompositorError> {
        Ok(self.outputs.set_layout_position(id, x, y)?)
    }

    pub fn set_output_mode(&mut self, id: OutputId, index: usize) -> Result<(), CompositorError> {
        Ok(self.outputs.set_mode(id, index)?)
    }

    pub fn frame_state(&self, output: OutputId) -> Option<FrameState> {
        self.pipelines.get(&output).map(FramePipeline::state)
    }

    // Frames

    /// Refresh tick: request a frame if the output has anything to show
    pub fn request_frame(&mut self, output: OutputId) -> Result<bool, CompositorError> {
        let area = self.outputs.layout_box(output)?;
        let state = self.frame_state(output).ok_or(OutputError::Unknown(output))?;
        if state != FrameState::Idle {
            return Ok(false);
        }

        let damaged = self
            .outputs
            .get(output)
            .is_some_and(|output| !output.damage.is_empty());
        let waiting = self.scene.visible_nodes_in(Some(area)).any(|visible| {
            self.scene
                .surface(visible.id)
                .is_ok_and(|surface| !surface.frame_callbacks.is_empty())
        });
        if !damaged && !waiting {
            return Ok(false);
        }

        if let Some(pipeline) = self.pipelines.get_mut(&output) {
            pipeline.request();
        }
        trace!("Frame requested on {}", output);
        Ok(true)
    }

    /// Take the snapshot for a requested frame
    pub fn compose(&mut self, output: OutputId) -> Result<FrameSnapshot, CompositorError> {
        self.expect_state(output, FrameState::FrameRequested)?;
        let (area, scale) = match self.outputs.get(output) {
            Some(output) => (output.layout_box(), output.scale),
            None => return Err(OutputError::Unknown(output).into()),
        };

        let visible: Vec<VisibleNode> = self.scene.visible_nodes_in(Some(area)).collect();
        let mut items = Vec::with_capacity(visible.len());
        let mut lost = Vec::new();
        for node in visible {
            let owner = self.scene.get(node.id).and_then(|n| n.owner);
            match self.buffers.lookup(node.buffer) {
                Lookup::Live(buffer) => items.push(SnapshotItem {
                    node: node.id,
                    owner,
                    buffer: node.buffer,
                    width: buffer.width,
                    height: buffer.height,
                    format: buffer.format,
                    transform: Transform {
                        x: node.transform.x - area.x as f64,
                        y: node.transform.y - area.y as f64,
                        scale: node.transform.scale,
                    },
                    z: node.z,
                    rect: node.rect.translate(-area.x, -area.y),
                }),
                Lookup::Gone => lost.push((node.id, owner, node.buffer)),
            }
        }

        for (node, client, buffer) in lost {
            warn!("Node {} displays buffer {} which is gone", node, buffer);
            if let Ok(surface) = self.scene.surface_mut(node) {
                surface.buffer = None;
                surface.size = (0, 0);
            }
            self.events.push(CompositorEvent::BufferLost {
                client,
                node,
                buffer,
            });
        }

        let mut callbacks = Vec::new();
        for item in &items {
            if let Ok(surface) = self.scene.surface_mut(item.node) {
                callbacks.extend(surface.take_frame_callbacks().into_iter().map(|callback| {
                    PendingCallback {
                        node: item.node,
                        client: item.owner,
                        callback,
                    }
                }));
            }
        }

        let damage = self
            .outputs
            .get_mut(output)
            .map(|output| output.damage.take())
            .unwrap_or_default();
        let pipeline = self
            .pipelines
            .get_mut(&output)
            .ok_or(OutputError::Unknown(output))?;
        let seq = pipeline.begin_compose(damage.clone(), callbacks);
        trace!("Composing frame {} on {} ({} items)", seq, output, items.len());

        Ok(FrameSnapshot {
            output,
            seq,
            bounds: Rect::new(0, 0, area.width, area.height),
            scale,
            items,
            damage,
        })
    }

    /// Render a snapshot and hand it over for presentation
    pub fn submit(&mut self, snapshot: &FrameSnapshot) -> Result<(), CompositorError> {
        let composed = self.renderer.compose(snapshot);
        self.finish_submit(snapshot, composed)
    }

    /// Run request, compose and submit for one output
    pub fn tick(&mut self, output: OutputId) -> Result<bool, CompositorError> {
        if !self.request_frame(output)? {
            return Ok(false);
        }
        let snapshot = self.compose(output)?;
        self.submit(&snapshot)?;
        Ok(true)
    }

    /// Tick several outputs, composing their frames in parallel; a single
    /// frame is composed on the calling thread
    pub fn tick_outputs(
        &mut self,
        outputs: &[OutputId],
    ) -> Vec<(OutputId, Result<bool, CompositorError>)> {
        let mut results = Vec::new();
        let mut snapshots = Vec::new();
        for &output in outputs {
            match self.request_frame(output) {
                Ok(true) => match self.compose(output) {
                    Ok(snapshot) => snapshots.push(snapshot),
                    Err(err) => results.push((output, Err(err))),
                },
                other => results.push((output, other)),
            }
        }

        let renderer = self.renderer.as_ref();
        let composed: Vec<Result<ComposedFrame, RenderError>> = match snapshots.split_last() {
            None => Vec::new(),
            Some((last, [])) => vec![renderer.compose(last)],
            // The caller's thread takes the last snapshot itself
            Some((last, rest)) => std::thread::scope(|scope| {
                let workers: Vec<_> = rest
                    .iter()
                    .map(|snapshot| scope.spawn(move || renderer.compose(snapshot)))
                    .collect();
                let own = renderer.compose(last);
                let mut composed: Vec<_> = workers
                    .into_iter()
                    .map(|worker| {
                        worker.join().unwrap_or_else(|_| {
                            Err(RenderError::Present("compose worker panicked".to_string()))
                        })
                    })
                    .collect();
                composed.push(own);
                composed
            }),
        };

        for (snapshot, frame) in snapshots.iter().zip(composed) {
            let result = self.finish_submit(snapshot, frame).map(|()| true);
            results.push((snapshot.output, result));
        }
        results
    }

    /// Presentation finished; runs on the owner thread
    pub fn present_complete(&mut self, ack: PresentAck) {
        let Some(pipeline) = self.pipelines.get_mut(&ack.output) else {
            debug!("Ignoring presentation of frame {} on removed {}", ack.seq, ack.output);
            return;
        };
        let Some(frame) = pipeline.finish(ack.seq) else {
            debug!("Ignoring stale presentation of frame {} on {}", ack.seq, ack.output);
            return;
        };

        match ack.result {
            Ok(()) => {
                let time = self.now_ms();
                trace!("Frame {} presented on {}", frame.seq, ack.output);
                for pending in frame.callbacks {
                    self.events.push(CompositorEvent::FrameDone {
                        client: pending.client,
                        callback: pending.callback,
                        time,
                    });
                }
            }
            Err(err) => {
                warn!("Presentation failed on {}: {}", ack.output, err);
                self.restore(ack.output, frame);
            }
        }
    }

    fn finish_submit(
        &mut self,
        snapshot: &FrameSnapshot,
        composed: Result<ComposedFrame, RenderError>,
    ) -> Result<(), CompositorError> {
        self.expect_state(snapshot.output, FrameState::Composing)?;

        match composed.and_then(|frame| self.renderer.submit(frame)) {
            Ok(()) => {
                if let Some(pipeline) = self.pipelines.get_mut(&snapshot.output) {
                    pipeline.begin_present(snapshot.seq);
                }
                Ok(())
            }
            Err(err) => {
                warn!("Frame {} on {} failed: {}", snapshot.seq, snapshot.output, err);
                let frame = self
                    .pipelines
                    .get_mut(&snapshot.output)
                    .and_then(|pipeline| pipeline.finish(snapshot.seq));
                if let Some(frame) = frame {
                    self.restore(snapshot.output, frame);
                }
                Err(err.into())
            }
        }
    }

    /// Give a failed frame's damage and callbacks back
    fn restore(&mut self, output: OutputId, frame: InFlight) {
        if let Some(output) = self.outputs.get_mut(output) {
            output.damage.merge(&frame.damage);
        }
        self.requeue_callbacks(frame.callbacks);
    }

    fn requeue_callbacks(&mut self, callbacks: Vec<PendingCallback>) {
        for pending in callbacks.into_iter().rev() {
            match self.scene.surface_mut(pending.node) {
                Ok(surface) => surface.frame_callbacks.insert(0, pending.callback),
                Err(_) => {
                    trace!("Dropping callback of destroyed node {}", pending.node);
                    self.events.push(CompositorEvent::CallbacksCancelled {
                        client: pending.client,
                        callbacks: vec![pending.callback],
                    });
                }
            }
        }
    }

    fn expect_state(&self, output: OutputId, expected: FrameState) -> Result<(), CompositorError> {
        let state = self.frame_state(output).ok_or(OutputError::Unknown(output))?;
        if state != expected {
            return Err(CompositorError::WrongFrameState {
                output,
                state,
                expected,
            });
        }
        Ok(())
    }

    /// Damage the current bounds of a subtree around a scene change
    fn restack(
        &mut self,
        node: NodeId,
        change: impl FnOnce(&mut SceneGraph) -> Result<(), SceneError>,
    ) -> Result<(), CompositorError> {
        self.damage_subtree(node);
        change(&mut self.scene)?;
        self.damage_subtree(node);
        Ok(())
    }

    fn damage_subtree(&mut self, node: NodeId) {
        for id in self.scene.subtree(node) {
            if let Some(rect) = self.scene.global_rect(id) {
                self.outputs.add_damage(rect);
            }
        }
    }

    // Input

    /// Move the cursor to an absolute position, kept inside the layout
    pub fn pointer_motion(&mut self, position: Point, time: u32) {
        let position = if self.outputs.output_at(position).is_some() {
            position
        } else {
            self.outputs.closest_point(position).unwrap_or(position)
        };
        let notices = self.input.pointer_motion(&self.scene, position, time);
        self.push_input(notices);
    }

    /// Move the cursor by a delta, clamped to the layout
    pub fn pointer_motion_relative(&mut self, dx: f64, dy: f64, time: u32) {
        let current = self.input.pointer_position();
        self.pointer_motion(Point::new(current.x + dx, current.y + dy), time);
    }

    pub fn pointer_button(&mut self, button: u32, state: ButtonState, time: u32) {
        let notices = self.input.pointer_button(&self.scene, button, state, time);
        self.push_input(notices);
    }

    pub fn pointer_axis(&mut self, axis: Axis, value: f64, time: u32) {
        let notices = self.input.pointer_axis(axis, value, time);
        self.push_input(notices);
    }

    pub fn key(&mut self, key: u32, state: KeyState, time: u32) {
        let notices = self.input.key(key, state, time);
        self.push_input(notices);
    }

    pub fn modifiers(&mut self, modifiers: ModifierState) {
        let notices = self.input.modifiers(modifiers);
        self.push_input(notices);
    }

    /// Move keyboard focus to a surface (or nowhere)
    pub fn set_keyboard_focus(&mut self, node: Option<NodeId>) -> Result<(), CompositorError> {
        if let Some(node) = node {
            self.scene.surface(node)?;
        }
        let notices = self.input.set_keyboard_focus(node);
        self.push_input(notices);
        Ok(())
    }

    fn push_input(&mut self, notices: Vec<InputNotice>) {
        self.events
            .extend(notices.into_iter().map(CompositorEvent::Input));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread::{self, ThreadId};

    use super::*;
    use crate::compositor::output::OutputMode;
    use crate::input::{FocusKind, PointerGrab};
    use crate::renderer::plan_draws;

    #[derive(Default)]
    struct RecordingRenderer {
        frames: Arc<Mutex<Vec<ComposedFrame>>>,
        fail_submit: Arc<AtomicBool>,
        composed_on: Arc<Mutex<Vec<ThreadId>>>,
    }

    impl RenderBackend for RecordingRenderer {
        fn name(&self) -> &str {
            "recording"
        }

        fn formats(&self) -> &[BufferFormat] {
            &[BufferFormat::Argb8888, BufferFormat::Xrgb8888]
        }

        fn compose(&self, snapshot: &FrameSnapshot) -> Result<ComposedFrame, RenderError> {
            self.composed_on.lock().unwrap().push(thread::current().id());
            Ok(ComposedFrame {
                output: snapshot.output,
                seq: snapshot.seq,
                draws: plan_draws(snapshot),
                damage: snapshot.damage.clone(),
            })
        }

        fn submit(&self, frame: ComposedFrame) -> Result<(), RenderError> {
            if self.fail_submit.load(Ordering::SeqCst) {
                return Err(RenderError::Present("no vblank".to_string()));
            }
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }
    }

    struct Harness {
        state: CompositorState,
        frames: Arc<Mutex<Vec<ComposedFrame>>>,
        fail_submit: Arc<AtomicBool>,
        composed_on: Arc<Mutex<Vec<ThreadId>>>,
        output: OutputId,
        client: ClientId,
        layer: NodeId,
    }

    fn device(name: &str, width: i32, height: i32) -> OutputDevice {
        OutputDevice {
            name: name.to_string(),
            scale: 1,
            modes: vec![OutputMode {
                preferred: true,
                ..OutputMode::new(width, height, 60000)
            }],
            ..Default::default()
        }
    }

    fn harness() -> Harness {
        let renderer = RecordingRenderer::default();
        let frames = renderer.frames.clone();
        let fail_submit = renderer.fail_submit.clone();
        let composed_on = renderer.composed_on.clone();
        let mut state = CompositorState::new(Box::new(renderer), Seat::new());
        let output = state.register_output(device("O1", 1920, 1080)).unwrap();
        let client = state.add_client();
        let layer = state.create_layer(None).unwrap();
        Harness {
            state,
            frames,
            fail_submit,
            composed_on,
            output,
            client,
            layer,
        }
    }

    impl Harness {
        fn mapped_surface(&mut self, width: i32, height: i32) -> (NodeId, BufferId) {
            let node = self.state.create_surface(self.client, Some(self.layer)).unwrap();
            let buffer = self
                .state
                .create_buffer(self.client, width, height, BufferFormat::Argb8888)
                .unwrap();
            self.state.attach(node, Some(buffer)).unwrap();
            self.state
                .damage_surface(node, Rect::new(0, 0, width, height))
                .unwrap();
            self.state.commit_surface(node).unwrap();
            (node, buffer)
        }

        fn last_ack(&self, result: Result<(), RenderError>) -> PresentAck {
            let frame = self.frames.lock().unwrap().last().cloned().unwrap();
            PresentAck {
                output: frame.output,
                seq: frame.seq,
                result,
            }
        }

        fn frame_done(&mut self) -> Vec<CallbackId> {
            self.state
                .drain_events()
                .into_iter()
                .filter_map(|event| match event {
                    CompositorEvent::FrameDone { callback, .. } => Some(callback),
                    _ => None,
                })
                .collect()
        }
    }

    #[test]
    fn test_client_ids_unique() {
        let mut h = harness();
        let other = h.state.add_client();
        assert_ne!(h.client, other);
        assert_eq!(h.state.client_count(), 2);
    }

    #[test]
    fn test_frame_lifecycle() {
        let mut h = harness();
        let (surface, _) = h.mapped_surface(100, 100);
        h.state.frame(surface, CallbackId(1)).unwrap();
        h.state.commit_surface(surface).unwrap();
        let output = h.output;

        assert_eq!(h.state.frame_state(output), Some(FrameState::Idle));
        assert!(h.state.request_frame(output).unwrap());
        assert_eq!(h.state.frame_state(output), Some(FrameState::FrameRequested));

        let snapshot = h.state.compose(output).unwrap();
        assert_eq!(h.state.frame_state(output), Some(FrameState::Composing));
        assert_eq!(snapshot.items.len(), 1);
        assert_eq!(snapshot.items[0].node, surface);

        h.state.submit(&snapshot).unwrap();
        assert_eq!(h.state.frame_state(output), Some(FrameState::Presenting));
        assert!(h.state.outputs().get(output).unwrap().damage.is_empty());

        let ack = h.last_ack(Ok(()));
        h.state.present_complete(ack.clone());
        assert_eq!(h.state.frame_state(output), Some(FrameState::Idle));
        assert_eq!(h.frame_done(), vec![CallbackId(1)]);

        // Exactly once
        h.state.present_complete(ack);
        assert!(h.frame_done().is_empty());

        // Nothing left to draw
        assert!(!h.state.request_frame(output).unwrap());
    }

    #[test]
    fn test_damage_everything_on_offset_subsurface() {
        let mut h = harness();
        let (parent, _) = h.mapped_surface(100, 100);
        let sub = h.state.create_subsurface(h.client, parent).unwrap();
        h.state.set_position(sub, 10.0, 10.0).unwrap();
        let buffer = h
            .state
            .create_buffer(h.client, 50, 50, BufferFormat::Argb8888)
            .unwrap();
        h.state.attach(sub, Some(buffer)).unwrap();
        h.state.commit_surface(sub).unwrap();
        assert!(h.state.tick(h.output).unwrap());
        let ack = h.last_ack(Ok(()));
        h.state.present_complete(ack);
        assert!(h.state.outputs().get(h.output).unwrap().damage.is_empty());

        h.state
            .damage_surface(sub, Rect::new(0, 0, i32::MAX, i32::MAX))
            .unwrap();
        h.state.commit_surface(sub).unwrap();
        assert_eq!(
            h.state.outputs().get(h.output).unwrap().damage.rects(),
            &[Rect::new(10, 10, 50, 50)]
        );
    }

    #[test]
    fn test_compose_requires_request() {
        let mut h = harness();
        assert!(matches!(
            h.state.compose(h.output),
            Err(CompositorError::WrongFrameState {
                state: FrameState::Idle,
                ..
            })
        ));
    }

    #[test]
    fn test_callbacks_alone_request_frame() {
        let mut h = harness();
        let (surface, _) = h.mapped_surface(10, 10);
        let output = h.output;
        h.state.tick(output).unwrap();
        let ack = h.last_ack(Ok(()));
        h.state.present_complete(ack);

        h.state.frame(surface, CallbackId(9)).unwrap();
        h.state.commit_surface(surface).unwrap();
        assert!(h.state.outputs().get(output).unwrap().damage.is_empty());
        assert!(h.state.tick(output).unwrap());
    }

    #[test]
    fn test_failed_presentation_restores() {
        let mut h = harness();
        let (surface, _) = h.mapped_surface(100, 100);
        h.state.frame(surface, CallbackId(1)).unwrap();
        h.state.commit_surface(surface).unwrap();
        let output = h.output;

        assert!(h.state.tick(output).unwrap());
        let ack = h.last_ack(Err(RenderError::Present("flip failed".to_string())));
        h.state.present_complete(ack);

        assert_eq!(h.state.frame_state(output), Some(FrameState::Idle));
        assert!(h.frame_done().is_empty());
        assert!(!h.state.outputs().get(output).unwrap().damage.is_empty());
        assert_eq!(
            h.state.scene().surface(surface).unwrap().frame_callbacks,
            vec![CallbackId(1)]
        );
        assert!(h.state.tick(output).unwrap());
    }

    #[test]
    fn test_failed_submit_restores() {
        let mut h = harness();
        h.mapped_surface(100, 100);
        h.fail_submit.store(true, Ordering::SeqCst);

        assert!(matches!(
            h.state.tick(h.output),
            Err(CompositorError::Render(_))
        ));
        assert_eq!(h.state.frame_state(h.output), Some(FrameState::Idle));
        assert!(!h.state.outputs().get(h.output).unwrap().damage.is_empty());
    }

    #[test]
    fn test_unregister_abandons_frame() {
        let mut h = harness();
        let (surface, _) = h.mapped_surface(100, 100);
        h.state.frame(surface, CallbackId(4)).unwrap();
        h.state.commit_surface(surface).unwrap();
        let first = h.output;

        h.state.tick(first).unwrap();
        let ack = h.last_ack(Ok(()));
        h.state.unregister_output(first).unwrap();
        assert_eq!(h.state.frame_state(first), None);

        h.state.present_complete(ack);
        assert!(h.frame_done().is_empty());
        assert_eq!(
            h.state.scene().surface(surface).unwrap().frame_callbacks,
            vec![CallbackId(4)]
        );

        let second = h.state.register_output(device("O2", 1280, 720)).unwrap();
        assert!(h.state.tick(second).unwrap());
        let ack = h.last_ack(Ok(()));
        h.state.present_complete(ack);
        assert_eq!(h.frame_done(), vec![CallbackId(4)]);
    }

    #[test]
    fn test_destroyed_node_cancels_callbacks() {
        let mut h = harness();
        let (surface, _) = h.mapped_surface(100, 100);
        h.state.frame(surface, CallbackId(7)).unwrap();
        h.state.commit_surface(surface).unwrap();
        h.state.frame(surface, CallbackId(8)).unwrap();
        h.state.drain_events();

        h.state.destroy_node(surface).unwrap();
        let events = h.state.drain_events();
        assert!(events.contains(&CompositorEvent::CallbacksCancelled {
            client: Some(h.client),
            callbacks: vec![CallbackId(7), CallbackId(8)],
        }));
        assert!(h.frame_done().is_empty());
    }

    #[test]
    fn test_failed_frame_of_destroyed_node_cancels_callbacks() {
        let mut h = harness();
        let (surface, _) = h.mapped_surface(100, 100);
        h.state.frame(surface, CallbackId(3)).unwrap();
        h.state.commit_surface(surface).unwrap();
        h.state.tick(h.output).unwrap();

        h.state.destroy_node(surface).unwrap();
        h.state.drain_events();
        let ack = h.last_ack(Err(RenderError::Present("lost".to_string())));
        h.state.present_complete(ack);
        assert_eq!(
            h.state.drain_events(),
            vec![CompositorEvent::CallbacksCancelled {
                client: Some(h.client),
                callbacks: vec![CallbackId(3)],
            }]
        );
    }

    #[test]
    fn test_snapshot_unaffected_by_later_changes() {
        let mut h = harness();
        let (surface, _) = h.mapped_surface(100, 100);
        h.state.request_frame(h.output).unwrap();
        let snapshot = h.state.compose(h.output).unwrap();
        let before = snapshot.clone();

        h.state.set_position(surface, 500.0, 500.0).unwrap();
        h.state.destroy_node(surface).unwrap();
        assert_eq!(snapshot, before);
        assert_eq!(snapshot.items[0].rect, Rect::new(0, 0, 100, 100));
    }

    #[test]
    fn test_gone_buffer_reported() {
        let mut h = harness();
        let (surface, buffer) = h.mapped_surface(100, 100);
        h.state.destroy_buffer(buffer).unwrap();
        h.state.drain_events();

        h.state.request_frame(h.output).unwrap();
        let snapshot = h.state.compose(h.output).unwrap();
        assert!(snapshot.items.is_empty());

        let events = h.state.drain_events();
        assert!(events.contains(&CompositorEvent::BufferLost {
            client: Some(h.client),
            node: surface,
            buffer,
        }));
    }

    #[test]
    fn test_buffer_destroyed_while_presenting() {
        let mut h = harness();
        let (surface, buffer) = h.mapped_surface(100, 100);
        assert!(h.state.tick(h.output).unwrap());
        assert_eq!(h.state.frame_state(h.output), Some(FrameState::Presenting));

        h.state.destroy_buffer(buffer).unwrap();
        let ack = h.last_ack(Ok(()));
        h.state.present_complete(ack);
        h.state.drain_events();

        assert!(h.state.request_frame(h.output).unwrap());
        let snapshot = h.state.compose(h.output).unwrap();
        assert!(snapshot.items.is_empty());
        assert!(h.state.drain_events().contains(&CompositorEvent::BufferLost {
            client: Some(h.client),
            node: surface,
            buffer,
        }));
    }

    #[test]
    fn test_replaced_buffer_released() {
        let mut h = harness();
        let (surface, first) = h.mapped_surface(100, 100);
        h.state.drain_events();

        let second = h
            .state
            .create_buffer(h.client, 100, 100, BufferFormat::Argb8888)
            .unwrap();
        h.state.attach(surface, Some(second)).unwrap();
        h.state.commit_surface(surface).unwrap();

        assert_eq!(
            h.state.drain_events(),
            vec![CompositorEvent::BufferReleased {
                client: h.client,
                buffer: first,
            }]
        );
        assert_eq!(h.state.buffers().lookup(second).live().unwrap().scene_refs(), 1);
    }

    #[test]
    fn test_attach_gone_buffer_fails() {
        let mut h = harness();
        let surface = h.state.create_surface(h.client, Some(h.layer)).unwrap();
        let buffer = h
            .state
            .create_buffer(h.client, 1, 1, BufferFormat::Argb8888)
            .unwrap();
        h.state.release_buffer(buffer).unwrap();
        assert!(matches!(
            h.state.attach(surface, Some(buffer)),
            Err(CompositorError::Resource(ResourceError::Stale { .. }))
        ));
    }

    #[test]
    fn test_remove_client_cleans_up() {
        let mut h = harness();
        let (surface, buffer) = h.mapped_surface(100, 100);
        h.state.set_keyboard_focus(Some(surface)).unwrap();
        h.state.drain_events();

        h.state.remove_client(h.client).unwrap();
        assert_eq!(h.state.client_count(), 0);
        assert!(!h.state.scene().is_alive(surface));
        assert!(h.state.buffers().lookup(buffer).is_gone());
        assert!(h.state.input().seat().keyboard_focus().is_none());

        let lost: Vec<_> = h
            .state
            .drain_events()
            .into_iter()
            .filter(|event| {
                matches!(
                    event,
                    CompositorEvent::Input(InputNotice::FocusLost {
                        kind: FocusKind::Keyboard,
                        ..
                    })
                )
            })
            .collect();
        assert_eq!(lost.len(), 1);
        assert!(matches!(
            h.state.remove_client(h.client),
            Err(CompositorError::UnknownClient(_))
        ));
    }

    #[test]
    fn test_tick_outputs_in_parallel() {
        let mut h = harness();
        let second = h.state.register_output(device("O2", 1280, 720)).unwrap();
        let (surface, _) = h.mapped_surface(200, 200);
        h.state.set_position(surface, 1820.0, 0.0).unwrap();

        let results = h.state.tick_outputs(&[h.output, second]);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, result)| matches!(result, Ok(true))));
        assert_eq!(h.state.frame_state(h.output), Some(FrameState::Presenting));
        assert_eq!(h.state.frame_state(second), Some(FrameState::Presenting));

        let frames = h.frames.lock().unwrap();
        assert_eq!(frames.len(), 2);
        let on_second = frames.iter().find(|f| f.output == second).unwrap();
        assert_eq!(on_second.draws[0].dst, Rect::new(-100, 0, 200, 200));
    }

    #[test]
    fn test_tick_single_output_inline() {
        let mut h = harness();
        h.mapped_surface(100, 100);

        let results = h.state.tick_outputs(&[h.output]);
        assert!(matches!(results.as_slice(), [(_, Ok(true))]));
        assert_eq!(h.state.frame_state(h.output), Some(FrameState::Presenting));
        assert_eq!(*h.composed_on.lock().unwrap(), vec![thread::current().id()]);

        // Nothing new to draw
        let results = h.state.tick_outputs(&[h.output]);
        assert!(matches!(results.as_slice(), [(_, Ok(false))]));
        assert_eq!(h.composed_on.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_pointer_grab_scenario() {
        let mut h = harness();
        let (surface, _) = h.mapped_surface(100, 100);
        h.state.drain_events();

        h.state.pointer_motion(Point::new(50.0, 50.0), 1);
        h.state.pointer_button(0x110, ButtonState::Pressed, 2);
        assert_eq!(h.state.input().grab().node(), Some(surface));

        h.state.pointer_motion(Point::new(800.0, 600.0), 3);
        let events = h.state.drain_events();
        assert!(events.iter().all(|event| match event {
            CompositorEvent::Input(notice) => notice.node() == surface,
            _ => true,
        }));
        assert!(events.iter().any(|event| matches!(
            event,
            CompositorEvent::Input(InputNotice::PointerMotion { x, .. }) if *x == 800.0
        )));

        h.state.pointer_button(0x110, ButtonState::Released, 4);
        assert_eq!(h.state.input().grab(), PointerGrab::NoGrab);
    }

    #[test]
    fn test_relative_motion_clamped() {
        let mut h = harness();
        h.state.pointer_motion_relative(-50.0, -50.0, 1);
        assert_eq!(h.state.input().pointer_position(), Point::new(0.0, 0.0));
        h.state.pointer_motion_relative(5000.0, 10.0, 2);
        let position = h.state.input().pointer_position();
        assert!(position.x < 1920.0 && position.x > 1919.0);
        assert_eq!(position.y, 10.0);
    }

    #[test]
    fn test_keyboard_focus_on_layer_rejected() {
        let mut h = harness();
        assert!(h.state.set_keyboard_focus(Some(h.layer)).is_err());
    }

    #[test]
    fn test_destroy_releases_buffer() {
        let mut h = harness();
        let (surface, buffer) = h.mapped_surface(100, 100);
        h.state.drain_events();
        h.state.destroy_node(surface).unwrap();
        assert_eq!(
            h.state.drain_events(),
            vec![CompositorEvent::BufferReleased {
                client: h.client,
                buffer,
            }]
        );
        assert!(!h.state.outputs().get(h.output).unwrap().damage.is_empty());
    }

    #[test]
    fn test_reparent_cycle_surfaces_error() {
        let mut h = harness();
        let child = h.state.create_layer(Some(h.layer)).unwrap();
        assert!(matches!(
            h.state.reparent(h.layer, Some(child)),
            Err(CompositorError::Scene(SceneError::Cycle { .. }))
        ));
    }

    #[test]
    fn test_visible_nodes_for_unknown_output() {
        let h = harness();
        assert!(h.state.visible_nodes_for(OutputId(99)).is_err());
    }
}

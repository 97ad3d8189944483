//! Compositor startup and teardown
//!
//! [`Goose::start`] brings the compositor up in explicit stages. Every
//! stage that registers something with the event loop or the display
//! records how to undo it; a failing stage releases everything set up
//! before it in reverse order, and so does shutdown.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use calloop::channel::{self, Sender};
use calloop::signals::{Signal, Signals};
use calloop::timer::{TimeoutAction, Timer};
use calloop::{LoopHandle, LoopSignal, RegistrationToken};
use log::{debug, info, warn};
use wayland_server::backend::GlobalId;
use wayland_server::DisplayHandle;

use crate::backend::{Backend, BackendEvent, EventLoop, HeadlessBackend};
use crate::compositor::{CompositorState, OutputId, OutputRegistry, PresentAck};
use crate::config::Config;
use crate::input::Seat;
use crate::renderer::HeadlessRenderer;
use crate::server::{self, ServerState, WaylandServer};

/// Startup stages, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupStage {
    EventLoop,
    Display,
    Backend,
    Renderer,
    Compositor,
    Allocator,
    Subcompositor,
    DataDeviceManager,
    Seat,
    OutputLayout,
    Listen,
}

impl fmt::Display for StartupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StartupStage::EventLoop => "event loop",
            StartupStage::Display => "display",
            StartupStage::Backend => "backend",
            StartupStage::Renderer => "renderer",
            StartupStage::Compositor => "compositor",
            StartupStage::Allocator => "allocator",
            StartupStage::Subcompositor => "subcompositor",
            StartupStage::DataDeviceManager => "data device manager",
            StartupStage::Seat => "seat",
            StartupStage::OutputLayout => "output layout",
            StartupStage::Listen => "listening socket",
        };
        f.write_str(name)
    }
}

/// A startup stage failed
#[derive(Debug, thiserror::Error)]
#[error("startup failed at the {stage} stage: {source}")]
pub struct StartupError {
    pub stage: StartupStage,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

fn stage<T, E>(stage: StartupStage, result: Result<T, E>) -> Result<T, StartupError>
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match result {
        Ok(value) => {
            debug!("Startup stage {} ready", stage);
            Ok(value)
        }
        Err(source) => Err(StartupError {
            stage,
            source: source.into(),
        }),
    }
}

/// One calloop timer per distinct refresh rate
pub struct FrameClocks {
    handle: LoopHandle<'static, ServerState>,
    timers: HashMap<u32, RegistrationToken>,
}

impl FrameClocks {
    fn new(handle: LoopHandle<'static, ServerState>) -> Self {
        Self {
            handle,
            timers: HashMap::new(),
        }
    }

    /// Number of running clocks
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Start clocks for new refresh rates and stop unused ones
    pub fn sync(&mut self, outputs: &OutputRegistry) -> Result<(), calloop::Error> {
        let mut wanted = HashMap::new();
        for output in outputs.iter() {
            let mode = output.current_mode();
            wanted.entry(mode.refresh).or_insert(mode.frame_interval());
        }

        let stale: Vec<u32> = self
            .timers
            .keys()
            .filter(|refresh| !wanted.contains_key(*refresh))
            .copied()
            .collect();
        for refresh in stale {
            if let Some(token) = self.timers.remove(&refresh) {
                debug!("Stopping {} mHz frame clock", refresh);
                self.handle.remove(token);
            }
        }

        for (refresh, interval) in wanted {
            if self.timers.contains_key(&refresh) {
                continue;
            }
            let token = self
                .handle
                .insert_source(Timer::from_duration(interval), move |_, _, state| {
                    tick_rate(state, refresh);
                    TimeoutAction::ToDuration(interval)
                })
                .map_err(|e| e.error)?;
            debug!("Started {} mHz frame clock ({:?})", refresh, interval);
            self.timers.insert(refresh, token);
        }
        Ok(())
    }

    fn clear(&mut self) {
        for (_, token) in self.timers.drain() {
            self.handle.remove(token);
        }
    }
}

/// Tick every output running at `refresh`
fn tick_rate(state: &mut ServerState, refresh: u32) {
    let ids: Vec<OutputId> = state
        .compositor
        .outputs()
        .iter()
        .filter(|output| output.refresh() == refresh)
        .map(|output| output.id)
        .collect();
    for (id, result) in state.compositor.tick_outputs(&ids) {
        if let Err(e) = result {
            warn!("Frame on {} failed: {}", id, e);
        }
    }
    state.flush();
}

fn handle_hotplug(state: &mut ServerState, clocks: &RefCell<FrameClocks>, event: BackendEvent) {
    match event {
        BackendEvent::OutputAdded(device) => {
            let name = device.name.clone();
            match state.compositor.register_output(device) {
                Ok(id) => info!("Output {} connected as {}", name, id),
                Err(e) => warn!("Failed to add output {}: {}", name, e),
            }
        }
        BackendEvent::OutputRemoved(name) => {
            let id = state
                .compositor
                .outputs()
                .iter()
                .find(|output| output.name == name)
                .map(|output| output.id);
            match id {
                Some(id) => match state.compositor.unregister_output(id) {
                    Ok(()) => info!("Output {} disconnected", name),
                    Err(e) => warn!("Failed to remove output {}: {}", name, e),
                },
                None => warn!("Removal of unknown output {}", name),
            }
        }
    }

    if let Err(e) = clocks.borrow_mut().sync(state.compositor.outputs()) {
        warn!("Failed to update frame clocks: {}", e);
    }
    state.flush();
}

/// Stop the loop on SIGINT or SIGTERM so teardown runs
///
/// The signals are blocked on the calling thread; threads spawned after
/// this inherit the mask.
fn watch_signals<D: 'static>(
    handle: &LoopHandle<'static, D>,
    stop: LoopSignal,
) -> Result<RegistrationToken, calloop::Error> {
    let signals = Signals::new(&[Signal::SIGINT, Signal::SIGTERM])?;
    handle
        .insert_source(signals, move |event, _, _| {
            info!("Received {:?}, shutting down", event.signal());
            stop.stop();
        })
        .map_err(|e| e.error)
}

/// Something to undo at teardown
enum Teardown {
    Source(StartupStage, RegistrationToken),
    Global(StartupStage, GlobalId),
    Clocks(Rc<RefCell<FrameClocks>>),
}

/// Undo log, run in reverse when dropped
struct Unwind {
    handle: LoopHandle<'static, ServerState>,
    display: Option<DisplayHandle>,
    steps: Vec<Teardown>,
}

impl Unwind {
    fn new(handle: LoopHandle<'static, ServerState>) -> Self {
        Self {
            handle,
            display: None,
            steps: Vec::new(),
        }
    }

    fn push(&mut self, step: Teardown) {
        self.steps.push(step);
    }

    fn run(&mut self) {
        while let Some(step) = self.steps.pop() {
            match step {
                Teardown::Source(stage, token) => {
                    debug!("Releasing {} event source", stage);
                    self.handle.remove(token);
                }
                Teardown::Global(stage, global) => {
                    debug!("Releasing {} global", stage);
                    if let Some(display) = &self.display {
                        display.remove_global::<ServerState>(global);
                    }
                }
                Teardown::Clocks(clocks) => {
                    debug!("Stopping frame clocks");
                    clocks.borrow_mut().clear();
                }
            }
        }
    }
}

impl Drop for Unwind {
    fn drop(&mut self) {
        self.run();
    }
}

/// A running compositor
pub struct Goose {
    unwind: Unwind,
    state: ServerState,
    clocks: Rc<RefCell<FrameClocks>>,
    backend: HeadlessBackend,
    socket_name: String,
    event_loop: EventLoop<ServerState>,
}

impl Goose {
    /// Bring the compositor up
    pub fn start(config: &Config) -> Result<Self, StartupError> {
        info!("Starting goose compositor");

        let event_loop = stage(StartupStage::EventLoop, EventLoop::<ServerState>::new())?;
        let handle = event_loop.handle();
        let mut unwind = Unwind::new(handle.clone());
        let token = stage(
            StartupStage::EventLoop,
            watch_signals(&handle, event_loop.signal()),
        )?;
        unwind.push(Teardown::Source(StartupStage::EventLoop, token));

        let server = stage(StartupStage::Display, WaylandServer::new())?;
        let dh = server.display_handle();
        unwind.display = Some(dh.clone());

        let mut backend = HeadlessBackend::new(&config.outputs);
        let devices = backend.enumerate_outputs();
        if devices.is_empty() {
            return Err(StartupError {
                stage: StartupStage::Backend,
                source: "backend reported no outputs".into(),
            });
        }
        let hotplug = stage(
            StartupStage::Backend,
            backend.take_hotplug().ok_or("hotplug channel already taken"),
        )?;
        info!("Using {} backend with {} outputs", backend.name(), devices.len());

        let (acks, ack_channel) = channel::channel::<PresentAck>();
        let renderer = stage(
            StartupStage::Renderer,
            HeadlessRenderer::new(config.present_latency, acks),
        )?;
        let token = stage(
            StartupStage::Renderer,
            handle
                .insert_source(ack_channel, |event, _, state: &mut ServerState| {
                    if let channel::Event::Msg(ack) = event {
                        state.compositor.present_complete(ack);
                        state.flush();
                    }
                })
                .map_err(|e| e.error),
        )?;
        unwind.push(Teardown::Source(StartupStage::Renderer, token));

        let seat = Seat::with_name(config.seat.clone());
        let core = CompositorState::new(Box::new(renderer), seat);
        let mut state = stage(StartupStage::Compositor, ServerState::new(core, dh.clone()))?;
        unwind.push(Teardown::Global(
            StartupStage::Compositor,
            server::create_compositor_global(&dh),
        ));
        unwind.push(Teardown::Global(
            StartupStage::Allocator,
            server::create_shm_global(&dh),
        ));
        unwind.push(Teardown::Global(
            StartupStage::Subcompositor,
            server::create_subcompositor_global(&dh),
        ));
        unwind.push(Teardown::Global(
            StartupStage::DataDeviceManager,
            server::create_data_device_manager_global(&dh),
        ));
        unwind.push(Teardown::Global(
            StartupStage::Seat,
            server::create_seat_global(&dh),
        ));

        for device in devices {
            stage(
                StartupStage::OutputLayout,
                state.compositor.register_output(device),
            )?;
        }
        state.flush();

        let clocks = Rc::new(RefCell::new(FrameClocks::new(handle.clone())));
        unwind.push(Teardown::Clocks(clocks.clone()));
        stage(
            StartupStage::OutputLayout,
            clocks.borrow_mut().sync(state.compositor.outputs()),
        )?;
        let hotplug_clocks = clocks.clone();
        let token = stage(
            StartupStage::OutputLayout,
            handle
                .insert_source(hotplug, move |event, _, state: &mut ServerState| {
                    if let channel::Event::Msg(event) = event {
                        handle_hotplug(state, &hotplug_clocks, event);
                    }
                })
                .map_err(|e| e.error),
        )?;
        unwind.push(Teardown::Source(StartupStage::OutputLayout, token));

        let listener = stage(
            StartupStage::Listen,
            server
                .listen(config.socket.as_deref(), &handle)
                .map_err(Box::<dyn std::error::Error + Send + Sync>::from),
        )?;
        for token in listener.tokens {
            unwind.push(Teardown::Source(StartupStage::Listen, token));
        }
        std::env::set_var("WAYLAND_DISPLAY", &listener.socket_name);

        info!("Compositor ready on {}", listener.socket_name);
        Ok(Self {
            unwind,
            state,
            clocks,
            backend,
            socket_name: listener.socket_name,
            event_loop,
        })
    }

    /// Socket name clients connect to
    pub fn socket_name(&self) -> &str {
        &self.socket_name
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ServerState {
        &mut self.state
    }

    /// Inject backend device changes
    pub fn hotplug_sender(&self) -> Sender<BackendEvent> {
        self.backend.hotplug_sender()
    }

    /// Number of frame clocks running
    pub fn frame_clock_count(&self) -> usize {
        self.clocks.borrow().len()
    }

    /// Signal for stopping [`Goose::run`] from a loop callback
    pub fn signal(&self) -> LoopSignal {
        self.event_loop.signal()
    }

    /// Run one event loop iteration
    pub fn dispatch(&mut self, timeout: Option<Duration>) -> anyhow::Result<()> {
        self.event_loop.dispatch(timeout, &mut self.state)
    }

    /// Run until the loop is stopped
    pub fn run(&mut self) -> anyhow::Result<()> {
        self.event_loop.run(&mut self.state)
    }

    /// Tear everything down in reverse startup order
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for Goose {
    fn drop(&mut self) {
        info!("Shutting down");
        self.unwind.run();
    }
}

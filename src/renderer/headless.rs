//! Headless render backend
//!
//! Composition only plans draw operations; nothing touches pixels.
//! Presentation runs on a worker thread which waits for the configured
//! latency and acknowledges each frame through a calloop channel.

use std::sync::mpsc;
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, trace};

use super::{plan_draws, ComposedFrame, RenderBackend, RenderError};
use crate::compositor::buffer::BufferFormat;
use crate::compositor::frame::{FrameSnapshot, PresentAck};

const FORMATS: &[BufferFormat] = &[BufferFormat::Argb8888, BufferFormat::Xrgb8888];

/// Render backend without display hardware
pub struct HeadlessRenderer {
    jobs: Mutex<Option<mpsc::Sender<ComposedFrame>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl HeadlessRenderer {
    /// Start the presentation worker
    pub fn new(
        latency: Duration,
        acks: calloop::channel::Sender<PresentAck>,
    ) -> std::io::Result<Self> {
        let (jobs, queue) = mpsc::channel::<ComposedFrame>();
        let worker = thread::Builder::new()
            .name("goose-present".to_string())
            .spawn(move || present_loop(queue, latency, acks))?;

        debug!("Headless renderer started (latency {:?})", latency);
        Ok(Self {
            jobs: Mutex::new(Some(jobs)),
            worker: Mutex::new(Some(worker)),
        })
    }
}

fn present_loop(
    queue: mpsc::Receiver<ComposedFrame>,
    latency: Duration,
    acks: calloop::channel::Sender<PresentAck>,
) {
    while let Ok(frame) = queue.recv() {
        if !latency.is_zero() {
            thread::sleep(latency);
        }
        trace!(
            "Presented frame {} on {} ({} draws)",
            frame.seq,
            frame.output,
            frame.draws.len()
        );
        let ack = PresentAck {
            output: frame.output,
            seq: frame.seq,
            result: Ok(()),
        };
        if acks.send(ack).is_err() {
            debug!("Acknowledgment channel closed, stopping presentation");
            break;
        }
    }
}

impl RenderBackend for HeadlessRenderer {
    fn name(&self) -> &str {
        "headless"
    }

    fn formats(&self) -> &[BufferFormat] {
        FORMATS
    }

    fn compose(&self, snapshot: &FrameSnapshot) -> Result<ComposedFrame, RenderError> {
        if let Some(item) = snapshot
            .items
            .iter()
            .find(|item| !FORMATS.contains(&item.format))
        {
            return Err(RenderError::UnsupportedFormat {
                node: item.node,
                format: item.format,
            });
        }

        Ok(ComposedFrame {
            output: snapshot.output,
            seq: snapshot.seq,
            draws: plan_draws(snapshot),
            damage: snapshot.damage.clone(),
        })
    }

    fn submit(&self, frame: ComposedFrame) -> Result<(), RenderError> {
        let jobs = self.jobs.lock().map_err(|_| RenderError::Disconnected)?;
        let sender = jobs.as_ref().ok_or(RenderError::Disconnected)?;
        sender.send(frame).map_err(|_| RenderError::Disconnected)
    }
}

impl Drop for HeadlessRenderer {
    fn drop(&mut self) {
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.take();
        }
        let worker = self.worker.lock().ok().and_then(|mut worker| worker.take());
        if let Some(worker) = worker {
            if worker.join().is_err() {
                error!("Presentation worker panicked");
            }
        }
        debug!("Headless renderer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::buffer::BufferId;
    use crate::compositor::frame::SnapshotItem;
    use crate::compositor::output::OutputId;
    use crate::geometry::{Rect, Transform};
    use crate::resource::ArenaKey;
    use crate::scene::NodeId;

    fn snapshot(format: BufferFormat, damage: Vec<Rect>) -> FrameSnapshot {
        FrameSnapshot {
            output: OutputId(1),
            seq: 1,
            bounds: Rect::new(0, 0, 100, 100),
            scale: 1,
            items: vec![SnapshotItem {
                node: NodeId::from_parts(0, 0),
                owner: None,
                buffer: BufferId::from_parts(0, 0),
                width: 10,
                height: 10,
                format,
                transform: Transform::IDENTITY,
                z: 0,
                rect: Rect::new(0, 0, 10, 10),
            }],
            damage,
        }
    }

    #[test]
    fn test_compose_clips_to_damage() {
        let (acks, _channel) = calloop::channel::channel();
        let renderer = HeadlessRenderer::new(Duration::ZERO, acks).unwrap();

        let frame = renderer
            .compose(&snapshot(BufferFormat::Argb8888, vec![Rect::new(0, 0, 5, 5)]))
            .unwrap();
        assert_eq!(frame.draws.len(), 1);

        let frame = renderer
            .compose(&snapshot(BufferFormat::Argb8888, vec![Rect::new(50, 50, 5, 5)]))
            .unwrap();
        assert!(frame.draws.is_empty());
    }

    #[test]
    fn test_unsupported_format() {
        let (acks, _channel) = calloop::channel::channel();
        let renderer = HeadlessRenderer::new(Duration::ZERO, acks).unwrap();
        assert!(matches!(
            renderer.compose(&snapshot(BufferFormat::Other(99), Vec::new())),
            Err(RenderError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_present_ack_delivered() {
        let mut event_loop: calloop::EventLoop<Vec<PresentAck>> =
            calloop::EventLoop::try_new().unwrap();
        let (acks, channel) = calloop::channel::channel();
        event_loop
            .handle()
            .insert_source(channel, |event, _, received: &mut Vec<PresentAck>| {
                if let calloop::channel::Event::Msg(ack) = event {
                    received.push(ack);
                }
            })
            .unwrap();

        let renderer = HeadlessRenderer::new(Duration::from_millis(1), acks).unwrap();
        let frame = renderer
            .compose(&snapshot(BufferFormat::Xrgb8888, vec![Rect::new(0, 0, 100, 100)]))
            .unwrap();
        renderer.submit(frame).unwrap();

        let mut received = Vec::new();
        for _ in 0..50 {
            event_loop
                .dispatch(Some(Duration::from_millis(20)), &mut received)
                .unwrap();
            if !received.is_empty() {
                break;
            }
        }
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].seq, 1);
        assert!(received[0].result.is_ok());
    }
}

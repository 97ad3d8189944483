//! Event loop integration
//!
//! Thin wrapper over calloop owned by the compositor thread.

use std::time::Duration;

use calloop::{EventLoop as CalLoop, LoopHandle, LoopSignal};
use log::{debug, error};

/// Goose event loop wrapper
pub struct EventLoop<D: 'static> {
    /// Calloop event loop
    event_loop: CalLoop<'static, D>,
    /// Loop signal for waking/stopping
    signal: LoopSignal,
}

impl<D: 'static> EventLoop<D> {
    /// Create a new event loop
    pub fn new() -> anyhow::Result<Self> {
        let event_loop = CalLoop::try_new()?;
        let signal = event_loop.get_signal();

        Ok(Self { event_loop, signal })
    }

    /// Get a handle to register event sources
    pub fn handle(&self) -> LoopHandle<'static, D> {
        self.event_loop.handle()
    }

    /// Get the loop signal for waking
    pub fn signal(&self) -> LoopSignal {
        self.signal.clone()
    }

    /// Run one iteration of the event loop
    pub fn dispatch(&mut self, timeout: Option<Duration>, data: &mut D) -> anyhow::Result<()> {
        self.event_loop.dispatch(timeout, data)?;
        Ok(())
    }

    /// Run the event loop until stopped
    pub fn run(&mut self, data: &mut D) -> anyhow::Result<()> {
        debug!("Starting event loop");

        if let Err(e) = self.event_loop.run(None::<Duration>, data, |_| {}) {
            error!("Event loop error: {}", e);
            return Err(e.into());
        }
        debug!("Event loop stopped");
        Ok(())
    }

    /// Stop the event loop
    pub fn stop(&self) {
        self.signal.stop();
    }

    /// Wake the event loop from another thread
    pub fn wake(&self) {
        self.signal.wakeup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_loop_new() {
        let event_loop = EventLoop::<()>::new();
        assert!(event_loop.is_ok());
    }

    #[test]
    fn test_event_loop_dispatch() {
        let mut event_loop = EventLoop::<u32>::new().unwrap();
        // Dispatch with zero timeout should return immediately
        let result = event_loop.dispatch(Some(Duration::ZERO), &mut 0);
        assert!(result.is_ok());
    }

    #[test]
    fn test_event_loop_stops() {
        let mut event_loop = EventLoop::<u32>::new().unwrap();
        let signal = event_loop.signal();
        event_loop
            .handle()
            .insert_source(
                calloop::timer::Timer::from_duration(Duration::from_millis(1)),
                move |_, _, ticks: &mut u32| {
                    *ticks += 1;
                    signal.stop();
                    calloop::timer::TimeoutAction::Drop
                },
            )
            .unwrap();

        let mut ticks = 0;
        event_loop.run(&mut ticks).unwrap();
        assert_eq!(ticks, 1);
    }
}

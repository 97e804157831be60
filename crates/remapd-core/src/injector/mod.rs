// Remapd Injector Session
// Per-device event loop binding one source to one mapping

pub mod dispatch;

pub use dispatch::Dispatcher;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::input::EventSource;
use crate::mapping::Mapping;
use crate::output::EventSink;

/// How long a poll blocks before the loop re-checks its stop flag. Bounds
/// the join wait of `stop()`.
const POLL_TIMEOUT_MS: i32 = 250;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum SessionState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// The live binding of one physical device to one mapping: an event loop
/// on its own thread, stopped by signalling and joining.
pub struct InjectorSession {
    device: String,
    stop_flag: Arc<AtomicBool>,
    state: Arc<Mutex<SessionState>>,
    handle: Option<JoinHandle<()>>,
}

impl InjectorSession {
    /// Start the event loop over the given source and sink. The mapping is
    /// owned exclusively by this session from here on.
    pub fn spawn(
        device: String,
        mapping: Mapping,
        mut source: Box<dyn EventSource>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let state = Arc::new(Mutex::new(SessionState::Starting));

        let thread_device = device.clone();
        let thread_stop = stop_flag.clone();
        let thread_state = state.clone();
        let handle = thread::spawn(move || {
            let mut dispatcher = Dispatcher::new(&mapping, sink);
            *thread_state.lock() = SessionState::Running;
            log::info!("started injecting the mapping for \"{}\"", thread_device);

            while !thread_stop.load(Ordering::Acquire) {
                match source.poll(POLL_TIMEOUT_MS) {
                    Ok(events) => {
                        for event in events {
                            dispatcher.process(event);
                        }
                    }
                    Err(error) => {
                        // only this session dies, the rest keep running
                        log::error!(
                            "the injection for \"{}\" stopped early: {}",
                            thread_device,
                            error
                        );
                        break;
                    }
                }
            }

            *thread_state.lock() = SessionState::Stopping;
            dispatcher.stop();
            source.release();
            *thread_state.lock() = SessionState::Stopped;
            log::debug!("injection loop for \"{}\" exited", thread_device);
        });

        Self {
            device,
            stop_flag,
            state,
            handle: Some(handle),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Whether the event loop is still alive (including while starting).
    pub fn is_active(&self) -> bool {
        matches!(self.state(), SessionState::Starting | SessionState::Running)
    }

    /// Signal the loop to terminate and wait for the device and sink to be
    /// released. The poll timeout and the macro executions' sliced sleeps
    /// keep this join bounded.
    pub fn stop(mut self) {
        log::info!("stopping injecting for device \"{}\"", self.device);
        self.stop_flag.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("injector thread for \"{}\" panicked", self.device);
            }
        }
    }
}

impl Drop for InjectorSession {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

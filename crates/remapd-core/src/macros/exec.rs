// Remapd Macro Execution
// Timed execution of a parsed program on its own thread

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::event::{RawEvent, KEY_DOWN, KEY_UP};
use crate::key::KeyIdentifier;
use crate::macros::{MacroNode, Program};
use crate::output::EventSink;

/// Granularity of interruptible sleeps. Bounds how long a stopping session
/// waits on an execution stuck in a long `w(...)`.
const SLEEP_SLICE_MS: u64 = 25;

/// Shared flags between an execution thread and its owner.
#[derive(Debug)]
struct ExecutionState {
    /// True between trigger key-down and key-up; `h(...)` loops on it.
    holding: AtomicBool,
    /// Cooperative abort, checked at step boundaries.
    cancelled: AtomicBool,
    /// Cleared by the execution thread when the tree finishes.
    running: AtomicBool,
}

/// One in-flight invocation of a macro program.
///
/// Dropping an execution cancels it and joins the thread; the sliced
/// sleeps keep that join bounded.
pub struct MacroExecution {
    state: Arc<ExecutionState>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MacroExecution {
    /// Start executing `program` against `sink`, with the configured
    /// inter-keystroke interval. The trigger keys are considered held
    /// from the start.
    pub fn spawn(program: Arc<Program>, sink: Arc<dyn EventSink>, interval_ms: u64) -> Self {
        let state = Arc::new(ExecutionState {
            holding: AtomicBool::new(true),
            cancelled: AtomicBool::new(false),
            running: AtomicBool::new(true),
        });

        let thread_state = state.clone();
        let handle = thread::spawn(move || {
            log::debug!("macro execution started: {}", program.code());
            let runner = Runner {
                sink,
                state: thread_state.clone(),
                interval: Duration::from_millis(interval_ms),
            };
            match runner.run(program.root()) {
                Ok(()) => log::debug!("macro execution finished: {}", program.code()),
                Err(Interrupted) => {
                    log::debug!("macro execution interrupted: {}", program.code())
                }
            }
            thread_state.running.store(false, Ordering::Release);
        });

        Self {
            state,
            handle: Some(handle),
        }
    }

    /// The physical trigger released; `h(...)` loops stop at their next
    /// iteration boundary, everything else runs to completion.
    pub fn release(&self) {
        self.state.holding.store(false, Ordering::Release);
    }

    /// Abort the whole execution at the next step boundary. Modifier
    /// releases still run.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
        self.state.holding.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }
}

impl Drop for MacroExecution {
    fn drop(&mut self) {
        self.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Marker for an execution cut short by cancellation or a dead sink.
struct Interrupted;

type StepResult = Result<(), Interrupted>;

struct Runner {
    sink: Arc<dyn EventSink>,
    state: Arc<ExecutionState>,
    interval: Duration,
}

impl Runner {
    fn cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    fn check(&self) -> StepResult {
        if self.cancelled() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }

    fn emit(&self, key: KeyIdentifier, value: i32) -> StepResult {
        match self.sink.emit(RawEvent::new(key.kind, key.code, value)) {
            Ok(()) => Ok(()),
            Err(error) => {
                log::error!("macro emit failed: {}", error);
                Err(Interrupted)
            }
        }
    }

    /// Sleep in slices so cancellation is observed promptly. Never fails;
    /// the next step boundary decides whether to continue.
    fn pause(&self, duration: Duration) {
        let mut remaining = duration;
        while !remaining.is_zero() && !self.cancelled() {
            let slice = remaining.min(Duration::from_millis(SLEEP_SLICE_MS));
            thread::sleep(slice);
            remaining = remaining.saturating_sub(slice);
        }
    }

    fn run(&self, node: &MacroNode) -> StepResult {
        self.check()?;
        match node {
            MacroNode::Keystroke(key) => {
                self.emit(key.key, KEY_DOWN)?;
                self.pause(self.interval);
                self.emit(key.key, KEY_UP)?;
                self.pause(self.interval);
                Ok(())
            }
            MacroNode::Sequence(children) => {
                for child in children {
                    self.run(child)?;
                }
                Ok(())
            }
            MacroNode::Repeat(count, child) => {
                for _ in 0..*count {
                    self.run(child)?;
                }
                Ok(())
            }
            MacroNode::Wait(ms) => {
                self.pause(Duration::from_millis(*ms));
                Ok(())
            }
            MacroNode::Modifier(key, child) => {
                self.emit(key.key, KEY_DOWN)?;
                self.pause(self.interval);
                let result = self.run(child);
                self.pause(self.interval);
                // the release is owed no matter how the child exited
                let released = self.emit(key.key, KEY_UP);
                self.pause(self.interval);
                result.and(released)
            }
            MacroNode::Hold(child) => {
                while self.state.holding.load(Ordering::Acquire) && !self.cancelled() {
                    self.run(child)?;
                }
                Ok(())
            }
        }
    }
}

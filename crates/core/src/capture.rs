//! Per-camera capture/encode task.
//!
//! One dedicated thread per camera runs [`CaptureTask::run`]: a blocking,
//! CPU-bound loop pulling frames through the camera's
//! [`TranscodeEngine`](crate::engine::TranscodeEngine) and handing every
//! encoded unit to a single registered callback. Fan-out to multiple
//! consumers is the replicator's job, not this one's — only one callback
//! is registered per task, and the last registration wins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::engine::TranscodeEngine;

/// Interval at which `stop()` re-checks whether the loop has parked.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Back-off after a per-unit engine failure so a wedged engine cannot
/// spin the thread hot.
const ERROR_BACKOFF: Duration = Duration::from_millis(5);

/// Observable task state: `Idle -> Running -> Stopping -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Running,
    Stopping,
}

type UnitCallback = Box<dyn FnMut(Vec<u8>) + Send>;

/// The capture/encode loop for one camera.
///
/// `run()` blocks its calling thread; `stop()` blocks its caller until
/// the loop has observed the request and parked. Callers must not invoke
/// `stop()` from within the task's own thread — the poll loop would wait
/// on itself forever.
pub struct CaptureTask {
    camera: String,
    engine: Mutex<Option<Box<dyn TranscodeEngine>>>,
    on_unit: Mutex<Option<UnitCallback>>,
    stop_requested: AtomicBool,
    running: AtomicBool,
}

impl CaptureTask {
    pub fn new(camera: &str, engine: Box<dyn TranscodeEngine>) -> Self {
        Self {
            camera: camera.to_string(),
            engine: Mutex::new(Some(engine)),
            on_unit: Mutex::new(None),
            stop_requested: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    /// Register the callback invoked for every encoded unit.
    ///
    /// Only one callback exists per task; registering again replaces the
    /// previous one.
    pub fn set_on_unit(&self, callback: impl FnMut(Vec<u8>) + Send + 'static) {
        *self.on_unit.lock() = Some(Box::new(callback));
    }

    pub fn state(&self) -> TaskState {
        if !self.running.load(Ordering::SeqCst) {
            TaskState::Idle
        } else if self.stop_requested.load(Ordering::SeqCst) {
            TaskState::Stopping
        } else {
            TaskState::Running
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run the capture loop on the calling thread until a stop is
    /// requested. A no-op if the task is already running.
    pub fn run(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!(camera = %self.camera, "capture task already running");
            return;
        }

        let Some(mut engine) = self.engine.lock().take() else {
            tracing::error!(camera = %self.camera, "capture task has no engine");
            self.running.store(false, Ordering::SeqCst);
            return;
        };

        tracing::debug!(camera = %self.camera, "capture loop started");

        while !self.stop_requested.load(Ordering::SeqCst) {
            match engine.next_units() {
                Ok(units) => {
                    let mut callback = self.on_unit.lock();
                    if let Some(callback) = callback.as_mut() {
                        for unit in units {
                            callback(unit);
                        }
                    }
                }
                Err(e) => {
                    // Recoverable: the unit is lost, the loop is not.
                    tracing::warn!(camera = %self.camera, error = %e, "transcode error, unit skipped");
                    std::thread::sleep(ERROR_BACKOFF);
                }
            }
        }

        // Park the engine so the task can be run again after a stop.
        *self.engine.lock() = Some(engine);
        self.running.store(false, Ordering::SeqCst);
        tracing::debug!(camera = %self.camera, "capture loop stopped");
    }

    /// Request a stop and block until the loop transitions back to Idle.
    /// Returns immediately if the task is not running.
    pub fn stop(&self) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        self.stop_requested.store(true, Ordering::SeqCst);
        while self.running.load(Ordering::SeqCst) {
            std::thread::sleep(STOP_POLL_INTERVAL);
        }
        self.stop_requested.store(false, Ordering::SeqCst);
    }
}

//! Trace replay
//!
//! Feeds recorded entries back into a [`Dispatcher`] from a dedicated thread,
//! as if they had just been received. Timing follows the recorded offsets
//! scaled by a speed factor.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use canscope_core::now_timestamp;
use parking_lot::Mutex;

use super::entry::TraceEntry;
use crate::dispatcher::Dispatcher;
use crate::error::{PipelineError, PipelineResult};

const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Longest single sleep, so `stop()` is noticed quickly
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Replay settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerConfig {
    /// Playback speed factor; `None` replays as fast as possible
    pub speed: Option<f64>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self { speed: Some(1.0) }
    }
}

struct Worker {
    handle: JoinHandle<()>,
    done: mpsc::Receiver<()>,
}

pub struct TracePlayer {
    entries: Arc<Vec<TraceEntry>>,
    dispatcher: Arc<Dispatcher>,
    config: PlayerConfig,
    running: Arc<AtomicBool>,
    played: Arc<AtomicU64>,
    worker: Mutex<Option<Worker>>,
}

impl TracePlayer {
    pub fn new(entries: Vec<TraceEntry>, dispatcher: Arc<Dispatcher>, config: PlayerConfig) -> Self {
        Self {
            entries: Arc::new(entries),
            dispatcher,
            config,
            running: Arc::new(AtomicBool::new(false)),
            played: Arc::new(AtomicU64::new(0)),
            worker: Mutex::new(None),
        }
    }

    /// Start replaying from the first entry
    pub fn start(&self) -> PipelineResult<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() && self.running.load(Ordering::SeqCst) {
            return Err(PipelineError::AlreadyStarted);
        }
        if let Some(old) = worker.take() {
            let _ = old.handle.join();
        }

        self.running.store(true, Ordering::SeqCst);
        self.played.store(0, Ordering::SeqCst);
        let (done_tx, done_rx) = mpsc::channel();
        let entries = self.entries.clone();
        let dispatcher = self.dispatcher.clone();
        let running = self.running.clone();
        let played = self.played.clone();
        let speed = self.config.speed.filter(|s| *s > 0.0);

        let handle = std::thread::Builder::new()
            .name("trace-player".to_string())
            .spawn(move || {
                replay(&entries, &dispatcher, &running, &played, speed);
                running.store(false, Ordering::SeqCst);
                let _ = done_tx.send(());
            })
            .map_err(|source| {
                self.running.store(false, Ordering::SeqCst);
                PipelineError::Spawn {
                    name: "trace-player",
                    source,
                }
            })?;

        *worker = Some(Worker {
            handle,
            done: done_rx,
        });
        tracing::info!(entries = self.entries.len(), speed = ?speed, "Trace replay started");
        Ok(())
    }

    /// Stop replaying, waiting at most two seconds
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        match worker.done.recv_timeout(STOP_TIMEOUT) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                let _ = worker.handle.join();
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                tracing::warn!("Trace player did not stop in time, detaching");
            }
        }
    }

    /// Whether replay is still in progress
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Block until replay finishes or `timeout` passes; true when finished
    pub fn wait(&self, timeout: Duration) -> bool {
        let guard = self.worker.lock();
        let Some(worker) = guard.as_ref() else {
            return true;
        };
        match worker.done.recv_timeout(timeout) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => true,
            Err(mpsc::RecvTimeoutError::Timeout) => false,
        }
    }

    /// Entries dispatched by the current or last replay
    pub fn played(&self) -> u64 {
        self.played.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Drop for TracePlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn replay(
    entries: &[TraceEntry],
    dispatcher: &Dispatcher,
    running: &AtomicBool,
    played: &AtomicU64,
    speed: Option<f64>,
) {
    let started = Instant::now();
    let base = now_timestamp();
    let first_offset = entries.first().map(|e| e.offset).unwrap_or_default();

    for entry in entries {
        let relative = (entry.offset - first_offset).max(0.0);
        if let Some(speed) = speed {
            let due = Duration::from_secs_f64(relative / speed);
            loop {
                if !running.load(Ordering::SeqCst) {
                    return;
                }
                let elapsed = started.elapsed();
                if elapsed >= due {
                    break;
                }
                std::thread::sleep((due - elapsed).min(SLEEP_SLICE));
            }
        } else if !running.load(Ordering::SeqCst) {
            return;
        }

        let mut frame = entry.to_frame();
        frame.timestamp = base + relative;
        dispatcher.dispatch_one(frame);
        played.fetch_add(1, Ordering::Relaxed);
    }
    tracing::debug!(played = played.load(Ordering::Relaxed), "Trace replay finished");
}

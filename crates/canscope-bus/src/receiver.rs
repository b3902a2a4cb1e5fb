//! Background receive loop
//!
//! A [`Receiver`] owns one OS thread per connection. The thread polls its
//! [`FrameSource`] with a short timeout and hands frames to a [`FrameSink`]
//! in batches, flushing when the batch is old enough or large enough. The
//! per-bus order of frames is preserved and a partial batch is flushed
//! before the thread exits, so stopping never loses a received frame.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use canscope_core::{Frame, FrameSink, FrameSource};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Batching and polling parameters of a receiver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiverConfig {
    /// Flush a non-empty batch at least this often (milliseconds)
    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,
    /// Flush as soon as the batch holds this many frames
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Timeout of a single receive call (milliseconds)
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

fn default_batch_interval_ms() -> u64 {
    20
}

fn default_batch_size() -> usize {
    500
}

fn default_poll_timeout_ms() -> u64 {
    10
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            batch_interval_ms: default_batch_interval_ms(),
            batch_size: default_batch_size(),
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

/// Maximum time `stop()` waits for the thread
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause after a receive error before polling again
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

struct Worker {
    handle: JoinHandle<()>,
    done: mpsc::Receiver<()>,
}

/// Batches frames from one source into a sink on a dedicated thread
pub struct Receiver {
    source: Arc<dyn FrameSource>,
    sink: Arc<dyn FrameSink>,
    config: ReceiverConfig,
    running: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    worker: Mutex<Option<Worker>>,
}

impl Receiver {
    pub fn new(
        source: Arc<dyn FrameSource>,
        sink: Arc<dyn FrameSink>,
        config: ReceiverConfig,
    ) -> Self {
        Self {
            source,
            sink,
            config,
            running: Arc::new(AtomicBool::new(false)),
            frames: Arc::new(AtomicU64::new(0)),
            worker: Mutex::new(None),
        }
    }

    /// Start the receive thread; does nothing when already running
    pub fn start(&self) -> std::io::Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        self.running.store(true, Ordering::SeqCst);
        let (done_tx, done_rx) = mpsc::channel();
        let ctx = LoopContext {
            source: self.source.clone(),
            sink: self.sink.clone(),
            running: self.running.clone(),
            frames: self.frames.clone(),
            batch_interval: Duration::from_millis(self.config.batch_interval_ms),
            batch_size: self.config.batch_size.max(1),
            poll_timeout: Duration::from_millis(self.config.poll_timeout_ms),
        };

        let handle = std::thread::Builder::new()
            .name(format!("rx-bus{}", self.source.bus()))
            .spawn(move || {
                ctx.run();
                let _ = done_tx.send(());
            });

        match handle {
            Ok(handle) => {
                *worker = Some(Worker {
                    handle,
                    done: done_rx,
                });
                tracing::info!(bus = self.source.bus(), "Receiver started");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Stop the receive thread, waiting at most two seconds for it
    ///
    /// Frames already received are flushed to the sink before the thread
    /// exits.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let Some(worker) = self.worker.lock().take() else {
            return;
        };

        match worker.done.recv_timeout(STOP_TIMEOUT) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    tracing::error!(bus = self.source.bus(), "Receiver thread panicked");
                }
                tracing::info!(
                    bus = self.source.bus(),
                    frames = self.frame_count(),
                    "Receiver stopped"
                );
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                tracing::warn!(bus = self.source.bus(), "Receiver did not stop in time, detaching");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Frames handed to the sink since creation
    pub fn frame_count(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.stop();
    }
}

struct LoopContext {
    source: Arc<dyn FrameSource>,
    sink: Arc<dyn FrameSink>,
    running: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    batch_interval: Duration,
    batch_size: usize,
    poll_timeout: Duration,
}

impl LoopContext {
    fn run(&self) {
        let mut batch: Vec<Frame> = Vec::with_capacity(self.batch_size);
        let mut last_flush = Instant::now();
        let mut consecutive_errors = 0u32;

        while self.running.load(Ordering::SeqCst) {
            match self.source.recv(self.poll_timeout) {
                Ok(Some(frame)) => {
                    consecutive_errors = 0;
                    batch.push(frame);
                }
                Ok(None) => consecutive_errors = 0,
                Err(e) => {
                    consecutive_errors += 1;
                    if consecutive_errors == 1 {
                        tracing::warn!(bus = self.source.bus(), error = %e, "Receive failed");
                    } else {
                        tracing::debug!(
                            bus = self.source.bus(),
                            error = %e,
                            count = consecutive_errors,
                            "Receive still failing"
                        );
                    }
                    std::thread::sleep(ERROR_BACKOFF);
                }
            }

            if !batch.is_empty()
                && (batch.len() >= self.batch_size || last_flush.elapsed() >= self.batch_interval)
            {
                self.flush(&mut batch);
                last_flush = Instant::now();
            }
        }

        if !batch.is_empty() {
            self.flush(&mut batch);
        }
    }

    fn flush(&self, batch: &mut Vec<Frame>) {
        let frames: Arc<[Frame]> = std::mem::replace(batch, Vec::with_capacity(self.batch_size)).into();
        self.frames.fetch_add(frames.len() as u64, Ordering::Relaxed);
        tracing::trace!(bus = self.source.bus(), count = frames.len(), "Batch flushed");
        self.sink.on_batch(frames);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::VirtualSource;

    #[derive(Default)]
    struct Collect {
        batches: Mutex<Vec<Arc<[Frame]>>>,
    }

    impl FrameSink for Collect {
        fn on_batch(&self, frames: Arc<[Frame]>) {
            self.batches.lock().push(frames);
        }
    }

    impl Collect {
        fn ids(&self) -> Vec<u32> {
            self.batches
                .lock()
                .iter()
                .flat_map(|b| b.iter().map(|f| f.id).collect::<Vec<_>>())
                .collect()
        }
    }

    fn setup(config: ReceiverConfig) -> (Arc<VirtualSource>, Arc<Collect>, Receiver) {
        let source = Arc::new(VirtualSource::isolated(1));
        source.connect().unwrap();
        let sink = Arc::new(Collect::default());
        let receiver = Receiver::new(source.clone(), sink.clone(), config);
        (source, sink, receiver)
    }

    #[test]
    fn test_flush_by_size() {
        let (source, sink, receiver) = setup(ReceiverConfig {
            batch_interval_ms: 60_000,
            batch_size: 3,
            poll_timeout_ms: 1,
        });
        for id in 0..6 {
            source.inject(Frame::new(id, vec![0]));
        }
        receiver.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while sink.ids().len() < 6 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        receiver.stop();

        let batches = sink.batches.lock();
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.len() == 3));
    }

    #[test]
    fn test_flush_by_time() {
        let (source, sink, receiver) = setup(ReceiverConfig {
            batch_interval_ms: 20,
            batch_size: 500,
            poll_timeout_ms: 5,
        });
        receiver.start().unwrap();
        source.inject(Frame::new(0x100, vec![1]));

        let deadline = Instant::now() + Duration::from_secs(2);
        while sink.ids().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(sink.ids(), vec![0x100]);
        assert!(receiver.is_running());
        receiver.stop();
    }

    #[test]
    fn test_no_frame_lost_at_stop() {
        let (source, sink, receiver) = setup(ReceiverConfig {
            batch_interval_ms: 60_000,
            batch_size: 10_000,
            poll_timeout_ms: 1,
        });
        for id in 0..100 {
            source.inject(Frame::new(id, vec![0]));
        }
        receiver.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while source.pending() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        receiver.stop();

        assert_eq!(sink.ids(), (0..100).collect::<Vec<u32>>());
        assert_eq!(receiver.frame_count(), 100);
        assert!(!receiver.is_running());
    }

    #[test]
    fn test_errors_do_not_stop_loop() {
        let (source, sink, receiver) = setup(ReceiverConfig {
            batch_interval_ms: 1,
            batch_size: 1,
            poll_timeout_ms: 1,
        });
        source.disconnect();
        receiver.start().unwrap();
        std::thread::sleep(Duration::from_millis(30));
        source.connect().unwrap();
        source.inject(Frame::new(0x7, vec![]));

        let deadline = Instant::now() + Duration::from_secs(2);
        while sink.ids().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        receiver.stop();
        assert_eq!(sink.ids(), vec![0x7]);
    }
}

//! Consumer scheduling
//!
//! Consumers are plain synchronous state machines: `on_frames` queues input
//! and `flush` processes it. [`Shared`] puts a consumer behind two locks: a
//! cheap inbox the dispatcher pushes batches into, and the state itself.
//! A periodic task drains the inbox into the state and flushes it, so a
//! slow consumer only ever delays itself.

use std::sync::Arc;
use std::time::Duration;

use canscope_core::{Frame, FrameSink};
use parking_lot::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A frame consumer with its own flush cadence
pub trait Consumer: Send + 'static {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Queue a batch for the next flush
    fn on_frames(&mut self, frames: &[Frame]);

    /// Process everything queued since the last flush
    fn flush(&mut self);
}

/// Consumer state plus the inbox the dispatcher writes to
pub struct Shared<C> {
    inbox: Mutex<Vec<Arc<[Frame]>>>,
    state: Mutex<C>,
}

impl<C: Consumer> Shared<C> {
    pub fn new(consumer: C) -> Arc<Self> {
        Arc::new(Self {
            inbox: Mutex::new(Vec::new()),
            state: Mutex::new(consumer),
        })
    }

    /// Lock the consumer state
    pub fn lock(&self) -> MutexGuard<'_, C> {
        self.state.lock()
    }

    /// Batches waiting in the inbox
    pub fn pending_batches(&self) -> usize {
        self.inbox.lock().len()
    }

    /// Move inbox batches into the consumer without flushing
    pub fn drain(&self) {
        let batches = std::mem::take(&mut *self.inbox.lock());
        if batches.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        for batch in &batches {
            state.on_frames(batch);
        }
    }

    /// Drain the inbox and flush the consumer
    pub fn process(&self) {
        let batches = std::mem::take(&mut *self.inbox.lock());
        let mut state = self.state.lock();
        for batch in &batches {
            state.on_frames(batch);
        }
        state.flush();
    }
}

impl<C: Consumer> FrameSink for Shared<C> {
    fn on_batch(&self, frames: Arc<[Frame]>) {
        self.inbox.lock().push(frames);
    }
}

/// Run `job` every `period` on the blocking pool until the task is aborted
///
/// Must be called from within a tokio runtime.
pub fn spawn_periodic<F>(name: &'static str, period: Duration, job: F) -> JoinHandle<()>
where
    F: Fn() + Send + Sync + 'static,
{
    let job = Arc::new(job);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::debug!(task = name, period_ms = period.as_millis() as u64, "Periodic task started");
        loop {
            interval.tick().await;
            let job = job.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || (*job)()).await {
                tracing::error!(task = name, error = %e, "Periodic job failed");
            }
        }
    })
}

/// Periodically process a shared consumer
pub fn spawn_consumer<C: Consumer>(shared: Arc<Shared<C>>, period: Duration) -> JoinHandle<()> {
    let name = shared.lock().name();
    spawn_periodic(name, period, move || shared.process())
}

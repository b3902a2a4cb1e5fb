//! Frame fan-out
//!
//! The dispatcher hands every batch to every registered sink, in
//! registration order. It neither filters nor transforms; all sinks see the
//! same shared batch.

use std::sync::Arc;

use canscope_core::{Frame, FrameSink};
use parking_lot::RwLock;

/// Fans batches out to registered sinks
#[derive(Default)]
pub struct Dispatcher {
    sinks: RwLock<Vec<Arc<dyn FrameSink>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, sink: Arc<dyn FrameSink>) {
        self.sinks.write().push(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.read().len()
    }

    /// Deliver an ordered batch to every sink
    pub fn dispatch_batch(&self, frames: impl Into<Arc<[Frame]>>) {
        let frames = frames.into();
        if frames.is_empty() {
            return;
        }
        let sinks = self.sinks.read().clone();
        for sink in &sinks {
            sink.on_batch(frames.clone());
        }
    }

    /// Deliver a single frame (trace replay)
    pub fn dispatch_one(&self, frame: Frame) {
        self.dispatch_batch(vec![frame]);
    }
}

impl FrameSink for Dispatcher {
    fn on_batch(&self, frames: Arc<[Frame]>) {
        self.dispatch_batch(frames);
    }
}

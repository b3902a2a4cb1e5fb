//! Batch delivery contract between the bus side and the consumers

use std::sync::Arc;

use crate::frame::Frame;

/// Receives ordered batches of frames
///
/// Implementations must return quickly: they run on the receiving thread
/// and only hand the batch off (enqueue, forward) for later processing.
pub trait FrameSink: Send + Sync {
    fn on_batch(&self, frames: Arc<[Frame]>);
}

impl<F> FrameSink for F
where
    F: Fn(Arc<[Frame]>) + Send + Sync,
{
    fn on_batch(&self, frames: Arc<[Frame]>) {
        self(frames)
    }
}

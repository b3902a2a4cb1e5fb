//! Bus connection contract

use std::time::Duration;

use crate::error::SourceResult;
use crate::frame::Frame;

/// A bus connection the pipeline can poll and send through
///
/// Implementations use interior mutability: the receiver thread polls
/// [`recv`](FrameSource::recv) while the transmitter thread calls
/// [`send`](FrameSource::send) on the same shared source.
pub trait FrameSource: Send + Sync {
    /// Open the bus connection
    fn connect(&self) -> SourceResult<()>;

    /// Close the bus connection; a no-op when already closed
    fn disconnect(&self);

    /// Check if the connection is open
    fn is_connected(&self) -> bool;

    /// Block for at most `timeout` waiting for one frame
    ///
    /// Returns `Ok(None)` on timeout.
    fn recv(&self, timeout: Duration) -> SourceResult<Option<Frame>>;

    /// Send one frame
    fn send(&self, frame: &Frame) -> SourceResult<()>;

    /// Logical bus number stamped on received frames
    fn bus(&self) -> u8;
}

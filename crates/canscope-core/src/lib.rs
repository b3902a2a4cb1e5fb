//! canscope-core - Frame model and collaborator contracts
//!
//! This crate holds the pieces every other canscope crate agrees on:
//!
//! - [`Frame`]: an immutable bus frame as seen by the pipeline
//! - [`FrameSource`]: the bus connection contract (connect, timed receive, send)
//! - [`FrameSink`]: where the receiving side hands ordered batches
//! - [`SignalCodec`]: the decoder/encoder contract used to turn payloads into signals
//! - [`EventBus`]: the broadcast channel consumers publish change notifications on

pub mod codec;
pub mod error;
pub mod event;
pub mod frame;
pub mod sink;
pub mod source;

pub use codec::{DecodedSignal, NullCodec, SignalCodec, SignalValue};
pub use error::{SourceError, SourceResult};
pub use event::{EventBus, PipelineEvent, TxCounts};
pub use frame::{now_timestamp, Direction, Frame, FrameFlags, MAX_PAYLOAD};
pub use sink::FrameSink;
pub use source::FrameSource;

//! canscope-pipeline - Frame processing pipeline
//!
//! Frames received by the bus connections are batched, fanned out by the
//! [`Dispatcher`] and consumed independently by:
//!
//! - [`LiveTable`]: one row per (bus, identifier) with cycle time and signals
//! - [`WatchRegistry`]: a handful of watched signals
//! - [`TraceRecorder`]: numbered capture to disk and a bounded display ring
//! - [`PlotStore`]: time-bounded series per plotted signal
//!
//! Each consumer runs on its own periodic task (see [`consumer`]), so a slow
//! one never holds up the others. The [`Transmitter`] sends the rows of a
//! [`TxTable`] cyclically from its own thread.
//!
//! # Example
//!
//! ```ignore
//! use canscope_bus::BusConfig;
//! use canscope_core::NullCodec;
//! use canscope_pipeline::{Pipeline, PipelineConfig};
//!
//! let pipeline = Pipeline::new(PipelineConfig::default(), Arc::new(NullCodec));
//! let bus = pipeline.add_bus(&BusConfig::default());
//! pipeline.connections().connect(bus);
//! pipeline.start()?;
//! ```

pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod live;
pub mod pipeline;
pub mod plot;
pub mod trace;
pub mod transmit;
pub mod watch;

pub use config::PipelineConfig;
pub use consumer::{spawn_consumer, spawn_periodic, Consumer, Shared};
pub use dispatcher::Dispatcher;
pub use error::{PipelineError, PipelineResult, TraceError, TraceResult};
pub use filter::{FilterAction, FilterRule, RxFilter, SharedFilter};
pub use live::{LiveRow, LiveTable, SignalSample};
pub use pipeline::Pipeline;
pub use plot::{lttb, PlotBuffer, PlotStore, Series, SignalKey};
pub use trace::{
    create_trace_writer, read_trace, read_trace_as, BinaryTraceWriter, PlayerConfig,
    RecorderConfig, TextTraceWriter, TraceEntry, TraceFormat, TracePlayer, TraceRecorder,
    TraceWriter,
};
pub use transmit::{Transmitter, TxItem, TxRow, TxSignal, TxSnapshot, TxTable};
pub use watch::{WatchEntry, WatchRegistry};

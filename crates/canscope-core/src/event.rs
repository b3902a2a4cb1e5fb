//! Change notifications published by pipeline components
//!
//! Components never call into their observers. They publish a
//! [`PipelineEvent`] on the [`EventBus`] and anyone interested (a UI, a
//! logger, a test) subscribes independently.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tokio::sync::broadcast;

/// Accumulated TX send counts per table row
pub type TxCounts = BTreeMap<usize, u64>;

/// Events published by pipeline components
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Live table rows `first..=last` were created
    LiveRowsInserted { first: usize, last: usize },
    /// Live table rows (and their signal children) changed
    LiveRowsUpdated { rows: Vec<usize> },
    /// Watch entries whose formatted value changed during one flush
    WatchValuesChanged { rows: Vec<usize> },
    /// Staged trace entries were moved into the display buffer
    TraceCommitted { row_count: usize, total: u64 },
    /// The active trace file changed (`None` when closed)
    TraceFileChanged { path: Option<PathBuf> },
    /// Recorded frames per second over the last window
    TraceRate { per_second: u32 },
    /// Writing to the trace file failed; disk logging is off for this session
    TraceWriteFailed { message: String },
    /// Plot buffers were updated by a flush
    PlotUpdated,
    /// Frames sent by the transmitter since the last report
    TxCountsUpdated { counts: TxCounts },
    /// A bus connection changed status ("OK", "Disconnected", "Error: ...")
    ConnectionStatus { index: usize, status: String },
}

/// Broadcast channel for [`PipelineEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event; having no subscribers is fine
    pub fn publish(&self, event: PipelineEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Event dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

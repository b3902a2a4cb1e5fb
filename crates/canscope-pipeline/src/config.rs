//! Pipeline configuration
//!
//! Every field has a default, so an empty `[pipeline]` table is valid.

use std::path::PathBuf;
use std::time::Duration;

use canscope_bus::ReceiverConfig;
use serde::{Deserialize, Serialize};

use crate::trace::TraceFormat;

/// Timing, capacity and storage settings of a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Receiver batching
    #[serde(default)]
    pub receiver: ReceiverConfig,

    /// Live table flush interval (milliseconds)
    #[serde(default = "default_live_interval_ms")]
    pub live_interval_ms: u64,

    /// Watch registry flush interval (milliseconds)
    #[serde(default = "default_watch_interval_ms")]
    pub watch_interval_ms: u64,

    /// Plot store flush interval (milliseconds)
    #[serde(default = "default_plot_interval_ms")]
    pub plot_interval_ms: u64,

    /// Trace capture (fast tier) interval (milliseconds)
    #[serde(default = "default_trace_flush_interval_ms")]
    pub trace_flush_interval_ms: u64,

    /// Trace display commit (slow tier) interval (milliseconds)
    #[serde(default = "default_trace_commit_interval_ms")]
    pub trace_commit_interval_ms: u64,

    /// Entries kept in the trace display ring
    #[serde(default = "default_trace_buffer_capacity")]
    pub trace_buffer_capacity: usize,

    /// Rotate the trace file once it reaches this many bytes
    #[serde(default = "default_trace_max_file_size")]
    pub trace_max_file_size: u64,

    /// Folder for trace files; recording stays in memory without one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_folder: Option<PathBuf>,

    #[serde(default)]
    pub trace_format: TraceFormat,

    /// Plot time window (seconds, at least 1)
    #[serde(default = "default_plot_window_secs")]
    pub plot_window_secs: f64,

    /// Maximum points of a display series
    #[serde(default = "default_plot_display_points")]
    pub plot_display_points: usize,

    /// How often TX send counts are reported (milliseconds)
    #[serde(default = "default_tx_counter_interval_ms")]
    pub tx_counter_interval_ms: u64,

    /// Minimum spacing of TX snapshot rebuilds (milliseconds)
    #[serde(default = "default_tx_snapshot_interval_ms")]
    pub tx_snapshot_interval_ms: u64,

    /// Event channel capacity
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_live_interval_ms() -> u64 {
    50
}

fn default_watch_interval_ms() -> u64 {
    100
}

fn default_plot_interval_ms() -> u64 {
    100
}

fn default_trace_flush_interval_ms() -> u64 {
    50
}

fn default_trace_commit_interval_ms() -> u64 {
    200
}

fn default_trace_buffer_capacity() -> usize {
    100_000
}

fn default_trace_max_file_size() -> u64 {
    1_000_000_000
}

fn default_plot_window_secs() -> f64 {
    10.0
}

fn default_plot_display_points() -> usize {
    5000
}

fn default_tx_counter_interval_ms() -> u64 {
    200
}

fn default_tx_snapshot_interval_ms() -> u64 {
    200
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            receiver: ReceiverConfig::default(),
            live_interval_ms: default_live_interval_ms(),
            watch_interval_ms: default_watch_interval_ms(),
            plot_interval_ms: default_plot_interval_ms(),
            trace_flush_interval_ms: default_trace_flush_interval_ms(),
            trace_commit_interval_ms: default_trace_commit_interval_ms(),
            trace_buffer_capacity: default_trace_buffer_capacity(),
            trace_max_file_size: default_trace_max_file_size(),
            trace_folder: None,
            trace_format: TraceFormat::default(),
            plot_window_secs: default_plot_window_secs(),
            plot_display_points: default_plot_display_points(),
            tx_counter_interval_ms: default_tx_counter_interval_ms(),
            tx_snapshot_interval_ms: default_tx_snapshot_interval_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl PipelineConfig {
    pub fn live_interval(&self) -> Duration {
        Duration::from_millis(self.live_interval_ms.max(1))
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms.max(1))
    }

    pub fn plot_interval(&self) -> Duration {
        Duration::from_millis(self.plot_interval_ms.max(1))
    }

    pub fn trace_flush_interval(&self) -> Duration {
        Duration::from_millis(self.trace_flush_interval_ms.max(1))
    }

    pub fn trace_commit_interval(&self) -> Duration {
        Duration::from_millis(self.trace_commit_interval_ms.max(1))
    }

    pub fn tx_counter_interval(&self) -> Duration {
        Duration::from_millis(self.tx_counter_interval_ms.max(1))
    }

    pub fn tx_snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.tx_snapshot_interval_ms)
    }

    /// How often a coalesced TX snapshot rebuild is checked for
    pub fn tx_snapshot_poll_interval(&self) -> Duration {
        (self.tx_snapshot_interval() / 20).max(Duration::from_millis(1))
    }
}

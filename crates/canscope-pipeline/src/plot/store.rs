//! Plot store

use std::collections::HashSet;
use std::sync::Arc;

use canscope_core::{EventBus, Frame, PipelineEvent, SignalCodec};

use super::buffer::{PlotBuffer, Series, SignalKey};
use super::lttb::lttb;
use crate::consumer::Consumer;

/// Shortest accepted time window (seconds)
const MIN_WINDOW_SECS: f64 = 1.0;

/// Smallest accepted display cap
const MIN_DISPLAY_POINTS: usize = 100;

/// Rolling buffers for plotted signals
///
/// Time zero is the timestamp of the first frame that decoded to anything
/// after creation or [`clear`](Self::clear).
pub struct PlotStore {
    buffers: Vec<PlotBuffer>,
    ids: HashSet<u32>,
    pending: Vec<Frame>,
    codec: Arc<dyn SignalCodec>,
    events: EventBus,
    window: f64,
    display_points: usize,
    start_time: Option<f64>,
}

impl PlotStore {
    pub fn new(codec: Arc<dyn SignalCodec>, events: EventBus) -> Self {
        Self {
            buffers: Vec::new(),
            ids: HashSet::new(),
            pending: Vec::new(),
            codec,
            events,
            window: 10.0,
            display_points: 5000,
            start_time: None,
        }
    }

    /// Start plotting a signal; a no-op when already plotted
    pub fn add_signal(&mut self, id: u32, signal: impl Into<String>, unit: impl Into<String>) {
        let key = SignalKey::new(id, signal);
        if self.buffer(&key).is_some() {
            return;
        }
        tracing::debug!(id = format_args!("{:#X}", id), signal = %key.signal, "Plot signal added");
        self.buffers.push(PlotBuffer::new(key, unit));
        self.ids.insert(id);
    }

    pub fn remove_signal(&mut self, id: u32, signal: &str) -> bool {
        let before = self.buffers.len();
        self.buffers.retain(|b| !(b.key.id == id && b.key.signal == signal));
        self.ids = self.buffers.iter().map(|b| b.key.id).collect();
        self.buffers.len() != before
    }

    pub fn has_signal(&self, id: u32, signal: &str) -> bool {
        self.buffers
            .iter()
            .any(|b| b.key.id == id && b.key.signal == signal)
    }

    /// Plotted signals as (key, unit), in the order they were added
    pub fn signals(&self) -> Vec<(SignalKey, String)> {
        self.buffers
            .iter()
            .map(|b| (b.key.clone(), b.unit.clone()))
            .collect()
    }

    pub fn buffer(&self, key: &SignalKey) -> Option<&PlotBuffer> {
        self.buffers.iter().find(|b| &b.key == key)
    }

    /// Samples to draw: raw when small enough, otherwise downsampled
    pub fn display_series(&self, key: &SignalKey) -> Option<Series> {
        let buffer = self.buffer(key)?;
        if buffer.is_empty() {
            return None;
        }
        Some(lttb(buffer.times(), buffer.values(), self.display_points))
    }

    pub fn time_window(&self) -> f64 {
        self.window
    }

    /// Set the time window in seconds (at least 1)
    pub fn set_time_window(&mut self, secs: f64) {
        self.window = if secs.is_finite() {
            secs.max(MIN_WINDOW_SECS)
        } else {
            MIN_WINDOW_SECS
        };
    }

    pub fn display_points(&self) -> usize {
        self.display_points
    }

    pub fn set_display_points(&mut self, points: usize) {
        self.display_points = points.max(MIN_DISPLAY_POINTS);
    }

    pub fn set_codec(&mut self, codec: Arc<dyn SignalCodec>) {
        self.codec = codec;
    }

    /// Empty all buffers and reset time zero; plotted signals stay
    pub fn clear(&mut self) {
        for buffer in &mut self.buffers {
            buffer.clear();
        }
        self.pending.clear();
        self.start_time = None;
    }
}

impl Consumer for PlotStore {
    fn name(&self) -> &'static str {
        "plot"
    }

    fn on_frames(&mut self, frames: &[Frame]) {
        if self.ids.is_empty() {
            return;
        }
        let ids = &self.ids;
        self.pending
            .extend(frames.iter().filter(|f| ids.contains(&f.id)).cloned());
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.pending);

        for frame in &batch {
            let decoded = self.codec.decode(frame.id, frame.payload());
            if decoded.is_empty() {
                continue;
            }
            let start = *self.start_time.get_or_insert(frame.timestamp);
            let t = frame.timestamp - start;

            for sig in &decoded {
                let Some(value) = sig.as_f64() else {
                    continue;
                };
                let Some(buffer) = self
                    .buffers
                    .iter_mut()
                    .find(|b| b.key.id == frame.id && b.key.signal == sig.name)
                else {
                    continue;
                };
                if buffer.unit.is_empty() && !sig.unit.is_empty() {
                    buffer.unit.clone_from(&sig.unit);
                }
                buffer.push(t, value);
            }
        }

        for buffer in &mut self.buffers {
            buffer.trim(self.window);
        }
        self.events.publish(PipelineEvent::PlotUpdated);
    }
}

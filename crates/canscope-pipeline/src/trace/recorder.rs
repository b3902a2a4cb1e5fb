//! Two-tier trace recorder

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use canscope_core::codec::summarize;
use canscope_core::{now_timestamp, Direction, EventBus, Frame, PipelineEvent, SignalCodec};
use chrono::Local;

use super::entry::TraceEntry;
use super::writer::{create_trace_writer, TraceWriter};
use super::TraceFormat;
use crate::config::PipelineConfig;
use crate::consumer::Consumer;
use crate::error::{TraceError, TraceResult};

const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Recorder storage settings
#[derive(Debug, Clone, PartialEq)]
pub struct RecorderConfig {
    /// Entries kept in the display ring
    pub buffer_capacity: usize,
    /// Rotate once the active file reaches this many bytes
    pub max_file_size: u64,
    /// Trace folder; `None` records in memory only
    pub folder: Option<PathBuf>,
    pub format: TraceFormat,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for RecorderConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            buffer_capacity: config.trace_buffer_capacity.max(1),
            max_file_size: config.trace_max_file_size,
            folder: config.trace_folder.clone(),
            format: config.trace_format,
        }
    }
}

/// Captures frames into numbered entries, a trace file and a display ring
///
/// [`flush`](Consumer::flush) is the fast tier: it numbers, decodes and
/// writes pending frames and stages the entries. [`commit`](Self::commit)
/// is the slow tier that moves staged entries into the display ring.
pub struct TraceRecorder {
    config: RecorderConfig,
    codec: Arc<dyn SignalCodec>,
    events: EventBus,

    recording: bool,
    pending: Vec<Frame>,
    staged: Vec<TraceEntry>,
    entries: VecDeque<TraceEntry>,

    seq: u64,
    start_time: Option<f64>,

    writer: Option<Box<dyn TraceWriter>>,
    base_name: String,
    file_index: u32,
    /// Wall-clock open time of the session's first file, shared by rotations
    session_start: Option<f64>,

    rate_count: u64,
    rate_window_start: Instant,
}

impl TraceRecorder {
    pub fn new(config: RecorderConfig, codec: Arc<dyn SignalCodec>, events: EventBus) -> Self {
        Self {
            config,
            codec,
            events,
            recording: false,
            pending: Vec::new(),
            staged: Vec::new(),
            entries: VecDeque::new(),
            seq: 0,
            start_time: None,
            writer: None,
            base_name: String::new(),
            file_index: 0,
            session_start: None,
            rate_count: 0,
            rate_window_start: Instant::now(),
        }
    }

    /// Start capturing; opens a new trace file unless resuming after pause
    pub fn start(&mut self) {
        self.recording = true;
        if self.writer.is_none() {
            self.open_trace_file();
        }
        tracing::info!(file = ?self.current_file(), "Trace recording started");
    }

    /// Stop capturing without closing the file or clearing anything
    pub fn pause(&mut self) {
        self.recording = false;
        tracing::debug!("Trace recording paused");
    }

    /// Write out pending frames and close the trace file
    pub fn stop(&mut self) {
        self.recording = false;
        self.flush_pending();
        self.close_trace_file();
        tracing::info!(messages = self.seq, "Trace recording stopped");
    }

    /// Drop all captured entries and restart numbering
    pub fn clear(&mut self) {
        self.entries.clear();
        self.staged.clear();
        self.pending.clear();
        self.seq = 0;
        self.start_time = None;
        self.events.publish(PipelineEvent::TraceCommitted {
            row_count: 0,
            total: 0,
        });
    }

    /// Queue one frame with an explicit direction
    pub fn on_frame(&mut self, frame: &Frame, direction: Direction) {
        if self.recording {
            self.pending.push(frame.clone().with_direction(direction));
        }
    }

    /// Slow tier: move staged entries into the display ring
    pub fn commit(&mut self) {
        if self.staged.is_empty() {
            return;
        }
        let capacity = self.config.buffer_capacity.max(1);
        for entry in self.staged.drain(..) {
            if self.entries.len() >= capacity {
                self.entries.pop_front();
            }
            self.entries.push_back(entry);
        }
        self.events.publish(PipelineEvent::TraceCommitted {
            row_count: self.entries.len(),
            total: self.seq,
        });
    }

    /// Run both tiers now
    pub fn flush_all(&mut self) {
        self.flush_pending();
        self.commit();
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Entries recorded this session, including ones evicted from the ring
    pub fn message_count(&self) -> u64 {
        self.seq
    }

    pub fn current_file(&self) -> Option<&Path> {
        self.writer.as_ref().map(|w| w.path())
    }

    /// Display ring, oldest first
    pub fn entries(&self) -> &VecDeque<TraceEntry> {
        &self.entries
    }

    pub fn entry(&self, row: usize) -> Option<&TraceEntry> {
        self.entries.get(row)
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn set_codec(&mut self, codec: Arc<dyn SignalCodec>) {
        self.codec = codec;
    }

    /// Folder for files opened by later `start` calls
    pub fn set_folder(&mut self, folder: Option<PathBuf>) {
        self.config.folder = folder;
    }

    pub fn set_format(&mut self, format: TraceFormat) {
        self.config.format = format;
    }

    /// Write the display ring to a new file; returns the number of entries
    pub fn export(&self, path: impl Into<PathBuf>, format: TraceFormat) -> TraceResult<usize> {
        let session_start = self.session_start.unwrap_or_else(now_timestamp);
        let mut writer = create_trace_writer(path, format, session_start);
        writer.open()?;
        for entry in &self.entries {
            writer.write(entry)?;
        }
        writer.close()?;
        tracing::info!(path = %writer.path().display(), entries = self.entries.len(), "Trace exported");
        Ok(self.entries.len())
    }

    fn flush_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.pending);
        self.update_rate(batch.len());

        for frame in &batch {
            let start = *self.start_time.get_or_insert(frame.timestamp);
            self.seq += 1;
            let decoded = summarize(&self.codec.decode(frame.id, frame.payload()));
            let entry = TraceEntry::from_frame(frame, self.seq, frame.timestamp - start, decoded);
            self.write_to_disk(&entry);
            self.staged.push(entry);
        }

        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.flush() {
                self.writer_failed(e);
            }
        }
        tracing::trace!(frames = batch.len(), seq = self.seq, "Trace batch captured");
    }

    fn update_rate(&mut self, count: usize) {
        self.rate_count += count as u64;
        let elapsed = self.rate_window_start.elapsed();
        if elapsed >= RATE_WINDOW {
            let per_second = (self.rate_count as f64 / elapsed.as_secs_f64()) as u32;
            self.events.publish(PipelineEvent::TraceRate { per_second });
            self.rate_count = 0;
            self.rate_window_start = Instant::now();
        }
    }

    fn write_to_disk(&mut self, entry: &TraceEntry) {
        let needs_roll = match self.writer.as_ref() {
            Some(writer) => writer.file_size() >= self.config.max_file_size,
            None => return,
        };
        if needs_roll {
            self.roll_trace_file();
        }
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        if let Err(e) = writer.write(entry) {
            self.writer_failed(e);
        }
    }

    fn file_path(&self) -> Option<PathBuf> {
        let folder = self.config.folder.as_ref()?;
        let ext = self.config.format.extension();
        let name = if self.file_index == 0 {
            format!("{}.{}", self.base_name, ext)
        } else {
            format!("{}_{:03}.{}", self.base_name, self.file_index, ext)
        };
        Some(folder.join(name))
    }

    fn open_trace_file(&mut self) {
        let Some(folder) = self.config.folder.clone() else {
            return;
        };
        if let Err(e) = std::fs::create_dir_all(&folder) {
            self.writer_failed(TraceError::io(folder, e));
            return;
        }
        self.base_name = Local::now().format("%Y-%m-%dT%H-%M-%S").to_string();
        self.file_index = 0;
        self.session_start = Some(now_timestamp());
        self.open_indexed();
    }

    fn roll_trace_file(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.close() {
                self.writer_failed(e);
                return;
            }
        }
        self.file_index += 1;
        tracing::info!(index = self.file_index, "Rotating trace file");
        self.open_indexed();
    }

    fn open_indexed(&mut self) {
        let Some(path) = self.file_path() else {
            return;
        };
        let session_start = *self.session_start.get_or_insert_with(now_timestamp);
        let mut writer = create_trace_writer(&path, self.config.format, session_start);
        match writer.open() {
            Ok(()) => {
                self.writer = Some(writer);
                self.events.publish(PipelineEvent::TraceFileChanged { path: Some(path) });
            }
            Err(e) => self.writer_failed(e),
        }
    }

    fn close_trace_file(&mut self) {
        let Some(mut writer) = self.writer.take() else {
            return;
        };
        if let Err(e) = writer.close() {
            tracing::error!(error = %e, "Failed to close trace file");
        }
        self.events.publish(PipelineEvent::TraceFileChanged { path: None });
    }

    /// Disk logging is off for the rest of the session; capture continues
    fn writer_failed(&mut self, error: TraceError) {
        tracing::error!(error = %error, "Trace writer failed, continuing in memory");
        let had_file = self.writer.take().is_some();
        self.events.publish(PipelineEvent::TraceWriteFailed {
            message: error.to_string(),
        });
        if had_file {
            self.events.publish(PipelineEvent::TraceFileChanged { path: None });
        }
    }
}

impl Consumer for TraceRecorder {
    fn name(&self) -> &'static str {
        "trace"
    }

    fn on_frames(&mut self, frames: &[Frame]) {
        if self.recording {
            self.pending.extend_from_slice(frames);
        }
    }

    fn flush(&mut self) {
        self.flush_pending();
    }
}

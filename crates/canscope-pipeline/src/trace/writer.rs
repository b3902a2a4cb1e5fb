//! Trace file writers

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use super::binary::BinaryTraceWriter;
use super::entry::TraceEntry;
use super::TraceFormat;
use crate::error::{TraceError, TraceResult};

const RULE: &str =
    ";-------------------------------------------------------------------------------\n";

/// Sink for recorded entries
///
/// A writer is created closed; [`open`](TraceWriter::open) creates the file
/// and writes the format header.
pub trait TraceWriter: Send {
    fn open(&mut self) -> TraceResult<()>;

    fn write(&mut self, entry: &TraceEntry) -> TraceResult<()>;

    /// Push buffered bytes to the file
    fn flush(&mut self) -> TraceResult<()> {
        Ok(())
    }

    /// Flush and close; a no-op when not open
    fn close(&mut self) -> TraceResult<()>;

    /// Bytes written so far, header included
    fn file_size(&self) -> u64;

    fn path(&self) -> &Path;

    fn is_open(&self) -> bool;
}

/// Create a closed writer for `format`
///
/// `session_start` (Unix seconds) goes into the file header; rotated files
/// of one session pass the same value.
pub fn create_trace_writer(
    path: impl Into<PathBuf>,
    format: TraceFormat,
    session_start: f64,
) -> Box<dyn TraceWriter> {
    match format {
        TraceFormat::Trc => Box::new(TextTraceWriter::new(path, session_start)),
        TraceFormat::Binary => Box::new(BinaryTraceWriter::new(path, session_start)),
    }
}

/// Column-aligned text trace (`.trc`)
pub struct TextTraceWriter {
    path: PathBuf,
    session_start: f64,
    file: Option<BufWriter<File>>,
    written: u64,
}

impl TextTraceWriter {
    pub fn new(path: impl Into<PathBuf>, session_start: f64) -> Self {
        Self {
            path: path.into(),
            session_start,
            file: None,
            written: 0,
        }
    }

    fn put(&mut self, text: &str) -> TraceResult<()> {
        let file = self.file.as_mut().ok_or(TraceError::NotOpen)?;
        file.write_all(text.as_bytes())
            .map_err(|e| TraceError::io(&self.path, e))?;
        self.written += text.len() as u64;
        Ok(())
    }

    fn header(session_start: f64) -> String {
        let secs = session_start.floor();
        let nanos = ((session_start - secs) * 1e9) as u32;
        let start = DateTime::from_timestamp(secs as i64, nanos.min(999_999_999))
            .map(|t| t.with_timezone(&Local))
            .unwrap_or_else(Local::now);
        let mut header = String::new();
        header.push_str(";$FILEVERSION=1.1\n");
        header.push_str(&format!(
            ";   Start time: {}\n",
            start.format("%m/%d/%Y %H:%M:%S%.6f")
        ));
        header.push_str(RULE);
        header.push_str(";   Message Number) Time Offset   Type   ID    Rx/Tx   d]  Data Bytes ...\n");
        header.push_str(RULE);
        header
    }

    /// One trace line, newline included
    pub fn format_line(entry: &TraceEntry) -> String {
        let kind = if entry.flags.fd { "FD" } else { "1" };
        format!(
            "  {:>6})  {:>12.3} {:>2}  {:04X}  {:<2}  d {:>2}  {}\n",
            entry.seq,
            entry.offset,
            kind,
            entry.id,
            entry.direction.as_str(),
            entry.data.len(),
            entry.data_hex()
        )
    }
}

impl TraceWriter for TextTraceWriter {
    fn open(&mut self) -> TraceResult<()> {
        if self.file.is_some() {
            return Ok(());
        }
        let file = File::create(&self.path).map_err(|e| TraceError::io(&self.path, e))?;
        self.file = Some(BufWriter::new(file));
        self.written = 0;
        self.put(&Self::header(self.session_start))?;
        tracing::debug!(path = %self.path.display(), "Opened text trace");
        Ok(())
    }

    fn write(&mut self, entry: &TraceEntry) -> TraceResult<()> {
        self.put(&Self::format_line(entry))
    }

    fn flush(&mut self) -> TraceResult<()> {
        match self.file.as_mut() {
            Some(file) => file.flush().map_err(|e| TraceError::io(&self.path, e)),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> TraceResult<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().map_err(|e| TraceError::io(&self.path, e))?;
        }
        Ok(())
    }

    fn file_size(&self) -> u64 {
        self.written
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

impl Drop for TextTraceWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "Failed to close trace file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canscope_core::{Direction, Frame, FrameFlags};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_line_format() {
        let frame = Frame::new(0x123, vec![0x01, 0xAB]);
        let entry = TraceEntry::from_frame(&frame, 42, 1.5, String::new());
        assert_eq!(
            TextTraceWriter::format_line(&entry),
            "      42)         1.500  1  0123  Rx  d  2  01 AB\n"
        );

        let frame = Frame::new(0x18DA_F110, vec![0; 12])
            .with_flags(FrameFlags {
                extended: true,
                fd: true,
                ..Default::default()
            })
            .with_direction(Direction::Tx);
        let entry = TraceEntry::from_frame(&frame, 1, 0.0, String::new());
        let line = TextTraceWriter::format_line(&entry);
        assert!(line.starts_with("       1)         0.000 FD  18DAF110  Tx  d 12  00 00"));
    }

    #[test]
    fn test_header_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.trc");
        let mut writer = create_trace_writer(&path, TraceFormat::Trc, 0.0);
        assert!(matches!(
            writer.write(&TraceEntry::from_frame(&Frame::new(1, vec![]), 1, 0.0, String::new())),
            Err(TraceError::NotOpen)
        ));

        writer.open().unwrap();
        let header_size = writer.file_size();
        writer
            .write(&TraceEntry::from_frame(&Frame::new(1, vec![7]), 1, 0.0, String::new()))
            .unwrap();
        assert!(writer.file_size() > header_size);
        writer.close().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.len() as u64, writer.file_size());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], ";$FILEVERSION=1.1");
        assert!(lines[1].starts_with(";   Start time: "));
        assert_eq!(lines[2].len(), 80);
        assert!(lines[3].contains("Message Number) Time Offset"));
        assert_eq!(lines[5], "       1)         0.000  1  0001  Rx  d  1  07");
    }

    #[test]
    fn test_header_uses_session_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.trc");
        let mut writer = create_trace_writer(&path, TraceFormat::Trc, 1_700_000_000.25);
        writer.open().unwrap();
        writer.close().unwrap();

        let expected = DateTime::from_timestamp(1_700_000_000, 250_000_000)
            .unwrap()
            .with_timezone(&Local)
            .format("%m/%d/%Y %H:%M:%S%.6f")
            .to_string();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().nth(1).unwrap(), format!(";   Start time: {}", expected));
    }
}

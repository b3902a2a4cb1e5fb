//! Trace file reader

use std::path::Path;

use canscope_core::frame::MAX_STANDARD_ID;
use canscope_core::{Direction, FrameFlags};

use super::binary::{decode_header, decode_record, Record};
use super::entry::TraceEntry;
use super::TraceFormat;
use crate::error::{TraceError, TraceResult};

/// Load a trace file, choosing the format from its extension
pub fn read_trace(path: impl AsRef<Path>) -> TraceResult<Vec<TraceEntry>> {
    let path = path.as_ref();
    let format = TraceFormat::from_path(path)
        .ok_or_else(|| TraceError::UnsupportedFormat(path.display().to_string()))?;
    read_trace_as(path, format)
}

/// Load a trace file in a known format
///
/// Malformed text lines and damaged binary records are skipped; a truncated
/// binary tail ends the read.
pub fn read_trace_as(path: impl AsRef<Path>, format: TraceFormat) -> TraceResult<Vec<TraceEntry>> {
    let path = path.as_ref();
    let entries = match format {
        TraceFormat::Trc => {
            let text = std::fs::read_to_string(path).map_err(|e| TraceError::io(path, e))?;
            parse_text(&text)
        }
        TraceFormat::Binary => {
            let bytes = std::fs::read(path).map_err(|e| TraceError::io(path, e))?;
            parse_binary(&bytes)?
        }
    };
    tracing::debug!(path = %path.display(), entries = entries.len(), "Loaded trace");
    Ok(entries)
}

fn parse_text(text: &str) -> Vec<TraceEntry> {
    let mut entries = Vec::new();
    let mut skipped = 0usize;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }
        match parse_line(line) {
            Some(entry) => entries.push(entry),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        tracing::debug!(skipped, "Skipped malformed trace lines");
    }
    entries
}

/// Parse `N)  offset type id Rx|Tx d dlc bytes...`
fn parse_line(line: &str) -> Option<TraceEntry> {
    let mut fields = line.split_whitespace();
    let seq = fields.next()?.strip_suffix(')')?.parse::<u64>().ok()?;
    let offset = fields.next()?.parse::<f64>().ok()?;
    let kind = fields.next()?;
    let id = u32::from_str_radix(fields.next()?, 16).ok()?;
    let direction = match fields.next()? {
        "Rx" => Direction::Rx,
        "Tx" => Direction::Tx,
        _ => return None,
    };
    if fields.next()? != "d" {
        return None;
    }
    let dlc = fields.next()?.parse::<u8>().ok()?;
    let data = fields
        .map(|b| {
            if b.len() == 2 {
                u8::from_str_radix(b, 16).ok()
            } else {
                None
            }
        })
        .collect::<Option<Vec<u8>>>()?;

    Some(TraceEntry {
        seq,
        offset,
        bus: 1,
        id,
        flags: FrameFlags {
            extended: id > MAX_STANDARD_ID,
            fd: kind == "FD",
            ..Default::default()
        },
        direction,
        dlc,
        data,
        channel: None,
        decoded: String::new(),
    })
}

fn parse_binary(bytes: &[u8]) -> TraceResult<Vec<TraceEntry>> {
    let mut buf = bytes;
    decode_header(&mut buf)?;

    let mut entries = Vec::new();
    let mut damaged = 0usize;
    while !buf.is_empty() {
        match decode_record(&mut buf) {
            Record::Entry(entry) => entries.push(entry),
            Record::Damaged => damaged += 1,
            Record::Truncated => {
                tracing::debug!(remaining = buf.len(), "Trace ends in a truncated record");
                break;
            }
        }
    }
    if damaged > 0 {
        tracing::warn!(damaged, "Skipped damaged trace records");
    }
    Ok(entries)
}

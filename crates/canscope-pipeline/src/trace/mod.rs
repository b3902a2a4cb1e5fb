//! Trace recording
//!
//! The [`TraceRecorder`] captures frames in two tiers: a fast tier that
//! numbers, decodes and writes them to disk, and a slow tier that moves them
//! into a bounded display buffer. Files are written through a
//! [`TraceWriter`] and can be loaded back with [`read_trace`] and replayed
//! with a [`TracePlayer`].

mod binary;
mod entry;
mod player;
mod reader;
mod recorder;
mod writer;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use binary::BinaryTraceWriter;
pub use entry::TraceEntry;
pub use player::{PlayerConfig, TracePlayer};
pub use reader::{read_trace, read_trace_as};
pub use recorder::{RecorderConfig, TraceRecorder};
pub use writer::{create_trace_writer, TextTraceWriter, TraceWriter};

/// On-disk trace format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceFormat {
    /// Line-oriented text (`.trc`)
    #[default]
    Trc,
    /// Length-prefixed, checksummed records (`.cstb`)
    Binary,
}

impl TraceFormat {
    /// File extension, without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            TraceFormat::Trc => "trc",
            TraceFormat::Binary => "cstb",
        }
    }

    /// Detect the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        if ext.eq_ignore_ascii_case("trc") {
            Some(TraceFormat::Trc)
        } else if ext.eq_ignore_ascii_case("cstb") {
            Some(TraceFormat::Binary)
        } else {
            None
        }
    }
}

impl std::str::FromStr for TraceFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trc" | "text" => Ok(TraceFormat::Trc),
            "binary" | "cstb" => Ok(TraceFormat::Binary),
            other => Err(format!("unknown trace format '{}'", other)),
        }
    }
}

//! Bus frame model

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Largest payload a CAN FD frame can carry
pub const MAX_PAYLOAD: usize = 64;

/// Highest 11-bit identifier
pub const MAX_STANDARD_ID: u32 = 0x7FF;

/// Highest 29-bit identifier
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

/// Direction of a frame relative to this node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Rx,
    Tx,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Rx => "Rx",
            Direction::Tx => "Tx",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Rx" | "rx" => Ok(Direction::Rx),
            "Tx" | "tx" => Ok(Direction::Tx),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

/// Frame flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameFlags {
    /// 29-bit identifier
    #[serde(default)]
    pub extended: bool,
    /// CAN FD frame
    #[serde(default)]
    pub fd: bool,
    /// Remote transmission request
    #[serde(default)]
    pub remote: bool,
    /// Error frame
    #[serde(default)]
    pub error: bool,
}

impl FrameFlags {
    const EXTENDED: u8 = 0x01;
    const FD: u8 = 0x02;
    const REMOTE: u8 = 0x04;
    const ERROR: u8 = 0x08;

    /// Frame type label: Error, RTR, FD or Data (first match wins)
    pub fn type_label(&self) -> &'static str {
        if self.error {
            "Error"
        } else if self.remote {
            "RTR"
        } else if self.fd {
            "FD"
        } else {
            "Data"
        }
    }

    /// Pack into a single byte (used by the binary trace container)
    pub fn bits(&self) -> u8 {
        let mut bits = 0;
        if self.extended {
            bits |= Self::EXTENDED;
        }
        if self.fd {
            bits |= Self::FD;
        }
        if self.remote {
            bits |= Self::REMOTE;
        }
        if self.error {
            bits |= Self::ERROR;
        }
        bits
    }

    pub fn from_bits(bits: u8) -> Self {
        Self {
            extended: bits & Self::EXTENDED != 0,
            fd: bits & Self::FD != 0,
            remote: bits & Self::REMOTE != 0,
            error: bits & Self::ERROR != 0,
        }
    }
}

/// A single bus frame
///
/// Frames are created by a [`FrameSource`](crate::FrameSource) (or a trace
/// replay) and travel through the pipeline inside shared batches, so nothing
/// downstream mutates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Arbitration identifier (11 or 29 bit)
    pub id: u32,
    /// Payload bytes (0..=64)
    pub data: Vec<u8>,
    #[serde(default)]
    pub flags: FrameFlags,
    #[serde(default)]
    pub direction: Direction,
    /// Logical bus number (1-based)
    pub bus: u8,
    /// Data length code as declared on the wire
    pub dlc: u8,
    /// Receive timestamp in seconds
    pub timestamp: f64,
    /// Interface/channel label, e.g. "vcan0"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl Frame {
    /// Create an inbound data frame; the extended flag follows the identifier
    pub fn new(id: u32, data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        let dlc = data.len().min(MAX_PAYLOAD) as u8;
        Self {
            id,
            data,
            flags: FrameFlags {
                extended: id > MAX_STANDARD_ID,
                ..Default::default()
            },
            direction: Direction::Rx,
            bus: 1,
            dlc,
            timestamp: 0.0,
            channel: None,
        }
    }

    pub fn with_bus(mut self, bus: u8) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_flags(mut self, flags: FrameFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_dlc(mut self, dlc: u8) -> Self {
        self.dlc = dlc;
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn is_rx(&self) -> bool {
        self.direction == Direction::Rx
    }

    /// Frame type label: Error, RTR, FD or Data (first match wins)
    pub fn frame_type(&self) -> &'static str {
        self.flags.type_label()
    }

    /// Identifier formatted as 8 hex digits (extended) or 3 (standard)
    pub fn id_hex(&self) -> String {
        format_id(self.id, self.flags.extended)
    }

    /// Payload as space separated upper-case hex
    pub fn data_hex(&self) -> String {
        format_data(&self.data)
    }

    /// Payload truncated to the declared length
    pub fn payload(&self) -> &[u8] {
        let len = (self.dlc as usize).min(self.data.len());
        if self.dlc == 0 {
            &self.data
        } else {
            &self.data[..len]
        }
    }
}

/// Wall-clock time in seconds since the Unix epoch
pub fn now_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Format an identifier the way tables show it
pub fn format_id(id: u32, extended: bool) -> String {
    if extended {
        format!("{:08X}", id)
    } else {
        format!("{:03X}", id)
    }
}

/// Format payload bytes as "01 02 0A"
pub fn format_data(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse "01 02 0A" (or "01020A") back into bytes
pub fn parse_data(s: &str) -> Option<Vec<u8>> {
    let compact: String = s.split_whitespace().collect();
    hex::decode(compact).ok()
}

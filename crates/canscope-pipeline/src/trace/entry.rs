//! Recorded trace entry

use canscope_core::frame::{format_data, format_id};
use canscope_core::{Direction, Frame, FrameFlags};

/// One captured frame, as recorded
#[derive(Debug, Clone, PartialEq)]
pub struct TraceEntry {
    /// Sequence number within the recording session, starting at 1
    pub seq: u64,
    /// Seconds since the first frame of the session
    pub offset: f64,
    pub bus: u8,
    pub id: u32,
    pub flags: FrameFlags,
    pub direction: Direction,
    pub dlc: u8,
    pub data: Vec<u8>,
    /// Interface label, if the source provided one
    pub channel: Option<String>,
    /// Decoded signals as `name=value unit`, two spaces apart; empty if unknown
    pub decoded: String,
}

impl TraceEntry {
    pub fn from_frame(frame: &Frame, seq: u64, offset: f64, decoded: String) -> Self {
        Self {
            seq,
            offset,
            bus: frame.bus,
            id: frame.id,
            flags: frame.flags,
            direction: frame.direction,
            dlc: frame.dlc,
            data: frame.data.clone(),
            channel: frame.channel.clone(),
            decoded,
        }
    }

    /// Frame type label ("Error", "RTR", "FD" or "Data")
    pub fn frame_type(&self) -> &'static str {
        self.flags.type_label()
    }

    pub fn id_hex(&self) -> String {
        format_id(self.id, self.flags.extended)
    }

    pub fn data_hex(&self) -> String {
        format_data(&self.data)
    }

    /// Rebuild a frame for replay, timestamped with the offset
    pub fn to_frame(&self) -> Frame {
        Frame {
            id: self.id,
            data: self.data.clone(),
            flags: self.flags,
            direction: self.direction,
            bus: self.bus,
            dlc: self.dlc,
            timestamp: self.offset,
            channel: self.channel.clone(),
        }
    }
}

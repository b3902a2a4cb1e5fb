//! Binary trace container (`.cstb`)
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! header:  "CSTB" | u16 version | f64 session start (Unix seconds)
//! record:  u32 payload length | payload | u32 CRC-32 of payload
//! payload: f64 offset | u32 id | u8 flags | u8 bus | u8 dlc | u8 direction
//!          | u64 seq | u8 data length | data | u8 channel length | channel
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, BytesMut};
use canscope_core::{Direction, FrameFlags, MAX_PAYLOAD};
use crc::{Crc, CRC_32_ISO_HDLC};

use super::entry::TraceEntry;
use super::writer::TraceWriter;
use crate::error::{TraceError, TraceResult};

pub(crate) const MAGIC: &[u8; 4] = b"CSTB";
pub(crate) const VERSION: u16 = 1;
pub(crate) const HEADER_LEN: usize = 4 + 2 + 8;

/// Fixed part of a record payload, before data and channel
const FIXED_LEN: usize = 8 + 4 + 1 + 1 + 1 + 1 + 8;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Outcome of decoding one record
#[derive(Debug, PartialEq)]
pub(crate) enum Record {
    Entry(TraceEntry),
    /// Framing was intact but the checksum or payload was not
    Damaged,
    /// Not enough bytes left for a full record
    Truncated,
}

pub(crate) fn encode_header(session_start: f64) -> BytesMut {
    let mut buf = BytesMut::with_capacity(HEADER_LEN);
    buf.put_slice(MAGIC);
    buf.put_u16_le(VERSION);
    buf.put_f64_le(session_start);
    buf
}

/// Check the header and return the session start
pub(crate) fn decode_header(buf: &mut &[u8]) -> TraceResult<f64> {
    if buf.len() < HEADER_LEN || &buf[..4] != MAGIC {
        return Err(TraceError::Corrupt("missing CSTB header".to_string()));
    }
    buf.advance(4);
    let version = buf.get_u16_le();
    if version != VERSION {
        return Err(TraceError::Corrupt(format!("unsupported version {}", version)));
    }
    Ok(buf.get_f64_le())
}

pub(crate) fn encode_record(entry: &TraceEntry) -> BytesMut {
    let data = &entry.data[..entry.data.len().min(MAX_PAYLOAD)];
    let channel = entry.channel.as_deref().unwrap_or("").as_bytes();
    let channel = &channel[..channel.len().min(u8::MAX as usize)];

    let mut payload = BytesMut::with_capacity(FIXED_LEN + 2 + data.len() + channel.len());
    payload.put_f64_le(entry.offset);
    payload.put_u32_le(entry.id);
    payload.put_u8(entry.flags.bits());
    payload.put_u8(entry.bus);
    payload.put_u8(entry.dlc);
    payload.put_u8(match entry.direction {
        Direction::Rx => 0,
        Direction::Tx => 1,
    });
    payload.put_u64_le(entry.seq);
    payload.put_u8(data.len() as u8);
    payload.put_slice(data);
    payload.put_u8(channel.len() as u8);
    payload.put_slice(channel);

    let mut record = BytesMut::with_capacity(payload.len() + 8);
    record.put_u32_le(payload.len() as u32);
    record.put_slice(&payload);
    record.put_u32_le(CRC32.checksum(&payload));
    record
}

/// Decode the next record, advancing `buf` past it unless truncated
pub(crate) fn decode_record(buf: &mut &[u8]) -> Record {
    if buf.len() < 4 {
        return Record::Truncated;
    }
    let len = (&buf[..4]).get_u32_le() as usize;
    if buf.len() < 4 + len + 4 {
        return Record::Truncated;
    }
    buf.advance(4);
    let payload = &buf[..len];
    buf.advance(len);
    let crc = buf.get_u32_le();
    if CRC32.checksum(payload) != crc {
        return Record::Damaged;
    }
    match decode_payload(payload) {
        Some(entry) => Record::Entry(entry),
        None => Record::Damaged,
    }
}

fn decode_payload(mut payload: &[u8]) -> Option<TraceEntry> {
    if payload.len() < FIXED_LEN + 1 {
        return None;
    }
    let offset = payload.get_f64_le();
    let id = payload.get_u32_le();
    let flags = FrameFlags::from_bits(payload.get_u8());
    let bus = payload.get_u8();
    let dlc = payload.get_u8();
    let direction = if payload.get_u8() == 0 {
        Direction::Rx
    } else {
        Direction::Tx
    };
    let seq = payload.get_u64_le();

    let data_len = payload.get_u8() as usize;
    if payload.len() < data_len + 1 {
        return None;
    }
    let data = payload[..data_len].to_vec();
    payload.advance(data_len);

    let channel_len = payload.get_u8() as usize;
    if payload.len() < channel_len {
        return None;
    }
    let channel = match channel_len {
        0 => None,
        n => Some(String::from_utf8_lossy(&payload[..n]).into_owned()),
    };

    Some(TraceEntry {
        seq,
        offset,
        bus,
        id,
        flags,
        direction,
        dlc,
        data,
        channel,
        decoded: String::new(),
    })
}

/// Binary trace writer
pub struct BinaryTraceWriter {
    path: PathBuf,
    session_start: f64,
    file: Option<BufWriter<File>>,
    written: u64,
}

impl BinaryTraceWriter {
    /// Writer whose header carries `session_start` (Unix seconds)
    pub fn new(path: impl Into<PathBuf>, session_start: f64) -> Self {
        Self {
            path: path.into(),
            session_start,
            file: None,
            written: 0,
        }
    }

    fn put(&mut self, bytes: &[u8]) -> TraceResult<()> {
        let file = self.file.as_mut().ok_or(TraceError::NotOpen)?;
        file.write_all(bytes)
            .map_err(|e| TraceError::io(&self.path, e))?;
        self.written += bytes.len() as u64;
        Ok(())
    }
}

impl TraceWriter for BinaryTraceWriter {
    fn open(&mut self) -> TraceResult<()> {
        if self.file.is_some() {
            return Ok(());
        }
        let file = File::create(&self.path).map_err(|e| TraceError::io(&self.path, e))?;
        self.file = Some(BufWriter::new(file));
        self.written = 0;
        self.put(&encode_header(self.session_start))?;
        tracing::debug!(path = %self.path.display(), "Opened binary trace");
        Ok(())
    }

    fn write(&mut self, entry: &TraceEntry) -> TraceResult<()> {
        self.put(&encode_record(entry))
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

impl Drop for BinaryTraceWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "Failed to close trace file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canscope_core::Frame;
    use pretty_assertions::assert_eq;

    fn entry() -> TraceEntry {
        let frame = Frame::new(0x18DA_F110, vec![0x02, 0x10, 0x03])
            .with_bus(2)
            .with_direction(Direction::Tx)
            .with_channel("vcan1");
        TraceEntry::from_frame(&frame, 9, 1.25, String::new())
    }

    #[test]
    fn test_record_layout() {
        let record = encode_record(&entry());
        let payload_len = FIXED_LEN + 1 + 3 + 1 + 5;
        assert_eq!(record.len(), 4 + payload_len + 4);
        assert_eq!(&record[..4], &(payload_len as u32).to_le_bytes());

        let mut slice = &record[..];
        assert_eq!(decode_record(&mut slice), Record::Entry(entry()));
        assert!(slice.is_empty());
    }

    #[test]
    fn test_bad_crc_is_damaged() {
        let mut record = encode_record(&entry()).to_vec();
        record[10] ^= 0xFF;
        let mut slice = &record[..];
        assert_eq!(decode_record(&mut slice), Record::Damaged);
        assert!(slice.is_empty());
    }

    #[test]
    fn test_short_tail_is_truncated() {
        let record = encode_record(&entry());
        let mut slice = &record[..record.len() - 2];
        assert_eq!(decode_record(&mut slice), Record::Truncated);
    }

    #[test]
    fn test_header() {
        let header = encode_header(1_700_000_000.5);
        let mut slice = &header[..];
        assert_eq!(decode_header(&mut slice).unwrap(), 1_700_000_000.5);

        let mut bad: &[u8] = b"XXXX\x01\x00\0\0\0\0\0\0\0\0";
        assert!(matches!(decode_header(&mut bad), Err(TraceError::Corrupt(_))));
    }
}

//! Transmit table and snapshots

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use canscope_core::frame::{format_data, MAX_STANDARD_ID};
use canscope_core::{
    Direction, Frame, FrameFlags, SignalCodec, SignalValue, TxCounts, MAX_PAYLOAD,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{PipelineError, PipelineResult};

/// Classic CAN payload limit; longer rows go out as FD frames
const CLASSIC_PAYLOAD: usize = 8;

/// One signal of a transmit row
#[derive(Debug, Clone, PartialEq)]
pub struct TxSignal {
    pub name: String,
    pub value: SignalValue,
    pub unit: String,
}

impl TxSignal {
    pub fn value_with_unit(&self) -> String {
        if self.unit.is_empty() {
            self.value.to_string()
        } else {
            format!("{} {}", self.value, self.unit)
        }
    }
}

/// One configured outgoing message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxRow {
    #[serde(default = "default_bus")]
    pub bus: u8,
    pub id: u32,
    #[serde(default)]
    pub extended: bool,
    /// Bytes sent; always `length` long
    #[serde(default)]
    pub data: Vec<u8>,
    #[serde(default = "default_length")]
    pub length: u8,
    #[serde(default = "default_cycle_ms")]
    pub cycle_ms: u32,
    #[serde(default)]
    pub cycle_enabled: bool,
    #[serde(skip)]
    pub count: u64,
    #[serde(default)]
    pub symbol: String,
    #[serde(skip)]
    pub signals: Vec<TxSignal>,
}

fn default_bus() -> u8 {
    1
}

fn default_length() -> u8 {
    8
}

fn default_cycle_ms() -> u32 {
    100
}

impl Default for TxRow {
    fn default() -> Self {
        Self {
            bus: default_bus(),
            id: 0,
            extended: false,
            data: vec![0; 8],
            length: default_length(),
            cycle_ms: default_cycle_ms(),
            cycle_enabled: false,
            count: 0,
            symbol: String::new(),
            signals: Vec::new(),
        }
    }
}

impl TxRow {
    pub fn new(id: u32, data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        Self {
            id,
            extended: id > MAX_STANDARD_ID,
            length: data.len().min(MAX_PAYLOAD) as u8,
            data,
            ..Default::default()
        }
    }

    pub fn on_bus(mut self, bus: u8) -> Self {
        self.bus = bus;
        self
    }

    /// Send every `cycle_ms` milliseconds
    pub fn cyclic(mut self, cycle_ms: u32) -> Self {
        self.cycle_ms = cycle_ms;
        self.cycle_enabled = true;
        self
    }

    pub fn data_hex(&self) -> String {
        format_data(&self.data)
    }

    /// "Time" when cycling, "Wait" otherwise
    pub fn trigger(&self) -> &'static str {
        if self.cycle_enabled {
            "Time"
        } else {
            "Wait"
        }
    }

    /// Frame this row puts on the bus
    pub fn to_frame(&self) -> Frame {
        let len = (self.length as usize).min(MAX_PAYLOAD);
        let mut data = self.data.clone();
        data.resize(len, 0);
        Frame::new(self.id, data)
            .with_bus(self.bus)
            .with_direction(Direction::Tx)
            .with_flags(FrameFlags {
                extended: self.extended || self.id > MAX_STANDARD_ID,
                fd: len > CLASSIC_PAYLOAD,
                ..Default::default()
            })
            .with_dlc(len as u8)
    }

    /// Keep `data` exactly `length` bytes long
    fn normalize(&mut self) {
        self.length = self.length.min(MAX_PAYLOAD as u8);
        self.data.resize(self.length as usize, 0);
    }
}

/// One row as the transmitter sees it
#[derive(Debug, Clone, PartialEq)]
pub struct TxItem {
    pub row: usize,
    pub frame: Frame,
    pub cycle: Duration,
    pub enabled: bool,
}

/// Immutable view of the table handed to the transmitter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TxSnapshot {
    pub items: Vec<TxItem>,
}

impl TxSnapshot {
    fn build(rows: &[TxRow]) -> Self {
        Self {
            items: rows
                .iter()
                .enumerate()
                .map(|(row, r)| TxItem {
                    row,
                    frame: r.to_frame(),
                    cycle: Duration::from_millis(r.cycle_ms as u64),
                    enabled: r.cycle_enabled,
                })
                .collect(),
        }
    }

    pub fn enabled(&self) -> impl Iterator<Item = &TxItem> {
        self.items.iter().filter(|item| item.enabled)
    }
}

/// Editable transmit rows
///
/// Every mutation marks the snapshot stale. A stale snapshot is rebuilt
/// immediately if the last rebuild is at least `min_interval` old, otherwise
/// by a later [`poll`](Self::poll).
pub struct TxTable {
    rows: Vec<TxRow>,
    codec: Arc<dyn SignalCodec>,
    snapshot: watch::Sender<Arc<TxSnapshot>>,
    min_interval: Duration,
    last_rebuild: Option<Instant>,
    stale: bool,
}

impl TxTable {
    pub fn new(codec: Arc<dyn SignalCodec>, min_interval: Duration) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(TxSnapshot::default()));
        Self {
            rows: Vec::new(),
            codec,
            snapshot,
            min_interval,
            last_rebuild: None,
            stale: false,
        }
    }

    /// Receiver of published snapshots
    pub fn subscribe(&self) -> watch::Receiver<Arc<TxSnapshot>> {
        self.snapshot.subscribe()
    }

    /// Most recently published snapshot
    pub fn snapshot(&self) -> Arc<TxSnapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn rows(&self) -> &[TxRow] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&TxRow> {
        self.rows.get(index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a row as given; symbol and signals come from the codec
    pub fn add_row(&mut self, mut row: TxRow) -> usize {
        row.normalize();
        self.resolve_symbol(&mut row);
        self.rebuild_signals(&mut row);
        self.rows.push(row);
        self.request_rebuild();
        self.rows.len() - 1
    }

    /// Append a row for a known message: length, cycle and initial payload
    /// come from the codec
    pub fn add_message(&mut self, id: u32, bus: u8) -> usize {
        let mut row = TxRow::new(id, vec![0; 8]).on_bus(bus);
        self.resolve_from_codec(&mut row);
        self.rebuild_signals(&mut row);
        self.rows.push(row);
        self.request_rebuild();
        self.rows.len() - 1
    }

    /// Append an 8-byte zero row with id 0 on `bus`
    pub fn add_empty_row(&mut self, bus: u8) -> usize {
        self.add_message(0, bus)
    }

    pub fn remove_row(&mut self, index: usize) -> Option<TxRow> {
        if index >= self.rows.len() {
            return None;
        }
        let row = self.rows.remove(index);
        self.request_rebuild();
        Some(row)
    }

    /// Edit a row in place; payload length and signals are re-derived after
    pub fn update_row<F>(&mut self, index: usize, edit: F) -> PipelineResult<()>
    where
        F: FnOnce(&mut TxRow),
    {
        let codec = self.codec.clone();
        let row = self
            .rows
            .get_mut(index)
            .ok_or(PipelineError::InvalidRow(index))?;
        edit(row);
        row.normalize();
        redecode(codec.as_ref(), row);
        self.request_rebuild();
        Ok(())
    }

    /// Change the identifier, re-resolving symbol, layout and signals
    pub fn set_id(&mut self, index: usize, id: u32) -> PipelineResult<()> {
        let mut row = self
            .rows
            .get(index)
            .cloned()
            .ok_or(PipelineError::InvalidRow(index))?;
        row.id = id;
        row.extended = id > MAX_STANDARD_ID;
        row.symbol.clear();
        self.resolve_from_codec(&mut row);
        self.rebuild_signals(&mut row);
        self.rows[index] = row;
        self.request_rebuild();
        Ok(())
    }

    pub fn set_cycle_enabled(&mut self, index: usize, enabled: bool) -> PipelineResult<()> {
        self.update_row(index, |row| row.cycle_enabled = enabled)
    }

    /// Replace the payload; the length follows the data
    pub fn set_payload(&mut self, index: usize, data: Vec<u8>) -> PipelineResult<()> {
        if data.len() > MAX_PAYLOAD {
            return Err(PipelineError::PayloadTooLong(data.len()));
        }
        self.update_row(index, |row| {
            row.length = data.len() as u8;
            row.data = data;
        })
    }

    /// Set one signal's physical value and re-encode the payload
    ///
    /// Returns false when the row has no such signal or the codec cannot
    /// encode the message.
    pub fn set_signal_value(&mut self, index: usize, signal: &str, value: f64) -> PipelineResult<bool> {
        let row = self
            .rows
            .get_mut(index)
            .ok_or(PipelineError::InvalidRow(index))?;
        if !row.signals.iter().any(|s| s.name == signal) {
            return Ok(false);
        }

        let mut values: HashMap<String, f64> = row
            .signals
            .iter()
            .filter_map(|s| s.value.as_f64().map(|v| (s.name.clone(), v)))
            .collect();
        values.insert(signal.to_string(), value);

        let Some(encoded) = self.codec.encode(row.id, &values) else {
            return Ok(false);
        };
        row.length = encoded.len().min(MAX_PAYLOAD) as u8;
        row.data = encoded;
        row.normalize();
        redecode(self.codec.as_ref(), row);
        self.request_rebuild();
        Ok(true)
    }

    /// Add reported send counts; rows that no longer exist are ignored
    pub fn apply_counts(&mut self, counts: &TxCounts) {
        for (&row, &delta) in counts {
            if let Some(r) = self.rows.get_mut(row) {
                r.count += delta;
            }
        }
    }

    pub fn clear_counts(&mut self) {
        for row in &mut self.rows {
            row.count = 0;
        }
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.request_rebuild();
    }

    pub fn set_codec(&mut self, codec: Arc<dyn SignalCodec>) {
        self.codec = codec;
    }

    /// Re-resolve symbols and signals after the codec changed
    ///
    /// Payloads are kept as they are.
    pub fn refresh_signals(&mut self) {
        let mut rows = std::mem::take(&mut self.rows);
        for row in &mut rows {
            self.resolve_symbol(row);
            self.rebuild_signals(row);
        }
        self.rows = rows;
    }

    /// Mark the snapshot stale and rebuild it if allowed
    pub fn request_rebuild(&mut self) {
        self.stale = true;
        self.poll();
    }

    /// Publish a deferred rebuild once the interval allows; true if published
    pub fn poll(&mut self) -> bool {
        if !self.stale {
            return false;
        }
        if let Some(last) = self.last_rebuild {
            if last.elapsed() < self.min_interval {
                return false;
            }
        }
        self.rebuild_now();
        true
    }

    /// Publish a snapshot right away
    pub fn rebuild_now(&mut self) {
        self.snapshot
            .send_replace(Arc::new(TxSnapshot::build(&self.rows)));
        self.last_rebuild = Some(Instant::now());
        self.stale = false;
        tracing::trace!(rows = self.rows.len(), "TX snapshot rebuilt");
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    fn resolve_symbol(&self, row: &mut TxRow) {
        let symbol = self.codec.symbol_for(row.id);
        if !symbol.is_empty() {
            row.symbol = symbol;
        }
    }

    /// Symbol, length, cycle time and initial payload from the codec
    fn resolve_from_codec(&self, row: &mut TxRow) {
        self.resolve_symbol(row);
        let Some((length, cycle)) = self.codec.message_info(row.id) else {
            return;
        };
        row.length = length.min(MAX_PAYLOAD as u8);
        if let Some(cycle) = cycle {
            row.cycle_ms = cycle;
        }
        let initial: HashMap<String, f64> = self
            .codec
            .signals_for(row.id)
            .into_iter()
            .filter_map(|s| s.as_f64().map(|v| (s.name, v)))
            .collect();
        row.data = self
            .codec
            .encode(row.id, &initial)
            .unwrap_or_else(|| vec![0; row.length as usize]);
        row.normalize();
    }

    fn rebuild_signals(&self, row: &mut TxRow) {
        row.signals = self
            .codec
            .signals_for(row.id)
            .into_iter()
            .map(|s| TxSignal {
                name: s.name,
                value: s.value,
                unit: s.unit,
            })
            .collect();
        redecode(self.codec.as_ref(), row);
    }
}

/// Refresh signal values from the current payload
fn redecode(codec: &dyn SignalCodec, row: &mut TxRow) {
    if row.signals.is_empty() {
        return;
    }
    for decoded in codec.decode(row.id, &row.data) {
        if let Some(signal) = row.signals.iter_mut().find(|s| s.name == decoded.name) {
            signal.value = decoded.value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canscope_core::NullCodec;
    use canscope_signals::{MessageDefinition, SignalDatabase, SignalDefinition};
    use pretty_assertions::assert_eq;

    fn table() -> TxTable {
        TxTable::new(Arc::new(NullCodec), Duration::ZERO)
    }

    #[test]
    fn test_rows_and_snapshot() {
        let mut tx = table();
        let rx = tx.subscribe();
        tx.add_row(TxRow::new(0x123, vec![1, 2, 3]).cyclic(50));
        let empty = tx.add_empty_row(2);
        assert_eq!(empty, 1);

        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.items.len(), 2);
        assert_eq!(snapshot.items[0].frame.data, vec![1, 2, 3]);
        assert_eq!(snapshot.items[0].frame.direction, Direction::Tx);
        assert_eq!(snapshot.items[0].cycle, Duration::from_millis(50));
        assert_eq!(snapshot.items[1].frame.bus, 2);
        assert_eq!(snapshot.items[1].frame.data, vec![0; 8]);
        assert_eq!(snapshot.enabled().count(), 1);
    }

    #[test]
    fn test_rebuilds_are_coalesced() {
        let mut tx = TxTable::new(Arc::new(NullCodec), Duration::from_secs(3600));
        tx.add_row(TxRow::new(0x100, vec![0]));
        assert_eq!(tx.snapshot().items.len(), 1);

        tx.add_row(TxRow::new(0x101, vec![0]));
        tx.set_cycle_enabled(0, true).unwrap();
        assert!(tx.is_stale());
        assert!(!tx.poll());
        assert_eq!(tx.snapshot().items.len(), 1);

        tx.rebuild_now();
        assert_eq!(tx.snapshot().items.len(), 2);
        assert!(tx.snapshot().items[0].enabled);
    }

    #[test]
    fn test_deferred_rebuild_lands_after_interval() {
        let mut tx = TxTable::new(Arc::new(NullCodec), Duration::from_millis(50));
        tx.add_row(TxRow::new(0x100, vec![0]));
        tx.add_row(TxRow::new(0x101, vec![0]));
        assert!(tx.is_stale());
        assert!(!tx.poll());

        std::thread::sleep(Duration::from_millis(60));
        assert!(tx.poll());
        assert!(!tx.is_stale());
        assert_eq!(tx.snapshot().items.len(), 2);
    }

    #[test]
    fn test_payload_and_length() {
        let mut tx = table();
        tx.add_row(TxRow::new(0x100, vec![1, 2]));
        tx.set_payload(0, vec![0xAA; 12]).unwrap();
        let row = tx.row(0).unwrap();
        assert_eq!(row.length, 12);
        assert!(tx.snapshot().items[0].frame.flags.fd);

        tx.update_row(0, |row| row.length = 4).unwrap();
        assert_eq!(tx.row(0).unwrap().data, vec![0xAA; 4]);

        assert!(matches!(
            tx.set_payload(0, vec![0; 65]),
            Err(PipelineError::PayloadTooLong(65))
        ));
        assert!(matches!(
            tx.set_cycle_enabled(9, true),
            Err(PipelineError::InvalidRow(9))
        ));
    }

    #[test]
    fn test_counts() {
        let mut tx = table();
        tx.add_row(TxRow::new(0x100, vec![]));
        tx.add_row(TxRow::new(0x101, vec![]));
        tx.apply_counts(&TxCounts::from([(0, 3), (1, 2), (7, 9)]));
        tx.apply_counts(&TxCounts::from([(0, 1)]));
        assert_eq!(tx.rows().iter().map(|r| r.count).collect::<Vec<_>>(), vec![4, 2]);
        tx.clear_counts();
        assert!(tx.rows().iter().all(|r| r.count == 0));

        let removed = tx.remove_row(0).unwrap();
        assert_eq!(removed.id, 0x100);
        assert!(tx.remove_row(5).is_none());
    }

    fn database() -> Arc<SignalDatabase> {
        let db = SignalDatabase::new();
        db.register(
            MessageDefinition::new(0x3E8, "EngineData", 8)
                .with_cycle_time(20)
                .with_signal(
                    SignalDefinition::unsigned("Rpm", 0, 16)
                        .scaled(0.25, 0.0)
                        .with_initial(800.0),
                ),
        );
        Arc::new(db)
    }

    #[test]
    fn test_message_resolved_from_codec() {
        let mut tx = TxTable::new(database(), Duration::ZERO);
        let row = tx.add_message(0x3E8, 1);
        let row = tx.row(row).unwrap();
        assert_eq!(row.symbol, "EngineData");
        assert_eq!(row.cycle_ms, 20);
        assert_eq!(row.length, 8);
        // 800 / 0.25 = 3200 = 0x0C80
        assert_eq!(&row.data[..2], &[0x80, 0x0C]);
        assert_eq!(row.signals[0].value.as_f64(), Some(800.0));
    }

    #[test]
    fn test_set_signal_value_encodes() {
        let mut tx = TxTable::new(database(), Duration::ZERO);
        tx.add_message(0x3E8, 1);
        assert!(tx.set_signal_value(0, "Rpm", 1000.0).unwrap());
        let row = tx.row(0).unwrap();
        assert_eq!(&row.data[..2], &[0xA0, 0x0F]);
        assert_eq!(row.signals[0].value.as_f64(), Some(1000.0));
        assert!(!tx.set_signal_value(0, "Missing", 1.0).unwrap());
        assert_eq!(tx.snapshot().items[0].frame.data[..2], [0xA0, 0x0F]);
    }
}

//! Live table
//!
//! One aggregated row per (bus, identifier) with a smoothed cycle time and
//! decoded signal children. Rows are addressed by index; a signal child by
//! (row, child) index.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use canscope_core::{frame::format_data, EventBus, Frame, PipelineEvent, SignalCodec};

use crate::consumer::Consumer;
use crate::filter::SharedFilter;

/// Weight of the previous smoothed value
const SMOOTHING: f64 = 0.8;

/// One decoded signal of a live row
#[derive(Debug, Clone, PartialEq)]
pub struct SignalSample {
    pub name: String,
    /// Formatted value
    pub value: String,
    pub unit: String,
}

/// Aggregated state of one (bus, identifier)
#[derive(Debug, Clone, PartialEq)]
pub struct LiveRow {
    pub bus: u8,
    pub id: u32,
    pub extended: bool,
    pub error: bool,
    pub frame_type: &'static str,
    /// Last data length code
    pub length: u8,
    pub symbol: String,
    pub data: Vec<u8>,
    pub count: u64,
    pub last_timestamp: f64,
    /// Smoothed inter-arrival time in milliseconds, `None` until the second frame
    pub cycle_time_ms: Option<f64>,
    pub signals: Vec<SignalSample>,
}

impl LiveRow {
    fn from_frame(frame: &Frame) -> Self {
        Self {
            bus: frame.bus,
            id: frame.id,
            extended: frame.flags.extended,
            error: frame.flags.error,
            frame_type: frame.frame_type(),
            length: frame.dlc,
            symbol: String::new(),
            data: frame.data.clone(),
            count: 1,
            last_timestamp: frame.timestamp,
            cycle_time_ms: None,
            signals: Vec::new(),
        }
    }

    fn update(&mut self, frame: &Frame) {
        let dt_ms = (frame.timestamp - self.last_timestamp) * 1000.0;
        self.cycle_time_ms = Some(match self.cycle_time_ms {
            Some(smoothed) => smoothed * SMOOTHING + dt_ms * (1.0 - SMOOTHING),
            None => dt_ms,
        });
        self.data.clone_from(&frame.data);
        self.length = frame.dlc;
        self.frame_type = frame.frame_type();
        self.error = frame.flags.error;
        self.count += 1;
        self.last_timestamp = frame.timestamp;
    }

    pub fn data_hex(&self) -> String {
        format_data(&self.data)
    }
}

/// Aggregates received frames per (bus, identifier)
pub struct LiveTable {
    rows: Vec<LiveRow>,
    index: HashMap<(u8, u32), usize>,
    pending: Vec<Frame>,
    codec: Arc<dyn SignalCodec>,
    filter: SharedFilter,
    events: EventBus,
}

impl LiveTable {
    pub fn new(codec: Arc<dyn SignalCodec>, filter: SharedFilter, events: EventBus) -> Self {
        Self {
            rows: Vec::new(),
            index: HashMap::new(),
            pending: Vec::new(),
            codec,
            filter,
            events,
        }
    }

    pub fn rows(&self) -> &[LiveRow] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&LiveRow> {
        self.rows.get(index)
    }

    pub fn signal(&self, row: usize, child: usize) -> Option<&SignalSample> {
        self.rows.get(row).and_then(|r| r.signals.get(child))
    }

    /// Row index of (bus, identifier)
    pub fn find(&self, bus: u8, id: u32) -> Option<usize> {
        self.index.get(&(bus, id)).copied()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.index.clear();
        self.pending.clear();
    }

    /// Replace the codec and re-resolve symbols and signals of every row
    pub fn set_codec(&mut self, codec: Arc<dyn SignalCodec>) {
        self.codec = codec;
        self.refresh_symbols();
    }

    /// Re-resolve symbols and signals after the codec's definitions changed
    pub fn refresh_symbols(&mut self) {
        for i in 0..self.rows.len() {
            let symbol = self.codec.symbol_for(self.rows[i].id);
            if !symbol.is_empty() {
                self.rows[i].symbol = symbol;
            }
            self.decode_row(i);
        }
        if !self.rows.is_empty() {
            self.events.publish(PipelineEvent::LiveRowsUpdated {
                rows: (0..self.rows.len()).collect(),
            });
        }
    }

    /// Decode a row's payload into its children
    ///
    /// Unknown payloads keep the previous children. When the signal count is
    /// unchanged values are updated in place so child order stays stable.
    fn decode_row(&mut self, i: usize) {
        let row = &mut self.rows[i];
        let decoded = self.codec.decode(row.id, &row.data);
        if decoded.is_empty() {
            return;
        }
        if row.symbol.is_empty() {
            row.symbol = self.codec.symbol_for(row.id);
        }

        if decoded.len() == row.signals.len() {
            for (sample, sig) in row.signals.iter_mut().zip(&decoded) {
                sample.value = sig.display_value();
            }
        } else {
            row.signals = decoded
                .iter()
                .map(|sig| SignalSample {
                    name: sig.name.clone(),
                    value: sig.display_value(),
                    unit: sig.unit.clone(),
                })
                .collect();
        }
    }
}

impl Consumer for LiveTable {
    fn name(&self) -> &'static str {
        "live-table"
    }

    fn on_frames(&mut self, frames: &[Frame]) {
        let filter = self.filter.read();
        self.pending.extend(
            frames
                .iter()
                .filter(|f| f.is_rx() && filter.accepts(f.id, f.bus))
                .cloned(),
        );
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.pending);
        let first_new = self.rows.len();
        let mut touched: BTreeSet<usize> = BTreeSet::new();

        for frame in &batch {
            match self.index.get(&(frame.bus, frame.id)).copied() {
                Some(i) => {
                    self.rows[i].update(frame);
                    touched.insert(i);
                }
                None => {
                    let i = self.rows.len();
                    let mut row = LiveRow::from_frame(frame);
                    row.symbol = self.codec.symbol_for(frame.id);
                    self.rows.push(row);
                    self.index.insert((frame.bus, frame.id), i);
                    touched.insert(i);
                }
            }
        }

        // Decode once per touched row, not once per frame
        for &i in &touched {
            self.decode_row(i);
        }

        if self.rows.len() > first_new {
            self.events.publish(PipelineEvent::LiveRowsInserted {
                first: first_new,
                last: self.rows.len() - 1,
            });
        }
        let updated: Vec<usize> = touched.into_iter().filter(|&i| i < first_new).collect();
        if !updated.is_empty() {
            self.events.publish(PipelineEvent::LiveRowsUpdated { rows: updated });
        }
        tracing::trace!(frames = batch.len(), rows = self.rows.len(), "Live table flushed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterAction, FilterRule, RxFilter};
    use canscope_core::{DecodedSignal, Direction, NullCodec, SignalValue};
    use pretty_assertions::assert_eq;

    /// Decodes byte 0 as "A" and, when present, byte 1 as "B"
    struct ByteCodec;

    impl SignalCodec for ByteCodec {
        fn decode(&self, id: u32, payload: &[u8]) -> Vec<DecodedSignal> {
            if id != 0x100 {
                return Vec::new();
            }
            payload
                .iter()
                .take(2)
                .zip(["A", "B"])
                .map(|(b, name)| {
                    DecodedSignal::new(name, SignalValue::Number { value: *b as f64, decimals: 0 }, "")
                })
                .collect()
        }

        fn encode(&self, _id: u32, _values: &std::collections::HashMap<String, f64>) -> Option<Vec<u8>> {
            None
        }

        fn symbol_for(&self, id: u32) -> String {
            if id == 0x100 {
                "Msg100".to_string()
            } else {
                String::new()
            }
        }
    }

    fn table(codec: Arc<dyn SignalCodec>) -> LiveTable {
        LiveTable::new(codec, RxFilter::default().shared(), EventBus::default())
    }

    fn frame(id: u32, data: &[u8], t: f64) -> Frame {
        Frame::new(id, data.to_vec()).with_timestamp(t)
    }

    #[test]
    fn test_three_frames_one_row() {
        let mut live = table(Arc::new(NullCodec));
        live.on_frames(&[
            frame(0x100, &[1, 2], 0.0),
            frame(0x100, &[1, 2], 0.1),
            frame(0x100, &[1, 2], 0.2),
        ]);
        live.flush();

        assert_eq!(live.len(), 1);
        let row = live.row(0).unwrap();
        assert_eq!(row.count, 3);
        assert_eq!(row.data, vec![1, 2]);
        assert_eq!(row.data_hex(), "01 02");
    }

    #[test]
    fn test_smoothed_cycle_time() {
        let mut live = table(Arc::new(NullCodec));
        live.on_frames(&[frame(0x200, &[0], 1.0)]);
        live.flush();
        assert_eq!(live.row(0).unwrap().cycle_time_ms, None);

        live.on_frames(&[frame(0x200, &[0], 1.1)]);
        live.flush();
        let first = live.row(0).unwrap().cycle_time_ms.unwrap();
        assert!((first - 100.0).abs() < 1e-6);

        live.on_frames(&[frame(0x200, &[0], 1.15)]);
        live.flush();
        let second = live.row(0).unwrap().cycle_time_ms.unwrap();
        assert!((second - 90.0).abs() < 1e-6);
    }

    #[test]
    fn test_identity_is_bus_and_id() {
        let mut live = table(Arc::new(NullCodec));
        live.on_frames(&[
            frame(0x100, &[1], 0.0).with_bus(1),
            frame(0x100, &[1], 0.0).with_bus(2),
            frame(0x101, &[1], 0.0).with_bus(1),
        ]);
        live.flush();
        assert_eq!(live.len(), 3);
        assert_eq!(live.find(2, 0x100), Some(1));
        assert_eq!(live.find(3, 0x100), None);
    }

    #[test]
    fn test_tx_and_filtered_frames_ignored() {
        let filter = RxFilter::default().shared();
        filter
            .write()
            .insert_rule(0, FilterRule::new("drop", FilterAction::Drop, 0x300, 0x3FF));
        let mut live = LiveTable::new(Arc::new(NullCodec), filter, EventBus::default());

        live.on_frames(&[
            frame(0x100, &[1], 0.0).with_direction(Direction::Tx),
            frame(0x350, &[1], 0.0),
            frame(0x400, &[1], 0.0),
        ]);
        assert_eq!(live.pending(), 1);
        live.flush();
        assert_eq!(live.rows()[0].id, 0x400);
    }

    #[test]
    fn test_signals_in_place_or_rebuilt() {
        let mut live = table(Arc::new(ByteCodec));
        live.on_frames(&[frame(0x100, &[7, 8], 0.0)]);
        live.flush();
        let row = live.row(0).unwrap();
        assert_eq!(row.symbol, "Msg100");
        assert_eq!(row.signals.len(), 2);
        assert_eq!(live.signal(0, 1).unwrap().value, "8");

        // Same count: values updated in place
        live.on_frames(&[frame(0x100, &[9, 10], 0.1)]);
        live.flush();
        assert_eq!(live.signal(0, 0).unwrap().value, "9");
        assert_eq!(live.signal(0, 1).unwrap().value, "10");

        // Count changes: list rebuilt
        live.on_frames(&[frame(0x100, &[5], 0.2)]);
        live.flush();
        assert_eq!(live.row(0).unwrap().signals.len(), 1);
        assert_eq!(live.signal(0, 0).unwrap().value, "5");
        assert!(live.signal(0, 1).is_none());
    }

    #[test]
    fn test_events() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let mut live = LiveTable::new(Arc::new(NullCodec), RxFilter::default().shared(), events);

        live.on_frames(&[frame(0x1, &[], 0.0), frame(0x2, &[], 0.0)]);
        live.flush();
        assert_eq!(
            rx.try_recv().unwrap(),
            PipelineEvent::LiveRowsInserted { first: 0, last: 1 }
        );

        live.on_frames(&[frame(0x2, &[], 0.1), frame(0x3, &[], 0.1)]);
        live.flush();
        assert_eq!(
            rx.try_recv().unwrap(),
            PipelineEvent::LiveRowsInserted { first: 2, last: 2 }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            PipelineEvent::LiveRowsUpdated { rows: vec![1] }
        );
    }

    #[test]
    fn test_refresh_after_codec_change() {
        let mut live = table(Arc::new(NullCodec));
        live.on_frames(&[frame(0x100, &[3, 4], 0.0)]);
        live.flush();
        assert!(live.row(0).unwrap().symbol.is_empty());

        live.set_codec(Arc::new(ByteCodec));
        assert_eq!(live.row(0).unwrap().symbol, "Msg100");
        assert_eq!(live.row(0).unwrap().signals.len(), 2);

        live.clear();
        assert!(live.is_empty());
    }
}

//! Watch registry
//!
//! A short list of (identifier, signal) subscriptions. Each flush keeps only
//! the latest frame per identifier, decodes it once and touches entries whose
//! formatted value actually changed.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use canscope_core::{Direction, EventBus, Frame, PipelineEvent, SignalCodec};

use crate::consumer::Consumer;

/// One watched signal
#[derive(Debug, Clone, PartialEq)]
pub struct WatchEntry {
    pub id: u32,
    pub signal: String,
    pub display_name: String,
    /// Last formatted value, empty until first seen
    pub value: String,
    pub unit: String,
    pub direction: Direction,
}

impl WatchEntry {
    /// Display name, falling back to the signal name
    pub fn name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.signal
        } else {
            &self.display_name
        }
    }

    /// Value with unit, as shown in a table
    pub fn value_with_unit(&self) -> String {
        if self.unit.is_empty() {
            self.value.clone()
        } else {
            format!("{} {}", self.value, self.unit)
        }
    }
}

pub struct WatchRegistry {
    entries: Vec<WatchEntry>,
    /// Identifier → entry rows
    by_id: HashMap<u32, Vec<usize>>,
    pending: Vec<Frame>,
    codec: Arc<dyn SignalCodec>,
    events: EventBus,
}

impl WatchRegistry {
    pub fn new(codec: Arc<dyn SignalCodec>, events: EventBus) -> Self {
        Self {
            entries: Vec::new(),
            by_id: HashMap::new(),
            pending: Vec::new(),
            codec,
            events,
        }
    }

    /// Add a watch; returns false when (id, signal) is already watched
    pub fn add_watch(
        &mut self,
        id: u32,
        signal: impl Into<String>,
        display_name: impl Into<String>,
        unit: impl Into<String>,
        direction: Direction,
    ) -> bool {
        let signal = signal.into();
        if self.entries.iter().any(|e| e.id == id && e.signal == signal) {
            return false;
        }
        self.entries.push(WatchEntry {
            id,
            signal,
            display_name: display_name.into(),
            value: String::new(),
            unit: unit.into(),
            direction,
        });
        self.rebuild_index();
        true
    }

    pub fn remove_watch(&mut self, row: usize) -> Option<WatchEntry> {
        if row >= self.entries.len() {
            return None;
        }
        let removed = self.entries.remove(row);
        self.rebuild_index();
        Some(removed)
    }

    pub fn entries(&self) -> &[WatchEntry] {
        &self.entries
    }

    pub fn is_watched(&self, id: u32) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn set_codec(&mut self, codec: Arc<dyn SignalCodec>) {
        self.codec = codec;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_id.clear();
        self.pending.clear();
    }

    fn rebuild_index(&mut self) {
        self.by_id.clear();
        for (i, entry) in self.entries.iter().enumerate() {
            self.by_id.entry(entry.id).or_default().push(i);
        }
    }
}

impl Consumer for WatchRegistry {
    fn name(&self) -> &'static str {
        "watch"
    }

    fn on_frames(&mut self, frames: &[Frame]) {
        let by_id = &self.by_id;
        self.pending
            .extend(frames.iter().filter(|f| by_id.contains_key(&f.id)).cloned());
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        // Latest value wins within one flush window
        let mut latest: HashMap<u32, Frame> = HashMap::new();
        for frame in self.pending.drain(..) {
            latest.insert(frame.id, frame);
        }

        let mut changed: BTreeSet<usize> = BTreeSet::new();
        for (id, frame) in &latest {
            let Some(rows) = self.by_id.get(id) else {
                continue;
            };
            let decoded = self.codec.decode(*id, frame.payload());
            if decoded.is_empty() {
                continue;
            }
            for &row in rows {
                let entry = &mut self.entries[row];
                let Some(sig) = decoded.iter().find(|s| s.name == entry.signal) else {
                    continue;
                };
                let value = sig.display_value();
                if entry.value != value {
                    entry.value = value;
                    if entry.unit.is_empty() && !sig.unit.is_empty() {
                        entry.unit.clone_from(&sig.unit);
                    }
                    changed.insert(row);
                }
            }
        }

        if !changed.is_empty() {
            self.events.publish(PipelineEvent::WatchValuesChanged {
                rows: changed.into_iter().collect(),
            });
        }
    }
}

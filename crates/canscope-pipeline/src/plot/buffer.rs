//! Time-series buffer with front-index trimming

/// Plotted signal identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalKey {
    pub id: u32,
    pub signal: String,
}

impl SignalKey {
    pub fn new(id: u32, signal: impl Into<String>) -> Self {
        Self {
            id,
            signal: signal.into(),
        }
    }
}

/// Parallel time/value sequences ready for display
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Series {
    pub times: Vec<f64>,
    pub values: Vec<f64>,
}

impl Series {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

/// Compact once this many trimmed samples sit at the front
const COMPACT_MIN: usize = 4096;

/// Samples of one signal, kept sorted by time
///
/// Frames with the same id can arrive from several buses with interleaved
/// timestamps, so a late sample is inserted in place rather than appended.
/// Trimming only advances a front index; the dead prefix is dropped once it
/// is both large and more than half of the storage.
#[derive(Debug, Clone)]
pub struct PlotBuffer {
    pub key: SignalKey,
    pub unit: String,
    times: Vec<f64>,
    values: Vec<f64>,
    front: usize,
}

impl PlotBuffer {
    pub fn new(key: SignalKey, unit: impl Into<String>) -> Self {
        Self {
            key,
            unit: unit.into(),
            times: Vec::new(),
            values: Vec::new(),
            front: 0,
        }
    }

    pub fn push(&mut self, t: f64, value: f64) {
        if self.times.last().map_or(true, |&last| t >= last) {
            self.times.push(t);
            self.values.push(value);
            return;
        }
        let at = self.front + self.times[self.front..].partition_point(|&x| x <= t);
        self.times.insert(at, t);
        self.values.insert(at, value);
    }

    /// Live timestamps, oldest first
    pub fn times(&self) -> &[f64] {
        &self.times[self.front..]
    }

    /// Live values, aligned with [`times`](Self::times)
    pub fn values(&self) -> &[f64] {
        &self.values[self.front..]
    }

    pub fn len(&self) -> usize {
        self.times.len() - self.front
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop samples older than `latest - window`
    pub fn trim(&mut self, window: f64) {
        let Some(&latest) = self.times.last() else {
            return;
        };
        let cutoff = latest - window;
        self.front += self.times[self.front..].partition_point(|&t| t < cutoff);

        if self.front >= COMPACT_MIN && self.front * 2 > self.times.len() {
            self.times.drain(..self.front);
            self.values.drain(..self.front);
            self.front = 0;
        }
    }

    pub fn clear(&mut self) {
        self.times.clear();
        self.values.clear();
        self.front = 0;
    }

    /// Storage slots in use, trimmed prefix included
    pub fn capacity_used(&self) -> usize {
        self.times.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_window() {
        let mut buf = PlotBuffer::new(SignalKey::new(0x100, "Speed"), "km/h");
        for i in 0..=20 {
            buf.push(i as f64, i as f64 * 2.0);
        }
        buf.trim(10.0);
        assert_eq!(buf.len(), 11);
        assert_eq!(buf.times()[0], 10.0);
        assert_eq!(buf.values()[0], 20.0);
        assert_eq!(buf.capacity_used(), 21);
    }

    #[test]
    fn test_late_sample_keeps_order() {
        let mut buf = PlotBuffer::new(SignalKey::new(0x100, "Speed"), "km/h");
        for (t, v) in [(8.0, 1.0), (10.0, 2.0), (11.0, 3.0), (9.5, 4.0), (10.5, 5.0), (12.0, 6.0)] {
            buf.push(t, v);
        }
        assert_eq!(buf.times(), [8.0, 9.5, 10.0, 10.5, 11.0, 12.0]);
        assert_eq!(buf.values(), [1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);

        buf.trim(2.0);
        assert_eq!(buf.times(), [10.0, 10.5, 11.0, 12.0]);
        assert_eq!(buf.values(), [2.0, 5.0, 3.0, 6.0]);

        // Older than everything live: parked at the front, gone at next trim
        buf.push(1.0, 7.0);
        assert_eq!(buf.times()[0], 1.0);
        buf.trim(2.0);
        assert_eq!(buf.times(), [10.0, 10.5, 11.0, 12.0]);
    }

    #[test]
    fn test_compaction() {
        let mut buf = PlotBuffer::new(SignalKey::new(1, "x"), "");
        for i in 0..10_000 {
            buf.push(i as f64 * 0.001, 0.0);
        }
        buf.trim(1.0);
        assert_eq!(buf.capacity_used(), buf.len());
        assert!(buf.len() >= 1000 && buf.len() <= 1001);
        assert!(buf.times()[0] >= buf.times()[buf.len() - 1] - 1.0);
    }
}

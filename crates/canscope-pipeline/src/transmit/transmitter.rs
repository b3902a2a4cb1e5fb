//! Cyclic transmitter thread

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use canscope_bus::FrameSender;
use canscope_core::{now_timestamp, EventBus, PipelineEvent, TxCounts};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use super::table::TxSnapshot;
use crate::error::{PipelineError, PipelineResult};

const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Loop period
const TICK: Duration = Duration::from_millis(1);

struct Worker {
    handle: JoinHandle<()>,
    done: std_mpsc::Receiver<()>,
}

/// Sends enabled snapshot rows at their cycle time
///
/// Send counts are accumulated and reported every `counter_interval` (and
/// once more when the thread exits), both over the counts channel and as a
/// [`PipelineEvent::TxCountsUpdated`].
pub struct Transmitter {
    sender: Arc<dyn FrameSender>,
    snapshots: watch::Receiver<Arc<TxSnapshot>>,
    counts: mpsc::UnboundedSender<TxCounts>,
    events: EventBus,
    counter_interval: Duration,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<Worker>>,
}

impl Transmitter {
    pub fn new(
        sender: Arc<dyn FrameSender>,
        snapshots: watch::Receiver<Arc<TxSnapshot>>,
        counts: mpsc::UnboundedSender<TxCounts>,
        events: EventBus,
        counter_interval: Duration,
    ) -> Self {
        Self {
            sender,
            snapshots,
            counts,
            events,
            counter_interval,
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// Start the transmit thread; does nothing when already running
    pub fn start(&self) -> PipelineResult<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        self.running.store(true, Ordering::SeqCst);
        let (done_tx, done_rx) = std_mpsc::channel();
        let ctx = TxLoop {
            sender: self.sender.clone(),
            snapshots: self.snapshots.clone(),
            counts: self.counts.clone(),
            events: self.events.clone(),
            counter_interval: self.counter_interval,
            running: self.running.clone(),
        };

        let handle = std::thread::Builder::new()
            .name("tx".to_string())
            .spawn(move || {
                ctx.run();
                let _ = done_tx.send(());
            })
            .map_err(|source| {
                self.running.store(false, Ordering::SeqCst);
                PipelineError::Spawn { name: "tx", source }
            })?;

        *worker = Some(Worker {
            handle,
            done: done_rx,
        });
        tracing::info!("Transmitter started");
        Ok(())
    }

    /// Stop the thread, waiting at most two seconds; pending counts are reported
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        match worker.done.recv_timeout(STOP_TIMEOUT) {
            Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    tracing::error!("Transmitter thread panicked");
                }
                tracing::info!("Transmitter stopped");
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                tracing::warn!("Transmitter did not stop in time, detaching");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }
}

impl Drop for Transmitter {
    fn drop(&mut self) {
        self.stop();
    }
}

struct TxLoop {
    sender: Arc<dyn FrameSender>,
    snapshots: watch::Receiver<Arc<TxSnapshot>>,
    counts: mpsc::UnboundedSender<TxCounts>,
    events: EventBus,
    counter_interval: Duration,
    running: Arc<AtomicBool>,
}

impl TxLoop {
    fn run(&self) {
        let mut timers: HashMap<usize, Instant> = HashMap::new();
        let mut counts = TxCounts::new();
        let mut last_report = Instant::now();

        while self.running.load(Ordering::SeqCst) {
            let snapshot = self.snapshots.borrow().clone();
            let now = Instant::now();

            for item in &snapshot.items {
                if !item.enabled {
                    timers.remove(&item.row);
                    continue;
                }
                if timers.get(&item.row).is_some_and(|next| now < *next) {
                    continue;
                }

                let mut frame = item.frame.clone();
                frame.timestamp = now_timestamp();
                match self.sender.send_frame(&frame) {
                    Ok(()) => *counts.entry(item.row).or_default() += 1,
                    Err(e) => tracing::debug!(
                        row = item.row,
                        id = format_args!("{:#X}", frame.id),
                        error = %e,
                        "Transmit failed"
                    ),
                }
                timers.insert(item.row, now + item.cycle);
            }

            if !counts.is_empty() && last_report.elapsed() >= self.counter_interval {
                self.report(std::mem::take(&mut counts));
                last_report = Instant::now();
            }

            std::thread::sleep(TICK);
        }

        if !counts.is_empty() {
            self.report(counts);
        }
    }

    fn report(&self, counts: TxCounts) {
        if self.counts.send(counts.clone()).is_err() {
            tracing::trace!("TX counts receiver gone");
        }
        self.events.publish(PipelineEvent::TxCountsUpdated { counts });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transmit::{TxRow, TxTable};
    use canscope_core::{Direction, Frame, NullCodec, SourceError, SourceResult};

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<Frame>>,
    }

    impl FrameSender for Recorder {
        fn send_frame(&self, frame: &Frame) -> SourceResult<()> {
            if frame.id == 0x666 {
                return Err(SourceError::SendFailed("rejected".to_string()));
            }
            self.frames.lock().push(frame.clone());
            Ok(())
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<TxCounts>) -> TxCounts {
        let mut total = TxCounts::new();
        while let Ok(counts) = rx.try_recv() {
            for (row, n) in counts {
                *total.entry(row).or_default() += n;
            }
        }
        total
    }

    #[test]
    fn test_cyclic_send_and_counts() {
        let mut table = TxTable::new(Arc::new(NullCodec), Duration::ZERO);
        table.add_row(TxRow::new(0x100, vec![1]).cyclic(20));
        table.add_row(TxRow::new(0x200, vec![2]));
        table.add_row(TxRow::new(0x666, vec![3]).cyclic(20));

        let sender = Arc::new(Recorder::default());
        let (counts_tx, mut counts_rx) = mpsc::unbounded_channel();
        let tx = Transmitter::new(
            sender.clone(),
            table.subscribe(),
            counts_tx,
            EventBus::default(),
            Duration::from_millis(50),
        );
        tx.start().unwrap();
        std::thread::sleep(Duration::from_millis(210));
        tx.stop();
        assert!(!tx.is_running());

        let frames = sender.frames.lock();
        assert!(frames.iter().all(|f| f.id == 0x100));
        assert!(frames.iter().all(|f| f.direction == Direction::Tx));
        assert!(
            (5..=14).contains(&frames.len()),
            "sent {} frames",
            frames.len()
        );

        let totals = drain(&mut counts_rx);
        assert_eq!(totals.get(&0).copied(), Some(frames.len() as u64));
        assert!(!totals.contains_key(&1));
        assert!(!totals.contains_key(&2));
    }

    #[test]
    fn test_disable_stops_sending() {
        let mut table = TxTable::new(Arc::new(NullCodec), Duration::ZERO);
        table.add_row(TxRow::new(0x100, vec![1]).cyclic(5));

        let sender = Arc::new(Recorder::default());
        let (counts_tx, _counts_rx) = mpsc::unbounded_channel();
        let tx = Transmitter::new(
            sender.clone(),
            table.subscribe(),
            counts_tx,
            EventBus::default(),
            Duration::from_millis(200),
        );
        tx.start().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        table.set_cycle_enabled(0, false).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let sent = sender.frames.lock().len();
        std::thread::sleep(Duration::from_millis(50));
        tx.stop();

        assert!(sent > 0);
        assert_eq!(sender.frames.lock().len(), sent);
    }

    #[test]
    fn test_reenable_restarts_cycle() {
        let mut table = TxTable::new(Arc::new(NullCodec), Duration::ZERO);
        table.add_row(TxRow::new(0x100, vec![1]).cyclic(100));

        let sender = Arc::new(Recorder::default());
        let (counts_tx, _counts_rx) = mpsc::unbounded_channel();
        let tx = Transmitter::new(
            sender.clone(),
            table.subscribe(),
            counts_tx,
            EventBus::default(),
            Duration::from_millis(200),
        );
        tx.start().unwrap();
        std::thread::sleep(Duration::from_millis(30));
        table.set_cycle_enabled(0, false).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(sender.frames.lock().len(), 1);

        // Sent at once, not at the slot left over from before the disable
        table.set_cycle_enabled(0, true).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(sender.frames.lock().len(), 2);

        std::thread::sleep(Duration::from_millis(130));
        tx.stop();
        let frames = sender.frames.lock();
        assert_eq!(frames.len(), 3);
        let gap = frames[2].timestamp - frames[1].timestamp;
        assert!((0.08..0.13).contains(&gap), "cycle gap {gap}");
    }
}

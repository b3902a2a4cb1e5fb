//! In-process virtual bus
//!
//! Every connected [`VirtualSource`] registers its inbox under its channel
//! name. A frame sent by one source is delivered to every other source on
//! the same channel, and back to the sender as Tx when `receive_own` is set.
//! Frames can also be injected directly, which makes the source the test
//! double for everything downstream.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use canscope_core::{now_timestamp, Direction, Frame, FrameSource, SourceError, SourceResult};
use parking_lot::{Condvar, Mutex};

use super::validate_frame;
use crate::config::VirtualConfig;

struct Inbox {
    id: u64,
    bus: u8,
    channel: String,
    frames: Mutex<VecDeque<Frame>>,
    ready: Condvar,
}

impl Inbox {
    fn push(&self, frame: Frame) {
        self.frames.lock().push_back(frame);
        self.ready.notify_one();
    }

    /// Deliver a frame coming from the wire, stamped for this receiver
    fn deliver(&self, frame: &Frame, direction: Direction) {
        let mut frame = frame.clone();
        frame.direction = direction;
        frame.bus = self.bus;
        frame.timestamp = now_timestamp();
        frame.channel = Some(self.channel.clone());
        self.push(frame);
    }
}

type Registry = Mutex<HashMap<String, Vec<Weak<Inbox>>>>;

fn registry() -> &'static Registry {
    static CHANNELS: OnceLock<Registry> = OnceLock::new();
    CHANNELS.get_or_init(|| Mutex::new(HashMap::new()))
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Frames kept in a source's sent log; older ones are dropped
pub const SENT_LOG_CAPACITY: usize = 1024;

/// Source attached to an in-process virtual bus
pub struct VirtualSource {
    config: VirtualConfig,
    inbox: Arc<Inbox>,
    connected: AtomicBool,
    /// Most recent frames accepted by `send`, oldest first
    sent: Mutex<VecDeque<Frame>>,
}

impl VirtualSource {
    pub fn new(config: &VirtualConfig) -> Self {
        Self {
            config: config.clone(),
            inbox: Arc::new(Inbox {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                bus: config.bus_number,
                channel: config.channel.clone(),
                frames: Mutex::new(VecDeque::new()),
                ready: Condvar::new(),
            }),
            connected: AtomicBool::new(false),
            sent: Mutex::new(VecDeque::with_capacity(SENT_LOG_CAPACITY)),
        }
    }

    /// Source on a channel of its own, for tests
    pub fn isolated(bus_number: u8) -> Self {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        Self::new(&VirtualConfig {
            channel: format!("isolated{}", id),
            bus_number,
            fd: true,
            receive_own: false,
        })
    }

    /// Queue a frame as if it had arrived from the bus
    ///
    /// The frame keeps its own timestamp unless it is zero.
    pub fn inject(&self, mut frame: Frame) {
        if frame.timestamp == 0.0 {
            frame.timestamp = now_timestamp();
        }
        self.inbox.push(frame);
    }

    /// The last [`SENT_LOG_CAPACITY`] frames accepted by `send`, oldest first
    pub fn sent(&self) -> Vec<Frame> {
        self.sent.lock().iter().cloned().collect()
    }

    /// Frames waiting to be received
    pub fn pending(&self) -> usize {
        self.inbox.frames.lock().len()
    }
}

impl FrameSource for VirtualSource {
    fn connect(&self) -> SourceResult<()> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut channels = registry().lock();
        let peers = channels.entry(self.config.channel.clone()).or_default();
        peers.retain(|peer| peer.strong_count() > 0);
        peers.push(Arc::downgrade(&self.inbox));
        tracing::debug!(
            channel = %self.config.channel,
            bus = self.config.bus_number,
            peers = peers.len(),
            "Virtual source connected"
        );
        Ok(())
    }

    fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut channels = registry().lock();
        if let Some(peers) = channels.get_mut(&self.config.channel) {
            peers.retain(|peer| {
                peer.upgrade()
                    .map(|inbox| inbox.id != self.inbox.id)
                    .unwrap_or(false)
            });
            if peers.is_empty() {
                channels.remove(&self.config.channel);
            }
        }
        tracing::debug!(channel = %self.config.channel, "Virtual source disconnected");
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn recv(&self, timeout: Duration) -> SourceResult<Option<Frame>> {
        if !self.is_connected() {
            return Err(SourceError::NotConnected);
        }

        let deadline = Instant::now() + timeout;
        let mut frames = self.inbox.frames.lock();
        loop {
            if let Some(frame) = frames.pop_front() {
                return Ok(Some(frame));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            self.inbox.ready.wait_for(&mut frames, remaining);
        }
    }

    fn send(&self, frame: &Frame) -> SourceResult<()> {
        if !self.is_connected() {
            return Err(SourceError::NotConnected);
        }
        validate_frame(frame, self.config.fd)?;

        let mut sent = frame.clone();
        sent.direction = Direction::Tx;
        sent.bus = self.config.bus_number;
        {
            let mut log = self.sent.lock();
            if log.len() >= SENT_LOG_CAPACITY {
                log.pop_front();
            }
            log.push_back(sent.clone());
        }

        let peers: Vec<Arc<Inbox>> = registry()
            .lock()
            .get(&self.config.channel)
            .map(|peers| peers.iter().filter_map(Weak::upgrade).collect())
            .unwrap_or_default();

        for peer in peers {
            if peer.id != self.inbox.id {
                peer.deliver(&sent, Direction::Rx);
            } else if self.config.receive_own {
                // Own frames are echoed as Tx
                peer.deliver(&sent, Direction::Tx);
            }
        }
        Ok(())
    }

    fn bus(&self) -> u8 {
        self.config.bus_number
    }
}

impl Drop for VirtualSource {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config(channel: &str, bus_number: u8, receive_own: bool) -> VirtualConfig {
        VirtualConfig {
            channel: channel.to_string(),
            bus_number,
            fd: false,
            receive_own,
        }
    }

    #[test]
    fn test_recv_requires_connection() {
        let source = VirtualSource::isolated(1);
        assert_eq!(
            source.recv(Duration::from_millis(1)).unwrap_err(),
            SourceError::NotConnected
        );
    }

    #[test]
    fn test_sent_log_keeps_newest() {
        let source = VirtualSource::isolated(1);
        source.connect().unwrap();
        for i in 0..(SENT_LOG_CAPACITY + 500) {
            source.send(&Frame::new(0x100, (i as u32).to_le_bytes().to_vec())).unwrap();
        }

        let sent = source.sent();
        assert_eq!(sent.len(), SENT_LOG_CAPACITY);
        assert_eq!(sent[0].data, 500u32.to_le_bytes().to_vec());
        assert_eq!(
            sent[SENT_LOG_CAPACITY - 1].data,
            ((SENT_LOG_CAPACITY + 499) as u32).to_le_bytes().to_vec()
        );
    }

    #[test]
    fn test_inject_and_recv() {
        let source = VirtualSource::isolated(1);
        source.connect().unwrap();
        source.inject(Frame::new(0x100, vec![1, 2]).with_timestamp(5.0));

        let frame = source.recv(Duration::from_millis(10)).unwrap().unwrap();
        assert_eq!(frame.id, 0x100);
        assert_eq!(frame.timestamp, 5.0);
        assert!(source.recv(Duration::from_millis(1)).unwrap().is_none());
    }

    #[test]
    fn test_peers_hear_each_other() {
        let a = VirtualSource::new(&config("test-peers", 1, false));
        let b = VirtualSource::new(&config("test-peers", 2, false));
        a.connect().unwrap();
        b.connect().unwrap();

        a.send(&Frame::new(0x321, vec![0xAA])).unwrap();

        let got = b.recv(Duration::from_millis(50)).unwrap().unwrap();
        assert_eq!(got.id, 0x321);
        assert_eq!(got.bus, 2);
        assert_eq!(got.direction, Direction::Rx);
        assert!(a.recv(Duration::from_millis(1)).unwrap().is_none());
        assert_eq!(a.sent().len(), 1);
        assert_eq!(a.sent()[0].direction, Direction::Tx);
    }

    #[test]
    fn test_receive_own() {
        let a = VirtualSource::new(&config("test-own", 1, true));
        a.connect().unwrap();
        a.send(&Frame::new(0x10, vec![1])).unwrap();

        let echo = a.recv(Duration::from_millis(50)).unwrap().unwrap();
        assert_eq!(echo.direction, Direction::Tx);
        assert_eq!(echo.channel.as_deref(), Some("test-own"));
    }

    #[test]
    fn test_disconnected_peer_not_reached() {
        let a = VirtualSource::new(&config("test-disc", 1, false));
        let b = VirtualSource::new(&config("test-disc", 1, false));
        a.connect().unwrap();
        b.connect().unwrap();
        b.disconnect();

        a.send(&Frame::new(0x10, vec![1])).unwrap();
        assert_eq!(b.pending(), 0);
    }

    #[test]
    fn test_oversized_classic_frame_rejected() {
        let a = VirtualSource::new(&config("test-size", 1, false));
        a.connect().unwrap();
        assert!(matches!(
            a.send(&Frame::new(0x10, vec![0; 12])),
            Err(SourceError::InvalidFrame(_))
        ));
    }
}

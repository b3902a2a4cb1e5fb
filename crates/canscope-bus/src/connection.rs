//! Connection service
//!
//! Manages the configured bus connections. Each connected bus gets its own
//! [`Receiver`] feeding the shared sink. Failures never propagate out of
//! `connect`: they end up in the connection's status string and on the
//! event bus.

use std::sync::Arc;

use canscope_core::{EventBus, Frame, FrameSink, FrameSource, PipelineEvent, SourceError, SourceResult};
use parking_lot::RwLock;

use crate::config::BusConfig;
use crate::receiver::{Receiver, ReceiverConfig};
use crate::source::create_source;

pub const STATUS_OK: &str = "OK";
pub const STATUS_DISCONNECTED: &str = "Disconnected";

/// Anything frames can be transmitted through
pub trait FrameSender: Send + Sync {
    fn send_frame(&self, frame: &Frame) -> SourceResult<()>;
}

struct Connection {
    label: String,
    source: Option<Arc<dyn FrameSource>>,
    receiver: Option<Receiver>,
    status: String,
}

/// Owns several bus connections and routes outgoing frames
pub struct ConnectionService {
    connections: RwLock<Vec<Connection>>,
    sink: Arc<dyn FrameSink>,
    events: EventBus,
    receiver_config: ReceiverConfig,
}

impl ConnectionService {
    pub fn new(sink: Arc<dyn FrameSink>, events: EventBus, receiver_config: ReceiverConfig) -> Self {
        Self {
            connections: RwLock::new(Vec::new()),
            sink,
            events,
            receiver_config,
        }
    }

    /// Add a connection from configuration and return its index
    ///
    /// A source that cannot be created (unsupported platform) still gets a
    /// slot whose status carries the error.
    pub fn add_bus(&self, config: &BusConfig) -> usize {
        match create_source(config) {
            Ok(source) => self.push(config.label(), Some(source), STATUS_DISCONNECTED.to_string()),
            Err(e) => {
                tracing::warn!(bus = %config.label(), error = %e, "Cannot create source");
                self.push(config.label(), None, e.status())
            }
        }
    }

    /// Add an already constructed source and return its index
    pub fn add_source(&self, label: impl Into<String>, source: Arc<dyn FrameSource>) -> usize {
        self.push(label.into(), Some(source), STATUS_DISCONNECTED.to_string())
    }

    fn push(&self, label: String, source: Option<Arc<dyn FrameSource>>, status: String) -> usize {
        let mut connections = self.connections.write();
        connections.push(Connection {
            label,
            source,
            receiver: None,
            status,
        });
        connections.len() - 1
    }

    /// Connect a bus and start its receiver; returns whether it is connected
    pub fn connect(&self, index: usize) -> bool {
        let status = {
            let mut connections = self.connections.write();
            let Some(conn) = connections.get_mut(index) else {
                return false;
            };
            if conn.receiver.is_some() {
                return true;
            }
            let Some(source) = conn.source.clone() else {
                return false;
            };

            let result = source.connect().and_then(|()| {
                let receiver =
                    Receiver::new(source.clone(), self.sink.clone(), self.receiver_config.clone());
                receiver
                    .start()
                    .map_err(|e| SourceError::ConnectionFailed(e.to_string()))?;
                Ok(receiver)
            });

            match result {
                Ok(receiver) => {
                    tracing::info!(bus = %conn.label, "Connected");
                    conn.receiver = Some(receiver);
                    conn.status = STATUS_OK.to_string();
                }
                Err(e) => {
                    tracing::warn!(bus = %conn.label, error = %e, "Connect failed");
                    source.disconnect();
                    conn.status = e.status();
                }
            }
            conn.status.clone()
        };

        let connected = status == STATUS_OK;
        self.events.publish(PipelineEvent::ConnectionStatus { index, status });
        connected
    }

    /// Stop the receiver, then disconnect the source
    pub fn disconnect(&self, index: usize) {
        let receiver = {
            let mut connections = self.connections.write();
            let Some(conn) = connections.get_mut(index) else {
                return;
            };
            conn.status = STATUS_DISCONNECTED.to_string();
            conn.receiver.take()
        };

        if let Some(receiver) = receiver {
            receiver.stop();
        }
        if let Some(source) = self.source(index) {
            source.disconnect();
        }
        tracing::info!(index, "Disconnected");
        self.events.publish(PipelineEvent::ConnectionStatus {
            index,
            status: STATUS_DISCONNECTED.to_string(),
        });
    }

    /// Connect every bus; returns how many are connected
    pub fn connect_all(&self) -> usize {
        (0..self.len()).filter(|&i| self.connect(i)).count()
    }

    pub fn disconnect_all(&self) {
        for index in 0..self.len() {
            if self.is_connected(index) {
                self.disconnect(index);
            }
        }
    }

    pub fn status(&self, index: usize) -> Option<String> {
        self.connections.read().get(index).map(|c| c.status.clone())
    }

    pub fn statuses(&self) -> Vec<(String, String)> {
        self.connections
            .read()
            .iter()
            .map(|c| (c.label.clone(), c.status.clone()))
            .collect()
    }

    pub fn is_connected(&self, index: usize) -> bool {
        self.connections
            .read()
            .get(index)
            .map(|c| c.receiver.is_some())
            .unwrap_or(false)
    }

    pub fn source(&self, index: usize) -> Option<Arc<dyn FrameSource>> {
        self.connections.read().get(index).and_then(|c| c.source.clone())
    }

    /// Frames received on a connection so far
    pub fn frame_count(&self, index: usize) -> u64 {
        self.connections
            .read()
            .get(index)
            .and_then(|c| c.receiver.as_ref().map(Receiver::frame_count))
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Send a frame on the connected bus with the frame's bus number,
    /// falling back to the first connected bus
    pub fn send(&self, frame: &Frame) -> SourceResult<()> {
        let source = {
            let connections = self.connections.read();
            let connected: Vec<&Arc<dyn FrameSource>> = connections
                .iter()
                .filter(|c| c.receiver.is_some())
                .filter_map(|c| c.source.as_ref())
                .collect();
            connected
                .iter()
                .find(|s| s.bus() == frame.bus)
                .or_else(|| connected.first())
                .map(|s| Arc::clone(s))
        };

        match source {
            Some(source) => source.send(frame),
            None => Err(SourceError::NotConnected),
        }
    }
}

impl FrameSender for ConnectionService {
    fn send_frame(&self, frame: &Frame) -> SourceResult<()> {
        self.send(frame)
    }
}

impl Drop for ConnectionService {
    fn drop(&mut self) {
        for conn in self.connections.get_mut().iter_mut() {
            if let Some(receiver) = conn.receiver.take() {
                receiver.stop();
            }
            if let Some(source) = &conn.source {
                source.disconnect();
            }
        }
    }
}

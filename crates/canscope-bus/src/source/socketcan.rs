//! Raw SocketCAN source (classic CAN and CAN FD)

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use canscope_core::{
    now_timestamp, Direction, Frame, FrameFlags, FrameSource, SourceError, SourceResult,
};
use parking_lot::Mutex;
use socketcan::{
    CanAnyFrame, CanFdFrame, CanFdSocket, CanFrame, CanSocket, EmbeddedFrame, ExtendedId,
    Frame as _, Id, Socket, StandardId,
};

use super::validate_frame;
use crate::config::SocketCanConfig;

enum CanBusSocket {
    Classic(CanSocket),
    Fd(CanFdSocket),
}

/// Source reading and writing frames on a SocketCAN interface
pub struct SocketCanSource {
    config: SocketCanConfig,
    /// Held only long enough to clone the handle; reads and writes run unlocked
    socket: Mutex<Option<Arc<CanBusSocket>>>,
    /// Own transmitted frames waiting to be reported back as Tx
    echo: Mutex<VecDeque<Frame>>,
    connected: AtomicBool,
}

impl SocketCanSource {
    pub fn new(config: &SocketCanConfig) -> Self {
        Self {
            config: config.clone(),
            socket: Mutex::new(None),
            echo: Mutex::new(VecDeque::new()),
            connected: AtomicBool::new(false),
        }
    }

    fn open(config: &SocketCanConfig) -> SourceResult<CanBusSocket> {
        let socket = if config.fd {
            CanFdSocket::open(&config.channel).map(CanBusSocket::Fd)
        } else {
            CanSocket::open(&config.channel).map(CanBusSocket::Classic)
        };
        socket.map_err(|e| {
            SourceError::ConnectionFailed(format!(
                "Failed to open CAN socket on {}: {}",
                config.channel, e
            ))
        })
    }

    fn socket(&self) -> SourceResult<Arc<CanBusSocket>> {
        self.socket.lock().clone().ok_or(SourceError::NotConnected)
    }

    fn to_frame<F: socketcan::Frame>(&self, raw: &F, fd: bool) -> Frame {
        let data = raw.data().to_vec();
        let dlc = if fd { data.len() as u8 } else { raw.dlc() as u8 };
        Frame {
            id: raw.raw_id(),
            data,
            flags: FrameFlags {
                extended: raw.is_extended(),
                fd,
                remote: raw.is_remote_frame(),
                error: raw.is_error_frame(),
            },
            direction: Direction::Rx,
            bus: self.config.bus_number,
            dlc,
            timestamp: now_timestamp(),
            channel: Some(self.config.channel.clone()),
        }
    }

    fn convert_any(&self, frame: CanAnyFrame) -> Frame {
        match frame {
            CanAnyFrame::Normal(f) => self.to_frame(&f, false),
            CanAnyFrame::Remote(f) => self.to_frame(&f, false),
            CanAnyFrame::Error(f) => self.to_frame(&f, false),
            CanAnyFrame::Fd(f) => self.to_frame(&f, true),
        }
    }
}

fn wire_id(frame: &Frame) -> SourceResult<Id> {
    let invalid = || SourceError::InvalidFrame(format!("invalid identifier {}", frame.id_hex()));
    if frame.flags.extended {
        ExtendedId::new(frame.id).map(Id::Extended).ok_or_else(invalid)
    } else {
        u16::try_from(frame.id)
            .ok()
            .and_then(StandardId::new)
            .map(Id::Standard)
            .ok_or_else(invalid)
    }
}

fn classic_frame(frame: &Frame, id: Id) -> Option<CanFrame> {
    if frame.flags.remote {
        CanFrame::new_remote(id, frame.dlc as usize)
    } else {
        CanFrame::new(id, frame.payload())
    }
}

impl FrameSource for SocketCanSource {
    fn connect(&self) -> SourceResult<()> {
        let socket = Self::open(&self.config)?;
        *self.socket.lock() = Some(Arc::new(socket));
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(
            channel = %self.config.channel,
            fd = self.config.fd,
            bitrate = self.config.bitrate,
            "SocketCAN source connected"
        );
        Ok(())
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.socket.lock().take();
        self.echo.lock().clear();
        tracing::info!(channel = %self.config.channel, "SocketCAN source disconnected");
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn recv(&self, timeout: Duration) -> SourceResult<Option<Frame>> {
        if let Some(frame) = self.echo.lock().pop_front() {
            return Ok(Some(frame));
        }

        let socket = self.socket()?;
        let result = match socket.as_ref() {
            CanBusSocket::Classic(s) => s
                .read_frame_timeout(timeout)
                .map(|f| self.to_frame(&f, false)),
            CanBusSocket::Fd(s) => s.read_frame_timeout(timeout).map(|f| self.convert_any(f)),
        };

        match result {
            Ok(frame) => Ok(Some(frame)),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(None),
            Err(e) => Err(SourceError::ReceiveFailed(e.to_string())),
        }
    }

    fn send(&self, frame: &Frame) -> SourceResult<()> {
        validate_frame(frame, self.config.fd)?;
        let id = wire_id(frame)?;

        let socket = self.socket()?;
        let written = match socket.as_ref() {
            CanBusSocket::Classic(s) => {
                let raw = classic_frame(frame, id)
                    .ok_or_else(|| SourceError::InvalidFrame("bad classic frame".into()))?;
                s.write_frame(&raw)
            }
            CanBusSocket::Fd(s) if frame.flags.fd => {
                let raw = CanFdFrame::new(id, frame.payload())
                    .ok_or_else(|| SourceError::InvalidFrame("bad FD frame".into()))?;
                s.write_frame(&raw)
            }
            CanBusSocket::Fd(s) => {
                let raw = classic_frame(frame, id)
                    .ok_or_else(|| SourceError::InvalidFrame("bad classic frame".into()))?;
                s.write_frame(&raw)
            }
        };
        written.map_err(|e| SourceError::SendFailed(e.to_string()))?;

        if self.config.receive_own {
            let mut echo = frame.clone();
            echo.direction = Direction::Tx;
            echo.bus = self.config.bus_number;
            echo.timestamp = now_timestamp();
            echo.channel = Some(self.config.channel.clone());
            self.echo.lock().push_back(echo);
        }
        Ok(())
    }

    fn bus(&self) -> u8 {
        self.config.bus_number
    }
}

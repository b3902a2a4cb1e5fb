//! canscope-bus - Bus connections
//!
//! This crate owns everything between a physical (or virtual) bus and the
//! frame pipeline:
//!
//! - [`BusConfig`]: serde configuration of one bus connection
//! - [`create_source`]: builds a [`FrameSource`](canscope_core::FrameSource) from a config
//! - [`VirtualSource`]: in-process bus shared by every source on the same channel
//! - `SocketCanSource`: raw CAN / CAN FD sockets (Linux, `socketcan` feature)
//! - [`Receiver`]: background thread batching received frames into a sink
//! - [`ConnectionService`]: several connections, their status and send routing
//!
//! # Example
//!
//! ```ignore
//! use canscope_bus::{BusConfig, ConnectionService, ReceiverConfig};
//!
//! let service = ConnectionService::new(dispatcher, events, ReceiverConfig::default());
//! let index = service.add_bus(&BusConfig::default());
//! service.connect(index);
//! ```

pub mod config;
pub mod connection;
pub mod receiver;
pub mod source;

pub use config::{BusConfig, SocketCanConfig, VirtualConfig};
pub use connection::{ConnectionService, FrameSender, STATUS_DISCONNECTED, STATUS_OK};
pub use receiver::{Receiver, ReceiverConfig};
pub use source::{create_source, VirtualSource, SENT_LOG_CAPACITY};

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub use source::socketcan::SocketCanSource;

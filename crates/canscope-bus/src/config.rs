//! Bus connection configuration
//!
//! One [`BusConfig`] per connection. Serialized with a `type` tag so that a
//! daemon config can list buses as:
//!
//! ```toml
//! [[bus]]
//! type = "socketcan"
//! channel = "can0"
//! bus_number = 1
//! fd = true
//! ```

use serde::{Deserialize, Serialize};

/// Configuration of one bus connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BusConfig {
    /// In-process bus shared by every virtual source on the same channel
    Virtual(VirtualConfig),
    /// Raw CAN socket (Linux only)
    SocketCan(SocketCanConfig),
}

impl Default for BusConfig {
    fn default() -> Self {
        Self::Virtual(VirtualConfig::default())
    }
}

impl BusConfig {
    pub fn channel(&self) -> &str {
        match self {
            BusConfig::Virtual(cfg) => &cfg.channel,
            BusConfig::SocketCan(cfg) => &cfg.channel,
        }
    }

    /// Logical bus number frames from this connection carry
    pub fn bus_number(&self) -> u8 {
        match self {
            BusConfig::Virtual(cfg) => cfg.bus_number,
            BusConfig::SocketCan(cfg) => cfg.bus_number,
        }
    }

    pub fn fd(&self) -> bool {
        match self {
            BusConfig::Virtual(cfg) => cfg.fd,
            BusConfig::SocketCan(cfg) => cfg.fd,
        }
    }

    /// Short label for logs, e.g. "socketcan:can0"
    pub fn label(&self) -> String {
        match self {
            BusConfig::Virtual(cfg) => format!("virtual:{}", cfg.channel),
            BusConfig::SocketCan(cfg) => format!("socketcan:{}", cfg.channel),
        }
    }
}

/// Virtual bus configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualConfig {
    /// Channel name; sources on the same channel hear each other
    #[serde(default = "default_virtual_channel")]
    pub channel: String,
    #[serde(default = "default_bus_number")]
    pub bus_number: u8,
    /// Accept CAN FD payloads (up to 64 bytes)
    #[serde(default)]
    pub fd: bool,
    /// Receive own transmitted frames (reported as received)
    #[serde(default = "default_true")]
    pub receive_own: bool,
}

impl Default for VirtualConfig {
    fn default() -> Self {
        Self {
            channel: default_virtual_channel(),
            bus_number: default_bus_number(),
            fd: false,
            receive_own: true,
        }
    }
}

/// SocketCAN configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketCanConfig {
    /// CAN interface name (e.g., "can0", "vcan0")
    pub channel: String,
    #[serde(default = "default_bus_number")]
    pub bus_number: u8,
    /// Open a CAN FD socket
    #[serde(default)]
    pub fd: bool,
    /// Nominal bitrate; the interface itself is configured outside canscope
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,
    /// Report own transmitted frames back as Tx frames
    #[serde(default = "default_true")]
    pub receive_own: bool,
}

fn default_virtual_channel() -> String {
    "vcan0".to_string()
}

fn default_bus_number() -> u8 {
    1
}

fn default_bitrate() -> u32 {
    500000
}

fn default_true() -> bool {
    true
}

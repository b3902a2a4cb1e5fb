//! Frame sources
//!
//! - [`VirtualSource`]: in-process bus, also the test double
//! - `SocketCanSource`: raw CAN sockets (Linux only)

pub mod virtual_bus;

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod socketcan;

pub use virtual_bus::{VirtualSource, SENT_LOG_CAPACITY};

use std::sync::Arc;

use canscope_core::{FrameSource, SourceError, SourceResult};

use crate::config::BusConfig;

/// Create a frame source based on configuration
///
/// The source is returned disconnected; call `connect()` before receiving.
pub fn create_source(config: &BusConfig) -> SourceResult<Arc<dyn FrameSource>> {
    match config {
        BusConfig::Virtual(cfg) => Ok(Arc::new(VirtualSource::new(cfg))),
        #[cfg(all(target_os = "linux", feature = "socketcan"))]
        BusConfig::SocketCan(cfg) => Ok(Arc::new(socketcan::SocketCanSource::new(cfg))),
        #[cfg(not(all(target_os = "linux", feature = "socketcan")))]
        BusConfig::SocketCan(_) => Err(SourceError::Unsupported(
            "SocketCAN requires Linux and the 'socketcan' feature".to_string(),
        )),
    }
}

/// Check a frame against what the bus can carry
pub(crate) fn validate_frame(frame: &canscope_core::Frame, fd: bool) -> SourceResult<()> {
    let max = if fd { 64 } else { 8 };
    if frame.payload().len() > max {
        return Err(SourceError::InvalidFrame(format!(
            "payload of {} bytes exceeds {} on this bus",
            frame.payload().len(),
            max
        )));
    }
    if frame.flags.fd && !fd {
        return Err(SourceError::InvalidFrame(
            "FD frame on a classic CAN bus".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VirtualConfig;
    use canscope_core::Frame;

    #[test]
    fn test_create_virtual() {
        let source = create_source(&BusConfig::Virtual(VirtualConfig {
            bus_number: 3,
            ..Default::default()
        }))
        .unwrap();
        assert_eq!(source.bus(), 3);
        assert!(!source.is_connected());
    }

    #[test]
    fn test_validate_frame() {
        assert!(validate_frame(&Frame::new(0x100, vec![0; 8]), false).is_ok());
        assert!(validate_frame(&Frame::new(0x100, vec![0; 12]), false).is_err());
        assert!(validate_frame(&Frame::new(0x100, vec![0; 12]), true).is_ok());
    }
}

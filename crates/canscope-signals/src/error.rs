//! Error types for signal conversion

use thiserror::Error;

/// Errors that can occur while decoding or encoding a payload
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConvError {
    /// No message registered for this identifier
    #[error("unknown message: 0x{0:X}")]
    UnknownMessage(u32),

    /// No signal with that name in the message
    #[error("unknown signal '{signal}' in message 0x{id:X}")]
    UnknownSignal { id: u32, signal: String },

    /// Payload does not cover the signal's bits
    #[error("payload too short: signal '{signal}' needs {needed} bytes, got {actual}")]
    PayloadTooShort {
        signal: String,
        needed: usize,
        actual: usize,
    },

    /// Signal layout is not representable
    #[error("invalid signal '{signal}': {reason}")]
    InvalidSignal { signal: String, reason: String },

    /// Value out of range for encoding
    #[error("value out of range: {value} not in [{min}, {max}]")]
    ValueOutOfRange { value: f64, min: f64, max: f64 },
}

/// Result type for signal conversion
pub type ConvResult<T> = Result<T, ConvError>;

/// Parse an identifier string (hex with optional 0x prefix)
///
/// Accepts "100", "0x100", "0X18DAF110".
pub fn parse_id(s: &str) -> Option<u32> {
    let s = s.trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(s, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("100"), Some(0x100));
        assert_eq!(parse_id("0x7FF"), Some(0x7FF));
        assert_eq!(parse_id(" 0X18DAF110 "), Some(0x18DA_F110));
        assert_eq!(parse_id("xyz"), None);
    }

    #[test]
    fn test_error_display() {
        let err = ConvError::UnknownMessage(0x123);
        assert_eq!(err.to_string(), "unknown message: 0x123");
    }
}

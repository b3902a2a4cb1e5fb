//! Signal decoder/encoder contract

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A decoded signal value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    /// Physical numeric value plus the number of decimals it is meaningful to
    Number { value: f64, decimals: u8 },
    /// Enumerated/choice text
    Text(String),
}

impl SignalValue {
    pub fn number(value: f64) -> Self {
        SignalValue::Number { value, decimals: 3 }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SignalValue::Number { value, .. } => Some(*value),
            SignalValue::Text(_) => None,
        }
    }
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Number { value, decimals } => {
                write!(f, "{:.*}", *decimals as usize, value)
            }
            SignalValue::Text(text) => f.write_str(text),
        }
    }
}

/// One signal extracted from a frame payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedSignal {
    pub name: String,
    pub value: SignalValue,
    #[serde(default)]
    pub unit: String,
}

impl DecodedSignal {
    pub fn new(name: impl Into<String>, value: SignalValue, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value,
            unit: unit.into(),
        }
    }

    /// Value formatted for tables (no unit)
    pub fn display_value(&self) -> String {
        self.value.to_string()
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_f64()
    }
}

/// Decoder/encoder for frame payloads
///
/// Unknown identifiers are not an error: they decode to an empty list and
/// encode to `None`.
pub trait SignalCodec: Send + Sync {
    /// Decode a payload into its signals
    fn decode(&self, id: u32, payload: &[u8]) -> Vec<DecodedSignal>;

    /// Encode named physical values into a payload
    fn encode(&self, id: u32, values: &HashMap<String, f64>) -> Option<Vec<u8>>;

    /// Message symbol (name) for an identifier; empty when unknown
    fn symbol_for(&self, id: u32) -> String;

    /// Declared (length, cycle time in ms) of a message
    fn message_info(&self, _id: u32) -> Option<(u8, Option<u32>)> {
        None
    }

    /// Signals of a message with their initial values
    fn signals_for(&self, _id: u32) -> Vec<DecodedSignal> {
        Vec::new()
    }
}

/// Codec that knows no messages
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCodec;

impl SignalCodec for NullCodec {
    fn decode(&self, _id: u32, _payload: &[u8]) -> Vec<DecodedSignal> {
        Vec::new()
    }

    fn encode(&self, _id: u32, _values: &HashMap<String, f64>) -> Option<Vec<u8>> {
        None
    }

    fn symbol_for(&self, _id: u32) -> String {
        String::new()
    }
}

/// Format decoded signals as `name=value unit` joined by two spaces
pub fn summarize(signals: &[DecodedSignal]) -> String {
    signals
        .iter()
        .map(|sig| {
            if sig.unit.is_empty() {
                format!("{}={}", sig.name, sig.display_value())
            } else {
                format!("{}={} {}", sig.name, sig.display_value(), sig.unit)
            }
        })
        .collect::<Vec<_>>()
        .join("  ")
}
